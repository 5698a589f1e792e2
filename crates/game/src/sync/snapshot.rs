use crate::net::protocol::NetworkId;
use crate::net::wire::{Reader, WireError, write_blob, write_str, write_u8, write_u32, write_u64};
use crate::scene::ComponentTypeId;

/// Current senders always emit the reserved field tag.
pub const FIELD_ALL: &str = "ALL";

/// Snapshot delivery mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Route {
    /// Client to server; the server forwards once to everyone else.
    RelayOnce = 0,
    /// Server to clients; applied, never forwarded again.
    ServerBroadcast = 1,
}

impl Route {
    pub fn from_u8(value: u8) -> Result<Self, WireError> {
        match value {
            0 => Ok(Route::RelayOnce),
            1 => Ok(Route::ServerBroadcast),
            other => Err(WireError::BadRoute(other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotHeader {
    pub sequence: u64,
    pub ack: u64,
    pub origin: NetworkId,
    pub route: Route,
    pub operation_count: u32,
}

/// An ordered batch of scene operations plus sequencing metadata. The op
/// blob is a concatenation of `(opCode: u8, length: u32, payload)` records;
/// record order is meaningful and must never be shuffled.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub header: SnapshotHeader,
    pub op_blob: Vec<u8>,
}

impl Snapshot {
    pub fn new(route: Route, origin: NetworkId) -> Self {
        Self {
            header: SnapshotHeader {
                sequence: 0,
                ack: 0,
                origin,
                route,
                operation_count: 0,
            },
            op_blob: Vec::new(),
        }
    }

    pub fn push_op(&mut self, operation: &Operation) {
        let mut payload = Vec::new();
        operation.encode_payload(&mut payload);

        write_u8(&mut self.op_blob, operation.op_code());
        write_u32(&mut self.op_blob, payload.len() as u32);
        self.op_blob.extend_from_slice(&payload);
        self.header.operation_count += 1;
    }

    pub fn is_empty(&self) -> bool {
        self.header.operation_count == 0
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(25 + self.op_blob.len());
        write_u64(&mut out, self.header.sequence);
        write_u64(&mut out, self.header.ack);
        write_u32(&mut out, self.header.origin);
        write_u8(&mut out, self.header.route as u8);
        write_u32(&mut out, self.header.operation_count);
        out.extend_from_slice(&self.op_blob);
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        let mut reader = Reader::new(bytes);
        let sequence = reader.read_u64()?;
        let ack = reader.read_u64()?;
        let origin = reader.read_u32()?;
        let route = Route::from_u8(reader.read_u8()?)?;
        let operation_count = reader.read_u32()?;
        let op_blob = reader.take(reader.remaining())?.to_vec();

        Ok(Self {
            header: SnapshotHeader {
                sequence,
                ack,
                origin,
                route,
                operation_count,
            },
            op_blob,
        })
    }

    /// Raw `(opCode, payload)` records in encoded order.
    pub fn records(&self) -> RecordIter<'_> {
        RecordIter {
            reader: Reader::new(&self.op_blob),
            remaining: self.header.operation_count,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct OpRecord<'a> {
    pub code: u8,
    pub payload: &'a [u8],
}

pub struct RecordIter<'a> {
    reader: Reader<'a>,
    remaining: u32,
}

impl<'a> Iterator for RecordIter<'a> {
    type Item = Result<OpRecord<'a>, WireError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;

        let record = (|| {
            let code = self.reader.read_u8()?;
            let length = self.reader.read_u32()?;
            let payload = self.reader.take(length as usize)?;
            Ok(OpRecord { code, payload })
        })();

        if record.is_err() {
            // A malformed record poisons the rest of the blob.
            self.remaining = 0;
        }
        Some(record)
    }
}

const OP_CREATE: u8 = 1;
const OP_DESTROY: u8 = 2;
const OP_ADD_COMPONENT: u8 = 3;
const OP_REMOVE_COMPONENT: u8 = 4;
const OP_SET_FIELD: u8 = 5;

/// One replicated scene mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    Create {
        path: String,
        type_name: String,
        owner: Option<NetworkId>,
    },
    Destroy {
        path: String,
    },
    AddComponent {
        path: String,
        component_type: ComponentTypeId,
        blob: Vec<u8>,
    },
    RemoveComponent {
        path: String,
        component_type: ComponentTypeId,
    },
    SetField {
        path: String,
        component_type: ComponentTypeId,
        field: String,
        blob: Vec<u8>,
    },
}

impl Operation {
    pub fn op_code(&self) -> u8 {
        match self {
            Operation::Create { .. } => OP_CREATE,
            Operation::Destroy { .. } => OP_DESTROY,
            Operation::AddComponent { .. } => OP_ADD_COMPONENT,
            Operation::RemoveComponent { .. } => OP_REMOVE_COMPONENT,
            Operation::SetField { .. } => OP_SET_FIELD,
        }
    }

    /// Every op payload leads with the target path.
    pub fn path(&self) -> &str {
        match self {
            Operation::Create { path, .. }
            | Operation::Destroy { path }
            | Operation::AddComponent { path, .. }
            | Operation::RemoveComponent { path, .. }
            | Operation::SetField { path, .. } => path,
        }
    }

    fn encode_payload(&self, out: &mut Vec<u8>) {
        match self {
            Operation::Create {
                path,
                type_name,
                owner,
            } => {
                write_str(out, path);
                write_str(out, type_name);
                match owner {
                    Some(owner) => {
                        write_u8(out, 1);
                        write_u32(out, *owner);
                    }
                    None => write_u8(out, 0),
                }
            }
            Operation::Destroy { path } => {
                write_str(out, path);
            }
            Operation::AddComponent {
                path,
                component_type,
                blob,
            } => {
                write_str(out, path);
                write_u64(out, *component_type);
                write_blob(out, blob);
            }
            Operation::RemoveComponent {
                path,
                component_type,
            } => {
                write_str(out, path);
                write_u64(out, *component_type);
            }
            Operation::SetField {
                path,
                component_type,
                field,
                blob,
            } => {
                write_str(out, path);
                write_u64(out, *component_type);
                write_str(out, field);
                write_blob(out, blob);
            }
        }
    }

    pub fn decode(code: u8, payload: &[u8]) -> Result<Self, WireError> {
        let mut reader = Reader::new(payload);
        match code {
            OP_CREATE => {
                let path = reader.read_str()?;
                let type_name = reader.read_str()?;
                let owner = if reader.read_u8()? != 0 {
                    Some(reader.read_u32()?)
                } else {
                    None
                };
                Ok(Operation::Create {
                    path,
                    type_name,
                    owner,
                })
            }
            OP_DESTROY => Ok(Operation::Destroy {
                path: reader.read_str()?,
            }),
            OP_ADD_COMPONENT => Ok(Operation::AddComponent {
                path: reader.read_str()?,
                component_type: reader.read_u64()?,
                blob: reader.read_blob()?,
            }),
            OP_REMOVE_COMPONENT => Ok(Operation::RemoveComponent {
                path: reader.read_str()?,
                component_type: reader.read_u64()?,
            }),
            OP_SET_FIELD => Ok(Operation::SetField {
                path: reader.read_str()?,
                component_type: reader.read_u64()?,
                field: reader.read_str()?,
                blob: reader.read_blob()?,
            }),
            other => Err(WireError::UnknownOpCode(other)),
        }
    }
}

/// Leading path of a raw op payload, without decoding the rest. Used by the
/// per-recipient ownership filter.
pub fn peek_path(payload: &[u8]) -> Result<String, WireError> {
    Reader::new(payload).read_str()
}

/// Root segment of a dotted path (the root name has no dots).
pub fn root_of(path: &str) -> &str {
    path.split('.').next().unwrap_or(path)
}
