use glam::{Vec2, Vec3};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WireError {
    #[error("unexpected end of input at offset {offset} (wanted {wanted} more bytes, {remaining} left)")]
    UnexpectedEof {
        offset: usize,
        wanted: usize,
        remaining: usize,
    },
    #[error("string payload is not valid utf-8")]
    BadUtf8,
    #[error("declared length {0} exceeds remaining input")]
    BadLength(u32),
    #[error("unknown opcode {0}")]
    UnknownOpCode(u8),
    #[error("invalid route {0}")]
    BadRoute(u8),
}

pub fn write_u8(out: &mut Vec<u8>, value: u8) {
    out.push(value);
}

pub fn write_u16(out: &mut Vec<u8>, value: u16) {
    out.extend_from_slice(&value.to_le_bytes());
}

pub fn write_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_le_bytes());
}

pub fn write_u64(out: &mut Vec<u8>, value: u64) {
    out.extend_from_slice(&value.to_le_bytes());
}

pub fn write_f32(out: &mut Vec<u8>, value: f32) {
    out.extend_from_slice(&value.to_le_bytes());
}

/// `u32` length prefix + UTF-8 bytes, no terminator.
pub fn write_str(out: &mut Vec<u8>, value: &str) {
    write_u32(out, value.len() as u32);
    out.extend_from_slice(value.as_bytes());
}

/// `u32` length prefix + raw bytes.
pub fn write_blob(out: &mut Vec<u8>, value: &[u8]) {
    write_u32(out, value.len() as u32);
    out.extend_from_slice(value);
}

/// Fixed-arity vectors are raw component bytes, no length prefix.
pub fn write_vec2(out: &mut Vec<u8>, value: Vec2) {
    write_f32(out, value.x);
    write_f32(out, value.y);
}

pub fn write_vec3(out: &mut Vec<u8>, value: Vec3) {
    write_f32(out, value.x);
    write_f32(out, value.y);
    write_f32(out, value.z);
}

/// Bounds-checked cursor over a received byte slice. Every read advances the
/// offset; a short read reports how much was missing instead of panicking.
#[derive(Debug)]
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn offset(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub fn take(&mut self, count: usize) -> Result<&'a [u8], WireError> {
        if self.remaining() < count {
            return Err(WireError::UnexpectedEof {
                offset: self.pos,
                wanted: count,
                remaining: self.remaining(),
            });
        }
        let slice = &self.buf[self.pos..self.pos + count];
        self.pos += count;
        Ok(slice)
    }

    pub fn read_u8(&mut self) -> Result<u8, WireError> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16, WireError> {
        Ok(u16::from_le_bytes(self.take(2)?.try_into().unwrap()))
    }

    pub fn read_u32(&mut self) -> Result<u32, WireError> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    pub fn read_u64(&mut self) -> Result<u64, WireError> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    pub fn read_f32(&mut self) -> Result<f32, WireError> {
        Ok(f32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    pub fn read_str(&mut self) -> Result<String, WireError> {
        let len = self.read_u32()?;
        if len as usize > self.remaining() {
            return Err(WireError::BadLength(len));
        }
        let bytes = self.take(len as usize)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| WireError::BadUtf8)
    }

    pub fn read_blob(&mut self) -> Result<Vec<u8>, WireError> {
        let len = self.read_u32()?;
        if len as usize > self.remaining() {
            return Err(WireError::BadLength(len));
        }
        Ok(self.take(len as usize)?.to_vec())
    }

    pub fn read_vec2(&mut self) -> Result<Vec2, WireError> {
        Ok(Vec2::new(self.read_f32()?, self.read_f32()?))
    }

    pub fn read_vec3(&mut self) -> Result<Vec3, WireError> {
        Ok(Vec3::new(
            self.read_f32()?,
            self.read_f32()?,
            self.read_f32()?,
        ))
    }
}

/// FNV-1a 64. Const so stable type ids can be computed at compile time from
/// type names; also used for component change detection over serialized
/// bytes.
pub const fn fnv1a_64(bytes: &[u8]) -> u64 {
    let mut hash = 0xcbf2_9ce4_8422_2325u64;
    let mut i = 0;
    while i < bytes.len() {
        hash ^= bytes[i] as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
        i += 1;
    }
    hash
}
