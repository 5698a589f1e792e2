use super::wire::{Reader, WireError};

/// Peer identifier handed out by the server accept loop. 0 is the server
/// itself.
pub type NetworkId = u32;

pub const SERVER_ID: NetworkId = 0;

pub const DEFAULT_PORT: u16 = 27035;
pub const DEFAULT_TICK_RATE: u32 = 60;

/// Size of the frame header on the wire: `u16 type`, two reserved bytes,
/// `u32 payloadSize`, `u32 originNetworkId`.
pub const HEADER_SIZE: usize = 12;

/// Frames whose declared payload exceeds this cap are treated as a corrupted
/// stream and the peer is disconnected.
pub const DEFAULT_MAX_PAYLOAD: u32 = 1024 * 1024;

/// Packet types recognized by both peers. The numeric values are part of the
/// wire contract and must never be reordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum PacketType {
    /// Server asks a freshly accepted client for its display name.
    RequestStringId = 1,
    /// Client answers with a length-prefixed display name.
    StringId = 2,
    /// Server tells a client which `NetworkId` it was assigned.
    AssignNetworkId = 3,
    /// Chat line, client to server.
    ClientChat = 10,
    /// Chat line, server fan-out (origin id + text).
    ServerChat = 11,
    /// Scene snapshot, client to server.
    ClientSnapshot = 20,
    /// Scene snapshot, server to client.
    ServerSnapshot = 21,
}

impl PacketType {
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            1 => Some(PacketType::RequestStringId),
            2 => Some(PacketType::StringId),
            3 => Some(PacketType::AssignNetworkId),
            10 => Some(PacketType::ClientChat),
            11 => Some(PacketType::ServerChat),
            20 => Some(PacketType::ClientSnapshot),
            21 => Some(PacketType::ServerSnapshot),
            _ => None,
        }
    }
}

/// Little-endian frame header. The type is kept raw so unrecognized packets
/// can be skipped and logged without tearing down the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub packet_type: u16,
    pub payload_size: u32,
    pub origin: NetworkId,
}

impl PacketHeader {
    pub fn new(packet_type: PacketType, payload_size: u32, origin: NetworkId) -> Self {
        Self {
            packet_type: packet_type as u16,
            payload_size,
            origin,
        }
    }

    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut bytes = [0u8; HEADER_SIZE];
        bytes[0..2].copy_from_slice(&self.packet_type.to_le_bytes());
        // bytes 2..4 reserved
        bytes[4..8].copy_from_slice(&self.payload_size.to_le_bytes());
        bytes[8..12].copy_from_slice(&self.origin.to_le_bytes());
        bytes
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        let mut reader = Reader::new(bytes);
        let packet_type = reader.read_u16()?;
        let _reserved = reader.read_u16()?;
        Ok(Self {
            packet_type,
            payload_size: reader.read_u32()?,
            origin: reader.read_u32()?,
        })
    }
}

/// Builds a complete frame: header followed by exactly `payload.len()` bytes.
pub fn build_frame(packet_type: PacketType, origin: NetworkId, payload: &[u8]) -> Vec<u8> {
    let header = PacketHeader::new(packet_type, payload.len() as u32, origin);
    let mut frame = Vec::with_capacity(HEADER_SIZE + payload.len());
    frame.extend_from_slice(&header.encode());
    frame.extend_from_slice(payload);
    frame
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_is_twelve_bytes() {
        let header = PacketHeader::new(PacketType::ClientSnapshot, 512, 7);
        let bytes = header.encode();
        assert_eq!(bytes.len(), HEADER_SIZE);
        assert_eq!(&bytes[0..2], &20u16.to_le_bytes());
        assert_eq!(&bytes[2..4], &[0, 0]);
        assert_eq!(&bytes[4..8], &512u32.to_le_bytes());
        assert_eq!(&bytes[8..12], &7u32.to_le_bytes());
    }

    #[test]
    fn test_header_roundtrip() {
        let header = PacketHeader::new(PacketType::ServerChat, 33, 2);
        let decoded = PacketHeader::decode(&header.encode()).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn test_frame_layout() {
        let frame = build_frame(PacketType::ClientChat, 4, b"hi");
        assert_eq!(frame.len(), HEADER_SIZE + 2);
        assert_eq!(&frame[HEADER_SIZE..], b"hi");

        let header = PacketHeader::decode(&frame).unwrap();
        assert_eq!(header.payload_size, 2);
        assert_eq!(header.origin, 4);
    }

    #[test]
    fn test_unknown_packet_type() {
        assert_eq!(PacketType::from_u16(21), Some(PacketType::ServerSnapshot));
        assert_eq!(PacketType::from_u16(999), None);
    }
}
