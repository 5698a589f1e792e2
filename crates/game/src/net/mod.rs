pub mod protocol;
pub mod transport;
pub mod wire;

pub use protocol::{
    DEFAULT_MAX_PAYLOAD, DEFAULT_PORT, DEFAULT_TICK_RATE, HEADER_SIZE, NetworkId, PacketHeader,
    PacketType, SERVER_ID, build_frame,
};
pub use transport::{ClientTransport, ServerTransport, TransportConfig};
pub use wire::{Reader, WireError};
