pub mod executor;
pub mod net;
pub mod runtime;
pub mod scene;
pub mod sync;

pub use executor::{HolderKey, MainThreadExecutor};
pub use net::{
    ClientTransport, DEFAULT_MAX_PAYLOAD, DEFAULT_PORT, DEFAULT_TICK_RATE, HEADER_SIZE, NetworkId,
    PacketHeader, PacketType, Reader, SERVER_ID, ServerTransport, TransportConfig, WireError,
};
pub use runtime::{FLUSH_HOLDER, FixedTimestep, PeerIdentity, PeerLink, Runtime, Side};
pub use scene::{
    Component, ComponentFlags, ComponentRegistry, ComponentSlot, ComponentSpec, ComponentTypeId,
    GameObject, RegisteredComponent, Scene, SceneError, Transform2d, Transform3d,
    component_type_id, merge_components, serialize_to_blob, state_hash,
};
pub use sync::{
    FIELD_ALL, Operation, PeerSyncState, Route, SNAP_INTERVAL, SenderSync, Snapshot,
    SnapshotHeader, SyncTracker, TranslationBuffer,
};
