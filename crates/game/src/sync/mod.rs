pub mod receiver;
pub mod sender;
pub mod snapshot;
pub mod tracker;
pub mod translation;

pub use sender::SenderSync;
pub use snapshot::{
    FIELD_ALL, OpRecord, Operation, Route, Snapshot, SnapshotHeader, peek_path, root_of,
};
pub use tracker::{PeerSyncState, SyncTracker};
pub use translation::{SNAP_INTERVAL, TranslationBuffer};
