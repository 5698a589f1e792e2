use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use indexmap::IndexSet;
use log::{debug, warn};

use super::snapshot::{FIELD_ALL, Operation, Route, Snapshot, peek_path, root_of};
use super::tracker::SyncTracker;
use crate::net::protocol::{NetworkId, SERVER_ID};
use crate::net::wire::{Reader, fnv1a_64, write_u8, write_u32};
use crate::runtime::{PeerIdentity, PeerLink, Side};
use crate::scene::{
    Component, ComponentFlags, ComponentTypeId, GameObject, Scene, serialize_to_blob,
};

type HashKey = (String, ComponentTypeId);

enum DeferredDirty {
    Object(String),
    Destroyed(String),
    Component(String, ComponentTypeId),
}

#[derive(Default)]
struct DirtyState {
    /// Objects whose creation must replicate, in marking order.
    objects: IndexSet<String>,
    /// Paths whose destruction must replicate, in marking order.
    destroyed: IndexSet<String>,
    /// Component-level changes.
    components: IndexSet<(String, ComponentTypeId)>,
    /// Hash of the last emitted serialized form per component.
    last_hash: HashMap<HashKey, u64>,
    /// Root-ownership cache used for per-recipient filtering.
    owner_cache: HashMap<String, NetworkId>,
}

/// The sending half of the synchronization engine: collects dirty marks,
/// batches them into snapshots on flush, and filters per recipient so a
/// peer never receives echoes of mutations on roots it owns.
///
/// Dirty marking may happen from I/O callbacks, so the dirty state sits
/// behind a mutex; flushing happens on the simulation thread only.
pub struct SenderSync {
    side: Side,
    identity: PeerIdentity,
    dirty: Mutex<DirtyState>,
    deferred: Mutex<Vec<DeferredDirty>>,
    flush_requested: AtomicBool,
    apply_depth: AtomicU32,
    wake_hook: Mutex<Option<Box<dyn Fn() + Send + Sync>>>,
}

impl SenderSync {
    pub fn new(side: Side, identity: PeerIdentity) -> Self {
        Self {
            side,
            identity,
            dirty: Mutex::new(DirtyState::default()),
            deferred: Mutex::new(Vec::new()),
            flush_requested: AtomicBool::new(false),
            apply_depth: AtomicU32::new(0),
            wake_hook: Mutex::new(None),
        }
    }

    /// Called on the false→true transition of the flush token; hosts hook
    /// this to post the flush task onto the main-thread executor.
    pub fn set_wake_hook(&self, hook: Box<dyn Fn() + Send + Sync>) {
        *self.wake_hook.lock().unwrap() = Some(hook);
    }

    /// Queues an object's create/destroy state for replication.
    pub fn mark_object_dirty(&self, object: &GameObject) {
        if self.apply_depth.load(Ordering::Relaxed) > 0 {
            self.deferred
                .lock()
                .unwrap()
                .push(DeferredDirty::Object(object.absolute_path().to_string()));
            return;
        }
        if self.skips_marking(object) {
            return;
        }
        self.dirty
            .lock()
            .unwrap()
            .objects
            .insert(object.absolute_path().to_string());
        self.wake_flusher();
    }

    /// Queues an object's destruction. Must be called while the node still
    /// knows its absolute path.
    pub fn mark_object_destroyed(&self, object: &GameObject) {
        if self.skips_marking(object) {
            return;
        }
        if self.apply_depth.load(Ordering::Relaxed) > 0 {
            self.deferred
                .lock()
                .unwrap()
                .push(DeferredDirty::Destroyed(object.absolute_path().to_string()));
            return;
        }
        self.dirty
            .lock()
            .unwrap()
            .destroyed
            .insert(object.absolute_path().to_string());
        self.wake_flusher();
    }

    /// Queues a component-level change.
    pub fn mark_component_dirty(&self, object: &GameObject, component_type: ComponentTypeId) {
        if self.apply_depth.load(Ordering::Relaxed) > 0 {
            self.deferred.lock().unwrap().push(DeferredDirty::Component(
                object.absolute_path().to_string(),
                component_type,
            ));
            return;
        }
        if self.skips_marking(object) {
            return;
        }
        if let Some(slot) = object.slot(component_type) {
            if !slot.component.should_synchronize() {
                return;
            }
        }
        self.dirty
            .lock()
            .unwrap()
            .components
            .insert((object.absolute_path().to_string(), component_type));
        self.wake_flusher();
    }

    fn skips_marking(&self, object: &GameObject) -> bool {
        if object.is_local() {
            return true;
        }
        // A client only replicates objects it is authoritative for.
        if self.side == Side::Client {
            if let Some(owner) = object.owning_client() {
                if owner != self.identity.get() {
                    return true;
                }
            }
        }
        false
    }

    fn wake_flusher(&self) {
        if !self.flush_requested.swap(true, Ordering::AcqRel) {
            if let Some(hook) = &*self.wake_hook.lock().unwrap() {
                hook();
            }
        }
    }

    pub fn flush_pending(&self) -> bool {
        self.flush_requested.load(Ordering::Acquire)
    }

    /// Entered by the receiver around snapshot application; while active,
    /// dirty marks are parked so applying a remote op can never re-echo it.
    pub fn begin_apply(&self) {
        self.apply_depth.fetch_add(1, Ordering::AcqRel);
    }

    /// Leaves the apply scope; the last exit re-plays parked marks against
    /// the live scene under the normal guards.
    pub fn end_apply(&self, scene: &Scene) {
        if self.apply_depth.fetch_sub(1, Ordering::AcqRel) != 1 {
            return;
        }
        let parked = std::mem::take(&mut *self.deferred.lock().unwrap());
        for entry in parked {
            match entry {
                DeferredDirty::Object(path) => {
                    if let Some(object) = scene.get(&path) {
                        self.mark_object_dirty(object);
                    }
                }
                DeferredDirty::Destroyed(path) => {
                    self.dirty.lock().unwrap().destroyed.insert(path);
                    self.wake_flusher();
                }
                DeferredDirty::Component(path, component_type) => {
                    if let Some(object) = scene.get(&path) {
                        self.mark_component_dirty(object, component_type);
                    }
                }
            }
        }
    }

    pub fn apply_depth(&self) -> u32 {
        self.apply_depth.load(Ordering::Relaxed)
    }

    /// Records the last-emitted hash for a component; also used by the
    /// receiver after applying a remote payload so the next flush does not
    /// re-send what just arrived.
    pub fn remember_hash(&self, path: &str, component_type: ComponentTypeId, hash: u64) {
        self.dirty
            .lock()
            .unwrap()
            .last_hash
            .insert((path.to_string(), component_type), hash);
    }

    pub fn forget_hash(&self, path: &str, component_type: ComponentTypeId) {
        self.dirty
            .lock()
            .unwrap()
            .last_hash
            .remove(&(path.to_string(), component_type));
    }

    /// Drops ownership and hash knowledge for a whole subtree; used when a
    /// remote `Destroy` removes objects this sender never flushed itself.
    pub fn forget_subtree(&self, path: &str) {
        let mut state = self.dirty.lock().unwrap();
        let prefix = format!("{path}.");
        state
            .owner_cache
            .retain(|cached, _| cached != path && !cached.starts_with(&prefix));
        state
            .last_hash
            .retain(|(hashed, _), _| hashed != path && !hashed.starts_with(&prefix));
    }

    /// Records root ownership learned from a remote `Create`, so later
    /// server flushes filter correctly for client-created subtrees.
    pub fn remember_owner(&self, path: &str, owner: NetworkId) {
        self.dirty
            .lock()
            .unwrap()
            .owner_cache
            .insert(path.to_string(), owner);
    }

    pub fn cached_owner(&self, path: &str) -> Option<NetworkId> {
        self.dirty.lock().unwrap().owner_cache.get(path).copied()
    }

    /// Batches all dirty state into one template snapshot and transmits it:
    /// the server clones and ownership-filters per client, a client sends a
    /// single snapshot to the server. Claims the wake token; a no-op when no
    /// flush was requested.
    pub fn flush_dirty(
        &self,
        scene: &mut Scene,
        tracker: &SyncTracker,
        link: &dyn PeerLink,
    ) {
        if !self.flush_requested.swap(false, Ordering::AcqRel) {
            return;
        }

        let (route, origin) = match self.side {
            Side::Server => (Route::ServerBroadcast, SERVER_ID),
            Side::Client => (Route::RelayOnce, self.identity.get()),
        };
        let mut template = Snapshot::new(route, origin);

        let mut state = self.dirty.lock().unwrap();
        let destroyed = std::mem::take(&mut state.destroyed);
        let objects = std::mem::take(&mut state.objects);
        let components = std::mem::take(&mut state.components);

        for path in &destroyed {
            state.owner_cache.remove(path);
            state.last_hash.retain(|(hashed_path, _), _| hashed_path != path);
            template.push_op(&Operation::Destroy { path: path.clone() });
        }

        for path in &objects {
            let Some(object) = scene.get_mut(path) else {
                continue;
            };
            if object.destroyed() || !object.just_created() {
                continue;
            }

            state
                .owner_cache
                .insert(path.clone(), object.owning_client().unwrap_or(SERVER_ID));
            template.push_op(&Operation::Create {
                path: path.clone(),
                type_name: object.type_name().to_string(),
                owner: object.owning_client(),
            });

            for (component_type, slot) in object.component_slots_mut() {
                if !slot.component.should_synchronize() {
                    continue;
                }
                let blob = serialize_to_blob(&*slot.component);
                let hash = fnv1a_64(&blob);
                template.push_op(&Operation::AddComponent {
                    path: path.clone(),
                    component_type,
                    blob,
                });
                slot.flags.remove(ComponentFlags::WAS_ADDED);
                state.last_hash.insert((path.clone(), component_type), hash);
            }
            object.clear_just_created();
        }

        for (path, component_type) in &components {
            let Some(object) = scene.get_mut(path) else {
                continue;
            };
            let key = (path.clone(), *component_type);

            let Some(slot) = object.slot_mut(*component_type) else {
                template.push_op(&Operation::RemoveComponent {
                    path: path.clone(),
                    component_type: *component_type,
                });
                state.last_hash.remove(&key);
                continue;
            };
            if !slot.component.should_synchronize() {
                continue;
            }

            let blob = serialize_to_blob(&*slot.component);
            let hash = fnv1a_64(&blob);
            if state.last_hash.get(&key) == Some(&hash) {
                continue;
            }

            if slot.flags.contains(ComponentFlags::WAS_ADDED) {
                template.push_op(&Operation::AddComponent {
                    path: path.clone(),
                    component_type: *component_type,
                    blob,
                });
                slot.flags.remove(ComponentFlags::WAS_ADDED);
            } else {
                template.push_op(&Operation::SetField {
                    path: path.clone(),
                    component_type: *component_type,
                    field: FIELD_ALL.to_string(),
                    blob,
                });
            }
            state.last_hash.insert(key, hash);
        }

        if template.is_empty() {
            return;
        }

        match self.side {
            Side::Server => {
                for peer in link.peers() {
                    let (blob, kept) = filter_ops_for_client(
                        &template.op_blob,
                        template.header.operation_count,
                        peer,
                        &state.owner_cache,
                    );
                    if kept == 0 {
                        continue;
                    }
                    let mut snapshot = Snapshot {
                        header: template.header,
                        op_blob: blob,
                    };
                    snapshot.header.operation_count = kept;
                    snapshot.header.sequence = tracker.allocate_sequence(peer);
                    snapshot.header.ack = tracker.last_incoming(peer);
                    debug!(
                        "sent snapshot to client {} (seq {}, ack {}, {} ops)",
                        peer, snapshot.header.sequence, snapshot.header.ack, kept
                    );
                    link.send_snapshot(peer, &snapshot);
                }
            }
            Side::Client => {
                let mut snapshot = template;
                snapshot.header.sequence = tracker.allocate_sequence(SERVER_ID);
                snapshot.header.ack = tracker.last_incoming(SERVER_ID);
                debug!(
                    "sent snapshot to server (seq {}, ack {}, {} ops)",
                    snapshot.header.sequence,
                    snapshot.header.ack,
                    snapshot.header.operation_count
                );
                link.send_snapshot(SERVER_ID, &snapshot);
            }
        }
    }

    /// Deterministic depth-first serialization of every non-local root:
    /// `Create`, then components in insertion order, then children. Used for
    /// join-time sync and replay-style resyncs.
    pub fn synchronize_full_tree(
        &self,
        scene: &Scene,
        tracker: &SyncTracker,
        link: &dyn PeerLink,
        target: NetworkId,
    ) {
        let (route, origin) = match self.side {
            Side::Server => (Route::ServerBroadcast, SERVER_ID),
            Side::Client => (Route::RelayOnce, self.identity.get()),
        };
        let mut snapshot = Snapshot::new(route, origin);

        for root in scene.roots() {
            if root.is_local() {
                continue;
            }
            serialize_subtree(root, &mut snapshot);
        }
        if snapshot.is_empty() {
            return;
        }

        snapshot.header.sequence = tracker.allocate_sequence(target);
        snapshot.header.ack = tracker.last_incoming(target);
        debug!(
            "full-tree sync to peer {} ({} ops)",
            target, snapshot.header.operation_count
        );
        link.send_snapshot(target, &snapshot);
    }

    /// Drops every piece of per-peer knowledge tied to a departed client's
    /// roots, so a reconnect starts clean.
    pub fn forget_peer(&self, peer: NetworkId) {
        let mut state = self.dirty.lock().unwrap();
        let owned: Vec<String> = state
            .owner_cache
            .iter()
            .filter(|(_, owner)| **owner == peer)
            .map(|(path, _)| path.clone())
            .collect();
        for path in owned {
            state.owner_cache.remove(&path);
        }
    }
}

fn serialize_subtree(node: &GameObject, snapshot: &mut Snapshot) {
    snapshot.push_op(&Operation::Create {
        path: node.absolute_path().to_string(),
        type_name: node.type_name().to_string(),
        owner: node.owning_client(),
    });
    for (component_type, slot) in node.component_slots() {
        if !slot.component.should_synchronize() {
            continue;
        }
        snapshot.push_op(&Operation::AddComponent {
            path: node.absolute_path().to_string(),
            component_type,
            blob: serialize_to_blob(&*slot.component),
        });
    }
    for child in node.children() {
        serialize_subtree(child, snapshot);
    }
}

/// Keeps an op iff the op's root is not owned by `target`: a peer never
/// receives back mutations on a root it owns.
fn filter_ops_for_client(
    blob: &[u8],
    operation_count: u32,
    target: NetworkId,
    owner_cache: &HashMap<String, NetworkId>,
) -> (Vec<u8>, u32) {
    let mut reader = Reader::new(blob);
    let mut out = Vec::with_capacity(blob.len());
    let mut kept = 0u32;

    for _ in 0..operation_count {
        let record = (|| {
            let code = reader.read_u8()?;
            let length = reader.read_u32()?;
            let payload = reader.take(length as usize)?;
            Ok::<_, crate::net::wire::WireError>((code, payload))
        })();
        let Ok((code, payload)) = record else {
            warn!("template snapshot blob was malformed while filtering");
            break;
        };

        let owner = match peek_path(payload) {
            Ok(path) => owner_cache
                .get(root_of(&path))
                .copied()
                .unwrap_or(SERVER_ID),
            Err(_) => SERVER_ID,
        };
        if owner != target {
            write_u8(&mut out, code);
            write_u32(&mut out, payload.len() as u32);
            out.extend_from_slice(payload);
            kept += 1;
        }
    }
    (out, kept)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_drops_owned_roots() {
        let mut template = Snapshot::new(Route::ServerBroadcast, SERVER_ID);
        template.push_op(&Operation::SetField {
            path: "player-1.gun".to_string(),
            component_type: 1,
            field: FIELD_ALL.to_string(),
            blob: vec![0],
        });
        template.push_op(&Operation::SetField {
            path: "player-2".to_string(),
            component_type: 1,
            field: FIELD_ALL.to_string(),
            blob: vec![0],
        });

        let mut owner_cache = HashMap::new();
        owner_cache.insert("player-1".to_string(), 1);
        owner_cache.insert("player-2".to_string(), 2);

        let (blob, kept) = filter_ops_for_client(
            &template.op_blob,
            template.header.operation_count,
            1,
            &owner_cache,
        );
        assert_eq!(kept, 1);

        let mut filtered = Snapshot::new(Route::ServerBroadcast, SERVER_ID);
        filtered.header.operation_count = kept;
        filtered.op_blob = blob;

        let record = filtered.records().next().unwrap().unwrap();
        let op = Operation::decode(record.code, record.payload).unwrap();
        assert_eq!(op.path(), "player-2");
    }

    #[test]
    fn test_unowned_roots_reach_everyone() {
        let mut template = Snapshot::new(Route::ServerBroadcast, SERVER_ID);
        template.push_op(&Operation::Destroy {
            path: "world.cube".to_string(),
        });

        let owner_cache = HashMap::new();
        let (_, kept) = filter_ops_for_client(&template.op_blob, 1, 3, &owner_cache);
        assert_eq!(kept, 1);
    }
}
