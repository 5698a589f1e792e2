use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::executor::{HolderKey, MainThreadExecutor};
use crate::net::protocol::{NetworkId, SERVER_ID};
use crate::scene::{ComponentRegistry, ComponentTypeId, GameObject, Scene, SceneError};
use crate::sync::receiver;
use crate::sync::sender::SenderSync;
use crate::sync::snapshot::Snapshot;
use crate::sync::tracker::SyncTracker;
use crate::sync::translation::TranslationBuffer;

/// Which half of the protocol this process runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Server,
    Client,
}

/// Shared handle to this process's network id. The server is always 0; a
/// client learns its id from `AssignNetworkId`, possibly after the runtime
/// was built, so the value is late-bound and shared with the transport.
#[derive(Clone, Default)]
pub struct PeerIdentity(Arc<AtomicU32>);

impl PeerIdentity {
    pub fn new(id: NetworkId) -> Self {
        Self(Arc::new(AtomicU32::new(id)))
    }

    pub fn get(&self) -> NetworkId {
        self.0.load(Ordering::Acquire)
    }

    pub fn set(&self, id: NetworkId) {
        self.0.store(id, Ordering::Release);
    }
}

/// Outbound seam of the sync engine. The real transports implement this;
/// tests substitute channel-backed fakes so whole client/server pairs run
/// in one process without sockets.
pub trait PeerLink: Send + Sync {
    /// Connected peer ids, in a stable order.
    fn peers(&self) -> Vec<NetworkId>;
    fn send_snapshot(&self, peer: NetworkId, snapshot: &Snapshot);
}

/// Holder key of the coalesced flush task.
pub const FLUSH_HOLDER: HolderKey = 1;

/// Everything one peer needs to run the replicated scene: the scene itself,
/// the component registry, and the sync machinery. Explicit values, no
/// process-wide singletons, so several runtimes can coexist in one process.
pub struct Runtime {
    pub side: Side,
    pub identity: PeerIdentity,
    pub scene: Scene,
    pub registry: ComponentRegistry,
    pub sender: Arc<SenderSync>,
    pub tracker: Arc<SyncTracker>,
    pub executor: Arc<MainThreadExecutor<Runtime>>,
    pub translation: TranslationBuffer,
    pub link: Arc<dyn PeerLink>,
}

impl Runtime {
    pub fn new(side: Side, link: Arc<dyn PeerLink>) -> Self {
        Self::with_identity(side, link, PeerIdentity::new(SERVER_ID))
    }

    /// Builds a runtime around an externally shared identity handle, so the
    /// transport and the sync engine agree on who "self" is once the server
    /// assigns an id.
    pub fn with_identity(side: Side, link: Arc<dyn PeerLink>, identity: PeerIdentity) -> Self {
        let sender = Arc::new(SenderSync::new(side, identity.clone()));
        let executor: Arc<MainThreadExecutor<Runtime>> = Arc::new(MainThreadExecutor::new());

        {
            let executor = executor.clone();
            sender.set_wake_hook(Box::new(move || {
                executor.enqueue(Some(FLUSH_HOLDER), |runtime: &mut Runtime| {
                    runtime.flush_now();
                });
            }));
        }

        Self {
            side,
            identity,
            scene: Scene::new(),
            registry: ComponentRegistry::with_defaults(),
            sender,
            tracker: Arc::new(SyncTracker::new()),
            executor,
            translation: TranslationBuffer::new(),
            link,
        }
    }

    pub fn is_server(&self) -> bool {
        self.side == Side::Server
    }

    /// One simulation step: update the scene, drain deferred network work,
    /// flush dirty state, and (client) advance transform smoothing.
    pub fn tick(&mut self, dt: f32) {
        self.scene.update(dt);

        let executor = self.executor.clone();
        executor.execute(self);

        self.flush_now();

        if self.side == Side::Client {
            self.translation.update(&mut self.scene, dt);
        }
    }

    /// Runs a flush if one was requested; otherwise a no-op.
    pub fn flush_now(&mut self) {
        let sender = self.sender.clone();
        sender.flush_dirty(&mut self.scene, &self.tracker, self.link.as_ref());
    }

    /// Ingests one received snapshot payload. Must run on the simulation
    /// thread; I/O callbacks post this through the executor.
    pub fn handle_snapshot(&mut self, payload: &[u8]) {
        receiver::handle_snapshot(self, payload);
    }

    pub fn register_object(
        &mut self,
        object: GameObject,
        parent_path: &str,
    ) -> Result<(), SceneError> {
        self.scene.register(object, parent_path, &self.sender)
    }

    pub fn unregister_object(&mut self, path: &str) -> Result<(), SceneError> {
        self.scene.unregister(path, &self.sender)
    }

    /// Default-constructs a registered component by id and attaches it to
    /// the object at `path`.
    pub fn add_component_by_id(
        &mut self,
        path: &str,
        component_type: ComponentTypeId,
    ) -> Result<(), SceneError> {
        let component = self
            .registry
            .instantiate(component_type)
            .ok_or(SceneError::UnknownComponentType(component_type))?;
        let object = self
            .scene
            .get_mut(path)
            .ok_or_else(|| SceneError::MissingObject(path.to_string()))?;
        object.add_component_dynamic(component)
    }

    /// Marks a component changed so the next flush re-examines it.
    pub fn mark_component_dirty(&self, path: &str, component_type: ComponentTypeId) {
        if let Some(object) = self.scene.get(path) {
            self.sender.mark_component_dirty(object, component_type);
        }
    }

    pub fn mark_object_dirty(&self, path: &str) {
        if let Some(object) = self.scene.get(path) {
            self.sender.mark_object_dirty(object);
        }
    }

    /// Sends the entire non-local scene to one peer, depth-first. Used when
    /// a client joins.
    pub fn synchronize_full_tree(&self, target: NetworkId) {
        self.sender
            .synchronize_full_tree(&self.scene, &self.tracker, self.link.as_ref(), target);
    }

    /// Forgets a departed peer's sequencing and ownership state.
    pub fn remove_peer(&self, peer: NetworkId) {
        self.tracker.remove_peer(peer);
        self.sender.forget_peer(peer);
    }
}

/// Fixed-rate accumulator driving `Runtime::tick` from a frame loop.
pub struct FixedTimestep {
    tick_rate: u32,
    dt: f32,
    accumulator: f32,
}

impl FixedTimestep {
    pub fn new(tick_rate: u32) -> Self {
        Self {
            tick_rate,
            dt: 1.0 / tick_rate as f32,
            accumulator: 0.0,
        }
    }

    pub fn tick_rate(&self) -> u32 {
        self.tick_rate
    }

    pub fn dt(&self) -> f32 {
        self.dt
    }

    /// Caps the carried debt so a stall never triggers a tick avalanche.
    pub fn accumulate(&mut self, delta: f32) {
        self.accumulator += delta.min(0.25);
    }

    pub fn consume_tick(&mut self) -> bool {
        if self.accumulator >= self.dt {
            self.accumulator -= self.dt;
            true
        } else {
            false
        }
    }

    pub fn reset(&mut self) {
        self.accumulator = 0.0;
    }
}
