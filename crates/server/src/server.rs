use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::Result;
use glam::Vec3;

use trellis::net::wire::{write_str, write_u32};
use trellis::{
    FixedTimestep, GameObject, NetworkId, PacketType, Reader, RegisteredComponent, Runtime,
    ServerTransport, Side, Transform3d, TransportConfig,
};

use crate::config::ServerConfig;
use crate::events::ServerEvent;

/// Raw happenings captured on the I/O thread, drained on the simulation
/// thread once per tick.
enum NetEvent {
    Connected(NetworkId),
    Disconnected(NetworkId),
    StringId(NetworkId, String),
    Chat(NetworkId, String),
}

#[derive(Debug, Clone)]
pub struct ClientInfo {
    pub client_id: NetworkId,
    pub addr: Option<SocketAddr>,
    pub name: String,
}

pub struct GameServer {
    transport: ServerTransport,
    runtime: Runtime,
    config: ServerConfig,
    timestep: FixedTimestep,
    last_tick: Instant,
    running: Arc<AtomicBool>,
    net_events: Arc<Mutex<VecDeque<NetEvent>>>,
    names: HashMap<NetworkId, String>,
    pending_cleanup: VecDeque<(NetworkId, Instant)>,
    host_events: VecDeque<ServerEvent>,
    demo_angle: f32,
}

impl GameServer {
    pub fn new(bind_addr: &str, config: ServerConfig) -> Result<Self> {
        let mut transport = ServerTransport::new(TransportConfig {
            max_payload: config.max_payload,
        });
        let runtime = Runtime::new(Side::Server, transport.link());
        let net_events: Arc<Mutex<VecDeque<NetEvent>>> = Arc::new(Mutex::new(VecDeque::new()));

        {
            let events = net_events.clone();
            transport.on_connect(move |peer| {
                events.lock().unwrap().push_back(NetEvent::Connected(peer));
            });
        }
        {
            let events = net_events.clone();
            transport.on_disconnect(move |peer| {
                events.lock().unwrap().push_back(NetEvent::Disconnected(peer));
            });
        }
        {
            let events = net_events.clone();
            transport.register_handler(PacketType::StringId, move |peer, payload| {
                let name = Reader::new(&payload)
                    .read_str()
                    .unwrap_or_else(|_| format!("client-{peer}"));
                events
                    .lock()
                    .unwrap()
                    .push_back(NetEvent::StringId(peer, name));
            });
        }
        {
            let events = net_events.clone();
            transport.register_handler(PacketType::ClientChat, move |peer, payload| {
                if let Ok(text) = Reader::new(&payload).read_str() {
                    events.lock().unwrap().push_back(NetEvent::Chat(peer, text));
                }
            });
        }
        {
            let executor = runtime.executor.clone();
            transport.register_handler(PacketType::ClientSnapshot, move |_peer, payload| {
                executor.enqueue(None, move |runtime: &mut Runtime| {
                    runtime.handle_snapshot(&payload);
                });
            });
        }

        transport.bind(bind_addr)?;

        let mut server = Self {
            transport,
            runtime,
            timestep: FixedTimestep::new(config.tick_rate),
            last_tick: Instant::now(),
            running: Arc::new(AtomicBool::new(true)),
            net_events,
            names: HashMap::new(),
            pending_cleanup: VecDeque::new(),
            host_events: VecDeque::new(),
            demo_angle: 0.0,
            config,
        };

        if server.config.spawn_demo_scene {
            server.spawn_demo_scene()?;
        }
        Ok(server)
    }

    fn spawn_demo_scene(&mut self) -> Result<()> {
        let world = GameObject::new("world");
        self.runtime.register_object(world, ".")?;

        let mut cube = GameObject::new("cube");
        if let Some(transform) = cube.transform3d_mut() {
            transform.local_position = Vec3::new(1.0, 2.0, 3.0);
        }
        self.runtime.register_object(cube, "world")?;
        Ok(())
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.transport.local_addr()
    }

    pub fn running(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }

    pub fn drain_events(&mut self) -> impl Iterator<Item = ServerEvent> + '_ {
        self.host_events.drain(..)
    }

    pub fn client_infos(&self) -> Vec<ClientInfo> {
        self.transport
            .connected_clients()
            .into_iter()
            .map(|client_id| ClientInfo {
                client_id,
                addr: self.transport.client_addr(client_id),
                name: self
                    .names
                    .get(&client_id)
                    .cloned()
                    .unwrap_or_else(|| format!("client-{client_id}")),
            })
            .collect()
    }

    pub fn connected_count(&self) -> usize {
        self.transport.connected_clients().len()
    }

    pub fn root_count(&self) -> usize {
        self.runtime.scene.root_count()
    }

    pub fn tick_rate(&self) -> u32 {
        self.config.tick_rate
    }

    pub fn run(&mut self) {
        while self.running.load(Ordering::SeqCst) {
            self.tick_once();
            std::thread::sleep(Duration::from_millis(1));
        }
        self.transport.shutdown();
    }

    pub fn tick_once(&mut self) {
        let now = Instant::now();
        let delta = now.duration_since(self.last_tick).as_secs_f32();
        self.last_tick = now;

        self.timestep.accumulate(delta);
        while self.timestep.consume_tick() {
            let dt = self.timestep.dt();
            if self.config.spawn_demo_scene {
                self.advance_demo(dt);
            }
            self.runtime.tick(dt);
        }

        self.process_net_events();
        self.process_peer_cleanup();
    }

    /// Keeps the demo cube orbiting so clients always have changing state to
    /// observe.
    fn advance_demo(&mut self, dt: f32) {
        self.demo_angle += dt * 0.5;
        let position = Vec3::new(
            self.demo_angle.cos() * 3.0,
            2.0,
            self.demo_angle.sin() * 3.0,
        );
        if let Some(cube) = self.runtime.scene.get_mut("world.cube") {
            if let Some(transform) = cube.transform3d_mut() {
                transform.local_position = position;
            }
        }
        self.runtime
            .mark_component_dirty("world.cube", Transform3d::TYPE_ID);
    }

    fn process_net_events(&mut self) {
        let drained: Vec<NetEvent> = {
            let mut queue = self.net_events.lock().unwrap();
            queue.drain(..).collect()
        };

        for event in drained {
            match event {
                NetEvent::Connected(client_id) => {
                    // A joiner gets the whole scene before any deltas.
                    self.runtime.flush_now();
                    self.runtime.synchronize_full_tree(client_id);
                    self.host_events
                        .push_back(ServerEvent::ClientConnected { client_id });
                }
                NetEvent::Disconnected(client_id) => {
                    self.pending_cleanup
                        .push_back((client_id, Instant::now() + self.config.disconnect_grace));
                    self.host_events
                        .push_back(ServerEvent::ClientDisconnected { client_id });
                }
                NetEvent::StringId(client_id, name) => {
                    log::info!("client {client_id} identifies as '{name}'");
                    self.names.insert(client_id, name.clone());
                    self.host_events
                        .push_back(ServerEvent::ClientIdentified { client_id, name });
                }
                NetEvent::Chat(client_id, text) => {
                    let name = self
                        .names
                        .get(&client_id)
                        .cloned()
                        .unwrap_or_else(|| format!("client-{client_id}"));

                    let mut payload = Vec::new();
                    write_u32(&mut payload, client_id);
                    write_str(&mut payload, &text);
                    self.transport.broadcast(PacketType::ServerChat, &payload);

                    self.host_events.push_back(ServerEvent::Chat {
                        client_id,
                        name,
                        text,
                    });
                }
            }
        }
    }

    fn process_peer_cleanup(&mut self) {
        let now = Instant::now();
        while let Some((client_id, deadline)) = self.pending_cleanup.front().copied() {
            if deadline > now {
                break;
            }
            self.pending_cleanup.pop_front();
            self.names.remove(&client_id);
            self.runtime.remove_peer(client_id);
            log::debug!("dropped sync state for departed client {client_id}");
        }
    }

    pub fn kick_client(&mut self, client_id: NetworkId) {
        self.transport.disconnect(client_id);
    }

    pub fn shutdown_connections(&mut self) {
        for client_id in self.transport.connected_clients() {
            self.transport.disconnect(client_id);
        }
        self.transport.shutdown();
    }
}
