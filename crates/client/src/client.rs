use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use glam::Vec3;

use trellis::net::wire::write_str;
use trellis::{
    ClientTransport, DEFAULT_MAX_PAYLOAD, FixedTimestep, GameObject, NetworkId, PacketType,
    PeerIdentity, Reader, RegisteredComponent, Runtime, Side, Transform3d, TransportConfig,
};

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub tick_rate: u32,
    pub name: String,
    pub max_payload: u32,
    /// Drive an owned object in a circle so the sender path has something
    /// to replicate.
    pub drive_demo: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            tick_rate: 60,
            name: "player".to_string(),
            max_payload: DEFAULT_MAX_PAYLOAD,
            drive_demo: true,
        }
    }
}

enum NetEvent {
    StringIdRequested,
    Assigned(NetworkId),
    Chat(NetworkId, String),
    Disconnected,
}

pub struct GameClient {
    transport: ClientTransport,
    runtime: Runtime,
    config: ClientConfig,
    timestep: FixedTimestep,
    last_tick: Instant,
    running: Arc<AtomicBool>,
    net_events: Arc<Mutex<VecDeque<NetEvent>>>,
    player_path: Option<String>,
    demo_angle: f32,
}

impl GameClient {
    pub fn new(config: ClientConfig) -> Self {
        let identity = PeerIdentity::new(0);
        let transport = ClientTransport::new(
            identity.clone(),
            TransportConfig {
                max_payload: config.max_payload,
            },
        );
        let runtime = Runtime::with_identity(Side::Client, transport.link(), identity);
        let net_events: Arc<Mutex<VecDeque<NetEvent>>> = Arc::new(Mutex::new(VecDeque::new()));

        {
            let events = net_events.clone();
            transport.register_handler(PacketType::RequestStringId, move |_, _| {
                events
                    .lock()
                    .unwrap()
                    .push_back(NetEvent::StringIdRequested);
            });
        }
        {
            let events = net_events.clone();
            transport.register_handler(PacketType::AssignNetworkId, move |_, payload| {
                if payload.len() >= 4 {
                    let id = u32::from_le_bytes(payload[0..4].try_into().unwrap());
                    events.lock().unwrap().push_back(NetEvent::Assigned(id));
                }
            });
        }
        {
            let events = net_events.clone();
            transport.register_handler(PacketType::ServerChat, move |_, payload| {
                let mut reader = Reader::new(&payload);
                if let (Ok(from), Ok(text)) = (reader.read_u32(), reader.read_str()) {
                    events.lock().unwrap().push_back(NetEvent::Chat(from, text));
                }
            });
        }
        {
            let executor = runtime.executor.clone();
            transport.register_handler(PacketType::ServerSnapshot, move |_, payload| {
                executor.enqueue(None, move |runtime: &mut Runtime| {
                    runtime.handle_snapshot(&payload);
                });
            });
        }
        {
            let events = net_events.clone();
            transport.on_disconnect(move |_| {
                events.lock().unwrap().push_back(NetEvent::Disconnected);
            });
        }

        Self {
            transport,
            runtime,
            timestep: FixedTimestep::new(config.tick_rate),
            last_tick: Instant::now(),
            running: Arc::new(AtomicBool::new(true)),
            net_events,
            player_path: None,
            demo_angle: 0.0,
            config,
        }
    }

    pub fn connect(&mut self, addr: &str) -> io::Result<()> {
        self.transport.connect(addr)
    }

    pub fn running(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }

    pub fn network_id(&self) -> NetworkId {
        self.transport.network_id()
    }

    pub fn send_chat(&self, text: &str) {
        let mut payload = Vec::new();
        write_str(&mut payload, text);
        self.transport.send(PacketType::ClientChat, &payload);
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
            if self.config.drive_demo {
                self.drive_player(dt);
            }
            self.runtime.tick(dt);
        }

        self.process_net_events();
    }

    /// Moves the owned player root in a circle and flags the transform for
    /// the next flush.
    fn drive_player(&mut self, dt: f32) {
        let Some(path) = self.player_path.clone() else {
            return;
        };
        self.demo_angle += dt;
        let position = Vec3::new(self.demo_angle.cos() * 2.0, 0.0, self.demo_angle.sin() * 2.0);

        if let Some(player) = self.runtime.scene.get_mut(&path) {
            if let Some(transform) = player.transform3d_mut() {
                transform.local_position = position;
            }
        }
        self.runtime
            .mark_component_dirty(&path, Transform3d::TYPE_ID);
    }

    fn process_net_events(&mut self) {
        let drained: Vec<NetEvent> = {
            let mut queue = self.net_events.lock().unwrap();
            queue.drain(..).collect()
        };

        for event in drained {
            match event {
                NetEvent::StringIdRequested => {
                    let mut payload = Vec::new();
                    write_str(&mut payload, &self.config.name);
                    self.transport.send(PacketType::StringId, &payload);
                }
                NetEvent::Assigned(id) => {
                    log::info!("joined as network id {id}");
                    if self.config.drive_demo && self.player_path.is_none() {
                        self.spawn_player(id);
                    }
                }
                NetEvent::Chat(from, text) => {
                    log::info!("<{from}> {text}");
                }
                NetEvent::Disconnected => {
                    log::error!("lost connection to server");
                    self.running.store(false, Ordering::SeqCst);
                }
            }
        }
    }

    fn spawn_player(&mut self, id: NetworkId) {
        let path = format!("player-{id}");
        let player = GameObject::with_owner(path.clone(), id);
        match self.runtime.register_object(player, ".") {
            Ok(()) => {
                log::info!("spawned owned root '{path}'");
                self.player_path = Some(path);
            }
            Err(error) => log::warn!("cannot spawn player root: {error}"),
        }
    }
}
