use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::JoinHandle;

use log::{debug, info, trace, warn};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};

use super::protocol::{
    DEFAULT_MAX_PAYLOAD, HEADER_SIZE, NetworkId, PacketHeader, PacketType, SERVER_ID, build_frame,
};
use crate::runtime::{PeerIdentity, PeerLink};
use crate::sync::Snapshot;

pub type PacketCallback = Arc<dyn Fn(NetworkId, Vec<u8>) + Send + Sync>;
pub type DisconnectCallback = Arc<dyn Fn(NetworkId) + Send + Sync>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    pub max_payload: u32,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_payload: DEFAULT_MAX_PAYLOAD,
        }
    }
}

/// Callbacks keyed by raw packet type. Invoked on the I/O thread; they must
/// not block, long work goes through the main-thread executor.
struct HandlerRegistry {
    packet: RwLock<HashMap<u16, Vec<PacketCallback>>>,
    connect: RwLock<Vec<DisconnectCallback>>,
    disconnect: RwLock<Vec<DisconnectCallback>>,
}

impl HandlerRegistry {
    fn new() -> Self {
        Self {
            packet: RwLock::new(HashMap::new()),
            connect: RwLock::new(Vec::new()),
            disconnect: RwLock::new(Vec::new()),
        }
    }

    fn register(&self, packet_type: PacketType, callback: PacketCallback) {
        self.packet
            .write()
            .unwrap()
            .entry(packet_type as u16)
            .or_default()
            .push(callback);
    }

    fn dispatch(&self, from: NetworkId, header: PacketHeader, payload: Vec<u8>) {
        let callbacks: Vec<PacketCallback> = self
            .packet
            .read()
            .unwrap()
            .get(&header.packet_type)
            .cloned()
            .unwrap_or_default();

        if callbacks.is_empty() {
            if PacketType::from_u16(header.packet_type).is_none() {
                // Forward compatibility: log and keep the connection.
                warn!(
                    "unrecognized packet type {} from peer {} ({} bytes)",
                    header.packet_type, from, header.payload_size
                );
            } else {
                trace!(
                    "no handler for packet type {} from peer {}",
                    header.packet_type, from
                );
            }
            return;
        }

        for callback in &callbacks {
            callback(from, payload.clone());
        }
    }

    fn fire_connect(&self, peer: NetworkId) {
        let callbacks: Vec<DisconnectCallback> = self.connect.read().unwrap().clone();
        for callback in callbacks {
            callback(peer);
        }
    }

    fn fire_disconnect(&self, peer: NetworkId) {
        let callbacks: Vec<DisconnectCallback> = self.disconnect.read().unwrap().clone();
        for callback in callbacks {
            callback(peer);
        }
    }
}

async fn write_loop(mut write_half: OwnedWriteHalf, mut outbox: UnboundedReceiver<Vec<u8>>) {
    // One writer task per connection serializes all writes to the socket.
    while let Some(frame) = outbox.recv().await {
        if let Err(error) = write_half.write_all(&frame).await {
            debug!("write failed: {error}");
            break;
        }
    }
}

/// Reads whole frames until the peer goes away or breaks the framing rules.
/// Returns normally on EOF/error; the caller handles cleanup.
async fn read_frames(
    read_half: &mut OwnedReadHalf,
    from: NetworkId,
    max_payload: u32,
    handlers: &HandlerRegistry,
    mut on_frame: impl FnMut(&PacketHeader, &[u8]),
) {
    let mut header_buf = [0u8; HEADER_SIZE];
    loop {
        if read_half.read_exact(&mut header_buf).await.is_err() {
            return;
        }
        let header = match PacketHeader::decode(&header_buf) {
            Ok(header) => header,
            Err(_) => return,
        };
        if header.payload_size > max_payload {
            warn!(
                "peer {} declared a {} byte payload (cap {}); disconnecting",
                from, header.payload_size, max_payload
            );
            return;
        }

        let mut payload = vec![0u8; header.payload_size as usize];
        if read_half.read_exact(&mut payload).await.is_err() {
            return;
        }

        on_frame(&header, &payload);
        handlers.dispatch(from, header, payload);
    }
}

struct ClientHandle {
    addr: SocketAddr,
    outbox: UnboundedSender<Vec<u8>>,
}

struct ServerShared {
    config: TransportConfig,
    handlers: HandlerRegistry,
    clients: Mutex<HashMap<NetworkId, ClientHandle>>,
    next_id: AtomicU32,
}

impl ServerShared {
    fn send_frame(&self, peer: NetworkId, frame: Vec<u8>) {
        if let Some(client) = self.clients.lock().unwrap().get(&peer) {
            // A closed outbox means the writer already died; the reader will
            // clean the entry up.
            let _ = client.outbox.send(frame);
        }
    }

    fn connected(&self) -> Vec<NetworkId> {
        let mut ids: Vec<NetworkId> = self.clients.lock().unwrap().keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

/// TCP listener side. Owns one dedicated I/O thread running a
/// current-thread tokio runtime; every socket task lives there.
pub struct ServerTransport {
    shared: Arc<ServerShared>,
    local_addr: Option<SocketAddr>,
    io_thread: Option<JoinHandle<()>>,
    stop: Option<UnboundedSender<()>>,
}

impl ServerTransport {
    pub fn new(config: TransportConfig) -> Self {
        Self {
            shared: Arc::new(ServerShared {
                config,
                handlers: HandlerRegistry::new(),
                clients: Mutex::new(HashMap::new()),
                next_id: AtomicU32::new(1),
            }),
            local_addr: None,
            io_thread: None,
            stop: None,
        }
    }

    /// Register before `bind`: the accept loop starts talking to clients
    /// immediately.
    pub fn register_handler(
        &self,
        packet_type: PacketType,
        callback: impl Fn(NetworkId, Vec<u8>) + Send + Sync + 'static,
    ) {
        self.shared.handlers.register(packet_type, Arc::new(callback));
    }

    /// Fires on the I/O thread right after a client is accepted and its
    /// handshake frames are queued.
    pub fn on_connect(&self, callback: impl Fn(NetworkId) + Send + Sync + 'static) {
        self.shared
            .handlers
            .connect
            .write()
            .unwrap()
            .push(Arc::new(callback));
    }

    pub fn on_disconnect(&self, callback: impl Fn(NetworkId) + Send + Sync + 'static) {
        self.shared
            .handlers
            .disconnect
            .write()
            .unwrap()
            .push(Arc::new(callback));
    }

    /// Starts listening and spawns the I/O thread.
    pub fn bind(&mut self, addr: &str) -> io::Result<SocketAddr> {
        let listener = std::net::TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;
        self.local_addr = Some(local_addr);

        let (stop_tx, stop_rx) = unbounded_channel();
        self.stop = Some(stop_tx);

        let shared = self.shared.clone();
        self.io_thread = Some(
            std::thread::Builder::new()
                .name("trellis-io".to_string())
                .spawn(move || {
                    let runtime = tokio::runtime::Builder::new_current_thread()
                        .enable_io()
                        .build()
                        .expect("failed to build I/O runtime");
                    runtime.block_on(accept_loop(shared, listener, stop_rx));
                })?,
        );

        info!("server listening on {local_addr}");
        Ok(local_addr)
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn send_to(&self, peer: NetworkId, packet_type: PacketType, payload: &[u8]) {
        self.shared
            .send_frame(peer, build_frame(packet_type, SERVER_ID, payload));
    }

    pub fn broadcast(&self, packet_type: PacketType, payload: &[u8]) {
        for peer in self.shared.connected() {
            self.send_to(peer, packet_type, payload);
        }
    }

    pub fn connected_clients(&self) -> Vec<NetworkId> {
        self.shared.connected()
    }

    pub fn client_addr(&self, peer: NetworkId) -> Option<SocketAddr> {
        self.shared
            .clients
            .lock()
            .unwrap()
            .get(&peer)
            .map(|client| client.addr)
    }

    /// Drops the peer's write queue; the connection unwinds from there.
    pub fn disconnect(&self, peer: NetworkId) {
        self.shared.clients.lock().unwrap().remove(&peer);
    }

    /// Snapshot-sending seam handed to the sync engine.
    pub fn link(&self) -> Arc<dyn PeerLink> {
        Arc::new(ServerLink(self.shared.clone()))
    }

    pub fn shutdown(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(io_thread) = self.io_thread.take() {
            let _ = io_thread.join();
        }
        self.shared.clients.lock().unwrap().clear();
    }
}

impl Drop for ServerTransport {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn accept_loop(
    shared: Arc<ServerShared>,
    listener: std::net::TcpListener,
    mut stop_rx: UnboundedReceiver<()>,
) {
    let listener = match TcpListener::from_std(listener) {
        Ok(listener) => listener,
        Err(error) => {
            warn!("cannot enter accept loop: {error}");
            return;
        }
    };

    loop {
        tokio::select! {
            _ = stop_rx.recv() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => accept_client(&shared, stream, addr),
                Err(error) => warn!("accept failed: {error}"),
            }
        }
    }
}

fn accept_client(shared: &Arc<ServerShared>, stream: TcpStream, addr: SocketAddr) {
    let peer = shared.next_id.fetch_add(1, Ordering::SeqCst);
    let _ = stream.set_nodelay(true);
    let (mut read_half, write_half) = stream.into_split();
    let (outbox, outbox_rx) = unbounded_channel();

    shared.clients.lock().unwrap().insert(
        peer,
        ClientHandle {
            addr,
            outbox: outbox.clone(),
        },
    );
    info!("client {peer} connected from {addr}");

    // Identity first, then ask who they are.
    let _ = outbox.send(build_frame(
        PacketType::AssignNetworkId,
        SERVER_ID,
        &peer.to_le_bytes(),
    ));
    let _ = outbox.send(build_frame(PacketType::RequestStringId, SERVER_ID, &[]));
    shared.handlers.fire_connect(peer);

    tokio::spawn(write_loop(write_half, outbox_rx));

    let shared = shared.clone();
    tokio::spawn(async move {
        read_frames(
            &mut read_half,
            peer,
            shared.config.max_payload,
            &shared.handlers,
            |_, _| {},
        )
        .await;

        shared.clients.lock().unwrap().remove(&peer);
        info!("client {peer} disconnected");
        shared.handlers.fire_disconnect(peer);
    });
}

struct ServerLink(Arc<ServerShared>);

impl PeerLink for ServerLink {
    fn peers(&self) -> Vec<NetworkId> {
        self.0.connected()
    }

    fn send_snapshot(&self, peer: NetworkId, snapshot: &Snapshot) {
        self.0.send_frame(
            peer,
            build_frame(PacketType::ServerSnapshot, SERVER_ID, &snapshot.encode()),
        );
    }
}

struct ClientSharedState {
    config: TransportConfig,
    handlers: HandlerRegistry,
    identity: PeerIdentity,
    outbox: Mutex<Option<UnboundedSender<Vec<u8>>>>,
    connected: AtomicBool,
}

/// TCP connector side. Connects once; a lost connection is reported through
/// the disconnect callbacks, reconnection policy is the host's business.
pub struct ClientTransport {
    shared: Arc<ClientSharedState>,
    io_thread: Option<JoinHandle<()>>,
    stop: Option<UnboundedSender<()>>,
}

impl ClientTransport {
    pub fn new(identity: PeerIdentity, config: TransportConfig) -> Self {
        Self {
            shared: Arc::new(ClientSharedState {
                config,
                handlers: HandlerRegistry::new(),
                identity,
                outbox: Mutex::new(None),
                connected: AtomicBool::new(false),
            }),
            io_thread: None,
            stop: None,
        }
    }

    /// Register before `connect`: the server starts the string-id handshake
    /// as soon as the socket opens.
    pub fn register_handler(
        &self,
        packet_type: PacketType,
        callback: impl Fn(NetworkId, Vec<u8>) + Send + Sync + 'static,
    ) {
        self.shared.handlers.register(packet_type, Arc::new(callback));
    }

    pub fn on_disconnect(&self, callback: impl Fn(NetworkId) + Send + Sync + 'static) {
        self.shared
            .handlers
            .disconnect
            .write()
            .unwrap()
            .push(Arc::new(callback));
    }

    pub fn connect(&mut self, addr: &str) -> io::Result<()> {
        let stream = std::net::TcpStream::connect(addr)?;
        stream.set_nonblocking(true)?;
        let _ = stream.set_nodelay(true);

        let (outbox, outbox_rx) = unbounded_channel();
        *self.shared.outbox.lock().unwrap() = Some(outbox);
        self.shared.connected.store(true, Ordering::SeqCst);

        let (stop_tx, mut stop_rx) = unbounded_channel::<()>();
        self.stop = Some(stop_tx);

        let shared = self.shared.clone();
        self.io_thread = Some(
            std::thread::Builder::new()
                .name("trellis-io".to_string())
                .spawn(move || {
                    let runtime = tokio::runtime::Builder::new_current_thread()
                        .enable_io()
                        .build()
                        .expect("failed to build I/O runtime");
                    runtime.block_on(async move {
                        let stream = match TcpStream::from_std(stream) {
                            Ok(stream) => stream,
                            Err(error) => {
                                warn!("cannot adopt connection: {error}");
                                return;
                            }
                        };
                        let (mut read_half, write_half) = stream.into_split();
                        tokio::spawn(write_loop(write_half, outbox_rx));

                        tokio::select! {
                            _ = stop_rx.recv() => {}
                            _ = client_read_loop(&shared, &mut read_half) => {
                                shared.connected.store(false, Ordering::SeqCst);
                                warn!("connection to server lost");
                                shared.handlers.fire_disconnect(shared.identity.get());
                            }
                        }
                    });
                })?,
        );

        info!("connected to {addr}");
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    pub fn network_id(&self) -> NetworkId {
        self.shared.identity.get()
    }

    /// Frames and queues a packet; returns false if the connection is gone.
    pub fn send(&self, packet_type: PacketType, payload: &[u8]) -> bool {
        let frame = build_frame(packet_type, self.shared.identity.get(), payload);
        match &*self.shared.outbox.lock().unwrap() {
            Some(outbox) => outbox.send(frame).is_ok(),
            None => false,
        }
    }

    pub fn link(&self) -> Arc<dyn PeerLink> {
        Arc::new(ClientLink(self.shared.clone()))
    }

    pub fn shutdown(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        *self.shared.outbox.lock().unwrap() = None;
        if let Some(io_thread) = self.io_thread.take() {
            let _ = io_thread.join();
        }
        self.shared.connected.store(false, Ordering::SeqCst);
    }
}

impl Drop for ClientTransport {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn client_read_loop(shared: &ClientSharedState, read_half: &mut OwnedReadHalf) {
    let assign_type = PacketType::AssignNetworkId as u16;
    let identity = shared.identity.clone();

    read_frames(
        read_half,
        SERVER_ID,
        shared.config.max_payload,
        &shared.handlers,
        move |header, payload| {
            // The transport learns its own id before anyone else; the packet
            // still reaches registered handlers afterwards.
            if header.packet_type == assign_type && payload.len() >= 4 {
                let id = u32::from_le_bytes(payload[0..4].try_into().unwrap());
                identity.set(id);
                info!("assigned network id {id}");
            }
        },
    )
    .await;
}

struct ClientLink(Arc<ClientSharedState>);

impl PeerLink for ClientLink {
    fn peers(&self) -> Vec<NetworkId> {
        vec![SERVER_ID]
    }

    fn send_snapshot(&self, _peer: NetworkId, snapshot: &Snapshot) {
        let frame = build_frame(
            PacketType::ClientSnapshot,
            self.0.identity.get(),
            &snapshot.encode(),
        );
        if let Some(outbox) = &*self.0.outbox.lock().unwrap() {
            let _ = outbox.send(frame);
        }
    }
}
