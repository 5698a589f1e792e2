use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use glam::Vec3;

use trellis::{
    GameObject, NetworkId, Operation, PeerLink, RegisteredComponent, Route, Runtime, SERVER_ID,
    Side, Snapshot, Transform2d, Transform3d,
};

/// Channel-backed link: records every outgoing snapshot so tests can pump
/// them into other in-process runtimes.
#[derive(Default)]
struct RecordingLink {
    peers: Mutex<Vec<NetworkId>>,
    sent: Mutex<VecDeque<(NetworkId, Vec<u8>)>>,
}

impl RecordingLink {
    fn new(peers: Vec<NetworkId>) -> Arc<Self> {
        Arc::new(Self {
            peers: Mutex::new(peers),
            sent: Mutex::new(VecDeque::new()),
        })
    }

    fn drain(&self) -> Vec<(NetworkId, Vec<u8>)> {
        self.sent.lock().unwrap().drain(..).collect()
    }
}

impl PeerLink for RecordingLink {
    fn peers(&self) -> Vec<NetworkId> {
        self.peers.lock().unwrap().clone()
    }

    fn send_snapshot(&self, peer: NetworkId, snapshot: &Snapshot) {
        self.sent
            .lock()
            .unwrap()
            .push_back((peer, snapshot.encode()));
    }
}

fn server_with_clients(clients: &[NetworkId]) -> (Runtime, Arc<RecordingLink>) {
    let link = RecordingLink::new(clients.to_vec());
    (Runtime::new(Side::Server, link.clone()), link)
}

fn client_runtime(id: NetworkId) -> (Runtime, Arc<RecordingLink>) {
    let link = RecordingLink::new(vec![SERVER_ID]);
    let runtime = Runtime::new(Side::Client, link.clone());
    runtime.identity.set(id);
    (runtime, link)
}

fn decode_ops(payload: &[u8]) -> (Snapshot, Vec<Operation>) {
    let snapshot = Snapshot::decode(payload).unwrap();
    let ops = snapshot
        .records()
        .map(|record| {
            let record = record.unwrap();
            Operation::decode(record.code, record.payload).unwrap()
        })
        .collect();
    (snapshot, ops)
}

fn position_of(runtime: &Runtime, path: &str) -> Vec3 {
    runtime
        .scene
        .get(path)
        .unwrap()
        .transform3d()
        .unwrap()
        .local_position
}

#[test]
fn test_client_join_full_sync() {
    let (mut server, server_link) = server_with_clients(&[1]);

    server.register_object(GameObject::new("world"), ".").unwrap();
    let mut cube = GameObject::new("cube");
    cube.transform3d_mut().unwrap().local_position = Vec3::new(1.0, 2.0, 3.0);
    server.register_object(cube, "world").unwrap();

    // Joiner gets exactly one full-tree snapshot.
    server.synchronize_full_tree(1);
    let sent = server_link.drain();
    assert_eq!(sent.len(), 1);
    let (peer, payload) = &sent[0];
    assert_eq!(*peer, 1);

    let (snapshot, _) = decode_ops(payload);
    assert_eq!(snapshot.header.sequence, 1);
    assert_eq!(snapshot.header.origin, SERVER_ID);

    let (mut client, _) = client_runtime(1);
    client.handle_snapshot(payload);

    assert_eq!(position_of(&client, "world.cube"), Vec3::new(1.0, 2.0, 3.0));
    assert_eq!(client.tracker.last_incoming(SERVER_ID), 1);
}

#[test]
fn test_full_tree_serialization_is_deterministic() {
    let build = || {
        let (mut server, link) = server_with_clients(&[9]);
        server.register_object(GameObject::new("world"), ".").unwrap();
        server.register_object(GameObject::new("cube"), "world").unwrap();
        server
            .register_object(GameObject::with_owner("player-1", 1), ".")
            .unwrap();
        server.synchronize_full_tree(9);
        link.drain().remove(0).1
    };

    assert_eq!(build(), build());
}

#[test]
fn test_owner_filtering_and_relay() {
    let (mut server, server_link) = server_with_clients(&[1, 2]);
    let (mut client_a, client_a_link) = client_runtime(1);
    let (mut client_b, _client_b_link) = client_runtime(2);

    // The server owns the authoritative copy; the owner also holds its own.
    server
        .register_object(GameObject::with_owner("player-1", 1), ".")
        .unwrap();
    client_a
        .register_object(GameObject::with_owner("player-1", 1), ".")
        .unwrap();

    // Server flush: the creation is filtered away from its owner.
    server.tick(0.016);
    assert_eq!(server.sender.cached_owner("player-1"), Some(1));
    for (peer, payload) in server_link.drain() {
        assert_eq!(peer, 2, "owner must not receive its own root");
        client_b.handle_snapshot(&payload);
    }
    assert!(client_b.scene.has("player-1"));

    // Drain client A's own creation flush before the field update.
    client_a.tick(0.016);
    client_a_link.drain();

    // Client A moves its object and flushes.
    client_a
        .scene
        .get_mut("player-1")
        .unwrap()
        .transform3d_mut()
        .unwrap()
        .local_position = Vec3::new(7.0, 0.0, 0.0);
    client_a.mark_component_dirty("player-1", Transform3d::TYPE_ID);
    client_a.tick(0.016);

    let outgoing = client_a_link.drain();
    assert_eq!(outgoing.len(), 1);
    let (_, update_payload) = &outgoing[0];

    // Server applies and relays.
    server.handle_snapshot(update_payload);
    assert_eq!(position_of(&server, "player-1"), Vec3::new(7.0, 0.0, 0.0));

    let relayed = server_link.drain();
    assert_eq!(relayed.len(), 1, "relay goes to exactly one other client");
    let (peer, relay_payload) = &relayed[0];
    assert_eq!(*peer, 2);

    let (relay_snapshot, _) = decode_ops(relay_payload);
    assert_eq!(relay_snapshot.header.route, Route::ServerBroadcast);
    assert_eq!(relay_snapshot.header.origin, 1);

    // Client B smooths the update through the translation buffer.
    client_b.handle_snapshot(relay_payload);
    assert!(client_b.translation.has("player-1"));
    client_b.tick(0.05);
    client_b.tick(0.05);
    assert_eq!(position_of(&client_b, "player-1"), Vec3::new(7.0, 0.0, 0.0));
}

#[test]
fn test_applying_remote_ops_does_not_redirty() {
    let (mut server, server_link) = server_with_clients(&[1, 2]);
    let (mut client_b, client_b_link) = client_runtime(2);

    server
        .register_object(GameObject::with_owner("player-1", 1), ".")
        .unwrap();
    server.tick(0.016);

    for (peer, payload) in server_link.drain() {
        if peer == 2 {
            client_b.handle_snapshot(&payload);
        }
    }
    assert!(client_b.scene.has("player-1"));

    // Nothing the apply did may reach the wire on B's next flushes.
    client_b.tick(0.016);
    client_b.tick(0.016);
    assert!(client_b_link.drain().is_empty());
}

#[test]
fn test_mark_dirty_coalescing() {
    let (mut server, server_link) = server_with_clients(&[1]);
    server.register_object(GameObject::new("obj"), ".").unwrap();
    server.tick(0.016);
    server_link.drain();

    server
        .scene
        .get_mut("obj")
        .unwrap()
        .transform3d_mut()
        .unwrap()
        .local_position = Vec3::new(9.0, 9.0, 9.0);
    for _ in 0..10 {
        server.mark_component_dirty("obj", Transform3d::TYPE_ID);
    }
    assert!(server.sender.flush_pending());
    server.tick(0.016);
    assert!(!server.sender.flush_pending());

    let sent = server_link.drain();
    assert_eq!(sent.len(), 1);
    let (snapshot, ops) = decode_ops(&sent[0].1);
    assert_eq!(snapshot.header.operation_count, 1);
    assert!(matches!(&ops[0], Operation::SetField { path, .. } if path == "obj"));

    // Hash-equal state flushes nothing.
    server.mark_component_dirty("obj", Transform3d::TYPE_ID);
    server.tick(0.016);
    assert!(server_link.drain().is_empty());
}

#[test]
fn test_out_of_order_snapshots_dropped() {
    let (mut client, _) = client_runtime(1);
    client.tracker.mark_delivered(SERVER_ID, 5);

    let make = |sequence: u64, name: &str| {
        let mut snapshot = Snapshot::new(Route::ServerBroadcast, SERVER_ID);
        snapshot.header.sequence = sequence;
        snapshot.push_op(&Operation::Create {
            path: name.to_string(),
            type_name: "GameObject".to_string(),
            owner: None,
        });
        snapshot.encode()
    };

    client.handle_snapshot(&make(7, "a"));
    client.handle_snapshot(&make(6, "b"));
    client.handle_snapshot(&make(8, "c"));

    assert!(client.scene.has("a"));
    assert!(!client.scene.has("b"));
    assert!(client.scene.has("c"));
    assert_eq!(client.tracker.last_incoming(SERVER_ID), 8);
}

#[test]
fn test_idempotent_create() {
    let (mut client, _) = client_runtime(1);

    let make = |sequence: u64| {
        let mut snapshot = Snapshot::new(Route::ServerBroadcast, SERVER_ID);
        snapshot.header.sequence = sequence;
        snapshot.push_op(&Operation::Create {
            path: "world".to_string(),
            type_name: "GameObject".to_string(),
            owner: Some(3),
        });
        snapshot.encode()
    };

    client.handle_snapshot(&make(1));
    let id_after_first = client.scene.get("world").unwrap().object_id();

    client.handle_snapshot(&make(2));
    assert_eq!(client.scene.root_count(), 1);
    assert_eq!(client.scene.get("world").unwrap().object_id(), id_after_first);
    assert_eq!(client.scene.get("world").unwrap().owning_client(), Some(3));
}

#[test]
fn test_authority_guard_preserves_local_state() {
    let (mut client, _) = client_runtime(4);
    client
        .register_object(GameObject::with_owner("player-4", 4), ".")
        .unwrap();
    client
        .scene
        .get_mut("player-4")
        .unwrap()
        .transform3d_mut()
        .unwrap()
        .local_position = Vec3::new(1.0, 1.0, 1.0);

    let incoming = Transform3d::at(Vec3::new(50.0, 0.0, 0.0));
    let blob = trellis::serialize_to_blob(&incoming);

    let mut snapshot = Snapshot::new(Route::ServerBroadcast, SERVER_ID);
    snapshot.header.sequence = 1;
    snapshot.push_op(&Operation::SetField {
        path: "player-4".to_string(),
        component_type: Transform3d::TYPE_ID,
        field: trellis::FIELD_ALL.to_string(),
        blob,
    });

    client.handle_snapshot(&snapshot.encode());
    assert_eq!(position_of(&client, "player-4"), Vec3::new(1.0, 1.0, 1.0));
    assert!(client.translation.is_empty());
}

#[test]
fn test_own_echo_is_ignored() {
    let (mut client, _) = client_runtime(3);

    let mut snapshot = Snapshot::new(Route::ServerBroadcast, 3);
    snapshot.header.sequence = 1;
    snapshot.push_op(&Operation::Create {
        path: "mine".to_string(),
        type_name: "GameObject".to_string(),
        owner: Some(3),
    });

    client.handle_snapshot(&snapshot.encode());
    assert!(!client.scene.has("mine"));
    assert_eq!(client.tracker.last_incoming(3), 0);
}

#[test]
fn test_destroy_cascade_replicates() {
    let (mut server, server_link) = server_with_clients(&[1]);
    let (mut client, _) = client_runtime(1);

    server.register_object(GameObject::new("a"), ".").unwrap();
    server.register_object(GameObject::new("b"), "a").unwrap();
    server.register_object(GameObject::new("c"), "a.b").unwrap();
    server.tick(0.016);
    for (_, payload) in server_link.drain() {
        client.handle_snapshot(&payload);
    }
    assert!(client.scene.has("a.b.c"));

    server.unregister_object("a").unwrap();
    server.tick(0.016);

    let sent = server_link.drain();
    assert_eq!(sent.len(), 1);
    let (_, ops) = decode_ops(&sent[0].1);
    let destroyed: Vec<&str> = ops
        .iter()
        .map(|op| match op {
            Operation::Destroy { path } => path.as_str(),
            other => panic!("expected Destroy, got {other:?}"),
        })
        .collect();
    assert_eq!(destroyed, vec!["a", "a.b", "a.b.c"]);

    client.handle_snapshot(&sent[0].1);
    assert!(!client.scene.has("a"));
    assert!(!client.scene.has("a.b"));
}

#[test]
fn test_component_add_and_remove_replicate() {
    let (mut server, server_link) = server_with_clients(&[1]);
    let (mut client, _) = client_runtime(1);

    server.register_object(GameObject::new("obj"), ".").unwrap();
    server.tick(0.016);
    for (_, payload) in server_link.drain() {
        client.handle_snapshot(&payload);
    }

    // Late component addition.
    server
        .scene
        .get_mut("obj")
        .unwrap()
        .add_component(Transform2d {
            local_rotation: 45.0,
            ..Default::default()
        })
        .unwrap();
    server.mark_component_dirty("obj", Transform2d::TYPE_ID);
    server.tick(0.016);

    let sent = server_link.drain();
    assert_eq!(sent.len(), 1);
    let (_, ops) = decode_ops(&sent[0].1);
    assert!(matches!(ops[0], Operation::AddComponent { .. }));
    client.handle_snapshot(&sent[0].1);

    let replicated = client.scene.get("obj").unwrap().get::<Transform2d>().unwrap();
    assert_eq!(replicated.local_rotation, 45.0);

    // Removal.
    server
        .scene
        .get_mut("obj")
        .unwrap()
        .remove_component(Transform2d::TYPE_ID)
        .unwrap();
    server.mark_component_dirty("obj", Transform2d::TYPE_ID);
    server.tick(0.016);

    let sent = server_link.drain();
    let (_, ops) = decode_ops(&sent[0].1);
    assert!(matches!(ops[0], Operation::RemoveComponent { .. }));
    client.handle_snapshot(&sent[0].1);
    assert!(
        !client
            .scene
            .get("obj")
            .unwrap()
            .has_component(Transform2d::TYPE_ID)
    );
}

#[test]
fn test_remote_transform_update_smooths() {
    let (mut server, server_link) = server_with_clients(&[1]);
    let (mut client, _) = client_runtime(1);

    server
        .register_object(GameObject::with_owner("mover", 2), ".")
        .unwrap();
    server.tick(0.016);
    for (_, payload) in server_link.drain() {
        client.handle_snapshot(&payload);
    }
    assert_eq!(position_of(&client, "mover"), Vec3::ZERO);

    server
        .scene
        .get_mut("mover")
        .unwrap()
        .transform3d_mut()
        .unwrap()
        .local_position = Vec3::new(10.0, 0.0, 0.0);
    server.mark_component_dirty("mover", Transform3d::TYPE_ID);
    server.tick(0.016);

    let sent = server_link.drain();
    client.handle_snapshot(&sent[0].1);

    // No snap: still at the origin until ticks advance the buffer.
    assert_eq!(position_of(&client, "mover"), Vec3::ZERO);

    client.tick(0.05);
    assert!((position_of(&client, "mover") - Vec3::new(5.0, 0.0, 0.0)).length() < 1e-4);

    client.tick(0.05);
    assert_eq!(position_of(&client, "mover"), Vec3::new(10.0, 0.0, 0.0));
    assert!(client.translation.is_empty());
}

#[test]
fn test_sequences_increase_per_recipient() {
    let (mut server, server_link) = server_with_clients(&[1]);
    server.register_object(GameObject::new("obj"), ".").unwrap();
    server.tick(0.016);

    server
        .scene
        .get_mut("obj")
        .unwrap()
        .transform3d_mut()
        .unwrap()
        .local_position = Vec3::ONE;
    server.mark_component_dirty("obj", Transform3d::TYPE_ID);
    server.tick(0.016);

    let sequences: Vec<u64> = server_link
        .drain()
        .iter()
        .map(|(_, payload)| Snapshot::decode(payload).unwrap().header.sequence)
        .collect();
    assert_eq!(sequences, vec![1, 2]);
}
