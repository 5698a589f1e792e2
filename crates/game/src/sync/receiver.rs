use log::{debug, warn};

use super::snapshot::{Operation, Route, Snapshot};
use crate::net::protocol::{NetworkId, SERVER_ID};
use crate::net::wire::Reader;
use crate::runtime::{Runtime, Side};
use crate::scene::{
    Component, ComponentFlags, ComponentTypeId, GameObject, RegisteredComponent, Transform3d,
    merge_components, state_hash,
};

/// Ingests one snapshot payload: header checks, ordered op application
/// under the apply guard, sequence bookkeeping, and (server) the relay rule.
///
/// An unparsable operation aborts the remainder of the snapshot but never
/// the connection; ops already applied stay applied.
pub fn handle_snapshot(runtime: &mut Runtime, payload: &[u8]) {
    let snapshot = match Snapshot::decode(payload) {
        Ok(snapshot) => snapshot,
        Err(error) => {
            warn!("dropping undecodable snapshot: {error}");
            return;
        }
    };
    let header = snapshot.header;

    // Duplicate or out-of-order per origin.
    if header.sequence <= runtime.tracker.last_incoming(header.origin) {
        debug!(
            "dropping stale snapshot from {} (seq {}, have {})",
            header.origin,
            header.sequence,
            runtime.tracker.last_incoming(header.origin)
        );
        return;
    }

    // Our own ops coming back through a server broadcast.
    if runtime.side == Side::Client
        && header.origin != SERVER_ID
        && header.origin == runtime.identity.get()
    {
        return;
    }

    debug!(
        "applying snapshot from {} (seq {}, ack {}, {} ops)",
        header.origin, header.sequence, header.ack, header.operation_count
    );

    runtime.sender.begin_apply();
    for record in snapshot.records() {
        let operation = record
            .map_err(|error| error.to_string())
            .and_then(|record| {
                Operation::decode(record.code, record.payload).map_err(|error| error.to_string())
            });
        match operation {
            Ok(operation) => apply_operation(runtime, operation, header.origin),
            Err(error) => {
                warn!("aborting snapshot from {}: {error}", header.origin);
                break;
            }
        }
    }
    let sender = runtime.sender.clone();
    sender.end_apply(&runtime.scene);

    runtime.tracker.mark_delivered(header.origin, header.sequence);
    runtime.tracker.mark_ack(header.origin, header.ack);

    // Relay-once: rewrite the route, keep origin and body, forward to every
    // peer except the origin.
    if runtime.side == Side::Server && header.route == Route::RelayOnce {
        let mut relay = snapshot;
        relay.header.route = Route::ServerBroadcast;
        for peer in runtime.link.peers() {
            if peer != header.origin {
                runtime.link.send_snapshot(peer, &relay);
            }
        }
        debug!(
            "relayed snapshot from {} ({} ops) to all other clients",
            header.origin, header.operation_count
        );
    }
}

fn apply_operation(runtime: &mut Runtime, operation: Operation, origin: NetworkId) {
    match operation {
        Operation::Create {
            path,
            type_name,
            owner,
        } => handle_create(runtime, &path, type_name, owner),
        Operation::Destroy { path } => handle_destroy(runtime, &path),
        Operation::AddComponent {
            path,
            component_type,
            blob,
        } => handle_add_component(runtime, &path, component_type, &blob),
        Operation::RemoveComponent {
            path,
            component_type,
        } => handle_remove_component(runtime, &path, component_type),
        Operation::SetField {
            path,
            component_type,
            field: _,
            blob,
        } => handle_set_field(runtime, &path, component_type, &blob, origin),
    }
}

fn handle_create(
    runtime: &mut Runtime,
    path: &str,
    type_name: String,
    owner: Option<NetworkId>,
) {
    // Applying the same Create twice must leave the scene unchanged.
    if runtime.scene.has(path) {
        return;
    }

    let (parent_path, name) = match path.rsplit_once('.') {
        Some((parent, name)) => (parent, name),
        None => (".", path),
    };

    let mut object = GameObject::new(name);
    object.set_type_name(type_name);
    object.set_owning_client(owner);
    object.clear_just_created();
    object.clear_component_added_flags();

    if let Err(error) = runtime.scene.register_silent(object, parent_path) {
        warn!("cannot apply Create for '{path}': {error}");
        return;
    }

    if runtime.side == Side::Server {
        if let Some(owner) = owner {
            runtime.sender.remember_owner(path, owner);
        }
    }
}

fn handle_destroy(runtime: &mut Runtime, path: &str) {
    runtime.sender.forget_subtree(path);
    if runtime.scene.unregister_silent(path).is_err() {
        debug!("Destroy for unknown path '{path}'");
    }
}

fn handle_add_component(
    runtime: &mut Runtime,
    path: &str,
    component_type: ComponentTypeId,
    blob: &[u8],
) {
    let Some(object) = runtime.scene.get_mut(path) else {
        warn!("AddComponent for unknown path '{path}'");
        return;
    };

    if object.has_component(component_type) {
        if component_type == Transform3d::TYPE_ID {
            // Snap only position/rotation/scale; everything else about the
            // local transform (and its slot flags) stays untouched.
            let mut incoming = Transform3d::default();
            if incoming.deserialize(&mut Reader::new(blob)).is_err() {
                warn!("corrupt Transform3d payload for '{path}'");
                return;
            }
            let slot = object.slot_mut(component_type).expect("checked above");
            if let Some(existing) = slot.component.as_any_mut().downcast_mut::<Transform3d>() {
                existing.local_position = incoming.local_position;
                existing.local_rotation = incoming.local_rotation;
                existing.local_scale = incoming.local_scale;
            }
            slot.flags.remove(ComponentFlags::WAS_ADDED);
            let hash = state_hash(&*slot.component);
            runtime.sender.remember_hash(path, component_type, hash);
        } else {
            let Some(mut incoming) = runtime.registry.instantiate(component_type) else {
                warn!("AddComponent with unknown type id {component_type:#x}; dropping op");
                return;
            };
            if incoming.deserialize(&mut Reader::new(blob)).is_err() {
                warn!("corrupt component payload for '{path}'");
                return;
            }
            let existing = object.component_mut(component_type).expect("checked above");
            merge_components(existing, &*incoming);
            let hash = state_hash(existing);
            runtime.sender.remember_hash(path, component_type, hash);
        }
        return;
    }

    let Some(mut fresh) = runtime.registry.instantiate(component_type) else {
        warn!("AddComponent with unknown type id {component_type:#x}; dropping op");
        return;
    };
    if fresh.deserialize(&mut Reader::new(blob)).is_err() {
        warn!("corrupt component payload for '{path}'");
        return;
    }
    let hash = state_hash(&*fresh);
    if let Err(error) = object.add_component_dynamic(fresh) {
        warn!("cannot apply AddComponent for '{path}': {error}");
        return;
    }
    if let Some(slot) = object.slot_mut(component_type) {
        slot.flags.remove(ComponentFlags::WAS_ADDED);
    }
    runtime.sender.remember_hash(path, component_type, hash);
}

fn handle_remove_component(runtime: &mut Runtime, path: &str, component_type: ComponentTypeId) {
    let Some(object) = runtime.scene.get_mut(path) else {
        debug!("RemoveComponent for unknown path '{path}'");
        return;
    };
    if !object.has_component(component_type) {
        return;
    }
    runtime.sender.forget_hash(path, component_type);
    let _ = object.remove_component(component_type);
}

fn handle_set_field(
    runtime: &mut Runtime,
    path: &str,
    component_type: ComponentTypeId,
    blob: &[u8],
    origin: NetworkId,
) {
    let own_id = runtime.identity.get();
    let Some(object) = runtime.scene.get_mut(path) else {
        debug!("SetField for unknown path '{path}'");
        return;
    };

    // Authority guard: never let the wire overwrite the authority's fields.
    match runtime.side {
        Side::Client => {
            if object.owning_client().is_some_and(|owner| owner == own_id) {
                return;
            }
        }
        Side::Server => {
            if object.owning_client() != Some(origin) {
                debug!(
                    "dropping SetField from {} on '{}' (owner {:?})",
                    origin,
                    path,
                    object.owning_client()
                );
                return;
            }
        }
    }

    // Remote transforms smooth through the translation buffer instead of
    // snapping.
    if runtime.side == Side::Client && component_type == Transform3d::TYPE_ID {
        let mut incoming = Transform3d::default();
        if incoming.deserialize(&mut Reader::new(blob)).is_err() {
            warn!("corrupt Transform3d payload for '{path}'");
            return;
        }
        let Some(current) = object.transform3d() else {
            return;
        };
        runtime.translation.enqueue(path, current, &incoming);
        return;
    }

    let Some(mut incoming) = runtime.registry.instantiate(component_type) else {
        warn!("SetField with unknown type id {component_type:#x}; dropping op");
        return;
    };
    if incoming.deserialize(&mut Reader::new(blob)).is_err() {
        warn!("corrupt component payload for '{path}'");
        return;
    }
    let Some(existing) = object.component_mut(component_type) else {
        debug!("SetField for missing component on '{path}'");
        return;
    };
    merge_components(existing, &*incoming);
    let hash = state_hash(existing);
    runtime.sender.remember_hash(path, component_type, hash);
}
