use std::any::Any;

use bitflags::bitflags;

use crate::net::wire::{Reader, WireError, fnv1a_64};

/// Stable numeric id of a serializable component type. Baked into the wire
/// format, so it must be identical on every peer.
pub type ComponentTypeId = u64;

/// FNV-1a 64 of the stable type name. Const so `TYPE_ID` associated consts
/// evaluate at compile time and stay in sync across builds.
pub const fn component_type_id(name: &str) -> ComponentTypeId {
    fnv1a_64(name.as_bytes())
}

bitflags! {
    /// Transient per-instance flags, never serialized.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ComponentFlags: u8 {
        const WAS_ADDED = 1 << 0;
        const WAS_REMOVED = 1 << 1;
    }
}

/// A polymorphic, individually serializable piece of game-object state.
///
/// `serialize`/`deserialize` must round-trip byte-exactly; the serialized
/// form doubles as the canonical input for change-detection hashing.
/// `merge_from` copies each field from `incoming` into `self` iff the values
/// differ; incoming components of a different concrete type are ignored.
pub trait Component: Any {
    fn component_id(&self) -> ComponentTypeId;
    fn type_name(&self) -> &'static str;

    fn serialize(&self, out: &mut Vec<u8>);
    fn deserialize(&mut self, reader: &mut Reader) -> Result<(), WireError>;

    fn merge_from(&mut self, incoming: &dyn Component);

    /// Components backed by local-only assets (renderers, colliders) return
    /// false and never cross the wire.
    fn should_synchronize(&self) -> bool {
        true
    }

    /// Called after a remote merge landed on this instance.
    fn on_after_merge(&mut self) {}

    fn update(&mut self, _dt: f32) {}
    fn render(&self) {}

    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Marker for types the registry can default-construct.
pub trait RegisteredComponent: Component + Default {
    const TYPE_ID: ComponentTypeId;
    const TYPE_NAME: &'static str;
}

/// Canonical byte form of a component, as sent in `AddComponent`/`SetField`
/// blobs.
pub fn serialize_to_blob(component: &dyn Component) -> Vec<u8> {
    let mut out = Vec::new();
    component.serialize(&mut out);
    out
}

/// Change-detection hash over the canonical byte form.
pub fn state_hash(component: &dyn Component) -> u64 {
    fnv1a_64(&serialize_to_blob(component))
}

/// Field-wise merge with the preconditions of the component factory: both
/// sides must be the same concrete type, anything else is a no-op.
pub fn merge_components(destination: &mut dyn Component, incoming: &dyn Component) {
    if destination.component_id() != incoming.component_id() {
        return;
    }
    destination.merge_from(incoming);
    destination.on_after_merge();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_ids_are_stable() {
        const ID: ComponentTypeId = component_type_id("Transform3d");
        assert_eq!(ID, component_type_id("Transform3d"));
        assert_ne!(ID, component_type_id("Transform2d"));
    }

    #[test]
    fn test_flags_default_empty() {
        let flags = ComponentFlags::default();
        assert!(!flags.contains(ComponentFlags::WAS_ADDED));
        assert!(!flags.contains(ComponentFlags::WAS_REMOVED));
    }
}
