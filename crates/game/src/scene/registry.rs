use std::collections::HashMap;

use super::component::{Component, ComponentTypeId, RegisteredComponent};
use super::transform::{Transform2d, Transform3d};

/// Registration record for one component type.
pub struct ComponentSpec {
    pub type_id: ComponentTypeId,
    pub name: &'static str,
    pub instantiate: fn() -> Box<dyn Component>,
}

/// Maps every serializable component type to its stable id and a factory
/// producing a default-constructed instance. Also keeps a runtime-name map
/// for logging and for `Create` ops, which carry readable type names.
#[derive(Default)]
pub struct ComponentRegistry {
    by_id: HashMap<ComponentTypeId, ComponentSpec>,
    by_name: HashMap<&'static str, ComponentTypeId>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in component set every peer knows about.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register::<Transform3d>();
        registry.register::<Transform2d>();
        registry
    }

    /// Registering the same `(id, type)` twice is a no-op. Registering a
    /// different type under an already-taken id is a startup configuration
    /// error and panics: the id is baked into the wire format, two types
    /// claiming it cannot be reconciled at runtime.
    pub fn register<T: RegisteredComponent>(&mut self) {
        if let Some(existing) = self.by_id.get(&T::TYPE_ID) {
            assert!(
                existing.name == T::TYPE_NAME,
                "component type id {:#x} registered for both '{}' and '{}'",
                T::TYPE_ID,
                existing.name,
                T::TYPE_NAME,
            );
            return;
        }

        self.by_id.insert(
            T::TYPE_ID,
            ComponentSpec {
                type_id: T::TYPE_ID,
                name: T::TYPE_NAME,
                instantiate: || Box::new(T::default()),
            },
        );
        self.by_name.insert(T::TYPE_NAME, T::TYPE_ID);
    }

    /// Fresh default-constructed instance, or `None` for an unknown id.
    pub fn instantiate(&self, type_id: ComponentTypeId) -> Option<Box<dyn Component>> {
        self.by_id.get(&type_id).map(|spec| (spec.instantiate)())
    }

    pub fn is_registered(&self, type_id: ComponentTypeId) -> bool {
        self.by_id.contains_key(&type_id)
    }

    pub fn runtime_name(&self, type_id: ComponentTypeId) -> Option<&'static str> {
        self.by_id.get(&type_id).map(|spec| spec.name)
    }

    pub fn id_by_name(&self, name: &str) -> Option<ComponentTypeId> {
        self.by_name.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::component::component_type_id;
    use std::any::Any;

    #[derive(Default)]
    struct Imposter;

    impl RegisteredComponent for Imposter {
        // Deliberately collides with Transform3d.
        const TYPE_ID: ComponentTypeId = component_type_id("Transform3d");
        const TYPE_NAME: &'static str = "Imposter";
    }

    impl Component for Imposter {
        fn component_id(&self) -> ComponentTypeId {
            Self::TYPE_ID
        }
        fn type_name(&self) -> &'static str {
            Self::TYPE_NAME
        }
        fn serialize(&self, _out: &mut Vec<u8>) {}
        fn deserialize(
            &mut self,
            _reader: &mut crate::net::wire::Reader,
        ) -> Result<(), crate::net::wire::WireError> {
            Ok(())
        }
        fn merge_from(&mut self, _incoming: &dyn Component) {}
        fn as_any(&self) -> &dyn Any {
            self
        }
        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }
    }

    #[test]
    fn test_duplicate_registration_is_idempotent() {
        let mut registry = ComponentRegistry::with_defaults();
        let before = registry.len();
        registry.register::<Transform3d>();
        assert_eq!(registry.len(), before);
    }

    #[test]
    #[should_panic(expected = "registered for both")]
    fn test_conflicting_registration_is_fatal() {
        let mut registry = ComponentRegistry::with_defaults();
        registry.register::<Imposter>();
    }

    #[test]
    fn test_instantiate_unknown_id() {
        let registry = ComponentRegistry::with_defaults();
        assert!(registry.instantiate(0xdead_beef).is_none());
    }

    #[test]
    fn test_name_id_mapping() {
        let registry = ComponentRegistry::with_defaults();
        let id = registry.id_by_name("Transform3d").unwrap();
        assert_eq!(id, Transform3d::TYPE_ID);
        assert_eq!(registry.runtime_name(id), Some("Transform3d"));
    }

    #[test]
    fn test_instantiate_produces_defaults() {
        let registry = ComponentRegistry::with_defaults();
        let fresh = registry.instantiate(Transform3d::TYPE_ID).unwrap();
        let transform = fresh.as_any().downcast_ref::<Transform3d>().unwrap();
        assert_eq!(*transform, Transform3d::default());
    }
}
