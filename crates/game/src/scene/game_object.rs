use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexMap;
use thiserror::Error;

use super::component::{Component, ComponentFlags, ComponentTypeId, RegisteredComponent};
use super::transform::{Transform2d, Transform3d};
use crate::net::protocol::NetworkId;

static NEXT_OBJECT_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SceneError {
    #[error("'{path}' already has a component of type '{type_name}'")]
    DuplicateComponent { path: String, type_name: String },
    #[error("'{path}' has no component with id {type_id:#x}")]
    MissingComponent { path: String, type_id: ComponentTypeId },
    #[error("'{parent}' already has a child named '{child}'")]
    DuplicateChild { parent: String, child: String },
    #[error("'{parent}' has no child named '{child}'")]
    MissingChild { parent: String, child: String },
    #[error("no game object at path '{0}'")]
    MissingObject(String),
    #[error("parent path '{0}' does not exist")]
    MissingParent(String),
    #[error("a root named '{0}' is already registered")]
    DuplicateRoot(String),
    #[error("cannot parent '{path}' beneath its own subtree at '{parent}'")]
    CyclicParent { path: String, parent: String },
    #[error("component type id {0:#x} is not registered")]
    UnknownComponentType(ComponentTypeId),
}

/// A component plus its transient bookkeeping flags. The flags belong to the
/// slot, not the component value, so deserialized instances start clean.
pub struct ComponentSlot {
    pub component: Box<dyn Component>,
    pub flags: ComponentFlags,
}

/// A named node in the scene tree: an insertion-ordered component map and an
/// insertion-ordered child map. Iteration order of both maps is part of the
/// wire contract (subtree serialization walks them in insertion order).
pub struct GameObject {
    name: String,
    absolute_path: String,
    type_name: String,
    object_id: u64,
    owning_client: Option<NetworkId>,
    local: bool,
    just_created: bool,
    destroyed: bool,
    components: IndexMap<ComponentTypeId, ComponentSlot>,
    children: IndexMap<String, GameObject>,
}

impl GameObject {
    /// New object with a 3d transform as its first component.
    pub fn new(name: impl Into<String>) -> Self {
        let mut object = Self::bare(name);
        object
            .add_component(Transform3d::default())
            .expect("fresh object cannot have a duplicate transform");
        object
    }

    /// New object with a 2d transform as its first component.
    pub fn new_2d(name: impl Into<String>) -> Self {
        let mut object = Self::bare(name);
        object
            .add_component(Transform2d::default())
            .expect("fresh object cannot have a duplicate transform");
        object
    }

    fn bare(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            absolute_path: name.clone(),
            name,
            type_name: "GameObject".to_string(),
            object_id: NEXT_OBJECT_ID.fetch_add(1, Ordering::Relaxed),
            owning_client: None,
            local: false,
            just_created: true,
            destroyed: false,
            components: IndexMap::new(),
            children: IndexMap::new(),
        }
    }

    pub fn with_owner(name: impl Into<String>, owner: NetworkId) -> Self {
        let mut object = Self::new(name);
        object.owning_client = Some(owner);
        object
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Dotted path from the scene root; maintained on (re)attachment.
    pub fn absolute_path(&self) -> &str {
        &self.absolute_path
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn set_type_name(&mut self, type_name: impl Into<String>) {
        self.type_name = type_name.into();
    }

    pub fn object_id(&self) -> u64 {
        self.object_id
    }

    pub fn owning_client(&self) -> Option<NetworkId> {
        self.owning_client
    }

    pub fn set_owning_client(&mut self, owner: Option<NetworkId>) {
        self.owning_client = owner;
    }

    /// Local objects never cross the wire.
    pub fn is_local(&self) -> bool {
        self.local
    }

    pub fn set_local(&mut self, local: bool) {
        self.local = local;
    }

    pub fn just_created(&self) -> bool {
        self.just_created
    }

    pub fn clear_just_created(&mut self) {
        self.just_created = false;
    }

    pub fn destroyed(&self) -> bool {
        self.destroyed
    }

    /// One-way: a destroyed object is never revived.
    pub fn mark_destroyed(&mut self) {
        self.destroyed = true;
    }

    /// The server is authoritative for unowned objects; otherwise only the
    /// owning peer is.
    pub fn is_authoritative(&self, local_id: NetworkId, is_server: bool) -> bool {
        match self.owning_client {
            None => is_server,
            Some(owner) => owner == local_id,
        }
    }

    pub fn add_component<T: RegisteredComponent>(&mut self, component: T) -> Result<(), SceneError> {
        self.add_component_dynamic(Box::new(component))
    }

    pub fn add_component_dynamic(
        &mut self,
        component: Box<dyn Component>,
    ) -> Result<(), SceneError> {
        let type_id = component.component_id();
        if self.components.contains_key(&type_id) {
            return Err(SceneError::DuplicateComponent {
                path: self.absolute_path.clone(),
                type_name: component.type_name().to_string(),
            });
        }
        self.components.insert(
            type_id,
            ComponentSlot {
                component,
                flags: ComponentFlags::WAS_ADDED,
            },
        );
        Ok(())
    }

    pub fn remove_component(&mut self, type_id: ComponentTypeId) -> Result<ComponentSlot, SceneError> {
        // shift_remove keeps the remaining insertion order intact.
        match self.components.shift_remove(&type_id) {
            Some(mut slot) => {
                slot.flags.insert(ComponentFlags::WAS_REMOVED);
                Ok(slot)
            }
            None => Err(SceneError::MissingComponent {
                path: self.absolute_path.clone(),
                type_id,
            }),
        }
    }

    pub fn has_component(&self, type_id: ComponentTypeId) -> bool {
        self.components.contains_key(&type_id)
    }

    pub fn component(&self, type_id: ComponentTypeId) -> Option<&dyn Component> {
        self.components.get(&type_id).map(|slot| &*slot.component)
    }

    pub fn component_mut(&mut self, type_id: ComponentTypeId) -> Option<&mut (dyn Component + 'static)> {
        self.components
            .get_mut(&type_id)
            .map(|slot| &mut *slot.component)
    }

    pub fn slot(&self, type_id: ComponentTypeId) -> Option<&ComponentSlot> {
        self.components.get(&type_id)
    }

    pub fn slot_mut(&mut self, type_id: ComponentTypeId) -> Option<&mut ComponentSlot> {
        self.components.get_mut(&type_id)
    }

    pub fn get<T: RegisteredComponent>(&self) -> Option<&T> {
        self.component(T::TYPE_ID)?.as_any().downcast_ref::<T>()
    }

    pub fn get_mut<T: RegisteredComponent>(&mut self) -> Option<&mut T> {
        self.component_mut(T::TYPE_ID)?
            .as_any_mut()
            .downcast_mut::<T>()
    }

    pub fn transform3d(&self) -> Option<&Transform3d> {
        self.get::<Transform3d>()
    }

    pub fn transform3d_mut(&mut self) -> Option<&mut Transform3d> {
        self.get_mut::<Transform3d>()
    }

    /// Component slots in insertion order.
    pub fn component_slots(&self) -> impl Iterator<Item = (ComponentTypeId, &ComponentSlot)> {
        self.components.iter().map(|(id, slot)| (*id, slot))
    }

    pub fn component_slots_mut(
        &mut self,
    ) -> impl Iterator<Item = (ComponentTypeId, &mut ComponentSlot)> {
        self.components.iter_mut().map(|(id, slot)| (*id, slot))
    }

    pub fn component_count(&self) -> usize {
        self.components.len()
    }

    /// Clears `WAS_ADDED` on every slot; used when a whole object arrives
    /// from a remote peer and must not be re-emitted.
    pub fn clear_component_added_flags(&mut self) {
        for slot in self.components.values_mut() {
            slot.flags.remove(ComponentFlags::WAS_ADDED);
        }
    }

    pub fn add_child(&mut self, mut child: GameObject) -> Result<(), SceneError> {
        if self.children.contains_key(child.name()) {
            return Err(SceneError::DuplicateChild {
                parent: self.absolute_path.clone(),
                child: child.name().to_string(),
            });
        }
        child.reroot(&self.absolute_path);
        self.children.insert(child.name().to_string(), child);
        Ok(())
    }

    pub fn remove_child(&mut self, name: &str) -> Result<GameObject, SceneError> {
        self.children
            .shift_remove(name)
            .ok_or_else(|| SceneError::MissingChild {
                parent: self.absolute_path.clone(),
                child: name.to_string(),
            })
    }

    pub fn has_child(&self, name: &str) -> bool {
        self.children.contains_key(name)
    }

    pub fn child(&self, name: &str) -> Option<&GameObject> {
        self.children.get(name)
    }

    pub fn child_mut(&mut self, name: &str) -> Option<&mut GameObject> {
        self.children.get_mut(name)
    }

    pub fn children(&self) -> impl Iterator<Item = &GameObject> {
        self.children.values()
    }

    pub fn children_mut(&mut self) -> impl Iterator<Item = &mut GameObject> {
        self.children.values_mut()
    }

    pub fn child_count(&self) -> usize {
        self.children.len()
    }

    /// Recomputes this node's absolute path below `parent_path` ("." for the
    /// scene root) and cascades into the subtree.
    pub(crate) fn reroot(&mut self, parent_path: &str) {
        self.absolute_path = if parent_path == "." {
            self.name.clone()
        } else {
            format!("{}.{}", parent_path, self.name)
        };
        let own_path = self.absolute_path.clone();
        for child in self.children.values_mut() {
            child.reroot(&own_path);
        }
    }

    /// Components first, then children, both in insertion order.
    pub fn update(&mut self, dt: f32) {
        for slot in self.components.values_mut() {
            slot.component.update(dt);
        }
        for child in self.children.values_mut() {
            child.update(dt);
        }
    }

    /// Client-side only; the server never calls this.
    pub fn render(&self) {
        for slot in self.components.values() {
            slot.component.render();
        }
        for child in self.children.values() {
            child.render();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_component_is_transform() {
        let object = GameObject::new("cube");
        let (first_id, _) = object.component_slots().next().unwrap();
        assert_eq!(first_id, Transform3d::TYPE_ID);
    }

    #[test]
    fn test_duplicate_component_rejected() {
        let mut object = GameObject::new("cube");
        let err = object.add_component(Transform3d::default()).unwrap_err();
        assert!(matches!(err, SceneError::DuplicateComponent { .. }));
    }

    #[test]
    fn test_remove_component_marks_slot() {
        let mut object = GameObject::new("cube");
        object.add_component(Transform2d::default()).unwrap();

        let slot = object.remove_component(Transform2d::TYPE_ID).unwrap();
        assert!(slot.flags.contains(ComponentFlags::WAS_REMOVED));
        assert!(!object.has_component(Transform2d::TYPE_ID));
    }

    #[test]
    fn test_component_iteration_is_insertion_ordered() {
        let mut object = GameObject::new_2d("sprite");
        object.add_component(Transform3d::default()).unwrap();

        let order: Vec<_> = object.component_slots().map(|(id, _)| id).collect();
        assert_eq!(order, vec![Transform2d::TYPE_ID, Transform3d::TYPE_ID]);
    }

    #[test]
    fn test_duplicate_child_rejected() {
        let mut parent = GameObject::new("world");
        parent.add_child(GameObject::new("cube")).unwrap();

        let err = parent.add_child(GameObject::new("cube")).unwrap_err();
        assert!(matches!(err, SceneError::DuplicateChild { .. }));
    }

    #[test]
    fn test_child_paths_follow_parent() {
        let mut world = GameObject::new("world");
        let mut cube = GameObject::new("cube");
        cube.add_child(GameObject::new("edge")).unwrap();
        world.add_child(cube).unwrap();

        assert_eq!(world.child("cube").unwrap().absolute_path(), "world.cube");
        assert_eq!(
            world.child("cube").unwrap().child("edge").unwrap().absolute_path(),
            "world.cube.edge"
        );
    }

    #[test]
    fn test_object_ids_are_unique() {
        let a = GameObject::new("a");
        let b = GameObject::new("b");
        assert_ne!(a.object_id(), b.object_id());
    }

    #[test]
    fn test_authority() {
        let mut object = GameObject::new("cube");
        assert!(object.is_authoritative(0, true));
        assert!(!object.is_authoritative(3, false));

        object.set_owning_client(Some(3));
        assert!(!object.is_authoritative(0, true));
        assert!(object.is_authoritative(3, false));
    }
}
