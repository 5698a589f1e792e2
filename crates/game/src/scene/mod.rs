mod component;
mod game_object;
mod registry;
mod scene;
mod transform;

pub use component::{
    Component, ComponentFlags, ComponentTypeId, RegisteredComponent, component_type_id,
    merge_components, serialize_to_blob, state_hash,
};
pub use game_object::{ComponentSlot, GameObject, SceneError};
pub use registry::{ComponentRegistry, ComponentSpec};
pub use scene::Scene;
pub use transform::{Transform2d, Transform3d};
