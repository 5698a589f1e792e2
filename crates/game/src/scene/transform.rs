use std::any::Any;

use glam::{Vec2, Vec3};

use super::component::{Component, ComponentTypeId, RegisteredComponent, component_type_id};
use crate::net::wire::{Reader, WireError, write_f32, write_vec2, write_vec3};

/// Local-space 3d transform. Rotation is Euler degrees so the translation
/// buffer can lerp it component-wise like position and scale.
#[derive(Debug, Clone, PartialEq)]
pub struct Transform3d {
    pub local_position: Vec3,
    pub local_rotation: Vec3,
    pub local_scale: Vec3,
}

impl Default for Transform3d {
    fn default() -> Self {
        Self {
            local_position: Vec3::ZERO,
            local_rotation: Vec3::ZERO,
            local_scale: Vec3::ONE,
        }
    }
}

impl Transform3d {
    pub fn new(position: Vec3, rotation: Vec3, scale: Vec3) -> Self {
        Self {
            local_position: position,
            local_rotation: rotation,
            local_scale: scale,
        }
    }

    pub fn at(position: Vec3) -> Self {
        Self {
            local_position: position,
            ..Self::default()
        }
    }
}

impl RegisteredComponent for Transform3d {
    const TYPE_ID: ComponentTypeId = component_type_id("Transform3d");
    const TYPE_NAME: &'static str = "Transform3d";
}

impl Component for Transform3d {
    fn component_id(&self) -> ComponentTypeId {
        Self::TYPE_ID
    }

    fn type_name(&self) -> &'static str {
        Self::TYPE_NAME
    }

    fn serialize(&self, out: &mut Vec<u8>) {
        write_vec3(out, self.local_position);
        write_vec3(out, self.local_rotation);
        write_vec3(out, self.local_scale);
    }

    fn deserialize(&mut self, reader: &mut Reader) -> Result<(), WireError> {
        self.local_position = reader.read_vec3()?;
        self.local_rotation = reader.read_vec3()?;
        self.local_scale = reader.read_vec3()?;
        Ok(())
    }

    fn merge_from(&mut self, incoming: &dyn Component) {
        let Some(incoming) = incoming.as_any().downcast_ref::<Self>() else {
            return;
        };
        if self.local_position != incoming.local_position {
            self.local_position = incoming.local_position;
        }
        if self.local_rotation != incoming.local_rotation {
            self.local_rotation = incoming.local_rotation;
        }
        if self.local_scale != incoming.local_scale {
            self.local_scale = incoming.local_scale;
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Local-space 2d transform.
#[derive(Debug, Clone, PartialEq)]
pub struct Transform2d {
    pub local_position: Vec2,
    pub local_rotation: f32,
    pub local_scale: Vec2,
}

impl Default for Transform2d {
    fn default() -> Self {
        Self {
            local_position: Vec2::ZERO,
            local_rotation: 0.0,
            local_scale: Vec2::ONE,
        }
    }
}

impl RegisteredComponent for Transform2d {
    const TYPE_ID: ComponentTypeId = component_type_id("Transform2d");
    const TYPE_NAME: &'static str = "Transform2d";
}

impl Component for Transform2d {
    fn component_id(&self) -> ComponentTypeId {
        Self::TYPE_ID
    }

    fn type_name(&self) -> &'static str {
        Self::TYPE_NAME
    }

    fn serialize(&self, out: &mut Vec<u8>) {
        write_vec2(out, self.local_position);
        write_f32(out, self.local_rotation);
        write_vec2(out, self.local_scale);
    }

    fn deserialize(&mut self, reader: &mut Reader) -> Result<(), WireError> {
        self.local_position = reader.read_vec2()?;
        self.local_rotation = reader.read_f32()?;
        self.local_scale = reader.read_vec2()?;
        Ok(())
    }

    fn merge_from(&mut self, incoming: &dyn Component) {
        let Some(incoming) = incoming.as_any().downcast_ref::<Self>() else {
            return;
        };
        if self.local_position != incoming.local_position {
            self.local_position = incoming.local_position;
        }
        if self.local_rotation != incoming.local_rotation {
            self.local_rotation = incoming.local_rotation;
        }
        if self.local_scale != incoming.local_scale {
            self.local_scale = incoming.local_scale;
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::component::{merge_components, serialize_to_blob};

    #[test]
    fn test_transform3d_roundtrip() {
        let transform = Transform3d::new(
            Vec3::new(1.0, 2.0, 3.0),
            Vec3::new(0.0, 90.0, 0.0),
            Vec3::new(2.0, 2.0, 2.0),
        );

        let blob = serialize_to_blob(&transform);
        assert_eq!(blob.len(), 36);

        let mut decoded = Transform3d::default();
        decoded.deserialize(&mut Reader::new(&blob)).unwrap();
        assert_eq!(decoded, transform);
    }

    #[test]
    fn test_transform2d_roundtrip() {
        let transform = Transform2d {
            local_position: Vec2::new(4.0, -1.0),
            local_rotation: 45.0,
            local_scale: Vec2::ONE,
        };

        let blob = serialize_to_blob(&transform);
        let mut decoded = Transform2d::default();
        decoded.deserialize(&mut Reader::new(&blob)).unwrap();
        assert_eq!(decoded, transform);
    }

    #[test]
    fn test_merge_copies_changed_fields() {
        let mut destination = Transform3d::at(Vec3::new(1.0, 0.0, 0.0));
        let incoming = Transform3d::new(Vec3::new(5.0, 0.0, 0.0), Vec3::ZERO, Vec3::ONE);

        merge_components(&mut destination, &incoming);
        assert_eq!(destination.local_position, Vec3::new(5.0, 0.0, 0.0));
        assert_eq!(destination.local_scale, Vec3::ONE);
    }

    #[test]
    fn test_merge_ignores_foreign_type() {
        let mut destination = Transform3d::at(Vec3::new(1.0, 0.0, 0.0));
        let incoming = Transform2d::default();

        merge_components(&mut destination, &incoming);
        assert_eq!(destination.local_position, Vec3::new(1.0, 0.0, 0.0));
    }
}
