use indexmap::IndexMap;

use super::game_object::{GameObject, SceneError};
use crate::sync::sender::SenderSync;

/// Process-wide index of the scene tree, keyed by absolute dotted path.
/// "." denotes the scene root. The scene is main-thread-only; network
/// callbacks reach it by posting through the main-thread executor.
#[derive(Default)]
pub struct Scene {
    roots: IndexMap<String, GameObject>,
}

impl Scene {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches `object` under `parent_path` and marks the new subtree dirty
    /// so its creation replicates on the next flush.
    pub fn register(
        &mut self,
        object: GameObject,
        parent_path: &str,
        sender: &SenderSync,
    ) -> Result<(), SceneError> {
        self.register_inner(object, parent_path, Some(sender))
    }

    /// Attach without dirty marking; used when applying remote operations.
    pub fn register_silent(
        &mut self,
        object: GameObject,
        parent_path: &str,
    ) -> Result<(), SceneError> {
        self.register_inner(object, parent_path, None)
    }

    fn register_inner(
        &mut self,
        object: GameObject,
        parent_path: &str,
        sender: Option<&SenderSync>,
    ) -> Result<(), SceneError> {
        let name = object.name().to_string();
        let attached_path;

        if parent_path == "." {
            if self.roots.contains_key(&name) {
                return Err(SceneError::DuplicateRoot(name));
            }
            let mut object = object;
            object.reroot(".");
            attached_path = object.absolute_path().to_string();
            self.roots.insert(name, object);
        } else {
            let parent = self
                .get_mut(parent_path)
                .ok_or_else(|| SceneError::MissingParent(parent_path.to_string()))?;
            if parent.has_child(&name) {
                return Err(SceneError::DuplicateChild {
                    parent: parent_path.to_string(),
                    child: name,
                });
            }
            attached_path = format!("{parent_path}.{name}");
            parent.add_child(object)?;
        }

        if let Some(sender) = sender {
            let node = self
                .get(&attached_path)
                .expect("freshly attached path must resolve");
            mark_subtree_dirty(sender, node);
        }
        Ok(())
    }

    /// Cascading destruction: the whole subtree is flagged destroyed, each
    /// node is reported to the sender (parent first, then descendants,
    /// depth-first), then the subtree is detached.
    pub fn unregister(&mut self, path: &str, sender: &SenderSync) -> Result<(), SceneError> {
        self.unregister_inner(path, Some(sender))
    }

    /// Detach without notifying the sender; used when applying a remote
    /// `Destroy`.
    pub fn unregister_silent(&mut self, path: &str) -> Result<(), SceneError> {
        self.unregister_inner(path, None)
    }

    fn unregister_inner(
        &mut self,
        path: &str,
        sender: Option<&SenderSync>,
    ) -> Result<(), SceneError> {
        {
            let node = self
                .get_mut(path)
                .ok_or_else(|| SceneError::MissingObject(path.to_string()))?;
            flag_subtree_destroyed(node);
        }
        if let Some(sender) = sender {
            let node = self.get(path).expect("checked above");
            mark_subtree_destroyed(sender, node);
        }

        match path.rsplit_once('.') {
            None => {
                self.roots.shift_remove(path);
            }
            Some((parent_path, child_name)) => {
                let parent = self
                    .get_mut(parent_path)
                    .ok_or_else(|| SceneError::MissingParent(parent_path.to_string()))?;
                parent.remove_child(child_name)?;
            }
        }
        Ok(())
    }

    pub fn has(&self, path: &str) -> bool {
        self.get(path).is_some()
    }

    pub fn get(&self, path: &str) -> Option<&GameObject> {
        if path == "." {
            return None;
        }
        let mut segments = path.split('.');
        let mut current = self.roots.get(segments.next()?)?;
        for segment in segments {
            current = current.child(segment)?;
        }
        Some(current)
    }

    pub fn get_mut(&mut self, path: &str) -> Option<&mut GameObject> {
        if path == "." {
            return None;
        }
        let mut segments = path.split('.');
        let mut current = self.roots.get_mut(segments.next()?)?;
        for segment in segments {
            current = current.child_mut(segment)?;
        }
        Some(current)
    }

    /// Moves a subtree under a new parent (`None` detaches to the root).
    /// Fails without modifying the scene when the target parent is missing,
    /// already has a same-named child, or lies inside the moving subtree.
    pub fn set_parent(&mut self, path: &str, new_parent: Option<&str>) -> Result<(), SceneError> {
        let name = path.rsplit_once('.').map_or(path, |(_, n)| n).to_string();

        match new_parent {
            Some(parent_path) => {
                if parent_path == path || parent_path.starts_with(&format!("{path}.")) {
                    return Err(SceneError::CyclicParent {
                        path: path.to_string(),
                        parent: parent_path.to_string(),
                    });
                }
                let parent = self
                    .get(parent_path)
                    .ok_or_else(|| SceneError::MissingParent(parent_path.to_string()))?;
                if parent.has_child(&name) {
                    return Err(SceneError::DuplicateChild {
                        parent: parent_path.to_string(),
                        child: name,
                    });
                }
            }
            None => {
                if path.contains('.') && self.roots.contains_key(&name) {
                    return Err(SceneError::DuplicateRoot(name));
                }
            }
        }

        let node = self.detach(path)?;
        match new_parent {
            Some(parent_path) => {
                let parent = self
                    .get_mut(parent_path)
                    .expect("parent existence checked before detach");
                parent.add_child(node)?;
            }
            None => {
                let mut node = node;
                node.reroot(".");
                self.roots.insert(node.name().to_string(), node);
            }
        }
        Ok(())
    }

    fn detach(&mut self, path: &str) -> Result<GameObject, SceneError> {
        match path.rsplit_once('.') {
            None => self
                .roots
                .shift_remove(path)
                .ok_or_else(|| SceneError::MissingObject(path.to_string())),
            Some((parent_path, child_name)) => {
                let parent = self
                    .get_mut(parent_path)
                    .ok_or_else(|| SceneError::MissingObject(path.to_string()))?;
                parent.remove_child(child_name)
            }
        }
    }

    pub fn roots(&self) -> impl Iterator<Item = &GameObject> {
        self.roots.values()
    }

    pub fn roots_mut(&mut self) -> impl Iterator<Item = &mut GameObject> {
        self.roots.values_mut()
    }

    pub fn root_count(&self) -> usize {
        self.roots.len()
    }

    pub fn update(&mut self, dt: f32) {
        for root in self.roots.values_mut() {
            root.update(dt);
        }
    }

    pub fn render(&self) {
        for root in self.roots.values() {
            root.render();
        }
    }

    pub fn clear(&mut self) {
        self.roots.clear();
    }
}

fn mark_subtree_dirty(sender: &SenderSync, node: &GameObject) {
    sender.mark_object_dirty(node);
    for child in node.children() {
        mark_subtree_dirty(sender, child);
    }
}

fn mark_subtree_destroyed(sender: &SenderSync, node: &GameObject) {
    sender.mark_object_destroyed(node);
    for child in node.children() {
        mark_subtree_destroyed(sender, child);
    }
}

fn flag_subtree_destroyed(node: &mut GameObject) {
    node.mark_destroyed();
    for child in node.children_mut() {
        flag_subtree_destroyed(child);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_chain() -> Scene {
        let mut scene = Scene::new();
        scene.register_silent(GameObject::new("a"), ".").unwrap();
        scene.register_silent(GameObject::new("b"), "a").unwrap();
        scene.register_silent(GameObject::new("c"), "a.b").unwrap();
        scene
    }

    #[test]
    fn test_register_and_lookup() {
        let scene = build_chain();
        assert!(scene.has("a"));
        assert!(scene.has("a.b"));
        assert!(scene.has("a.b.c"));
        assert!(!scene.has("a.c"));
        assert_eq!(scene.get("a.b.c").unwrap().absolute_path(), "a.b.c");
    }

    #[test]
    fn test_duplicate_root_rejected() {
        let mut scene = Scene::new();
        scene.register_silent(GameObject::new("a"), ".").unwrap();
        let err = scene
            .register_silent(GameObject::new("a"), ".")
            .unwrap_err();
        assert_eq!(err, SceneError::DuplicateRoot("a".to_string()));
    }

    #[test]
    fn test_missing_parent_rejected() {
        let mut scene = Scene::new();
        let err = scene
            .register_silent(GameObject::new("b"), "nope")
            .unwrap_err();
        assert_eq!(err, SceneError::MissingParent("nope".to_string()));
    }

    #[test]
    fn test_unregister_cascades() {
        let mut scene = build_chain();
        scene.unregister_silent("a").unwrap();
        assert!(!scene.has("a"));
        assert!(!scene.has("a.b"));
        assert_eq!(scene.root_count(), 0);
    }

    #[test]
    fn test_unregister_mid_tree() {
        let mut scene = build_chain();
        scene.unregister_silent("a.b").unwrap();
        assert!(scene.has("a"));
        assert!(!scene.has("a.b"));
        assert!(!scene.has("a.b.c"));
    }

    #[test]
    fn test_set_parent_moves_subtree() {
        let mut scene = build_chain();
        scene.register_silent(GameObject::new("d"), ".").unwrap();

        scene.set_parent("a.b", Some("d")).unwrap();
        assert!(scene.has("d.b"));
        assert!(scene.has("d.b.c"));
        assert!(!scene.has("a.b"));
    }

    #[test]
    fn test_set_parent_detaches_to_root() {
        let mut scene = build_chain();
        scene.set_parent("a.b", None).unwrap();
        assert!(scene.has("b"));
        assert!(scene.has("b.c"));
        assert!(!scene.has("a.b"));
    }

    #[test]
    fn test_set_parent_rejects_cycle() {
        let mut scene = build_chain();
        let err = scene.set_parent("a", Some("a.b")).unwrap_err();
        assert!(matches!(err, SceneError::CyclicParent { .. }));
        // Unchanged on failure.
        assert!(scene.has("a.b.c"));
    }

    #[test]
    fn test_set_parent_rejects_duplicate_name() {
        let mut scene = build_chain();
        scene.register_silent(GameObject::new("d"), ".").unwrap();
        scene.register_silent(GameObject::new("b"), "d").unwrap();

        let err = scene.set_parent("a.b", Some("d")).unwrap_err();
        assert!(matches!(err, SceneError::DuplicateChild { .. }));
        assert!(scene.has("a.b"));
    }

    #[test]
    fn test_paths_unique_across_scene() {
        let scene = build_chain();
        let mut paths = Vec::new();
        fn collect(node: &GameObject, out: &mut Vec<String>) {
            out.push(node.absolute_path().to_string());
            for child in node.children() {
                collect(child, out);
            }
        }
        for root in scene.roots() {
            collect(root, &mut paths);
        }
        let mut deduped = paths.clone();
        deduped.sort();
        deduped.dedup();
        assert_eq!(paths.len(), deduped.len());
    }
}
