//! Screen-space overlay panels

use std::collections::BTreeMap;

use glam::{Mat4, Vec3};

use crate::resources::{Handle, MaterialInstance, MeshResource};

/// Identifies a panel for its whole lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PanelId(pub u32);

/// A builtin quad drawn with a material in normalized device coordinates
#[derive(Debug, Clone)]
pub struct Panel {
    pub mesh: Handle<MeshResource>,
    pub material: Handle<MaterialInstance>,
    pub transform: Mat4,
}

impl Panel {
    /// Quad scaled by `xscale` and `yscale` around the screen center
    pub fn scaled(
        mesh: Handle<MeshResource>,
        material: Handle<MaterialInstance>,
        xscale: f32,
        yscale: f32,
    ) -> Self {
        Self {
            mesh,
            material,
            transform: Mat4::from_scale(Vec3::new(xscale, yscale, 1.0)),
        }
    }
}

/// Panels drawn at the end of every frame, in creation order
#[derive(Debug)]
pub struct PanelSet {
    panels: BTreeMap<PanelId, Panel>,
    next_id: u32,
}

impl Default for PanelSet {
    fn default() -> Self {
        Self {
            panels: BTreeMap::new(),
            next_id: 1,
        }
    }
}

impl PanelSet {
    pub fn insert(&mut self, panel: Panel) -> PanelId {
        let id = PanelId(self.next_id);
        self.next_id += 1;
        self.panels.insert(id, panel);
        id
    }

    pub fn remove(&mut self, id: PanelId) -> Option<Panel> {
        self.panels.remove(&id)
    }

    pub fn get(&self, id: PanelId) -> Option<&Panel> {
        self.panels.get(&id)
    }

    pub fn get_mut(&mut self, id: PanelId) -> Option<&mut Panel> {
        self.panels.get_mut(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (PanelId, &Panel)> {
        self.panels.iter().map(|(id, panel)| (*id, panel))
    }

    pub fn len(&self) -> usize {
        self.panels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.panels.is_empty()
    }

    pub fn clear(&mut self) {
        self.panels.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::ResourceCache;

    fn panel(xscale: f32, yscale: f32) -> Panel {
        let meshes: ResourceCache<String, MeshResource> = ResourceCache::new();
        let materials: ResourceCache<String, MaterialInstance> = ResourceCache::new();
        Panel::scaled(
            meshes.insert_pinned("quad".to_string(), MeshResource::default()),
            materials.insert_pinned("gui".to_string(), MaterialInstance::default()),
            xscale,
            yscale,
        )
    }

    #[test]
    fn test_scaled_panel_transform() {
        let p = panel(0.5, 0.25);
        assert_eq!(p.transform.transform_point3(Vec3::new(1.0, 1.0, 0.3)), Vec3::new(0.5, 0.25, 0.3));
    }

    #[test]
    fn test_ids_are_never_reused() {
        let mut set = PanelSet::default();
        let a = set.insert(panel(1.0, 1.0));
        let b = set.insert(panel(1.0, 1.0));
        assert!(set.remove(a).is_some());
        assert!(set.remove(a).is_none());
        let c = set.insert(panel(1.0, 1.0));

        assert_ne!(c, a);
        assert_eq!(set.iter().map(|(id, _)| id).collect::<Vec<_>>(), vec![b, c]);
        assert_eq!(set.len(), 2);
    }
}
