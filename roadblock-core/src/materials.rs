use std::collections::HashSet;

use crate::location::ValidLocation;
use crate::world::{Material, WorldAccess};

/// Decides which materials count as road surface.
///
/// This is a material test only. Whether a coordinate is protected is a
/// separate question answered by the registry.
pub trait MaterialsProvider {
    fn is_road_block_material(&self, material: &Material) -> bool;

    /// Material test against whatever currently sits at `location`.
    fn is_road_block(&self, worlds: &dyn WorldAccess, location: &ValidLocation) -> bool {
        worlds
            .material_at(location.world_id(), location.pos())
            .is_some_and(|material| self.is_road_block_material(&material))
    }
}

/// Fixed set of road materials, usually built from `Settings`.
#[derive(Debug, Clone, Default)]
pub struct MaterialSet {
    materials: HashSet<Material>,
}

impl MaterialSet {
    pub fn new<I, M>(materials: I) -> Self
    where
        I: IntoIterator<Item = M>,
        M: Into<Material>,
    {
        Self {
            materials: materials.into_iter().map(Into::into).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.materials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.materials.is_empty()
    }
}

impl MaterialsProvider for MaterialSet {
    fn is_road_block_material(&self, material: &Material) -> bool {
        self.materials.contains(material)
    }
}
