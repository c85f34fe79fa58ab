//! World model shared by the registry and the highlight scheduler.
//!
//! Nothing here holds a live world. `WorldAccess` is asked again every time,
//! because worlds can unload between two ticks.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type WorldId = Uuid;
pub type PlayerId = Uuid;

/// Namespaced block material, e.g. `minecraft:dirt_path`.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Material(String);

impl Material {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Material {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl fmt::Display for Material {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of a world. Lookups go by `id`; `name` is for humans and logs.
#[derive(Debug, Clone, Hash, Eq, PartialEq)]
pub struct WorldRef {
    pub name: String,
    pub id: WorldId,
}

impl WorldRef {
    pub fn new(name: impl Into<String>, id: WorldId) -> Self {
        Self { name: name.into(), id }
    }
}

/// Block-resolution coordinates.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, PartialOrd, Ord)]
pub struct BlockPos {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl BlockPos {
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    pub fn offset(self, dx: i32, dy: i32, dz: i32) -> Self {
        Self {
            x: self.x.saturating_add(dx),
            y: self.y.saturating_add(dy),
            z: self.z.saturating_add(dz),
        }
    }
}

/// Access to the live game worlds.
pub trait WorldAccess {
    /// The world with this id, if it is currently loaded.
    fn world(&self, id: WorldId) -> Option<WorldRef>;

    /// Current material at `pos`, or `None` if the world is not loaded.
    fn material_at(&self, world: WorldId, pos: BlockPos) -> Option<Material>;
}
