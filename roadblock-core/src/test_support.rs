//! In-memory stand-ins for the game side, used by the unit tests.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;

use uuid::Uuid;

use crate::highlight::BlockDisplay;
use crate::location::ValidLocation;
use crate::world::{BlockPos, Material, PlayerId, WorldAccess, WorldId, WorldRef};

#[derive(Default)]
pub struct FakeWorlds {
    next_id: Cell<u128>,
    loaded: RefCell<HashMap<WorldId, WorldRef>>,
    blocks: RefCell<HashMap<(WorldId, BlockPos), Material>>,
}

impl FakeWorlds {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_world(&self, name: &str) -> WorldId {
        self.next_id.set(self.next_id.get() + 1);
        let id = Uuid::from_u128(0xfeed_0000_0000_0000_0000_0000_0000_0000 | self.next_id.get());
        self.loaded.borrow_mut().insert(id, WorldRef::new(name, id));
        id
    }

    pub fn unload(&self, id: WorldId) {
        self.loaded.borrow_mut().remove(&id);
    }

    /// Bring a world back under a known id, as after a server restart.
    pub fn load(&self, id: WorldId, name: &str) {
        self.loaded.borrow_mut().insert(id, WorldRef::new(name, id));
    }

    pub fn set_block(&self, world: WorldId, pos: BlockPos, material: &str) {
        self.blocks.borrow_mut().insert((world, pos), Material::from(material));
    }

    /// Paint an inclusive rectangle at height `y`.
    pub fn paint(&self, world: WorldId, x: (i32, i32), z: (i32, i32), y: i32, material: &str) {
        for bx in x.0..=x.1 {
            for bz in z.0..=z.1 {
                self.set_block(world, BlockPos::new(bx, y, bz), material);
            }
        }
    }
}

impl WorldAccess for FakeWorlds {
    fn world(&self, id: WorldId) -> Option<WorldRef> {
        self.loaded.borrow().get(&id).cloned()
    }

    fn material_at(&self, world: WorldId, pos: BlockPos) -> Option<Material> {
        if !self.loaded.borrow().contains_key(&world) {
            return None;
        }
        Some(
            self.blocks
                .borrow()
                .get(&(world, pos))
                .cloned()
                .unwrap_or_else(|| Material::from("minecraft:air")),
        )
    }
}

/// Records every block change sent to a player.
#[derive(Default)]
pub struct RecordingDisplay {
    pub sent: RefCell<Vec<(PlayerId, BlockPos, Material)>>,
}

impl RecordingDisplay {
    /// Last material a player was shown at `pos`.
    pub fn shown(&self, player: PlayerId, pos: BlockPos) -> Option<Material> {
        self.sent
            .borrow()
            .iter()
            .rev()
            .find(|(p, at, _)| *p == player && *at == pos)
            .map(|(_, _, m)| m.clone())
    }
}

impl BlockDisplay for RecordingDisplay {
    fn show_block(&self, player: PlayerId, location: &ValidLocation, material: &Material) {
        self.sent.borrow_mut().push((player, location.pos(), material.clone()));
    }
}
