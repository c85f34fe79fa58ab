//! Turns raw positions and stored rows into checked block locations.

use std::collections::HashSet;
use std::fmt;
use std::hash::{Hash, Hasher};

use roadblock_storage::{ChunkKey, ProtectedRecord, RecordKey, block_to_chunk};
use uuid::Uuid;

use crate::world::{BlockPos, WorldAccess, WorldId, WorldRef};

/// Position as handed over by the game: optional world, fractional coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawLocation {
    pub world: Option<WorldId>,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl RawLocation {
    pub fn new(world: Option<WorldId>, x: f64, y: f64, z: f64) -> Self {
        Self { world, x, y, z }
    }
}

#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq)]
pub enum InvalidReason {
    LocationNull,
    WorldNull,
    WorldUnloaded,
    WorldNameNull,
    WorldNameBlank,
    WorldUidNull,
}

impl fmt::Display for InvalidReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::LocationNull => "location is missing",
            Self::WorldNull => "world is missing",
            Self::WorldUnloaded => "world is not loaded",
            Self::WorldNameNull => "world name is missing",
            Self::WorldNameBlank => "world name is blank",
            Self::WorldUidNull => "world id is missing",
        };
        f.write_str(text)
    }
}

/// A block in a world that was loaded when this value was built.
///
/// The world may have unloaded since; consumers that touch the world must
/// ask `WorldAccess` again. Equality and hashing use the world id and the
/// coordinates only, so a renamed world still matches its stored rows.
#[derive(Debug, Clone)]
pub struct ValidLocation {
    world: WorldRef,
    pos: BlockPos,
}

impl ValidLocation {
    fn new(world: WorldRef, pos: BlockPos) -> Self {
        Self { world, pos }
    }

    pub fn world(&self) -> &WorldRef {
        &self.world
    }

    pub fn world_id(&self) -> WorldId {
        self.world.id
    }

    pub fn pos(&self) -> BlockPos {
        self.pos
    }

    pub fn x(&self) -> i32 {
        self.pos.x
    }

    pub fn y(&self) -> i32 {
        self.pos.y
    }

    pub fn z(&self) -> i32 {
        self.pos.z
    }

    pub fn chunk_x(&self) -> i32 {
        block_to_chunk(self.pos.x)
    }

    pub fn chunk_z(&self) -> i32 {
        block_to_chunk(self.pos.z)
    }

    pub fn chunk(&self) -> ChunkKey {
        ChunkKey::new(self.world.id, self.chunk_x(), self.chunk_z())
    }

    /// Same world, shifted coordinates.
    pub fn offset(&self, dx: i32, dy: i32, dz: i32) -> Self {
        Self::new(self.world.clone(), self.pos.offset(dx, dy, dz))
    }

    pub fn key(&self) -> RecordKey {
        RecordKey {
            world: self.world.id,
            x: self.pos.x,
            y: self.pos.y,
            z: self.pos.z,
        }
    }

    pub fn to_record(&self) -> ProtectedRecord {
        ProtectedRecord::new(self.world.name.clone(), self.world.id, self.pos.x, self.pos.y, self.pos.z)
    }
}

impl PartialEq for ValidLocation {
    fn eq(&self, other: &Self) -> bool {
        self.world.id == other.world.id && self.pos == other.pos
    }
}

impl Eq for ValidLocation {}

impl Hash for ValidLocation {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.world.id.hash(state);
        self.pos.hash(state);
    }
}

impl fmt::Display for ValidLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({}, {}, {})", self.world.name, self.pos.x, self.pos.y, self.pos.z)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockLocation {
    Valid(ValidLocation),
    Invalid(InvalidReason),
}

impl BlockLocation {
    /// Check a position coming from the game.
    pub fn validate(raw: Option<&RawLocation>, worlds: &dyn WorldAccess) -> Self {
        let Some(raw) = raw else {
            return Self::Invalid(InvalidReason::LocationNull);
        };
        let Some(world_id) = raw.world else {
            return Self::Invalid(InvalidReason::WorldNull);
        };
        let Some(world) = worlds.world(world_id) else {
            return Self::Invalid(InvalidReason::WorldUnloaded);
        };
        let pos = BlockPos::new(raw.x.floor() as i32, raw.y.floor() as i32, raw.z.floor() as i32);
        Self::Valid(ValidLocation::new(world, pos))
    }

    /// Check a position described by world name and id, as read back from storage.
    pub fn from_parts(
        world_name: Option<&str>,
        world_id: Option<Uuid>,
        pos: BlockPos,
        worlds: &dyn WorldAccess,
    ) -> Self {
        let Some(name) = world_name else {
            return Self::Invalid(InvalidReason::WorldNameNull);
        };
        if name.trim().is_empty() {
            return Self::Invalid(InvalidReason::WorldNameBlank);
        }
        let Some(world_id) = world_id else {
            return Self::Invalid(InvalidReason::WorldUidNull);
        };
        match worlds.world(world_id) {
            Some(world) => Self::Valid(ValidLocation::new(world, pos)),
            None => Self::Invalid(InvalidReason::WorldUnloaded),
        }
    }

    pub fn from_record(record: &ProtectedRecord, worlds: &dyn WorldAccess) -> Self {
        Self::from_parts(
            Some(&record.world_name),
            Some(record.world_id),
            BlockPos::new(record.x, record.y, record.z),
            worlds,
        )
    }

    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid(_))
    }

    pub fn valid(self) -> Option<ValidLocation> {
        match self {
            Self::Valid(location) => Some(location),
            Self::Invalid(_) => None,
        }
    }
}

/// Re-validate stored rows. Rows whose world cannot be resolved are logged
/// and left out.
pub fn locations_from_records(records: Vec<ProtectedRecord>, worlds: &dyn WorldAccess) -> HashSet<ValidLocation> {
    let mut locations = HashSet::with_capacity(records.len());
    for record in records {
        match BlockLocation::from_record(&record, worlds) {
            BlockLocation::Valid(location) => {
                locations.insert(location);
            }
            BlockLocation::Invalid(reason) => log::warn!(
                "Dropping stored road block {}({}, {}, {}) in world {}: {}",
                record.world_name, record.x, record.y, record.z, record.world_id, reason
            ),
        }
    }
    locations
}
