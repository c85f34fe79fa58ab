use anyhow::Result;
use uuid::Uuid;

pub mod migrate;
pub mod postgres;
pub mod sqlite;

pub use migrate::{MigrationOutcome, SchemaMigrator};

/// Current on-disk layout generation.
pub const SCHEMA_VERSION: i64 = 1;

/// Side length of a chunk in blocks, as a shift.
pub const CHUNK_SHIFT: i32 = 4;

/// Convert a block coordinate to the coordinate of the chunk containing it.
#[inline]
pub fn block_to_chunk(coord: i32) -> i32 {
    coord >> CHUNK_SHIFT
}

/// Splits a world id into the signed (high, low) pair the tables store.
#[inline]
pub fn split_world_id(id: Uuid) -> (i64, i64) {
    let (msb, lsb) = id.as_u64_pair();
    (msb as i64, lsb as i64)
}

#[inline]
pub fn join_world_id(msb: i64, lsb: i64) -> Uuid {
    Uuid::from_u64_pair(msb as u64, lsb as u64)
}

/// A chunk of a specific world. Secondary index key and cache shard key.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq)]
pub struct ChunkKey {
    pub world: Uuid,
    pub x: i32,
    pub z: i32,
}

impl ChunkKey {
    pub fn new(world: Uuid, x: i32, z: i32) -> Self {
        Self { world, x, z }
    }

    /// Chunk containing the block at (x, z).
    pub fn of_block(world: Uuid, x: i32, z: i32) -> Self {
        Self::new(world, block_to_chunk(x), block_to_chunk(z))
    }
}

/// Primary key of a protected coordinate.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq)]
pub struct RecordKey {
    pub world: Uuid,
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

/// One persisted, protected coordinate.
///
/// Rows are never updated in place. Moving a road block is a delete followed
/// by an insert.
#[derive(Debug, Clone, Hash, Eq, PartialEq)]
pub struct ProtectedRecord {
    pub world_name: String,
    pub world_id: Uuid,
    pub x: i32,
    pub y: i32,
    pub z: i32,
    pub chunk_x: i32,
    pub chunk_z: i32,
}

impl ProtectedRecord {
    pub fn new(world_name: impl Into<String>, world_id: Uuid, x: i32, y: i32, z: i32) -> Self {
        Self {
            world_name: world_name.into(),
            world_id,
            x,
            y,
            z,
            chunk_x: block_to_chunk(x),
            chunk_z: block_to_chunk(z),
        }
    }

    pub fn key(&self) -> RecordKey {
        RecordKey {
            world: self.world_id,
            x: self.x,
            y: self.y,
            z: self.z,
        }
    }

    pub fn chunk(&self) -> ChunkKey {
        ChunkKey::new(self.world_id, self.chunk_x, self.chunk_z)
    }
}

/// Horizontal box, inclusive on both ends. Y is never filtered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundingBox {
    pub x_min: i32,
    pub x_max: i32,
    pub z_min: i32,
    pub z_max: i32,
}

impl BoundingBox {
    /// Box reaching `distance` blocks out from (x, z) in every horizontal direction.
    pub fn around(x: i32, z: i32, distance: i32) -> Self {
        let d = distance.abs();
        Self {
            x_min: x.saturating_sub(d),
            x_max: x.saturating_add(d),
            z_min: z.saturating_sub(d),
            z_max: z.saturating_add(d),
        }
    }

    pub fn contains(&self, x: i32, z: i32) -> bool {
        (self.x_min..=self.x_max).contains(&x) && (self.z_min..=self.z_max).contains(&z)
    }
}

/// Durable storage for protected coordinates plus the schema version slot.
///
/// Implementations:
/// - `SqliteStore` - embedded single file (or `:memory:` for tests)
/// - `PostgresStore` - pooled PostgreSQL for shared deployments
///
/// Every method touching the database may fail. Callers at the registry
/// boundary decide how to degrade; backends only report.
pub trait BlockStore: Send + Sync {
    /// Insert records whose primary key is absent. Returns how many rows
    /// were actually added; duplicates are skipped and not counted.
    fn insert_all(&self, records: &[ProtectedRecord]) -> Result<usize>;

    /// Delete the given primary keys. Absent keys are ignored.
    fn delete_all(&self, keys: &[RecordKey]) -> Result<usize>;

    fn select_all(&self) -> Result<Vec<ProtectedRecord>>;

    /// Rows in one chunk, served by the secondary index.
    fn select_by_chunk(&self, chunk: ChunkKey) -> Result<Vec<ProtectedRecord>>;

    fn select_by_bounding_box(&self, world: Uuid, bounds: BoundingBox) -> Result<Vec<ProtectedRecord>>;

    fn count(&self) -> Result<u64>;

    /// Reads the version slot. `None` means the slot was never written.
    fn schema_version(&self) -> Result<Option<i64>>;

    /// True if a generation-0 table is present.
    fn legacy_layout_present(&self) -> Result<bool>;

    /// Create the current table, index and version slot on an empty database.
    fn initialize(&self, version: i64) -> Result<()>;

    /// Rewrite the legacy table into the current layout and advance the
    /// version slot, atomically. Returns the number of rows carried over.
    fn migrate_legacy(&self, version: i64) -> Result<usize>;

    /// Flush and release the underlying connection(s).
    fn close(&self) -> Result<()> {
        Ok(())
    }
}
