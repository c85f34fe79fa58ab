//! Protected road block registry.
//!
//! Ties the validator, the chunk cache and the store together. Everything
//! here runs on the game tick thread.

use std::collections::{HashSet, VecDeque};
use std::num::NonZeroUsize;
use std::sync::Arc;

use roadblock_storage::{BlockStore, BoundingBox, ChunkKey, ProtectedRecord, RecordKey};

use crate::cache::ChunkCache;
use crate::failure::{StoreOp, or_default};
use crate::location::{BlockLocation, InvalidReason, RawLocation, ValidLocation, locations_from_records};
use crate::materials::MaterialsProvider;
use crate::world::{Material, WorldAccess};

/// Default ceiling on flood fill size.
pub const DEFAULT_FILL_LIMIT: usize = 1024;

/// Horizontal 4-neighbourhood used by the flood fill.
const NEIGHBOURS: [(i32, i32); 4] = [(1, 0), (-1, 0), (0, 1), (0, -1)];

/// Protection state of a position, recomputed on every call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoadBlockStatus {
    Protected(ValidLocation),
    Unprotected(ValidLocation),
    Invalid(InvalidReason),
}

pub struct BlockRegistry {
    store: Arc<dyn BlockStore>,
    worlds: Arc<dyn WorldAccess>,
    materials: Arc<dyn MaterialsProvider>,
    cache: ChunkCache,
    fill_limit: usize,
}

impl BlockRegistry {
    pub fn new(
        store: Arc<dyn BlockStore>,
        worlds: Arc<dyn WorldAccess>,
        materials: Arc<dyn MaterialsProvider>,
        cache_capacity: NonZeroUsize,
    ) -> Self {
        let cache = ChunkCache::new(store.clone(), worlds.clone(), cache_capacity);
        Self {
            store,
            worlds,
            materials,
            cache,
            fill_limit: DEFAULT_FILL_LIMIT,
        }
    }

    pub fn with_fill_limit(mut self, fill_limit: usize) -> Self {
        self.fill_limit = fill_limit;
        self
    }

    pub fn fill_limit(&self) -> usize {
        self.fill_limit
    }

    /// Keep only locations whose world is still loaded, and collect the
    /// chunks they fall in.
    fn still_loaded<'a>(&self, locations: impl IntoIterator<Item = &'a ValidLocation>) -> (Vec<&'a ValidLocation>, HashSet<ChunkKey>) {
        let mut kept = Vec::new();
        let mut chunks = HashSet::new();
        for location in locations {
            if self.worlds.world(location.world_id()).is_none() {
                log::debug!("Ignoring {}: world unloaded since validation", location);
                continue;
            }
            chunks.insert(location.chunk());
            kept.push(location);
        }
        (kept, chunks)
    }

    /// Protect the given blocks. Returns how many were newly stored.
    pub fn protect<'a>(&self, locations: impl IntoIterator<Item = &'a ValidLocation>) -> usize {
        let (locations, chunks) = self.still_loaded(locations);
        if locations.is_empty() {
            return 0;
        }
        let records: Vec<ProtectedRecord> = locations.iter().map(|l| l.to_record()).collect();
        let inserted = or_default(StoreOp::Insert, self.store.insert_all(&records));
        for chunk in chunks {
            self.cache.invalidate(chunk);
        }
        log::debug!("Protected {} of {} road blocks", inserted, records.len());
        inserted
    }

    /// Remove protection from the given blocks. Returns how many were removed.
    pub fn unprotect<'a>(&self, locations: impl IntoIterator<Item = &'a ValidLocation>) -> usize {
        let (locations, chunks) = self.still_loaded(locations);
        if locations.is_empty() {
            return 0;
        }
        let keys: Vec<RecordKey> = locations.iter().map(|l| l.key()).collect();
        let deleted = or_default(StoreOp::Delete, self.store.delete_all(&keys));
        for chunk in chunks {
            self.cache.invalidate(chunk);
        }
        log::debug!("Unprotected {} of {} road blocks", deleted, keys.len());
        deleted
    }

    pub fn is_protected(&self, location: &ValidLocation) -> bool {
        self.cache.get(location.chunk()).contains(location)
    }

    pub fn status(&self, raw: Option<&RawLocation>) -> RoadBlockStatus {
        match BlockLocation::validate(raw, self.worlds.as_ref()) {
            BlockLocation::Invalid(reason) => RoadBlockStatus::Invalid(reason),
            BlockLocation::Valid(location) if self.is_protected(&location) => RoadBlockStatus::Protected(location),
            BlockLocation::Valid(location) => RoadBlockStatus::Unprotected(location),
        }
    }

    /// Material test only; does not look at the store.
    pub fn is_road_block_material(&self, material: &Material) -> bool {
        self.materials.is_road_block_material(material)
    }

    /// Material test against the live block; does not look at the store.
    pub fn is_road_block(&self, location: &ValidLocation) -> bool {
        self.materials.is_road_block(self.worlds.as_ref(), location)
    }

    pub fn blocks_in_chunk(&self, chunk: ChunkKey) -> HashSet<ValidLocation> {
        (*self.cache.get(chunk)).clone()
    }

    /// Protected blocks within `distance` horizontally of `origin`, any height.
    /// Goes straight to the store since the box can span many chunks.
    pub fn nearby_blocks(&self, origin: &ValidLocation, distance: i32) -> HashSet<ValidLocation> {
        let bounds = BoundingBox::around(origin.x(), origin.z(), distance);
        let records = or_default(
            StoreOp::SelectBox,
            self.store.select_by_bounding_box(origin.world_id(), bounds),
        );
        locations_from_records(records, self.worlds.as_ref())
    }

    /// Every stored block whose world is loaded.
    pub fn all_blocks(&self) -> HashSet<ValidLocation> {
        let records = or_default(StoreOp::SelectAll, self.store.select_all());
        locations_from_records(records, self.worlds.as_ref())
    }

    pub fn count(&self) -> u64 {
        or_default(StoreOp::Count, self.store.count())
    }

    /// Breadth-first search from `start` over same-height, 4-connected
    /// neighbours whose live material passes `materials`.
    ///
    /// Stops once `fill_limit` blocks are collected. Never touches the
    /// store; callers decide what to do with the result.
    pub fn fill(&self, start: &ValidLocation, materials: &dyn MaterialsProvider) -> HashSet<ValidLocation> {
        let mut visited = HashSet::new();
        if self.fill_limit == 0 || !materials.is_road_block(self.worlds.as_ref(), start) {
            return visited;
        }

        let mut frontier = VecDeque::new();
        visited.insert(start.clone());
        frontier.push_back(start.clone());

        while let Some(current) = frontier.pop_front() {
            for (dx, dz) in NEIGHBOURS {
                if visited.len() >= self.fill_limit {
                    log::debug!("Fill from {} hit the limit of {} blocks", start, self.fill_limit);
                    return visited;
                }
                let next = current.offset(dx, 0, dz);
                if visited.contains(&next) || !materials.is_road_block(self.worlds.as_ref(), &next) {
                    continue;
                }
                visited.insert(next.clone());
                frontier.push_back(next);
            }
        }
        visited
    }

    /// Whether a protected road block sits within `distance` blocks straight
    /// below `location`. Both the material and the protection must hold.
    pub fn is_above_road(&self, location: &ValidLocation, distance: i32) -> bool {
        for depth in 1..=distance.max(0) {
            let below = location.offset(0, -depth, 0);
            match self.worlds.material_at(below.world_id(), below.pos()) {
                None => return false,
                Some(material) => {
                    if self.materials.is_road_block_material(&material) && self.is_protected(&below) {
                        return true;
                    }
                }
            }
        }
        false
    }

    pub fn flush_cache(&self, chunk: ChunkKey) {
        if self.cache.invalidate(chunk) {
            log::debug!("Flushed road block cache for chunk ({}, {})", chunk.x, chunk.z);
        }
    }

    pub fn is_chunk_cached(&self, location: &ValidLocation) -> bool {
        self.cache.is_cached(location.chunk())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::materials::MaterialSet;
    use crate::test_support::FakeWorlds;
    use crate::world::BlockPos;
    use roadblock_storage::SCHEMA_VERSION;
    use roadblock_storage::sqlite::SqliteStore;
    use uuid::Uuid;

    const PATH: &str = "minecraft:dirt_path";

    struct Fixture {
        store: Arc<SqliteStore>,
        worlds: Arc<FakeWorlds>,
        registry: BlockRegistry,
        world: Uuid,
    }

    impl Fixture {
        fn new() -> Self {
            let store = Arc::new(SqliteStore::open_in_memory().unwrap());
            store.initialize(SCHEMA_VERSION).unwrap();
            let worlds = Arc::new(FakeWorlds::new());
            let world = worlds.add_world("world");
            let registry = BlockRegistry::new(
                store.clone(),
                worlds.clone(),
                Arc::new(MaterialSet::new([PATH])),
                NonZeroUsize::new(64).unwrap(),
            );
            Self { store, worlds, registry, world }
        }

        fn at(&self, x: i32, y: i32, z: i32) -> ValidLocation {
            BlockLocation::validate(
                Some(&RawLocation::new(Some(self.world), x as f64, y as f64, z as f64)),
                self.worlds.as_ref(),
            )
            .valid()
            .unwrap()
        }
    }

    #[test]
    fn test_protect_then_unprotect_round_trip() {
        let fx = Fixture::new();
        let location = fx.at(3, 64, -7);

        assert!(!fx.registry.is_protected(&location));
        assert_eq!(fx.registry.protect([&location]), 1);
        assert!(fx.registry.is_protected(&location));

        assert_eq!(fx.registry.unprotect([&location]), 1);
        assert!(!fx.registry.is_protected(&location));
    }

    #[test]
    fn test_protect_twice_inserts_once() {
        let fx = Fixture::new();
        let location = fx.at(0, 64, 0);

        assert_eq!(fx.registry.protect([&location]), 1);
        let count = fx.store.count().unwrap();
        assert_eq!(fx.registry.protect([&location]), 0);
        assert_eq!(fx.store.count().unwrap(), count);
        assert_eq!(fx.registry.count(), 1);
    }

    #[test]
    fn test_protect_refreshes_cached_chunk() {
        let fx = Fixture::new();
        let first = fx.at(1, 64, 1);
        let second = fx.at(2, 64, 2);
        let chunk = first.chunk();

        fx.registry.protect([&first]);
        fx.registry.flush_cache(chunk);
        assert!(!fx.registry.is_chunk_cached(&first));

        fx.registry.blocks_in_chunk(chunk);
        assert!(fx.registry.is_chunk_cached(&first));

        fx.registry.protect([&second]);
        let blocks = fx.registry.blocks_in_chunk(chunk);
        assert!(blocks.contains(&first));
        assert!(blocks.contains(&second));
    }

    #[test]
    fn test_protect_skips_unloaded_worlds() {
        let fx = Fixture::new();
        let location = fx.at(0, 64, 0);
        fx.worlds.unload(fx.world);

        assert_eq!(fx.registry.protect([&location]), 0);
        assert_eq!(fx.store.count().unwrap(), 0);
    }

    #[test]
    fn test_protection_survives_world_reload() {
        let fx = Fixture::new();
        let location = fx.at(3, 64, 3);
        assert_eq!(fx.registry.protect([&location]), 1);

        fx.worlds.unload(fx.world);
        assert!(!fx.registry.is_protected(&location));
        assert!(!fx.registry.is_chunk_cached(&location));

        fx.worlds.load(fx.world, "world");
        assert!(fx.registry.is_protected(&location));
        assert_eq!(fx.store.count().unwrap(), 1);
    }

    #[test]
    fn test_status_state_machine() {
        let fx = Fixture::new();
        let raw = RawLocation::new(Some(fx.world), 5.2, 70.0, 5.9);
        let location = fx.at(5, 70, 5);

        assert_eq!(fx.registry.status(None), RoadBlockStatus::Invalid(InvalidReason::LocationNull));
        assert_eq!(fx.registry.status(Some(&raw)), RoadBlockStatus::Unprotected(location.clone()));

        fx.registry.protect([&location]);
        assert_eq!(fx.registry.status(Some(&raw)), RoadBlockStatus::Protected(location));
    }

    #[test]
    fn test_material_and_protection_are_independent() {
        let fx = Fixture::new();
        let path = fx.at(0, 64, 0);
        let stone = fx.at(1, 64, 0);
        fx.worlds.set_block(fx.world, path.pos(), PATH);
        fx.worlds.set_block(fx.world, stone.pos(), "minecraft:stone");
        fx.registry.protect([&stone]);

        assert!(fx.registry.is_road_block(&path));
        assert!(!fx.registry.is_protected(&path));
        assert!(!fx.registry.is_road_block(&stone));
        assert!(fx.registry.is_protected(&stone));
        assert!(fx.registry.is_road_block_material(&Material::from(PATH)));
    }

    #[test]
    fn test_nearby_blocks_bounds_are_inclusive() {
        let fx = Fixture::new();
        let origin = fx.at(0, 64, 0);
        let edge = fx.at(5, 64, 0);
        let corner = fx.at(-5, 10, 5);
        let outside = fx.at(6, 64, 0);
        fx.registry.protect([&edge, &corner, &outside]);

        let nearby = fx.registry.nearby_blocks(&origin, 5);

        assert!(nearby.contains(&edge));
        assert!(nearby.contains(&corner));
        assert!(!nearby.contains(&outside));
    }

    #[test]
    fn test_fill_stays_on_one_level_and_follows_edges() {
        let fx = Fixture::new();
        // an L-shaped path at y=64, a diagonal-only neighbour, and path one level up
        fx.worlds.paint(fx.world, (0, 4), (0, 0), 64, PATH);
        fx.worlds.paint(fx.world, (4, 4), (1, 3), 64, PATH);
        fx.worlds.set_block(fx.world, BlockPos::new(5, 64, 4), PATH);
        fx.worlds.set_block(fx.world, BlockPos::new(0, 65, 1), PATH);
        let materials = MaterialSet::new([PATH]);

        let fill = fx.registry.fill(&fx.at(0, 64, 0), &materials);

        assert_eq!(fill.len(), 8);
        assert!(fill.contains(&fx.at(4, 64, 3)));
        assert!(!fill.contains(&fx.at(5, 64, 4)));
        assert!(fill.iter().all(|l| l.y() == 64));
        assert_eq!(fx.store.count().unwrap(), 0);
    }

    #[test]
    fn test_fill_is_bounded() {
        let fx = Fixture::new();
        fx.worlds.paint(fx.world, (-20, 20), (-20, 20), 64, PATH);
        let limited = BlockRegistry::new(
            fx.store.clone(),
            fx.worlds.clone(),
            Arc::new(MaterialSet::new([PATH])),
            NonZeroUsize::new(4).unwrap(),
        )
        .with_fill_limit(100);

        let fill = limited.fill(&fx.at(0, 64, 0), &MaterialSet::new([PATH]));

        assert_eq!(fill.len(), 100);
    }

    #[test]
    fn test_fill_from_non_road_is_empty() {
        let fx = Fixture::new();
        fx.worlds.set_block(fx.world, BlockPos::new(1, 64, 0), PATH);

        let fill = fx.registry.fill(&fx.at(0, 64, 0), &MaterialSet::new([PATH]));

        assert!(fill.is_empty());
    }

    #[test]
    fn test_is_above_road_needs_material_and_protection() {
        let fx = Fixture::new();
        let road = fx.at(0, 64, 0);
        fx.worlds.set_block(fx.world, road.pos(), PATH);

        assert!(!fx.registry.is_above_road(&fx.at(0, 66, 0), 3));

        fx.registry.protect([&road]);
        assert!(fx.registry.is_above_road(&fx.at(0, 66, 0), 3));
        assert!(fx.registry.is_above_road(&fx.at(0, 65, 0), 1));
        assert!(!fx.registry.is_above_road(&fx.at(0, 68, 0), 3));

        fx.worlds.set_block(fx.world, road.pos(), "minecraft:stone");
        assert!(!fx.registry.is_above_road(&fx.at(0, 66, 0), 3));
    }

    #[test]
    fn test_store_failure_degrades_to_empty() {
        let fx = Fixture::new();
        let location = fx.at(0, 64, 0);
        fx.store.close().unwrap();

        assert_eq!(fx.registry.protect([&location]), 0);
        assert!(!fx.registry.is_protected(&location));
        assert!(!fx.registry.is_chunk_cached(&location));
        assert!(fx.registry.nearby_blocks(&location, 8).is_empty());
        assert!(fx.registry.all_blocks().is_empty());
        assert_eq!(fx.registry.count(), 0);
    }

    #[test]
    fn test_all_blocks_skips_unloaded_worlds() {
        let fx = Fixture::new();
        let other = fx.worlds.add_world("nether");
        let here = fx.at(0, 64, 0);
        let there = BlockLocation::validate(
            Some(&RawLocation::new(Some(other), 0.0, 64.0, 0.0)),
            fx.worlds.as_ref(),
        )
        .valid()
        .unwrap();
        fx.registry.protect([&here, &there]);
        fx.worlds.unload(other);

        let all = fx.registry.all_blocks();

        assert_eq!(all.len(), 1);
        assert!(all.contains(&here));
        assert_eq!(fx.registry.count(), 2);
    }
}
