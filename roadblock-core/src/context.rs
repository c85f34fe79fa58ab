use std::sync::Arc;

use anyhow::Result;
use roadblock_storage::{BlockStore, ChunkKey, MigrationOutcome, SchemaMigrator};

use crate::highlight::{BlockDisplay, HighlightScheduler};
use crate::location::ValidLocation;
use crate::registry::BlockRegistry;
use crate::settings::Settings;
use crate::world::{PlayerId, WorldAccess};

/// Everything the game-side handlers need, built once at startup and passed
/// to them explicitly.
pub struct RoadContext {
    settings: Settings,
    store: Arc<dyn BlockStore>,
    registry: BlockRegistry,
    highlights: HighlightScheduler,
    migration: MigrationOutcome,
}

impl RoadContext {
    /// Migrate the store, then build the registry and the highlight
    /// scheduler over it. A failed migration is logged and startup goes on
    /// against whatever tables exist.
    pub fn open(
        settings: Settings,
        store: Arc<dyn BlockStore>,
        worlds: Arc<dyn WorldAccess>,
        display: Arc<dyn BlockDisplay>,
    ) -> Self {
        let migration = SchemaMigrator::new(store.as_ref()).run();
        if migration == MigrationOutcome::Failed {
            log::warn!("Road block schema migration failed; continuing with existing tables");
        }

        let registry = BlockRegistry::new(
            store.clone(),
            worlds.clone(),
            Arc::new(settings.material_set()),
            settings.cache_capacity(),
        )
        .with_fill_limit(settings.fill_limit);
        let highlights = HighlightScheduler::new(display, worlds, &settings);

        log::info!("Road block registry ready ({} materials, fill limit {})", settings.materials.len(), settings.fill_limit);
        Self {
            settings,
            store,
            registry,
            highlights,
            migration,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn registry(&self) -> &BlockRegistry {
        &self.registry
    }

    pub fn highlights(&mut self) -> &mut HighlightScheduler {
        &mut self.highlights
    }

    pub fn migration(&self) -> MigrationOutcome {
        self.migration
    }

    /// Call once per game tick.
    pub fn tick(&mut self) {
        self.highlights.tick();
    }

    pub fn on_chunk_unload(&self, chunk: ChunkKey) {
        self.registry.flush_cache(chunk);
    }

    pub fn on_player_disconnect(&mut self, player: PlayerId) {
        self.highlights.on_player_disconnect(player);
    }

    /// Whether placing a block at `location` would sit on a protected road,
    /// probing the configured depth.
    pub fn is_over_road(&self, location: &ValidLocation) -> bool {
        self.registry.is_above_road(location, self.settings.above_road_depth)
    }

    /// Restore pending highlights and close the store.
    pub fn shutdown(mut self) -> Result<()> {
        self.highlights.clear_all();
        self.store.close()?;
        log::info!("Road block registry shut down");
        Ok(())
    }
}
