use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use roadblock_storage::BlockStore;
use roadblock_storage::postgres::PostgresStore;
use roadblock_storage::sqlite::SqliteStore;
use serde::{Deserialize, Serialize};

use crate::materials::MaterialSet;
use crate::registry::DEFAULT_FILL_LIMIT;
use crate::timer::Tick;
use crate::world::Material;

/// Where road blocks are persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StorageConfig {
    Sqlite { path: PathBuf },
    Postgres { url: String },
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::Sqlite {
            path: PathBuf::from("road_blocks.db"),
        }
    }
}

impl StorageConfig {
    pub fn open_store(&self) -> Result<Arc<dyn BlockStore>> {
        let store: Arc<dyn BlockStore> = match self {
            Self::Sqlite { path } => Arc::new(SqliteStore::open(path)?),
            Self::Postgres { url } => Arc::new(PostgresStore::connect(url)?),
        };
        Ok(store)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub storage: StorageConfig,
    /// Materials that count as road surface.
    pub materials: Vec<Material>,
    /// Most blocks a single flood fill may collect.
    pub fill_limit: usize,
    /// How long a highlight stays visible.
    pub highlight_ticks: Tick,
    pub highlight_protect_material: Material,
    pub highlight_unprotect_material: Material,
    /// Chunks kept in the road block cache.
    pub cache_chunks: usize,
    /// How far below a placed block to look for a protected road.
    pub above_road_depth: i32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            storage: StorageConfig::default(),
            materials: vec![Material::from("minecraft:dirt_path")],
            fill_limit: DEFAULT_FILL_LIMIT,
            highlight_ticks: 100,
            highlight_protect_material: Material::from("minecraft:lime_stained_glass"),
            highlight_unprotect_material: Material::from("minecraft:red_stained_glass"),
            cache_chunks: 4096,
            above_road_depth: 3,
        }
    }
}

impl Settings {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings from {}", path.display()))?;
        let settings: Self = serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse settings in {}", path.display()))?;
        if settings.materials.is_empty() {
            log::warn!("No road materials configured in {}; nothing will count as road", path.display());
        }
        Ok(settings)
    }

    pub fn material_set(&self) -> MaterialSet {
        MaterialSet::new(self.materials.iter().cloned())
    }

    pub fn cache_capacity(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.cache_chunks).unwrap_or(NonZeroUsize::MIN)
    }
}
