//! roadblock-core: protected road blocks for a chunked game world.
//!
//! - `location` - turns raw positions into checked `BlockLocation`s
//! - `cache` - per-chunk, invalidate-on-write view of the store
//! - `registry` - protect/unprotect, membership, proximity and flood fill
//! - `highlight` - per-player, debounced client-side markers
//! - `context` - startup wiring handed to the game-side handlers
//!
//! All state here is owned by the game tick thread.

pub mod cache;
pub mod context;
pub mod failure;
pub mod highlight;
pub mod location;
pub mod materials;
pub mod registry;
pub mod settings;
pub mod timer;
pub mod world;

#[cfg(test)]
mod test_support;

pub use context::RoadContext;
pub use highlight::{BlockDisplay, HighlightScheduler, HighlightStyle};
pub use location::{BlockLocation, InvalidReason, RawLocation, ValidLocation};
pub use materials::{MaterialSet, MaterialsProvider};
pub use registry::{BlockRegistry, RoadBlockStatus};
pub use settings::{Settings, StorageConfig};
pub use world::{BlockPos, Material, PlayerId, WorldAccess, WorldId, WorldRef};
