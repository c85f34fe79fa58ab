use std::cell::RefCell;
use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::rc::Rc;
use std::sync::Arc;

use lru::LruCache;
use roadblock_storage::{BlockStore, ChunkKey};

use crate::failure::StoreOp;
use crate::location::{ValidLocation, locations_from_records};
use crate::world::WorldAccess;

pub type ChunkBlocks = Rc<HashSet<ValidLocation>>;

/// Per-chunk view of the store.
///
/// Entries are only ever filled from a full chunk load and only ever
/// dropped, never patched. Writers must call `invalidate` for every chunk
/// they touch. Bounded by an LRU so long sessions don't pin every chunk a
/// player has walked through.
pub struct ChunkCache {
    store: Arc<dyn BlockStore>,
    worlds: Arc<dyn WorldAccess>,
    entries: RefCell<LruCache<ChunkKey, ChunkBlocks>>,
}

impl ChunkCache {
    pub fn new(store: Arc<dyn BlockStore>, worlds: Arc<dyn WorldAccess>, capacity: NonZeroUsize) -> Self {
        Self {
            store,
            worlds,
            entries: RefCell::new(LruCache::new(capacity)),
        }
    }

    /// Protected blocks in `chunk`, loading the chunk on a miss.
    ///
    /// A failed load returns an empty set and is not remembered, so the
    /// next call retries the store. Neither is a load made while the chunk's
    /// world is unloaded: its rows can't be validated until it comes back.
    pub fn get(&self, chunk: ChunkKey) -> ChunkBlocks {
        if let Some(hit) = self.entries.borrow_mut().get(&chunk) {
            return hit.clone();
        }

        match self.store.select_by_chunk(chunk) {
            Ok(records) => {
                let blocks: ChunkBlocks = Rc::new(locations_from_records(records, self.worlds.as_ref()));
                if self.worlds.world(chunk.world).is_some() {
                    self.entries.borrow_mut().put(chunk, blocks.clone());
                } else {
                    log::debug!("World {} is not loaded; not caching chunk ({}, {})", chunk.world, chunk.x, chunk.z);
                }
                blocks
            }
            Err(e) => {
                log::error!(
                    "{}: chunk ({}, {}) in world {}: {:#}",
                    StoreOp::SelectChunk, chunk.x, chunk.z, chunk.world, e
                );
                ChunkBlocks::default()
            }
        }
    }

    /// Drop the entry for `chunk`. Returns whether one was present.
    pub fn invalidate(&self, chunk: ChunkKey) -> bool {
        self.entries.borrow_mut().pop(&chunk).is_some()
    }

    pub fn is_cached(&self, chunk: ChunkKey) -> bool {
        self.entries.borrow().contains(&chunk)
    }

    pub fn clear(&self) {
        self.entries.borrow_mut().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }
}
