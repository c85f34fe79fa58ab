//! One-shot schema upgrade, run before the registry is handed out.
//!
//! Generation 0 stored the world id as text in a `world_uid` column.
//! Generation 1 splits it into two signed 64-bit halves so the primary key
//! and chunk index stay numeric.

use crate::{BlockStore, SCHEMA_VERSION};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationOutcome {
    /// Version slot already at the target.
    UpToDate { version: i64 },
    /// Empty database, schema created at the target version.
    Initialized { version: i64 },
    /// Legacy rows rewritten into the current layout.
    Migrated { version: i64, rows: usize },
    /// Database written by a newer build. Left untouched.
    Unsupported { found: i64 },
    /// Something went wrong; already logged. The store is usable as-is.
    Failed,
}

pub struct SchemaMigrator<'a> {
    store: &'a dyn BlockStore,
    target: i64,
}

impl<'a> SchemaMigrator<'a> {
    pub fn new(store: &'a dyn BlockStore) -> Self {
        Self {
            store,
            target: SCHEMA_VERSION,
        }
    }

    pub fn run(&self) -> MigrationOutcome {
        let version = match self.store.schema_version() {
            Ok(version) => version.unwrap_or(0),
            Err(e) => {
                log::error!("schema-read: {:#}. Assuming version 0", e);
                0
            }
        };

        if version == self.target {
            log::info!("Road block schema is up to date (version {})", version);
            return MigrationOutcome::UpToDate { version };
        }
        if version > self.target {
            log::warn!(
                "Road block schema version {} is newer than supported version {}; leaving it alone",
                version, self.target
            );
            return MigrationOutcome::Unsupported { found: version };
        }

        let legacy = match self.store.legacy_layout_present() {
            Ok(legacy) => legacy,
            Err(e) => {
                log::error!("schema-read: {:#}", e);
                return MigrationOutcome::Failed;
            }
        };

        if legacy {
            log::info!("Migrating road blocks from schema version {} to {}...", version, self.target);
            match self.store.migrate_legacy(self.target) {
                Ok(rows) => {
                    log::info!("Migrated {} road blocks to schema version {}", rows, self.target);
                    MigrationOutcome::Migrated {
                        version: self.target,
                        rows,
                    }
                }
                Err(e) => {
                    log::error!("schema-update: {:#}", e);
                    MigrationOutcome::Failed
                }
            }
        } else {
            match self.store.initialize(self.target) {
                Ok(()) => {
                    log::info!("Created road block schema at version {}", self.target);
                    MigrationOutcome::Initialized { version: self.target }
                }
                Err(e) => {
                    log::error!("schema-update: {:#}", e);
                    MigrationOutcome::Failed
                }
            }
        }
    }
}
