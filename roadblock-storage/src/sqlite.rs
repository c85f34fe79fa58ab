use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, Result, anyhow};
use rusqlite::{Connection, OptionalExtension, Row, params};
use uuid::Uuid;

use crate::{BlockStore, BoundingBox, ChunkKey, ProtectedRecord, RecordKey, join_world_id, split_world_id};

const CREATE_CURRENT: &str = "
    CREATE TABLE IF NOT EXISTS road_blocks (
        world_name TEXT NOT NULL,
        world_msb INTEGER NOT NULL,
        world_lsb INTEGER NOT NULL,
        x INTEGER NOT NULL,
        y INTEGER NOT NULL,
        z INTEGER NOT NULL,
        chunk_x INTEGER NOT NULL,
        chunk_z INTEGER NOT NULL,
        PRIMARY KEY (world_msb, world_lsb, x, y, z)
    );
    CREATE INDEX IF NOT EXISTS road_blocks_chunk
        ON road_blocks (world_msb, world_lsb, chunk_x, chunk_z);
    CREATE TABLE IF NOT EXISTS road_blocks_meta (version INTEGER NOT NULL);
";

const SELECT_COLUMNS: &str = "SELECT world_name, world_msb, world_lsb, x, y, z, chunk_x, chunk_z FROM road_blocks";

/// Embedded SQLite storage.
///
/// The connection sits behind a mutex so the store can be handed to a helper
/// thread; the registry itself only ever calls it from the tick thread.
pub struct SqliteStore {
    conn: Mutex<Option<Connection>>,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open SQLite database at {}", path.display()))?;
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL;")
            .context("Failed to configure SQLite pragmas")?;
        log::info!("Sqlite: Opened {}", path.display());
        Ok(Self::from_connection(conn))
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory SQLite")?;
        Ok(Self::from_connection(conn))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(Some(conn)),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Option<Connection>>> {
        self.conn.lock().map_err(|_| anyhow!("SQLite connection mutex poisoned"))
    }

    fn with_conn<T>(&self, f: impl FnOnce(&mut Connection) -> Result<T>) -> Result<T> {
        let mut guard = self.lock()?;
        let conn = guard.as_mut().ok_or_else(|| anyhow!("SQLite store is closed"))?;
        f(conn)
    }

    #[cfg(test)]
    pub(crate) fn execute_batch(&self, sql: &str) -> Result<()> {
        self.with_conn(|conn| conn.execute_batch(sql).context("Failed to execute batch"))
    }
}

fn read_record(row: &Row<'_>) -> rusqlite::Result<ProtectedRecord> {
    Ok(ProtectedRecord {
        world_name: row.get(0)?,
        world_id: join_world_id(row.get(1)?, row.get(2)?),
        x: row.get(3)?,
        y: row.get(4)?,
        z: row.get(5)?,
        chunk_x: row.get(6)?,
        chunk_z: row.get(7)?,
    })
}

fn table_exists(conn: &Connection, name: &str) -> Result<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
            params![name],
            |row| row.get(0),
        )
        .optional()
        .context("Failed to inspect sqlite_master")?;
    Ok(found.is_some())
}

fn insert_records(conn: &Connection, records: &[ProtectedRecord]) -> Result<usize> {
    let mut stmt = conn
        .prepare_cached(
            "INSERT OR IGNORE INTO road_blocks
                (world_name, world_msb, world_lsb, x, y, z, chunk_x, chunk_z)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )
        .context("Failed to prepare insert")?;
    let mut inserted = 0;
    for record in records {
        let (msb, lsb) = split_world_id(record.world_id);
        inserted += stmt
            .execute(params![
                record.world_name,
                msb,
                lsb,
                record.x,
                record.y,
                record.z,
                record.chunk_x,
                record.chunk_z
            ])
            .context("Failed to insert road block")?;
    }
    Ok(inserted)
}

fn write_version(conn: &Connection, version: i64) -> Result<()> {
    conn.execute("DELETE FROM road_blocks_meta", [])
        .context("Failed to clear schema version")?;
    conn.execute("INSERT INTO road_blocks_meta (version) VALUES (?1)", params![version])
        .context("Failed to write schema version")?;
    Ok(())
}

impl BlockStore for SqliteStore {
    fn insert_all(&self, records: &[ProtectedRecord]) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }
        self.with_conn(|conn| {
            let tx = conn.transaction().context("Failed to begin insert transaction")?;
            let inserted = insert_records(&tx, records)?;
            tx.commit().context("Failed to commit inserts")?;
            log::debug!("Sqlite: Inserted {} of {} road blocks", inserted, records.len());
            Ok(inserted)
        })
    }

    fn delete_all(&self, keys: &[RecordKey]) -> Result<usize> {
        if keys.is_empty() {
            return Ok(0);
        }
        self.with_conn(|conn| {
            let tx = conn.transaction().context("Failed to begin delete transaction")?;
            let mut deleted = 0;
            {
                let mut stmt = tx
                    .prepare_cached(
                        "DELETE FROM road_blocks
                         WHERE world_msb = ?1 AND world_lsb = ?2 AND x = ?3 AND y = ?4 AND z = ?5",
                    )
                    .context("Failed to prepare delete")?;
                for key in keys {
                    let (msb, lsb) = split_world_id(key.world);
                    deleted += stmt
                        .execute(params![msb, lsb, key.x, key.y, key.z])
                        .context("Failed to delete road block")?;
                }
            }
            tx.commit().context("Failed to commit deletes")?;
            log::debug!("Sqlite: Deleted {} of {} road blocks", deleted, keys.len());
            Ok(deleted)
        })
    }

    fn select_all(&self) -> Result<Vec<ProtectedRecord>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(SELECT_COLUMNS).context("Failed to prepare select")?;
            let rows = stmt.query_map([], read_record).context("Failed to select road blocks")?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
                .context("Failed to read road block row")
        })
    }

    fn select_by_chunk(&self, chunk: ChunkKey) -> Result<Vec<ProtectedRecord>> {
        let (msb, lsb) = split_world_id(chunk.world);
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare_cached(&format!(
                    "{SELECT_COLUMNS} WHERE world_msb = ?1 AND world_lsb = ?2 AND chunk_x = ?3 AND chunk_z = ?4"
                ))
                .context("Failed to prepare chunk select")?;
            let rows = stmt
                .query_map(params![msb, lsb, chunk.x, chunk.z], read_record)
                .context("Failed to select chunk")?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
                .context("Failed to read road block row")
        })
    }

    fn select_by_bounding_box(&self, world: Uuid, bounds: BoundingBox) -> Result<Vec<ProtectedRecord>> {
        let (msb, lsb) = split_world_id(world);
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare_cached(&format!(
                    "{SELECT_COLUMNS} WHERE world_msb = ?1 AND world_lsb = ?2
                        AND x BETWEEN ?3 AND ?4 AND z BETWEEN ?5 AND ?6"
                ))
                .context("Failed to prepare bounding box select")?;
            let rows = stmt
                .query_map(
                    params![msb, lsb, bounds.x_min, bounds.x_max, bounds.z_min, bounds.z_max],
                    read_record,
                )
                .context("Failed to select bounding box")?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
                .context("Failed to read road block row")
        })
    }

    fn count(&self) -> Result<u64> {
        self.with_conn(|conn| {
            let count: i64 = conn
                .query_row("SELECT COUNT(*) FROM road_blocks", [], |row| row.get(0))
                .context("Failed to count road blocks")?;
            Ok(count as u64)
        })
    }

    fn schema_version(&self) -> Result<Option<i64>> {
        self.with_conn(|conn| {
            if !table_exists(conn, "road_blocks_meta")? {
                return Ok(None);
            }
            conn.query_row("SELECT version FROM road_blocks_meta LIMIT 1", [], |row| row.get(0))
                .optional()
                .context("Failed to read schema version")
        })
    }

    fn legacy_layout_present(&self) -> Result<bool> {
        self.with_conn(|conn| {
            let legacy_columns: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM pragma_table_info('road_blocks') WHERE name = 'world_uid'",
                    [],
                    |row| row.get(0),
                )
                .context("Failed to inspect road_blocks columns")?;
            Ok(legacy_columns > 0)
        })
    }

    fn initialize(&self, version: i64) -> Result<()> {
        self.with_conn(|conn| {
            let tx = conn.transaction().context("Failed to begin schema transaction")?;
            tx.execute_batch(CREATE_CURRENT).context("Failed to create road_blocks schema")?;
            write_version(&tx, version)?;
            tx.commit().context("Failed to commit schema")?;
            Ok(())
        })
    }

    fn migrate_legacy(&self, version: i64) -> Result<usize> {
        self.with_conn(|conn| {
            let tx = conn.transaction().context("Failed to begin migration transaction")?;

            let buffered = {
                let mut stmt = tx
                    .prepare("SELECT world, world_uid, x, y, z FROM road_blocks")
                    .context("Failed to prepare legacy select")?;
                let rows = stmt
                    .query_map([], |row| {
                        Ok((
                            row.get::<_, Option<String>>(0)?,
                            row.get::<_, Option<String>>(1)?,
                            row.get::<_, i32>(2)?,
                            row.get::<_, i32>(3)?,
                            row.get::<_, i32>(4)?,
                        ))
                    })
                    .context("Failed to read legacy rows")?;

                let mut buffered = Vec::new();
                for row in rows {
                    let (world, uid, x, y, z) = row.context("Failed to read legacy row")?;
                    match uid.as_deref().map(Uuid::parse_str) {
                        Some(Ok(world_id)) => {
                            buffered.push(ProtectedRecord::new(world.unwrap_or_default(), world_id, x, y, z));
                        }
                        _ => log::warn!(
                            "Sqlite: Skipping legacy row ({}, {}, {}) with unusable world id {:?}",
                            x, y, z, uid
                        ),
                    }
                }
                buffered
            };
            log::info!("Sqlite: Buffered {} legacy road blocks", buffered.len());

            tx.execute_batch(
                "DROP INDEX IF EXISTS road_blocks_chunk;
                 DROP TABLE road_blocks;",
            )
            .context("Failed to drop legacy table")?;
            tx.execute_batch(CREATE_CURRENT).context("Failed to create road_blocks schema")?;
            let carried = insert_records(&tx, &buffered)?;
            write_version(&tx, version)?;
            tx.commit().context("Failed to commit migration")?;
            Ok(carried)
        })
    }

    fn close(&self) -> Result<()> {
        let mut guard = self.lock()?;
        if let Some(conn) = guard.take() {
            conn.close().map_err(|(_, e)| e).context("Failed to close SQLite connection")?;
            log::info!("Sqlite: Closed");
        }
        Ok(())
    }
}
