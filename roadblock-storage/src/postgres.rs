use anyhow::{Context, Result};
use deadpool_postgres::{Config, ManagerConfig, Pool, RecyclingMethod, Runtime as PoolRuntime};
use tokio::runtime::{Builder, Runtime};
use tokio_postgres::{NoTls, Row};
use uuid::Uuid;

use crate::{BlockStore, BoundingBox, ChunkKey, ProtectedRecord, RecordKey, join_world_id, split_world_id};

const CREATE_CURRENT: &str = "
    CREATE TABLE IF NOT EXISTS road_blocks (
        world_name TEXT NOT NULL,
        world_msb BIGINT NOT NULL,
        world_lsb BIGINT NOT NULL,
        x INT NOT NULL,
        y INT NOT NULL,
        z INT NOT NULL,
        chunk_x INT NOT NULL,
        chunk_z INT NOT NULL,
        PRIMARY KEY (world_msb, world_lsb, x, y, z)
    );
    CREATE INDEX IF NOT EXISTS road_blocks_chunk
        ON road_blocks (world_msb, world_lsb, chunk_x, chunk_z);
    CREATE TABLE IF NOT EXISTS road_blocks_meta (version BIGINT NOT NULL);
";

const INSERT: &str = "INSERT INTO road_blocks
        (world_name, world_msb, world_lsb, x, y, z, chunk_x, chunk_z)
     VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
     ON CONFLICT DO NOTHING";

const SELECT_COLUMNS: &str = "SELECT world_name, world_msb, world_lsb, x, y, z, chunk_x, chunk_z FROM road_blocks";

// Catalog lookups only see the schema the store writes to, never a
// same-named table elsewhere on the search path.
const META_TABLE_EXISTS: &str = "SELECT EXISTS (
    SELECT 1 FROM information_schema.tables
    WHERE table_schema = current_schema() AND table_name = 'road_blocks_meta'
)";

const LEGACY_COLUMN_EXISTS: &str = "SELECT EXISTS (
    SELECT 1 FROM information_schema.columns
    WHERE table_schema = current_schema() AND table_name = 'road_blocks' AND column_name = 'world_uid'
)";

/// PostgreSQL storage.
///
/// The registry runs on the game tick thread, so every call bridges into a
/// private current-thread runtime with `block_on`.
pub struct PostgresStore {
    pool: Pool,
    rt: Runtime,
}

impl PostgresStore {
    pub fn connect(database_url: &str) -> Result<Self> {
        let mut cfg = Config::new();
        cfg.url = Some(database_url.to_string());
        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });

        let pool = cfg
            .create_pool(Some(PoolRuntime::Tokio1), NoTls)
            .context("Failed to create Postgres pool")?;

        let rt = Builder::new_current_thread()
            .enable_all()
            .build()
            .context("Failed to build Postgres runtime")?;

        // Fail fast on bad credentials instead of on the first tick.
        rt.block_on(async { pool.get().await.map(drop) })
            .context("Failed to connect to Postgres")?;
        log::info!("Postgres: Connected");

        Ok(Self { pool, rt })
    }
}

fn read_record(row: &Row) -> ProtectedRecord {
    ProtectedRecord {
        world_name: row.get(0),
        world_id: join_world_id(row.get(1), row.get(2)),
        x: row.get(3),
        y: row.get(4),
        z: row.get(5),
        chunk_x: row.get(6),
        chunk_z: row.get(7),
    }
}

async fn insert_records(tx: &deadpool_postgres::Transaction<'_>, records: &[ProtectedRecord]) -> Result<usize> {
    let stmt = tx.prepare_cached(INSERT).await.context("Failed to prepare insert")?;
    let mut inserted = 0;
    for record in records {
        let (msb, lsb) = split_world_id(record.world_id);
        inserted += tx
            .execute(
                &stmt,
                &[
                    &record.world_name,
                    &msb,
                    &lsb,
                    &record.x,
                    &record.y,
                    &record.z,
                    &record.chunk_x,
                    &record.chunk_z,
                ],
            )
            .await
            .context("Failed to insert road block")?;
    }
    Ok(inserted as usize)
}

async fn write_version(tx: &deadpool_postgres::Transaction<'_>, version: i64) -> Result<()> {
    tx.execute("DELETE FROM road_blocks_meta", &[])
        .await
        .context("Failed to clear schema version")?;
    tx.execute("INSERT INTO road_blocks_meta (version) VALUES ($1)", &[&version])
        .await
        .context("Failed to write schema version")?;
    Ok(())
}

impl BlockStore for PostgresStore {
    fn insert_all(&self, records: &[ProtectedRecord]) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }
        self.rt.block_on(async {
            let mut client = self.pool.get().await.context("Failed to get DB connection")?;
            let tx = client.transaction().await.context("Failed to begin insert transaction")?;
            let inserted = insert_records(&tx, records).await?;
            tx.commit().await.context("Failed to commit inserts")?;
            log::debug!("Postgres: Inserted {} of {} road blocks", inserted, records.len());
            Ok(inserted)
        })
    }

    fn delete_all(&self, keys: &[RecordKey]) -> Result<usize> {
        if keys.is_empty() {
            return Ok(0);
        }
        self.rt.block_on(async {
            let mut client = self.pool.get().await.context("Failed to get DB connection")?;
            let tx = client.transaction().await.context("Failed to begin delete transaction")?;
            let stmt = tx
                .prepare_cached(
                    "DELETE FROM road_blocks
                     WHERE world_msb = $1 AND world_lsb = $2 AND x = $3 AND y = $4 AND z = $5",
                )
                .await
                .context("Failed to prepare delete")?;
            let mut deleted = 0;
            for key in keys {
                let (msb, lsb) = split_world_id(key.world);
                deleted += tx
                    .execute(&stmt, &[&msb, &lsb, &key.x, &key.y, &key.z])
                    .await
                    .context("Failed to delete road block")?;
            }
            tx.commit().await.context("Failed to commit deletes")?;
            log::debug!("Postgres: Deleted {} of {} road blocks", deleted, keys.len());
            Ok(deleted as usize)
        })
    }

    fn select_all(&self) -> Result<Vec<ProtectedRecord>> {
        self.rt.block_on(async {
            let client = self.pool.get().await.context("Failed to get DB connection")?;
            let rows = client
                .query(SELECT_COLUMNS, &[])
                .await
                .context("Failed to select road blocks")?;
            Ok(rows.iter().map(read_record).collect())
        })
    }

    fn select_by_chunk(&self, chunk: ChunkKey) -> Result<Vec<ProtectedRecord>> {
        let (msb, lsb) = split_world_id(chunk.world);
        self.rt.block_on(async {
            let client = self.pool.get().await.context("Failed to get DB connection")?;
            let rows = client
                .query(
                    &format!(
                        "{SELECT_COLUMNS} WHERE world_msb = $1 AND world_lsb = $2 AND chunk_x = $3 AND chunk_z = $4"
                    ),
                    &[&msb, &lsb, &chunk.x, &chunk.z],
                )
                .await
                .context("Failed to select chunk")?;
            Ok(rows.iter().map(read_record).collect())
        })
    }

    fn select_by_bounding_box(&self, world: Uuid, bounds: BoundingBox) -> Result<Vec<ProtectedRecord>> {
        let (msb, lsb) = split_world_id(world);
        self.rt.block_on(async {
            let client = self.pool.get().await.context("Failed to get DB connection")?;
            let rows = client
                .query(
                    &format!(
                        "{SELECT_COLUMNS} WHERE world_msb = $1 AND world_lsb = $2
                            AND x BETWEEN $3 AND $4 AND z BETWEEN $5 AND $6"
                    ),
                    &[&msb, &lsb, &bounds.x_min, &bounds.x_max, &bounds.z_min, &bounds.z_max],
                )
                .await
                .context("Failed to select bounding box")?;
            Ok(rows.iter().map(read_record).collect())
        })
    }

    fn count(&self) -> Result<u64> {
        self.rt.block_on(async {
            let client = self.pool.get().await.context("Failed to get DB connection")?;
            let row = client
                .query_one("SELECT COUNT(*) FROM road_blocks", &[])
                .await
                .context("Failed to count road blocks")?;
            let count: i64 = row.get(0);
            Ok(count as u64)
        })
    }

    fn schema_version(&self) -> Result<Option<i64>> {
        self.rt.block_on(async {
            let client = self.pool.get().await.context("Failed to get DB connection")?;
            let exists: bool = client
                .query_one(META_TABLE_EXISTS, &[])
                .await
                .context("Failed to inspect catalog")?
                .get(0);
            if !exists {
                return Ok(None);
            }
            let row = client
                .query_opt("SELECT version FROM road_blocks_meta LIMIT 1", &[])
                .await
                .context("Failed to read schema version")?;
            Ok(row.map(|r| r.get(0)))
        })
    }

    fn legacy_layout_present(&self) -> Result<bool> {
        self.rt.block_on(async {
            let client = self.pool.get().await.context("Failed to get DB connection")?;
            let row = client
                .query_one(LEGACY_COLUMN_EXISTS, &[])
                .await
                .context("Failed to inspect road_blocks columns")?;
            Ok(row.get(0))
        })
    }

    fn initialize(&self, version: i64) -> Result<()> {
        self.rt.block_on(async {
            let mut client = self.pool.get().await.context("Failed to get DB connection")?;
            let tx = client.transaction().await.context("Failed to begin schema transaction")?;
            tx.batch_execute(CREATE_CURRENT)
                .await
                .context("Failed to create road_blocks schema")?;
            write_version(&tx, version).await?;
            tx.commit().await.context("Failed to commit schema")?;
            Ok(())
        })
    }

    fn migrate_legacy(&self, version: i64) -> Result<usize> {
        self.rt.block_on(async {
            let mut client = self.pool.get().await.context("Failed to get DB connection")?;
            let tx = client.transaction().await.context("Failed to begin migration transaction")?;

            let rows = tx
                .query("SELECT world, world_uid, x, y, z FROM road_blocks", &[])
                .await
                .context("Failed to read legacy rows")?;
            let mut buffered = Vec::with_capacity(rows.len());
            for row in &rows {
                let world: Option<String> = row.get(0);
                let uid: Option<String> = row.get(1);
                let (x, y, z): (i32, i32, i32) = (row.get(2), row.get(3), row.get(4));
                match uid.as_deref().map(Uuid::parse_str) {
                    Some(Ok(world_id)) => {
                        buffered.push(ProtectedRecord::new(world.unwrap_or_default(), world_id, x, y, z));
                    }
                    _ => log::warn!(
                        "Postgres: Skipping legacy row ({}, {}, {}) with unusable world id {:?}",
                        x, y, z, uid
                    ),
                }
            }
            log::info!("Postgres: Buffered {} legacy road blocks", buffered.len());

            tx.batch_execute(
                "DROP INDEX IF EXISTS road_blocks_chunk;
                 DROP TABLE road_blocks;",
            )
            .await
            .context("Failed to drop legacy table")?;
            tx.batch_execute(CREATE_CURRENT)
                .await
                .context("Failed to create road_blocks schema")?;
            let carried = insert_records(&tx, &buffered).await?;
            write_version(&tx, version).await?;
            tx.commit().await.context("Failed to commit migration")?;
            Ok(carried)
        })
    }

    fn close(&self) -> Result<()> {
        self.pool.close();
        log::info!("Postgres: Pool closed");
        Ok(())
    }
}
