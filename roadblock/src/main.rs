use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use roadblock_core::{Settings, StorageConfig};
use roadblock_storage::{BlockStore, BoundingBox, ChunkKey, MigrationOutcome, ProtectedRecord, SchemaMigrator};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "roadblock", about = "Inspect and maintain the protected road block store")]
pub struct Args {
    /// Settings file (JSON). Storage flags below override its storage section.
    #[arg(short, long, env = "ROADBLOCK_SETTINGS")]
    pub settings: Option<PathBuf>,

    /// Storage backend: "sqlite" or "postgres"
    #[arg(long, env = "STORAGE")]
    pub storage: Option<String>,

    /// SQLite file path or PostgreSQL connection string
    #[arg(short, long, env = "DATABASE_URL")]
    pub database: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Bring the schema up to the current version
    Migrate,
    /// Number of protected blocks
    Count,
    /// Print every protected block
    Dump,
    /// Protected blocks in one chunk
    Chunk {
        #[arg(long)]
        world: Uuid,
        #[arg(long, allow_hyphen_values = true)]
        x: i32,
        #[arg(long, allow_hyphen_values = true)]
        z: i32,
    },
    /// Protected blocks within a horizontal distance of a block
    Nearby {
        #[arg(long)]
        world: Uuid,
        #[arg(long, allow_hyphen_values = true)]
        x: i32,
        #[arg(long, allow_hyphen_values = true)]
        z: i32,
        #[arg(long, default_value = "16")]
        distance: i32,
    },
}

fn storage_config(args: &Args, settings: &Settings) -> Result<StorageConfig> {
    let database = args.database.clone();
    let backend = match args.storage.as_deref().map(str::to_lowercase) {
        Some(backend) => backend,
        None => match &database {
            None => return Ok(settings.storage.clone()),
            Some(url) if url.starts_with("postgres://") || url.starts_with("postgresql://") => "postgres".to_string(),
            Some(_) => "sqlite".to_string(),
        },
    };

    match backend.as_str() {
        "sqlite" => Ok(StorageConfig::Sqlite {
            path: PathBuf::from(database.unwrap_or_else(|| "road_blocks.db".to_string())),
        }),
        "postgres" => match database {
            Some(url) => Ok(StorageConfig::Postgres { url }),
            None => bail!("--database (or DATABASE_URL) is required for postgres storage"),
        },
        other => bail!("Unknown storage backend {:?}; expected sqlite or postgres", other),
    }
}

fn print_records(records: &[ProtectedRecord]) {
    for r in records {
        println!("{}\t{}\t{}\t{}\t{}\tchunk({}, {})", r.world_name, r.world_id, r.x, r.y, r.z, r.chunk_x, r.chunk_z);
    }
    println!("{} road blocks", records.len());
}

fn run(args: Args) -> Result<()> {
    let settings = match &args.settings {
        Some(path) => Settings::load(path)?,
        None => Settings::default(),
    };
    let config = storage_config(&args, &settings)?;
    let store: Arc<dyn BlockStore> = config.open_store()?;

    if !matches!(args.command, Command::Migrate) {
        // queries against a missing or old layout fail on column lookups
        let version = store.schema_version().context("Failed to read schema version")?;
        if version != Some(roadblock_storage::SCHEMA_VERSION) || store.legacy_layout_present()? {
            log::warn!("Store is not at the current schema version; run `roadblock migrate` first");
        }
    }

    match args.command {
        Command::Migrate => match SchemaMigrator::new(store.as_ref()).run() {
            MigrationOutcome::UpToDate { version } => println!("Schema up to date (version {})", version),
            MigrationOutcome::Initialized { version } => println!("Created schema (version {})", version),
            MigrationOutcome::Migrated { version, rows } => println!("Migrated {} road blocks to version {}", rows, version),
            MigrationOutcome::Unsupported { found } => bail!("Schema version {} is newer than this build supports", found),
            MigrationOutcome::Failed => bail!("Migration failed; see log output"),
        },
        Command::Count => println!("{}", store.count()?),
        Command::Dump => print_records(&store.select_all()?),
        Command::Chunk { world, x, z } => print_records(&store.select_by_chunk(ChunkKey::new(world, x, z))?),
        Command::Nearby { world, x, z, distance } => {
            print_records(&store.select_by_bounding_box(world, BoundingBox::around(x, z, distance))?)
        }
    }

    store.close()
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    if let Err(e) = run(args) {
        log::error!("{:#}", e);
        eprintln!("roadblock: {:#}", e);
        std::process::exit(1);
    }
}
