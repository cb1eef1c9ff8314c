pub mod cache;
pub mod cli;
pub mod config;
pub mod data;
pub mod decode;
pub mod error;
pub mod ingest;
pub mod inspect;
pub mod io_utils;
pub mod layouts;
pub mod layouts_cmd;
pub mod mapper;
pub mod normalize;
pub mod object_store;
pub mod runs;
pub mod store;
pub mod table;
pub mod upload;

use std::{env, fs, sync::OnceLock};

use anyhow::{Context, Result, bail};
use clap::Parser;
use log::{LevelFilter, info};

use crate::{
    cache::Cache,
    cli::{Cli, Commands, IngestArgs, InspectArgs, LayoutsArgs, RunArgs, UploadArgs},
    config::Settings,
    decode::DecodeOptions,
    ingest::{IngestReport, IngestRequest, Ingestor},
    layouts::Layouts,
    object_store::FsObjectStore,
    store::{MemoryStore, PgStore, SourceLocations},
};

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("tender_ingest", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub fn run() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    match cli.command {
        Commands::Inspect(args) => handle_inspect(&args),
        Commands::Layouts(args) => handle_layouts(&args),
        command => {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .context("Starting async runtime")?;
            runtime.block_on(run_async(command))
        }
    }
}

async fn run_async(command: Commands) -> Result<()> {
    match command {
        Commands::Ingest(args) => handle_ingest(&args).await,
        Commands::Upload(args) => handle_upload(&args).await,
        Commands::DeleteRun(args) => handle_delete_run(&args).await,
        Commands::Summary(args) => handle_summary(&args).await,
        Commands::Inspect(args) => handle_inspect(&args),
        Commands::Layouts(args) => handle_layouts(&args),
    }
}

fn decode_options(dbf_encoding: Option<&str>) -> Result<DecodeOptions> {
    Ok(DecodeOptions {
        dbf_encoding: dbf_encoding
            .map(|label| io_utils::resolve_encoding(Some(label)))
            .transpose()?,
    })
}

fn pg_store(settings: &Settings, chunk_size: Option<usize>) -> Result<PgStore> {
    let options = settings.connect_options()?;
    Ok(PgStore::connect_lazy(
        options,
        &settings.database.pool,
        chunk_size.unwrap_or(settings.chunk_size),
    ))
}

fn handle_inspect(args: &InspectArgs) -> Result<()> {
    let layouts = Layouts::resolve(args.layout_source.layouts.as_deref())?;
    let options = inspect::InspectOptions {
        file_type: args.file_type,
        preview_rows: args.preview,
        decode: decode_options(args.dbf_encoding.as_deref())?,
        layouts: &layouts,
    };
    inspect::execute(&args.input, &options)
        .with_context(|| format!("Inspecting {:?}", args.input))
}

fn handle_layouts(args: &LayoutsArgs) -> Result<()> {
    let layouts = Layouts::resolve(args.layout_source.layouts.as_deref())?;
    layouts_cmd::execute(&layouts, args.file_type)
}

async fn handle_ingest(args: &IngestArgs) -> Result<()> {
    let settings = Settings::from_env()?;
    let layouts = Layouts::resolve(args.layout_source.layouts.as_deref())?;
    let options = decode_options(args.dbf_encoding.as_deref())?;
    let objects = FsObjectStore::new(
        args.object_root
            .clone()
            .unwrap_or_else(|| settings.object_store_root.clone()),
    );
    let request = IngestRequest {
        locations: SourceLocations {
            tender: args.tender.clone(),
            district: args.district.clone(),
            department: args.department.clone(),
        },
        submitted_by: args.submitted_by.clone(),
    };

    let report: IngestReport = if args.dry_run {
        info!("Dry run: rows are staged in memory and discarded");
        let store = MemoryStore::new();
        Ingestor::new(&store, &objects, &layouts)
            .with_decode_options(options)
            .with_fetch_timeout(settings.fetch_timeout)
            .ingest(&request)
            .await?
    } else {
        let store = pg_store(&settings, args.chunk_size)?;
        let report = Ingestor::new(&store, &objects, &layouts)
            .with_decode_options(options)
            .with_fetch_timeout(settings.fetch_timeout)
            .ingest(&request)
            .await;
        store.close().await;
        report?
    };

    println!("{}", serde_json::to_string_pretty(&report)?);
    let failed = report.failed_files();
    if !failed.is_empty() && !args.allow_partial {
        bail!(
            "Run {}: {} of 3 file(s) failed ({})",
            report.run_id,
            failed.len(),
            failed.iter().map(|ft| ft.as_str()).collect::<Vec<_>>().join(", ")
        );
    }
    Ok(())
}

async fn handle_upload(args: &UploadArgs) -> Result<()> {
    let root = match &args.object_root {
        Some(root) => root.clone(),
        None => Settings::from_env()?.object_store_root,
    };
    let objects = FsObjectStore::new(root);
    let original = args.input.display().to_string();
    upload::object_key(args.file_type, &original)?;
    let size = fs::metadata(&args.input)
        .with_context(|| format!("Reading metadata of {:?}", args.input))?
        .len();
    upload::check_size(&original, size)?;
    let bytes = tokio::fs::read(&args.input)
        .await
        .with_context(|| format!("Reading {:?}", args.input))?;
    let receipt = upload::store_upload(&objects, args.file_type, &original, &bytes).await?;
    info!(
        "Stored {} byte(s) from {:?} as '{}'",
        bytes.len(),
        args.input,
        receipt.filename
    );
    println!("{}", serde_json::to_string_pretty(&receipt)?);
    Ok(())
}

async fn handle_delete_run(args: &RunArgs) -> Result<()> {
    let settings = Settings::from_env()?;
    let store = pg_store(&settings, None)?;
    let cache = Cache::connect(settings.redis_url.as_deref(), settings.cache_ttl).await;
    let deleted = runs::delete_run(&store, &cache, args.run_id).await;
    store.close().await;
    let deleted = deleted.with_context(|| format!("Deleting run {}", args.run_id))?;
    if deleted.run == 0 {
        info!("Run {} did not exist; nothing deleted", args.run_id);
    } else {
        info!("Deleted run {} ({} row(s) in total)", args.run_id, deleted.total());
    }
    println!("{}", serde_json::to_string_pretty(&deleted)?);
    Ok(())
}

async fn handle_summary(args: &RunArgs) -> Result<()> {
    let settings = Settings::from_env()?;
    let store = pg_store(&settings, None)?;
    let cache = Cache::connect(settings.redis_url.as_deref(), settings.cache_ttl).await;
    let summary = runs::run_summary(&store, &cache, args.run_id).await;
    store.close().await;
    match summary.with_context(|| format!("Loading summary of run {}", args.run_id))? {
        Some(summary) => {
            println!("{}", serde_json::to_string_pretty(&summary)?);
            Ok(())
        }
        None => bail!("Run {} does not exist", args.run_id),
    }
}
