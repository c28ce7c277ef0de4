use std::path::PathBuf;

use anyhow::{ensure, Context, Result};
use clap::{Args, Parser, Subcommand};
use comfy_table::{presets::UTF8_FULL, Table};
use metasync_core::{
    db, fetch, repair::RepairReport, sync, KeyScheme, NormalizedSheet, SourceConfig, SyncConfig,
    TableTarget,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Synchronize the cooperative goals sheet into Postgres", long_about = None)]
struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Download the sheet and upsert it into the destination table
    Sync(SyncArgs),
    /// Download and normalize the sheet without touching the database
    Preview(PreviewArgs),
    /// Create the destination table and its constraints if missing
    EnsureSchema(TargetArgs),
    /// Find (and optionally fix) double-encoded text left by earlier runs
    RepairEncoding(RepairArgs),
}

#[derive(Args, Debug, Default)]
struct SourceArgs {
    /// Read the CSV from a local file instead of downloading it
    #[arg(long)]
    input: Option<PathBuf>,
    /// Append a timestamp query parameter to bypass cached exports
    #[arg(long)]
    cache_bust: bool,
}

#[derive(Args, Debug, Default)]
struct TargetArgs {
    /// Destination table (default: METASYNC_TABLE or meta_valle)
    #[arg(long)]
    table: Option<String>,
    /// Key scheme, `identifier` or `surrogate` (default: METASYNC_KEY_SCHEME or identifier)
    #[arg(long)]
    scheme: Option<KeyScheme>,
}

#[derive(Args, Debug, Default)]
struct SyncArgs {
    #[command(flatten)]
    source: SourceArgs,
    #[command(flatten)]
    target: TargetArgs,
    /// Rows per upsert round trip (default: METASYNC_BATCH_SIZE or 500)
    #[arg(long)]
    batch_size: Option<usize>,
    /// Print the run report as JSON instead of a summary line
    #[arg(long)]
    json: bool,
}

#[derive(Args, Debug, Default)]
struct PreviewArgs {
    #[command(flatten)]
    source: SourceArgs,
    /// Key scheme used to validate the sheet
    #[arg(long)]
    scheme: Option<KeyScheme>,
    /// Maximum number of records to print
    #[arg(long, default_value_t = 20)]
    limit: usize,
}

#[derive(Args, Debug, Default)]
struct RepairArgs {
    #[command(flatten)]
    target: TargetArgs,
    /// Write the repairs instead of only listing them
    #[arg(long)]
    apply: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match cli.command {
        Command::Sync(args) => handle_sync(args).await,
        Command::Preview(args) => handle_preview(args).await,
        Command::EnsureSchema(args) => handle_ensure_schema(args).await,
        Command::RepairEncoding(args) => handle_repair(args).await,
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn handle_sync(args: SyncArgs) -> Result<()> {
    let mut config = SyncConfig::from_env().context("invalid configuration")?;
    apply_source_args(&mut config.source, args.source);
    config.target = resolve_target(config.target, &args.target)?;
    if let Some(batch_size) = args.batch_size {
        ensure!(batch_size > 0, "--batch-size must be at least 1");
        config.batch_size = batch_size;
    }

    info!(table = config.target.name(), scheme = %config.target.scheme, "starting sync");
    let report = sync::run(&config).await.context("sync failed")?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!(
            "Synchronized {} records into {} ({} inserted, {} updated, {} of {} sheet rows dropped)",
            report.upsert.processed,
            report.table,
            report.upsert.inserted,
            report.upsert.updated,
            report.dropped.len(),
            report.total_rows,
        );
    }
    Ok(())
}

async fn handle_preview(args: PreviewArgs) -> Result<()> {
    let mut source = SourceConfig::from_env().context("invalid configuration")?;
    apply_source_args(&mut source, args.source);
    let scheme = match args.scheme {
        Some(scheme) => scheme,
        None => TableTarget::from_env().context("invalid configuration")?.scheme,
    };

    let payload = fetch::load_payload(&source).await?;
    let sheet = sync::preview(&payload, scheme)?;
    print_sheet(&sheet, args.limit);
    Ok(())
}

async fn handle_ensure_schema(args: TargetArgs) -> Result<()> {
    let database = metasync_core::DatabaseConfig::from_env().context("invalid configuration")?;
    let target = resolve_target(TableTarget::from_env()?, &args)?;

    let pool = db::connect(&database).await?;
    sync::ensure_schema(&pool, &target).await?;
    pool.close().await;

    println!("Table {} is ready ({} key)", target.name(), target.scheme);
    Ok(())
}

async fn handle_repair(args: RepairArgs) -> Result<()> {
    let database = metasync_core::DatabaseConfig::from_env().context("invalid configuration")?;
    let target = resolve_target(TableTarget::from_env()?, &args.target)?;

    let pool = db::connect(&database).await?;
    let report = sync::repair_encoding(&pool, &target, args.apply).await?;
    pool.close().await;

    print_repairs(&report);
    if args.apply {
        println!("Repaired {} values in {}.", report.applied, target.name());
    } else if !report.candidates.is_empty() {
        println!("Run again with --apply to write these repairs.");
    }
    Ok(())
}

fn apply_source_args(source: &mut SourceConfig, args: SourceArgs) {
    if args.input.is_some() {
        source.input = args.input;
    }
    source.cache_bust |= args.cache_bust;
}

fn resolve_target(base: TableTarget, args: &TargetArgs) -> Result<TableTarget> {
    let name = args.table.as_deref().unwrap_or(base.name());
    let scheme = args.scheme.unwrap_or(base.scheme);
    Ok(TableTarget::new(name, scheme)?)
}

fn print_sheet(sheet: &NormalizedSheet, limit: usize) {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_header(vec!["ID", "COOPERATIVA", "META", "DATA", "STATUS"]);
    for record in sheet.records.iter().take(limit) {
        table.add_row(vec![
            record.id.map(|id| id.to_string()).unwrap_or_default(),
            record.cooperative.clone(),
            record.target.to_string(),
            record.date.map(|date| date.to_string()).unwrap_or_default(),
            record.status.clone().unwrap_or_default(),
        ]);
    }
    println!("{table}");

    if sheet.records.len() > limit {
        println!("... {} more records not shown", sheet.records.len() - limit);
    }

    if !sheet.dropped.is_empty() {
        let mut dropped = Table::new();
        dropped.load_preset(UTF8_FULL).set_header(vec!["LINE", "REASON"]);
        for row in &sheet.dropped {
            dropped.add_row(vec![row.line.to_string(), row.reason.to_string()]);
        }
        warn!(count = sheet.dropped.len(), "some sheet rows will be skipped");
        println!("{dropped}");
    }

    println!(
        "{} valid records out of {} sheet rows",
        sheet.valid_rows(),
        sheet.total_rows
    );
}

fn print_repairs(report: &RepairReport) {
    if report.candidates.is_empty() {
        println!(
            "No double-encoded text found ({} rows with non-ASCII text checked).",
            report.scanned
        );
        return;
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_header(vec!["ID", "COLUMN", "STORED", "REPAIRED"]);
    for candidate in &report.candidates {
        table.add_row(vec![
            candidate.id.to_string(),
            candidate.column.to_string(),
            candidate.original.clone(),
            candidate.repaired.clone(),
        ]);
    }
    println!("{table}");
}
