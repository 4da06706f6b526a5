use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use comfy_table::{presets::UTF8_FULL, Table};
use satlog::{files, server, AppState};
use satlog_core::{
    db, ApiKeyGate, DuplicatePolicy, IngestCoordinator, IngestRequest, ListParams, PgStore,
    QueryService, SatlogConfig, StatsParams,
};
use satlog_normalize::render_civil;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Satellite task log import and query tool", long_about = None)]
struct Cli {
    /// TOML configuration file; environment variables override its values
    #[arg(long, global = true, env = "SATLOG_CONFIG")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP API server
    Serve,
    /// Run database migrations
    Migrate,
    /// Import JSON or CSV exports as one batch
    Import(ImportArgs),
    /// List stored task records
    List(ListArgs),
    /// Print grouped record counts
    Stats(StatsArgs),
}

#[derive(Args, Debug)]
struct ImportArgs {
    /// Files or glob patterns to read
    #[arg(required = true)]
    paths: Vec<String>,
    /// How rows with an existing plan id are handled (defaults to the configured policy)
    #[arg(long)]
    policy: Option<DuplicatePolicy>,
    /// Run the whole batch and roll it back
    #[arg(long)]
    dry_run: bool,
}

#[derive(Args, Debug)]
struct ListArgs {
    #[arg(long, default_value_t = 1)]
    page: i64,
    #[arg(long, default_value_t = 20)]
    page_size: i64,
    /// Free-text filter over plan id, customer, satellite and station
    #[arg(long)]
    search: Option<String>,
}

#[derive(Args, Debug)]
struct StatsArgs {
    /// day, week, month or quarter
    #[arg(long, default_value = "day")]
    group_by: String,
    /// customer, satellite, station, taskResult or taskType
    #[arg(long, default_value = "customer")]
    category: String,
    #[arg(long)]
    start: Option<String>,
    #[arg(long)]
    end: Option<String>,
    #[arg(long)]
    limit: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = SatlogConfig::load(cli.config.as_deref()).context("failed to load configuration")?;

    match cli.command {
        Command::Serve => handle_serve(config).await,
        Command::Migrate => {
            let pool = connect_pool(&config).await?;
            db::run_migrations(&pool).await?;
            info!("Database migrations applied");
            Ok(())
        }
        Command::Import(args) => handle_import(config, args).await,
        Command::List(args) => handle_list(config, args).await,
        Command::Stats(args) => handle_stats(config, args).await,
    }
}

async fn connect_pool(config: &SatlogConfig) -> Result<db::DbPool> {
    let database_url = config.database_url()?;
    db::connect(database_url, &config.database).await
}

async fn connect_store(config: &SatlogConfig) -> Result<Arc<PgStore>> {
    let pool = connect_pool(config).await?;
    Ok(Arc::new(PgStore::new(pool)))
}

async fn handle_serve(config: SatlogConfig) -> Result<()> {
    let pool = connect_pool(&config).await?;
    db::run_migrations(&pool).await?;

    let gate = ApiKeyGate::from_config(&config.auth);
    if config.auth.import_key.is_none() {
        warn!("SATLOG_IMPORT_KEY is not set; every import will be rejected");
    }

    let state = Arc::new(AppState::new(
        Arc::new(PgStore::new(pool)),
        Arc::new(gate),
        &config,
    ));
    server::serve(state, &config.server.bind).await
}

async fn handle_import(config: SatlogConfig, args: ImportArgs) -> Result<()> {
    let records = files::load_batch(&args.paths)?;
    let store = connect_store(&config).await?;
    let coordinator = IngestCoordinator::new(
        store,
        Arc::new(ApiKeyGate::from_config(&config.auth)),
        &config.ingest,
        config.validation.clone(),
    );

    let report = coordinator
        .ingest(IngestRequest {
            records,
            policy: args.policy,
            dry_run: args.dry_run,
            credential: config.auth.import_key.clone(),
        })
        .await?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn handle_list(config: SatlogConfig, args: ListArgs) -> Result<()> {
    let queries = QueryService::new(connect_store(&config).await?);
    let page = queries
        .list(&ListParams {
            page: Some(args.page.to_string()),
            page_size: Some(args.page_size.to_string()),
            q: args.search,
            ..ListParams::default()
        })
        .await?;

    let mut table = Table::new();
    table.load_preset(UTF8_FULL).set_header(vec![
        "id", "plan id", "start (UTC+8)", "customer", "satellite", "station", "result", "type",
    ]);
    for stored in &page.records {
        let record = &stored.record;
        let text = |value: &Option<String>| value.clone().unwrap_or_default();
        table.add_row(vec![
            stored.id.to_string(),
            text(&record.plan_id),
            render_civil(&record.start_time),
            text(&record.customer),
            text(&record.satellite),
            text(&record.station),
            text(&record.task_result),
            text(&record.task_type),
        ]);
    }

    println!("{table}");
    println!(
        "page {} ({} per page), {} records total",
        page.page, page.page_size, page.total
    );
    Ok(())
}

async fn handle_stats(config: SatlogConfig, args: StatsArgs) -> Result<()> {
    let queries = QueryService::new(connect_store(&config).await?);
    let aggregation = queries
        .aggregate(&StatsParams {
            group_by: Some(args.group_by),
            category: Some(args.category),
            start: args.start,
            end: args.end,
            limit: args.limit.map(|limit| limit.to_string()),
        })
        .await?;

    let mut table = Table::new();
    let mut header = vec![aggregation.category.column().to_string()];
    header.extend(aggregation.labels.iter().cloned());
    table.load_preset(UTF8_FULL).set_header(header);
    for series in &aggregation.series {
        let mut row = vec![series.label.clone()];
        row.extend(series.data.iter().map(i64::to_string));
        table.add_row(row);
    }

    println!("{table}");
    Ok(())
}
