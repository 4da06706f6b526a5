use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use satlog_core::{db, maintenance, ApiKeyGate, PgStore, SatlogConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Satlog administrative tooling", long_about = None)]
struct Cli {
    /// TOML configuration file; environment variables override its values
    #[arg(long, global = true, env = "SATLOG_CONFIG")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Apply embedded database migrations
    Migrate,
    /// Delete every stored task record and batch audit row
    Clear(ClearArgs),
}

#[derive(Args, Debug, Default)]
struct ClearArgs {
    /// Confirm that all records should be deleted
    #[arg(long)]
    yes: bool,
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
        Command::Migrate => handle_migrate(&config).await,
        Command::Clear(args) => handle_clear(&config, args).await,
    }
}

async fn connect_pool(config: &SatlogConfig) -> Result<db::DbPool> {
    db::connect(config.database_url()?, &config.database).await
}

async fn handle_migrate(config: &SatlogConfig) -> Result<()> {
    let pool = connect_pool(config).await?;
    db::run_migrations(&pool).await?;
    info!("Database migrations applied");
    Ok(())
}

async fn handle_clear(config: &SatlogConfig, args: ClearArgs) -> Result<()> {
    if !args.yes {
        bail!("refusing to clear the record store without --yes");
    }

    let pool = connect_pool(config).await?;
    let store = PgStore::new(pool);
    let gate = ApiKeyGate::from_config(&config.auth);

    let removed = maintenance::clear(&store, &gate, config.auth.admin_key.as_deref())
        .await
        .context("clear requires SATLOG_ADMIN_KEY")?;

    info!(removed, "record store cleared");
    println!("removed {removed} records");
    Ok(())
}
