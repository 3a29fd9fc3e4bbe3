use anyhow::{Context, Result};
use clap::Parser;
use gigboard::api::{ApiConfig, ApiServer};
use gigboard::config::AppConfig;
use gigboard::persistence::Persistence;
use std::env;
use std::path::PathBuf;

/// Freelance marketplace backend
#[derive(Parser, Debug)]
#[command(name = "gigboard", version, about)]
struct Cli {
    /// Path to a configuration file (created with defaults if missing)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to listen on
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// DuckDB database file
    #[arg(long)]
    db: Option<PathBuf>,
}

fn init_logging(config: &AppConfig) {
    let log_level = config.logging.level.to_lowercase();
    let mut default_directive = format!("gigboard={}", log_level);
    if !config.logging.additional_debug {
        default_directive.push_str(",tower_http=warn,hyper=warn");
    }
    let env_override = env::var("RUST_LOG").unwrap_or_default();
    let combined_filter = if env_override.trim().is_empty() {
        default_directive
    } else if env_override.contains("gigboard") {
        env_override
    } else {
        format!("{},{}", env_override, default_directive)
    };

    tracing_subscriber::fmt()
        .with_env_filter(combined_filter)
        .with_target(true)
        .init();
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        return;
    }
    tracing::info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => AppConfig::load_from_file(path)?,
        None => AppConfig::load()?,
    };
    config.apply_env_overrides();
    if let Some(host) = cli.host {
        config.server.host = host;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(db) = cli.db {
        config.database.path = db;
    }
    config.validate().context("invalid configuration")?;

    init_logging(&config);
    tracing::debug!("{}", config.summary());

    let persistence = Persistence::new(&config.database.path)
        .with_context(|| format!("opening database {}", config.database.path.display()))?;

    let server = ApiServer::new(
        ApiConfig::from_app_config(&config),
        persistence.clone(),
        config,
    );
    server.run_with_shutdown(shutdown_signal()).await?;

    persistence.checkpoint()?;
    tracing::info!("Database checkpointed, bye");
    Ok(())
}
