//! medpipe - pipeline job lifecycle service

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

use medpipe::{build_router, AppConfig, AppState};

#[derive(Debug, Parser)]
#[command(name = "medpipe", about = "Pipeline job lifecycle service")]
struct Args {
    /// Path to TOML configuration file
    #[arg(long, env = "MEDPIPE_CONFIG")]
    config: Option<PathBuf>,

    /// Listen port (overrides configuration)
    #[arg(long)]
    port: Option<u16>,

    /// SQLite database path (overrides configuration)
    #[arg(long)]
    database: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let mut config = AppConfig::load(args.config.as_deref())?;
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(database) = args.database {
        config.database.path = database;
    }
    // Validate up front so a typo fails at startup, not at job completion
    config.default_export_formats()?;

    info!("Starting medpipe");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!("Database: {}", config.database.path.display());

    let pool = medpipe::db::init_database_pool(&config.database.path).await?;
    info!("Database connection established");

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let state = AppState::new(pool, config);

    // Pick up jobs a previous process left behind
    state.resume_orphaned_jobs().await?;

    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Listening on http://{}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
