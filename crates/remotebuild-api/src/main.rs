//! remotebuild API server

use anyhow::Context;
use clap::Parser;
use remotebuild_api::{AppState, routes};
use remotebuild_config::load_server_config;
use remotebuild_db::{JobRepo, MemoryJobRepo, PgJobRepo, create_pool, run_migrations};
use remotebuild_executor::LocalDockerExecutor;
use remotebuild_scheduler::JobService;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "remotebuild-server")]
#[command(about = "Remote package build server", long_about = None)]
struct Args {
    /// Path to the KDL server configuration
    #[arg(short, long, env = "REMOTEBUILD_CONFIG", default_value = "remotebuild.kdl")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = load_server_config(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;

    let repo: Arc<dyn JobRepo> = match &config.database_url {
        Some(url) => {
            info!("Connecting to database...");
            let pool = create_pool(url).await?;
            run_migrations(&pool).await?;
            info!("Database connected");
            Arc::new(PgJobRepo::new(pool))
        }
        None => {
            warn!("No database configured, jobs are kept in memory only");
            Arc::new(MemoryJobRepo::new())
        }
    };

    let executor = LocalDockerExecutor::new().context("connecting to Docker")?;
    let service = Arc::new(JobService::new(&config, repo, Arc::new(executor)));
    let queue = service.start().await?;

    let app = routes::router(AppState::new(service.clone()))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    info!("Starting server on {}", config.listen);
    let listener = TcpListener::bind(&config.listen).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Waiting for running jobs to finish");
    service.stop();
    queue.await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
