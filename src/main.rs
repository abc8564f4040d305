//! Chunkvault Server
//!
//! Accepts file uploads over HTTP, stores them as hashed chunks on
//! S3-compatible storage and streams them back on request.

use std::net::SocketAddr;

use anyhow::Context;
use tokio::signal;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use chunkvault::config::Config;
use chunkvault::state::AppState;
use chunkvault::storage::{self, RemoteStore};
use chunkvault::db::{self, MetadataStore, SqliteMetadataStore};
use chunkvault::routes;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "chunkvault=debug,chunkvault_server=debug,tower_http=debug".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();

    let config = Config::from_env().context("Invalid configuration")?;

    tracing::info!("Starting Chunkvault Server v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        "Chunk size: {} bytes, parallelism: {}, retry attempts: {}",
        config.transfer.chunk_size,
        config.transfer.parallelism,
        config.transfer.retry_max_attempts
    );

    // Initialize remote chunk store
    let remote = storage::connect(&config.storage)
        .await
        .context("Failed to initialize chunk storage")?;
    tracing::info!("Chunk storage backend: {}", remote.name());

    // Initialize database
    let db_pool = db::create_pool(&config.database.url)
        .await
        .context("Failed to initialize database")?;
    tracing::info!("Database initialized at {}", config.database.url);

    // Uploads that were running when the last process stopped can never finish
    let interrupted = SqliteMetadataStore::new(db_pool.clone())
        .fail_interrupted()
        .await
        .context("Failed to sweep interrupted uploads")?;
    if interrupted > 0 {
        tracing::warn!("Marked {} interrupted uploads as failed", interrupted);
    }

    tokio::fs::create_dir_all(&config.transfer.temp_dir)
        .await
        .with_context(|| format!("Failed to create {}", config.transfer.temp_dir.display()))?;

    // Create application state
    let app_state = AppState::new(config.clone(), remote, db_pool);

    // Build CORS layer
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Build router
    let app = routes::app(app_state)
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    // Start server with graceful shutdown
    let ip: std::net::IpAddr = config
        .server
        .host
        .parse()
        .with_context(|| format!("Invalid SERVER_HOST {}", config.server.host))?;
    let addr = SocketAddr::new(ip, config.server.port);
    tracing::info!("Chunkvault Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, starting graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown...");
        },
    }
}
