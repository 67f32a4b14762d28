//! Lottery Server
//!
//! Runs the lottery draw engine against Postgres and publishes draw and bet
//! events to RabbitMQ.

mod config;
mod server;
mod shutdown;
mod state;

use clap::Parser;
use config::{ConfigLoader, get_database_url};
use lottery_core::broker::{AmqpConnector, ConnectOutcome, ResilientPublisher};
use lottery_core::draw::DrawEngine;
use lottery_core::framework::DatabaseProcessor;
use server::{build_router, run_server};
use sqlx::postgres::PgPoolOptions;
use state::AppState;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Lottery Server - draw engine with resilient event publishing
#[derive(Parser, Debug)]
#[command(name = "lottery-server")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, default_value = "./lottery-config.toml")]
    config: PathBuf,

    /// Override the listen address (e.g., 0.0.0.0:3000)
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// Override the message broker URL
    #[arg(long, env = "RABBITMQ_URL", hide_env_values = true)]
    broker_url: Option<String>,

    /// Run database migrations on startup
    #[arg(long, default_value = "false")]
    migrate: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    init_tracing();

    // Parse command line arguments
    let args = Args::parse();

    tracing::info!("Starting lottery-server v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config_loader = ConfigLoader::new(&args.config, args.listen, args.broker_url);
    let loaded_config = config_loader.load().map_err(|e| {
        tracing::error!("Failed to load configuration: {}", e);
        e
    })?;
    tracing::info!("Configuration loaded from {:?}", args.config);

    // Get database URL from environment
    let database_url = get_database_url().map_err(|e| {
        tracing::error!("DATABASE_URL environment variable not set");
        e
    })?;

    // Create database connection pool
    tracing::info!("Connecting to database...");
    let db_pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&database_url)
        .await
        .map_err(|e| {
            tracing::error!("Failed to connect to database: {}", e);
            e
        })?;
    tracing::info!("Database connection established");

    // Run migrations if requested
    if args.migrate {
        tracing::info!("Running database migrations...");
        sqlx::migrate!("../migrations")
            .run(&db_pool)
            .await
            .map_err(|e| {
                tracing::error!("Failed to run migrations: {}", e);
                e
            })?;
        tracing::info!("Migrations completed successfully");
    }

    // The publisher starts disconnected; events are dropped until it connects
    let connector = Arc::new(AmqpConnector::new(loaded_config.broker_url));
    let publisher = Arc::new(ResilientPublisher::new(
        connector,
        loaded_config.publisher,
    ));

    let engine = DrawEngine::new(
        DatabaseProcessor {
            pool: db_pool.clone(),
        },
        Arc::clone(&publisher),
    );
    let router = build_router(AppState::new(engine));

    // Connect to the broker in the background so health checks are served
    // while it is unreachable
    let broker_task = tokio::spawn({
        let publisher = Arc::clone(&publisher);
        async move {
            match publisher.connect_default().await {
                ConnectOutcome::Connected => {
                    tracing::info!("Message broker ready");
                }
                ConnectOutcome::NotConnected => {
                    tracing::warn!(
                        "Message broker unavailable, events are dropped until it reconnects"
                    );
                }
            }
        }
    });

    // Run the server
    tracing::info!("Starting HTTP server on {}", loaded_config.listen);
    let result = run_server(router, loaded_config.listen).await;

    // Stop reconnecting and close the broker connection
    tracing::info!("Closing message broker connection...");
    broker_task.abort();
    publisher.close().await;

    // Close database connections gracefully
    tracing::info!("Closing database connections...");
    db_pool.close().await;
    tracing::info!("Server shutdown complete");

    result.map_err(Into::into)
}

/// Initialize the tracing subscriber with environment-based filtering.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn,lapin=warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
