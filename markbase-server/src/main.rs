//! # Markbase Server
//!
//! Local document indexing and search backend. Points at filesystem
//! folders, converts heterogeneous files into Markdown, persists content
//! and metadata in Postgres with trigram search indexes, and streams
//! ingestion progress to SSE subscribers.

pub mod document_handlers;
pub mod errors;
pub mod ingest_handlers;
pub mod routes;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::Json};
use clap::Parser;
use serde_json::{json, Value};
use sqlx::postgres::PgPoolOptions;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use markbase_core::{IngestConfig, Ingestor};

pub use routes::create_app;

/// Command line arguments for the Markbase server
#[derive(Parser, Debug)]
#[command(name = "markbase-server")]
#[command(about = "Local document indexing and search backend")]
struct Args {
    /// Server port
    #[arg(short, long, env = "SERVER_PORT", default_value_t = 3809)]
    port: u16,

    /// Server host
    #[arg(long, env = "SERVER_HOST", default_value = "127.0.0.1")]
    host: String,

    /// Postgres connection string
    #[arg(long, env = "DATABASE_URL")]
    database_url: String,
}

/// Server application state
#[derive(Clone)]
pub struct AppState {
    pub ingestor: Arc<Ingestor>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let (config, config_source) = IngestConfig::load_from_env()?;
    info!("Ingest configuration loaded from {:?}", config_source);

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&args.database_url)
        .await?;
    sqlx::migrate!().run(&pool).await?;
    info!("Database migrations applied");

    let ingestor = Arc::new(Ingestor::new(Arc::new(config), pool));
    let state = AppState { ingestor };

    let app = create_app(state);
    let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    info!("Markbase server listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Could not install shutdown handler: {e}");
        return;
    }
    info!("Shutdown signal received");
}

pub async fn health_handler(State(state): State<AppState>) -> Result<Json<Value>, StatusCode> {
    match sqlx::query("SELECT 1")
        .execute(state.ingestor.documents().pool())
        .await
    {
        Ok(_) => Ok(Json(json!({ "status": "ok" }))),
        Err(e) => {
            warn!("Health check failed: {e}");
            Err(StatusCode::SERVICE_UNAVAILABLE)
        }
    }
}
