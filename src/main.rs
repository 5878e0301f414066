//! Liaison - tool-using conversation agent
//!
//! A Rust backend implementing a turn orchestration state machine for
//! conversations with a language model that can invoke tools through an
//! MCP-style bridge, with risk-gated human confirmations.

mod api;
mod bridge;
mod db;
mod model;
mod parser;
mod runtime;
mod state_machine;
mod system_prompt;
mod title_generator;
mod transcript;

use api::{create_router, AppState};
use bridge::{BridgeClient, ToolBridge};
use db::Database;
use model::GeminiGateway;
use runtime::{RuntimeManager, SessionInit};
use state_machine::state::DEFAULT_MAX_TOOL_HOPS;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "liaison=info,tower_http=debug".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false),
        )
        .init();

    // Configuration
    let db_path = std::env::var("LIAISON_DB_PATH").unwrap_or_else(|_| {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
        format!("{home}/.liaison/liaison.db")
    });

    let port: u16 = std::env::var("LIAISON_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8400);

    let bridge_url =
        std::env::var("LIAISON_BRIDGE_URL").unwrap_or_else(|_| "http://localhost:3000".to_string());

    let max_tool_hops: u32 = std::env::var("LIAISON_MAX_TOOL_HOPS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_MAX_TOOL_HOPS);

    let api_key = std::env::var("GEMINI_API_KEY").unwrap_or_default();
    let model_id =
        std::env::var("GEMINI_MODEL").unwrap_or_else(|_| "gemini-2.0-flash".to_string());
    let model_base_url = std::env::var("GEMINI_BASE_URL").ok();

    if api_key.is_empty() {
        tracing::warn!("GEMINI_API_KEY is not set; model calls will fail until it is");
    }

    // Ensure database directory exists
    if let Some(parent) = PathBuf::from(&db_path).parent() {
        std::fs::create_dir_all(parent)?;
    }

    // Initialize database
    tracing::info!(path = %db_path, "Opening database");
    let database = Database::open(&db_path)?;

    // In-flight model/tool calls did not survive the restart.
    let reset = database.reset_interrupted_states()?;
    if reset > 0 {
        tracing::info!(count = reset, "Reset interrupted conversations to idle");
    }

    // Probe the bridge and resolve the session initialization up front — an
    // explicit readiness value handed to the runtime, not a shared flag.
    let bridge_client: Arc<dyn ToolBridge> = Arc::new(BridgeClient::new(&bridge_url));
    let init = match bridge_client.health().await {
        Ok(health) => {
            tracing::info!(url = %bridge_url, servers = health.server_count, "Connected to tool bridge");
            match SessionInit::load(&*bridge_client).await {
                Ok(init) => {
                    tracing::info!(servers = init.catalog.len(), "Tool catalog loaded");
                    init
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to load tool catalog; starting without tools");
                    SessionInit::empty()
                }
            }
        }
        Err(e) => {
            tracing::warn!(url = %bridge_url, error = %e, "Tool bridge unreachable; starting without tools");
            SessionInit::empty()
        }
    };

    let gateway = Arc::new(GeminiGateway::new(api_key, model_id, model_base_url));

    // Create application state
    let manager = RuntimeManager::new(database, gateway, bridge_client, init, max_tool_hops);
    let state = AppState::new(manager);

    // Create router
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let compression = CompressionLayer::new()
        .gzip(true)
        .br(true)
        .deflate(true)
        .zstd(true);

    let app = create_router(state).layer(cors).layer(compression);

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Liaison server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
