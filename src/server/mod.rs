//! HTTP server exposing the research orchestrator to the browser UI
//!
//! Everything goes through `POST /api/invoke`; `/health` and `/api/version`
//! are plain GETs for probes and the UI's about box.

mod proxy;
pub mod routes;
pub mod state;

pub use proxy::{invoke_handler, InvokeRequest, InvokeResponse};
pub use state::ServerAppState;

use axum::{
    http::{
        header::{ACCEPT, CONTENT_TYPE},
        HeaderValue,
    },
    routing::{get, post},
    Json, Router,
};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};

/// Version information for the server
#[derive(serde::Serialize)]
#[serde(rename_all = "camelCase")]
struct VersionInfo {
    version: String,
    name: String,
}

/// Build the router with all routes and the CORS layer
pub fn build_router(state: ServerAppState, cors_origins: &[String]) -> Router {
    let cors = if cors_origins.is_empty() {
        // Permissive CORS: allow any origin (default for local development)
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers([CONTENT_TYPE, ACCEPT])
    } else {
        let allowed_origins: Vec<HeaderValue> =
            cors_origins.iter().filter_map(|o| o.parse().ok()).collect();
        CorsLayer::new()
            .allow_origin(allowed_origins)
            .allow_methods(Any)
            .allow_headers([CONTENT_TYPE, ACCEPT])
    };

    Router::new()
        .route("/api/invoke", post(proxy::invoke_handler))
        .route("/health", get(health_handler))
        .route("/api/version", get(version_handler))
        .layer(cors)
        .with_state(state)
}

/// Run the HTTP server until shutdown is requested
pub async fn run_server(
    port: u16,
    bind: &str,
    state: ServerAppState,
    cors_origins: Vec<String>,
) -> Result<(), String> {
    let shutdown_state = state.shutdown_state.clone();
    let app = build_router(state, &cors_origins);

    let addr: SocketAddr = format!("{}:{}", bind, port)
        .parse()
        .map_err(|e| format!("Invalid address: {}", e))?;

    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| format!("Failed to bind to {}: {}", addr, e))?;

    let cors_display = if cors_origins.is_empty() {
        "*".to_string()
    } else {
        cors_origins.join(", ")
    };
    log::info!("[Server] Listening on http://{} (CORS: {})", addr, cors_display);

    let shutdown_signal = async move {
        loop {
            if shutdown_state.is_shutdown_requested() {
                log::info!("[Server] Shutdown signal received, stopping server...");
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        }
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await
        .map_err(|e| format!("Server error: {}", e))
}

async fn health_handler() -> &'static str {
    "OK"
}

async fn version_handler() -> Json<VersionInfo> {
    Json(VersionInfo {
        version: env!("CARGO_PKG_VERSION").to_string(),
        name: env!("CARGO_PKG_NAME").to_string(),
    })
}
