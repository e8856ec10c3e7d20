//! Command routing modules
//!
//! - research_routes: research lifecycle, messages, worker events, activity feed
//! - config_routes: read-only configuration and provider presets

pub mod config_routes;
pub mod research_routes;

use crate::session::{Orchestrator, OrchestratorError, OrchestratorResult};
use axum::http::StatusCode;
use serde::Serialize;
use serde_json::Value;

use super::ServerAppState;

/// A failed command with the HTTP status it maps to
#[derive(Debug)]
pub struct RouteError {
    pub status: StatusCode,
    pub message: String,
}

impl RouteError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl From<String> for RouteError {
    fn from(message: String) -> Self {
        Self::bad_request(message)
    }
}

impl From<OrchestratorError> for RouteError {
    fn from(err: OrchestratorError) -> Self {
        let status = match &err {
            OrchestratorError::NotFound { .. } => StatusCode::NOT_FOUND,
            OrchestratorError::InvalidState(_) | OrchestratorError::Conflict { .. } => {
                StatusCode::CONFLICT
            }
            _ => StatusCode::BAD_REQUEST,
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

pub type RouteResult = Result<Value, RouteError>;

/// Extract a required argument from JSON args
pub fn get_arg<T: serde::de::DeserializeOwned>(args: &Value, name: &str) -> Result<T, String> {
    serde_json::from_value(
        args.get(name)
            .ok_or_else(|| format!("Missing argument: {}", name))?
            .clone(),
    )
    .map_err(|e| format!("Invalid argument {}: {}", name, e))
}

/// Extract an optional argument from JSON args
pub fn get_opt_arg<T: serde::de::DeserializeOwned>(
    args: &Value,
    name: &str,
) -> Result<Option<T>, String> {
    match args.get(name) {
        Some(v) if !v.is_null() => serde_json::from_value(v.clone())
            .map(Some)
            .map_err(|e| format!("Invalid argument {}: {}", name, e)),
        _ => Ok(None),
    }
}

/// Run an orchestrator call on the blocking pool and serialize its result
pub async fn with_orchestrator<T, F>(state: &ServerAppState, f: F) -> RouteResult
where
    T: Serialize + Send + 'static,
    F: FnOnce(&Orchestrator) -> OrchestratorResult<T> + Send + 'static,
{
    let orchestrator = state.orchestrator.clone();
    let result = tokio::task::spawn_blocking(move || f(&orchestrator))
        .await
        .map_err(|e| RouteError::internal(format!("Command task failed: {}", e)))??;
    serde_json::to_value(result).map_err(|e| RouteError::internal(e.to_string()))
}

/// Route a command to its implementation by dispatching to the appropriate sub-router
pub async fn route_command(cmd: &str, args: Value, state: &ServerAppState) -> RouteResult {
    if research_routes::is_research_command(cmd) {
        return research_routes::route_research_command(cmd, args, state).await;
    }

    if config_routes::is_config_command(cmd) {
        return config_routes::route_config_command(cmd, args, state);
    }

    Err(RouteError::bad_request(format!("Unknown command: {}", cmd)))
}
