//! Configuration command routing
//!
//! Handles: list_providers, get_portal_config

use crate::config::providers;
use serde_json::{json, Value};

use super::{RouteError, RouteResult, ServerAppState};

pub fn is_config_command(cmd: &str) -> bool {
    matches!(cmd, "list_providers" | "get_portal_config")
}

pub fn route_config_command(cmd: &str, _args: Value, state: &ServerAppState) -> RouteResult {
    match cmd {
        "list_providers" => serde_json::to_value(providers::list_providers())
            .map_err(|e| RouteError::internal(e.to_string())),

        "get_portal_config" => {
            let config = &state.config;
            // API keys never leave the server; only which providers have one
            let mut configured: Vec<&String> = config
                .api_keys
                .keys()
                .filter(|provider| config.api_key(provider).is_some())
                .collect();
            configured.sort();

            Ok(json!({
                "server": config.server,
                "storage": {
                    "databasePath": config.storage.database_path(),
                    "projectsRoot": config.storage.projects_root(),
                },
                "worker": config.worker,
                "providersWithKeys": configured,
            }))
        }

        _ => Err(RouteError::bad_request(format!(
            "Unknown config command: {}",
            cmd
        ))),
    }
}
