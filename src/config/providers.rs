// LLM provider presets for the research worker
//
// The worker picks its client from the provider id and reads the API key from
// the provider's conventional environment variable.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A builtin provider preset
/// Note: This is hardcoded data, not deserialized from files
#[derive(Debug, Clone)]
pub struct ProviderPreset {
    /// Provider ID passed to the worker (e.g., "anthropic")
    pub id: &'static str,
    /// Display name
    pub name: &'static str,
    /// Environment variable the worker reads the API key from
    pub api_key_env: &'static str,
    /// Model used when the caller does not pick one
    pub default_model: &'static str,
}

/// Builtin provider presets
pub static PROVIDERS: &[ProviderPreset] = &[
    ProviderPreset {
        id: "anthropic",
        name: "Anthropic",
        api_key_env: "ANTHROPIC_API_KEY",
        default_model: "claude-sonnet-4-5",
    },
    ProviderPreset {
        id: "openai",
        name: "OpenAI",
        api_key_env: "OPENAI_API_KEY",
        default_model: "gpt-4o-mini",
    },
    ProviderPreset {
        id: "google",
        name: "Google",
        api_key_env: "GOOGLE_API_KEY",
        default_model: "gemini-pro",
    },
];

pub const DEFAULT_PROVIDER: &str = "anthropic";

/// Get a provider preset by ID
pub fn get_provider_preset(id: &str) -> Option<&'static ProviderPreset> {
    PROVIDERS.iter().find(|p| p.id == id)
}

/// Default model for a provider; unknown providers get the Anthropic default
pub fn default_model(provider_id: &str) -> &'static str {
    get_provider_preset(provider_id)
        .or_else(|| get_provider_preset(DEFAULT_PROVIDER))
        .map(|p| p.default_model)
        .unwrap_or("claude-sonnet-4-5")
}

/// Provider info returned to the frontend
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderInfo {
    pub id: String,
    pub name: String,
    pub default_model: String,
    /// Whether the key variable is set in the portal's own environment
    pub has_env_key: bool,
}

pub fn list_providers() -> Vec<ProviderInfo> {
    PROVIDERS
        .iter()
        .map(|p| ProviderInfo {
            id: p.id.to_string(),
            name: p.name.to_string(),
            default_model: p.default_model.to_string(),
            has_env_key: std::env::var(p.api_key_env)
                .map(|v| !v.is_empty())
                .unwrap_or(false),
        })
        .collect()
}

/// Environment variables to set on the worker for a provider.
///
/// Without an explicit key nothing is set and the worker inherits the
/// portal's environment.
pub fn build_provider_env_vars(provider_id: &str, api_key: Option<&str>) -> HashMap<String, String> {
    let mut env = HashMap::new();
    let Some(key) = api_key.filter(|k| !k.is_empty()) else {
        return env;
    };

    match get_provider_preset(provider_id) {
        Some(preset) => {
            env.insert(preset.api_key_env.to_string(), key.to_string());
        }
        None => {
            log::warn!(
                "[Providers] Unknown provider '{}', passing key as {}_API_KEY",
                provider_id,
                provider_id.to_uppercase()
            );
            env.insert(format!("{}_API_KEY", provider_id.to_uppercase()), key.to_string());
        }
    }
    env
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_provider_preset() {
        let preset = get_provider_preset("openai").unwrap();
        assert_eq!(preset.api_key_env, "OPENAI_API_KEY");
        assert!(get_provider_preset("unknown").is_none());
    }

    #[test]
    fn test_default_model() {
        assert_eq!(default_model("anthropic"), "claude-sonnet-4-5");
        assert_eq!(default_model("google"), "gemini-pro");
        assert_eq!(default_model("mystery"), "claude-sonnet-4-5");
    }

    #[test]
    fn test_build_provider_env_vars() {
        let env = build_provider_env_vars("anthropic", Some("sk-test"));
        assert_eq!(env.get("ANTHROPIC_API_KEY"), Some(&"sk-test".to_string()));
        assert_eq!(env.len(), 1);

        assert!(build_provider_env_vars("anthropic", None).is_empty());
        assert!(build_provider_env_vars("anthropic", Some("")).is_empty());

        let env = build_provider_env_vars("mistral", Some("k"));
        assert_eq!(env.get("MISTRAL_API_KEY"), Some(&"k".to_string()));
    }

    #[test]
    fn test_list_providers_covers_presets() {
        let providers = list_providers();
        assert_eq!(providers.len(), PROVIDERS.len());
        assert!(providers.iter().any(|p| p.id == "google"));
    }
}
