// Portal configuration: ~/.research-portal/config.toml plus CLI overrides

pub mod providers;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::file_storage::get_global_portal_dir;

pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Research portal configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PortalConfig {
    /// HTTP server settings
    #[serde(default)]
    pub server: ServerConfig,
    /// Where the store and project directories live
    #[serde(default)]
    pub storage: StorageConfig,
    /// How the research worker is launched
    #[serde(default)]
    pub worker: WorkerConfig,
    /// API keys indexed by provider ID (e.g., "openai" -> "sk-...")
    #[serde(rename = "apiKeys", alias = "api_keys", default)]
    pub api_keys: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Allowed CORS origins; empty allows any origin
    #[serde(rename = "corsOrigins", alias = "cors_origins", default)]
    pub cors_origins: Vec<String>,
}

fn default_port() -> u16 { 3430 }
fn default_bind() -> String { "127.0.0.1".to_string() }

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind: default_bind(),
            cors_origins: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StorageConfig {
    /// SQLite file; defaults to ~/.research-portal/portal.db
    #[serde(rename = "databasePath", alias = "database_path", default)]
    pub database_path: Option<PathBuf>,
    /// Parent of every project directory; defaults to ~/.research-portal/research
    #[serde(rename = "projectsRoot", alias = "projects_root", default)]
    pub projects_root: Option<PathBuf>,
}

impl StorageConfig {
    pub fn database_path(&self) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(|| get_global_portal_dir().join("portal.db"))
    }

    pub fn projects_root(&self) -> PathBuf {
        self.projects_root
            .clone()
            .unwrap_or_else(|| get_global_portal_dir().join("research"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Interpreter or executable, resolved through PATH
    #[serde(default = "default_program")]
    pub program: String,
    /// Worker script passed as the first argument
    #[serde(default = "default_script")]
    pub script: PathBuf,
    /// How long to wait after spawn before checking for an immediate exit
    #[serde(rename = "startupGraceMs", alias = "startup_grace_ms", default = "default_startup_grace_ms")]
    pub startup_grace_ms: u64,
    /// Exit poll interval for the worker monitor
    #[serde(rename = "pollIntervalMs", alias = "poll_interval_ms", default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(rename = "defaultProvider", alias = "default_provider", default = "default_provider")]
    pub default_provider: String,
    #[serde(rename = "defaultModel", alias = "default_model", default)]
    pub default_model: Option<String>,
}

fn default_program() -> String { "python3".to_string() }
fn default_script() -> PathBuf { PathBuf::from("scripts/research-agent.py") }
fn default_startup_grace_ms() -> u64 { 100 }
fn default_poll_interval_ms() -> u64 { 500 }
fn default_provider() -> String { providers::DEFAULT_PROVIDER.to_string() }

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            script: default_script(),
            startup_grace_ms: default_startup_grace_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            default_provider: default_provider(),
            default_model: None,
        }
    }
}

/// Values given on the command line; `Some` wins over the file
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub port: Option<u16>,
    pub bind: Option<String>,
    pub cors_origins: Vec<String>,
    pub database_path: Option<PathBuf>,
    pub projects_root: Option<PathBuf>,
    pub worker_program: Option<String>,
    pub worker_script: Option<PathBuf>,
}

impl PortalConfig {
    /// Default config path (~/.research-portal/config.toml)
    pub fn default_path() -> PathBuf {
        get_global_portal_dir().join(CONFIG_FILE_NAME)
    }

    /// Load configuration.
    ///
    /// An explicit path must exist. The default path is optional and falls
    /// back to built-in defaults when absent.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, required) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (Self::default_path(), false),
        };

        if !path.exists() {
            if required {
                return Err(anyhow!("Config file not found: {}", path.display()));
            }
            log::debug!("[Config] No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(&path)
            .map_err(|e| anyhow!("Failed to read config file '{}': {}", path.display(), e))?;
        let config = Self::parse(&contents)
            .map_err(|e| anyhow!("Failed to parse config file '{}': {}", path.display(), e))?;

        log::info!("[Config] Loaded {}", path.display());
        Ok(config)
    }

    pub fn parse(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    pub fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(port) = overrides.port {
            self.server.port = port;
        }
        if let Some(bind) = overrides.bind {
            self.server.bind = bind;
        }
        if !overrides.cors_origins.is_empty() {
            self.server.cors_origins = overrides.cors_origins;
        }
        if overrides.database_path.is_some() {
            self.storage.database_path = overrides.database_path;
        }
        if overrides.projects_root.is_some() {
            self.storage.projects_root = overrides.projects_root;
        }
        if let Some(program) = overrides.worker_program {
            self.worker.program = program;
        }
        if let Some(script) = overrides.worker_script {
            self.worker.script = script;
        }
    }

    /// Configured API key for a provider, if any
    pub fn api_key(&self, provider_id: &str) -> Option<&str> {
        self.api_keys
            .get(provider_id)
            .map(String::as_str)
            .filter(|k| !k.is_empty())
    }
}
