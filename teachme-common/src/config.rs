//! Configuration management for the TeachMe backend.
//!
//! Configuration lives in a single JSON file at `~/.teachme/config.json`.
//!
//! # Configuration Priority
//!
//! 1. Environment variables (TEACHME_* prefix, plus OPENAI_API_KEY)
//! 2. Explicit config file values
//! 3. Default values
//!
//! # Environment Variable Mapping
//!
//! - `TEACHME_BIND_ADDRESS` → server.host
//! - `TEACHME_PORT` → server.port
//! - `TEACHME_DB_PATH` → database.path
//! - `OPENAI_API_KEY` → llm.api_key
//! - `TEACHME_LLM_MODEL` → llm.model
//! - `TEACHME_LLM_BASE_URL` → llm.base_url
//! - `TEACHME_IDLE_TIMEOUT_SECS` → chatbot.idle_timeout_secs
//! - `TEACHME_SWEEP_INTERVAL_SECS` → chatbot.sweep_interval_secs

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Get the configuration directory path.
pub fn config_dir() -> PathBuf {
    directories::UserDirs::new().map_or_else(
        || PathBuf::from(".teachme"),
        |dirs| dirs.home_dir().join(".teachme"),
    )
}

/// Get the configuration file path.
pub fn config_path() -> PathBuf {
    config_dir().join("config.json")
}

/// Root configuration for the TeachMe backend.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// HTTP server settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Document database settings
    #[serde(default)]
    pub database: DatabaseConfig,

    /// LLM provider settings
    #[serde(default)]
    pub llm: LlmConfig,

    /// Chat session lifecycle settings
    #[serde(default)]
    pub chatbot: ChatbotConfig,

    /// Logging settings
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address. Default: "127.0.0.1" (local only)
    #[serde(default = "default_host")]
    pub host: String,

    /// Port number
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".into()
}

fn default_port() -> u16 {
    4500
}

/// Document database configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DatabaseConfig {
    /// Database file path. Defaults to `~/.teachme/teachme.db` when unset.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl DatabaseConfig {
    /// Resolve the database path, falling back to the default location.
    pub fn resolved_path(&self) -> PathBuf {
        self.path
            .clone()
            .unwrap_or_else(|| config_dir().join("teachme.db"))
    }
}

/// LLM provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Provider API key. Usually supplied via OPENAI_API_KEY.
    #[serde(default)]
    pub api_key: Option<String>,

    /// Model identifier
    #[serde(default = "default_model")]
    pub model: String,

    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f64,

    /// Provider base URL
    #[serde(default = "default_base_url")]
    pub base_url: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: default_model(),
            temperature: default_temperature(),
            base_url: default_base_url(),
        }
    }
}

fn default_model() -> String {
    "gpt-3.5-turbo".into()
}

fn default_temperature() -> f64 {
    0.2
}

fn default_base_url() -> String {
    "https://api.openai.com".into()
}

/// Chat session lifecycle configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatbotConfig {
    /// Seconds a session may go without a user message before the sweep
    /// evicts it.
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,

    /// Interval between idle sweep cycles.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Number of post-processing worker tasks.
    #[serde(default = "default_postprocess_workers")]
    pub postprocess_workers: usize,

    /// Post-processing queue capacity. A full queue rejects new jobs.
    #[serde(default = "default_postprocess_queue")]
    pub postprocess_queue: usize,
}

impl Default for ChatbotConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: default_idle_timeout_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            postprocess_workers: default_postprocess_workers(),
            postprocess_queue: default_postprocess_queue(),
        }
    }
}

fn default_idle_timeout_secs() -> u64 {
    300
}

fn default_sweep_interval_secs() -> u64 {
    10
}

fn default_postprocess_workers() -> usize {
    4
}

fn default_postprocess_queue() -> usize {
    64
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Base log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Output format: "json" or "pretty"
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "pretty".into()
}

impl Config {
    /// Load configuration from the default path, applying env overrides.
    ///
    /// A missing config file is not an error; defaults are used.
    pub fn load() -> Result<Self> {
        Self::load_from(config_path())
    }

    /// Load configuration from an explicit path, applying env overrides.
    pub fn load_from(path: PathBuf) -> Result<Self> {
        let mut config = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse config file {}", path.display()))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides on top of file values.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("TEACHME_BIND_ADDRESS") {
            self.server.host = host;
        }
        if let Some(port) = env_parse::<u16>("TEACHME_PORT") {
            self.server.port = port;
        }
        if let Ok(path) = std::env::var("TEACHME_DB_PATH") {
            self.database.path = Some(PathBuf::from(path));
        }
        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            if !key.is_empty() {
                self.llm.api_key = Some(key);
            }
        }
        if let Ok(model) = std::env::var("TEACHME_LLM_MODEL") {
            self.llm.model = model;
        }
        if let Ok(base_url) = std::env::var("TEACHME_LLM_BASE_URL") {
            self.llm.base_url = base_url;
        }
        if let Some(secs) = env_parse::<u64>("TEACHME_IDLE_TIMEOUT_SECS") {
            self.chatbot.idle_timeout_secs = secs;
        }
        if let Some(secs) = env_parse::<u64>("TEACHME_SWEEP_INTERVAL_SECS") {
            self.chatbot.sweep_interval_secs = secs;
        }
    }

    /// Persist configuration to the default path.
    pub fn save(&self) -> Result<()> {
        let path = config_path();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        fs::write(&path, contents)
            .with_context(|| format!("Failed to write config file {}", path.display()))?;
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}
