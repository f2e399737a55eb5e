//! Configuration Loader
//!
//! Loads and validates configuration from TOML files matching config/relay.toml.
//! Every section is optional; omitted keys take the built-in defaults.

use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::domain::invocation::{
    DEFAULT_INITIAL_BUY_SCRIPT, DEFAULT_INTERPRETER, DEFAULT_MARKET_NAME, DEFAULT_NEXT_BUY_SCRIPT,
    DEFAULT_WORKER_TIMEOUT,
};
use crate::domain::safety::{DEFAULT_MAX_LEVEL, DEFAULT_MAX_PROFIT};
use crate::domain::{SafetyLimits, WorkerSettings};

/// Config file used when none is given on the command line
pub const DEFAULT_CONFIG_PATH: &str = "config/relay.toml";

pub const DEFAULT_PORT: u16 = 5002;

/// Main configuration structure matching relay.toml
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerSection,
    pub safety: SafetySection,
    pub workers: WorkersSection,
    pub audit: AuditSection,
    pub logging: LoggingSection,
}

/// HTTP listener configuration section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    /// Bind address
    pub host: String,
    pub port: u16,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
        }
    }
}

impl ServerSection {
    /// Get listen port with environment variable override
    /// Checks PORT env var first, falls back to config value
    pub fn get_port(&self) -> u16 {
        std::env::var("PORT")
            .ok()
            .and_then(|p| p.trim().parse().ok())
            .unwrap_or(self.port)
    }
}

/// Safety limits configuration section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SafetySection {
    /// Maximum profit target per instruction, in USDC
    pub max_profit: Decimal,
    /// Highest buy level a worker may be asked to place
    pub max_level: i64,
    /// Tokens allowed to trade; empty allows all
    pub allowed_token_ids: Vec<String>,
    /// Master switch for all checks
    pub enabled: bool,
}

impl Default for SafetySection {
    fn default() -> Self {
        Self {
            max_profit: DEFAULT_MAX_PROFIT,
            max_level: DEFAULT_MAX_LEVEL,
            allowed_token_ids: Vec::new(),
            enabled: true,
        }
    }
}

/// Worker process configuration section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkersSection {
    /// Program used to run the worker scripts; empty runs them directly
    pub interpreter: String,
    pub initial_buy_script: String,
    pub next_buy_script: String,
    /// Market passed to the initial buy worker
    pub market_name: String,
    /// Wall-clock limit per worker run
    pub timeout_secs: u64,
    /// Pass --dry-run to every worker
    pub dry_run: bool,
}

impl Default for WorkersSection {
    fn default() -> Self {
        Self {
            interpreter: DEFAULT_INTERPRETER.to_string(),
            initial_buy_script: DEFAULT_INITIAL_BUY_SCRIPT.to_string(),
            next_buy_script: DEFAULT_NEXT_BUY_SCRIPT.to_string(),
            market_name: DEFAULT_MARKET_NAME.to_string(),
            timeout_secs: DEFAULT_WORKER_TIMEOUT.as_secs(),
            dry_run: false,
        }
    }
}

impl WorkersSection {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Audit trail configuration section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuditSection {
    /// Directory holding the request log and snapshots
    pub data_dir: String,
}

impl Default for AuditSection {
    fn default() -> Self {
        Self {
            data_dir: "data".to_string(),
        }
    }
}

impl AuditSection {
    /// Get data directory with environment variable override and ~ expansion
    /// Checks WEBHOOK_DATA_DIR env var first, falls back to config value
    pub fn get_data_dir(&self) -> PathBuf {
        let raw = std::env::var("WEBHOOK_DATA_DIR").unwrap_or_else(|_| self.data_dir.clone());
        PathBuf::from(shellexpand::tilde(&raw).into_owned())
    }
}

/// Logging configuration section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Log level: "trace", "debug", "info", "warn", "error"
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),
    #[error("Validation failed: {0}")]
    ValidationError(String),
}

/// Load configuration from a TOML file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let config: Config = toml::from_str(&content)?;
    config.validate()?;
    Ok(config)
}

/// Load an explicit config file, or the default path if it exists, or the
/// built-in defaults
pub fn resolve_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    match path {
        Some(path) => load_config(path),
        None if Path::new(DEFAULT_CONFIG_PATH).exists() => load_config(DEFAULT_CONFIG_PATH),
        None => {
            tracing::debug!("No config file found, using defaults");
            Ok(Config::default())
        }
    }
}

impl Config {
    /// Validate all configuration parameters
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::ValidationError(
                "port must be > 0".to_string(),
            ));
        }

        if self.safety.max_profit <= Decimal::ZERO {
            return Err(ConfigError::ValidationError(format!(
                "max_profit must be > 0, got {}",
                self.safety.max_profit
            )));
        }

        if self.safety.max_level < 0 {
            return Err(ConfigError::ValidationError(format!(
                "max_level must be >= 0, got {}",
                self.safety.max_level
            )));
        }

        if self.workers.timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "timeout_secs must be > 0".to_string(),
            ));
        }

        if self.workers.initial_buy_script.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "initial_buy_script cannot be empty".to_string(),
            ));
        }

        if self.workers.next_buy_script.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "next_buy_script cannot be empty".to_string(),
            ));
        }

        if self.workers.market_name.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "market_name cannot be empty".to_string(),
            ));
        }

        if self.audit.data_dir.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "data_dir cannot be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Worker settings for a given resolved data directory
    pub fn worker_settings(&self, data_dir: PathBuf) -> WorkerSettings {
        WorkerSettings {
            interpreter: self.workers.interpreter.trim().to_string(),
            initial_buy_script: PathBuf::from(&self.workers.initial_buy_script),
            next_buy_script: PathBuf::from(&self.workers.next_buy_script),
            market_name: self.workers.market_name.clone(),
            data_dir,
            dry_run: self.workers.dry_run,
        }
    }
}

// Conversion from Config to the policy thresholds
impl From<&Config> for SafetyLimits {
    fn from(config: &Config) -> Self {
        SafetyLimits {
            max_profit: config.safety.max_profit,
            max_level: config.safety.max_level,
            allowed_token_ids: config
                .safety
                .allowed_token_ids
                .iter()
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect::<BTreeSet<_>>(),
            enabled: config.safety.enabled,
        }
    }
}
