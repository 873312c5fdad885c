//! Config file schema.
//!
//! Policy constants from the gateway (idempotency TTL, history caps, prune
//! ages, heartbeat intervals) live here as configurable defaults rather than
//! magic numbers scattered through the code.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("validation error: {0}")]
    Validation(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Top-level config
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub version: String,
    pub server: ServerFileConfig,
    pub gateway: GatewayFileConfig,
    pub sessions: SessionsConfig,
    pub bridge: BridgeFileConfig,
    pub channels: Vec<ChannelEntry>,
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            server: ServerFileConfig::default(),
            gateway: GatewayFileConfig::default(),
            sessions: SessionsConfig::default(),
            bridge: BridgeFileConfig::default(),
            channels: Vec::new(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Load from a JSON file; a missing file yields defaults.
    pub async fn load(path: &Path) -> ConfigResult<Self> {
        match tokio::fs::read_to_string(path).await {
            Ok(raw) => {
                let config: Config = serde_json::from_str(&raw)?;
                config.validate()?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("no config at {}, using defaults", path.display());
                Ok(Config::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Persist as pretty JSON.
    pub async fn save(&self, path: &Path) -> ConfigResult<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let raw = serde_json::to_string_pretty(self)?;
        tokio::fs::write(path, raw).await?;
        Ok(())
    }

    fn validate(&self) -> ConfigResult<()> {
        if self.sessions.history_trim > self.sessions.history_cap {
            return Err(ConfigError::Validation(format!(
                "sessions.history_trim ({}) must not exceed sessions.history_cap ({})",
                self.sessions.history_trim, self.sessions.history_cap
            )));
        }
        if self.gateway.idempotency_ttl_secs == 0 {
            return Err(ConfigError::Validation(
                "gateway.idempotency_ttl_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// HTTP + WebSocket listener
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerFileConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerFileConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 18790,
        }
    }
}

impl ServerFileConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Gateway behaviour knobs
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GatewayFileConfig {
    /// Loopback-trust bearer token; `None` accepts any connect frame
    pub auth_token: Option<String>,
    pub max_connections: usize,
    /// Broadcast heartbeat interval
    pub heartbeat_interval_secs: u64,
    /// Replay window for idempotency keys
    pub idempotency_ttl_secs: u64,
}

impl Default for GatewayFileConfig {
    fn default() -> Self {
        Self {
            auth_token: None,
            max_connections: 1000,
            heartbeat_interval_secs: 30,
            idempotency_ttl_secs: 300,
        }
    }
}

/// Session manager policy
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionsConfig {
    /// Snapshot directory; `None` means `~/.rattan/sessions`
    pub dir: Option<String>,
    /// History length that triggers a trim
    pub history_cap: usize,
    /// Entries kept (most recent) after a trim
    pub history_trim: usize,
    /// Group sessions untouched for longer than this are pruned
    pub prune_max_age_hours: u64,
    /// How often the prune sweep runs
    pub prune_interval_secs: u64,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            dir: None,
            history_cap: 1000,
            history_trim: 500,
            prune_max_age_hours: 24,
            prune_interval_secs: 3600,
        }
    }
}

/// Backend bridge supervision
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BridgeFileConfig {
    pub host: String,
    pub port: u16,
    /// Ordered interpreter candidates; first existing path wins
    pub interpreter_candidates: Vec<String>,
    /// Ordered entry script candidates; first existing path wins
    pub entry_candidates: Vec<String>,
    /// Working directory for the spawned process; `None` means `~/.rattan`
    pub working_dir: Option<String>,
    pub health_poll_interval_ms: u64,
    pub health_poll_attempts: u32,
    /// Duplex ping interval
    pub heartbeat_interval_secs: u64,
    /// Caller-visible proxy timeout
    pub request_timeout_secs: u64,
    /// Grace period before the child is force-killed on stop
    pub shutdown_timeout_secs: u64,
    /// Model name passed on chat completions
    pub model: String,
}

impl Default for BridgeFileConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 18791,
            interpreter_candidates: vec![
                "~/.rattan/backend/venv/bin/python3".to_string(),
                "/usr/local/bin/python3".to_string(),
                "/usr/bin/python3".to_string(),
            ],
            entry_candidates: vec![
                "~/.rattan/backend/server.py".to_string(),
                "./backend/server.py".to_string(),
            ],
            working_dir: None,
            health_poll_interval_ms: 500,
            health_poll_attempts: 30,
            heartbeat_interval_secs: 10,
            request_timeout_secs: 60,
            shutdown_timeout_secs: 5,
            model: "rattan-local".to_string(),
        }
    }
}

/// One registered channel adapter
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChannelEntry {
    /// Unique adapter id, used for logging and routing provenance
    pub id: String,
    /// Adapter implementation to instantiate
    pub adapter: String,
    /// Default cognitive domain for messages from this channel
    pub default_domain: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// env-filter directive, e.g. "info" or "rattan_server=debug"
    pub level: String,
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}
