//! Rattan configuration: file schema, defaults and well-known paths.

pub mod config;

pub use config::{
    BridgeFileConfig, ChannelEntry, Config, ConfigError, ConfigResult, GatewayFileConfig,
    LoggingConfig, ServerFileConfig, SessionsConfig,
};

use std::path::PathBuf;

/// Rattan's home directory (`~/.rattan`)
pub fn rattan_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".rattan"))
}

/// Default config file path (`~/.rattan/config.json`)
pub fn default_config_path() -> Option<PathBuf> {
    rattan_dir().map(|dir| dir.join("config.json"))
}

/// Default session snapshot directory (`~/.rattan/sessions`)
pub fn default_sessions_dir() -> Option<PathBuf> {
    rattan_dir().map(|dir| dir.join("sessions"))
}

/// Default log directory (`~/.rattan/logs`)
pub fn default_logs_dir() -> Option<PathBuf> {
    rattan_dir().map(|dir| dir.join("logs"))
}

/// Create the Rattan directory tree if it does not exist yet.
pub async fn init_rattan_dirs() -> ConfigResult<()> {
    if let Some(base) = rattan_dir() {
        tokio::fs::create_dir_all(&base).await?;
        tokio::fs::create_dir_all(base.join("sessions")).await?;
        tokio::fs::create_dir_all(base.join("logs")).await?;
    }
    Ok(())
}

/// Expand a leading `~/` to the user's home directory.
pub fn expand_tilde(path: &str) -> Option<PathBuf> {
    if let Some(rest) = path.strip_prefix("~/") {
        dirs::home_dir().map(|home| home.join(rest))
    } else {
        Some(PathBuf::from(path))
    }
}
