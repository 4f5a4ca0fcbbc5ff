use anyhow::{Context, Result};
use serde::Deserialize;

use crate::accessor::DEFAULT_EXPIRY_BUFFER_SECONDS;

/// Env var naming the TOML config file
pub const CONFIG_PATH_ENV: &str = "TOKENVAULT_CONFIG";

/// Complete tokenvault configuration. Secrets are read from the environment, never from here.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct VaultConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub refresh: RefreshConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// How long an authorization request stays valid
    #[serde(default = "default_callback_state_ttl")]
    pub callback_state_ttl_seconds: i64,
    #[serde(default = "default_state_cleanup_interval")]
    pub state_cleanup_interval_seconds: u64,
}

fn default_bind_address() -> String {
    "0.0.0.0:8787".to_string()
}

fn default_callback_state_ttl() -> i64 {
    600
}

fn default_state_cleanup_interval() -> u64 {
    60
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            callback_state_ttl_seconds: default_callback_state_ttl(),
            state_cleanup_interval_seconds: default_state_cleanup_interval(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    #[default]
    Sqlite,
}

/// Token storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,
    #[serde(default = "default_sqlite_path")]
    pub sqlite_path: String,
    /// How often expired entries are swept (seconds)
    #[serde(default = "default_purge_interval")]
    pub purge_interval_seconds: u64,
}

fn default_sqlite_path() -> String {
    "tokens.db".to_string()
}

fn default_purge_interval() -> u64 {
    300
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            sqlite_path: default_sqlite_path(),
            purge_interval_seconds: default_purge_interval(),
        }
    }
}

/// Token refresh configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RefreshConfig {
    /// Tokens expiring within this window are refreshed before use
    #[serde(default = "default_expiry_buffer")]
    pub expiry_buffer_seconds: i64,
}

fn default_expiry_buffer() -> i64 {
    DEFAULT_EXPIRY_BUFFER_SECONDS
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            expiry_buffer_seconds: default_expiry_buffer(),
        }
    }
}

/// Load configuration from TOML file
pub fn load_config(path: &str) -> Result<VaultConfig> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read config file {}", path))?;
    let config: VaultConfig =
        toml::from_str(&contents).with_context(|| format!("Failed to parse config file {}", path))?;
    Ok(config)
}

/// Load from `TOKENVAULT_CONFIG` if set, defaults otherwise
pub fn load_from_env() -> Result<VaultConfig> {
    match std::env::var(CONFIG_PATH_ENV) {
        Ok(path) if !path.is_empty() => load_config(&path),
        _ => Ok(VaultConfig::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = VaultConfig::default();
        assert_eq!(config.server.bind_address, "0.0.0.0:8787");
        assert_eq!(config.server.callback_state_ttl_seconds, 600);
        assert_eq!(config.store.backend, StoreBackend::Sqlite);
        assert_eq!(config.store.sqlite_path, "tokens.db");
        assert_eq!(config.store.purge_interval_seconds, 300);
        assert_eq!(config.refresh.expiry_buffer_seconds, 300);
    }

    #[test]
    fn test_config_deserialization() {
        let toml = r#"
            [server]
            bind_address = "127.0.0.1:9000"
            callback_state_ttl_seconds = 120
            state_cleanup_interval_seconds = 30

            [store]
            backend = "memory"
            sqlite_path = "/var/lib/tokenvault/tokens.db"
            purge_interval_seconds = 60

            [refresh]
            expiry_buffer_seconds = 600
        "#;

        let config: VaultConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.server.bind_address, "127.0.0.1:9000");
        assert_eq!(config.server.state_cleanup_interval_seconds, 30);
        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert_eq!(config.store.purge_interval_seconds, 60);
        assert_eq!(config.refresh.expiry_buffer_seconds, 600);
    }

    #[test]
    fn test_partial_config() {
        let toml = r#"
            [store]
            backend = "memory"
        "#;

        let config: VaultConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert_eq!(config.store.sqlite_path, "tokens.db"); // Default
        assert_eq!(config.server.bind_address, "0.0.0.0:8787"); // Default
    }

    #[test]
    fn test_unknown_backend_rejected() {
        let toml = r#"
            [store]
            backend = "redis"
        "#;
        assert!(toml::from_str::<VaultConfig>(toml).is_err());
    }

    #[test]
    fn test_load_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[refresh]\nexpiry_buffer_seconds = 120").unwrap();

        let config = load_config(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.refresh.expiry_buffer_seconds, 120);

        assert!(load_config("/nonexistent/tokenvault.toml").is_err());
    }
}
