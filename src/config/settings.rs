//! Relay configuration
//!
//! Loads server settings from an optional `relay.toml` file. Missing file
//! means defaults; CLI flags and the `RELAY_PORT` environment variable (a
//! holdover from the env-file configuration of the original deployment)
//! override file values.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Default configuration file name
pub const CONFIG_FILE: &str = "relay.toml";

/// Environment variable overriding the listen port
pub const PORT_ENV_VAR: &str = "RELAY_PORT";

/// Errors that can occur during config operations
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Read(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid {PORT_ENV_VAR} value: {0}")]
    InvalidPortEnv(String),
}

/// `[server]` section: listen address
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerSection {
    /// Address to bind to
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
        }
    }
}

/// `[limits]` section: resource caps
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RelayLimits {
    /// Maximum simultaneous connections
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Maximum rooms a single connection may belong to
    #[serde(default = "default_max_rooms")]
    pub max_rooms_per_connection: usize,
}

impl Default for RelayLimits {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            max_rooms_per_connection: default_max_rooms(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    5050
}

fn default_max_connections() -> usize {
    1024
}

fn default_max_rooms() -> usize {
    32
}

/// Relay service configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct RelayConfig {
    /// Listen address settings
    #[serde(default)]
    pub server: ServerSection,
    /// Resource caps
    #[serde(default)]
    pub limits: RelayLimits,
}

impl RelayConfig {
    /// Load configuration from a file path
    ///
    /// A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        let config: RelayConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Apply the `RELAY_PORT` environment variable, if set
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Ok(value) = std::env::var(PORT_ENV_VAR) {
            let port = value
                .parse::<u16>()
                .map_err(|_| ConfigError::InvalidPortEnv(value))?;
            self.server.port = port;
        }
        Ok(())
    }

    /// Apply CLI overrides (flags win over file and environment)
    pub fn apply_overrides(&mut self, bind: Option<String>, port: Option<u16>) {
        if let Some(bind) = bind {
            self.server.bind = bind;
        }
        if let Some(port) = port {
            self.server.port = port;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = RelayConfig::default();
        assert_eq!(config.server.bind, "127.0.0.1");
        assert_eq!(config.server.port, 5050);
        assert_eq!(config.limits.max_connections, 1024);
        assert_eq!(config.limits.max_rooms_per_connection, 32);
    }

    #[test]
    fn test_load_nonexistent_returns_default() {
        let dir = tempdir().unwrap();
        let config = RelayConfig::load(&dir.path().join(CONFIG_FILE)).unwrap();
        assert_eq!(config, RelayConfig::default());
    }

    #[test]
    fn test_load_full_config() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        fs::write(
            &path,
            r#"
[server]
bind = "0.0.0.0"
port = 8080

[limits]
max_connections = 64
max_rooms_per_connection = 4
"#,
        )
        .unwrap();

        let config = RelayConfig::load(&path).unwrap();
        assert_eq!(config.server.bind, "0.0.0.0");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.limits.max_connections, 64);
        assert_eq!(config.limits.max_rooms_per_connection, 4);
    }

    #[test]
    fn test_load_partial_config_fills_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        fs::write(&path, "[server]\nport = 9999\n").unwrap();

        let config = RelayConfig::load(&path).unwrap();
        assert_eq!(config.server.port, 9999);
        assert_eq!(config.server.bind, "127.0.0.1");
        assert_eq!(config.limits, RelayLimits::default());
    }

    #[test]
    fn test_parse_invalid_toml() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        fs::write(&path, "not valid toml [[[").unwrap();

        let result = RelayConfig::load(&path);
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_apply_overrides() {
        let mut config = RelayConfig::default();
        config.apply_overrides(Some("0.0.0.0".to_string()), Some(7000));
        assert_eq!(config.server.bind, "0.0.0.0");
        assert_eq!(config.server.port, 7000);

        // None leaves values untouched
        config.apply_overrides(None, None);
        assert_eq!(config.server.port, 7000);
    }

    #[test]
    fn test_config_toml_roundtrip() {
        let config = RelayConfig {
            server: ServerSection {
                bind: "10.0.0.1".to_string(),
                port: 6000,
            },
            limits: RelayLimits {
                max_connections: 10,
                max_rooms_per_connection: 2,
            },
        };

        let rendered = toml::to_string(&config).unwrap();
        let parsed: RelayConfig = toml::from_str(&rendered).unwrap();
        assert_eq!(config, parsed);
    }
}
