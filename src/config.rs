//! Configuration file support for fluentflow
//!
//! Reads from .fluentflow/config.toml

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const CONFIG_DIR: &str = ".fluentflow";
pub const CONFIG_FILE: &str = "config.toml";

/// Configuration structure
#[derive(Debug, Deserialize, Serialize, Default, Clone)]
pub struct Config {
    /// HTTP listener settings
    #[serde(default)]
    pub server: ServerConfig,

    /// API authentication
    #[serde(default)]
    pub auth: AuthConfig,

    /// Values filled in when a request leaves them out
    #[serde(default)]
    pub defaults: DefaultsConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    /// Default: "127.0.0.1"
    #[serde(default = "default_host")]
    pub host: String,

    /// Default: 3030
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Bearer tokens are never stored; only their SHA-256 hex digests are.
#[derive(Debug, Deserialize, Serialize, Default, Clone)]
pub struct AuthConfig {
    #[serde(default)]
    pub token_hashes: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DefaultsConfig {
    /// Location for new schedule events. Default: "Speech Room"
    #[serde(default = "default_location")]
    pub location: String,

    /// Session type for new schedule events. Default: "Individual"
    #[serde(default = "default_session_type")]
    pub session_type: String,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3030
}

fn default_location() -> String {
    "Speech Room".to_string()
}

fn default_session_type() -> String {
    "Individual".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            location: default_location(),
            session_type: default_session_type(),
        }
    }
}

impl Config {
    /// Load config from .fluentflow/config.toml
    /// Returns default config if file doesn't exist
    pub fn load() -> Self {
        if let Some(path) = Self::find_config_path() {
            match Self::load_from(&path) {
                Ok(config) => return config,
                Err(e) => log::warn!("Ignoring {}: {}", path.display(), e),
            }
        }
        Self::default()
    }

    /// Parse a specific config file
    pub fn load_from(path: &Path) -> Result<Self, String> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| format!("could not read config: {}", e))?;
        toml::from_str(&contents).map_err(|e| format!("invalid config: {}", e))
    }

    /// Write this config as TOML
    pub fn save_to(&self, path: &Path) -> Result<(), String> {
        let contents =
            toml::to_string_pretty(self).map_err(|e| format!("could not encode config: {}", e))?;
        std::fs::write(path, contents)
            .map_err(|e| format!("could not write {}: {}", path.display(), e))
    }

    /// Find config.toml by walking up directory tree
    pub fn find_config_path() -> Option<PathBuf> {
        let current_dir = std::env::current_dir().ok()?;
        let mut dir = current_dir.as_path();

        loop {
            let config_path = dir.join(CONFIG_DIR).join(CONFIG_FILE);
            if config_path.exists() {
                return Some(config_path);
            }

            match dir.parent() {
                Some(parent) => dir = parent,
                None => break,
            }
        }
        None
    }

    /// Socket address the server binds to
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.port, 3030);
        assert_eq!(config.bind_addr(), "127.0.0.1:3030");
        assert!(config.auth.token_hashes.is_empty());
        assert_eq!(config.defaults.location, "Speech Room");
        assert_eq!(config.defaults.session_type, "Individual");
    }

    #[test]
    fn test_parse_partial_config() {
        let toml = r#"
[server]
port = 8080

[auth]
token_hashes = ["abc123"]
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.auth.token_hashes, vec!["abc123".to_string()]);
        assert_eq!(config.defaults.location, "Speech Room");
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        let mut config = Config::default();
        config.defaults.location = "Room 12".to_string();
        config.auth.token_hashes.push("deadbeef".to_string());
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.defaults.location, "Room 12");
        assert_eq!(loaded.auth.token_hashes, vec!["deadbeef".to_string()]);
    }

    #[test]
    fn test_invalid_config_reports_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[server]\nport = \"not a number\"\n").unwrap();
        assert!(Config::load_from(&path).is_err());
    }
}
