//! Server configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via SOCKROUTE_CONFIG)
//! 3. Environment variables

use crate::error::ConfigError;
use crate::server::ServerConfig;
use serde::{Deserialize, Serialize};
use sockroute_protocol::{SchemaRoot, SchemaSource, API_EVENT, DEFAULT_PORT};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub network: NetworkConfig,
    pub api: ApiConfig,
}

impl Config {
    /// Loads configuration from file, then applies environment variable overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var("SOCKROUTE_CONFIG") {
            Ok(path) => Self::from_file(path)?,
            Err(_) => Self::default(),
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::Parse(path.to_path_buf(), e.to_string()))
    }

    /// Loads configuration from environment variables only.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        self.network.apply_overrides(&var);
        self.api.apply_overrides(&var);
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.network.max_connections == 0 {
            return Err(ConfigError::Validation(
                "network.max_connections must be at least 1".to_string(),
            ));
        }
        if self.api.event.is_empty() {
            return Err(ConfigError::Validation(
                "api.event must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Saves configuration to a YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = serde_yaml::to_string(self)
            .map_err(|e| ConfigError::Parse(path.to_path_buf(), e.to_string()))?;
        std::fs::write(path, content).map_err(|e| ConfigError::Io(path.to_path_buf(), e))
    }

    /// Runtime settings for [`Server`](crate::Server).
    pub fn server_config(&self) -> ServerConfig {
        ServerConfig::new(self.network.bind_addr)
            .with_idle_timeout(self.network.idle_timeout())
            .with_max_connections(self.network.max_connections)
            .with_event(self.api.event.clone())
    }
}

/// Network configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    #[serde(with = "socket_addr_serde")]
    pub bind_addr: SocketAddr,
    /// Idle connection timeout in seconds.
    pub idle_timeout_secs: u64,
    pub max_connections: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_PORT)),
            idle_timeout_secs: 300,
            max_connections: 1000,
        }
    }
}

impl NetworkConfig {
    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(addr) = var("SOCKROUTE_BIND").and_then(|v| v.parse().ok()) {
            self.bind_addr = addr;
        }
        if let Some(secs) = var("SOCKROUTE_IDLE_TIMEOUT").and_then(|v| v.parse().ok()) {
            self.idle_timeout_secs = secs;
        }
        if let Some(max) = var("SOCKROUTE_MAX_CONNECTIONS").and_then(|v| v.parse().ok()) {
            self.max_connections = max;
        }
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

/// API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Transport event carrying API calls.
    pub event: String,
    /// Schema source files merged into the schema root.
    pub schema_files: Vec<PathBuf>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            event: API_EVENT.to_string(),
            schema_files: Vec::new(),
        }
    }
}

impl ApiConfig {
    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(event) = var("SOCKROUTE_EVENT") {
            self.event = event;
        }
        if let Some(files) = var("SOCKROUTE_SCHEMA_FILES") {
            self.schema_files = files
                .split(',')
                .map(str::trim)
                .filter(|f| !f.is_empty())
                .map(PathBuf::from)
                .collect();
        }
    }

    /// Reads every schema file and builds the schema root.
    pub fn load_schemas(&self) -> Result<SchemaRoot, ConfigError> {
        let mut sources = Vec::with_capacity(self.schema_files.len());
        for path in &self.schema_files {
            let content =
                std::fs::read_to_string(path).map_err(|e| ConfigError::Io(path.clone(), e))?;
            let source = SchemaSource::from_yaml(&content)
                .map_err(|e| ConfigError::Parse(path.clone(), e.to_string()))?;
            sources.push(source);
        }
        Ok(SchemaRoot::new(sources)?)
    }
}

/// Serde adapter for SocketAddr as a string in YAML.
mod socket_addr_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::net::SocketAddr;

    pub fn serialize<S: Serializer>(addr: &SocketAddr, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&addr.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<SocketAddr, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
