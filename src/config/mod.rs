//! Configuration module
//!
//! Handles loading and saving BlueRPC configuration.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::discovery::SERVICE_TYPE;
use crate::network::{
    generate_service_id, ServerConfig, TcpTransport, DEFAULT_BACKLOG, PORT_ANY,
};
use crate::protocol::DEFAULT_MAX_ENDPOINT_LEN;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Config file not found: {0}")]
    NotFound(PathBuf),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General settings
    #[serde(default)]
    pub general: GeneralConfig,

    /// Server settings
    #[serde(default)]
    pub server: ServerSection,

    /// Discovery settings
    #[serde(default)]
    pub discovery: DiscoveryConfig,
}

/// General configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Enable verbose logging
    #[serde(default)]
    pub verbose: bool,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
    /// Name to advertise the service under
    #[serde(default = "default_service_name")]
    pub service_name: String,
    /// Service identifier (generated per start if not set)
    pub service_id: Option<String>,
    /// Port to listen on, 0 for any available
    #[serde(default)]
    pub port: u16,
    /// Pending connection backlog
    #[serde(default = "default_backlog")]
    pub backlog: u32,
    /// Interface to bind to
    #[serde(default = "default_bind_address")]
    pub bind_address: IpAddr,
    /// Local transport address override (derived from the bind address if not set)
    pub local_address: Option<String>,
    /// Longest accepted endpoint name
    #[serde(default = "default_max_endpoint_len")]
    pub max_endpoint_len: usize,
}

fn default_service_name() -> String {
    hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "bluerpc".to_string())
}

fn default_backlog() -> u32 {
    DEFAULT_BACKLOG
}

fn default_bind_address() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_max_endpoint_len() -> usize {
    DEFAULT_MAX_ENDPOINT_LEN
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            service_id: None,
            port: PORT_ANY,
            backlog: default_backlog(),
            bind_address: default_bind_address(),
            local_address: None,
            max_endpoint_len: default_max_endpoint_len(),
        }
    }
}

/// Discovery configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Advertise the service over mDNS
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// DNS-SD service type
    #[serde(default = "default_service_type")]
    pub service_type: String,
}

fn default_true() -> bool {
    true
}

fn default_service_type() -> String {
    SERVICE_TYPE.to_string()
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            service_type: default_service_type(),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from the default location
    pub fn load_default() -> ConfigResult<Self> {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("bluerpc/config.toml")),
            Some(PathBuf::from("./bluerpc.toml")),
            Some(PathBuf::from("./config.toml")),
        ];

        for path in config_paths.iter().flatten() {
            if path.exists() {
                return Self::load(path);
            }
        }

        // Return default config if no file found
        Ok(Self::default())
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let contents = toml::to_string_pretty(self)?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Get the service identifier, generating one if not set
    pub fn service_id(&self) -> String {
        self.server
            .service_id
            .clone()
            .unwrap_or_else(generate_service_id)
    }

    /// Build the TCP transport described by the server section
    pub fn transport(&self) -> TcpTransport {
        let transport = TcpTransport::new(self.server.bind_address);
        match &self.server.local_address {
            Some(address) => transport.with_local_address(address.clone()),
            None => transport,
        }
    }

    /// Build the runtime server configuration
    pub fn server_config(&self) -> ServerConfig {
        ServerConfig::new(self.server.service_name.clone(), self.service_id())
            .with_port(self.server.port)
            .with_backlog(self.server.backlog)
            .with_max_endpoint_len(self.server.max_endpoint_len)
    }
}

/// Generate a sample configuration file
pub fn generate_sample_config() -> ConfigResult<String> {
    let config = Config {
        server: ServerSection {
            service_name: "Sensor Hub".to_string(),
            service_id: Some("94f39d29-7d6d-437d-973b-fba39e49d4ee".to_string()),
            port: 4,
            ..Default::default()
        },
        ..Default::default()
    };

    Ok(toml::to_string_pretty(&config)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::Transport;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.port, PORT_ANY);
        assert_eq!(config.server.backlog, DEFAULT_BACKLOG);
        assert!(config.server.service_id.is_none());
        assert!(config.discovery.enabled);
        assert_eq!(config.discovery.service_type, SERVICE_TYPE);
    }

    #[test]
    fn test_save_and_load() {
        let mut config = Config::default();
        config.server.port = 4100;
        let file = NamedTempFile::new().unwrap();

        config.save(file.path()).unwrap();

        let loaded = Config::load(file.path()).unwrap();
        assert_eq!(loaded.server.port, 4100);
        assert_eq!(loaded.server.service_name, config.server.service_name);
    }

    #[test]
    fn test_load_missing_file() {
        let result = Config::load(Path::new("/nonexistent/bluerpc.toml"));
        assert!(matches!(result, Err(ConfigError::NotFound(_))));
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: Config = toml::from_str("[server]\nservice_name = \"lab\"\n").unwrap();
        assert_eq!(config.server.service_name, "lab");
        assert_eq!(config.server.backlog, DEFAULT_BACKLOG);
        assert_eq!(config.server.max_endpoint_len, DEFAULT_MAX_ENDPOINT_LEN);
        assert!(config.discovery.enabled);
    }

    #[test]
    fn test_sample_config() {
        let sample = generate_sample_config().unwrap();
        let parsed: Config = toml::from_str(&sample).unwrap();
        assert_eq!(parsed.server.service_name, "Sensor Hub");

        let server = parsed.server_config();
        assert_eq!(server.service_id, "94f39d29-7d6d-437d-973b-fba39e49d4ee");
        assert_eq!(server.port, 4);
    }

    #[test]
    fn test_transport_local_address() {
        let mut config = Config::default();
        config.server.bind_address = "127.0.0.1".parse().unwrap();
        assert_eq!(config.transport().local_address().unwrap(), "127.0.0.1");

        config.server.local_address = Some("lab-box".to_string());
        assert_eq!(config.transport().local_address().unwrap(), "lab-box");
    }

    #[test]
    fn test_service_id_generated_when_unset() {
        let config = Config::default();
        let id = config.service_id();
        assert!(uuid::Uuid::parse_str(&id).is_ok());
    }
}
