//! Server configuration module
//!
//! Handles loading and parsing of server configuration from files and environment variables.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::net::buffer::MAX_FRAME_SIZE;
use crate::net::ListenerOptions;

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Path to the configuration file
    #[serde(skip)]
    pub config_path: PathBuf,

    /// Server name shown in logs
    #[serde(default = "default_server_name")]
    pub server_name: String,

    /// Address the game listener binds to
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Game port (TCP)
    #[serde(default = "default_game_port")]
    pub game_port: u16,

    /// Maximum number of concurrent connections
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Footer appended to every outgoing frame
    #[serde(default = "default_footer")]
    pub footer: String,

    /// Footer length expected after every incoming frame
    #[serde(default = "default_footer_length")]
    pub footer_length: usize,

    /// Packet processor partitions (0 = one per core)
    #[serde(default)]
    pub packet_partitions: usize,

    /// World processor partitions (0 = one per core)
    #[serde(default)]
    pub world_partitions: usize,

    /// Frames accepted per connection per second
    #[serde(default = "default_max_packets_per_second")]
    pub max_packets_per_second: u32,

    /// Capacity of each connection's outbound queue
    #[serde(default = "default_outbound_queue_capacity")]
    pub outbound_queue_capacity: usize,

    /// Capacity of the async log sink queue
    #[serde(default = "default_log_queue_capacity")]
    pub log_queue_capacity: usize,

    /// Seconds allowed for the key exchange
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_secs: u64,

    /// Seconds a login ticket stays valid
    #[serde(default = "default_login_ticket_ttl")]
    pub login_ticket_ttl_secs: u64,

    /// Maps loaded at startup
    #[serde(default = "default_maps")]
    pub maps: Vec<MapConfig>,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// A map loaded at startup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapConfig {
    /// Map identity
    pub id: u32,
    /// Client map document
    pub doc: u32,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is not set
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of plain text
    #[serde(default)]
    pub json: bool,
}

// Default value functions
fn default_server_name() -> String {
    "Embergate".to_string()
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_game_port() -> u16 {
    5816
}

fn default_max_connections() -> usize {
    500
}

fn default_footer() -> String {
    "TQServer".to_string()
}

fn default_footer_length() -> usize {
    8
}

fn default_max_packets_per_second() -> u32 {
    100
}

fn default_outbound_queue_capacity() -> usize {
    256
}

fn default_log_queue_capacity() -> usize {
    1024
}

fn default_handshake_timeout() -> u64 {
    30
}

fn default_login_ticket_ttl() -> u64 {
    60
}

fn default_maps() -> Vec<MapConfig> {
    vec![
        MapConfig { id: 1002, doc: 1002 },
        MapConfig { id: 1010, doc: 1010 },
    ]
}

fn default_log_level() -> String {
    "info,embergate_server=debug".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            config_path: PathBuf::from("config/server.toml"),
            server_name: default_server_name(),
            bind_address: default_bind_address(),
            game_port: default_game_port(),
            max_connections: default_max_connections(),
            footer: default_footer(),
            footer_length: default_footer_length(),
            packet_partitions: 0,
            world_partitions: 0,
            max_packets_per_second: default_max_packets_per_second(),
            outbound_queue_capacity: default_outbound_queue_capacity(),
            log_queue_capacity: default_log_queue_capacity(),
            handshake_timeout_secs: default_handshake_timeout(),
            login_ticket_ttl_secs: default_login_ticket_ttl(),
            maps: default_maps(),
            logging: LoggingConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from file and environment variables
    pub async fn load() -> Result<Self> {
        // Determine config path from environment or use default
        let config_path = env::var("EMBERGATE_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/server.toml"));

        let mut config = if config_path.exists() {
            let content = tokio::fs::read_to_string(&config_path)
                .await
                .with_context(|| {
                    format!("Failed to read config file: {}", config_path.display())
                })?;

            toml::from_str(&content).with_context(|| {
                format!("Failed to parse config file: {}", config_path.display())
            })?
        } else {
            tracing::warn!(
                "Config file not found at {}, using defaults",
                config_path.display()
            );
            Self::default()
        };

        config.config_path = config_path;

        // Override with environment variables
        config.apply_env_overrides();

        config.validate()?;

        Ok(config)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("EMBERGATE_SERVER_NAME") {
            self.server_name = val;
        }
        if let Ok(val) = env::var("EMBERGATE_BIND_ADDRESS") {
            self.bind_address = val;
        }
        if let Ok(val) = env::var("EMBERGATE_GAME_PORT") {
            if let Ok(port) = val.parse() {
                self.game_port = port;
            }
        }
        if let Ok(val) = env::var("EMBERGATE_MAX_CONNECTIONS") {
            if let Ok(max) = val.parse() {
                self.max_connections = max;
            }
        }
        if let Ok(val) = env::var("EMBERGATE_PACKET_PARTITIONS") {
            if let Ok(count) = val.parse() {
                self.packet_partitions = count;
            }
        }
        if let Ok(val) = env::var("EMBERGATE_WORLD_PARTITIONS") {
            if let Ok(count) = val.parse() {
                self.world_partitions = count;
            }
        }
        if let Ok(val) = env::var("EMBERGATE_MAX_PACKETS_PER_SECOND") {
            if let Ok(max) = val.parse() {
                self.max_packets_per_second = max;
            }
        }
        if let Ok(val) = env::var("EMBERGATE_LOG_LEVEL") {
            self.logging.level = val;
        }
        if let Ok(val) = env::var("EMBERGATE_LOG_JSON") {
            self.logging.json = val.to_lowercase() == "true" || val == "1";
        }
    }

    /// Validate the configuration
    fn validate(&self) -> Result<()> {
        if self.max_connections == 0 {
            anyhow::bail!("Max connections must be at least 1");
        }

        if self.footer.len() != self.footer_length {
            anyhow::bail!(
                "Footer \"{}\" does not match footer length {}",
                self.footer,
                self.footer_length
            );
        }

        if self.max_packets_per_second == 0 {
            anyhow::bail!("Max packets per second must be at least 1");
        }

        if self.outbound_queue_capacity == 0 || self.log_queue_capacity == 0 {
            anyhow::bail!("Queue capacities must be at least 1");
        }

        if self.handshake_timeout_secs == 0 {
            anyhow::bail!("Handshake timeout must be at least 1 second");
        }

        if self.maps.is_empty() {
            anyhow::bail!("At least one map must be configured");
        }

        Ok(())
    }

    /// Socket address string for the game listener
    pub fn game_address(&self) -> String {
        format!("{}:{}", self.bind_address, self.game_port)
    }

    /// Listener options derived from this configuration
    pub fn listener_options(&self) -> ListenerOptions {
        ListenerOptions {
            max_connections: self.max_connections,
            footer: Bytes::from(self.footer.clone().into_bytes()),
            footer_length: self.footer_length,
            outbound_capacity: self.outbound_queue_capacity,
            max_frame_size: MAX_FRAME_SIZE,
            handshake_timeout: Duration::from_secs(self.handshake_timeout_secs),
            ..ListenerOptions::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.server_name, "Embergate");
        assert_eq!(config.game_port, 5816);
        assert_eq!(config.footer, "TQServer");
        assert_eq!(config.max_packets_per_second, 100);
        assert_eq!(config.maps.len(), 2);
        assert_eq!(config.game_address(), "0.0.0.0:5816");
    }

    #[test]
    fn test_parse_partial_file() {
        let config: ServerConfig = toml::from_str(
            r#"
            game_port = 9958
            packet_partitions = 4

            [[maps]]
            id = 1002
            doc = 1002

            [logging]
            json = true
            "#,
        )
        .unwrap();

        assert_eq!(config.game_port, 9958);
        assert_eq!(config.packet_partitions, 4);
        assert_eq!(config.maps, vec![MapConfig { id: 1002, doc: 1002 }]);
        assert!(config.logging.json);
        assert_eq!(config.logging.level, "info,embergate_server=debug");
        assert_eq!(config.footer_length, 8);
    }

    #[test]
    fn test_listener_options() {
        let config = ServerConfig::default();
        let options = config.listener_options();
        assert_eq!(&options.footer[..], b"TQServer");
        assert_eq!(options.handshake_timeout, Duration::from_secs(30));
        assert_eq!(options.outbound_capacity, 256);
    }

    #[test]
    fn test_validation() {
        let mut config = ServerConfig::default();

        // Valid config should pass
        assert!(config.validate().is_ok());

        // Footer must match its declared length
        config.footer = "TQ".to_string();
        assert!(config.validate().is_err());
        config.footer = default_footer();

        config.maps.clear();
        assert!(config.validate().is_err());
    }
}
