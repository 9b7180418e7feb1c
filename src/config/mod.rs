//! Configuration module
//!
//! Handles loading and saving flocknet configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::protocol::DEFAULT_PORT;

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

    /// Network settings
    #[serde(default)]
    pub network: NetworkConfig,

    /// Simulation settings
    #[serde(default)]
    pub flock: FlockConfig,
}

/// General configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Human-readable name for this host
    pub name: String,
    /// Enable verbose logging
    #[serde(default)]
    pub verbose: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            name: hostname::get()
                .map(|h| h.to_string_lossy().to_string())
                .unwrap_or_else(|_| "unknown".to_string()),
            verbose: false,
        }
    }
}

/// Network configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Rendezvous port to listen on or connect to
    #[serde(default = "default_port")]
    pub port: u16,
    /// Interface the server binds to (default: loopback)
    pub bind_address: Option<String>,
    /// Connection timeout in ms
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
    /// Handshake completion timeout in ms
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_ms: u64,
    /// Session read timeout in ms
    #[serde(default = "default_read_timeout")]
    pub read_timeout_ms: u64,
    /// Session outbound idle wait in ms
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    /// Graceful shutdown drain timeout in ms
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_ms: u64,
    /// Outbound queue depth per session
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_connect_timeout() -> u64 {
    5000
}

fn default_handshake_timeout() -> u64 {
    5000
}

fn default_read_timeout() -> u64 {
    2000
}

fn default_poll_interval() -> u64 {
    100
}

fn default_shutdown_timeout() -> u64 {
    1000
}

fn default_queue_capacity() -> usize {
    256
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind_address: None,
            connect_timeout_ms: default_connect_timeout(),
            handshake_timeout_ms: default_handshake_timeout(),
            read_timeout_ms: default_read_timeout(),
            poll_interval_ms: default_poll_interval(),
            shutdown_timeout_ms: default_shutdown_timeout(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

impl NetworkConfig {
    /// Runtime network settings derived from this section
    pub fn runtime(&self) -> crate::network::NetworkConfig {
        let mut runtime = crate::network::NetworkConfig::new(self.port);

        if let Some(bind) = &self.bind_address {
            match bind.parse() {
                Ok(addr) => runtime.bind_address = addr,
                Err(_) => tracing::warn!(
                    "Invalid bind address {:?}, using {}",
                    bind,
                    runtime.bind_address
                ),
            }
        }

        runtime.connect_timeout_ms = self.connect_timeout_ms;
        runtime.handshake_timeout_ms = self.handshake_timeout_ms;
        runtime.read_timeout_ms = self.read_timeout_ms;
        runtime.poll_interval_ms = self.poll_interval_ms;
        runtime.shutdown_timeout_ms = self.shutdown_timeout_ms;
        runtime.queue_capacity = self.queue_capacity;
        runtime
    }
}

/// Simulation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlockConfig {
    /// Most boids the flock will hold
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    /// Boids seeded at server startup
    #[serde(default = "default_initial_boids")]
    pub initial_boids: usize,
    /// World width in pixels
    #[serde(default = "default_width")]
    pub width: f32,
    /// World height in pixels
    #[serde(default = "default_height")]
    pub height: f32,
    /// Edge steering margin in pixels
    #[serde(default = "default_margin")]
    pub margin: f32,
    /// Simulation ticks per second
    #[serde(default = "default_tick_rate")]
    pub tick_rate: u32,
}

fn default_capacity() -> usize {
    256
}

fn default_initial_boids() -> usize {
    100
}

fn default_width() -> f32 {
    800.0
}

fn default_height() -> f32 {
    450.0
}

fn default_margin() -> f32 {
    10.0
}

fn default_tick_rate() -> u32 {
    30
}

impl Default for FlockConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            initial_boids: default_initial_boids(),
            width: default_width(),
            height: default_height(),
            margin: default_margin(),
            tick_rate: default_tick_rate(),
        }
    }
}

impl FlockConfig {
    /// Runtime simulation settings derived from this section
    pub fn runtime(&self) -> crate::flock::FlockConfig {
        crate::flock::FlockConfig {
            capacity: self.capacity,
            width: self.width,
            height: self.height,
            margin: self.margin,
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
            dirs::config_dir().map(|p| p.join("flocknet/config.toml")),
            Some(PathBuf::from("./flocknet.toml")),
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
}

/// Generate a sample configuration file
pub fn generate_sample_config() -> String {
    let config = Config {
        general: GeneralConfig {
            name: "flock-server".to_string(),
            verbose: false,
        },
        flock: FlockConfig {
            initial_boids: 100,
            tick_rate: 30,
            ..Default::default()
        },
        ..Default::default()
    };

    toml::to_string_pretty(&config).unwrap_or_default()
}
