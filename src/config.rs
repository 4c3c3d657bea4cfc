//! Configuration for the pcc server and client.
//!
//! The server takes its port positionally and optionally a TOML file for
//! tuning. CLI arguments take precedence over config file values.

use clap::Parser;
use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::num::NonZeroUsize;
use std::path::PathBuf;

/// Payload chunk size. The protocol never needs more than this in memory
/// at once regardless of the declared frame length.
pub const DEFAULT_BUFFER_SIZE: usize = 1024 * 1024;

/// Pending-connection queue length handed to listen(2).
pub const DEFAULT_BACKLOG: u32 = 10;

/// Command-line arguments for the server
#[derive(Parser, Debug)]
#[command(name = "pcc-server")]
#[command(version)]
#[command(about = "Counts printable characters in files sent by clients", long_about = None)]
pub struct ServerArgs {
    /// TCP port to listen on
    pub port: u16,

    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind to (defaults to all interfaces)
    #[arg(long)]
    pub host: Option<IpAddr>,

    /// Listen backlog for queued connections
    #[arg(long)]
    pub backlog: Option<u32>,

    /// Payload chunk size in bytes
    #[arg(long)]
    pub buffer_size: Option<NonZeroUsize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,
}

/// Command-line arguments for the client
#[derive(Parser, Debug)]
#[command(name = "pcc-client")]
#[command(version)]
#[command(about = "Sends a file to a pcc server and prints its printable character count", long_about = None)]
pub struct ClientArgs {
    /// Server IP address
    pub server_ip: IpAddr,

    /// Server port
    pub server_port: u16,

    /// File whose contents are sent
    pub file: PathBuf,

    /// Send chunk size in bytes
    #[arg(long, default_value = "1048576")]
    pub buffer_size: NonZeroUsize,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    pub log_level: String,
}

impl ClientArgs {
    pub fn server_addr(&self) -> SocketAddr {
        SocketAddr::new(self.server_ip, self.server_port)
    }
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,
    #[serde(default = "default_backlog")]
    pub backlog: u32,
    #[serde(default = "default_buffer_size")]
    pub buffer_size: NonZeroUsize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            backlog: default_backlog(),
            buffer_size: default_buffer_size(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_backlog() -> u32 {
    DEFAULT_BACKLOG
}

fn default_buffer_size() -> NonZeroUsize {
    NonZeroUsize::new(DEFAULT_BUFFER_SIZE).unwrap_or(NonZeroUsize::MIN)
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved server configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub host: IpAddr,
    pub port: u16,
    pub backlog: u32,
    pub buffer_size: NonZeroUsize,
    pub log_level: String,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = ServerArgs::try_parse().map_err(ConfigError::Args)?;

        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        Ok(Self::merge(cli, toml_config))
    }

    /// Merge CLI args over TOML values.
    pub fn merge(cli: ServerArgs, toml_config: TomlConfig) -> Self {
        Config {
            host: cli.host.unwrap_or(toml_config.server.host),
            port: cli.port,
            backlog: cli.backlog.unwrap_or(toml_config.server.backlog),
            buffer_size: cli.buffer_size.unwrap_or(toml_config.server.buffer_size),
            log_level: cli.log_level.unwrap_or(toml_config.logging.level),
        }
    }

    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    Args(clap::Error),
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Args(e) => write!(f, "{e}"),
            ConfigError::FileRead(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::TomlParse(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
        }
    }
}

impl std::error::Error for ConfigError {}
