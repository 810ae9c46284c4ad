//! Configuration for the ticketbox server and client.
//!
//! Both binaries accept command-line arguments and an optional TOML
//! configuration file. CLI arguments take precedence over config file values.

use crate::client::reconnect::{OnExhausted, ReconnectPolicy};
use clap::Parser;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Command-line arguments for the server
#[derive(Parser, Debug)]
#[command(name = "ticketbox")]
#[command(author = "ticketbox authors")]
#[command(version = "0.1.0")]
#[command(about = "A ticket collection server", long_about = None)]
pub struct ServerArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind to (e.g., 127.0.0.1:4817)
    #[arg(short = 'l', long)]
    pub listen: Option<String>,

    /// JSON file the collection is loaded from and saved to
    #[arg(short = 'd', long)]
    pub data_file: Option<PathBuf>,

    /// Maximum number of concurrent client connections
    #[arg(long)]
    pub max_connections: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,
}

/// Command-line arguments for the console client
#[derive(Parser, Debug)]
#[command(name = "ticketbox-client")]
#[command(author = "ticketbox authors")]
#[command(version = "0.1.0")]
#[command(about = "Console client for the ticketbox server", long_about = None)]
pub struct ClientArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Server host name or address
    #[arg(long)]
    pub host: Option<String>,

    /// Server port
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Connect attempts before giving up
    #[arg(long)]
    pub max_reconnect_attempts: Option<u32>,

    /// Delay before each reconnect attempt, in milliseconds
    #[arg(long)]
    pub reconnect_delay_ms: Option<u64>,

    /// How long to wait for a response, in milliseconds
    #[arg(long)]
    pub response_timeout_ms: Option<u64>,

    /// Exit the process once every reconnect attempt has failed
    #[arg(long)]
    pub exit_on_exhaustion: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,
}

/// Server TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct ServerToml {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub storage: StorageSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerSection {
    /// Address to bind to
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Maximum concurrent connections
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Upper bound on a single readiness wait
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,
    /// How long a stalled response write may keep retrying
    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            max_connections: default_max_connections(),
            poll_timeout_ms: default_poll_timeout_ms(),
            write_timeout_ms: default_write_timeout_ms(),
        }
    }
}

/// Storage-related configuration
#[derive(Debug, Deserialize)]
pub struct StorageSection {
    /// JSON data file
    #[serde(default = "default_data_file")]
    pub data_file: PathBuf,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            data_file: default_data_file(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingSection {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Client TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct ClientToml {
    #[serde(default)]
    pub client: ClientSection,
    #[serde(default)]
    pub reconnect: ReconnectSection,
    #[serde(default)]
    pub logging: ClientLoggingSection,
}

/// Connection target and timeouts
#[derive(Debug, Deserialize)]
pub struct ClientSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_response_timeout_ms")]
    pub response_timeout_ms: u64,
}

impl Default for ClientSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            connect_timeout_ms: default_connect_timeout_ms(),
            response_timeout_ms: default_response_timeout_ms(),
        }
    }
}

/// Reconnect policy settings
#[derive(Debug, Deserialize)]
pub struct ReconnectSection {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,
    #[serde(default)]
    pub exit_on_exhaustion: bool,
}

impl Default for ReconnectSection {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            delay_ms: default_delay_ms(),
            cooldown_ms: default_cooldown_ms(),
            exit_on_exhaustion: false,
        }
    }
}

/// Client logging configuration
#[derive(Debug, Deserialize)]
pub struct ClientLoggingSection {
    #[serde(default = "default_client_log_level")]
    pub level: String,
}

impl Default for ClientLoggingSection {
    fn default() -> Self {
        Self {
            level: default_client_log_level(),
        }
    }
}

fn default_listen() -> String {
    "127.0.0.1:4817".to_string()
}

fn default_max_connections() -> usize {
    1024
}

fn default_poll_timeout_ms() -> u64 {
    500
}

fn default_write_timeout_ms() -> u64 {
    5_000
}

fn default_data_file() -> PathBuf {
    PathBuf::from("tickets.json")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    4817
}

fn default_connect_timeout_ms() -> u64 {
    2_000
}

fn default_response_timeout_ms() -> u64 {
    5_000
}

fn default_max_attempts() -> u32 {
    5
}

fn default_delay_ms() -> u64 {
    1_000
}

fn default_cooldown_ms() -> u64 {
    5_000
}

fn default_client_log_level() -> String {
    "warn".to_string()
}

fn read_toml<T>(path: Option<&Path>) -> Result<T, ConfigError>
where
    T: for<'de> Deserialize<'de> + Default,
{
    let Some(path) = path else {
        return Ok(T::default());
    };
    let contents = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::FileRead(path.to_path_buf(), e))?;
    toml::from_str(&contents).map_err(|e| ConfigError::TomlParse(path.to_path_buf(), e))
}

/// Final resolved server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen: String,
    pub data_file: PathBuf,
    pub max_connections: usize,
    pub poll_timeout: Duration,
    pub write_timeout: Duration,
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::merge(ServerArgs::parse_from(["ticketbox"]), ServerToml::default())
    }
}

impl ServerConfig {
    /// Load configuration from CLI args and optional TOML file.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_args(ServerArgs::parse())
    }

    pub fn from_args(cli: ServerArgs) -> Result<Self, ConfigError> {
        let toml_config = read_toml::<ServerToml>(cli.config.as_deref())?;
        Ok(Self::merge(cli, toml_config))
    }

    fn merge(cli: ServerArgs, toml_config: ServerToml) -> Self {
        ServerConfig {
            listen: cli.listen.unwrap_or(toml_config.server.listen),
            data_file: cli.data_file.unwrap_or(toml_config.storage.data_file),
            max_connections: cli
                .max_connections
                .unwrap_or(toml_config.server.max_connections),
            poll_timeout: Duration::from_millis(toml_config.server.poll_timeout_ms),
            write_timeout: Duration::from_millis(toml_config.server.write_timeout_ms),
            log_level: cli.log_level.unwrap_or(toml_config.logging.level),
        }
    }
}

/// Final resolved client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    pub connect_timeout: Duration,
    pub response_timeout: Duration,
    pub reconnect: ReconnectPolicy,
    pub log_level: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::merge(ClientArgs::parse_from(["ticketbox-client"]), ClientToml::default())
    }
}

impl ClientConfig {
    /// Load configuration from CLI args and optional TOML file.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_args(ClientArgs::parse())
    }

    pub fn from_args(cli: ClientArgs) -> Result<Self, ConfigError> {
        let toml_config = read_toml::<ClientToml>(cli.config.as_deref())?;
        Ok(Self::merge(cli, toml_config))
    }

    fn merge(cli: ClientArgs, toml_config: ClientToml) -> Self {
        let reconnect = toml_config.reconnect;
        let on_exhausted = if cli.exit_on_exhaustion || reconnect.exit_on_exhaustion {
            OnExhausted::Exit
        } else {
            OnExhausted::ReturnError
        };

        ClientConfig {
            host: cli.host.unwrap_or(toml_config.client.host),
            port: cli.port.unwrap_or(toml_config.client.port),
            connect_timeout: Duration::from_millis(toml_config.client.connect_timeout_ms),
            response_timeout: Duration::from_millis(
                cli.response_timeout_ms
                    .unwrap_or(toml_config.client.response_timeout_ms),
            ),
            reconnect: ReconnectPolicy {
                max_attempts: cli.max_reconnect_attempts.unwrap_or(reconnect.max_attempts),
                delay: Duration::from_millis(cli.reconnect_delay_ms.unwrap_or(reconnect.delay_ms)),
                cooldown: Duration::from_millis(reconnect.cooldown_ms),
                on_exhausted,
            },
            log_level: cli.log_level.unwrap_or(toml_config.logging.level),
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}", path = .0.display(), source = .1)]
    FileRead(PathBuf, #[source] std::io::Error),
    #[error("Failed to parse config file '{path}': {source}", path = .0.display(), source = .1)]
    TomlParse(PathBuf, #[source] toml::de::Error),
}
