//! Configuration module for the sofar-probe replay tool.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Command-line arguments for the replay tool
#[derive(Parser, Debug, Default)]
#[command(name = "sofar-probe")]
#[command(author = "sofar-probe authors")]
#[command(version = "0.1.0")]
#[command(about = "Replay captured Sofar data-logger frames against a TCP endpoint", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Endpoint to replay against (e.g., 127.0.0.1:8080)
    #[arg(short = 't', long)]
    pub target: Option<String>,

    /// Maximum bytes per write chunk
    #[arg(long)]
    pub chunk_size: Option<usize>,

    /// Pacing delay between chunks in milliseconds
    #[arg(long)]
    pub chunk_delay_ms: Option<u64>,

    /// Connect timeout in seconds
    #[arg(long)]
    pub connect_timeout_secs: Option<u64>,

    /// Timeout for each response read in seconds
    #[arg(long)]
    pub read_timeout_secs: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// List the built-in captures and exit
    #[arg(long)]
    pub list_captures: bool,

    /// Captures or hex payload files to replay, in order.
    /// Defaults to the heartbeat + telemetry script when empty.
    pub inputs: Vec<String>,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub probe: ProbeConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Replay-related configuration
#[derive(Debug, Deserialize)]
pub struct ProbeConfig {
    /// Endpoint to replay against
    #[serde(default = "default_target")]
    pub target: String,
    /// Maximum bytes per write chunk
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Pacing delay between chunks in milliseconds
    #[serde(default = "default_chunk_delay_ms")]
    pub chunk_delay_ms: u64,
    /// Connect timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Timeout for each response read in seconds
    #[serde(default = "default_timeout_secs")]
    pub read_timeout_secs: u64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            target: default_target(),
            chunk_size: default_chunk_size(),
            chunk_delay_ms: default_chunk_delay_ms(),
            connect_timeout_secs: default_timeout_secs(),
            read_timeout_secs: default_timeout_secs(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level
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

fn default_target() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_chunk_size() -> usize {
    100
}

fn default_chunk_delay_ms() -> u64 {
    5
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub target: String,
    pub chunk_size: usize,
    pub chunk_delay_ms: u64,
    pub connect_timeout_secs: u64,
    pub read_timeout_secs: u64,
    pub log_level: String,
    pub list_captures: bool,
    pub inputs: Vec<String>,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = CliArgs::parse();

        // Load TOML config if specified
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        Self::resolve(cli, toml_config)
    }

    /// Merge CLI args with TOML config (CLI takes precedence).
    pub fn resolve(cli: CliArgs, toml_config: TomlConfig) -> Result<Self, ConfigError> {
        let config = Config {
            target: cli.target.unwrap_or(toml_config.probe.target),
            chunk_size: cli.chunk_size.unwrap_or(toml_config.probe.chunk_size),
            chunk_delay_ms: cli
                .chunk_delay_ms
                .unwrap_or(toml_config.probe.chunk_delay_ms),
            connect_timeout_secs: cli
                .connect_timeout_secs
                .unwrap_or(toml_config.probe.connect_timeout_secs),
            read_timeout_secs: cli
                .read_timeout_secs
                .unwrap_or(toml_config.probe.read_timeout_secs),
            log_level: if cli.log_level != "info" {
                cli.log_level
            } else {
                toml_config.logging.level
            },
            list_captures: cli.list_captures,
            inputs: cli.inputs,
        };

        if config.chunk_size == 0 {
            return Err(ConfigError::ZeroChunkSize);
        }
        if config.target.is_empty() {
            return Err(ConfigError::EmptyTarget);
        }

        Ok(config)
    }

    pub fn chunk_delay(&self) -> Duration {
        Duration::from_millis(self.chunk_delay_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
    ZeroChunkSize,
    EmptyTarget,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::FileRead(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::TomlParse(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::ZeroChunkSize => write!(f, "chunk_size must be nonzero"),
            ConfigError::EmptyTarget => write!(f, "target endpoint must not be empty"),
        }
    }
}

impl std::error::Error for ConfigError {}
