//! # Client Configuration
//!
//! Layered, lowest priority first:
//!
//! 1.  Built-in defaults ([`ClientConfig::defaults`]).
//! 2.  A JSON file, `wineing_client.conf` unless `--config-path` says otherwise.
//!     A missing file is fine; an unreadable or invalid one is logged and skipped.
//! 3.  Environment variables (`WINEING_*`).
//! 4.  Command-line flags.
//!
//! Layers 3 and 4 are both handled by `clap`, which reads the environment for
//! any flag not given on the command line.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::api::client::{ChannelSpec, ClientSettings};
use crate::control::channel::{ChannelError, RetryPolicy};
use crate::control::pattern::ChannelPattern;

/// Config file read when `--config-path` is not given.
pub const DEFAULT_CONFIG_PATH: &str = "wineing_client.conf";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
#[clap(about = "Wineing engine control client", version)]
#[serde(rename_all = "camelCase")]
pub struct ClientConfig {
    #[clap(long, env = "WINEING_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    pub config_path: Option<PathBuf>,

    #[clap(long, env = "WINEING_REQUEST_ENDPOINT", help = "Endpoint the engine reads requests from.")]
    pub request_endpoint: Option<String>,

    #[clap(long, env = "WINEING_REQUEST_PATTERN", help = "Pattern of the request channel (e.g. push-connect, push-bind, pub).")]
    pub request_pattern: Option<String>,

    #[clap(long, env = "WINEING_RESPONSE_ENDPOINT", help = "Endpoint the engine sends responses to.")]
    pub response_endpoint: Option<String>,

    #[clap(long, env = "WINEING_RESPONSE_PATTERN", help = "Pattern of the response channel (e.g. pull-bind).")]
    pub response_pattern: Option<String>,

    #[clap(long, env = "WINEING_MARKET_ENDPOINT", help = "Endpoint the engine publishes market data on.")]
    pub market_endpoint: Option<String>,

    #[clap(long, env = "WINEING_MARKET_PATTERN", help = "Pattern of the market data channel (e.g. sub).")]
    pub market_pattern: Option<String>,

    #[clap(long, env = "WINEING_QUEUE_CAPACITY", help = "Number of requests that may wait to be sent.")]
    pub queue_capacity: Option<usize>,

    #[clap(long, env = "WINEING_CONNECT_BASE_DELAY_MS", help = "Base delay in milliseconds between connect attempts.")]
    pub connect_base_delay_ms: Option<u64>,

    #[clap(long, env = "WINEING_CONNECT_MAX_DELAY_MS", help = "Maximum delay in milliseconds between connect attempts.")]
    pub connect_max_delay_ms: Option<u64>,

    #[clap(long, env = "WINEING_CONNECT_MAX_ATTEMPTS", help = "Connect attempts before giving up (0 retries forever).")]
    pub connect_max_attempts: Option<u32>,

    #[clap(long, env = "WINEING_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "WINEING_LOG_LEVEL", help = "Logging level (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,

    #[clap(long, env = "WINEING_TAPE_FILE", help = "Tape to replay.")]
    pub tape_file: Option<String>,

    #[clap(long, env = "WINEING_REAL_TIME", conflicts_with = "tape_file", help = "Stream real-time data instead of a tape.")]
    #[serde(default)]
    pub real_time: bool,
}

impl ClientConfig {
    /// Built-in defaults: requests pushed to 5555, responses pulled on 5556,
    /// market data subscribed from 5557, all on loopback.
    pub fn defaults() -> Self {
        Self {
            request_endpoint: Some("tcp://127.0.0.1:5555".to_string()),
            request_pattern: Some(ChannelPattern::PushClient.to_string()),
            response_endpoint: Some("tcp://127.0.0.1:5556".to_string()),
            response_pattern: Some(ChannelPattern::PullServer.to_string()),
            market_endpoint: Some("tcp://127.0.0.1:5557".to_string()),
            market_pattern: Some(ChannelPattern::Subscribe.to_string()),
            queue_capacity: Some(crate::control::outbound::DEFAULT_QUEUE_CAPACITY),
            connect_base_delay_ms: Some(100),
            connect_max_delay_ms: Some(5000),
            log_dir: Some(PathBuf::from("./logs")),
            log_level: Some("info".to_string()),
            ..Default::default()
        }
    }

    // Merge two configs, where 'other' overrides 'self' for Some values
    fn merge(self, other: ClientConfig) -> ClientConfig {
        ClientConfig {
            config_path: other.config_path.or(self.config_path),
            request_endpoint: other.request_endpoint.or(self.request_endpoint),
            request_pattern: other.request_pattern.or(self.request_pattern),
            response_endpoint: other.response_endpoint.or(self.response_endpoint),
            response_pattern: other.response_pattern.or(self.response_pattern),
            market_endpoint: other.market_endpoint.or(self.market_endpoint),
            market_pattern: other.market_pattern.or(self.market_pattern),
            queue_capacity: other.queue_capacity.or(self.queue_capacity),
            connect_base_delay_ms: other.connect_base_delay_ms.or(self.connect_base_delay_ms),
            connect_max_delay_ms: other.connect_max_delay_ms.or(self.connect_max_delay_ms),
            connect_max_attempts: other.connect_max_attempts.or(self.connect_max_attempts),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
            // A tape and real-time data exclude each other; the higher layer decides.
            tape_file: if other.real_time {
                None
            } else {
                other.tape_file.clone().or(self.tape_file)
            },
            real_time: other.real_time || (self.real_time && other.tape_file.is_none()),
        }
    }

    /// The tape to request, `None` for real-time data.
    pub fn tape(&self) -> Option<&str> {
        if self.real_time {
            None
        } else {
            self.tape_file.as_deref()
        }
    }

    pub fn log_dir(&self) -> PathBuf {
        self.log_dir.clone().unwrap_or_else(|| PathBuf::from("./logs"))
    }

    pub fn log_level(&self) -> &str {
        self.log_level.as_deref().unwrap_or("info")
    }

    /// Validates the merged configuration into typed settings. An unknown
    /// pattern tag is an error.
    pub fn settings(&self) -> Result<ClientSettings, ConfigError> {
        let request = channel_spec("request", &self.request_endpoint, &self.request_pattern)?;
        if !request.pattern.sends_one_way() {
            return Err(ConfigError::Invalid(format!(
                "request pattern [{}] cannot send without waiting for replies",
                request.pattern
            )));
        }
        let response = channel_spec("response", &self.response_endpoint, &self.response_pattern)?;
        let market = match &self.market_endpoint {
            Some(_) => Some(channel_spec("market", &self.market_endpoint, &self.market_pattern)?),
            None => None,
        };

        let queue_capacity = self
            .queue_capacity
            .unwrap_or(crate::control::outbound::DEFAULT_QUEUE_CAPACITY);
        if queue_capacity == 0 {
            return Err(ConfigError::Invalid("queue capacity must be at least 1".to_string()));
        }

        let defaults = RetryPolicy::default();
        let retry = RetryPolicy {
            base_delay: self
                .connect_base_delay_ms
                .map_or(defaults.base_delay, Duration::from_millis),
            max_delay: self
                .connect_max_delay_ms
                .map_or(defaults.max_delay, Duration::from_millis),
            max_attempts: self.connect_max_attempts.filter(|n| *n > 0),
        };
        if retry.base_delay > retry.max_delay {
            return Err(ConfigError::Invalid(format!(
                "connect base delay ({}ms) exceeds max delay ({}ms)",
                retry.base_delay.as_millis(),
                retry.max_delay.as_millis()
            )));
        }

        Ok(ClientSettings {
            request,
            response,
            market,
            queue_capacity,
            retry,
        })
    }
}

fn channel_spec(
    name: &str,
    endpoint: &Option<String>,
    pattern: &Option<String>,
) -> Result<ChannelSpec, ConfigError> {
    let address = endpoint
        .clone()
        .ok_or_else(|| ConfigError::Invalid(format!("{name} endpoint is not set")))?;
    let pattern: ChannelPattern = pattern
        .as_deref()
        .ok_or_else(|| ConfigError::Invalid(format!("{name} pattern is not set")))?
        .parse()?;
    Ok(ChannelSpec::new(address, pattern))
}

/// Reads a JSON config file. `Ok(None)` when the file does not exist.
pub fn read_config_file(path: &Path) -> Result<Option<ClientConfig>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let config = serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(Some(config))
}

/// Loads the configuration from all layers, taking flags from the process
/// command line.
pub fn load_config() -> ClientConfig {
    load_config_from(ClientConfig::parse())
}

/// Loads the configuration from all layers with `cli` as the top layer
/// (flags plus environment, as parsed by `clap`).
pub fn load_config_from(cli: ClientConfig) -> ClientConfig {
    let config_file_path = cli
        .config_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));

    let mut current_config = ClientConfig::defaults();
    match read_config_file(&config_file_path) {
        Ok(Some(file_config)) => current_config = current_config.merge(file_config),
        Ok(None) => tracing::info!(
            "Config file not found at {}. Using defaults and environment/CLI variables.",
            config_file_path.display()
        ),
        Err(e) => tracing::warn!("{}. Falling back to other sources.", e),
    }

    current_config.merge(cli)
}
