//! # Configuration
//!
//! Layered client configuration: defaults, JSON file, environment and
//! command line, validated into [`ClientSettings`](crate::api::ClientSettings).

pub mod client_config;

pub use client_config::{
    load_config, load_config_from, read_config_file, ClientConfig, ConfigError, DEFAULT_CONFIG_PATH,
};
