//! Configuration module for lottery-server.
//!
//! Handles loading configuration from TOML files, CLI arguments,
//! and environment variables.

pub mod file;

use crate::config::file::{BrokerConfig, FileConfig};
use lottery_core::broker::{BackoffPolicy, PublisherConfig};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("validation error: {0}")]
    ValidationError(String),

    #[error("DATABASE_URL environment variable not set")]
    MissingDatabaseUrl,
}

/// Loaded configuration, ready to build the server from.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub listen: SocketAddr,
    pub broker_url: String,
    pub publisher: PublisherConfig,
}

/// Configuration loader that handles the complete loading process.
pub struct ConfigLoader {
    config_path: PathBuf,
    listen_override: Option<SocketAddr>,
    broker_url_override: Option<String>,
}

impl ConfigLoader {
    /// Create a new config loader.
    pub fn new(
        config_path: impl AsRef<Path>,
        listen_override: Option<SocketAddr>,
        broker_url_override: Option<String>,
    ) -> Self {
        Self {
            config_path: config_path.as_ref().to_path_buf(),
            listen_override,
            broker_url_override,
        }
    }

    /// Read, override, validate and convert the configuration file.
    pub fn load(&self) -> Result<LoadedConfig, ConfigError> {
        let config_content = std::fs::read_to_string(&self.config_path)?;
        self.load_str(&config_content)
    }

    fn load_str(&self, config_content: &str) -> Result<LoadedConfig, ConfigError> {
        let mut file_config: FileConfig = toml::from_str(config_content)?;

        // Apply CLI and environment overrides
        if let Some(listen) = self.listen_override {
            file_config.server.listen = listen;
        }
        if let Some(url) = &self.broker_url_override {
            file_config.broker.url = url.clone();
        }

        validate(&file_config.broker)?;

        Ok(LoadedConfig {
            listen: file_config.server.listen,
            publisher: publisher_config(&file_config.broker),
            broker_url: file_config.broker.url,
        })
    }
}

fn validate(broker: &BrokerConfig) -> Result<(), ConfigError> {
    if broker.url.trim().is_empty() {
        return Err(ConfigError::ValidationError(
            "broker.url must not be empty".to_string(),
        ));
    }
    if broker.exchange.trim().is_empty() {
        return Err(ConfigError::ValidationError(
            "broker.exchange must not be empty".to_string(),
        ));
    }
    if broker.startup_attempts == 0 {
        return Err(ConfigError::ValidationError(
            "broker.startup_attempts must be at least 1".to_string(),
        ));
    }
    if !(broker.multiplier.is_finite() && broker.multiplier > 1.0) {
        return Err(ConfigError::ValidationError(format!(
            "broker.multiplier must be a finite number greater than 1, got {}",
            broker.multiplier
        )));
    }
    if broker.base_delay_ms == 0 {
        return Err(ConfigError::ValidationError(
            "broker.base_delay_ms must be greater than 0".to_string(),
        ));
    }
    Ok(())
}

fn publisher_config(broker: &BrokerConfig) -> PublisherConfig {
    PublisherConfig {
        exchange: broker.exchange.clone(),
        startup_attempts: broker.startup_attempts,
        backoff: BackoffPolicy::new(
            Duration::from_millis(broker.base_delay_ms),
            broker.multiplier,
        ),
        reconnect_cooldown: Duration::from_millis(broker.reconnect_cooldown_ms),
    }
}

/// Get the database URL from the environment.
pub fn get_database_url() -> Result<String, ConfigError> {
    std::env::var("DATABASE_URL").map_err(|_| ConfigError::MissingDatabaseUrl)
}
