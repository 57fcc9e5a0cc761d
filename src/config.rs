//! Application configuration
//!
//! Loaded from environment variables (and a `.env` file when present) using
//! the `dotenvy` and `config` crates. Variable names map one-to-one onto the
//! fields below, e.g. `PORT`, `DATABASE_URL`, `CART_MAX_WRITE_RETRIES`.

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration loading failed: {0}")]
    LoadError(#[from] config::ConfigError),

    #[error("Validation failed: {0}")]
    ValidationFailed(#[from] ValidationError),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Invalid port number")]
    InvalidPort,

    #[error("Request timeout must be between 1 and 300 seconds")]
    InvalidTimeout,

    #[error("CART_MAX_WRITE_RETRIES must be at least 1")]
    InvalidRetries,

    #[error("Invalid database URL format")]
    InvalidDatabaseUrl,

    #[error("DB_MAX_CONNECTIONS must be between 1 and 100")]
    InvalidPoolSize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// PostgreSQL connection string. Without it the service runs in memory.
    pub database_url: Option<String>,

    #[serde(default = "default_max_connections")]
    pub db_max_connections: u32,

    pub nats_url: Option<String>,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Extra attempts after an optimistic-concurrency conflict.
    #[serde(default = "default_write_retries")]
    pub cart_max_write_retries: u32,

    /// JSON product list for the in-memory catalog.
    pub catalog_seed_path: Option<PathBuf>,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::Environment::default().try_parsing(true))
            .build()?
            .try_deserialize()?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.port == 0 {
            return Err(ValidationError::InvalidPort);
        }
        if self.request_timeout_secs == 0 || self.request_timeout_secs > 300 {
            return Err(ValidationError::InvalidTimeout);
        }
        if self.cart_max_write_retries == 0 {
            return Err(ValidationError::InvalidRetries);
        }
        if self.db_max_connections == 0 || self.db_max_connections > 100 {
            return Err(ValidationError::InvalidPoolSize);
        }
        if let Some(url) = self.database_url() {
            if !url.starts_with("postgres://") && !url.starts_with("postgresql://") {
                return Err(ValidationError::InvalidDatabaseUrl);
            }
        }
        Ok(())
    }

    pub fn database_url(&self) -> Option<&str> {
        self.database_url.as_deref().filter(|s| !s.trim().is_empty())
    }

    pub fn nats_url(&self) -> Option<&str> {
        self.nats_url.as_deref().filter(|s| !s.trim().is_empty())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            database_url: None,
            db_max_connections: default_max_connections(),
            nats_url: None,
            request_timeout_secs: default_request_timeout(),
            cart_max_write_retries: default_write_retries(),
            catalog_seed_path: None,
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8083
}

fn default_max_connections() -> u32 {
    10
}

fn default_request_timeout() -> u64 {
    30
}

fn default_write_retries() -> u32 {
    crate::service::DEFAULT_MAX_WRITE_RETRIES
}
