//! Accounts service settings
//!
//! Defaults are overridden by `ACCOUNTS_*` environment variables, e.g.
//! `ACCOUNTS_PORT=8080` or `ACCOUNTS_SALT_LENGTH=32`. Database settings are
//! read separately by [`common::database::DatabaseConfig::from_env`].

use config::{Config, Environment};
use serde::Deserialize;
use thiserror::Error;

use crate::credentials::{DEFAULT_SALT_LENGTH, MIN_SALT_LENGTH};

const ENV_PREFIX: &str = "ACCOUNTS";

/// Errors raised while loading [`ServiceConfig`]
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Accounts service configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Interface the HTTP server binds to
    pub host: String,
    /// Port the HTTP server listens on
    pub port: u16,
    /// Salt length in bytes for new password hashes
    pub salt_length: usize,
    /// Base of the link sent to users; the confirmation code is appended
    pub confirmation_base_url: String,
}

impl ServiceConfig {
    /// Load defaults overridden by `ACCOUNTS_*` environment variables
    pub fn load() -> Result<Self, ConfigError> {
        let settings = Config::builder()
            .set_default("host", "0.0.0.0")?
            .set_default("port", 80)?
            .set_default("salt_length", DEFAULT_SALT_LENGTH as u64)?
            .set_default("confirmation_base_url", "http://localhost/user/confirm")?
            .add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()?;

        let service_config: ServiceConfig = settings.try_deserialize()?;
        service_config.validate()?;
        Ok(service_config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.salt_length < MIN_SALT_LENGTH {
            return Err(ConfigError::Invalid(format!(
                "salt_length must be at least {} bytes, got {}",
                MIN_SALT_LENGTH, self.salt_length
            )));
        }
        if self.confirmation_base_url.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "confirmation_base_url must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// `host:port` for the listener
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
