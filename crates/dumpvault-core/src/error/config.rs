//! Configuration loading errors.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid environment variable '{key}': {message}")]
    InvalidEnvVar { key: String, message: String },

    #[error("Failed to read config file '{path}': {message}")]
    Read { path: String, message: String },

    #[error("Failed to parse TOML config: {0}")]
    Parse(String),

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}
