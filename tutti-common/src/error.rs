//! Common error types for Tutti

use thiserror::Error;

/// Common result type for Tutti operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types shared by the library and the services
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation error (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML configuration file could not be parsed
    #[error("Config file parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Stored value could not be decoded into its domain type
    #[error("Corrupt stored value: {0}")]
    Decode(String),
}
