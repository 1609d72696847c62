use thiserror::Error;

/// Errors raised by the configuration source.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A builder or configuration argument failed validation.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// A key-value store operation failed.
    #[error("config source backend error: {0}")]
    Connection(String),
}

/// Result type alias for configuration source operations.
pub type Result<T> = std::result::Result<T, ConfigError>;
