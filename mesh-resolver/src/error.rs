use thiserror::Error;

/// Errors raised by the watch resolver.
#[derive(Debug, Error)]
pub enum ResolverError {
    /// A builder or configuration argument failed validation.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// A key-value store operation failed.
    #[error("resolver backend error: {0}")]
    Connection(String),
}

/// Result type alias for watch resolver operations.
pub type Result<T> = std::result::Result<T, ResolverError>;
