use thiserror::Error;

/// Errors raised by the registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// A builder or configuration argument failed validation.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// A key-value store operation failed. At first `Register`, this
    /// surfaces to the caller; during keepalive it is retried indefinitely
    /// (§4.5 "Failure semantics").
    #[error("registry backend error: {0}")]
    Connection(String),

    /// Any call made after [`crate::registry::Registry::close`].
    #[error("registry closed")]
    Closed,
}

/// Result type alias for registry operations.
pub type Result<T> = std::result::Result<T, RegistryError>;
