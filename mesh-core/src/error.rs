use thiserror::Error;

/// Errors raised by the shared primitives in this crate.
#[derive(Debug, Error)]
pub enum Error {
    /// A constructor or builder argument failed validation.
    #[error("validation error: {0}")]
    Validation(String),
}

pub type Result<T> = std::result::Result<T, Error>;
