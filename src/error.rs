//! Crate-wide error type

use thiserror::Error;

/// Convenience alias used throughout the crate
pub type Result<T> = std::result::Result<T, RelayError>;

/// Top-level error for relay operations
#[derive(Debug, Error)]
pub enum RelayError {
    /// Socket-level failure (bind, accept, read, write)
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Consumer set is at its configured cap
    #[error("consumer limit reached ({0})")]
    ConsumerLimit(usize),

    /// Discovery table refused an operation
    #[error(transparent)]
    Registry(#[from] crate::discovery::RegistryError),
}
