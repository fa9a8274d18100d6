//! Error types for the cache
//!
//! Provides unified error handling using thiserror.

use thiserror::Error;
use tokio::runtime::TryCurrentError;

// == Cache Error Enum ==
/// Unified error type for the cache.
///
/// A missing or expired key is not an error: lookups return `None` for that.
#[derive(Error, Debug)]
pub enum CacheError {
    /// A strict compute call's producer returned `None`
    #[error("producer must not yield an empty result")]
    EmptyProducerResult,

    /// The background sweeper needs a Tokio runtime to run on
    #[error("background sweeper requires a Tokio runtime: {0}")]
    NoRuntime(#[from] TryCurrentError),
}

// == Result Type Alias ==
/// Convenience Result type for the cache.
pub type Result<T> = std::result::Result<T, CacheError>;
