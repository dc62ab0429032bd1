//! Error types for the simulation core.

use thiserror::Error;

/// Result type alias for core engine operations.
pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Error conditions raised by the simulation core.
///
/// IO-layer failures (HTTP, database) are wrapped in `anyhow` at the
/// application boundary; these variants cover the conditions callers of
/// the core need to distinguish.
#[derive(Error, Debug)]
pub enum EngineError {
    /// An input that sizing or optimization refuses to work with
    /// (non-finite volatility, non-positive price, malformed matrix).
    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    /// Order creation or resolution failed; no position state was mutated.
    #[error("Execution error for {symbol}: {message}")]
    Execution { symbol: String, message: String },

    /// The bar feed delivered something unusable (empty series,
    /// misaligned signals).
    #[error("Data feed error: {message}")]
    DataFeed { message: String },
}

impl EngineError {
    /// Create an invalid input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Create an execution error for a symbol.
    pub fn execution(symbol: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Execution {
            symbol: symbol.into(),
            message: message.into(),
        }
    }

    /// Create a data feed error.
    pub fn data_feed(message: impl Into<String>) -> Self {
        Self::DataFeed {
            message: message.into(),
        }
    }
}
