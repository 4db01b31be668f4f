//! Error Types
//!
//! `ViewError` is what every public operation returns. Template syntax problems
//! get their own `ParseError` so callers can report the offending position.

use thiserror::Error;

/// Malformed SQL template syntax.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// An opening delimiter whose variable name runs to end of input
    #[error("Unterminated variable placeholder '{name}' starting at byte {position}")]
    UnterminatedPlaceholder { name: String, position: usize },

    /// A single-quoted literal that is never closed
    #[error("Unterminated string literal starting at byte {position}")]
    UnterminatedLiteral { position: usize },

    /// The configured delimiter cannot be used
    #[error("Invalid template delimiter {0:?}")]
    InvalidDelimiter(String),

    /// Aggregate function outside the supported set
    #[error("Unsupported aggregate function '{0}'")]
    UnsupportedAggregate(String),

    /// Stored variable/grant JSON could not be decoded
    #[error("Invalid variable definition: {0}")]
    InvalidVariables(String),

    #[error("SQL template is {size} bytes, limit is {limit}")]
    TooLarge { size: usize, limit: usize },
}

/// View query errors
#[derive(Error, Debug)]
pub enum ViewError {
    /// Referenced view, source or grant is absent
    #[error("Not found: {0}")]
    NotFound(String),

    /// Permission level below the required threshold
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Malformed template
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    /// Statement execution failed in the relational executor
    #[error("Execution error: {0}")]
    Execution(String),

    /// Cache store failure (never aborts a query)
    #[error("Cache error: {0}")]
    Cache(String),

    /// View name already used in the project
    #[error("The view name '{0}' is already taken")]
    NameTaken(String),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Background worker is gone
    #[error("Worker error: {0}")]
    Worker(String),
}

/// Result type for view operations
pub type ViewResult<T> = Result<T, ViewError>;
