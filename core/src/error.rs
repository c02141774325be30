//! Error types for sqlhoist.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HoistError {
    /// The SQL text could not be parsed into exactly one statement.
    #[error("Parse error: {0}")]
    Parse(String),

    /// The statement parsed but uses a shape the rewrite model does not carry.
    #[error("Unsupported SQL construct: {0}")]
    Unsupported(String),

    /// A matcher produced a CTE body that does not parse. This is a bug in the
    /// matcher, never a data problem.
    #[error("Generated CTE '{name}' is not valid SQL: {reason}")]
    MalformedCte { name: String, reason: String },
}

impl HoistError {
    pub fn unsupported(what: impl Into<String>) -> Self {
        Self::Unsupported(what.into())
    }

    /// Stable code for callers that report failures upstream.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Parse(_) => "HOIST-001",
            Self::Unsupported(_) => "HOIST-002",
            Self::MalformedCte { .. } => "HOIST-003",
        }
    }
}

/// Result type alias for sqlhoist operations.
pub type HoistResult<T> = Result<T, HoistError>;
