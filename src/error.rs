//! Error types for the sqlhoist front end.

use std::path::PathBuf;

use sqlhoist_core::HoistError;
use thiserror::Error;

/// Everything that can go wrong between reading input and printing output.
#[derive(Debug, Error)]
pub enum CliError {
    /// The optimizer rejected the statement.
    #[error("[{code}] {0}", code = .0.code())]
    Hoist(#[from] HoistError),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to read a configuration file.
    #[error("Cannot read config {}: {source}", path.display())]
    ConfigRead {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A configuration file that is not valid TOML for [`crate::config::Config`].
    #[error("Invalid config {}: {source}", path.display())]
    Toml {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A disabled pattern id that no matcher carries.
    #[error("Unknown pattern '{0}' in disabled_patterns")]
    UnknownPattern(String),
}

pub type CliResult<T> = Result<T, CliError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hoist_error_carries_code() {
        let err: CliError = HoistError::Parse("unexpected end".to_string()).into();
        assert!(err.to_string().starts_with("[HOIST-001] "));
    }

    #[test]
    fn test_unknown_pattern_display() {
        let err = CliError::UnknownPattern("last_seen".to_string());
        assert_eq!(err.to_string(), "Unknown pattern 'last_seen' in disabled_patterns");
    }
}
