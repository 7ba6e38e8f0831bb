//! Crate-wide error type.
//!
//! Only failures that can abort a run live here. Per-account API failures
//! are classified as [`crate::steam::ApiError`] and handled inside the
//! client and detector layers.

use thiserror::Error;

/// Errors that surface to the caller of a traversal or a CLI command.
#[derive(Debug, Error)]
pub enum DegreesError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("cache store unavailable after {failures} consecutive failures")]
    StorageUnavailable { failures: usize },

    #[error("http client error: {0}")]
    Http(String),
}

pub type Result<T> = std::result::Result<T, DegreesError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_unavailable_mentions_failure_count() {
        let err = DegreesError::StorageUnavailable { failures: 8 };
        assert_eq!(
            err.to_string(),
            "cache store unavailable after 8 consecutive failures"
        );
    }

    #[test]
    fn rusqlite_errors_convert() {
        let err: DegreesError = rusqlite::Error::QueryReturnedNoRows.into();
        assert!(matches!(err, DegreesError::Database(_)));
    }
}
