use thiserror::Error;

use shared_database::DatabaseError;

/// Failure of a store call, split by whether a retry can help.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("write rejected by a concurrent writer: {0}")]
    Contention(String),

    #[error("referenced record does not exist: {0}")]
    MissingReference(String),

    #[error("storage failure: {0}")]
    Backend(String),
}

impl From<anyhow::Error> for StoreError {
    fn from(err: anyhow::Error) -> Self {
        if DatabaseError::is_contention_error(&err) {
            StoreError::Contention(format!("{:#}", err))
        } else if DatabaseError::is_missing_reference_error(&err) {
            StoreError::MissingReference(format!("{:#}", err))
        } else {
            StoreError::Backend(format!("{:#}", err))
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Backend(format!("Failed to parse stored row: {}", err))
    }
}
