use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

use shared_models::error::AppError;
use shared_scheduling::{Contended, LockError, StatusParseError, StoreError, TransitionDenied};

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Queue entry {0} not found")]
    NotFound(Uuid),

    #[error("Branch {0} not found")]
    BranchNotFound(Uuid),

    #[error("Patient {0} not found")]
    PatientNotFound(Uuid),

    #[error("Appointment {0} not found")]
    AppointmentNotFound(Uuid),

    #[error("No patient is waiting at branch {0}")]
    NoneWaiting(Uuid),

    #[error(transparent)]
    InvalidTransition(#[from] TransitionDenied),

    #[error("Storage contention after {attempts} attempt(s): {detail}")]
    StorageContention { attempts: u32, detail: String },

    #[error("Check-in timed out after {0:?}")]
    Timeout(Duration),

    #[error("Directory lookup failed: {0}")]
    DirectoryUnavailable(String),

    #[error("Database error: {0}")]
    DatabaseError(String),
}

impl Contended for QueueError {
    fn is_contention(&self) -> bool {
        matches!(self, QueueError::StorageContention { .. })
    }

    fn exhausted(self, attempts: u32) -> Self {
        match self {
            QueueError::StorageContention { detail, .. } => QueueError::StorageContention { attempts, detail },
            other => other,
        }
    }
}

impl From<StoreError> for QueueError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Contention(detail) => QueueError::StorageContention { attempts: 1, detail },
            StoreError::MissingReference(detail) => QueueError::ValidationError(detail),
            StoreError::Backend(detail) => QueueError::DatabaseError(detail),
        }
    }
}

impl From<LockError> for QueueError {
    fn from(err: LockError) -> Self {
        match err {
            LockError::Timeout(key) => QueueError::StorageContention {
                attempts: 1,
                detail: format!("lock {} is held by another check-in", key),
            },
            LockError::Backend(detail) => QueueError::DatabaseError(detail),
        }
    }
}

impl From<StatusParseError> for QueueError {
    fn from(err: StatusParseError) -> Self {
        QueueError::ValidationError(err.to_string())
    }
}

impl From<QueueError> for AppError {
    fn from(err: QueueError) -> Self {
        let message = err.to_string();
        match err {
            QueueError::ValidationError(_) => AppError::ValidationError(message),
            QueueError::NotFound(_)
            | QueueError::BranchNotFound(_)
            | QueueError::PatientNotFound(_)
            | QueueError::AppointmentNotFound(_)
            | QueueError::NoneWaiting(_) => AppError::NotFound(message),
            QueueError::InvalidTransition(_) => AppError::InvalidTransition(message),
            QueueError::StorageContention { .. } | QueueError::Timeout(_) => AppError::Unavailable(message),
            QueueError::DirectoryUnavailable(_) => AppError::ExternalService(message),
            QueueError::DatabaseError(_) => AppError::Database(message),
        }
    }
}
