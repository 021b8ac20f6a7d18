// libs/appointment-cell/src/models.rs
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use shared_models::error::AppError;
use shared_scheduling::{
    overlaps, AppointmentStatus, Contended, EmptyWindow, LockError, StatusParseError, StoreError,
    TimeWindow, TransitionDenied,
};

// ==============================================================================
// CORE APPOINTMENT MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Appointment {
    pub id: Uuid,
    pub doctor_id: Uuid,
    pub patient_id: Uuid,
    pub branch_id: Option<Uuid>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub status: AppointmentStatus,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub created_by: Uuid,
    pub updated_at: DateTime<Utc>,
}

impl Appointment {
    pub fn window(&self) -> Result<TimeWindow, EmptyWindow> {
        TimeWindow::new(self.start_time, self.end_time)
    }

    /// True when this booking still holds its slot and intersects `window`.
    pub fn blocks(&self, window: &TimeWindow) -> bool {
        self.status.holds_slot() && overlaps(self.start_time, self.end_time, window.start(), window.end())
    }
}

// ==============================================================================
// REQUEST / RESPONSE MODELS
// ==============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct BookAppointmentRequest {
    pub doctor_id: Uuid,
    pub patient_id: Uuid,
    pub branch_id: Option<Uuid>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConflictCheckQuery {
    pub doctor_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DoctorScheduleQuery {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

/// Read-only preview of what a booking for `requested` would collide with.
#[derive(Debug, Clone, Serialize)]
pub struct ConflictReport {
    pub doctor_id: Uuid,
    pub requested: TimeWindow,
    pub has_conflict: bool,
    pub conflicting_appointments: Vec<Appointment>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusChange {
    pub appointment: Appointment,
    pub previous_status: AppointmentStatus,
    /// False when the appointment was already in the requested status.
    pub applied: bool,
}

// ==============================================================================
// ERROR TYPES
// ==============================================================================

#[derive(Error, Debug)]
pub enum AppointmentError {
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Doctor {doctor_id} already has appointment {appointment_id} during {window}")]
    Conflict {
        doctor_id: Uuid,
        window: TimeWindow,
        appointment_id: Uuid,
    },

    #[error("Appointment {0} not found")]
    NotFound(Uuid),

    #[error("Doctor {0} not found")]
    DoctorNotFound(Uuid),

    #[error("Patient {0} not found")]
    PatientNotFound(Uuid),

    #[error(transparent)]
    InvalidTransition(#[from] TransitionDenied),

    #[error("Storage contention after {attempts} attempt(s): {detail}")]
    StorageContention { attempts: u32, detail: String },

    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Directory lookup failed: {0}")]
    DirectoryUnavailable(String),

    #[error("Database error: {0}")]
    DatabaseError(String),
}

impl Contended for AppointmentError {
    fn is_contention(&self) -> bool {
        matches!(self, AppointmentError::StorageContention { .. })
    }

    fn exhausted(self, attempts: u32) -> Self {
        match self {
            AppointmentError::StorageContention { detail, .. } => {
                AppointmentError::StorageContention { attempts, detail }
            }
            other => other,
        }
    }
}

impl From<StoreError> for AppointmentError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Contention(detail) => AppointmentError::StorageContention { attempts: 1, detail },
            StoreError::MissingReference(detail) => AppointmentError::ValidationError(detail),
            StoreError::Backend(detail) => AppointmentError::DatabaseError(detail),
        }
    }
}

impl From<LockError> for AppointmentError {
    fn from(err: LockError) -> Self {
        match err {
            LockError::Timeout(key) => AppointmentError::StorageContention {
                attempts: 1,
                detail: format!("lock {} is held by another booking", key),
            },
            LockError::Backend(detail) => AppointmentError::DatabaseError(detail),
        }
    }
}

impl From<EmptyWindow> for AppointmentError {
    fn from(err: EmptyWindow) -> Self {
        AppointmentError::ValidationError(err.to_string())
    }
}

impl From<StatusParseError> for AppointmentError {
    fn from(err: StatusParseError) -> Self {
        AppointmentError::ValidationError(err.to_string())
    }
}

impl From<AppointmentError> for AppError {
    fn from(err: AppointmentError) -> Self {
        let message = err.to_string();
        match err {
            AppointmentError::ValidationError(_) => AppError::ValidationError(message),
            AppointmentError::Conflict { .. } => AppError::Conflict(message),
            AppointmentError::NotFound(_)
            | AppointmentError::DoctorNotFound(_)
            | AppointmentError::PatientNotFound(_) => AppError::NotFound(message),
            AppointmentError::InvalidTransition(_) => AppError::InvalidTransition(message),
            AppointmentError::StorageContention { .. } | AppointmentError::Timeout(_) => {
                AppError::Unavailable(message)
            }
            AppointmentError::DirectoryUnavailable(_) => AppError::ExternalService(message),
            AppointmentError::DatabaseError(_) => AppError::Database(message),
        }
    }
}
