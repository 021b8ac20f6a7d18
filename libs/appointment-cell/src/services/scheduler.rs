// libs/appointment-cell/src/services/scheduler.rs
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_scheduling::{
    evaluate, retry_on_contention, utc_day_bounds, AppointmentStatus, Caller, CollaboratorDispatch,
    Directory, DirectoryEntry, NotificationCategory, RetryPolicy, SchedulingLock, StatusLifecycle,
    TimeWindow, Transition,
};

use crate::models::{Appointment, AppointmentError, BookAppointmentRequest, ConflictReport, StatusChange};
use crate::services::conflict::{conflicting, doctor_lock_key, first_conflict};
use crate::services::store::AppointmentStore;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_SCHEDULE_DAYS: i64 = 7;

/// Owns booking creation and appointment status changes. Every booking for a
/// doctor runs its conflict check and insert while holding that doctor's lock.
pub struct AppointmentScheduler {
    store: Arc<dyn AppointmentStore>,
    directory: Arc<dyn Directory>,
    dispatch: CollaboratorDispatch,
    locks: Arc<SchedulingLock>,
    retry: RetryPolicy,
    timeout: Duration,
}

impl AppointmentScheduler {
    pub fn new(store: Arc<dyn AppointmentStore>, directory: Arc<dyn Directory>) -> Self {
        Self {
            store,
            directory,
            dispatch: CollaboratorDispatch::tracing_only(),
            locks: Arc::new(SchedulingLock::local()),
            retry: RetryPolicy::default(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Retry budget and deadline from config; locks and collaborators are
    /// wired separately since they are shared with the queue cell.
    pub fn configured(
        config: &AppConfig,
        store: Arc<dyn AppointmentStore>,
        directory: Arc<dyn Directory>,
    ) -> Self {
        Self::new(store, directory)
            .with_retry_policy(RetryPolicy::from_config(config))
            .with_timeout(config.operation_timeout())
    }

    pub fn with_collaborators(mut self, dispatch: CollaboratorDispatch) -> Self {
        self.dispatch = dispatch;
        self
    }

    pub fn with_locks(mut self, locks: Arc<SchedulingLock>) -> Self {
        self.locks = locks;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    // ==========================================================================
    // BOOKING
    // ==========================================================================

    #[instrument(skip(self, request, caller), fields(doctor_id = %request.doctor_id, patient_id = %request.patient_id))]
    pub async fn book(
        &self,
        request: BookAppointmentRequest,
        caller: &Caller,
    ) -> Result<Appointment, AppointmentError> {
        let window = TimeWindow::new(request.start_time, request.end_time)?;

        match tokio::time::timeout(self.timeout, self.book_within_deadline(&request, window, caller)).await {
            Ok(result) => result,
            Err(_) => {
                warn!("Booking for doctor {} in {} timed out", request.doctor_id, window);
                Err(AppointmentError::Timeout(self.timeout))
            }
        }
    }

    async fn book_within_deadline(
        &self,
        request: &BookAppointmentRequest,
        window: TimeWindow,
        caller: &Caller,
    ) -> Result<Appointment, AppointmentError> {
        self.verify_participants(request.doctor_id, request.patient_id, &caller.auth_token)
            .await?;

        let appointment = retry_on_contention(&self.retry, "book appointment", move |attempt| {
            self.try_book(request, window, caller, attempt)
        })
        .await?;

        info!(
            "Booked appointment {} for doctor {} in {}",
            appointment.id, appointment.doctor_id, window
        );

        self.dispatch.notify(
            appointment.doctor_id,
            NotificationCategory::Appointment,
            format!("New appointment booked for {}", window),
        );
        self.dispatch.notify(
            appointment.patient_id,
            NotificationCategory::Appointment,
            format!("Your appointment is confirmed for {}", window),
        );
        self.dispatch.audit(
            caller.user_id,
            "appointment.booked",
            json!({
                "appointment_id": appointment.id,
                "doctor_id": appointment.doctor_id,
                "patient_id": appointment.patient_id,
                "start_time": appointment.start_time,
                "end_time": appointment.end_time,
            }),
        );

        Ok(appointment)
    }

    /// One read-decide-write unit under the doctor's lock.
    async fn try_book(
        &self,
        request: &BookAppointmentRequest,
        window: TimeWindow,
        caller: &Caller,
        attempt: u32,
    ) -> Result<Appointment, AppointmentError> {
        let key = doctor_lock_key(request.doctor_id);
        let guard = self.locks.acquire(&key, self.timeout).await?;
        debug!("Holding {} for booking attempt {}", key, attempt);

        let outcome = self.check_and_insert(request, window, caller).await;
        guard.release().await;
        outcome
    }

    async fn check_and_insert(
        &self,
        request: &BookAppointmentRequest,
        window: TimeWindow,
        caller: &Caller,
    ) -> Result<Appointment, AppointmentError> {
        let existing = self
            .store
            .active_for_doctor(request.doctor_id, &window, &caller.auth_token)
            .await?;

        if let Some(clash) = first_conflict(&existing, &window) {
            let clash_window = clash.window().map_err(|e| {
                AppointmentError::DatabaseError(format!("Stored appointment {} is malformed: {}", clash.id, e))
            })?;
            warn!(
                "Doctor {} already booked in {} (appointment {}), rejecting {}",
                request.doctor_id, clash_window, clash.id, window
            );
            return Err(AppointmentError::Conflict {
                doctor_id: request.doctor_id,
                window: clash_window,
                appointment_id: clash.id,
            });
        }

        let now = Utc::now();
        let appointment = Appointment {
            id: Uuid::new_v4(),
            doctor_id: request.doctor_id,
            patient_id: request.patient_id,
            branch_id: request.branch_id,
            start_time: window.start(),
            end_time: window.end(),
            status: AppointmentStatus::Scheduled,
            reason: request.reason.clone(),
            created_at: now,
            created_by: caller.user_id,
            updated_at: now,
        };

        Ok(self.store.insert(&appointment, &caller.auth_token).await?)
    }

    async fn verify_participants(
        &self,
        doctor_id: Uuid,
        patient_id: Uuid,
        auth_token: &str,
    ) -> Result<(), AppointmentError> {
        let (doctor, patient) = tokio::join!(
            self.directory.doctor(doctor_id, auth_token),
            self.directory.patient(patient_id, auth_token),
        );

        match directory_state(doctor)? {
            None => return Err(AppointmentError::DoctorNotFound(doctor_id)),
            Some(entry) if !entry.active => {
                return Err(AppointmentError::ValidationError(format!(
                    "Doctor {} is not accepting appointments",
                    doctor_id
                )))
            }
            Some(_) => {}
        }

        match directory_state(patient)? {
            None => Err(AppointmentError::PatientNotFound(patient_id)),
            Some(entry) if !entry.active => Err(AppointmentError::ValidationError(format!(
                "Patient {} is not active",
                patient_id
            ))),
            Some(_) => Ok(()),
        }
    }

    // ==========================================================================
    // STATUS CHANGES
    // ==========================================================================

    #[instrument(skip(self, caller))]
    pub async fn change_status(
        &self,
        appointment_id: Uuid,
        requested: AppointmentStatus,
        caller: &Caller,
    ) -> Result<StatusChange, AppointmentError> {
        let change = retry_on_contention(&self.retry, "change appointment status", move |_| {
            self.try_change_status(appointment_id, requested, caller)
        })
        .await?;

        if !change.applied {
            return Ok(change);
        }

        info!(
            "Appointment {} moved from {} to {}",
            appointment_id, change.previous_status, requested
        );

        if requested.is_terminal() {
            self.dispatch.notify(
                change.appointment.patient_id,
                NotificationCategory::Appointment,
                format!("Your appointment on {} is now {}", change.appointment.start_time, requested),
            );
        }
        self.dispatch.audit(
            caller.user_id,
            "appointment.status_changed",
            json!({
                "appointment_id": appointment_id,
                "from": change.previous_status,
                "to": requested,
            }),
        );

        Ok(change)
    }

    async fn try_change_status(
        &self,
        appointment_id: Uuid,
        requested: AppointmentStatus,
        caller: &Caller,
    ) -> Result<StatusChange, AppointmentError> {
        let current = self.get(appointment_id, &caller.auth_token).await?;
        let previous_status = current.status;

        match evaluate(previous_status, requested)? {
            Transition::AlreadyApplied => Ok(StatusChange {
                appointment: current,
                previous_status,
                applied: false,
            }),
            Transition::Apply => {
                let updated = self
                    .store
                    .update_status(appointment_id, previous_status, requested, Utc::now(), &caller.auth_token)
                    .await?;

                match updated {
                    Some(appointment) => Ok(StatusChange { appointment, previous_status, applied: true }),
                    None => Err(AppointmentError::StorageContention {
                        attempts: 1,
                        detail: format!("appointment {} changed status concurrently", appointment_id),
                    }),
                }
            }
        }
    }

    // ==========================================================================
    // READS
    // ==========================================================================

    pub async fn get(&self, appointment_id: Uuid, auth_token: &str) -> Result<Appointment, AppointmentError> {
        self.store
            .get(appointment_id, auth_token)
            .await?
            .ok_or(AppointmentError::NotFound(appointment_id))
    }

    /// Preview only: nothing is locked, so a free window may be taken before
    /// a subsequent `book` call.
    pub async fn check_conflicts(
        &self,
        doctor_id: Uuid,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        auth_token: &str,
    ) -> Result<ConflictReport, AppointmentError> {
        let window = TimeWindow::new(start_time, end_time)?;
        let existing = self.store.active_for_doctor(doctor_id, &window, auth_token).await?;
        let conflicting_appointments: Vec<Appointment> =
            conflicting(&existing, &window).into_iter().cloned().collect();

        Ok(ConflictReport {
            doctor_id,
            requested: window,
            has_conflict: !conflicting_appointments.is_empty(),
            conflicting_appointments,
        })
    }

    /// Defaults to the week starting today (UTC).
    pub async fn list_for_doctor(
        &self,
        doctor_id: Uuid,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
        auth_token: &str,
    ) -> Result<Vec<Appointment>, AppointmentError> {
        let from = from.unwrap_or_else(|| utc_day_bounds(Utc::now().date_naive()).0);
        let to = to.unwrap_or(from + chrono::Duration::days(DEFAULT_SCHEDULE_DAYS));
        let range = TimeWindow::new(from, to)?;

        Ok(self
            .store
            .list_for_doctor(doctor_id, range.start(), range.end(), auth_token)
            .await?)
    }
}

fn directory_state(
    lookup: anyhow::Result<Option<DirectoryEntry>>,
) -> Result<Option<DirectoryEntry>, AppointmentError> {
    lookup.map_err(|e| AppointmentError::DirectoryUnavailable(format!("{:#}", e)))
}
