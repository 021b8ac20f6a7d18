use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use serde_json::json;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_scheduling::{
    evaluate, retry_on_contention, Caller, CollaboratorDispatch, Directory, DirectoryEntry,
    NotificationCategory, QueueStatus, RetryPolicy, SchedulingLock, Transition,
};

use crate::error::QueueError;
use crate::models::{CheckInReceipt, CheckInRequest, QueueEntry, QueueStats, QueueStatusChange, QueueStatusUpdate};
use crate::services::store::QueueStore;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Lock key serialising number assignment for one branch-day.
pub fn queue_lock_key(branch_id: Uuid, date: NaiveDate) -> String {
    format!("queue:{}:{}", branch_id, date)
}

/// Issues walk-in tickets. Numbers are `max + 1` per branch per UTC day,
/// decided and inserted under the branch-day lock, with the store's unique
/// index as backstop.
pub struct QueueTicketAllocator {
    store: Arc<dyn QueueStore>,
    directory: Arc<dyn Directory>,
    dispatch: CollaboratorDispatch,
    locks: Arc<SchedulingLock>,
    retry: RetryPolicy,
    timeout: Duration,
}

impl QueueTicketAllocator {
    pub fn new(store: Arc<dyn QueueStore>, directory: Arc<dyn Directory>) -> Self {
        Self {
            store,
            directory,
            dispatch: CollaboratorDispatch::tracing_only(),
            locks: Arc::new(SchedulingLock::local()),
            retry: RetryPolicy::default(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn configured(config: &AppConfig, store: Arc<dyn QueueStore>, directory: Arc<dyn Directory>) -> Self {
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

    #[instrument(skip(self, request, caller), fields(branch_id = %request.branch_id, patient_id = %request.patient_id))]
    pub async fn check_in(&self, request: CheckInRequest, caller: &Caller) -> Result<CheckInReceipt, QueueError> {
        match tokio::time::timeout(self.timeout, self.check_in_within_deadline(&request, caller)).await {
            Ok(result) => result,
            Err(_) => {
                warn!("Check-in at branch {} timed out", request.branch_id);
                Err(QueueError::Timeout(self.timeout))
            }
        }
    }

    async fn check_in_within_deadline(
        &self,
        request: &CheckInRequest,
        caller: &Caller,
    ) -> Result<CheckInReceipt, QueueError> {
        self.verify_references(request, &caller.auth_token).await?;

        let entry = retry_on_contention(&self.retry, "queue check-in", move |attempt| {
            self.try_check_in(request, caller, attempt)
        })
        .await?;

        info!(
            "Issued queue number {} at branch {} for {}",
            entry.queue_number, entry.branch_id, entry.queue_date
        );

        self.dispatch.notify(
            entry.patient_id,
            NotificationCategory::Queue,
            format!("You are number {} in today's queue", entry.queue_number),
        );
        self.dispatch.audit(
            caller.user_id,
            "queue.checked_in",
            json!({
                "queue_entry_id": entry.id,
                "branch_id": entry.branch_id,
                "patient_id": entry.patient_id,
                "queue_number": entry.queue_number,
                "appointment_id": entry.appointment_id,
            }),
        );

        Ok(CheckInReceipt { queue_entry_id: entry.id, queue_number: entry.queue_number, entry })
    }

    /// Read max, decide, insert; the whole unit re-runs on contention so a
    /// rejected insert never leaves a stale number behind.
    async fn try_check_in(
        &self,
        request: &CheckInRequest,
        caller: &Caller,
        attempt: u32,
    ) -> Result<QueueEntry, QueueError> {
        let now = Utc::now();
        let queue_date = now.date_naive();
        let key = queue_lock_key(request.branch_id, queue_date);

        let guard = self.locks.acquire(&key, self.timeout).await?;
        debug!("Holding {} for check-in attempt {}", key, attempt);

        let outcome = async {
            let max = self
                .store
                .max_number(request.branch_id, queue_date, &caller.auth_token)
                .await?;
            let entry = QueueEntry {
                id: Uuid::new_v4(),
                branch_id: request.branch_id,
                patient_id: request.patient_id,
                appointment_id: request.appointment_id,
                queue_date,
                queue_number: max.map_or(1, |n| n + 1),
                status: QueueStatus::Waiting,
                priority: request.priority,
                notes: request.notes.clone(),
                created_at: now,
                called_at: None,
                started_at: None,
                completed_at: None,
            };
            Ok::<_, QueueError>(self.store.insert(&entry, &caller.auth_token).await?)
        }
        .await;

        guard.release().await;
        outcome
    }

    /// Branch and patient must exist and be active; a linked appointment must
    /// exist and not be cancelled.
    async fn verify_references(&self, request: &CheckInRequest, auth_token: &str) -> Result<(), QueueError> {
        let (branch_id, patient_id) = (request.branch_id, request.patient_id);
        let (branch, patient) = tokio::join!(
            self.directory.branch(branch_id, auth_token),
            self.directory.patient(patient_id, auth_token),
        );

        match lookup(branch)? {
            Some(entry) if entry.active => {}
            Some(_) => return Err(QueueError::ValidationError(format!("Branch {} is closed", branch_id))),
            None => return Err(QueueError::BranchNotFound(branch_id)),
        }
        match lookup(patient)? {
            Some(entry) if entry.active => {}
            Some(_) => return Err(QueueError::ValidationError(format!("Patient {} is not active", patient_id))),
            None => return Err(QueueError::PatientNotFound(patient_id)),
        }

        let Some(appointment_id) = request.appointment_id else {
            return Ok(());
        };
        match lookup(self.directory.appointment(appointment_id, auth_token).await)? {
            Some(entry) if entry.active => Ok(()),
            Some(_) => Err(QueueError::ValidationError(format!(
                "Appointment {} is cancelled",
                appointment_id
            ))),
            None => Err(QueueError::AppointmentNotFound(appointment_id)),
        }
    }

    // ==========================================================================
    // STATUS CHANGES
    // ==========================================================================

    #[instrument(skip(self, caller))]
    pub async fn change_status(
        &self,
        entry_id: Uuid,
        requested: QueueStatus,
        caller: &Caller,
    ) -> Result<QueueStatusChange, QueueError> {
        let change = retry_on_contention(&self.retry, "change queue status", move |_| {
            self.try_change_status(entry_id, requested, caller)
        })
        .await?;

        if change.applied {
            self.after_status_change(&change, caller);
        }
        Ok(change)
    }

    async fn try_change_status(
        &self,
        entry_id: Uuid,
        requested: QueueStatus,
        caller: &Caller,
    ) -> Result<QueueStatusChange, QueueError> {
        let current = self.get(entry_id, &caller.auth_token).await?;
        let previous_status = current.status;

        match evaluate(previous_status, requested)? {
            Transition::AlreadyApplied => Ok(QueueStatusChange { entry: current, previous_status, applied: false }),
            Transition::Apply => {
                let update = QueueStatusUpdate::entering(&current, requested, Utc::now());
                match self
                    .store
                    .update_status(entry_id, previous_status, &update, &caller.auth_token)
                    .await?
                {
                    Some(entry) => Ok(QueueStatusChange { entry, previous_status, applied: true }),
                    None => Err(QueueError::StorageContention {
                        attempts: 1,
                        detail: format!("queue entry {} changed status concurrently", entry_id),
                    }),
                }
            }
        }
    }

    fn after_status_change(&self, change: &QueueStatusChange, caller: &Caller) {
        let entry = &change.entry;
        info!(
            "Queue entry {} (number {}) moved from {} to {}",
            entry.id, entry.queue_number, change.previous_status, entry.status
        );

        if entry.status == QueueStatus::Called {
            self.dispatch.notify(
                entry.patient_id,
                NotificationCategory::Queue,
                format!("Number {} is being called", entry.queue_number),
            );
        }
        self.dispatch.audit(
            caller.user_id,
            "queue.status_changed",
            json!({
                "queue_entry_id": entry.id,
                "queue_number": entry.queue_number,
                "from": change.previous_status,
                "to": entry.status,
            }),
        );
    }

    /// Moves the lowest-numbered entry of today that the lifecycle allows to
    /// enter `Called` (i.e. a waiting one). An entry taken by a concurrent
    /// caller is skipped in favour of the next one.
    #[instrument(skip(self, caller))]
    pub async fn call_next(&self, branch_id: Uuid, caller: &Caller) -> Result<QueueEntry, QueueError> {
        let today = Utc::now().date_naive();
        let entries = self.store.list_for_day(branch_id, today, &caller.auth_token).await?;

        for candidate in entries {
            if !matches!(evaluate(candidate.status, QueueStatus::Called), Ok(Transition::Apply)) {
                continue;
            }

            let update = QueueStatusUpdate::entering(&candidate, QueueStatus::Called, Utc::now());
            match self
                .store
                .update_status(candidate.id, candidate.status, &update, &caller.auth_token)
                .await?
            {
                Some(entry) => {
                    let change = QueueStatusChange { entry, previous_status: candidate.status, applied: true };
                    self.after_status_change(&change, caller);
                    return Ok(change.entry);
                }
                None => debug!("Queue number {} was called elsewhere, trying next", candidate.queue_number),
            }
        }

        Err(QueueError::NoneWaiting(branch_id))
    }

    // ==========================================================================
    // READS
    // ==========================================================================

    pub async fn get(&self, entry_id: Uuid, auth_token: &str) -> Result<QueueEntry, QueueError> {
        self.store
            .get(entry_id, auth_token)
            .await?
            .ok_or(QueueError::NotFound(entry_id))
    }

    pub async fn list_today(&self, branch_id: Uuid, auth_token: &str) -> Result<Vec<QueueEntry>, QueueError> {
        let mut entries = self
            .store
            .list_for_day(branch_id, Utc::now().date_naive(), auth_token)
            .await?;
        entries.sort_by_key(|e| e.queue_number);
        Ok(entries)
    }

    pub async fn today_stats(&self, branch_id: Uuid, auth_token: &str) -> Result<QueueStats, QueueError> {
        let today = Utc::now().date_naive();
        let entries = self.store.list_for_day(branch_id, today, auth_token).await?;
        Ok(QueueStats::tally(branch_id, today, &entries))
    }
}

fn lookup(result: anyhow::Result<Option<DirectoryEntry>>) -> Result<Option<DirectoryEntry>, QueueError> {
    result.map_err(|e| QueueError::DirectoryUnavailable(format!("{:#}", e)))
}
