use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use shared_scheduling::QueueStatus;

/// Informational only; numbering is strictly by arrival.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueuePriority {
    #[default]
    Normal,
    Urgent,
    Emergency,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueueEntry {
    pub id: Uuid,
    pub branch_id: Uuid,
    pub patient_id: Uuid,
    pub appointment_id: Option<Uuid>,
    pub queue_date: NaiveDate,
    pub queue_number: i32,
    pub status: QueueStatus,
    pub priority: QueuePriority,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub called_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Column values written by one status transition. Timestamps left `None`
/// are not touched; stores never overwrite a stamp that is already set.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueStatusUpdate {
    pub status: QueueStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub called_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl QueueStatusUpdate {
    /// The update that moves `entry` into `status` at `at`.
    pub fn entering(entry: &QueueEntry, status: QueueStatus, at: DateTime<Utc>) -> Self {
        let mut update = Self { status, called_at: None, started_at: None, completed_at: None };
        match status {
            QueueStatus::Called if entry.called_at.is_none() => update.called_at = Some(at),
            QueueStatus::InProgress if entry.started_at.is_none() => update.started_at = Some(at),
            QueueStatus::Done | QueueStatus::Skipped if entry.completed_at.is_none() => {
                update.completed_at = Some(at)
            }
            _ => {}
        }
        update
    }

    pub fn apply_to(&self, entry: &mut QueueEntry) {
        entry.status = self.status;
        entry.called_at = entry.called_at.or(self.called_at);
        entry.started_at = entry.started_at.or(self.started_at);
        entry.completed_at = entry.completed_at.or(self.completed_at);
    }
}

// ==============================================================================
// REQUEST / RESPONSE MODELS
// ==============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct CheckInRequest {
    pub branch_id: Uuid,
    pub patient_id: Uuid,
    pub appointment_id: Option<Uuid>,
    #[serde(default)]
    pub priority: QueuePriority,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateQueueStatusRequest {
    pub status: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckInReceipt {
    pub queue_entry_id: Uuid,
    pub queue_number: i32,
    pub entry: QueueEntry,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueStatusChange {
    pub entry: QueueEntry,
    pub previous_status: QueueStatus,
    pub applied: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueueStats {
    pub branch_id: Uuid,
    pub queue_date: Option<NaiveDate>,
    pub total: usize,
    pub waiting: usize,
    pub called: usize,
    pub in_progress: usize,
    pub done: usize,
    pub skipped: usize,
    pub last_number: Option<i32>,
}

impl QueueStats {
    pub fn tally(branch_id: Uuid, queue_date: NaiveDate, entries: &[QueueEntry]) -> Self {
        let mut stats = Self { branch_id, queue_date: Some(queue_date), ..Self::default() };
        for entry in entries {
            stats.total += 1;
            match entry.status {
                QueueStatus::Waiting => stats.waiting += 1,
                QueueStatus::Called => stats.called += 1,
                QueueStatus::InProgress => stats.in_progress += 1,
                QueueStatus::Done => stats.done += 1,
                QueueStatus::Skipped => stats.skipped += 1,
            }
        }
        stats.last_number = entries.iter().map(|e| e.queue_number).max();
        stats
    }
}
