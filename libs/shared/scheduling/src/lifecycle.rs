use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Schedulable entity kinds that share the transition validator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Appointment,
    QueueEntry,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Appointment => write!(f, "appointment"),
            EntityKind::QueueEntry => write!(f, "queue entry"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Scheduled,
    // Defined for storage compatibility, never assigned by the transition table.
    Confirmed,
    InProgress,
    NoShow,
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Waiting,
    Called,
    InProgress,
    Done,
    Skipped,
}

/// A closed status vocabulary with a fixed transition table.
pub trait StatusLifecycle:
    Copy + Eq + fmt::Debug + fmt::Display + FromStr<Err = StatusParseError> + Send + Sync + 'static
{
    const KIND: EntityKind;

    /// Statuses reachable in one step from `self`.
    fn next_states(&self) -> &'static [Self];

    fn is_terminal(&self) -> bool;
}

impl StatusLifecycle for AppointmentStatus {
    const KIND: EntityKind = EntityKind::Appointment;

    fn next_states(&self) -> &'static [Self] {
        use AppointmentStatus::*;
        match self {
            Scheduled => &[Completed, Cancelled],
            Confirmed | InProgress | NoShow => &[],
            Completed | Cancelled => &[],
        }
    }

    fn is_terminal(&self) -> bool {
        matches!(self, AppointmentStatus::Completed | AppointmentStatus::Cancelled)
    }
}

impl StatusLifecycle for QueueStatus {
    const KIND: EntityKind = EntityKind::QueueEntry;

    fn next_states(&self) -> &'static [Self] {
        use QueueStatus::*;
        match self {
            Waiting => &[Called],
            Called => &[InProgress, Skipped],
            InProgress => &[Done, Skipped],
            Done | Skipped => &[],
        }
    }

    fn is_terminal(&self) -> bool {
        matches!(self, QueueStatus::Done | QueueStatus::Skipped)
    }
}

impl AppointmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::Scheduled => "scheduled",
            AppointmentStatus::Confirmed => "confirmed",
            AppointmentStatus::InProgress => "in_progress",
            AppointmentStatus::NoShow => "no_show",
            AppointmentStatus::Completed => "completed",
            AppointmentStatus::Cancelled => "cancelled",
        }
    }

    /// Only cancelled bookings release their slot.
    pub fn holds_slot(&self) -> bool {
        *self != AppointmentStatus::Cancelled
    }
}

impl QueueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueStatus::Waiting => "waiting",
            QueueStatus::Called => "called",
            QueueStatus::InProgress => "in_progress",
            QueueStatus::Done => "done",
            QueueStatus::Skipped => "skipped",
        }
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown {kind} status '{value}'")]
pub struct StatusParseError {
    pub kind: EntityKind,
    pub value: String,
}

impl FromStr for AppointmentStatus {
    type Err = StatusParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "scheduled" => Ok(AppointmentStatus::Scheduled),
            "confirmed" => Ok(AppointmentStatus::Confirmed),
            "in_progress" => Ok(AppointmentStatus::InProgress),
            "no_show" => Ok(AppointmentStatus::NoShow),
            "completed" => Ok(AppointmentStatus::Completed),
            "cancelled" => Ok(AppointmentStatus::Cancelled),
            _ => Err(StatusParseError { kind: EntityKind::Appointment, value: value.to_string() }),
        }
    }
}

impl FromStr for QueueStatus {
    type Err = StatusParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "waiting" => Ok(QueueStatus::Waiting),
            "called" => Ok(QueueStatus::Called),
            "in_progress" => Ok(QueueStatus::InProgress),
            "done" => Ok(QueueStatus::Done),
            "skipped" => Ok(QueueStatus::Skipped),
            _ => Err(StatusParseError { kind: EntityKind::QueueEntry, value: value.to_string() }),
        }
    }
}

/// Outcome of asking the lifecycle whether a write should happen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The edge exists; write the new status.
    Apply,
    /// The entity is already in the requested status; nothing to write.
    AlreadyApplied,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind} cannot move from {from} to {to}")]
pub struct TransitionDenied {
    pub kind: EntityKind,
    pub from: String,
    pub to: String,
}

pub fn can_transition<S: StatusLifecycle>(current: S, requested: S) -> bool {
    current.next_states().contains(&requested)
}

/// Decide a requested status change. Re-requesting the current status is a
/// no-op rather than an error so that retried requests stay harmless.
pub fn evaluate<S: StatusLifecycle>(current: S, requested: S) -> Result<Transition, TransitionDenied> {
    if current == requested {
        debug!("{} already {}, nothing to apply", S::KIND, current);
        return Ok(Transition::AlreadyApplied);
    }

    if can_transition(current, requested) {
        Ok(Transition::Apply)
    } else {
        Err(TransitionDenied {
            kind: S::KIND,
            from: current.to_string(),
            to: requested.to_string(),
        })
    }
}

/// String-keyed form of [`can_transition`] for callers holding raw status names.
pub fn can_transition_named(kind: EntityKind, current: &str, requested: &str) -> Result<bool, StatusParseError> {
    match kind {
        EntityKind::Appointment => Ok(can_transition(
            current.parse::<AppointmentStatus>()?,
            requested.parse::<AppointmentStatus>()?,
        )),
        EntityKind::QueueEntry => Ok(can_transition(
            current.parse::<QueueStatus>()?,
            requested.parse::<QueueStatus>()?,
        )),
    }
}
