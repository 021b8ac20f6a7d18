//! Primitives shared by the appointment and queue cells: the status
//! lifecycle, interval overlap, keyed locking, contention retry and the
//! collaborator interfaces.

pub mod caller;
pub mod collaborators;
pub mod interval;
pub mod keyed_lock;
pub mod lifecycle;
pub mod retry;
pub mod storage;

pub use caller::Caller;
pub use collaborators::{
    AuditRecorder, CollaboratorDispatch, Directory, DirectoryEntry, NotificationCategory, Notifier,
    OpenDirectory, StaticDirectory, SupabaseAuditRecorder, SupabaseDirectory, SupabaseNotifier, TracingCollaborators,
};
pub use interval::{overlaps, utc_day_bounds, EmptyWindow, TimeWindow};
pub use keyed_lock::{KeyedLocks, LockError, RedisKeyedLock, SchedulingGuard, SchedulingLock};
pub use lifecycle::{
    can_transition, can_transition_named, evaluate, AppointmentStatus, EntityKind, QueueStatus,
    StatusLifecycle, StatusParseError, Transition, TransitionDenied,
};
pub use retry::{retry_on_contention, Contended, RetryPolicy};
pub use storage::StoreError;

#[cfg(any(test, feature = "mocks"))]
pub use collaborators::{MockAuditRecorder, MockDirectory, MockNotifier};
