use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Method;
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use shared_database::SupabaseClient;
use shared_scheduling::{QueueStatus, StoreError};

use crate::models::{QueueEntry, QueueStatusUpdate};

/// Persistence for queue entries. `insert` must reject a second entry with
/// the same `(branch_id, queue_date, queue_number)` as
/// [`StoreError::Contention`].
#[async_trait]
pub trait QueueStore: Send + Sync {
    async fn get(&self, entry_id: Uuid, auth_token: &str) -> Result<Option<QueueEntry>, StoreError>;

    /// Highest number issued for the branch on `date`, if any.
    async fn max_number(&self, branch_id: Uuid, date: NaiveDate, auth_token: &str) -> Result<Option<i32>, StoreError>;

    /// All entries for the branch on `date`, ascending by number.
    async fn list_for_day(&self, branch_id: Uuid, date: NaiveDate, auth_token: &str) -> Result<Vec<QueueEntry>, StoreError>;

    async fn insert(&self, entry: &QueueEntry, auth_token: &str) -> Result<QueueEntry, StoreError>;

    /// Compare-and-set on status; `None` when the row left `expected` first.
    async fn update_status(
        &self,
        entry_id: Uuid,
        expected: QueueStatus,
        update: &QueueStatusUpdate,
        auth_token: &str,
    ) -> Result<Option<QueueEntry>, StoreError>;
}

// ==============================================================================
// IN-MEMORY STORE
// ==============================================================================

#[derive(Default)]
pub struct InMemoryQueueStore {
    rows: RwLock<HashMap<Uuid, QueueEntry>>,
}

impl InMemoryQueueStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl QueueStore for InMemoryQueueStore {
    async fn get(&self, entry_id: Uuid, _auth_token: &str) -> Result<Option<QueueEntry>, StoreError> {
        Ok(self.rows.read().await.get(&entry_id).cloned())
    }

    async fn max_number(&self, branch_id: Uuid, date: NaiveDate, _auth_token: &str) -> Result<Option<i32>, StoreError> {
        Ok(self
            .rows
            .read()
            .await
            .values()
            .filter(|e| e.branch_id == branch_id && e.queue_date == date)
            .map(|e| e.queue_number)
            .max())
    }

    async fn list_for_day(&self, branch_id: Uuid, date: NaiveDate, _auth_token: &str) -> Result<Vec<QueueEntry>, StoreError> {
        let rows = self.rows.read().await;
        let mut entries: Vec<QueueEntry> = rows
            .values()
            .filter(|e| e.branch_id == branch_id && e.queue_date == date)
            .cloned()
            .collect();
        entries.sort_by_key(|e| e.queue_number);
        Ok(entries)
    }

    async fn insert(&self, entry: &QueueEntry, _auth_token: &str) -> Result<QueueEntry, StoreError> {
        if entry.queue_number < 1 {
            return Err(StoreError::Backend(format!(
                "check constraint violated: queue number {} is not positive",
                entry.queue_number
            )));
        }

        let mut rows = self.rows.write().await;
        let taken = rows.values().any(|e| {
            e.branch_id == entry.branch_id && e.queue_date == entry.queue_date && e.queue_number == entry.queue_number
        });
        if taken || rows.contains_key(&entry.id) {
            return Err(StoreError::Contention(format!(
                "queue number {} already issued for branch {} on {}",
                entry.queue_number, entry.branch_id, entry.queue_date
            )));
        }

        rows.insert(entry.id, entry.clone());
        Ok(entry.clone())
    }

    async fn update_status(
        &self,
        entry_id: Uuid,
        expected: QueueStatus,
        update: &QueueStatusUpdate,
        _auth_token: &str,
    ) -> Result<Option<QueueEntry>, StoreError> {
        let mut rows = self.rows.write().await;
        match rows.get_mut(&entry_id) {
            Some(entry) if entry.status == expected => {
                update.apply_to(entry);
                Ok(Some(entry.clone()))
            }
            _ => Ok(None),
        }
    }
}

// ==============================================================================
// SUPABASE STORE
// ==============================================================================

#[derive(Deserialize)]
struct NumberRow {
    queue_number: i32,
}

/// PostgREST-backed store; uniqueness is guarded by the
/// `queue_entries_branch_day_number` index in `migrations/`.
pub struct SupabaseQueueStore {
    supabase: Arc<SupabaseClient>,
}

impl SupabaseQueueStore {
    pub fn new(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }
}

#[async_trait]
impl QueueStore for SupabaseQueueStore {
    async fn get(&self, entry_id: Uuid, auth_token: &str) -> Result<Option<QueueEntry>, StoreError> {
        let path = format!("/rest/v1/queue_entries?id=eq.{}", entry_id);
        let rows: Vec<QueueEntry> = self.supabase.request(Method::GET, &path, Some(auth_token), None).await?;
        Ok(rows.into_iter().next())
    }

    async fn max_number(&self, branch_id: Uuid, date: NaiveDate, auth_token: &str) -> Result<Option<i32>, StoreError> {
        let path = format!(
            "/rest/v1/queue_entries?branch_id=eq.{}&queue_date=eq.{}&select=queue_number&order=queue_number.desc&limit=1",
            branch_id, date
        );
        let rows: Vec<NumberRow> = self.supabase.request(Method::GET, &path, Some(auth_token), None).await?;
        let max = rows.first().map(|r| r.queue_number);
        debug!("Branch {} on {} has issued up to {:?}", branch_id, date, max);
        Ok(max)
    }

    async fn list_for_day(&self, branch_id: Uuid, date: NaiveDate, auth_token: &str) -> Result<Vec<QueueEntry>, StoreError> {
        let path = format!(
            "/rest/v1/queue_entries?branch_id=eq.{}&queue_date=eq.{}&order=queue_number.asc",
            branch_id, date
        );
        let rows: Vec<QueueEntry> = self.supabase.request(Method::GET, &path, Some(auth_token), None).await?;
        Ok(rows)
    }

    async fn insert(&self, entry: &QueueEntry, auth_token: &str) -> Result<QueueEntry, StoreError> {
        let body = serde_json::to_value(entry)?;
        let rows: Vec<QueueEntry> = self
            .supabase
            .request_with_headers(
                Method::POST,
                "/rest/v1/queue_entries",
                Some(auth_token),
                Some(body),
                &[("prefer", "return=representation")],
            )
            .await?;

        rows.into_iter()
            .next()
            .ok_or_else(|| StoreError::Backend("Insert returned no queue entry row".to_string()))
    }

    async fn update_status(
        &self,
        entry_id: Uuid,
        expected: QueueStatus,
        update: &QueueStatusUpdate,
        auth_token: &str,
    ) -> Result<Option<QueueEntry>, StoreError> {
        let path = format!("/rest/v1/queue_entries?id=eq.{}&status=eq.{}", entry_id, expected);
        let body = serde_json::to_value(update)?;

        let rows: Vec<QueueEntry> = self
            .supabase
            .request_with_headers(
                Method::PATCH,
                &path,
                Some(auth_token),
                Some(body),
                &[("prefer", "return=representation")],
            )
            .await?;
        Ok(rows.into_iter().next())
    }
}
