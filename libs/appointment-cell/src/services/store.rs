// libs/appointment-cell/src/services/store.rs
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::Method;
use serde_json::json;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use shared_database::SupabaseClient;
use shared_scheduling::{AppointmentStatus, StoreError, TimeWindow};

use crate::models::Appointment;

/// Persistence for appointments. Implementations must reject an insert that
/// overlaps a slot-holding appointment of the same doctor with
/// [`StoreError::Contention`], even when the caller already checked.
#[async_trait]
pub trait AppointmentStore: Send + Sync {
    async fn get(&self, appointment_id: Uuid, auth_token: &str) -> Result<Option<Appointment>, StoreError>;

    /// Slot-holding appointments of `doctor_id` intersecting `window`.
    async fn active_for_doctor(
        &self,
        doctor_id: Uuid,
        window: &TimeWindow,
        auth_token: &str,
    ) -> Result<Vec<Appointment>, StoreError>;

    /// Every appointment of `doctor_id` starting in `[from, to)`, ascending.
    async fn list_for_doctor(
        &self,
        doctor_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        auth_token: &str,
    ) -> Result<Vec<Appointment>, StoreError>;

    async fn insert(&self, appointment: &Appointment, auth_token: &str) -> Result<Appointment, StoreError>;

    /// Compare-and-set on the status column. `None` means the row was not in
    /// `expected` any more (or is gone).
    async fn update_status(
        &self,
        appointment_id: Uuid,
        expected: AppointmentStatus,
        new_status: AppointmentStatus,
        at: DateTime<Utc>,
        auth_token: &str,
    ) -> Result<Option<Appointment>, StoreError>;
}

// ==============================================================================
// IN-MEMORY STORE
// ==============================================================================

#[derive(Default)]
pub struct InMemoryAppointmentStore {
    rows: RwLock<HashMap<Uuid, Appointment>>,
}

impl InMemoryAppointmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn count_for_doctor(&self, doctor_id: Uuid) -> usize {
        self.rows.read().await.values().filter(|a| a.doctor_id == doctor_id).count()
    }
}

#[async_trait]
impl AppointmentStore for InMemoryAppointmentStore {
    async fn get(&self, appointment_id: Uuid, _auth_token: &str) -> Result<Option<Appointment>, StoreError> {
        Ok(self.rows.read().await.get(&appointment_id).cloned())
    }

    async fn active_for_doctor(
        &self,
        doctor_id: Uuid,
        window: &TimeWindow,
        _auth_token: &str,
    ) -> Result<Vec<Appointment>, StoreError> {
        let rows = self.rows.read().await;
        let mut active: Vec<Appointment> = rows
            .values()
            .filter(|a| a.doctor_id == doctor_id && a.blocks(window))
            .cloned()
            .collect();
        active.sort_by_key(|a| a.start_time);
        Ok(active)
    }

    async fn list_for_doctor(
        &self,
        doctor_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        _auth_token: &str,
    ) -> Result<Vec<Appointment>, StoreError> {
        let rows = self.rows.read().await;
        let mut listed: Vec<Appointment> = rows
            .values()
            .filter(|a| a.doctor_id == doctor_id && a.start_time >= from && a.start_time < to)
            .cloned()
            .collect();
        listed.sort_by_key(|a| a.start_time);
        Ok(listed)
    }

    async fn insert(&self, appointment: &Appointment, _auth_token: &str) -> Result<Appointment, StoreError> {
        let window = appointment
            .window()
            .map_err(|e| StoreError::Backend(format!("check constraint violated: {}", e)))?;

        let mut rows = self.rows.write().await;
        if rows.contains_key(&appointment.id) {
            return Err(StoreError::Contention(format!("duplicate appointment id {}", appointment.id)));
        }
        if appointment.status.holds_slot() {
            if let Some(clash) = rows
                .values()
                .find(|a| a.doctor_id == appointment.doctor_id && a.blocks(&window))
            {
                return Err(StoreError::Contention(format!(
                    "appointment {} overlaps {} for doctor {}",
                    appointment.id, clash.id, appointment.doctor_id
                )));
            }
        }

        rows.insert(appointment.id, appointment.clone());
        Ok(appointment.clone())
    }

    async fn update_status(
        &self,
        appointment_id: Uuid,
        expected: AppointmentStatus,
        new_status: AppointmentStatus,
        at: DateTime<Utc>,
        _auth_token: &str,
    ) -> Result<Option<Appointment>, StoreError> {
        let mut rows = self.rows.write().await;
        match rows.get_mut(&appointment_id) {
            Some(row) if row.status == expected => {
                row.status = new_status;
                row.updated_at = at;
                Ok(Some(row.clone()))
            }
            _ => Ok(None),
        }
    }
}

// ==============================================================================
// SUPABASE STORE
// ==============================================================================

/// PostgREST-backed store. Overlap protection comes from the
/// `appointments_no_overlap` exclusion constraint in `migrations/`.
pub struct SupabaseAppointmentStore {
    supabase: Arc<SupabaseClient>,
}

impl SupabaseAppointmentStore {
    pub fn new(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

#[async_trait]
impl AppointmentStore for SupabaseAppointmentStore {
    async fn get(&self, appointment_id: Uuid, auth_token: &str) -> Result<Option<Appointment>, StoreError> {
        let path = format!("/rest/v1/appointments?id=eq.{}", appointment_id);
        let rows: Vec<Appointment> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn active_for_doctor(
        &self,
        doctor_id: Uuid,
        window: &TimeWindow,
        auth_token: &str,
    ) -> Result<Vec<Appointment>, StoreError> {
        let path = format!(
            "/rest/v1/appointments?doctor_id=eq.{}&status=neq.cancelled&start_time=lt.{}&end_time=gt.{}&order=start_time.asc",
            doctor_id,
            timestamp(window.end()),
            timestamp(window.start())
        );
        debug!("Fetching active appointments for doctor {} in {}", doctor_id, window);

        let rows: Vec<Appointment> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await?;
        Ok(rows)
    }

    async fn list_for_doctor(
        &self,
        doctor_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        auth_token: &str,
    ) -> Result<Vec<Appointment>, StoreError> {
        let path = format!(
            "/rest/v1/appointments?doctor_id=eq.{}&start_time=gte.{}&start_time=lt.{}&order=start_time.asc",
            doctor_id,
            timestamp(from),
            timestamp(to)
        );
        let rows: Vec<Appointment> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await?;
        Ok(rows)
    }

    async fn insert(&self, appointment: &Appointment, auth_token: &str) -> Result<Appointment, StoreError> {
        let body = serde_json::to_value(appointment)?;
        let rows: Vec<Appointment> = self
            .supabase
            .request_with_headers(
                Method::POST,
                "/rest/v1/appointments",
                Some(auth_token),
                Some(body),
                &[("prefer", "return=representation")],
            )
            .await?;

        rows.into_iter()
            .next()
            .ok_or_else(|| StoreError::Backend("Insert returned no appointment row".to_string()))
    }

    async fn update_status(
        &self,
        appointment_id: Uuid,
        expected: AppointmentStatus,
        new_status: AppointmentStatus,
        at: DateTime<Utc>,
        auth_token: &str,
    ) -> Result<Option<Appointment>, StoreError> {
        let path = format!("/rest/v1/appointments?id=eq.{}&status=eq.{}", appointment_id, expected);
        let body = json!({
            "status": new_status,
            "updated_at": timestamp(at),
        });

        let rows: Vec<Appointment> = self
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
