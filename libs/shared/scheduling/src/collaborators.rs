use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Method;
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use shared_database::SupabaseClient;

/// Existence and active flag of a directory record. An appointment counts as
/// active until it is cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub id: Uuid,
    pub active: bool,
}

/// Read-only lookups against the clinic's people and branch records.
#[cfg_attr(any(test, feature = "mocks"), mockall::automock)]
#[async_trait]
pub trait Directory: Send + Sync {
    async fn doctor(&self, doctor_id: Uuid, auth_token: &str) -> Result<Option<DirectoryEntry>>;
    async fn patient(&self, patient_id: Uuid, auth_token: &str) -> Result<Option<DirectoryEntry>>;
    async fn branch(&self, branch_id: Uuid, auth_token: &str) -> Result<Option<DirectoryEntry>>;
    async fn appointment(&self, appointment_id: Uuid, auth_token: &str) -> Result<Option<DirectoryEntry>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationCategory {
    Appointment,
    Queue,
}

impl fmt::Display for NotificationCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotificationCategory::Appointment => write!(f, "appointment"),
            NotificationCategory::Queue => write!(f, "queue"),
        }
    }
}

#[cfg_attr(any(test, feature = "mocks"), mockall::automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, user_id: Uuid, category: NotificationCategory, message: String) -> Result<()>;
}

#[cfg_attr(any(test, feature = "mocks"), mockall::automock)]
#[async_trait]
pub trait AuditRecorder: Send + Sync {
    async fn record(&self, user_id: Uuid, action: String, details: Value) -> Result<()>;
}

// ==============================================================================
// SUPABASE ADAPTERS
// ==============================================================================

pub struct SupabaseDirectory {
    supabase: Arc<SupabaseClient>,
}

impl SupabaseDirectory {
    pub fn new(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }

    async fn lookup(
        &self,
        table: &str,
        id: Uuid,
        active_column: &str,
        auth_token: &str,
    ) -> Result<Option<DirectoryEntry>> {
        let path = format!("/rest/v1/{}?id=eq.{}&select=id,{}", table, id, active_column);
        let rows: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .with_context(|| format!("Failed to look up {} {}", table, id))?;

        Ok(rows.first().map(|row| DirectoryEntry {
            id,
            active: row[active_column].as_bool().unwrap_or(false),
        }))
    }
}

#[async_trait]
impl Directory for SupabaseDirectory {
    async fn doctor(&self, doctor_id: Uuid, auth_token: &str) -> Result<Option<DirectoryEntry>> {
        self.lookup("doctors", doctor_id, "is_available", auth_token).await
    }

    async fn patient(&self, patient_id: Uuid, auth_token: &str) -> Result<Option<DirectoryEntry>> {
        self.lookup("patients", patient_id, "is_active", auth_token).await
    }

    async fn branch(&self, branch_id: Uuid, auth_token: &str) -> Result<Option<DirectoryEntry>> {
        self.lookup("branches", branch_id, "is_active", auth_token).await
    }

    async fn appointment(&self, appointment_id: Uuid, auth_token: &str) -> Result<Option<DirectoryEntry>> {
        let path = format!("/rest/v1/appointments?id=eq.{}&select=id,status", appointment_id);
        let rows: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .with_context(|| format!("Failed to look up appointment {}", appointment_id))?;

        Ok(rows.first().map(|row| DirectoryEntry {
            id: appointment_id,
            active: row["status"].as_str() != Some("cancelled"),
        }))
    }
}

pub struct SupabaseNotifier {
    supabase: Arc<SupabaseClient>,
    service_key: Option<String>,
}

impl SupabaseNotifier {
    /// Without a service key the insert goes out with the anon key only.
    pub fn new(supabase: Arc<SupabaseClient>, service_key: Option<String>) -> Self {
        Self { supabase, service_key }
    }
}

#[async_trait]
impl Notifier for SupabaseNotifier {
    async fn notify(&self, user_id: Uuid, category: NotificationCategory, message: String) -> Result<()> {
        let body = json!({
            "user_id": user_id,
            "category": category.to_string(),
            "message": message,
            "created_at": Utc::now().to_rfc3339(),
        });
        let _: Value = self
            .supabase
            .request_with_headers(
                Method::POST,
                "/rest/v1/notifications",
                self.service_key.as_deref(),
                Some(body),
                &[("prefer", "return=minimal")],
            )
            .await
            .or_else(empty_body_ok)?;
        Ok(())
    }
}

pub struct SupabaseAuditRecorder {
    supabase: Arc<SupabaseClient>,
    service_key: Option<String>,
}

impl SupabaseAuditRecorder {
    /// Without a service key the insert goes out with the anon key only.
    pub fn new(supabase: Arc<SupabaseClient>, service_key: Option<String>) -> Self {
        Self { supabase, service_key }
    }
}

#[async_trait]
impl AuditRecorder for SupabaseAuditRecorder {
    async fn record(&self, user_id: Uuid, action: String, details: Value) -> Result<()> {
        let body = json!({
            "user_id": user_id,
            "action": action,
            "details": details,
            "created_at": Utc::now().to_rfc3339(),
        });
        let _: Value = self
            .supabase
            .request_with_headers(
                Method::POST,
                "/rest/v1/audit_logs",
                self.service_key.as_deref(),
                Some(body),
                &[("prefer", "return=minimal")],
            )
            .await
            .or_else(empty_body_ok)?;
        Ok(())
    }
}

/// `return=minimal` answers with an empty body, which fails JSON decoding.
fn empty_body_ok(err: anyhow::Error) -> Result<Value> {
    if err.downcast_ref::<reqwest::Error>().map(|e| e.is_decode()).unwrap_or(false) {
        Ok(Value::Null)
    } else {
        Err(err)
    }
}

// ==============================================================================
// IN-PROCESS ADAPTERS
// ==============================================================================

/// Fixed directory contents, for in-memory deployments and tests.
#[derive(Debug, Default, Clone)]
pub struct StaticDirectory {
    doctors: HashMap<Uuid, bool>,
    patients: HashMap<Uuid, bool>,
    branches: HashMap<Uuid, bool>,
    appointments: HashMap<Uuid, bool>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_doctor(mut self, id: Uuid, active: bool) -> Self {
        self.doctors.insert(id, active);
        self
    }

    pub fn with_patient(mut self, id: Uuid, active: bool) -> Self {
        self.patients.insert(id, active);
        self
    }

    pub fn with_branch(mut self, id: Uuid, active: bool) -> Self {
        self.branches.insert(id, active);
        self
    }

    pub fn with_appointment(mut self, id: Uuid, active: bool) -> Self {
        self.appointments.insert(id, active);
        self
    }

    fn entry(map: &HashMap<Uuid, bool>, id: Uuid) -> Option<DirectoryEntry> {
        map.get(&id).map(|active| DirectoryEntry { id, active: *active })
    }
}

#[async_trait]
impl Directory for StaticDirectory {
    async fn doctor(&self, doctor_id: Uuid, _auth_token: &str) -> Result<Option<DirectoryEntry>> {
        Ok(Self::entry(&self.doctors, doctor_id))
    }

    async fn patient(&self, patient_id: Uuid, _auth_token: &str) -> Result<Option<DirectoryEntry>> {
        Ok(Self::entry(&self.patients, patient_id))
    }

    async fn branch(&self, branch_id: Uuid, _auth_token: &str) -> Result<Option<DirectoryEntry>> {
        Ok(Self::entry(&self.branches, branch_id))
    }

    async fn appointment(&self, appointment_id: Uuid, _auth_token: &str) -> Result<Option<DirectoryEntry>> {
        Ok(Self::entry(&self.appointments, appointment_id))
    }
}

/// Treats every reference as an existing, active record. Used when the
/// service runs without a directory backend (local development).
pub struct OpenDirectory;

#[async_trait]
impl Directory for OpenDirectory {
    async fn doctor(&self, doctor_id: Uuid, _auth_token: &str) -> Result<Option<DirectoryEntry>> {
        Ok(Some(DirectoryEntry { id: doctor_id, active: true }))
    }

    async fn patient(&self, patient_id: Uuid, _auth_token: &str) -> Result<Option<DirectoryEntry>> {
        Ok(Some(DirectoryEntry { id: patient_id, active: true }))
    }

    async fn branch(&self, branch_id: Uuid, _auth_token: &str) -> Result<Option<DirectoryEntry>> {
        Ok(Some(DirectoryEntry { id: branch_id, active: true }))
    }

    async fn appointment(&self, appointment_id: Uuid, _auth_token: &str) -> Result<Option<DirectoryEntry>> {
        Ok(Some(DirectoryEntry { id: appointment_id, active: true }))
    }
}

/// Writes notifications and audit records to the log only.
pub struct TracingCollaborators;

#[async_trait]
impl Notifier for TracingCollaborators {
    async fn notify(&self, user_id: Uuid, category: NotificationCategory, message: String) -> Result<()> {
        info!(user_id = %user_id, category = %category, "NOTIFY: {}", message);
        Ok(())
    }
}

#[async_trait]
impl AuditRecorder for TracingCollaborators {
    async fn record(&self, user_id: Uuid, action: String, details: Value) -> Result<()> {
        info!(user_id = %user_id, details = %details, "AUDIT: {}", action);
        Ok(())
    }
}

// ==============================================================================
// FIRE-AND-FORGET DISPATCH
// ==============================================================================

/// Hands notification and audit calls to the runtime so they never delay or
/// undo the write that triggered them. Failures are logged and dropped.
#[derive(Clone)]
pub struct CollaboratorDispatch {
    notifier: Arc<dyn Notifier>,
    audit: Arc<dyn AuditRecorder>,
}

impl CollaboratorDispatch {
    pub fn new(notifier: Arc<dyn Notifier>, audit: Arc<dyn AuditRecorder>) -> Self {
        Self { notifier, audit }
    }

    pub fn tracing_only() -> Self {
        Self::new(Arc::new(TracingCollaborators), Arc::new(TracingCollaborators))
    }

    pub fn notify(
        &self,
        user_id: Uuid,
        category: NotificationCategory,
        message: impl Into<String>,
    ) -> JoinHandle<()> {
        let notifier = Arc::clone(&self.notifier);
        let message = message.into();
        tokio::spawn(async move {
            if let Err(e) = notifier.notify(user_id, category, message).await {
                warn!(user_id = %user_id, category = %category, "Notification failed: {:#}", e);
            }
        })
    }

    pub fn audit(&self, user_id: Uuid, action: impl Into<String>, details: Value) -> JoinHandle<()> {
        let audit = Arc::clone(&self.audit);
        let action = action.into();
        tokio::spawn(async move {
            if let Err(e) = audit.record(user_id, action.clone(), details).await {
                warn!(user_id = %user_id, action = %action, "Audit record failed: {:#}", e);
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use shared_config::AppConfig;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn supabase_for(url: &str) -> Arc<SupabaseClient> {
        let config = AppConfig {
            supabase_url: url.to_string(),
            supabase_anon_key: "test-anon-key".to_string(),
            ..AppConfig::default()
        };
        Arc::new(SupabaseClient::new(&config))
    }

    #[tokio::test]
    async fn test_failing_collaborators_are_swallowed() {
        let mut notifier = MockNotifier::new();
        notifier.expect_notify().returning(|_, _, _| Err(anyhow!("smtp down")));
        let mut audit = MockAuditRecorder::new();
        audit.expect_record().returning(|_, _, _| Err(anyhow!("audit store down")));

        let dispatch = CollaboratorDispatch::new(Arc::new(notifier), Arc::new(audit));
        let user = Uuid::new_v4();

        assert!(dispatch.notify(user, NotificationCategory::Queue, "Your number is 4").await.is_ok());
        assert!(dispatch.audit(user, "queue.check_in", json!({"n": 4})).await.is_ok());
    }

    #[tokio::test]
    async fn test_supabase_directory_lookup() {
        let server = MockServer::start().await;
        let doctor_id = Uuid::new_v4();

        Mock::given(method("GET"))
            .and(path("/rest/v1/doctors"))
            .and(query_param("id", format!("eq.{}", doctor_id)))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"id": doctor_id, "is_available": true}
            ])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/patients"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;

        let directory = SupabaseDirectory::new(supabase_for(&server.uri()));

        let doctor = directory.doctor(doctor_id, "token").await.unwrap();
        assert_eq!(doctor, Some(DirectoryEntry { id: doctor_id, active: true }));

        let patient = directory.patient(Uuid::new_v4(), "token").await.unwrap();
        assert_eq!(patient, None);
    }

    #[tokio::test]
    async fn test_supabase_notifier_accepts_minimal_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rest/v1/notifications"))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        let notifier = SupabaseNotifier::new(supabase_for(&server.uri()), None);
        notifier
            .notify(Uuid::new_v4(), NotificationCategory::Appointment, "Booked".to_string())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_audit_insert_uses_service_key() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rest/v1/audit_logs"))
            .and(header("authorization", "Bearer service-role-key"))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        let recorder = SupabaseAuditRecorder::new(supabase_for(&server.uri()), Some("service-role-key".to_string()));
        recorder
            .record(Uuid::new_v4(), "queue.checked_in".to_string(), json!({"queue_number": 1}))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_cancelled_appointment_is_inactive() {
        let server = MockServer::start().await;
        let cancelled = Uuid::new_v4();

        Mock::given(method("GET"))
            .and(path("/rest/v1/appointments"))
            .and(query_param("id", format!("eq.{}", cancelled)))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"id": cancelled, "status": "cancelled"}
            ])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/appointments"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;

        let directory = SupabaseDirectory::new(supabase_for(&server.uri()));

        let entry = directory.appointment(cancelled, "token").await.unwrap();
        assert_eq!(entry, Some(DirectoryEntry { id: cancelled, active: false }));
        assert_eq!(directory.appointment(Uuid::new_v4(), "token").await.unwrap(), None);
    }
}
