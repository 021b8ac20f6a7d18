use std::sync::Arc;

use assert_matches::assert_matches;
use chrono::{TimeZone, Utc};
use serde_json::json;
use uuid::Uuid;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use appointment_cell::models::Appointment;
use appointment_cell::services::store::{AppointmentStore, SupabaseAppointmentStore};
use shared_database::SupabaseClient;
use shared_scheduling::{AppointmentStatus, StoreError, TimeWindow};
use shared_utils::test_utils::{MockSupabaseResponses, TestConfig};

fn store_for(server: &MockServer) -> SupabaseAppointmentStore {
    let config = TestConfig::with_supabase_url(&server.uri()).to_app_config();
    SupabaseAppointmentStore::new(Arc::new(SupabaseClient::new(&config)))
}

fn appointment(doctor_id: Uuid) -> Appointment {
    let now = Utc::now();
    Appointment {
        id: Uuid::new_v4(),
        doctor_id,
        patient_id: Uuid::new_v4(),
        branch_id: Some(Uuid::new_v4()),
        start_time: Utc.with_ymd_and_hms(2026, 3, 2, 10, 0, 0).unwrap(),
        end_time: Utc.with_ymd_and_hms(2026, 3, 2, 10, 30, 0).unwrap(),
        status: AppointmentStatus::Scheduled,
        reason: Some("Consultation".to_string()),
        created_at: now,
        created_by: doctor_id,
        updated_at: now,
    }
}

#[tokio::test]
async fn test_active_for_doctor_filters_by_overlap() {
    let server = MockServer::start().await;
    let doctor_id = Uuid::new_v4();
    let existing = appointment(doctor_id);

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("doctor_id", format!("eq.{}", doctor_id)))
        .and(query_param("status", "neq.cancelled"))
        .and(query_param("start_time", "lt.2026-03-02T10:45:00.000000Z"))
        .and(query_param("end_time", "gt.2026-03-02T10:15:00.000000Z"))
        .and(header("authorization", "Bearer user-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([existing])))
        .expect(1)
        .mount(&server)
        .await;

    let window = TimeWindow::new(
        Utc.with_ymd_and_hms(2026, 3, 2, 10, 15, 0).unwrap(),
        Utc.with_ymd_and_hms(2026, 3, 2, 10, 45, 0).unwrap(),
    )
    .unwrap();

    let rows = store_for(&server)
        .active_for_doctor(doctor_id, &window, "user-token")
        .await
        .unwrap();
    assert_eq!(rows, vec![existing]);
}

#[tokio::test]
async fn test_exclusion_violation_is_contention() {
    let server = MockServer::start().await;
    let doctor_id = Uuid::new_v4();

    Mock::given(method("POST"))
        .and(path("/rest/v1/appointments"))
        .and(header("prefer", "return=representation"))
        .respond_with(ResponseTemplate::new(409).set_body_json(MockSupabaseResponses::exclusion_violation()))
        .mount(&server)
        .await;

    let result = store_for(&server).insert(&appointment(doctor_id), "user-token").await;
    assert_matches!(result, Err(StoreError::Contention(_)));
}

#[tokio::test]
async fn test_insert_returns_stored_row() {
    let server = MockServer::start().await;
    let new = appointment(Uuid::new_v4());

    Mock::given(method("POST"))
        .and(path("/rest/v1/appointments"))
        .and(body_partial_json(json!({"id": new.id, "status": "scheduled"})))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([new])))
        .mount(&server)
        .await;

    let stored = store_for(&server).insert(&new, "user-token").await.unwrap();
    assert_eq!(stored.id, new.id);
}

#[tokio::test]
async fn test_update_status_is_compare_and_set() {
    let server = MockServer::start().await;
    let mut row = appointment(Uuid::new_v4());
    let id = row.id;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("id", format!("eq.{}", id)))
        .and(query_param("status", "eq.scheduled"))
        .and(body_partial_json(json!({"status": "cancelled"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .up_to_n_times(1)
        .mount(&server)
        .await;

    let store = store_for(&server);
    let lost = store
        .update_status(id, AppointmentStatus::Scheduled, AppointmentStatus::Cancelled, Utc::now(), "t")
        .await
        .unwrap();
    assert!(lost.is_none());

    row.status = AppointmentStatus::Cancelled;
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("id", format!("eq.{}", id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([row])))
        .mount(&server)
        .await;

    let won = store
        .update_status(id, AppointmentStatus::Scheduled, AppointmentStatus::Cancelled, Utc::now(), "t")
        .await
        .unwrap();
    assert_eq!(won.map(|a| a.status), Some(AppointmentStatus::Cancelled));
}

#[tokio::test]
async fn test_server_errors_are_backend_failures() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let result = store_for(&server).get(Uuid::new_v4(), "t").await;
    assert_matches!(result, Err(StoreError::Backend(_)));
}
