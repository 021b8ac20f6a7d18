use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

use queue_ticket_cell::router::queue_routes;
use queue_ticket_cell::services::allocator::QueueTicketAllocator;
use queue_ticket_cell::services::store::InMemoryQueueStore;
use shared_scheduling::StaticDirectory;
use shared_utils::test_utils::{JwtTestUtils, TestConfig, TestUser};

struct TestApp {
    router: Router,
    config: TestConfig,
    branch_id: Uuid,
    patient: TestUser,
    nurse: TestUser,
}

fn app() -> TestApp {
    let config = TestConfig::default();
    let branch_id = Uuid::new_v4();
    let patient = TestUser::with_id(Uuid::new_v4(), "patient");
    let nurse = TestUser::new("nurse@example.com", "nurse");

    let directory = StaticDirectory::new()
        .with_branch(branch_id, true)
        .with_patient(patient.uuid(), true);
    let allocator = Arc::new(QueueTicketAllocator::new(
        Arc::new(InMemoryQueueStore::new()),
        Arc::new(directory),
    ));

    let router = Router::new().nest("/queue", queue_routes(config.to_arc(), allocator));
    TestApp { router, config, branch_id, patient, nurse }
}

async fn send(app: &TestApp, method: &str, uri: &str, user: &TestUser, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("authorization", JwtTestUtils::bearer(user, &app.config));
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

#[tokio::test]
async fn test_patient_checks_in_self() {
    let app = app();
    let (status, body) = send(
        &app,
        "POST",
        "/queue/check-in",
        &app.patient,
        Some(json!({"branch_id": app.branch_id, "patient_id": app.patient.id, "priority": "urgent"})),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["queue_number"], 1);
    assert_eq!(body["entry"]["status"], "waiting");
    assert_eq!(body["entry"]["priority"], "urgent");
    assert_eq!(body["queue_entry_id"], body["entry"]["id"]);
}

#[tokio::test]
async fn test_patient_cannot_check_in_others() {
    let app = app();
    let (status, body) = send(
        &app,
        "POST",
        "/queue/check-in",
        &app.patient,
        Some(json!({"branch_id": app.branch_id, "patient_id": Uuid::new_v4()})),
    )
    .await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["kind"], "forbidden");
}

#[tokio::test]
async fn test_status_flow_over_http() {
    let app = app();
    let (_, receipt) = send(
        &app,
        "POST",
        "/queue/check-in",
        &app.nurse,
        Some(json!({"branch_id": app.branch_id, "patient_id": app.patient.id})),
    )
    .await;
    let id = receipt["queue_entry_id"].as_str().unwrap().to_string();
    let uri = format!("/queue/entries/{}/status", id);

    let (status, _) = send(&app, "PATCH", &uri, &app.patient, Some(json!({"status": "called"}))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = send(&app, "PATCH", &uri, &app.nurse, Some(json!({"status": "done"}))).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["kind"], "invalid_transition");

    let (status, body) = send(&app, "PATCH", &uri, &app.nurse, Some(json!({"status": "teleported"}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "validation_error");

    let (status, body) = send(&app, "PATCH", &uri, &app.nurse, Some(json!({"status": "called"}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["entry"]["status"], "called");
    assert_eq!(body["entry"]["queue_number"], 1);

    let (status, body) = send(&app, "GET", &format!("/queue/entries/{}", id), &app.patient, None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["called_at"].is_string());
}

#[tokio::test]
async fn test_branch_views_and_call_next() {
    let app = app();
    let (status, body) = send(&app, "POST", &format!("/queue/branches/{}/call-next", app.branch_id), &app.nurse, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["kind"], "not_found");

    for _ in 0..2 {
        send(
            &app,
            "POST",
            "/queue/check-in",
            &app.nurse,
            Some(json!({"branch_id": app.branch_id, "patient_id": app.patient.id})),
        )
        .await;
    }

    let (status, body) = send(&app, "POST", &format!("/queue/branches/{}/call-next", app.branch_id), &app.nurse, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["entry"]["queue_number"], 1);

    let (status, body) = send(&app, "GET", &format!("/queue/branches/{}/today", app.branch_id), &app.nurse, None).await;
    assert_eq!(status, StatusCode::OK);
    let numbers: Vec<i64> = body["entries"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["queue_number"].as_i64().unwrap())
        .collect();
    assert_eq!(numbers, vec![1, 2]);

    let (status, body) = send(&app, "GET", &format!("/queue/branches/{}/stats", app.branch_id), &app.nurse, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["called"], 1);
    assert_eq!(body["waiting"], 1);
    assert_eq!(body["last_number"], 2);

    let (status, _) = send(&app, "GET", &format!("/queue/branches/{}/today", app.branch_id), &app.patient, None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}
