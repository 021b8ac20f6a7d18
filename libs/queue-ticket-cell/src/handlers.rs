use std::sync::Arc;

use axum::{
    extract::{Extension, Path, State},
    http::StatusCode,
    Json,
};
use axum_extra::TypedHeader;
use headers::{authorization::Bearer, Authorization};
use serde_json::{json, Value};
use uuid::Uuid;

use shared_models::auth::{Role, User};
use shared_models::error::AppError;
use shared_scheduling::{Caller, QueueStatus};

use crate::error::QueueError;
use crate::models::{CheckInRequest, UpdateQueueStatusRequest};
use crate::services::allocator::QueueTicketAllocator;

fn require_staff(caller: &Caller, action: &str) -> Result<(), AppError> {
    if caller.role.is_staff() {
        Ok(())
    } else {
        Err(AppError::Forbidden(format!("Only clinic staff can {}", action)))
    }
}

#[axum::debug_handler]
pub async fn check_in(
    State(allocator): State<Arc<QueueTicketAllocator>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Json(request): Json<CheckInRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let caller = Caller::from_user(&user, auth.token())?;

    // Staff check anyone in; patients only themselves.
    let allowed = match caller.role {
        Role::Patient => caller.is(request.patient_id),
        role => role.is_staff(),
    };
    if !allowed {
        return Err(AppError::Forbidden("Not authorized to check in this patient".to_string()));
    }

    let receipt = allocator.check_in(request, &caller).await?;

    Ok((StatusCode::CREATED, Json(json!(receipt))))
}

#[axum::debug_handler]
pub async fn get_queue_entry(
    State(allocator): State<Arc<QueueTicketAllocator>>,
    Path(entry_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let caller = Caller::from_user(&user, auth.token())?;
    let entry = allocator.get(entry_id, &caller.auth_token).await?;

    if !caller.role.is_staff() && !caller.is(entry.patient_id) {
        return Err(AppError::Forbidden("Not authorized to view this queue entry".to_string()));
    }

    Ok(Json(json!(entry)))
}

#[axum::debug_handler]
pub async fn update_queue_status(
    State(allocator): State<Arc<QueueTicketAllocator>>,
    Path(entry_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Json(request): Json<UpdateQueueStatusRequest>,
) -> Result<Json<Value>, AppError> {
    let caller = Caller::from_user(&user, auth.token())?;
    require_staff(&caller, "update queue status")?;

    let requested = request.status.parse::<QueueStatus>().map_err(QueueError::from)?;
    let change = allocator.change_status(entry_id, requested, &caller).await?;

    Ok(Json(json!({
        "success": true,
        "entry": change.entry,
        "previous_status": change.previous_status,
        "applied": change.applied
    })))
}

#[axum::debug_handler]
pub async fn get_today_queue(
    State(allocator): State<Arc<QueueTicketAllocator>>,
    Path(branch_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let caller = Caller::from_user(&user, auth.token())?;
    require_staff(&caller, "view the branch queue")?;

    let entries = allocator.list_today(branch_id, &caller.auth_token).await?;

    Ok(Json(json!({
        "branch_id": branch_id,
        "total": entries.len(),
        "entries": entries
    })))
}

#[axum::debug_handler]
pub async fn call_next(
    State(allocator): State<Arc<QueueTicketAllocator>>,
    Path(branch_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let caller = Caller::from_user(&user, auth.token())?;
    require_staff(&caller, "call the next patient")?;

    let entry = allocator.call_next(branch_id, &caller).await?;

    Ok(Json(json!({
        "success": true,
        "entry": entry
    })))
}

#[axum::debug_handler]
pub async fn get_queue_stats(
    State(allocator): State<Arc<QueueTicketAllocator>>,
    Path(branch_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let caller = Caller::from_user(&user, auth.token())?;
    require_staff(&caller, "view queue statistics")?;

    let stats = allocator.today_stats(branch_id, &caller.auth_token).await?;
    Ok(Json(json!(stats)))
}
