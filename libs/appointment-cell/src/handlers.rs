// libs/appointment-cell/src/handlers.rs
use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    Json,
};
use axum_extra::TypedHeader;
use headers::{authorization::Bearer, Authorization};
use serde_json::{json, Value};
use uuid::Uuid;

use shared_models::auth::{Role, User};
use shared_models::error::AppError;
use shared_scheduling::{AppointmentStatus, Caller};

use crate::models::{
    Appointment, AppointmentError, BookAppointmentRequest, ConflictCheckQuery, DoctorScheduleQuery,
    UpdateStatusRequest,
};
use crate::services::scheduler::AppointmentScheduler;

// ==============================================================================
// AUTHORIZATION RULES
// ==============================================================================

fn authorize_booking(caller: &Caller, request: &BookAppointmentRequest) -> Result<(), AppError> {
    match caller.role {
        Role::Admin | Role::Doctor | Role::Receptionist => Ok(()),
        Role::Patient if caller.is(request.patient_id) => Ok(()),
        _ => Err(AppError::Forbidden(
            "Not authorized to book appointment for this patient".to_string(),
        )),
    }
}

fn authorize_view(caller: &Caller, appointment: &Appointment) -> Result<(), AppError> {
    if caller.role.is_staff() || caller.is(appointment.patient_id) {
        Ok(())
    } else {
        Err(AppError::Forbidden("Not authorized to view this appointment".to_string()))
    }
}

fn authorize_status_change(
    caller: &Caller,
    appointment: &Appointment,
    requested: AppointmentStatus,
) -> Result<(), AppError> {
    let allowed = match caller.role {
        Role::Admin | Role::Receptionist => true,
        Role::Doctor => caller.is(appointment.doctor_id),
        Role::Patient => caller.is(appointment.patient_id) && requested == AppointmentStatus::Cancelled,
        _ => false,
    };

    if allowed {
        Ok(())
    } else {
        Err(AppError::Forbidden(format!(
            "Role {} may not set this appointment to {}",
            caller.role, requested
        )))
    }
}

// ==============================================================================
// APPOINTMENT HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn book_appointment(
    State(scheduler): State<Arc<AppointmentScheduler>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Json(request): Json<BookAppointmentRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let caller = Caller::from_user(&user, auth.token())?;
    authorize_booking(&caller, &request)?;

    let appointment = scheduler.book(request, &caller).await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "appointment": appointment,
            "message": "Appointment booked successfully"
        })),
    ))
}

#[axum::debug_handler]
pub async fn get_appointment(
    State(scheduler): State<Arc<AppointmentScheduler>>,
    Path(appointment_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let caller = Caller::from_user(&user, auth.token())?;
    let appointment = scheduler.get(appointment_id, &caller.auth_token).await?;
    authorize_view(&caller, &appointment)?;

    Ok(Json(json!(appointment)))
}

#[axum::debug_handler]
pub async fn update_appointment_status(
    State(scheduler): State<Arc<AppointmentScheduler>>,
    Path(appointment_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Json(request): Json<UpdateStatusRequest>,
) -> Result<Json<Value>, AppError> {
    let caller = Caller::from_user(&user, auth.token())?;
    let requested = request.status.parse::<AppointmentStatus>().map_err(AppointmentError::from)?;

    // Participants never change, so this read needs no lock.
    let appointment = scheduler.get(appointment_id, &caller.auth_token).await?;
    authorize_status_change(&caller, &appointment, requested)?;

    let change = scheduler.change_status(appointment_id, requested, &caller).await?;
    let message = if change.applied {
        format!("Appointment status updated to {}", requested)
    } else {
        format!("Appointment already {}", requested)
    };

    Ok(Json(json!({
        "success": true,
        "appointment": change.appointment,
        "previous_status": change.previous_status,
        "applied": change.applied,
        "message": message
    })))
}

#[axum::debug_handler]
pub async fn check_appointment_conflicts(
    State(scheduler): State<Arc<AppointmentScheduler>>,
    Query(query): Query<ConflictCheckQuery>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let caller = Caller::from_user(&user, auth.token())?;
    let mut report = scheduler
        .check_conflicts(query.doctor_id, query.start_time, query.end_time, &caller.auth_token)
        .await?;

    if !caller.role.is_staff() {
        report.conflicting_appointments.clear();
    }

    Ok(Json(json!(report)))
}

#[axum::debug_handler]
pub async fn get_doctor_appointments(
    State(scheduler): State<Arc<AppointmentScheduler>>,
    Path(doctor_id): Path<Uuid>,
    Query(query): Query<DoctorScheduleQuery>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let caller = Caller::from_user(&user, auth.token())?;
    if !caller.role.is_staff() {
        return Err(AppError::Forbidden("Only clinic staff can list a doctor's schedule".to_string()));
    }

    let appointments = scheduler
        .list_for_doctor(doctor_id, query.from, query.to, &caller.auth_token)
        .await?;

    Ok(Json(json!({
        "doctor_id": doctor_id,
        "total": appointments.len(),
        "appointments": appointments
    })))
}
