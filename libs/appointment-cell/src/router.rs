// libs/appointment-cell/src/router.rs
use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, patch, post},
    Router,
};

use shared_config::AppConfig;
use shared_utils::extractor::auth_middleware;

use crate::handlers;
use crate::services::scheduler::AppointmentScheduler;

pub fn appointment_routes(config: Arc<AppConfig>, scheduler: Arc<AppointmentScheduler>) -> Router {
    // All appointment operations require authentication
    Router::new()
        .route("/", post(handlers::book_appointment))
        .route("/conflicts/check", get(handlers::check_appointment_conflicts))
        .route("/doctors/{doctor_id}", get(handlers::get_doctor_appointments))
        .route("/{appointment_id}", get(handlers::get_appointment))
        .route("/{appointment_id}/status", patch(handlers::update_appointment_status))
        .layer(middleware::from_fn_with_state(config, auth_middleware))
        .with_state(scheduler)
}
