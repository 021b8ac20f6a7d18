use std::sync::Arc;

use axum::{routing::get, Router};

use appointment_cell::router::appointment_routes;
use queue_ticket_cell::router::queue_routes;
use shared_config::AppConfig;

use crate::state::SchedulingServices;

pub fn create_router(config: Arc<AppConfig>, services: SchedulingServices) -> Router {
    Router::new()
        .route("/", get(|| async { "Clinic scheduling API is running!" }))
        .nest("/appointments", appointment_routes(config.clone(), services.appointments))
        .nest("/queue", queue_routes(config, services.queue))
}
