use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, patch, post},
    Router,
};

use shared_config::AppConfig;
use shared_utils::extractor::auth_middleware;

use crate::handlers;
use crate::services::allocator::QueueTicketAllocator;

pub fn queue_routes(config: Arc<AppConfig>, allocator: Arc<QueueTicketAllocator>) -> Router {
    Router::new()
        .route("/check-in", post(handlers::check_in))
        .route("/entries/{entry_id}", get(handlers::get_queue_entry))
        .route("/entries/{entry_id}/status", patch(handlers::update_queue_status))
        .route("/branches/{branch_id}/today", get(handlers::get_today_queue))
        .route("/branches/{branch_id}/call-next", post(handlers::call_next))
        .route("/branches/{branch_id}/stats", get(handlers::get_queue_stats))
        .layer(middleware::from_fn_with_state(config, auth_middleware))
        .with_state(allocator)
}
