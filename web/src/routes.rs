//! Router configuration.

use crate::handlers::health::{health_check, readiness_check};
use crate::handlers::redemptions::{query_redemptions, redeem};
use crate::handlers::tickets::get_ticket_entitlements;
use crate::state::AppState;
use axum::{
    Router,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

/// Build the complete Axum router.
///
/// # Arguments
///
/// - `state`: Application state to share with handlers
pub fn build_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/redemptions", post(redeem))
        .route("/redemptions", get(query_redemptions))
        .route(
            "/tickets/:ticket_code/entitlements",
            get(get_ticket_entitlements),
        );

    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
