//! Router configuration for the gateway.

use super::state::AppState;
use crate::api::{fragments, teams};
use axum::{
    Router,
    routing::{get, post},
};
use courier_web::handlers::{health_check, metrics, readiness};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

/// Build the complete Axum router.
///
/// Health routes (`/health`, `/health/ready`, `/metrics`) sit at the root; every
/// API route is nested under `api_prefix`. Any origin may call the API.
pub fn build_router(state: AppState, api_prefix: &str) -> Router {
    let api_routes = Router::new()
        // Request/response bridged over broadcast events
        .route("/team/create", post(teams::create_team))
        .route("/team/created", post(teams::team_created))
        .route("/team/join", post(teams::join_team))
        // Plain upstream calls
        .route("/team/player/create", post(teams::create_player))
        .route("/team/details", post(teams::team_details))
        // Fragment producers
        .route("/player/created", post(fragments::player_created))
        .route("/score/created", post(fragments::score_created));

    let health = Router::new()
        .route("/health", get(health_check))
        .route("/health/ready", get(readiness))
        .route("/metrics", get(metrics));

    let prefix = api_prefix.trim_matches('/');
    let router = if prefix.is_empty() {
        health.merge(api_routes)
    } else {
        health.nest(&format!("/{prefix}"), api_routes)
    };

    router
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
