//! Team API endpoints.
//!
//! - POST /api/team/create - Create a team, answer with the `team_created` event
//! - POST /api/team/created - Forward a created team to the frontend
//! - POST /api/team/join - Join a team, answer with the `team_joined` event
//! - POST /api/team/player/create - Add a player to a team
//! - POST /api/team/details - Roster joined with player ratings

use crate::server::state::AppState;
use crate::upstream::{
    self, NewPlayer, Player, Team, TeamCredentials, TeamDetails, UpstreamError, UpstreamResult,
};
use axum::{Json, extract::State};
use courier_runtime::CorrelationMetrics;
use courier_web::{AppError, WebResult};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::fmt::Debug;
use std::future::Future;

/// Event the team service broadcasts after `create_team`.
pub const TEAM_CREATED: &str = "team_created";

/// Event the team service broadcasts after `join_team`.
pub const TEAM_JOINED: &str = "team_joined";

// ============================================================================
// Request Types
// ============================================================================

/// Request for team details.
#[derive(Debug, Deserialize)]
pub struct TeamDetailsRequest {
    /// Team name
    pub team_name: String,
}

// ============================================================================
// Handlers
// ============================================================================

/// Create a team.
///
/// Registers a waiter for `team_created` before calling the team service, so
/// the event cannot slip past. Answers with the event data, which is also
/// forwarded to the frontend; a failed forward is logged only.
///
/// # Example
///
/// ```bash
/// curl -X POST http://localhost:8000/api/team/create \
///   -H "Content-Type: application/json" \
///   -d '{"team_name": "Owls", "team_password": "hoot"}'
/// # {"team_id": 1, "team_name": "Owls"}
/// ```
pub async fn create_team(
    State(state): State<AppState>,
    Json(request): Json<TeamCredentials>,
) -> WebResult<Json<Value>> {
    tracing::info!(team_name = %request.team_name, "Creating team");
    let created = state.upstream.create_team(&request);
    let Json(team) = await_event(&state, TEAM_CREATED, created).await?;

    if let Value::Object(payload) = &team {
        if let Err(e) = state.notifier.forward(TEAM_CREATED, payload).await {
            CorrelationMetrics::record_notify_failure();
            tracing::error!(error = %e, "Forwarding created team to the frontend failed");
        }
    }
    Ok(Json(team))
}

/// Forward a team created elsewhere to the frontend.
///
/// ```bash
/// curl -X POST http://localhost:8000/api/team/created \
///   -H "Content-Type: application/json" \
///   -d '{"team_id": 1, "team_name": "Owls"}'
/// ```
///
/// # Errors
///
/// 502 when the frontend rejects the update or cannot be reached.
pub async fn team_created(
    State(state): State<AppState>,
    Json(team): Json<Team>,
) -> WebResult<Json<Team>> {
    let mut payload = Map::new();
    payload.insert("team_id".to_string(), team.team_id.into());
    payload.insert("team_name".to_string(), team.team_name.clone().into());

    state
        .notifier
        .forward(TEAM_CREATED, &payload)
        .await
        .map_err(|e| AppError::bad_gateway("frontend", &e).with_source(e))?;
    Ok(Json(team))
}

/// Join a team.
///
/// Same flow as [`create_team`] with `join_team` / `team_joined`.
pub async fn join_team(
    State(state): State<AppState>,
    Json(request): Json<TeamCredentials>,
) -> WebResult<Json<Value>> {
    tracing::info!(team_name = %request.team_name, "Joining team");
    await_event(&state, TEAM_JOINED, state.upstream.join_team(&request)).await
}

/// Add a player to a team.
///
/// ```bash
/// curl -X POST http://localhost:8000/api/team/player/create \
///   -H "Content-Type: application/json" \
///   -d '{"player_name": "Ann", "team_name": "Owls"}'
/// ```
pub async fn create_player(
    State(state): State<AppState>,
    Json(request): Json<NewPlayer>,
) -> WebResult<Json<Player>> {
    tracing::info!(
        player_name = %request.player_name,
        team_name = %request.team_name,
        "Creating player"
    );
    let player = state.upstream.create_player(&request).await?;
    Ok(Json(player))
}

/// Team roster from the team service joined with ratings from the rating
/// service.
pub async fn team_details(
    State(state): State<AppState>,
    Json(request): Json<TeamDetailsRequest>,
) -> WebResult<Json<TeamDetails>> {
    let details = upstream::team_details(state.upstream.as_ref(), &request.team_name).await?;
    Ok(Json(details))
}

/// Register for `event_kind`, run the upstream `call`, then block on the event.
async fn await_event<T, F>(state: &AppState, event_kind: &str, call: F) -> WebResult<Json<Value>>
where
    T: Debug,
    F: Future<Output = UpstreamResult<T>>,
{
    let waiter = state.registry.register(event_kind)?;

    let accepted = call.await?;
    tracing::debug!(event_kind, response = ?accepted, "Upstream accepted, awaiting event");

    let data = waiter.wait(state.await_timeout).await?;
    Ok(Json(data))
}

impl From<UpstreamError> for AppError {
    fn from(err: UpstreamError) -> Self {
        let service = err.service();
        if let UpstreamError::GraphQl { message, .. } = &err {
            return Self::bad_gateway(service, message);
        }
        Self::bad_gateway(service, "request failed").with_source(err)
    }
}
