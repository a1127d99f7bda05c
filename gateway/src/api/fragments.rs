//! Fragment producer endpoints.
//!
//! - POST /api/player/created - Stage the `identity` fragment of a player
//! - POST /api/score/created - Stage the `score` fragment of a player
//!
//! Both take the same body as the matching bus event's `data`
//! (`{"id": 42, "message": "..."}`) and go through the same route, so a
//! fragment arriving over HTTP and one arriving over the bus are
//! indistinguishable to the consolidator.

use crate::server::state::AppState;
use axum::{Json, extract::State};
use courier_web::WebResult;
use serde::Serialize;
use serde_json::{Map, Value};

/// Event kind whose route stages the identity fragment.
pub const PLAYER_CREATED: &str = "player_created";

/// Event kind whose route stages the score fragment.
pub const SCORE_CREATED: &str = "score_created";

/// Result of staging one fragment.
#[derive(Debug, Serialize)]
pub struct FragmentResponse {
    /// `stored` or `consolidated`
    pub status: &'static str,
    /// The merged entity, when this fragment completed it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity: Option<Value>,
}

/// Stage a player's identity fragment.
///
/// ```bash
/// curl -X POST http://localhost:8000/api/player/created \
///   -H "Content-Type: application/json" \
///   -d '{"id": 42, "message": "{\"player_name\": \"Ann\"}"}'
/// # {"status": "stored"}
/// ```
pub async fn player_created(
    State(state): State<AppState>,
    Json(data): Json<Map<String, Value>>,
) -> WebResult<Json<FragmentResponse>> {
    stage(&state, PLAYER_CREATED, &data).await
}

/// Stage a player's score fragment.
pub async fn score_created(
    State(state): State<AppState>,
    Json(data): Json<Map<String, Value>>,
) -> WebResult<Json<FragmentResponse>> {
    stage(&state, SCORE_CREATED, &data).await
}

async fn stage(
    state: &AppState,
    event_kind: &str,
    data: &Map<String, Value>,
) -> WebResult<Json<FragmentResponse>> {
    let route = state.routes.resolve(event_kind)?;
    let entity = state.consolidator.stage(route, data).await?;

    Ok(Json(match entity {
        Some(entity) => FragmentResponse {
            status: "consolidated",
            entity: Some(entity.to_value()),
        },
        None => FragmentResponse {
            status: "stored",
            entity: None,
        },
    }))
}
