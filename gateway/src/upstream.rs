//! GraphQL clients for the team and rating services.
//!
//! Every request is a constant document plus a `variables` object; user
//! input never ends up inside the query text.
//!
//! ```text
//! POST {TEAM_SERVICE_URL}
//! { "query": "mutation CreateTeam($new_team: TeamInput!) { ... }",
//!   "variables": { "new_team": { "team_name": "...", "team_password": "..." } } }
//! ```

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;

const CREATE_TEAM: &str = r"
mutation CreateTeam($new_team: TeamInput!) {
    create_team(new_team: $new_team) {
        team_id
        team_name
    }
}";

const JOIN_TEAM: &str = r"
mutation JoinTeam($team_data: TeamInput!) {
    join_team(team_data: $team_data) {
        team_id
        team_name
    }
}";

const CREATE_PLAYER: &str = r"
mutation CreatePlayer($new_player: PlayerInput!) {
    create_player(new_player: $new_player) {
        player_id
        player_name
    }
}";

const GET_PLAYERS: &str = r"
query GetPlayers($team_name: String!) {
    get_players(team_name: $team_name) {
        team_id
        team_name
        players_data {
            player_id
            player_name
        }
    }
}";

const GET_PLAYERS_RATING: &str = r"
query GetPlayersRating($team_id: Int!) {
    get_players_rating(team_id: $team_id) {
        team_id
        players_data {
            player_id
            player_average_rating
        }
    }
}";

/// Upstream result type
pub type UpstreamResult<T> = Result<T, UpstreamError>;

/// Boxed future returned by [`Upstream`] methods.
pub type UpstreamFuture<'a, T> = Pin<Box<dyn Future<Output = UpstreamResult<T>> + Send + 'a>>;

/// Failures talking to an upstream service.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UpstreamError {
    /// Request could not be sent or timed out
    #[error("{service} unreachable: {reason}")]
    Transport {
        /// Service name
        service: &'static str,
        /// Underlying failure
        reason: String,
    },

    /// Non-success HTTP status
    #[error("{service} answered {status}: {body}")]
    Status {
        /// Service name
        service: &'static str,
        /// HTTP status code
        status: u16,
        /// Response body
        body: String,
    },

    /// GraphQL `errors[0].message`
    #[error("{service}: {message}")]
    GraphQl {
        /// Service name
        service: &'static str,
        /// First GraphQL error message
        message: String,
    },

    /// Neither data nor errors in the response
    #[error("No response received from the {service}")]
    Empty {
        /// Service name
        service: &'static str,
    },

    /// Response data did not have the expected shape
    #[error("{service} returned unexpected data: {reason}")]
    Decode {
        /// Service name
        service: &'static str,
        /// Deserialization failure
        reason: String,
    },
}

impl UpstreamError {
    /// Name of the service that failed.
    #[must_use]
    pub const fn service(&self) -> &'static str {
        match self {
            Self::Transport { service, .. }
            | Self::Status { service, .. }
            | Self::GraphQl { service, .. }
            | Self::Empty { service }
            | Self::Decode { service, .. } => *service,
        }
    }
}

/// Team name and password, used to create or join a team.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamCredentials {
    /// Team name
    pub team_name: String,
    /// Team password
    pub team_password: String,
}

/// A team as returned by the team service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Team {
    /// Team id
    pub team_id: i64,
    /// Team name
    pub team_name: String,
}

/// Request to add a player to a team.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPlayer {
    /// Player name
    pub player_name: String,
    /// Name of the team to join
    pub team_name: String,
}

/// A player as returned by the team service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    /// Player id
    pub player_id: i64,
    /// Player name
    pub player_name: String,
}

/// A team's players, from the team service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamRoster {
    /// Team id
    pub team_id: i64,
    /// Team name
    pub team_name: String,
    /// Players of the team
    pub players_data: Vec<Player>,
}

/// One player's rating, from the rating service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerRating {
    /// Player id
    pub player_id: i64,
    /// Average rating, if the player has been rated
    pub player_average_rating: Option<f64>,
}

/// A team's ratings, from the rating service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamRatings {
    /// Team id
    pub team_id: i64,
    /// Ratings per player
    pub players_data: Vec<PlayerRating>,
}

/// Player entry of [`TeamDetails`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerDetails {
    /// Player name
    pub player_name: String,
    /// Average rating, `None` for unrated players
    pub player_average_rating: Option<f64>,
}

/// Roster joined with ratings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamDetails {
    /// Team id
    pub team_id: i64,
    /// Team name
    pub team_name: String,
    /// Players with their rating
    pub players_data: Vec<PlayerDetails>,
}

impl TeamDetails {
    /// Join a roster with its ratings by `player_id`, keeping roster order.
    #[must_use]
    pub fn merge(roster: TeamRoster, ratings: &TeamRatings) -> Self {
        let by_player: HashMap<i64, Option<f64>> = ratings
            .players_data
            .iter()
            .map(|rating| (rating.player_id, rating.player_average_rating))
            .collect();

        Self {
            team_id: roster.team_id,
            team_name: roster.team_name,
            players_data: roster
                .players_data
                .into_iter()
                .map(|player| PlayerDetails {
                    player_average_rating: by_player.get(&player.player_id).copied().flatten(),
                    player_name: player.player_name,
                })
                .collect(),
        }
    }
}

/// The upstream services the gateway calls.
pub trait Upstream: Send + Sync {
    /// `create_team` mutation on the team service.
    fn create_team<'a>(&'a self, team: &'a TeamCredentials) -> UpstreamFuture<'a, Team>;

    /// `join_team` mutation on the team service.
    fn join_team<'a>(&'a self, team: &'a TeamCredentials) -> UpstreamFuture<'a, Team>;

    /// `create_player` mutation on the team service.
    fn create_player<'a>(&'a self, player: &'a NewPlayer) -> UpstreamFuture<'a, Player>;

    /// `get_players` query on the team service.
    fn get_players<'a>(&'a self, team_name: &'a str) -> UpstreamFuture<'a, TeamRoster>;

    /// `get_players_rating` query on the rating service.
    fn get_players_rating(&self, team_id: i64) -> UpstreamFuture<'_, TeamRatings>;
}

/// Fetch a team's roster and ratings and join them.
///
/// # Errors
///
/// Returns the first [`UpstreamError`] from either service.
pub async fn team_details(upstream: &dyn Upstream, team_name: &str) -> UpstreamResult<TeamDetails> {
    let roster = upstream.get_players(team_name).await?;
    let ratings = upstream.get_players_rating(roster.team_id).await?;
    Ok(TeamDetails::merge(roster, &ratings))
}

#[derive(Debug, Deserialize)]
struct GraphQlResponse {
    #[serde(default)]
    data: Option<Map<String, Value>>,
    #[serde(default)]
    errors: Vec<GraphQlErrorBody>,
}

#[derive(Debug, Deserialize)]
struct GraphQlErrorBody {
    message: String,
}

/// Pull `data[operation]` out of a GraphQL response.
///
/// A null or missing field falls back to the first GraphQL error.
fn extract<T: DeserializeOwned>(
    service: &'static str,
    operation: &str,
    response: GraphQlResponse,
) -> UpstreamResult<T> {
    let field = response
        .data
        .and_then(|mut data| data.remove(operation))
        .filter(|value| !value.is_null());

    match (field, response.errors.into_iter().next()) {
        (Some(value), _) => serde_json::from_value(value).map_err(|e| UpstreamError::Decode {
            service,
            reason: e.to_string(),
        }),
        (None, Some(error)) => Err(UpstreamError::GraphQl {
            service,
            message: error.message,
        }),
        (None, None) => Err(UpstreamError::Empty { service }),
    }
}

/// One GraphQL endpoint.
#[derive(Clone, Debug)]
pub struct GraphQlClient {
    http: reqwest::Client,
    url: String,
    service: &'static str,
}

impl GraphQlClient {
    /// Client for the endpoint at `url`, named `service` in errors and logs.
    #[must_use]
    pub fn new(http: reqwest::Client, url: impl Into<String>, service: &'static str) -> Self {
        Self {
            http,
            url: url.into(),
            service,
        }
    }

    /// Run `document` with `variables` and decode `data[operation]`.
    ///
    /// # Errors
    ///
    /// Returns [`UpstreamError`] on transport failure, non-2xx status,
    /// GraphQL errors or unexpected data.
    pub async fn execute<T: DeserializeOwned>(
        &self,
        operation: &str,
        document: &str,
        variables: Value,
    ) -> UpstreamResult<T> {
        let service = self.service;
        tracing::debug!(service, operation, url = %self.url, "Sending GraphQL request");

        let response = self
            .http
            .post(&self.url)
            .json(&json!({ "query": document, "variables": variables }))
            .send()
            .await
            .map_err(|e| UpstreamError::Transport {
                service,
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(
                service,
                operation,
                status = status.as_u16(),
                body = %body,
                "Upstream request failed"
            );
            return Err(UpstreamError::Status {
                service,
                status: status.as_u16(),
                body,
            });
        }

        let body: GraphQlResponse = response.json().await.map_err(|e| UpstreamError::Decode {
            service,
            reason: e.to_string(),
        })?;

        extract(service, operation, body).inspect_err(|e| {
            tracing::error!(service, operation, error = %e, "GraphQL operation failed");
        })
    }
}

/// [`Upstream`] over the team and rating GraphQL endpoints.
#[derive(Clone, Debug)]
pub struct GraphQlUpstream {
    team: GraphQlClient,
    rating: GraphQlClient,
}

impl GraphQlUpstream {
    /// Build clients for both services with a shared per-request `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`UpstreamError::Transport`] if the HTTP client cannot be built.
    pub fn new(
        team_service_url: impl Into<String>,
        rating_service_url: impl Into<String>,
        timeout: Duration,
    ) -> UpstreamResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| UpstreamError::Transport {
                service: "http client",
                reason: e.to_string(),
            })?;

        Ok(Self {
            team: GraphQlClient::new(http.clone(), team_service_url, "team service"),
            rating: GraphQlClient::new(http, rating_service_url, "rating service"),
        })
    }
}

impl Upstream for GraphQlUpstream {
    fn create_team<'a>(&'a self, team: &'a TeamCredentials) -> UpstreamFuture<'a, Team> {
        Box::pin(
            self.team
                .execute("create_team", CREATE_TEAM, json!({ "new_team": team })),
        )
    }

    fn join_team<'a>(&'a self, team: &'a TeamCredentials) -> UpstreamFuture<'a, Team> {
        Box::pin(
            self.team
                .execute("join_team", JOIN_TEAM, json!({ "team_data": team })),
        )
    }

    fn create_player<'a>(&'a self, player: &'a NewPlayer) -> UpstreamFuture<'a, Player> {
        Box::pin(
            self.team
                .execute("create_player", CREATE_PLAYER, json!({ "new_player": player })),
        )
    }

    fn get_players<'a>(&'a self, team_name: &'a str) -> UpstreamFuture<'a, TeamRoster> {
        Box::pin(
            self.team
                .execute("get_players", GET_PLAYERS, json!({ "team_name": team_name })),
        )
    }

    fn get_players_rating(&self, team_id: i64) -> UpstreamFuture<'_, TeamRatings> {
        Box::pin(self.rating.execute(
            "get_players_rating",
            GET_PLAYERS_RATING,
            json!({ "team_id": team_id }),
        ))
    }
}
