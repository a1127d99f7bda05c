//! HTTP API tests over in-memory collaborators.
//!
//! The dispatch loop runs for real on an `InMemoryEventBus`; the upstream
//! team service is a stub that broadcasts the event a real service would
//! publish after a successful mutation.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum_test::TestServer;
use courier_core::event::EventEnvelope;
use courier_core::event_bus::EventBus;
use courier_runtime::{Consolidator, DispatchLoop, DispatchState, MetricsExporter, WaiterRegistry};
use courier_testing::{InMemoryEventBus, InMemoryStagingStore, RecordingNotifier};
use courier_web::ReadinessWatch;
use gateway::config::Config;
use gateway::server::{AppState, build_router};
use gateway::upstream::{
    NewPlayer, Player, PlayerRating, Team, TeamCredentials, TeamRatings, TeamRoster, Upstream,
    UpstreamError, UpstreamFuture, UpstreamResult,
};
use serde_json::{Value, json};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;

const TOPIC: &str = "gateway-events";

/// Team service stand-in.
#[derive(Clone, Default)]
struct StubUpstream {
    bus: InMemoryEventBus,
    /// Broadcast the matching event after a successful team mutation
    publish: bool,
    /// GraphQL error returned by the next team mutation
    reject_next: Arc<Mutex<Option<String>>>,
}

impl StubUpstream {
    async fn team_mutation(
        &self,
        event_kind: &str,
        team: &TeamCredentials,
    ) -> UpstreamResult<Team> {
        let rejection = self.reject_next.lock().unwrap().take();
        if let Some(message) = rejection {
            return Err(UpstreamError::GraphQl {
                service: "team service",
                message,
            });
        }

        let accepted = Team {
            team_id: 1,
            team_name: team.team_name.clone(),
        };
        if self.publish {
            let data = serde_json::to_value(&accepted).unwrap();
            self.bus
                .publish(TOPIC, &EventEnvelope::new(event_kind, data.as_object().cloned().unwrap()))
                .await
                .unwrap();
        }
        Ok(accepted)
    }
}

impl Upstream for StubUpstream {
    fn create_team<'a>(&'a self, team: &'a TeamCredentials) -> UpstreamFuture<'a, Team> {
        Box::pin(self.team_mutation("team_created", team))
    }

    fn join_team<'a>(&'a self, team: &'a TeamCredentials) -> UpstreamFuture<'a, Team> {
        Box::pin(self.team_mutation("team_joined", team))
    }

    fn create_player<'a>(&'a self, player: &'a NewPlayer) -> UpstreamFuture<'a, Player> {
        Box::pin(async move {
            Ok(Player {
                player_id: 10,
                player_name: player.player_name.clone(),
            })
        })
    }

    fn get_players<'a>(&'a self, team_name: &'a str) -> UpstreamFuture<'a, TeamRoster> {
        Box::pin(async move {
            if team_name != "Owls" {
                return Err(UpstreamError::GraphQl {
                    service: "team service",
                    message: format!("Team {team_name} not found"),
                });
            }
            Ok(TeamRoster {
                team_id: 1,
                team_name: team_name.to_string(),
                players_data: vec![
                    Player { player_id: 10, player_name: "Ann".to_string() },
                    Player { player_id: 11, player_name: "Ben".to_string() },
                ],
            })
        })
    }

    fn get_players_rating(&self, team_id: i64) -> UpstreamFuture<'_, TeamRatings> {
        Box::pin(async move {
            Ok(TeamRatings {
                team_id,
                players_data: vec![PlayerRating {
                    player_id: 10,
                    player_average_rating: Some(3.5),
                }],
            })
        })
    }
}

struct Harness {
    server: TestServer,
    registry: WaiterRegistry,
    bus: InMemoryEventBus,
    store: InMemoryStagingStore,
    notifier: RecordingNotifier,
    upstream: StubUpstream,
    _shutdown: broadcast::Sender<()>,
}

async fn harness(await_timeout: Duration, publish: bool) -> Harness {
    let bus = InMemoryEventBus::new();
    let store = InMemoryStagingStore::new();
    let notifier = RecordingNotifier::new();
    let registry = WaiterRegistry::new();
    let consolidator =
        Consolidator::new("player", Arc::new(store.clone()), Arc::new(notifier.clone()));
    let routes = Arc::new(Config::from_lookup(|_| None).unwrap().routing_table());

    let dispatch = DispatchLoop::new(
        vec![TOPIC.to_string()],
        Arc::new(bus.clone()),
        registry.clone(),
        consolidator.clone(),
        Arc::clone(&routes),
    );
    let mut state = dispatch.state();
    let readiness = ReadinessWatch::new(dispatch.state());
    let (shutdown, _) = broadcast::channel(1);
    let _handle = dispatch.spawn(shutdown.subscribe());
    state
        .wait_for(|s| *s == DispatchState::Dispatching)
        .await
        .unwrap();

    let upstream = StubUpstream {
        bus: bus.clone(),
        publish,
        reject_next: Arc::default(),
    };
    let app_state = AppState {
        registry: registry.clone(),
        consolidator,
        routes,
        upstream: Arc::new(upstream.clone()),
        notifier: Arc::new(notifier.clone()),
        readiness,
        metrics: Arc::new(MetricsExporter::new()),
        await_timeout,
    };

    Harness {
        server: TestServer::new(build_router(app_state, "/api")).unwrap(),
        registry,
        bus,
        store,
        notifier,
        upstream,
        _shutdown: shutdown,
    }
}

fn owls() -> Value {
    json!({"team_name": "Owls", "team_password": "hoot"})
}

#[tokio::test]
async fn create_team_answers_with_broadcast_event() {
    let h = harness(Duration::from_secs(2), true).await;

    let response = h.server.post("/api/team/create").json(&owls()).await;

    response.assert_status_ok();
    assert_eq!(response.json::<Value>(), json!({"team_id": 1, "team_name": "Owls"}));
    assert!(!h.registry.is_waiting("team_created"));
}

#[tokio::test]
async fn created_team_is_forwarded_to_frontend() {
    let h = harness(Duration::from_secs(2), true).await;

    h.server
        .post("/api/team/create")
        .json(&owls())
        .await
        .assert_status_ok();

    let forwarded = h.notifier.forwarded();
    assert_eq!(forwarded.len(), 1);
    assert_eq!(forwarded[0].0, "team_created");
    assert_eq!(
        Value::Object(forwarded[0].1.clone()),
        json!({"team_id": 1, "team_name": "Owls"})
    );
}

#[tokio::test]
async fn frontend_outage_does_not_fail_team_creation() {
    let h = harness(Duration::from_secs(2), true).await;
    h.notifier.set_failing(true);

    let response = h.server.post("/api/team/create").json(&owls()).await;

    response.assert_status_ok();
    assert_eq!(h.notifier.attempts(), 1);
    assert!(h.notifier.forwarded().is_empty());
}

#[tokio::test]
async fn join_team_waits_for_team_joined() {
    let h = harness(Duration::from_secs(2), true).await;

    let response = h.server.post("/api/team/join").json(&owls()).await;

    response.assert_status_ok();
    assert_eq!(response.json::<Value>()["team_name"], "Owls");
    assert_eq!(h.bus.published()[0].1.event_kind, "team_joined");
    assert!(h.notifier.forwarded().is_empty());
}

#[tokio::test]
async fn team_created_endpoint_forwards_to_frontend() {
    let h = harness(Duration::from_secs(2), true).await;
    let team = json!({"team_id": 4, "team_name": "Larks"});

    let response = h.server.post("/api/team/created").json(&team).await;

    response.assert_status_ok();
    assert_eq!(response.json::<Value>(), team);
    assert_eq!(Value::Object(h.notifier.forwarded()[0].1.clone()), team);
}

#[tokio::test]
async fn team_created_endpoint_reports_frontend_failure() {
    let h = harness(Duration::from_secs(2), true).await;
    h.notifier.set_failing(true);

    let response = h
        .server
        .post("/api/team/created")
        .json(&json!({"team_id": 4, "team_name": "Larks"}))
        .await;

    response.assert_status(StatusCode::BAD_GATEWAY);
    assert_eq!(response.json::<Value>()["code"], "UPSTREAM_ERROR");
}

#[tokio::test]
async fn missing_event_times_out_with_408() {
    let h = harness(Duration::from_millis(100), false).await;

    let response = h.server.post("/api/team/create").json(&owls()).await;

    response.assert_status(StatusCode::REQUEST_TIMEOUT);
    assert_eq!(response.json::<Value>()["code"], "TIMEOUT");
    assert_eq!(h.registry.pending_count(), 0);
}

#[tokio::test]
async fn second_waiter_for_same_kind_is_409() {
    let h = harness(Duration::from_secs(2), true).await;
    let _held = h.registry.register("team_created").unwrap();

    let response = h.server.post("/api/team/create").json(&owls()).await;

    response.assert_status(StatusCode::CONFLICT);
    assert!(h.bus.published().is_empty(), "upstream must not be called");
}

#[tokio::test]
async fn graphql_error_is_502_and_releases_waiter() {
    let h = harness(Duration::from_secs(2), true).await;
    *h.upstream.reject_next.lock().unwrap() = Some("Team already exists".to_string());

    let response = h.server.post("/api/team/create").json(&owls()).await;
    response.assert_status(StatusCode::BAD_GATEWAY);
    let body: Value = response.json();
    assert_eq!(body["code"], "UPSTREAM_ERROR");
    assert_eq!(body["message"], "team service: Team already exists");

    // The slot was released, so the next attempt goes through.
    h.server
        .post("/api/team/create")
        .json(&owls())
        .await
        .assert_status_ok();
}

#[tokio::test]
async fn create_player_returns_upstream_record() {
    let h = harness(Duration::from_secs(2), true).await;

    let response = h
        .server
        .post("/api/team/player/create")
        .json(&json!({"player_name": "Cid", "team_name": "Owls"}))
        .await;

    response.assert_status_ok();
    assert_eq!(response.json::<Value>(), json!({"player_id": 10, "player_name": "Cid"}));
}

#[tokio::test]
async fn team_details_joins_ratings() {
    let h = harness(Duration::from_secs(2), true).await;

    let response = h
        .server
        .post("/api/team/details")
        .json(&json!({"team_name": "Owls"}))
        .await;

    response.assert_status_ok();
    assert_eq!(
        response.json::<Value>(),
        json!({
            "team_id": 1,
            "team_name": "Owls",
            "players_data": [
                {"player_name": "Ann", "player_average_rating": 3.5},
                {"player_name": "Ben", "player_average_rating": null}
            ]
        })
    );
}

#[tokio::test]
async fn unknown_team_details_is_502() {
    let h = harness(Duration::from_secs(2), true).await;

    h.server
        .post("/api/team/details")
        .json(&json!({"team_name": "Larks"}))
        .await
        .assert_status(StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn fragments_consolidate_on_second_post() {
    let h = harness(Duration::from_secs(2), true).await;

    let first = h
        .server
        .post("/api/player/created")
        .json(&json!({"id": 42, "message": r#"{"player_name":"Ann"}"#}))
        .await;
    first.assert_status_ok();
    assert_eq!(first.json::<Value>(), json!({"status": "stored"}));
    assert!(h.store.contains_key("player_identity_42"));

    let second = h
        .server
        .post("/api/score/created")
        .json(&json!({"id": "42", "message": r#"{"player_score":10}"#}))
        .await;
    second.assert_status_ok();
    assert_eq!(
        second.json::<Value>(),
        json!({
            "status": "consolidated",
            "entity": {"player_name": "Ann", "player_score": 10}
        })
    );

    assert!(h.store.is_empty());
    assert_eq!(h.notifier.entities().len(), 1);
}

#[tokio::test]
async fn bus_and_http_fragments_consolidate_together() {
    let h = harness(Duration::from_secs(2), true).await;
    let mut data = serde_json::Map::new();
    data.insert("id".to_string(), json!(7));
    data.insert("message".to_string(), json!(r#"{"player_name":"Bob"}"#));
    h.bus
        .publish(TOPIC, &EventEnvelope::new("player_created", data))
        .await
        .unwrap();

    // Wait for the dispatch loop to stage the identity fragment.
    tokio::time::timeout(Duration::from_secs(2), async {
        while !h.store.contains_key("player_identity_7") {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("fragment staged from the bus");

    let response = h
        .server
        .post("/api/score/created")
        .json(&json!({"id": 7, "message": r#"{"player_score":3}"#}))
        .await;

    assert_eq!(response.json::<Value>()["status"], "consolidated");
    assert_eq!(
        h.notifier.entities()[0].to_value(),
        json!({"player_name": "Bob", "player_score": 3})
    );
}

#[tokio::test]
async fn fragment_without_id_is_400() {
    let h = harness(Duration::from_secs(2), true).await;

    let response = h
        .server
        .post("/api/player/created")
        .json(&json!({"message": "{}"}))
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
    assert!(h.store.is_empty());
}

#[tokio::test]
async fn store_failure_is_500() {
    let h = harness(Duration::from_secs(2), true).await;
    h.store.set_failing(true);

    h.server
        .post("/api/score/created")
        .json(&json!({"id": 1, "message": "{}"}))
        .await
        .assert_status(StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn health_routes_sit_outside_api_prefix() {
    let h = harness(Duration::from_secs(2), true).await;

    h.server.get("/health").await.assert_text("ok");

    let ready = h.server.get("/health/ready").await;
    ready.assert_status_ok();
    assert_eq!(ready.json::<Value>()["status"], "healthy");

    // No recorder installed in tests.
    h.server
        .get("/metrics")
        .await
        .assert_status(StatusCode::SERVICE_UNAVAILABLE);

    h.server
        .get("/api/health")
        .await
        .assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn browser_origins_are_allowed() {
    let h = harness(Duration::from_secs(2), true).await;

    let response = h
        .server
        .post("/api/team/details")
        .add_header(
            HeaderName::from_static("origin"),
            HeaderValue::from_static("http://localhost:3000"),
        )
        .json(&json!({"team_name": "Owls"}))
        .await;

    response.assert_status_ok();
    assert_eq!(
        response.headers().get("access-control-allow-origin"),
        Some(&HeaderValue::from_static("*"))
    );
}
