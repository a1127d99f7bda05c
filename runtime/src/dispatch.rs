//! Dispatch loop: the single consumer of the broadcast bus.
//!
//! Subscribes to the configured topics, decodes every inbound envelope and
//! routes it to the waiter registry or the consolidator according to the
//! [`RoutingTable`]. Runs until a shutdown signal arrives, reconnecting with
//! a fixed backoff whenever the subscription is lost.
//!
//! ```text
//! Disconnected ─► Connecting ─► Subscribed ─► Dispatching
//!                    ▲                             │
//!                    └──── backoff ◄─ connection lost
//! ```
//!
//! A delivery is acknowledged only after its handler completed. When a
//! handler fails (the staging store is unreachable) the delivery is left
//! unacknowledged and the loop tears the subscription down, backs off and
//! resubscribes, so the transport hands the same event out again.
//! Malformed, unrouted and unclaimed events are dropped and logged per
//! message; none of them stop the loop.

use crate::consolidator::Consolidator;
use crate::metrics::{CorrelationMetrics, DropReason};
use crate::routing::{Route, RoutingTable};
use crate::waiters::WaiterRegistry;
use courier_core::error::{CorrelationError, Result};
use courier_core::event::EventEnvelope;
use courier_core::event_bus::{Delivery, DeliveryStream, EventBus};
use courier_core::fragment::ConsolidatedEntity;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tracing::{error, info, warn};

/// Default wait before reconnecting after a lost subscription.
pub const DEFAULT_RECONNECT_BACKOFF: Duration = Duration::from_secs(5);

/// Connection state of the dispatch loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
    /// Not running, or stopped after shutdown.
    Disconnected,
    /// Subscribing, or waiting out the backoff before the next attempt.
    Connecting,
    /// Subscription established.
    Subscribed,
    /// Consuming deliveries.
    Dispatching,
}

/// What happened to one delivery.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    /// Handed to a blocked waiter.
    Delivered,
    /// Fragment staged; the entity is not complete yet.
    FragmentStored,
    /// Fragment staged and the entity consolidated.
    Consolidated(ConsolidatedEntity),
    /// Dropped without effect.
    Dropped(DropReason),
    /// The handler failed (staging store unavailable). Not acknowledged.
    Failed(CorrelationError),
}

impl DispatchOutcome {
    /// Whether the delivery should be acknowledged to the transport.
    #[must_use]
    pub const fn is_handled(&self) -> bool {
        !matches!(self, Self::Failed(_))
    }
}

/// Consumes the broadcast bus and feeds the correlation engine.
pub struct DispatchLoop {
    topics: Vec<String>,
    event_bus: Arc<dyn EventBus>,
    registry: WaiterRegistry,
    consolidator: Consolidator,
    routes: Arc<RoutingTable>,
    reconnect_backoff: Duration,
    state: watch::Sender<DispatchState>,
}

impl DispatchLoop {
    /// Create a loop over `topics` with the default reconnect backoff.
    #[must_use]
    pub fn new(
        topics: Vec<String>,
        event_bus: Arc<dyn EventBus>,
        registry: WaiterRegistry,
        consolidator: Consolidator,
        routes: Arc<RoutingTable>,
    ) -> Self {
        let (state, _) = watch::channel(DispatchState::Disconnected);
        Self {
            topics,
            event_bus,
            registry,
            consolidator,
            routes,
            reconnect_backoff: DEFAULT_RECONNECT_BACKOFF,
            state,
        }
    }

    /// Set the fixed reconnect backoff.
    #[must_use]
    pub const fn with_reconnect_backoff(mut self, backoff: Duration) -> Self {
        self.reconnect_backoff = backoff;
        self
    }

    /// Observe state transitions (used by readiness checks).
    #[must_use]
    pub fn state(&self) -> watch::Receiver<DispatchState> {
        self.state.subscribe()
    }

    /// Spawn the loop as a background task.
    #[must_use]
    pub fn spawn(self, shutdown: broadcast::Receiver<()>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move { self.run(shutdown).await })
    }

    /// Run until `shutdown` fires (or its sender is dropped).
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!(topics = ?self.topics, "Dispatch loop started");

        loop {
            self.set_state(DispatchState::Connecting);
            let topics: Vec<&str> = self.topics.iter().map(String::as_str).collect();

            let subscribed = tokio::select! {
                _ = shutdown.recv() => break,
                result = self.event_bus.subscribe(&topics) => result,
            };

            match subscribed {
                Ok(mut stream) => {
                    self.set_state(DispatchState::Subscribed);
                    info!(topics = ?self.topics, "Subscribed to event bus");

                    if self.dispatch(&mut stream, &mut shutdown).await.is_break() {
                        break;
                    }
                    self.set_state(DispatchState::Connecting);
                    warn!(
                        backoff_ms = duration_ms(self.reconnect_backoff),
                        "Subscription ended, resubscribing after backoff"
                    );
                }
                Err(e) => {
                    self.set_state(DispatchState::Connecting);
                    error!(
                        error = %e,
                        backoff_ms = duration_ms(self.reconnect_backoff),
                        "Failed to subscribe to event bus, retrying after backoff"
                    );
                }
            }

            CorrelationMetrics::record_reconnect();
            tokio::select! {
                _ = shutdown.recv() => break,
                () = tokio::time::sleep(self.reconnect_backoff) => {}
            }
        }

        self.set_state(DispatchState::Disconnected);
        info!("Dispatch loop stopped");
    }

    /// Consume `stream` until it ends, errors, a handler fails, or shutdown
    /// fires.
    ///
    /// The handler runs outside the `select!`, so a shutdown signal never
    /// interrupts an event half-way.
    async fn dispatch(
        &self,
        stream: &mut DeliveryStream,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> std::ops::ControlFlow<()> {
        use std::ops::ControlFlow;

        self.set_state(DispatchState::Dispatching);

        loop {
            let next = tokio::select! {
                _ = shutdown.recv() => {
                    info!("Dispatch loop received shutdown signal");
                    return ControlFlow::Break(());
                }
                next = stream.next() => next,
            };

            match next {
                Some(Ok(delivery)) => {
                    let outcome = self.handle(&delivery).await;
                    if !outcome.is_handled() {
                        warn!(
                            topic = %delivery.topic,
                            "Delivery not handled, leaving it for redelivery"
                        );
                        return ControlFlow::Continue(());
                    }
                    delivery.ack();
                }
                Some(Err(e)) if e.is_connection_loss() => {
                    warn!(error = %e, "Event bus connection lost");
                    return ControlFlow::Continue(());
                }
                Some(Err(e)) => {
                    error!(error = %e, "Error receiving event from stream");
                }
                None => {
                    warn!("Event stream ended");
                    return ControlFlow::Continue(());
                }
            }
        }
    }

    /// Decode and route a single delivery.
    ///
    /// Never fails: every error becomes a [`DispatchOutcome::Dropped`] or
    /// [`DispatchOutcome::Failed`] and is logged here.
    pub async fn handle(&self, delivery: &Delivery) -> DispatchOutcome {
        CorrelationMetrics::record_received();

        let envelope = match EventEnvelope::decode(&delivery.payload) {
            Ok(envelope) => envelope,
            Err(e) => return Self::dropped(None, &e.into()),
        };

        match self.route(&envelope).await {
            Ok(outcome) => outcome,
            Err(e) => Self::dropped(Some(&envelope.event_kind), &e),
        }
    }

    async fn route(&self, envelope: &EventEnvelope) -> Result<DispatchOutcome> {
        let route = self.routes.resolve(&envelope.event_kind)?;

        match route {
            Route::Waiter => {
                self.registry
                    .deliver(&envelope.event_kind, envelope.data_value())?;
                Ok(DispatchOutcome::Delivered)
            }
            Route::Fragment { .. } => Ok(self
                .consolidator
                .stage(route, &envelope.data)
                .await?
                .map_or(DispatchOutcome::FragmentStored, DispatchOutcome::Consolidated)),
        }
    }

    fn dropped(event_kind: Option<&str>, err: &CorrelationError) -> DispatchOutcome {
        let event_kind = event_kind.unwrap_or("<undecoded>");
        let reason = match err {
            CorrelationError::MalformedEvent(_) => DropReason::Malformed,
            CorrelationError::NoWaiterRegistered { .. } => DropReason::NoWaiter,
            CorrelationError::UnroutedEventKind { .. } => DropReason::Unrouted,
            other => {
                error!(event_kind, error = %other, "Event handler failed");
                return DispatchOutcome::Failed(other.clone());
            }
        };

        CorrelationMetrics::record_dropped(reason);
        match reason {
            DropReason::NoWaiter => {
                info!(event_kind, reason = reason.as_str(), "Event dropped");
            }
            DropReason::Malformed | DropReason::Unrouted => {
                warn!(event_kind, reason = reason.as_str(), error = %err, "Event dropped");
            }
        }
        DispatchOutcome::Dropped(reason)
    }

    fn set_state(&self, state: DispatchState) {
        self.state.send_replace(state);
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use courier_testing::{InMemoryEventBus, InMemoryStagingStore, RecordingNotifier};
    use serde_json::json;

    struct Fixture {
        dispatch: DispatchLoop,
        registry: WaiterRegistry,
        store: InMemoryStagingStore,
        notifier: RecordingNotifier,
    }

    fn fixture() -> Fixture {
        let store = InMemoryStagingStore::new();
        let notifier = RecordingNotifier::new();
        let registry = WaiterRegistry::new();
        let consolidator =
            Consolidator::new("player", Arc::new(store.clone()), Arc::new(notifier.clone()));
        let routes = RoutingTable::builder()
            .waiter("team_created")
            .fragment("player_created", "identity")
            .fragment("score_created", "score")
            .build();

        let dispatch = DispatchLoop::new(
            vec!["gateway-events".to_string()],
            Arc::new(InMemoryEventBus::new()),
            registry.clone(),
            consolidator,
            Arc::new(routes),
        );

        Fixture {
            dispatch,
            registry,
            store,
            notifier,
        }
    }

    fn delivery(value: &serde_json::Value) -> Delivery {
        Delivery::new("gateway-events", value.to_string().into_bytes())
    }

    #[tokio::test]
    async fn waiter_route_delivers_data() {
        let f = fixture();
        let handle = f.registry.register("team_created").unwrap();

        let outcome = f
            .dispatch
            .handle(&delivery(&json!({
                "event_kind": "team_created",
                "data": {"team_id": 3, "team_name": "Reds"}
            })))
            .await;

        assert_eq!(outcome, DispatchOutcome::Delivered);
        let data = handle.wait(Duration::from_secs(1)).await.unwrap();
        assert_eq!(data, json!({"team_id": 3, "team_name": "Reds"}));
    }

    #[tokio::test]
    async fn waiter_route_without_waiter_is_dropped() {
        let f = fixture();
        let outcome = f
            .dispatch
            .handle(&delivery(&json!({"event_kind": "team_created", "data": {}})))
            .await;
        assert_eq!(outcome, DispatchOutcome::Dropped(DropReason::NoWaiter));
    }

    #[tokio::test]
    async fn malformed_envelope_is_dropped() {
        let f = fixture();
        let outcome = f
            .dispatch
            .handle(&Delivery::new("gateway-events", b"not json".to_vec()))
            .await;
        assert_eq!(outcome, DispatchOutcome::Dropped(DropReason::Malformed));
    }

    #[tokio::test]
    async fn unrouted_kind_is_dropped() {
        let f = fixture();
        let outcome = f
            .dispatch
            .handle(&delivery(&json!({"event_kind": "score_updated", "data": {}})))
            .await;
        assert_eq!(outcome, DispatchOutcome::Dropped(DropReason::Unrouted));
    }

    #[tokio::test]
    async fn fragments_consolidate_on_last_arrival() {
        let f = fixture();

        let first = f
            .dispatch
            .handle(&delivery(&json!({
                "event_kind": "player_created",
                "data": {"id": 42, "message": "{\"name\":\"Alice\"}"}
            })))
            .await;
        assert_eq!(first, DispatchOutcome::FragmentStored);
        assert!(f.store.contains_key("player_identity_42"));

        let second = f
            .dispatch
            .handle(&delivery(&json!({
                "event_kind": "score_created",
                "data": {"id": "42", "message": {"score": 10}}
            })))
            .await;

        let DispatchOutcome::Consolidated(entity) = second else {
            unreachable!("expected consolidation, got {second:?}");
        };
        assert_eq!(entity.to_value(), json!({"name": "Alice", "score": 10}));
        assert!(f.store.is_empty());
        assert_eq!(f.notifier.attempts(), 1);
    }

    #[tokio::test]
    async fn fragment_without_id_is_malformed() {
        let f = fixture();
        let outcome = f
            .dispatch
            .handle(&delivery(&json!({"event_kind": "score_created", "data": {"score": 1}})))
            .await;
        assert_eq!(outcome, DispatchOutcome::Dropped(DropReason::Malformed));
        assert!(f.store.is_empty());
    }

    #[tokio::test]
    async fn store_failure_is_not_acknowledged() {
        let f = fixture();
        f.store.set_failing(true);

        let outcome = f
            .dispatch
            .handle(&delivery(&json!({
                "event_kind": "score_created",
                "data": {"id": "1", "score": 1}
            })))
            .await;

        assert!(matches!(outcome, DispatchOutcome::Failed(CorrelationError::Store(_))));
        assert!(!outcome.is_handled());
    }

    #[test]
    fn starts_disconnected() {
        let f = fixture();
        assert_eq!(*f.dispatch.state().borrow(), DispatchState::Disconnected);
    }
}
