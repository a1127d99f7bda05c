//! Application state for the gateway HTTP server.

use crate::upstream::Upstream;
use axum::extract::FromRef;
use courier_core::notifier::Notifier;
use courier_runtime::{Consolidator, MetricsExporter, RoutingTable, WaiterRegistry};
use courier_web::ReadinessWatch;
use std::sync::Arc;
use std::time::Duration;

/// Application state shared across all HTTP handlers.
///
/// Cloned for each request; every field is a cheap handle. The registry,
/// consolidator and routing table are the same instances the dispatch loop
/// uses.
#[derive(Clone)]
pub struct AppState {
    /// Waiters blocked on broadcast events
    pub registry: WaiterRegistry,

    /// Fragment staging and consolidation
    pub consolidator: Consolidator,

    /// Event kind → route, shared with the dispatch loop
    pub routes: Arc<RoutingTable>,

    /// Team and rating services
    pub upstream: Arc<dyn Upstream>,

    /// Frontend sink, also used by the consolidator
    pub notifier: Arc<dyn Notifier>,

    /// Dispatch loop state, for readiness
    pub readiness: ReadinessWatch,

    /// Prometheus recorder handle
    pub metrics: Arc<MetricsExporter>,

    /// How long a request blocks on its event
    pub await_timeout: Duration,
}

impl FromRef<AppState> for ReadinessWatch {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.readiness.clone()
    }
}

impl FromRef<AppState> for Arc<MetricsExporter> {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.metrics.clone()
    }
}
