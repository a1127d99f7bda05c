//! Prometheus metrics for the correlation engine.
//!
//! Counters are emitted unconditionally through the `metrics` facade; they
//! are no-ops until a recorder is installed. The gateway installs the
//! Prometheus recorder at startup and renders it on `GET /metrics`.
//!
//! # Example
//!
//! ```rust,no_run
//! use courier_runtime::metrics::MetricsExporter;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut exporter = MetricsExporter::new();
//! exporter.install()?;
//!
//! let body = exporter.render().unwrap_or_default();
//! # Ok(())
//! # }
//! ```

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use thiserror::Error;

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Owns the Prometheus recorder handle.
#[derive(Default)]
pub struct MetricsExporter {
    handle: Option<PrometheusHandle>,
}

impl MetricsExporter {
    /// Create an exporter with no recorder installed yet.
    #[must_use]
    pub const fn new() -> Self {
        Self { handle: None }
    }

    /// Register metric descriptions and install the global recorder.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError::Install`] if another recorder is already
    /// installed for reasons other than a previous call in this process.
    pub fn install(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        match PrometheusBuilder::new().install_recorder() {
            Ok(handle) => {
                self.handle = Some(handle);
                tracing::info!("Prometheus metrics recorder installed");
                Ok(())
            }
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already initialized") {
                    tracing::warn!(
                        "Metrics recorder already initialized, skipping re-initialization"
                    );
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            }
        }
    }

    /// Render current metrics in Prometheus text format.
    ///
    /// Returns `None` if no recorder was installed by this exporter.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

fn register_metrics() {
    describe_counter!(
        "courier_events_received_total",
        "Envelopes received from the broadcast bus"
    );
    describe_counter!(
        "courier_events_dropped_total",
        "Events dropped without effect, labelled by reason"
    );
    describe_counter!(
        "courier_waiter_deliveries_total",
        "Events handed to a blocked waiter"
    );
    describe_counter!(
        "courier_waiter_timeouts_total",
        "Waiters that gave up before a matching event arrived"
    );
    describe_counter!(
        "courier_fragments_written_total",
        "Fragments written to the staging store, labelled by kind"
    );
    describe_counter!(
        "courier_consolidations_total",
        "Entities consolidated and claimed from the staging store"
    );
    describe_counter!(
        "courier_notify_failures_total",
        "Consolidated entities the frontend sink did not accept"
    );
    describe_counter!(
        "courier_reconnects_total",
        "Dispatch loop reconnect attempts after connection loss"
    );
    describe_gauge!(
        "courier_pending_waiters",
        "Waiters currently registered in this process"
    );
}

/// Why an event was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Envelope or payload could not be decoded
    Malformed,
    /// No waiter registered for the kind
    NoWaiter,
    /// No route configured for the kind
    Unrouted,
}

impl DropReason {
    /// Label value used in metrics and logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Malformed => "malformed",
            Self::NoWaiter => "no_waiter",
            Self::Unrouted => "unrouted",
        }
    }
}

/// Correlation engine metrics recorder.
pub struct CorrelationMetrics;

impl CorrelationMetrics {
    /// Record an envelope received from the bus.
    pub fn record_received() {
        counter!("courier_events_received_total").increment(1);
    }

    /// Record a dropped event.
    pub fn record_dropped(reason: DropReason) {
        counter!("courier_events_dropped_total", "reason" => reason.as_str()).increment(1);
    }

    /// Record a successful delivery to a waiter.
    pub fn record_waiter_delivery() {
        counter!("courier_waiter_deliveries_total").increment(1);
    }

    /// Record a waiter timeout.
    pub fn record_waiter_timeout() {
        counter!("courier_waiter_timeouts_total").increment(1);
    }

    /// Record the number of registered waiters.
    #[allow(clippy::cast_precision_loss)]
    pub fn record_pending_waiters(count: usize) {
        gauge!("courier_pending_waiters").set(count as f64);
    }

    /// Record a fragment write.
    pub fn record_fragment_written(kind: &str) {
        counter!("courier_fragments_written_total", "kind" => kind.to_string()).increment(1);
    }

    /// Record a successful consolidation.
    pub fn record_consolidation() {
        counter!("courier_consolidations_total").increment(1);
    }

    /// Record a failed downstream notification.
    pub fn record_notify_failure() {
        counter!("courier_notify_failures_total").increment(1);
    }

    /// Record a reconnect attempt.
    pub fn record_reconnect() {
        counter!("courier_reconnects_total").increment(1);
    }
}
