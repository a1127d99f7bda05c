//! Component health reporting for readiness checks.

use crate::dispatch::DispatchState;
use serde::Serialize;

/// Health of a component, ordered from best to worst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Fully operational
    Healthy,
    /// Recovering on its own (e.g. reconnecting)
    Degraded,
    /// Not operational
    Unhealthy,
}

impl HealthStatus {
    /// Whether the status is [`Healthy`](Self::Healthy).
    #[must_use]
    pub const fn is_healthy(self) -> bool {
        matches!(self, Self::Healthy)
    }
}

/// Health of one component.
#[derive(Debug, Clone, Serialize)]
pub struct HealthCheck {
    /// Component name
    pub component: String,
    /// Status of the component
    pub status: HealthStatus,
    /// Why the component is not healthy
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl HealthCheck {
    /// Health of the dispatch loop given its current state. Only
    /// `Dispatching` is healthy.
    #[must_use]
    pub fn dispatch(state: DispatchState) -> Self {
        let (status, message) = match state {
            DispatchState::Dispatching => (HealthStatus::Healthy, None),
            DispatchState::Connecting | DispatchState::Subscribed => {
                (HealthStatus::Degraded, Some(format!("{state:?}")))
            }
            DispatchState::Disconnected => {
                (HealthStatus::Unhealthy, Some("Disconnected".to_string()))
            }
        };

        Self {
            component: "dispatch_loop".to_string(),
            status,
            message,
        }
    }
}

/// Aggregated report; the worst component status wins.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    /// Overall status
    pub status: HealthStatus,
    /// Per-component results
    pub checks: Vec<HealthCheck>,
    /// Generation time
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl HealthReport {
    /// Aggregate `checks`. An empty report is healthy.
    #[must_use]
    pub fn new(checks: Vec<HealthCheck>) -> Self {
        let status = checks
            .iter()
            .map(|check| check.status)
            .max()
            .unwrap_or(HealthStatus::Healthy);

        Self {
            status,
            checks,
            timestamp: chrono::Utc::now(),
        }
    }

    /// Whether every component is healthy.
    #[must_use]
    pub const fn is_healthy(&self) -> bool {
        self.status.is_healthy()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_dispatching_is_healthy() {
        assert!(HealthCheck::dispatch(DispatchState::Dispatching).status.is_healthy());
        assert_eq!(
            HealthCheck::dispatch(DispatchState::Subscribed).status,
            HealthStatus::Degraded
        );
        assert_eq!(
            HealthCheck::dispatch(DispatchState::Disconnected).status,
            HealthStatus::Unhealthy
        );
    }

    #[test]
    fn report_takes_worst_status() {
        let report = HealthReport::new(vec![
            HealthCheck::dispatch(DispatchState::Dispatching),
            HealthCheck::dispatch(DispatchState::Connecting),
        ]);
        assert_eq!(report.status, HealthStatus::Degraded);
        assert!(!report.is_healthy());
        assert_eq!(report.checks[1].message.as_deref(), Some("Connecting"));

        assert!(HealthReport::new(vec![]).is_healthy());
    }
}
