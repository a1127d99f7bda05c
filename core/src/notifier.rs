//! Downstream notification of consolidated entities.

use crate::fragment::ConsolidatedEntity;
use serde_json::{Map, Value};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors from a downstream notification attempt.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NotifyError {
    /// The sink could not be reached
    #[error("Notification transport failed: {0}")]
    Transport(String),

    /// The sink answered with a non-success status
    #[error("Notification rejected with status {status}: {body}")]
    Rejected {
        /// HTTP status code returned by the sink
        status: u16,
        /// Response body (truncated by the implementation if needed)
        body: String,
    },
}

/// Future returned by [`Notifier`] methods.
pub type NotifyFuture<'a> = Pin<Box<dyn Future<Output = Result<(), NotifyError>> + Send + 'a>>;

/// Pushes updates to the frontend sink.
///
/// Best-effort: callers log a failure and move on, nothing is re-queued.
pub trait Notifier: Send + Sync {
    /// Deliver one consolidated entity.
    fn notify<'a>(&'a self, entity: &'a ConsolidatedEntity) -> NotifyFuture<'a>;

    /// Deliver an event payload that needs no consolidation (a newly created
    /// team, for instance) unchanged.
    fn forward<'a>(
        &'a self,
        event_kind: &'a str,
        payload: &'a Map<String, Value>,
    ) -> NotifyFuture<'a>;
}
