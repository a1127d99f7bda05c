//! Error taxonomy of the correlation and consolidation engine.
//!
//! | Variant                   | Surfaced to caller | Handling                          |
//! |---------------------------|--------------------|-----------------------------------|
//! | `AlreadyWaiting`          | yes                | caller retries or fails           |
//! | `AwaitTimeout`            | yes                | routing layer picks the response  |
//! | `Store`                   | yes                | fragment write / claim failed     |
//! | `ConnectionLost`          | no                 | dispatch loop reconnects          |
//! | `MalformedEvent`          | no                 | dropped and logged                |
//! | `NoWaiterRegistered`      | no                 | dropped and logged                |
//! | `UnroutedEventKind`       | no                 | dropped and logged                |
//! | `DownstreamNotifyFailure` | no                 | logged, never retried             |
//!
//! Nothing here is process-fatal.

use crate::event::EventError;
use crate::event_bus::EventBusError;
use crate::notifier::NotifyError;
use crate::store::StoreError;
use std::time::Duration;
use thiserror::Error;

/// Errors raised by the waiter registry, consolidator and dispatch loop.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CorrelationError {
    /// A waiter for this event kind is already active in this process
    #[error("A waiter for event kind '{event_kind}' is already registered")]
    AlreadyWaiting {
        /// Event kind that is already awaited
        event_kind: String,
    },

    /// No matching event arrived before the deadline
    #[error("Timed out after {timeout:?} waiting for event kind '{event_kind}'")]
    AwaitTimeout {
        /// Event kind that was awaited
        event_kind: String,
        /// The timeout that elapsed
        timeout: Duration,
    },

    /// An event arrived but nobody was waiting for it
    #[error("No waiter registered for event kind '{event_kind}'")]
    NoWaiterRegistered {
        /// Event kind that was delivered
        event_kind: String,
    },

    /// An event kind with no configured route
    #[error("No route configured for event kind '{event_kind}'")]
    UnroutedEventKind {
        /// Event kind that was received
        event_kind: String,
    },

    /// An envelope or payload that cannot be handled
    #[error("Malformed event: {0}")]
    MalformedEvent(String),

    /// The bus connection or channel closed
    #[error("Event bus connection lost: {0}")]
    ConnectionLost(String),

    /// The frontend sink could not be notified
    #[error("Downstream notification failed: {0}")]
    DownstreamNotifyFailure(#[from] NotifyError),

    /// The staging store failed
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<EventError> for CorrelationError {
    fn from(err: EventError) -> Self {
        Self::MalformedEvent(err.to_string())
    }
}

impl From<EventBusError> for CorrelationError {
    fn from(err: EventBusError) -> Self {
        Self::ConnectionLost(err.to_string())
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, CorrelationError>;
