//! Waiter registry: block a request on a future broadcast event.
//!
//! A request handler that needs the outcome of an asynchronous operation
//! registers interest in an event kind, triggers the operation, then waits
//! with a deadline. The dispatch loop delivers matching events.
//!
//! ```text
//! HTTP handler                       Dispatch loop
//!     │ register("team_created")          │
//!     │ call team service                 │
//!     │ wait(5s) ─────┐                   │
//!     │               │  deliver("team_created", data)
//!     │               ◄───────────────────┤
//!     ▼ data                              ▼
//! ```
//!
//! # Semantics
//!
//! - At most one waiter per event kind per process; a second registrant is
//!   rejected with `AlreadyWaiting`.
//! - Delivery is at most once: the slot is removed when the payload is handed
//!   over, so a duplicate delivery finds nothing.
//! - Events with no registered waiter are dropped, not buffered.
//! - On timeout (or when the handle is dropped) the slot is released, so a
//!   late delivery is dropped rather than reaching a newer registrant.
//!
//! Lookup, removal and hand-over happen under the registry lock. A waiter
//! timing out re-checks its channel under the same lock, so a delivery that
//! won the race right at the deadline is returned instead of being lost.

use crate::metrics::CorrelationMetrics;
use courier_core::error::{CorrelationError, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;

struct Slot {
    id: u64,
    sender: oneshot::Sender<Value>,
}

#[derive(Default)]
struct Inner {
    slots: Mutex<HashMap<String, Slot>>,
    next_id: AtomicU64,
}

impl Inner {
    fn slots(&self) -> MutexGuard<'_, HashMap<String, Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Remove the slot for `event_kind` only if it still belongs to `id`.
    fn release(&self, event_kind: &str, id: u64) {
        let mut slots = self.slots();
        if slots.get(event_kind).is_some_and(|slot| slot.id == id) {
            slots.remove(event_kind);
            CorrelationMetrics::record_pending_waiters(slots.len());
        }
    }
}

/// In-process table of callers blocked on a future event kind.
///
/// Cheap to clone; clones share the same table. Inject one instance into
/// both the dispatch loop and the HTTP layer.
#[derive(Clone, Default)]
pub struct WaiterRegistry {
    inner: Arc<Inner>,
}

impl WaiterRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register interest in the next event of `event_kind`.
    ///
    /// Register **before** triggering the operation that emits the event,
    /// otherwise a fast event may arrive while nobody is waiting.
    ///
    /// # Errors
    ///
    /// Returns [`CorrelationError::AlreadyWaiting`] if another waiter for the
    /// same kind is active in this process.
    pub fn register(&self, event_kind: impl Into<String>) -> Result<WaiterHandle> {
        let event_kind = event_kind.into();
        let mut slots = self.inner.slots();

        if slots
            .get(&event_kind)
            .is_some_and(|slot| !slot.sender.is_closed())
        {
            tracing::warn!(event_kind = %event_kind, "Rejected second waiter for event kind");
            return Err(CorrelationError::AlreadyWaiting { event_kind });
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = oneshot::channel();
        slots.insert(event_kind.clone(), Slot { id, sender });
        CorrelationMetrics::record_pending_waiters(slots.len());

        tracing::debug!(event_kind = %event_kind, waiter_id = id, "Waiter registered");

        Ok(WaiterHandle {
            event_kind,
            id,
            receiver,
            registry: Arc::clone(&self.inner),
        })
    }

    /// Register and wait in one step.
    ///
    /// # Errors
    ///
    /// Returns [`CorrelationError::AlreadyWaiting`] or
    /// [`CorrelationError::AwaitTimeout`].
    pub async fn wait_for(
        &self,
        event_kind: impl Into<String>,
        timeout: Duration,
    ) -> Result<Value> {
        self.register(event_kind)?.wait(timeout).await
    }

    /// Hand `payload` to the waiter for `event_kind`, waking it exactly once.
    ///
    /// # Errors
    ///
    /// Returns [`CorrelationError::NoWaiterRegistered`] when nobody is
    /// waiting; the payload is dropped.
    pub fn deliver(&self, event_kind: &str, payload: Value) -> Result<()> {
        let mut slots = self.inner.slots();

        let Some(slot) = slots.remove(event_kind) else {
            return Err(CorrelationError::NoWaiterRegistered {
                event_kind: event_kind.to_string(),
            });
        };
        CorrelationMetrics::record_pending_waiters(slots.len());

        // Sent while still holding the lock: a waiter timing out concurrently
        // observes either the slot or the payload, never neither.
        if slot.sender.send(payload).is_err() {
            return Err(CorrelationError::NoWaiterRegistered {
                event_kind: event_kind.to_string(),
            });
        }
        drop(slots);

        CorrelationMetrics::record_waiter_delivery();
        tracing::debug!(event_kind = %event_kind, waiter_id = slot.id, "Event delivered to waiter");
        Ok(())
    }

    /// Whether a waiter for `event_kind` is currently registered.
    #[must_use]
    pub fn is_waiting(&self, event_kind: &str) -> bool {
        self.inner.slots().contains_key(event_kind)
    }

    /// Number of registered waiters (for monitoring).
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.slots().len()
    }
}

/// A registered waiter. Dropping it releases the registry slot.
#[must_use = "a waiter does nothing unless waited on"]
pub struct WaiterHandle {
    event_kind: String,
    id: u64,
    receiver: oneshot::Receiver<Value>,
    registry: Arc<Inner>,
}

impl WaiterHandle {
    /// Event kind this handle waits for.
    #[must_use]
    pub fn event_kind(&self) -> &str {
        &self.event_kind
    }

    /// Suspend until the event is delivered or `timeout` elapses.
    ///
    /// Only the calling task is suspended.
    ///
    /// # Errors
    ///
    /// Returns [`CorrelationError::AwaitTimeout`] if no event arrived in time.
    /// The slot is released before returning, so later deliveries are dropped.
    pub async fn wait(mut self, timeout: Duration) -> Result<Value> {
        match tokio::time::timeout(timeout, &mut self.receiver).await {
            Ok(Ok(payload)) => Ok(payload),
            Ok(Err(_)) => {
                tracing::warn!(
                    event_kind = %self.event_kind,
                    "Waiter channel closed without delivery"
                );
                Err(self.timeout_error(timeout))
            }
            Err(_) => {
                let mut slots = self.registry.slots();
                let still_registered = slots
                    .get(&self.event_kind)
                    .is_some_and(|slot| slot.id == self.id);

                if still_registered {
                    slots.remove(&self.event_kind);
                    CorrelationMetrics::record_pending_waiters(slots.len());
                } else if let Ok(payload) = self.receiver.try_recv() {
                    // Delivered between the deadline and taking the lock.
                    return Ok(payload);
                }
                drop(slots);

                CorrelationMetrics::record_waiter_timeout();
                tracing::error!(
                    event_kind = %self.event_kind,
                    timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                    "Timeout waiting for event"
                );
                Err(self.timeout_error(timeout))
            }
        }
    }

    fn timeout_error(&self, timeout: Duration) -> CorrelationError {
        CorrelationError::AwaitTimeout {
            event_kind: self.event_kind.clone(),
            timeout,
        }
    }
}

impl Drop for WaiterHandle {
    fn drop(&mut self) {
        self.registry.release(&self.event_kind, self.id);
    }
}
