//! Event bus abstraction for broadcast event delivery.
//!
//! This module provides the [`EventBus`] trait used by the dispatch loop to
//! receive events and by producers (and tests) to publish them. Events flow
//! from peer services through a broadcast topic to **every** running gateway
//! replica:
//!
//! ```text
//! ┌──────────────┐   publish   ┌─────────────────┐
//! │ Peer service │────────────►│ broadcast topic │
//! └──────────────┘             └────────┬────────┘
//!                                       │  every replica gets a copy
//!                              ┌────────┴────────┐
//!                              ▼                 ▼
//!                        ┌──────────┐      ┌──────────┐
//!                        │ replica A│      │ replica B│
//!                        └──────────┘      └──────────┘
//! ```
//!
//! # Key Principles
//!
//! - **At-least-once delivery**: Events may be delivered multiple times
//! - **Broadcast**: Replicas do not share the stream; each sees every event
//! - **Ack after handling**: A [`Delivery`] is acknowledged only once its
//!   handler finished; unacknowledged deliveries are not committed
//!
//! # Implementations
//!
//! - `InMemoryEventBus` (courier-testing) - For tests
//! - `RedpandaEventBus` (courier-redpanda) - For production (Kafka-compatible)

use crate::event::EventEnvelope;
use futures::Stream;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;
use tokio::sync::oneshot;

/// Errors that can occur during event bus operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EventBusError {
    /// Failed to connect to the event bus
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// An established connection or channel was closed
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// Failed to publish an event to a topic
    #[error("Publish failed for topic '{topic}': {reason}")]
    PublishFailed {
        /// The topic that failed
        topic: String,
        /// The reason for failure
        reason: String,
    },

    /// Failed to subscribe to topics
    #[error("Subscription failed for topics {topics:?}: {reason}")]
    SubscriptionFailed {
        /// The topics that failed to subscribe
        topics: Vec<String>,
        /// The reason for failure
        reason: String,
    },

    /// Network or transport error on a single message
    #[error("Transport error: {0}")]
    TransportError(String),
}

impl EventBusError {
    /// Whether the subscription must be torn down and re-established.
    #[must_use]
    pub const fn is_connection_loss(&self) -> bool {
        matches!(self, Self::ConnectionLost(_) | Self::ConnectionFailed(_))
    }
}

/// One message received from a subscription.
///
/// The payload is left undecoded so the consumer decides how to treat a
/// malformed envelope. Call [`Delivery::ack`] once the message has been
/// handled; dropping a delivery without acking leaves it uncommitted.
#[derive(Debug)]
pub struct Delivery {
    /// Topic the message arrived on
    pub topic: String,
    /// Raw envelope bytes
    pub payload: Vec<u8>,
    ack: Option<oneshot::Sender<()>>,
}

impl Delivery {
    /// Create a delivery that needs no acknowledgement.
    #[must_use]
    pub fn new(topic: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            topic: topic.into(),
            payload,
            ack: None,
        }
    }

    /// Create a delivery together with the receiver the transport waits on
    /// before committing the message.
    #[must_use]
    pub fn with_ack(topic: impl Into<String>, payload: Vec<u8>) -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        let delivery = Self {
            topic: topic.into(),
            payload,
            ack: Some(tx),
        };
        (delivery, rx)
    }

    /// Acknowledge the delivery as handled.
    pub fn ack(mut self) {
        if let Some(tx) = self.ack.take() {
            // The transport may already have gone away; nothing left to commit then.
            let _ = tx.send(());
        }
    }
}

/// Stream of deliveries from a subscription.
///
/// An `Err` item carrying [`EventBusError::ConnectionLost`], or the end of
/// the stream, means the connection is gone and the consumer must resubscribe.
pub type DeliveryStream = Pin<Box<dyn Stream<Item = Result<Delivery, EventBusError>> + Send>>;

/// Trait for event bus implementations.
///
/// # Dyn Compatibility
///
/// This trait uses explicit `Pin<Box<dyn Future>>` returns instead of `async fn`
/// to enable trait object usage (`Arc<dyn EventBus>`), which is how the
/// dispatch loop and the HTTP layer share one bus.
///
/// # Example
///
/// ```rust,ignore
/// use futures::StreamExt;
///
/// let mut stream = event_bus.subscribe(&["gateway-events"]).await?;
/// while let Some(result) = stream.next().await {
///     match result {
///         Ok(delivery) => {
///             handle(&delivery.payload).await;
///             delivery.ack();
///         }
///         Err(e) if e.is_connection_loss() => break,
///         Err(e) => tracing::warn!(error = %e, "Transport error"),
///     }
/// }
/// ```
pub trait EventBus: Send + Sync {
    /// Publish an envelope to a topic.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::PublishFailed`] if the publish operation fails.
    fn publish(
        &self,
        topic: &str,
        event: &EventEnvelope,
    ) -> Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send + '_>>;

    /// Subscribe to one or more topics.
    ///
    /// Every subscriber receives its own copy of every message published
    /// after the subscription was established.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::SubscriptionFailed`] or
    /// [`EventBusError::ConnectionFailed`] if subscription fails.
    fn subscribe(
        &self,
        topics: &[&str],
    ) -> Pin<Box<dyn Future<Output = Result<DeliveryStream, EventBusError>> + Send + '_>>;
}
