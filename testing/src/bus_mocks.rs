//! In-memory broadcast event bus.
//!
//! Every live subscription receives its own copy of every message published
//! to one of its topics, which mirrors the fanout the gateway replicas see
//! in production. Connection loss can be injected to exercise reconnects.
//!
//! A delivery dropped without an ack is replayed to the next subscription on
//! its topic, the way a Kafka consumer re-reads an uncommitted offset after
//! rejoining its group.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Lock poisoning only happens after a test already panicked

use courier_core::event::EventEnvelope;
use courier_core::event_bus::{Delivery, DeliveryStream, EventBus, EventBusError};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

type Sender = mpsc::UnboundedSender<Result<Delivery, EventBusError>>;

struct Subscription {
    topics: Vec<String>,
    sender: Sender,
}

#[derive(Default)]
struct Inner {
    subscriptions: Mutex<Vec<Subscription>>,
    published: Mutex<Vec<(String, EventEnvelope)>>,
    pending_subscribe_failures: AtomicUsize,
    subscribe_attempts: AtomicUsize,
    acked: AtomicUsize,
    /// Dropped without an ack, waiting for the next subscription
    unacked: Mutex<Vec<(String, Vec<u8>)>>,
}

/// In-memory event bus for tests.
///
/// # Example
///
/// ```
/// use courier_testing::InMemoryEventBus;
/// use courier_core::event_bus::EventBus;
/// use courier_core::event::EventEnvelope;
/// use futures::StreamExt;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let bus = InMemoryEventBus::new();
/// let mut stream = bus.subscribe(&["gateway-events"]).await?;
///
/// bus.publish("gateway-events", &EventEnvelope::new("team_created", Default::default()))
///     .await?;
///
/// let delivery = stream.next().await.unwrap()?;
/// assert_eq!(delivery.topic, "gateway-events");
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Default)]
pub struct InMemoryEventBus {
    inner: Arc<Inner>,
}

impl InMemoryEventBus {
    /// Create a bus with no subscribers
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish raw bytes, bypassing envelope encoding.
    ///
    /// Used to inject malformed messages. Returns how many subscribers got it.
    pub fn publish_raw(&self, topic: &str, payload: &[u8]) -> usize {
        let mut subscriptions = self.inner.subscriptions.lock().unwrap();
        subscriptions.retain(|sub| !sub.sender.is_closed());

        subscriptions
            .iter()
            .filter(|sub| sub.topics.iter().any(|t| t == topic))
            .filter(|sub| self.send_tracked(&sub.sender, topic, payload.to_vec()))
            .count()
    }

    /// Send one delivery and watch its ack: counted when acked, queued for
    /// replay when dropped.
    fn send_tracked(&self, sender: &Sender, topic: &str, payload: Vec<u8>) -> bool {
        let (delivery, ack) = Delivery::with_ack(topic, payload.clone());
        if sender.send(Ok(delivery)).is_err() {
            return false;
        }

        let inner = Arc::clone(&self.inner);
        let topic = topic.to_string();
        tokio::spawn(async move {
            if ack.await.is_ok() {
                inner.acked.fetch_add(1, Ordering::SeqCst);
            } else {
                inner.unacked.lock().unwrap().push((topic, payload));
            }
        });
        true
    }

    /// Deliveries dropped without an ack and not yet replayed
    #[must_use]
    pub fn unacked_count(&self) -> usize {
        self.inner.unacked.lock().unwrap().len()
    }

    /// Drop every live subscription, as if the broker connection closed.
    ///
    /// Each subscriber first receives [`EventBusError::ConnectionLost`].
    pub fn disconnect_all(&self) {
        let mut subscriptions = self.inner.subscriptions.lock().unwrap();
        for sub in subscriptions.drain(..) {
            let _ = sub
                .sender
                .send(Err(EventBusError::ConnectionLost("in-memory disconnect".to_string())));
        }
    }

    /// Make the next `count` subscribe attempts fail
    pub fn fail_next_subscribes(&self, count: usize) {
        self.inner
            .pending_subscribe_failures
            .store(count, Ordering::SeqCst);
    }

    /// Number of live subscriptions
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        let mut subscriptions = self.inner.subscriptions.lock().unwrap();
        subscriptions.retain(|sub| !sub.sender.is_closed());
        subscriptions.len()
    }

    /// Total subscribe attempts, including failed ones
    #[must_use]
    pub fn subscribe_attempts(&self) -> usize {
        self.inner.subscribe_attempts.load(Ordering::SeqCst)
    }

    /// Deliveries that were acknowledged by their consumer
    #[must_use]
    pub fn acked_count(&self) -> usize {
        self.inner.acked.load(Ordering::SeqCst)
    }

    /// Every envelope published through [`EventBus::publish`]
    #[must_use]
    pub fn published(&self) -> Vec<(String, EventEnvelope)> {
        self.inner.published.lock().unwrap().clone()
    }
}

impl EventBus for InMemoryEventBus {
    fn publish(
        &self,
        topic: &str,
        event: &EventEnvelope,
    ) -> Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send + '_>> {
        let topic = topic.to_string();
        let event = event.clone();

        Box::pin(async move {
            let payload = event.encode().map_err(|e| EventBusError::PublishFailed {
                topic: topic.clone(),
                reason: e.to_string(),
            })?;
            self.inner
                .published
                .lock()
                .unwrap()
                .push((topic.clone(), event));
            self.publish_raw(&topic, &payload);
            Ok(())
        })
    }

    fn subscribe(
        &self,
        topics: &[&str],
    ) -> Pin<Box<dyn Future<Output = Result<DeliveryStream, EventBusError>> + Send + '_>> {
        let topics: Vec<String> = topics.iter().map(|s| (*s).to_string()).collect();

        Box::pin(async move {
            self.inner.subscribe_attempts.fetch_add(1, Ordering::SeqCst);

            let should_fail = self
                .inner
                .pending_subscribe_failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if should_fail {
                return Err(EventBusError::ConnectionFailed(
                    "in-memory subscribe failure".to_string(),
                ));
            }

            let (sender, mut rx) = mpsc::unbounded_channel();

            let replay: Vec<(String, Vec<u8>)> = {
                let mut unacked = self.inner.unacked.lock().unwrap();
                let (matching, rest): (Vec<_>, Vec<_>) = unacked
                    .drain(..)
                    .partition(|(topic, _)| topics.contains(topic));
                *unacked = rest;
                matching
            };
            for (topic, payload) in replay {
                self.send_tracked(&sender, &topic, payload);
            }

            self.inner
                .subscriptions
                .lock()
                .unwrap()
                .push(Subscription { topics, sender });

            let stream = async_stream::stream! {
                while let Some(item) = rx.recv().await {
                    yield item;
                }
            };

            Ok(Box::pin(stream) as DeliveryStream)
        })
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn every_subscriber_gets_a_copy() {
        let bus = InMemoryEventBus::new();
        let mut a = bus.subscribe(&["events"]).await.unwrap();
        let mut b = bus.subscribe(&["events"]).await.unwrap();

        assert_eq!(bus.publish_raw("events", b"{}"), 2);

        assert_eq!(a.next().await.unwrap().unwrap().payload, b"{}");
        assert_eq!(b.next().await.unwrap().unwrap().payload, b"{}");
    }

    #[tokio::test]
    async fn other_topics_are_not_delivered() {
        let bus = InMemoryEventBus::new();
        let _stream = bus.subscribe(&["events"]).await.unwrap();
        assert_eq!(bus.publish_raw("other", b"{}"), 0);
    }

    #[tokio::test]
    async fn disconnect_ends_stream_with_connection_lost() {
        let bus = InMemoryEventBus::new();
        let mut stream = bus.subscribe(&["events"]).await.unwrap();

        bus.disconnect_all();

        let err = stream.next().await.unwrap().expect_err("should be an error");
        assert!(err.is_connection_loss());
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn unacknowledged_delivery_is_replayed_to_next_subscription() {
        let bus = InMemoryEventBus::new();
        let mut first = bus.subscribe(&["events"]).await.unwrap();
        bus.publish_raw("events", b"one");

        drop(first.next().await.unwrap().unwrap());
        drop(first);
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert_eq!(bus.unacked_count(), 1);

        let mut second = bus.subscribe(&["events"]).await.unwrap();
        let delivery = second.next().await.unwrap().unwrap();
        assert_eq!(delivery.payload, b"one");
        delivery.ack();
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        assert_eq!(bus.acked_count(), 1);
        assert_eq!(bus.unacked_count(), 0);
    }

    #[tokio::test]
    async fn injected_subscribe_failures_are_consumed() {
        let bus = InMemoryEventBus::new();
        bus.fail_next_subscribes(1);

        assert!(bus.subscribe(&["events"]).await.is_err());
        assert!(bus.subscribe(&["events"]).await.is_ok());
        assert_eq!(bus.subscribe_attempts(), 2);
    }
}
