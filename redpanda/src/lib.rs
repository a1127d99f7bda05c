//! Redpanda event bus for the Courier gateway.
//!
//! Implements [`EventBus`] over Kafka-compatible topics with rdkafka.
//! Envelopes travel as JSON (`{"event_kind": ..., "data": {...}}`), keyed by
//! event kind.
//!
//! # Broadcast delivery
//!
//! Kafka consumer groups share partitions between members, which would let
//! only one gateway replica see each event. Every `RedpandaEventBus`
//! therefore joins its own consumer group, `{prefix}-{uuid}`, generated once
//! per process so that reconnects resume from the last committed offset:
//!
//! ```text
//!                     gateway-events
//!                 ┌─────────┴──────────┐
//!                 ▼                    ▼
//!       group gateway-3f2a…    group gateway-91c0…
//!            replica A              replica B
//! ```
//!
//! # Delivery Semantics
//!
//! **At-least-once** with manual offset commits: each message is handed to
//! the subscriber as a [`Delivery`] and its offset is committed only after
//! the subscriber acknowledged it. Messages are forwarded one at a time.
//!
//! # Example
//!
//! ```no_run
//! use courier_redpanda::{BusSettings, RedpandaEventBus};
//! use courier_core::event_bus::EventBus;
//! use futures::StreamExt;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let bus = RedpandaEventBus::connect(BusSettings::new("localhost:9092"))?;
//!
//! let mut deliveries = bus.subscribe(&["gateway-events"]).await?;
//! while let Some(next) = deliveries.next().await {
//!     let delivery = next?;
//!     // decode delivery.payload, route it ...
//!     delivery.ack();
//! }
//! # Ok(())
//! # }
//! ```

use courier_core::event::EventEnvelope;
use courier_core::event_bus::{Delivery, DeliveryStream, EventBus, EventBusError};
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::message::Message;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// Where a consumer group with no committed offset starts reading.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OffsetReset {
    /// Only events published after the first subscription
    #[default]
    Latest,
    /// Everything retained on the topic
    Earliest,
}

impl OffsetReset {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Latest => "latest",
            Self::Earliest => "earliest",
        }
    }
}

/// Connection settings for [`RedpandaEventBus`].
#[derive(Debug, Clone)]
pub struct BusSettings {
    /// Comma-separated broker addresses
    pub brokers: String,
    /// Prefix of the per-process consumer group
    pub group_prefix: String,
    /// How long a publish may wait for broker acknowledgement
    pub send_timeout: Duration,
    /// Start position for the fresh consumer group
    pub offset_reset: OffsetReset,
}

impl BusSettings {
    /// Settings for `brokers` with group prefix `gateway`, a 5 second send
    /// timeout and [`OffsetReset::Latest`].
    #[must_use]
    pub fn new(brokers: impl Into<String>) -> Self {
        Self {
            brokers: brokers.into(),
            group_prefix: "gateway".to_string(),
            send_timeout: Duration::from_secs(5),
            offset_reset: OffsetReset::Latest,
        }
    }

    /// Override the consumer group prefix.
    #[must_use]
    pub fn group_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.group_prefix = prefix.into();
        self
    }

    /// Override the offset reset policy.
    #[must_use]
    pub const fn offset_reset(mut self, offset_reset: OffsetReset) -> Self {
        self.offset_reset = offset_reset;
        self
    }
}

/// Event bus over a Redpanda (or Kafka) cluster.
pub struct RedpandaEventBus {
    producer: FutureProducer,
    settings: BusSettings,
    /// `{prefix}-{uuid}`, fixed for the lifetime of the bus
    group_id: String,
}

impl RedpandaEventBus {
    /// Create the producer and pick this process's consumer group.
    ///
    /// No network round trip happens here; an unreachable cluster surfaces
    /// on the first publish or subscribe.
    ///
    /// # Errors
    ///
    /// [`EventBusError::ConnectionFailed`] when no broker is given or
    /// rdkafka rejects the producer configuration.
    pub fn connect(settings: BusSettings) -> Result<Self, EventBusError> {
        if settings.brokers.trim().is_empty() {
            return Err(EventBusError::ConnectionFailed(
                "no broker address configured".to_string(),
            ));
        }

        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &settings.brokers)
            .set("message.timeout.ms", settings.send_timeout.as_millis().to_string())
            .set("acks", "all")
            .create()
            .map_err(|e| EventBusError::ConnectionFailed(format!("producer: {e}")))?;

        let group_id = format!("{}-{}", settings.group_prefix, uuid::Uuid::new_v4());
        tracing::info!(
            brokers = %settings.brokers,
            group_id = %group_id,
            offset_reset = settings.offset_reset.as_str(),
            "Redpanda event bus ready"
        );

        Ok(Self {
            producer,
            settings,
            group_id,
        })
    }

    /// Consumer group joined by every subscription of this bus.
    #[must_use]
    pub fn consumer_group(&self) -> &str {
        &self.group_id
    }

    fn consumer(&self, topics: &[String]) -> Result<StreamConsumer, EventBusError> {
        let failed = |reason: String| EventBusError::SubscriptionFailed {
            topics: topics.to_vec(),
            reason,
        };

        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &self.settings.brokers)
            .set("group.id", &self.group_id)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", self.settings.offset_reset.as_str())
            .set("session.timeout.ms", "6000")
            .set("enable.partition.eof", "false")
            .create()
            .map_err(|e| failed(format!("consumer: {e}")))?;

        let names: Vec<&str> = topics.iter().map(String::as_str).collect();
        consumer
            .subscribe(&names)
            .map_err(|e| failed(e.to_string()))?;
        Ok(consumer)
    }
}

/// Map a consumer-side Kafka error onto the bus taxonomy.
fn classify(error: &KafkaError) -> EventBusError {
    match error.rdkafka_error_code() {
        Some(RDKafkaErrorCode::AllBrokersDown | RDKafkaErrorCode::BrokerTransportFailure) => {
            EventBusError::ConnectionLost(error.to_string())
        }
        _ => EventBusError::TransportError(format!("Failed to receive message: {error}")),
    }
}

impl EventBus for RedpandaEventBus {
    fn publish(
        &self,
        topic: &str,
        event: &EventEnvelope,
    ) -> Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send + '_>> {
        let topic = topic.to_string();
        let encoded = event.encode();
        let event_kind = event.event_kind.clone();

        Box::pin(async move {
            let payload = encoded.map_err(|e| EventBusError::PublishFailed {
                topic: topic.clone(),
                reason: e.to_string(),
            })?;

            let record = FutureRecord::to(&topic)
                .key(event_kind.as_bytes())
                .payload(&payload);
            let sent = self
                .producer
                .send(record, Timeout::After(self.settings.send_timeout))
                .await;

            match sent {
                Ok((partition, offset)) => {
                    tracing::debug!(%topic, %event_kind, partition, offset, "Envelope published");
                    Ok(())
                }
                Err((e, _)) => {
                    tracing::error!(%topic, %event_kind, error = %e, "Publish failed");
                    Err(EventBusError::PublishFailed {
                        topic,
                        reason: e.to_string(),
                    })
                }
            }
        })
    }

    fn subscribe(
        &self,
        topics: &[&str],
    ) -> Pin<Box<dyn Future<Output = Result<DeliveryStream, EventBusError>> + Send + '_>> {
        let topics: Vec<String> = topics.iter().map(ToString::to_string).collect();

        Box::pin(async move {
            let consumer = self.consumer(&topics)?;
            tracing::info!(?topics, group_id = %self.group_id, "Consumer subscribed");

            let (tx, mut rx) = tokio::sync::mpsc::channel(1);
            tokio::spawn(forward_deliveries(consumer, tx));

            let deliveries = async_stream::stream! {
                while let Some(next) = rx.recv().await {
                    yield next;
                }
            };
            Ok(Box::pin(deliveries) as DeliveryStream)
        })
    }
}

/// Hand messages to the subscriber one at a time, committing each offset
/// after its delivery is acknowledged.
///
/// Stops, releasing the consumer and its partitions, as soon as the
/// subscriber drops the stream or a delivery is dropped unacknowledged. The
/// next subscription in the group then resumes from the last committed
/// offset, which re-reads the unacknowledged message.
async fn forward_deliveries(
    consumer: StreamConsumer,
    tx: tokio::sync::mpsc::Sender<Result<Delivery, EventBusError>>,
) {
    use futures::StreamExt;

    let mut messages = consumer.stream();
    loop {
        let next = tokio::select! {
            () = tx.closed() => break,
            next = messages.next() => next,
        };
        let Some(next) = next else { break };

        let message = match next {
            Ok(message) => message,
            Err(e) => {
                if tx.send(Err(classify(&e))).await.is_err() {
                    break;
                }
                continue;
            }
        };

        let payload = message.payload().map(<[u8]>::to_vec).unwrap_or_default();
        let (delivery, acked) = Delivery::with_ack(message.topic(), payload);
        if tx.send(Ok(delivery)).await.is_err() {
            break;
        }

        let topic = message.topic();
        let partition = message.partition();
        let offset = message.offset();
        if acked.await.is_err() {
            tracing::warn!(
                topic,
                partition,
                offset,
                "Delivery dropped without ack, stopping before the offset is committed"
            );
            break;
        }
        if let Err(e) = consumer.commit_message(&message, CommitMode::Async) {
            tracing::warn!(
                topic,
                partition,
                offset,
                error = %e,
                "Offset commit failed, event may be redelivered"
            );
        }
    }

    drop(messages);
    consumer.unsubscribe();
    tracing::debug!("Consumer released");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_broker_list_is_rejected() {
        let result = RedpandaEventBus::connect(BusSettings::new(" "));
        assert!(matches!(result, Err(EventBusError::ConnectionFailed(_))));
    }

    #[test]
    fn each_bus_gets_its_own_group() {
        let settings = BusSettings::new("localhost:9092").group_prefix("gw");
        let (Ok(a), Ok(b)) = (
            RedpandaEventBus::connect(settings.clone()),
            RedpandaEventBus::connect(settings),
        ) else {
            return;
        };

        assert!(a.consumer_group().starts_with("gw-"));
        assert_ne!(a.consumer_group(), b.consumer_group());
    }

    #[test]
    fn settings_defaults() {
        let settings = BusSettings::new("b1:9092,b2:9092");
        assert_eq!(settings.group_prefix, "gateway");
        assert_eq!(settings.send_timeout, Duration::from_secs(5));
        assert_eq!(settings.offset_reset.as_str(), "latest");
        assert_eq!(
            settings.offset_reset(OffsetReset::Earliest).offset_reset,
            OffsetReset::Earliest
        );
    }

    #[test]
    fn broker_outage_is_connection_loss() {
        let down = KafkaError::MessageConsumption(RDKafkaErrorCode::AllBrokersDown);
        assert!(classify(&down).is_connection_loss());

        let other = KafkaError::MessageConsumption(RDKafkaErrorCode::MessageTimedOut);
        assert!(!classify(&other).is_connection_loss());
    }
}
