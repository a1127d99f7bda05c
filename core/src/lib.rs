//! # Courier Core
//!
//! Core traits and types for the asynchronous correlation and consolidation
//! engine that sits behind the API gateway.
//!
//! The engine bridges two kinds of asynchrony back into synchronous request
//! handling:
//!
//! - **Request/response bridging**: a caller blocks on a future broadcast
//!   event of a given kind, with a timeout.
//! - **Fragment-merge bridging**: independently arriving fragments of one
//!   logical entity are staged and merged exactly once.
//!
//! This crate holds only the vocabulary; the machinery lives in
//! `courier-runtime`, and the transports in `courier-redis` and
//! `courier-redpanda`.
//!
//! ## Modules
//!
//! - [`event`]: wire envelope `{ "event_kind", "data" }`
//! - [`event_bus`]: [`EventBus`](event_bus::EventBus) trait and acked deliveries
//! - [`store`]: [`StagingStore`](store::StagingStore) with atomic claim
//! - [`notifier`]: [`Notifier`](notifier::Notifier) for the frontend sink
//! - [`fragment`]: correlation ids, staging keys, consolidated entities
//! - [`error`]: the engine's error taxonomy

pub mod error;
pub mod event;
pub mod event_bus;
pub mod fragment;
pub mod notifier;
pub mod store;

pub use error::{CorrelationError, Result};
pub use event::{EventEnvelope, EventError};
pub use event_bus::{Delivery, DeliveryStream, EventBus, EventBusError};
pub use fragment::{ConsolidatedEntity, CorrelationId, fragment_key};
pub use notifier::{Notifier, NotifyError, NotifyFuture};
pub use store::{StagingStore, StoreError, StoreFuture, StoreResult};
