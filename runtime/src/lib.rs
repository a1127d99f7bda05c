//! # Courier Runtime
//!
//! The asynchronous correlation and consolidation engine.
//!
//! ## Core Components
//!
//! - **[`WaiterRegistry`]**: lets a request block on a future broadcast event
//! - **[`Consolidator`]**: merges independently arriving fragments exactly once
//! - **[`DispatchLoop`]**: consumes the bus and routes events per [`RoutingTable`]
//! - **[`metrics`]**: Prometheus counters for drops, deliveries and consolidations
//!
//! ## Example
//!
//! ```ignore
//! use courier_runtime::{Consolidator, DispatchLoop, RoutingTable, WaiterRegistry};
//!
//! let registry = WaiterRegistry::new();
//! let consolidator = Consolidator::new("player", store, notifier);
//! let routes = RoutingTable::builder()
//!     .waiter("team_created")
//!     .fragment("player_created", "identity")
//!     .fragment("score_created", "score")
//!     .build();
//!
//! let dispatch = DispatchLoop::new(
//!     topics,
//!     event_bus,
//!     registry.clone(),
//!     consolidator,
//!     Arc::new(routes),
//! );
//! let handle = dispatch.spawn(shutdown_rx);
//!
//! // In a request handler:
//! let waiter = registry.register("team_created")?;
//! team_service.create_team(...).await?;
//! let data = waiter.wait(Duration::from_secs(5)).await?;
//! ```

/// Fragment staging and consolidation
pub mod consolidator;

/// Broadcast bus consumer
pub mod dispatch;

/// Readiness reporting
pub mod health;

/// Prometheus metrics for observability
pub mod metrics;

/// Event kind routing
pub mod routing;

/// Request/event bridging
pub mod waiters;

pub use consolidator::Consolidator;
pub use dispatch::{DispatchLoop, DispatchOutcome, DispatchState};
pub use health::{HealthCheck, HealthReport, HealthStatus};
pub use metrics::{CorrelationMetrics, DropReason, MetricsExporter};
pub use routing::{Route, RoutingTable};
pub use waiters::{WaiterHandle, WaiterRegistry};
