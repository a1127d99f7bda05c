//! Axum integration for the Courier correlation engine.
//!
//! Gateway handlers block on broadcast events through the runtime's
//! `WaiterRegistry`, so most of what can go wrong surfaces as a
//! [`CorrelationError`](courier_core::CorrelationError). This crate turns
//! those into HTTP responses and provides the health endpoints every replica exposes:
//!
//! - [`AppError`]: one error type for handlers, with `From` conversions
//! - [`handlers::health`]: liveness, readiness over the dispatch loop
//!   state, and the Prometheus scrape endpoint
//!
//! # Example
//!
//! ```ignore
//! use courier_web::{AppError, WebResult};
//! use axum::{Json, extract::State};
//!
//! async fn create_team(
//!     State(state): State<AppState>,
//!     Json(request): Json<TeamRequest>,
//! ) -> WebResult<Json<serde_json::Value>> {
//!     let waiter = state.registry.register("team_created")?;
//!     state.teams.create_team(&request).await?;
//!     Ok(Json(waiter.wait(state.await_timeout).await?))
//! }
//! ```

pub mod error;
pub mod handlers;

pub use error::AppError;
pub use handlers::health::ReadinessWatch;

/// Result type alias for web handlers.
pub type WebResult<T> = Result<T, AppError>;
