//! API gateway built on the Courier correlation engine.
//!
//! The gateway turns asynchronous, event-driven upstream workflows back into
//! synchronous HTTP responses:
//!
//! ```text
//!  client ──POST /api/team/create──► gateway ──GraphQL──► team service
//!                                       ▲                      │
//!                                       │ team_created         │ publishes
//!                                       └──── broadcast bus ◄──┘
//! ```
//!
//! Every replica consumes every event. The replica holding the waiter
//! answers the request; fragment events (`player_created`, `score_created`)
//! are staged in Redis and consolidated exactly once across replicas, then
//! pushed to the frontend service.
//!
//! # Modules
//!
//! - [`config`]: environment configuration
//! - [`upstream`]: GraphQL clients for the team and rating services
//! - [`notifier`]: HTTP sink for consolidated entities
//! - [`api`]: request handlers
//! - [`server`]: router and shared state

pub mod api;
pub mod config;
pub mod notifier;
pub mod server;
pub mod upstream;
