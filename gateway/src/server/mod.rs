//! HTTP server module for the gateway.
//!
//! Contains router configuration and application state.

pub mod routes;
pub mod state;

pub use routes::build_router;
pub use state::AppState;
