//! HTTP request handlers shared by every gateway replica.

pub mod health;

pub use health::{health_check, metrics, readiness};
