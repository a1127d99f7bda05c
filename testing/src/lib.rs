//! # Courier Testing
//!
//! Testing utilities for the Courier correlation engine.
//!
//! This crate provides in-memory stand-ins for the three external
//! collaborators the engine consumes:
//!
//! - [`InMemoryEventBus`]: broadcast bus with injectable disconnects
//! - [`InMemoryStagingStore`]: staging store with an atomic claim
//! - [`RecordingNotifier`]: captures consolidated entities
//!
//! ## Example
//!
//! ```ignore
//! use courier_testing::{InMemoryStagingStore, RecordingNotifier};
//! use courier_runtime::Consolidator;
//!
//! #[tokio::test]
//! async fn consolidates_player() {
//!     let store = Arc::new(InMemoryStagingStore::new());
//!     let notifier = Arc::new(RecordingNotifier::new());
//!     let consolidator = Consolidator::new("player", store, notifier.clone());
//!     // ...
//! }
//! ```

pub mod bus_mocks;
pub mod staging_mocks;

/// Tracing helpers for tests.
pub mod helpers {
    /// Install a test-friendly tracing subscriber once per process.
    ///
    /// Honors `RUST_LOG`; output is captured by the test harness.
    pub fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "courier=debug".into()),
            )
            .with_test_writer()
            .try_init();
    }
}

pub use bus_mocks::InMemoryEventBus;
pub use staging_mocks::{InMemoryStagingStore, RecordingNotifier};
