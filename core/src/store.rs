//! Staging store abstraction.
//!
//! The staging store is the only state shared between gateway replicas.
//! Fragments are written to it as they arrive and claimed from it when an
//! entity is complete.
//!
//! # Atomic claim
//!
//! Plain `GET` + `SET` is not enough once more than one replica observes
//! the same fragments: two observers could both read a complete set and
//! both emit the entity. [`StagingStore::claim_all`] closes that gap. It
//! reads every key and deletes them as one unit, and only when all of them
//! are present:
//!
//! ```text
//! claim_all([a, b])
//!   a, b present  → Some([va, vb]), a and b deleted
//!   b missing     → None, a untouched
//!   concurrently  → at most one caller gets Some
//! ```

use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors from staging store operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Could not reach the store
    #[error("Staging store connection error: {0}")]
    Connection(String),

    /// The store rejected or failed a command
    #[error("Staging store command '{command}' failed: {reason}")]
    Command {
        /// Command that failed (`GET`, `SET`, `CLAIM`)
        command: &'static str,
        /// Reason reported by the store
        reason: String,
    },
}

/// Result type for staging store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Boxed future returned by [`StagingStore`] methods.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = StoreResult<T>> + Send + 'a>>;

/// Key/value staging store shared by every gateway replica.
///
/// Uses boxed futures so the consolidator can hold an `Arc<dyn StagingStore>`.
pub trait StagingStore: Send + Sync {
    /// Read a value, `None` if the key is absent.
    fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<String>>;

    /// Upsert a value.
    fn set<'a>(&'a self, key: &'a str, value: &'a str) -> StoreFuture<'a, ()>;

    /// Atomically read and delete every key, only if all are present.
    ///
    /// Values are returned in the order of `keys`. When any key is missing
    /// nothing is modified and `None` is returned.
    fn claim_all<'a>(&'a self, keys: &'a [String]) -> StoreFuture<'a, Option<Vec<String>>>;
}
