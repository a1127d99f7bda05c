//! In-memory staging store and recording notifier.
//!
//! - [`InMemoryStagingStore`]: HashMap-backed [`StagingStore`] whose claim is
//!   atomic under one lock
//! - [`RecordingNotifier`]: captures every entity and event it is asked to
//!   deliver

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Lock poisoning only happens after a test already panicked

use courier_core::fragment::ConsolidatedEntity;
use courier_core::notifier::{Notifier, NotifyError, NotifyFuture};
use courier_core::store::{StagingStore, StoreError, StoreFuture};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};

/// In-memory staging store for fast, deterministic testing.
///
/// Shares its map across clones, so one instance can stand in for the store
/// shared by several engine "replicas" in a test.
///
/// # Example
///
/// ```
/// use courier_testing::InMemoryStagingStore;
/// use courier_core::store::StagingStore;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = InMemoryStagingStore::new();
/// store.set("player_score_42", r#"{"score":10}"#).await?;
///
/// let claimed = store.claim_all(&["player_score_42".to_string()]).await?;
/// assert!(claimed.is_some());
/// assert!(store.is_empty());
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemoryStagingStore {
    data: Arc<RwLock<HashMap<String, String>>>,
    failing: Arc<AtomicBool>,
    claims: Arc<AtomicUsize>,
}

impl InMemoryStagingStore {
    /// Create a new empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent operation fail with a connection error
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of stored keys
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.read().unwrap().len()
    }

    /// Check if the store is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.read().unwrap().is_empty()
    }

    /// Check if a key exists
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.data.read().unwrap().contains_key(key)
    }

    /// Synchronous peek at a value, for assertions
    #[must_use]
    pub fn peek(&self, key: &str) -> Option<String> {
        self.data.read().unwrap().get(key).cloned()
    }

    /// How many claims succeeded
    #[must_use]
    pub fn successful_claims(&self) -> usize {
        self.claims.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            Err(StoreError::Connection("in-memory store set to fail".to_string()))
        } else {
            Ok(())
        }
    }
}

impl StagingStore for InMemoryStagingStore {
    fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<String>> {
        Box::pin(async move {
            self.check_available()?;
            Ok(self.data.read().unwrap().get(key).cloned())
        })
    }

    fn set<'a>(&'a self, key: &'a str, value: &'a str) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            self.check_available()?;
            self.data
                .write()
                .unwrap()
                .insert(key.to_string(), value.to_string());
            Ok(())
        })
    }

    fn claim_all<'a>(&'a self, keys: &'a [String]) -> StoreFuture<'a, Option<Vec<String>>> {
        Box::pin(async move {
            self.check_available()?;

            // One write lock spans the check and the removal.
            let mut data = self.data.write().unwrap();
            if !keys.iter().all(|key| data.contains_key(key)) {
                return Ok(None);
            }

            let values = keys
                .iter()
                .filter_map(|key| data.remove(key))
                .collect::<Vec<_>>();
            self.claims.fetch_add(1, Ordering::SeqCst);
            Ok(Some(values))
        })
    }
}

/// Notifier that records every entity instead of sending it anywhere.
///
/// # Example
///
/// ```
/// use courier_testing::RecordingNotifier;
///
/// let notifier = RecordingNotifier::new();
/// notifier.set_failing(true); // every notify now returns an error
/// assert!(notifier.entities().is_empty());
/// ```
#[derive(Clone, Debug, Default)]
pub struct RecordingNotifier {
    entities: Arc<Mutex<Vec<ConsolidatedEntity>>>,
    forwarded: Arc<Mutex<Vec<(String, Map<String, Value>)>>>,
    attempts: Arc<AtomicUsize>,
    failing: Arc<AtomicBool>,
}

impl RecordingNotifier {
    /// Create a notifier that accepts everything
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent notifications fail (they are still counted as attempts)
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Entities successfully delivered so far
    #[must_use]
    pub fn entities(&self) -> Vec<ConsolidatedEntity> {
        self.entities.lock().unwrap().clone()
    }

    /// Event payloads successfully forwarded so far, with their kind
    #[must_use]
    pub fn forwarded(&self) -> Vec<(String, Map<String, Value>)> {
        self.forwarded.lock().unwrap().clone()
    }

    fn attempt(&self) -> Result<(), NotifyError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(NotifyError::Rejected {
                status: 503,
                body: "recording notifier set to fail".to_string(),
            });
        }
        Ok(())
    }

    /// Number of notify and forward calls, successful or not
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl Notifier for RecordingNotifier {
    fn notify<'a>(&'a self, entity: &'a ConsolidatedEntity) -> NotifyFuture<'a> {
        Box::pin(async move {
            self.attempt()?;
            self.entities.lock().unwrap().push(entity.clone());
            Ok(())
        })
    }

    fn forward<'a>(
        &'a self,
        event_kind: &'a str,
        payload: &'a Map<String, Value>,
    ) -> NotifyFuture<'a> {
        Box::pin(async move {
            self.attempt()?;
            self.forwarded
                .lock()
                .unwrap()
                .push((event_kind.to_string(), payload.clone()));
            Ok(())
        })
    }
}
