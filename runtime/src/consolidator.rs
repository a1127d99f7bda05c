//! Consolidator: merge independently arriving fragments exactly once.
//!
//! Producers write fragments (`identity`, `score`, ...) for a correlation id
//! as they arrive. After each write the consolidator attempts to claim the
//! complete set from the staging store:
//!
//! ```text
//! write_fragment(42, identity) ──► SET player_identity_42
//! try_consolidate(42)          ──► claim_all → None (score missing)
//! write_fragment(42, score)    ──► SET player_score_42
//! try_consolidate(42)          ──► claim_all → Some → merge → notify once
//! ```
//!
//! The read-check-clear step is the store's atomic `claim_all`, so any number
//! of concurrent attempts (in this process or on other replicas) yield at
//! most one entity per complete set.

use crate::metrics::CorrelationMetrics;
use crate::routing::Route;
use courier_core::error::{CorrelationError, Result};
use courier_core::fragment::{ConsolidatedEntity, CorrelationId, fragment_key};
use courier_core::notifier::Notifier;
use courier_core::store::StagingStore;
use serde_json::{Map, Value};
use std::sync::Arc;

/// Stages fragments and assembles complete entities.
#[derive(Clone)]
pub struct Consolidator {
    domain: String,
    store: Arc<dyn StagingStore>,
    notifier: Arc<dyn Notifier>,
}

impl Consolidator {
    /// Create a consolidator for one staging `domain` (the key prefix).
    #[must_use]
    pub fn new(
        domain: impl Into<String>,
        store: Arc<dyn StagingStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            domain: domain.into(),
            store,
            notifier,
        }
    }

    /// Staging domain used as key prefix.
    #[must_use]
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Staging key for one fragment of `correlation_id`.
    #[must_use]
    pub fn key_for(&self, kind: &str, correlation_id: &CorrelationId) -> String {
        fragment_key(&self.domain, kind, correlation_id)
    }

    /// Upsert a fragment. Writing the same kind twice keeps the latest value.
    ///
    /// # Errors
    ///
    /// Returns `CorrelationError::Store` if the staging store fails.
    pub async fn write_fragment(
        &self,
        correlation_id: &CorrelationId,
        kind: &str,
        value: &Value,
    ) -> Result<()> {
        let key = self.key_for(kind, correlation_id);
        let encoded = value.to_string();

        self.store.set(&key, &encoded).await?;

        CorrelationMetrics::record_fragment_written(kind);
        tracing::debug!(
            correlation_id = %correlation_id,
            fragment_kind = kind,
            key = %key,
            "Fragment staged"
        );
        Ok(())
    }

    /// Claim and merge every required fragment if all are present.
    ///
    /// On success the fragments are cleared, the entity is sent to the
    /// notifier once and returned. A notifier failure is logged only; the
    /// entity is still returned and never re-queued. If any fragment is
    /// missing nothing is modified and `None` is returned.
    ///
    /// # Errors
    ///
    /// Returns `CorrelationError::Store` if the staging store fails.
    pub async fn try_consolidate(
        &self,
        correlation_id: &CorrelationId,
        required_kinds: &[String],
    ) -> Result<Option<ConsolidatedEntity>> {
        if required_kinds.is_empty() {
            return Ok(None);
        }

        let keys: Vec<String> = required_kinds
            .iter()
            .map(|kind| self.key_for(kind, correlation_id))
            .collect();

        let Some(values) = self.store.claim_all(&keys).await? else {
            tracing::debug!(
                correlation_id = %correlation_id,
                required = ?required_kinds,
                "Fragments incomplete, nothing consolidated"
            );
            return Ok(None);
        };

        let entity = ConsolidatedEntity::merge(
            correlation_id.clone(),
            required_kinds.iter().map(String::as_str).zip(values),
        );

        CorrelationMetrics::record_consolidation();
        tracing::info!(
            correlation_id = %correlation_id,
            fields = entity.fields.len(),
            "Entity consolidated"
        );

        if let Err(e) = self.notifier.notify(&entity).await {
            CorrelationMetrics::record_notify_failure();
            tracing::error!(
                correlation_id = %correlation_id,
                error = %e,
                "Downstream notification failed; entity will not be retried"
            );
        }

        Ok(Some(entity))
    }

    /// Stage the fragment carried by event `data` along a fragment `route`,
    /// then try to consolidate its correlation id.
    ///
    /// Shared by the dispatch loop and the HTTP fragment endpoints.
    ///
    /// # Errors
    ///
    /// Returns `CorrelationError::MalformedEvent` for a waiter route or data
    /// without a usable correlation id, and `CorrelationError::Store` if the
    /// staging store fails.
    pub async fn stage(
        &self,
        route: &Route,
        data: &Map<String, Value>,
    ) -> Result<Option<ConsolidatedEntity>> {
        let (correlation_id, value) = route.extract_fragment(data)?;
        let Route::Fragment {
            fragment_kind,
            required_kinds,
            ..
        } = route
        else {
            return Err(CorrelationError::MalformedEvent(
                "waiter route carries no fragment".to_string(),
            ));
        };

        self.write_fragment(&correlation_id, fragment_kind, &value)
            .await?;
        self.try_consolidate(&correlation_id, required_kinds).await
    }
}
