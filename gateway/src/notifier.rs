//! HTTP sink for consolidated entities and forwarded events.

use courier_core::fragment::ConsolidatedEntity;
use courier_core::notifier::{Notifier, NotifyError, NotifyFuture};
use serde::Serialize;
use serde_json::{Map, Value};
use std::time::Duration;

const MAX_ERROR_BODY: usize = 512;

/// POSTs JSON to the frontend service: a consolidated entity's fields, or a
/// forwarded event's data as is.
#[derive(Clone, Debug)]
pub struct HttpNotifier {
    http: reqwest::Client,
    url: String,
}

impl HttpNotifier {
    /// Notifier posting to `url` with a per-request `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`NotifyError::Transport`] if the HTTP client cannot be built.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, NotifyError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| NotifyError::Transport(e.to_string()))?;

        Ok(Self {
            http,
            url: url.into(),
        })
    }

    /// Sink URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    async fn post(&self, body: &impl Serialize) -> Result<(), NotifyError> {
        let response = self
            .http
            .post(&self.url)
            .json(body)
            .send()
            .await
            .map_err(|e| NotifyError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::Rejected {
                status: status.as_u16(),
                body: body.chars().take(MAX_ERROR_BODY).collect(),
            });
        }
        Ok(())
    }
}

impl Notifier for HttpNotifier {
    fn notify<'a>(&'a self, entity: &'a ConsolidatedEntity) -> NotifyFuture<'a> {
        Box::pin(async move {
            self.post(&entity.fields).await?;
            tracing::info!(
                correlation_id = %entity.correlation_id,
                url = %self.url,
                "Consolidated entity delivered"
            );
            Ok(())
        })
    }

    fn forward<'a>(
        &'a self,
        event_kind: &'a str,
        payload: &'a Map<String, Value>,
    ) -> NotifyFuture<'a> {
        Box::pin(async move {
            self.post(payload).await?;
            tracing::info!(event_kind, url = %self.url, "Event forwarded");
            Ok(())
        })
    }
}
