//! Static routing table: event kind → handling path.
//!
//! Built once at startup and shared read-only by the dispatch loop.
//!
//! ```
//! use courier_runtime::routing::{Route, RoutingTable};
//!
//! let table = RoutingTable::builder()
//!     .waiter("team_created")
//!     .fragment("player_created", "identity")
//!     .fragment("score_created", "score")
//!     .required_kinds(["identity", "score"])
//!     .correlation_field("id")
//!     .build();
//!
//! assert!(matches!(table.route("team_created"), Some(Route::Waiter)));
//! assert!(table.route("unknown").is_none());
//! ```

use courier_core::error::{CorrelationError, Result};
use courier_core::fragment::CorrelationId;
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Field carrying the fragment payload inside an event's `data`.
pub const MESSAGE_FIELD: &str = "message";

/// Where an event kind is sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// Hand the event data to a blocked waiter.
    Waiter,

    /// Stage the event as a fragment, then try to consolidate.
    Fragment {
        /// Fragment kind the event is stored under (e.g. `"identity"`).
        fragment_kind: String,
        /// Every fragment kind that makes the entity complete.
        required_kinds: Vec<String>,
        /// Field of `data` holding the correlation id.
        correlation_field: String,
    },
}

impl Route {
    /// Extract the correlation id and fragment value from event data.
    ///
    /// The value is `data["message"]` when present (decoded if it is itself a
    /// JSON string), otherwise the whole `data` object.
    ///
    /// # Errors
    ///
    /// Returns [`CorrelationError::MalformedEvent`] for a waiter route or
    /// when the correlation field is missing or not a string/integer.
    pub fn extract_fragment(&self, data: &Map<String, Value>) -> Result<(CorrelationId, Value)> {
        let Self::Fragment {
            correlation_field, ..
        } = self
        else {
            return Err(CorrelationError::MalformedEvent(
                "waiter route carries no fragment".to_string(),
            ));
        };

        let correlation_id = data
            .get(correlation_field)
            .and_then(CorrelationId::from_json)
            .ok_or_else(|| {
                CorrelationError::MalformedEvent(format!(
                    "missing or invalid correlation field '{correlation_field}'"
                ))
            })?;

        let value = match data.get(MESSAGE_FIELD) {
            Some(Value::String(raw)) => {
                serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.clone()))
            }
            Some(other) => other.clone(),
            None => Value::Object(data.clone()),
        };

        Ok((correlation_id, value))
    }
}

/// Immutable map from event kind to [`Route`].
#[derive(Debug, Clone, Default)]
pub struct RoutingTable {
    routes: HashMap<String, Route>,
}

impl RoutingTable {
    /// Start building a table.
    #[must_use]
    pub fn builder() -> RoutingTableBuilder {
        RoutingTableBuilder::default()
    }

    /// Route for `event_kind`, if one is configured.
    #[must_use]
    pub fn route(&self, event_kind: &str) -> Option<&Route> {
        self.routes.get(event_kind)
    }

    /// Route for `event_kind`, or [`CorrelationError::UnroutedEventKind`].
    ///
    /// # Errors
    ///
    /// Returns `UnroutedEventKind` when no route matches.
    pub fn resolve(&self, event_kind: &str) -> Result<&Route> {
        self.route(event_kind)
            .ok_or_else(|| CorrelationError::UnroutedEventKind {
                event_kind: event_kind.to_string(),
            })
    }

    /// Number of configured kinds.
    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Whether no kinds are routed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

/// Builder for [`RoutingTable`].
///
/// Fragment routes share one set of required kinds and one correlation
/// field, applied at [`build`](Self::build).
#[derive(Debug, Default)]
pub struct RoutingTableBuilder {
    waiters: Vec<String>,
    fragments: Vec<(String, String)>,
    required_kinds: Vec<String>,
    correlation_field: Option<String>,
}

impl RoutingTableBuilder {
    /// Route `event_kind` to the waiter registry.
    #[must_use]
    pub fn waiter(mut self, event_kind: impl Into<String>) -> Self {
        self.waiters.push(event_kind.into());
        self
    }

    /// Route `event_kind` to the consolidator as `fragment_kind`.
    #[must_use]
    pub fn fragment(
        mut self,
        event_kind: impl Into<String>,
        fragment_kind: impl Into<String>,
    ) -> Self {
        self.fragments.push((event_kind.into(), fragment_kind.into()));
        self
    }

    /// Fragment kinds that make an entity complete.
    ///
    /// Defaults to every fragment kind registered, in registration order.
    #[must_use]
    pub fn required_kinds<I, S>(mut self, kinds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_kinds = kinds.into_iter().map(Into::into).collect();
        self
    }

    /// Field of the event data holding the correlation id (default `"id"`).
    #[must_use]
    pub fn correlation_field(mut self, field: impl Into<String>) -> Self {
        self.correlation_field = Some(field.into());
        self
    }

    /// Build the table. A kind registered twice keeps its last route.
    #[must_use]
    pub fn build(self) -> RoutingTable {
        let correlation_field = self.correlation_field.unwrap_or_else(|| "id".to_string());
        let required_kinds = if self.required_kinds.is_empty() {
            let mut kinds: Vec<String> = Vec::new();
            for (_, kind) in &self.fragments {
                if !kinds.contains(kind) {
                    kinds.push(kind.clone());
                }
            }
            kinds
        } else {
            self.required_kinds
        };

        let mut routes = HashMap::new();
        for kind in self.waiters {
            routes.insert(kind, Route::Waiter);
        }
        for (event_kind, fragment_kind) in self.fragments {
            routes.insert(
                event_kind,
                Route::Fragment {
                    fragment_kind,
                    required_kinds: required_kinds.clone(),
                    correlation_field: correlation_field.clone(),
                },
            );
        }

        RoutingTable { routes }
    }
}
