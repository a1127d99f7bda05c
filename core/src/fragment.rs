//! Fragments, staging keys and consolidated entities.
//!
//! A fragment is one named piece of a logical entity (e.g. the `identity`
//! or the `score` of a player) that arrives independently of its siblings.
//! Fragments are staged under deterministic keys so producers and consumers
//! agree without a shared schema registry:
//!
//! ```text
//! {domain}_{fragment_kind}_{correlation_id}
//! player_identity_42
//! player_score_42
//! ```
//!
//! Once every required kind is present for a correlation id the fragments
//! are merged into one [`ConsolidatedEntity`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Identifies which fragments belong to the same logical entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Create a correlation id from any string-like value.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Read a correlation id out of a JSON value.
    ///
    /// Strings are taken verbatim and integers are rendered in decimal, so
    /// `"42"` and `42` name the same entity. Anything else yields `None`.
    #[must_use]
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) if !s.trim().is_empty() => Some(Self(s.clone())),
            Value::Number(n) if n.is_i64() || n.is_u64() => Some(Self(n.to_string())),
            _ => None,
        }
    }

    /// Borrow the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CorrelationId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for CorrelationId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Compose the staging key for one fragment.
///
/// # Example
///
/// ```
/// use courier_core::fragment::{fragment_key, CorrelationId};
///
/// let key = fragment_key("player", "score", &CorrelationId::new("42"));
/// assert_eq!(key, "player_score_42");
/// ```
#[must_use]
pub fn fragment_key(domain: &str, kind: &str, correlation_id: &CorrelationId) -> String {
    format!("{domain}_{kind}_{correlation_id}")
}

/// The merged result of all required fragments for one correlation id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsolidatedEntity {
    /// Correlation id the fragments were staged under
    pub correlation_id: CorrelationId,
    /// Merged fields of every fragment
    pub fields: Map<String, Value>,
    /// When the entity was assembled
    pub consolidated_at: DateTime<Utc>,
}

impl ConsolidatedEntity {
    /// Merge raw staged fragment values into one entity.
    ///
    /// `fragments` are `(kind, stored value)` pairs in the order the caller
    /// listed the required kinds. Object fragments contribute their fields,
    /// later kinds overwriting equal field names. Any other JSON value lands
    /// under a field named after its kind. A stored value that is not valid
    /// JSON is kept as a JSON string.
    #[must_use]
    pub fn merge<'a, I>(correlation_id: CorrelationId, fragments: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, String)>,
    {
        let mut fields = Map::new();

        for (kind, raw) in fragments {
            match parse_stored(raw) {
                Value::Object(object) => fields.extend(object),
                other => {
                    fields.insert(kind.to_string(), other);
                }
            }
        }

        Self {
            correlation_id,
            fields,
            consolidated_at: Utc::now(),
        }
    }

    /// Entity fields as a JSON object value.
    #[must_use]
    pub fn to_value(&self) -> Value {
        Value::Object(self.fields.clone())
    }
}

fn parse_stored(raw: String) -> Value {
    serde_json::from_str(&raw).unwrap_or(Value::String(raw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn merges_object_fragments() {
        let entity = ConsolidatedEntity::merge(
            CorrelationId::new("42"),
            [
                ("identity", r#"{"name":"Alice"}"#.to_string()),
                ("score", r#"{"score":10}"#.to_string()),
            ],
        );

        assert_eq!(entity.to_value(), json!({"name": "Alice", "score": 10}));
        assert_eq!(entity.correlation_id.as_str(), "42");
    }

    #[test]
    fn later_kind_wins_on_field_clash() {
        let entity = ConsolidatedEntity::merge(
            CorrelationId::new("1"),
            [
                ("identity", r#"{"name":"Alice","rank":1}"#.to_string()),
                ("score", r#"{"rank":3}"#.to_string()),
            ],
        );

        assert_eq!(entity.fields["rank"], json!(3));
    }

    #[test]
    fn scalar_and_plain_text_fragments_are_keyed_by_kind() {
        let entity = ConsolidatedEntity::merge(
            CorrelationId::new("7"),
            [
                ("score", "10".to_string()),
                ("note", "not json".to_string()),
            ],
        );

        assert_eq!(entity.to_value(), json!({"score": 10, "note": "not json"}));
    }

    #[test]
    fn correlation_id_from_json() {
        assert_eq!(
            CorrelationId::from_json(&json!("abc")),
            Some(CorrelationId::new("abc"))
        );
        assert_eq!(
            CorrelationId::from_json(&json!(42)),
            Some(CorrelationId::new("42"))
        );
        assert_eq!(CorrelationId::from_json(&json!(1.5)), None);
        assert_eq!(CorrelationId::from_json(&json!("")), None);
        assert_eq!(CorrelationId::from_json(&json!(null)), None);
    }

    proptest! {
        #[test]
        fn key_is_deterministic_and_ordered(
            domain in "[a-z]{1,8}",
            kind in "[a-z]{1,8}",
            id in "[0-9a-f]{1,12}",
        ) {
            let correlation_id = CorrelationId::new(id.clone());
            let key = fragment_key(&domain, &kind, &correlation_id);

            prop_assert_eq!(&key, &fragment_key(&domain, &kind, &correlation_id));
            prop_assert_eq!(key, format!("{domain}_{kind}_{id}"));
        }

        #[test]
        fn distinct_kinds_never_share_a_key(
            kind_a in "[a-z]{1,8}",
            kind_b in "[a-z]{1,8}",
            id in "[0-9]{1,6}",
        ) {
            prop_assume!(kind_a != kind_b);
            let correlation_id = CorrelationId::new(id);
            prop_assert_ne!(
                fragment_key("player", &kind_a, &correlation_id),
                fragment_key("player", &kind_b, &correlation_id)
            );
        }
    }
}
