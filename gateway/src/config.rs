//! Configuration management for the gateway.
//!
//! Loads configuration from environment variables with sensible defaults.
//! Numeric values that fail to parse fall back to their default; only the
//! route lists can make loading fail.

use courier_runtime::RoutingTable;
use std::env;
use std::time::Duration;
use thiserror::Error;

/// Errors raised while loading configuration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A `FRAGMENT_ROUTES` entry is not `event_kind=fragment_kind`
    #[error("Invalid fragment route '{0}', expected event_kind=fragment_kind")]
    InvalidFragmentRoute(String),

    /// A required fragment kind no route produces
    #[error("Required fragment kind '{0}' has no fragment route")]
    UnknownRequiredFragment(String),

    /// A route produces a fragment kind consolidation never claims
    #[error("Fragment kind '{0}' is produced by a route but not listed in REQUIRED_FRAGMENTS")]
    UnclaimedFragment(String),
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP server configuration
    pub server: ServerConfig,
    /// Upstream services (team, rating, frontend sink)
    pub upstream: UpstreamConfig,
    /// Broadcast bus configuration
    pub broker: BrokerConfig,
    /// Staging store configuration
    pub cache: CacheConfig,
    /// Waiter and fragment routing
    pub correlation: CorrelationConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host to bind to (default: 0.0.0.0)
    pub host: String,
    /// Port to bind to (default: 8000)
    pub port: u16,
    /// Prefix of every API route (default: /api)
    pub api_prefix: String,
    /// Default log filter when `RUST_LOG` is unset (default: info)
    pub log_level: String,
}

/// Upstream service configuration
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    /// GraphQL endpoint of the team service
    pub team_service_url: String,
    /// GraphQL endpoint of the rating service
    pub rating_service_url: String,
    /// Frontend sink receiving consolidated entities
    pub frontend_url: String,
    /// Per-request timeout for every upstream call
    pub timeout: Duration,
}

/// Broadcast bus configuration
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Broker addresses (comma-separated)
    pub brokers: String,
    /// Topic every replica consumes
    pub topic: String,
    /// Consumer group prefix; each process appends a random suffix
    pub consumer_group_prefix: String,
    /// Fixed delay between reconnect attempts
    pub reconnect_backoff: Duration,
}

/// Staging store configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Redis connection URL
    pub url: String,
    /// Key prefix of staged fragments
    pub domain: String,
    /// Expiry applied on every fragment write (`None` = never expire)
    pub fragment_ttl: Option<Duration>,
}

/// Waiter and fragment routing configuration
#[derive(Debug, Clone)]
pub struct CorrelationConfig {
    /// How long a request blocks on its event
    pub await_timeout: Duration,
    /// Event kinds delivered to waiters
    pub waiter_event_kinds: Vec<String>,
    /// `(event_kind, fragment_kind)` pairs routed to the consolidator
    pub fragment_routes: Vec<(String, String)>,
    /// Fragment kinds that make an entity complete, in merge order
    pub required_fragments: Vec<String>,
    /// Event data field holding the correlation id
    pub correlation_field: String,
}

impl Config {
    /// Load configuration from the process environment.
    ///
    /// Call `dotenvy::dotenv()` first to pick up a `.env` file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the fragment routing lists are invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the fragment routing lists are invalid.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let string = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());
        let secs = |key: &str, default: u64| {
            Duration::from_secs(
                lookup(key)
                    .and_then(|s| s.trim().parse().ok())
                    .unwrap_or(default),
            )
        };

        let api_prefix = string("API_PREFIX", "/api");
        let graphql_url = |host: &str, port: &str| {
            format!(
                "http://{}:{}{api_prefix}/graphql",
                string(host, "localhost"),
                string(port, "8000")
            )
        };

        let fragment_routes = parse_fragment_routes(&string(
            "FRAGMENT_ROUTES",
            "player_created=identity,score_created=score",
        ))?;
        let required_fragments = parse_list(&string("REQUIRED_FRAGMENTS", "identity,score"));
        if let Some(unknown) = required_fragments
            .iter()
            .find(|kind| !fragment_routes.iter().any(|(_, fragment)| fragment == *kind))
        {
            return Err(ConfigError::UnknownRequiredFragment(unknown.clone()));
        }
        // Unclaimed fragments would stay staged forever
        if let Some((_, unclaimed)) = fragment_routes
            .iter()
            .find(|(_, fragment)| !required_fragments.contains(fragment))
        {
            return Err(ConfigError::UnclaimedFragment(unclaimed.clone()));
        }

        Ok(Self {
            server: ServerConfig {
                host: string("APP_HOST", "0.0.0.0"),
                port: lookup("APP_PORT")
                    .and_then(|s| s.trim().parse().ok())
                    .unwrap_or(8000),
                log_level: string("LOG_LEVEL", "info"),
                api_prefix: api_prefix.clone(),
            },
            upstream: UpstreamConfig {
                team_service_url: graphql_url("TEAM_SERVICE_HOST", "TEAM_SERVICE_PORT"),
                rating_service_url: graphql_url("RATING_SERVICE_HOST", "RATING_SERVICE_PORT"),
                frontend_url: format!(
                    "http://{}:{}",
                    string("FRONTEND_SERVICE_HOST", "localhost"),
                    string("FRONTEND_SERVICE_PORT", "3000")
                ),
                timeout: secs("UPSTREAM_TIMEOUT_SECS", 5),
            },
            broker: BrokerConfig {
                brokers: string("BROKER_URL", "localhost:9092"),
                topic: string("EXCHANGE_NAME", "gateway-events"),
                consumer_group_prefix: string("CONSUMER_GROUP_PREFIX", "gateway"),
                reconnect_backoff: secs("RECONNECT_BACKOFF_SECS", 5),
            },
            cache: CacheConfig {
                url: string("CACHE_URL", "redis://127.0.0.1:6379"),
                domain: string("CACHE_DOMAIN", "player"),
                fragment_ttl: lookup("FRAGMENT_TTL_SECS")
                    .and_then(|s| s.trim().parse().ok())
                    .filter(|secs| *secs > 0)
                    .map(Duration::from_secs),
            },
            correlation: CorrelationConfig {
                await_timeout: secs("AWAIT_TIMEOUT_SECS", 5),
                waiter_event_kinds: parse_list(&string(
                    "WAITER_EVENT_KINDS",
                    "team_created,team_joined",
                )),
                fragment_routes,
                required_fragments,
                correlation_field: string("CORRELATION_FIELD", "id"),
            },
        })
    }

    /// Socket address the HTTP server binds to.
    #[must_use]
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// Build the static routing table from the correlation section.
    #[must_use]
    pub fn routing_table(&self) -> RoutingTable {
        let correlation = &self.correlation;
        let mut builder = RoutingTable::builder();
        for kind in &correlation.waiter_event_kinds {
            builder = builder.waiter(kind.clone());
        }
        for (event_kind, fragment_kind) in &correlation.fragment_routes {
            builder = builder.fragment(event_kind.clone(), fragment_kind.clone());
        }
        builder
            .required_kinds(correlation.required_fragments.iter().cloned())
            .correlation_field(correlation.correlation_field.clone())
            .build()
    }
}

/// Split a comma-separated list, dropping blanks.
fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(ToString::to_string)
        .collect()
}

fn parse_fragment_routes(raw: &str) -> Result<Vec<(String, String)>, ConfigError> {
    parse_list(raw)
        .into_iter()
        .map(|entry| match entry.split_once('=') {
            Some((event_kind, fragment_kind))
                if !event_kind.trim().is_empty() && !fragment_kind.trim().is_empty() =>
            {
                Ok((event_kind.trim().to_string(), fragment_kind.trim().to_string()))
            }
            _ => Err(ConfigError::InvalidFragmentRoute(entry)),
        })
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use courier_runtime::Route;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_without_environment() {
        let config = load(&[]).unwrap();

        assert_eq!(config.bind_address(), "0.0.0.0:8000");
        assert_eq!(config.server.api_prefix, "/api");
        assert_eq!(config.broker.topic, "gateway-events");
        assert_eq!(config.broker.reconnect_backoff, Duration::from_secs(5));
        assert_eq!(config.cache.domain, "player");
        assert_eq!(config.cache.fragment_ttl, None);
        assert_eq!(config.correlation.await_timeout, Duration::from_secs(5));
        assert_eq!(config.correlation.waiter_event_kinds, ["team_created", "team_joined"]);
        assert_eq!(config.correlation.required_fragments, ["identity", "score"]);
    }

    #[test]
    fn upstream_urls_include_api_prefix() {
        let config = load(&[
            ("API_PREFIX", "/v1"),
            ("TEAM_SERVICE_HOST", "teams"),
            ("TEAM_SERVICE_PORT", "8001"),
            ("RATING_SERVICE_HOST", "ratings"),
            ("RATING_SERVICE_PORT", "8002"),
            ("FRONTEND_SERVICE_HOST", "frontend"),
            ("FRONTEND_SERVICE_PORT", "80"),
        ])
        .unwrap();

        assert_eq!(config.upstream.team_service_url, "http://teams:8001/v1/graphql");
        assert_eq!(config.upstream.rating_service_url, "http://ratings:8002/v1/graphql");
        assert_eq!(config.upstream.frontend_url, "http://frontend:80");
    }

    #[test]
    fn unparsable_numbers_fall_back_to_defaults() {
        let config = load(&[("APP_PORT", "eighty"), ("AWAIT_TIMEOUT_SECS", "-1")]).unwrap();

        assert_eq!(config.server.port, 8000);
        assert_eq!(config.correlation.await_timeout, Duration::from_secs(5));
    }

    #[test]
    fn fragment_ttl_is_optional() {
        assert_eq!(
            load(&[("FRAGMENT_TTL_SECS", "3600")]).unwrap().cache.fragment_ttl,
            Some(Duration::from_secs(3600))
        );
        assert_eq!(load(&[("FRAGMENT_TTL_SECS", "0")]).unwrap().cache.fragment_ttl, None);
    }

    #[test]
    fn malformed_fragment_route_is_rejected() {
        let err =
            load(&[("FRAGMENT_ROUTES", "player_created=identity,score_created")]).unwrap_err();
        assert_eq!(err, ConfigError::InvalidFragmentRoute("score_created".to_string()));
    }

    #[test]
    fn required_fragment_needs_a_route() {
        let err = load(&[("REQUIRED_FRAGMENTS", "identity,avatar")]).unwrap_err();
        assert_eq!(err, ConfigError::UnknownRequiredFragment("avatar".to_string()));
    }

    #[test]
    fn routed_fragment_must_be_required() {
        let err = load(&[(
            "FRAGMENT_ROUTES",
            "player_created=identity,score_created=score,badge_created=badge",
        )])
        .unwrap_err();
        assert_eq!(err, ConfigError::UnclaimedFragment("badge".to_string()));
    }

    #[test]
    fn routing_table_from_defaults() {
        let table = load(&[]).unwrap().routing_table();

        assert_eq!(table.len(), 4);
        assert_eq!(table.route("team_joined"), Some(&Route::Waiter));
        assert_eq!(
            table.route("score_created"),
            Some(&Route::Fragment {
                fragment_kind: "score".to_string(),
                required_kinds: vec!["identity".to_string(), "score".to_string()],
                correlation_field: "id".to_string(),
            })
        );
    }
}
