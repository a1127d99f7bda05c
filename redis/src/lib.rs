//! # Courier Redis
//!
//! [`StagingStore`] backed by Redis.
//!
//! Fragments are plain string keys (`player_identity_42`), written with
//! `SET` or, when a fragment TTL is configured, `SET ... EX`. The atomic
//! claim runs as a server-side Lua script, so the read-check-delete
//! sequence cannot interleave with another replica's claim:
//!
//! ```text
//! EVALSHA claim  KEYS = [player_identity_42, player_score_42]
//!   any GET nil → return nil (nothing deleted)
//!   else        → DEL all keys, return values
//! ```
//!
//! # Example
//!
//! ```no_run
//! use courier_redis::RedisStagingStore;
//! use courier_core::store::StagingStore;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let ttl = Some(Duration::from_secs(3600));
//! let store = RedisStagingStore::new("redis://127.0.0.1:6379", ttl).await?;
//! store.set("player_score_42", r#"{"score":10}"#).await?;
//! # Ok(())
//! # }
//! ```

use courier_core::store::{StagingStore, StoreError, StoreFuture, StoreResult};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, Script};
use std::time::Duration;

const CLAIM_SCRIPT: &str = r"
local values = {}
for i, key in ipairs(KEYS) do
    local value = redis.call('GET', key)
    if not value then
        return false
    end
    values[i] = value
end
redis.call('DEL', unpack(KEYS))
return values
";

/// Redis-backed staging store.
///
/// Cheap to clone: clones share the underlying `ConnectionManager`, which
/// reconnects on its own after a dropped connection.
#[derive(Clone)]
pub struct RedisStagingStore {
    conn_manager: ConnectionManager,
    fragment_ttl: Option<Duration>,
    claim: Script,
}

impl RedisStagingStore {
    /// Connect to Redis.
    ///
    /// `fragment_ttl` bounds how long a partial fragment set may linger;
    /// `None` keeps fragments until they are claimed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Connection`] if the URL is invalid or Redis
    /// cannot be reached.
    pub async fn new(redis_url: &str, fragment_ttl: Option<Duration>) -> StoreResult<Self> {
        let client = Client::open(redis_url).map_err(|e| {
            StoreError::Connection(format!("Failed to create Redis client: {e}"))
        })?;

        let conn_manager = ConnectionManager::new(client).await.map_err(|e| {
            StoreError::Connection(format!("Failed to create Redis connection manager: {e}"))
        })?;

        tracing::info!(
            redis_url,
            fragment_ttl_secs = fragment_ttl.map(|ttl| ttl.as_secs()),
            "Connected to Redis staging store"
        );

        Ok(Self {
            conn_manager,
            fragment_ttl,
            claim: Script::new(CLAIM_SCRIPT),
        })
    }

    /// Configured fragment TTL.
    #[must_use]
    pub const fn fragment_ttl(&self) -> Option<Duration> {
        self.fragment_ttl
    }
}

fn command_error(command: &'static str) -> impl FnOnce(redis::RedisError) -> StoreError {
    move |e| {
        if e.is_connection_dropped() || e.is_connection_refusal() || e.is_timeout() {
            StoreError::Connection(e.to_string())
        } else {
            StoreError::Command {
                command,
                reason: e.to_string(),
            }
        }
    }
}

impl StagingStore for RedisStagingStore {
    fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<String>> {
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            let value: Option<String> = conn.get(key).await.map_err(command_error("GET"))?;
            Ok(value)
        })
    }

    fn set<'a>(&'a self, key: &'a str, value: &'a str) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            match self.fragment_ttl {
                Some(ttl) => {
                    let () = conn
                        .set_ex(key, value, ttl.as_secs().max(1))
                        .await
                        .map_err(command_error("SET"))?;
                }
                None => {
                    let () = conn.set(key, value).await.map_err(command_error("SET"))?;
                }
            }
            Ok(())
        })
    }

    fn claim_all<'a>(&'a self, keys: &'a [String]) -> StoreFuture<'a, Option<Vec<String>>> {
        Box::pin(async move {
            if keys.is_empty() {
                return Ok(None);
            }

            let mut conn = self.conn_manager.clone();
            let mut invocation = self.claim.prepare_invoke();
            for key in keys {
                invocation.key(key);
            }

            let claimed: Option<Vec<String>> = invocation
                .invoke_async(&mut conn)
                .await
                .map_err(command_error("CLAIM"))?;

            if claimed.is_some() {
                tracing::debug!(keys = ?keys, "Claimed fragment set");
            }
            Ok(claimed)
        })
    }
}
