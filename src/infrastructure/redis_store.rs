//! Redis-backed counter store.
//!
//! Provides a distributed counter store using Redis, allowing lockout state
//! to be shared across multiple application instances.
//!
//! ## Architecture
//!
//! Each counter entry is a plain Redis integer:
//! - Keys: `<config prefix><namespace prefix>:<derived key>`
//! - Values: consumed points
//! - TTL: the entry window, set once when the entry is created
//!
//! `consume` and `penalty` run a single Lua script (create-if-missing with
//! expiry, `INCRBY`, `PTTL`), so concurrent callers on the same key are
//! serialized by Redis itself. `get` reads value and TTL in one `MULTI`.
//!
//! ## Error Handling
//!
//! Every Redis failure is returned as `StoreError`. Nothing is retried here;
//! the guard's store error handler decides what happens next.
//!
//! ## Example
//!
//! ```rust,ignore
//! use brute_throttle::{BruteGuard, RedisStoreFactory};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let factory = RedisStoreFactory::connect("redis://127.0.0.1/")
//!         .await
//!         .expect("Failed to connect to Redis");
//!
//!     let guard = BruteGuard::builder("login")
//!         .with_store_factory(Arc::new(factory))
//!         .build()
//!         .unwrap();
//! }
//! ```

use crate::application::ports::{
    ConsumeError, CounterState, CounterStore, StoreError, StoreFactory,
};
use crate::domain::policy::CounterOptions;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{Client, RedisError, Script};
use std::fmt;
use std::sync::Arc;

/// Create the entry with its window if missing, then add points.
///
/// KEYS[1] entry key, ARGV[1] points, ARGV[2] window in ms (0 = no expiry).
/// Returns `{consumed, pttl}`.
const ADD_POINTS_SCRIPT: &str = r"
local key = KEYS[1]
local points = tonumber(ARGV[1])
local window_ms = tonumber(ARGV[2])
if window_ms > 0 then
  redis.call('SET', key, 0, 'PX', window_ms, 'NX')
else
  redis.call('SET', key, 0, 'NX')
end
local consumed = redis.call('INCRBY', key, points)
local pttl = redis.call('PTTL', key)
return {consumed, pttl}
";

/// Configuration for Redis stores.
#[derive(Debug, Clone)]
pub struct RedisStoreConfig {
    /// Prefix prepended to every key (default: "brute-throttle:")
    pub key_prefix: String,
}

impl Default for RedisStoreConfig {
    fn default() -> Self {
        Self {
            key_prefix: "brute-throttle:".to_string(),
        }
    }
}

/// Counter namespace stored in Redis.
#[derive(Clone)]
pub struct RedisCounterStore {
    connection: ConnectionManager,
    config: RedisStoreConfig,
    options: CounterOptions,
    script: Arc<Script>,
}

impl fmt::Debug for RedisCounterStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisCounterStore")
            .field("config", &self.config)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl RedisCounterStore {
    /// Get the Redis key for a derived key.
    fn key(&self, key: &str) -> String {
        format!("{}{}", self.config.key_prefix, self.options.prefixed(key))
    }

    async fn add(
        &self,
        key: &str,
        points: u32,
        duration_secs: u64,
    ) -> Result<CounterState, StoreError> {
        let redis_key = self.key(key);
        let mut conn = self.connection.clone();

        let (consumed, pttl): (i64, i64) = self
            .script
            .key(&redis_key)
            .arg(points)
            .arg(duration_secs.saturating_mul(1000))
            .invoke_async(&mut conn)
            .await?;

        to_state(&redis_key, consumed, pttl)
    }
}

/// Convert raw `(value, PTTL)` into a counter snapshot.
///
/// PTTL is -1 for entries without expiry; anything else negative means the
/// entry vanished between commands.
fn to_state(redis_key: &str, consumed: i64, pttl: i64) -> Result<CounterState, StoreError> {
    let consumed_points = u32::try_from(consumed).map_err(|_| {
        tracing::warn!(key = %redis_key, value = consumed, "Counter value out of range in Redis");
        StoreError::MalformedReply(format!("counter value {} out of range", consumed))
    })?;

    let ms_before_next = match pttl {
        -1 => 0,
        ms if ms >= 0 => ms.unsigned_abs(),
        other => {
            tracing::warn!(key = %redis_key, pttl = other, "Unexpected PTTL from Redis");
            return Err(StoreError::MalformedReply(format!("unexpected PTTL {}", other)));
        }
    };

    Ok(CounterState::new(consumed_points, ms_before_next))
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn consume(&self, key: &str) -> Result<CounterState, ConsumeError> {
        let state = self.add(key, 1, self.options.duration_secs).await?;
        if state.consumed_points > self.options.points {
            return Err(ConsumeError::Exhausted(state));
        }
        Ok(state)
    }

    async fn penalty(
        &self,
        key: &str,
        points: u32,
        custom_duration_secs: Option<u64>,
    ) -> Result<CounterState, StoreError> {
        self.add(
            key,
            points,
            custom_duration_secs.unwrap_or(self.options.duration_secs),
        )
        .await
    }

    async fn get(&self, key: &str) -> Result<Option<CounterState>, StoreError> {
        let redis_key = self.key(key);
        let mut conn = self.connection.clone();

        let (value, pttl): (Option<i64>, i64) = redis::pipe()
            .atomic()
            .get(&redis_key)
            .pttl(&redis_key)
            .query_async(&mut conn)
            .await?;

        match value {
            // Missing keys report nil with PTTL -2
            None => Ok(None),
            Some(consumed) => to_state(&redis_key, consumed, pttl).map(Some),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        let _: () = redis::cmd("DEL")
            .arg(self.key(key))
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    fn options(&self) -> &CounterOptions {
        &self.options
    }
}

/// Creates Redis-backed namespaces over one connection manager.
#[derive(Clone)]
pub struct RedisStoreFactory {
    connection: ConnectionManager,
    config: RedisStoreConfig,
    script: Arc<Script>,
}

impl fmt::Debug for RedisStoreFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisStoreFactory")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl RedisStoreFactory {
    /// Connect to Redis with default configuration.
    ///
    /// # Arguments
    /// * `url` - Redis connection URL (e.g., "redis://127.0.0.1/")
    ///
    /// # Errors
    /// Returns error if connection fails.
    pub async fn connect(url: &str) -> Result<Self, RedisError> {
        Self::connect_with_config(url, RedisStoreConfig::default()).await
    }

    /// Connect to Redis with custom configuration.
    ///
    /// # Errors
    /// Returns error if connection fails.
    pub async fn connect_with_config(
        url: &str,
        config: RedisStoreConfig,
    ) -> Result<Self, RedisError> {
        let client = Client::open(url)?;
        let connection = ConnectionManager::new(client).await?;
        Ok(Self::from_connection(connection, config))
    }

    /// Wrap an existing connection manager.
    pub fn from_connection(connection: ConnectionManager, config: RedisStoreConfig) -> Self {
        Self {
            connection,
            config,
            script: Arc::new(Script::new(ADD_POINTS_SCRIPT)),
        }
    }

    /// Create a namespace as a concrete store.
    pub fn create_redis(&self, options: CounterOptions) -> RedisCounterStore {
        RedisCounterStore {
            connection: self.connection.clone(),
            config: self.config.clone(),
            options,
            script: Arc::clone(&self.script),
        }
    }
}

impl StoreFactory for RedisStoreFactory {
    fn create(&self, options: CounterOptions) -> Arc<dyn CounterStore> {
        Arc::new(self.create_redis(options))
    }
}
