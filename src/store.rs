//! Store abstraction and the Redis implementation.
//!
//! The engine only needs four operations from the shared store: load a
//! procedure's source (returning its content digest), flush all cached
//! procedures, and invoke a procedure by digest or by raw source. Everything
//! stateful — counters, buckets, water levels — lives behind those calls,
//! executed atomically by the store's script engine, which is what makes the
//! algorithms correct under concurrent distributed access.

use async_trait::async_trait;
use redis::aio::ConnectionManager;

use crate::error::LimiterError;

/// The exact message the store reports when a digest has no cached script.
///
/// Treated as a sentinel signal, not parsed structurally: the redis client
/// recognizes this reply as [`redis::ErrorKind::NoScriptError`], which the
/// error mapping turns into [`LimiterError::NoScript`].
pub const NO_SCRIPT_SENTINEL: &str = "NOSCRIPT No matching script. Please use EVAL.";

/// Abstract interface to the shared atomic script store.
///
/// Implementations must guarantee that each invocation runs as a single
/// indivisible state transition for its key. The production backend is
/// [`RedisStore`]; tests provide in-memory doubles.
#[async_trait]
pub trait ScriptStore: Send + Sync {
    /// Load a procedure's source, returning its content-derived digest.
    async fn load_script(&self, source: &str) -> Result<String, LimiterError>;

    /// Drop every cached procedure from the store.
    async fn flush_scripts(&self) -> Result<(), LimiterError>;

    /// Invoke a cached procedure by digest.
    ///
    /// Fails with [`LimiterError::NoScript`] when the digest is not cached.
    async fn invoke_digest(
        &self,
        digest: &str,
        key: &str,
        args: &[i64],
    ) -> Result<i64, LimiterError>;

    /// Invoke a procedure by raw source, implicitly re-registering it.
    async fn invoke_source(
        &self,
        source: &str,
        key: &str,
        args: &[i64],
    ) -> Result<i64, LimiterError>;
}

/// Redis-backed [`ScriptStore`] over a reconnecting connection manager.
///
/// Bring your own manager via [`RedisStore::new`], or let
/// [`RedisStore::connect`] build one from a `redis://` URL.
#[derive(Clone)]
pub struct RedisStore {
    manager: ConnectionManager,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore").field("manager", &"<redis::aio::ConnectionManager>").finish()
    }
}

impl RedisStore {
    /// Wrap an existing connection manager.
    pub fn new(manager: ConnectionManager) -> Self {
        Self { manager }
    }

    /// Connect to `url` (e.g. `redis://127.0.0.1:6379/0`).
    pub async fn connect(url: &str) -> Result<Self, LimiterError> {
        let client = redis::Client::open(url).map_err(LimiterError::from)?;
        let manager = ConnectionManager::new(client).await.map_err(LimiterError::from)?;
        Ok(Self { manager })
    }
}

#[async_trait]
impl ScriptStore for RedisStore {
    async fn load_script(&self, source: &str) -> Result<String, LimiterError> {
        let mut conn = self.manager.clone();
        let digest: String = redis::cmd("SCRIPT")
            .arg("LOAD")
            .arg(source)
            .query_async(&mut conn)
            .await?;
        Ok(digest)
    }

    async fn flush_scripts(&self) -> Result<(), LimiterError> {
        let mut conn = self.manager.clone();
        redis::cmd("SCRIPT").arg("FLUSH").query_async::<_, ()>(&mut conn).await?;
        Ok(())
    }

    async fn invoke_digest(
        &self,
        digest: &str,
        key: &str,
        args: &[i64],
    ) -> Result<i64, LimiterError> {
        let mut conn = self.manager.clone();
        let result: i64 = redis::cmd("EVALSHA")
            .arg(digest)
            .arg(1)
            .arg(key)
            .arg(args)
            .query_async(&mut conn)
            .await?;
        Ok(result)
    }

    async fn invoke_source(
        &self,
        source: &str,
        key: &str,
        args: &[i64],
    ) -> Result<i64, LimiterError> {
        let mut conn = self.manager.clone();
        let result: i64 = redis::cmd("EVAL")
            .arg(source)
            .arg(1)
            .arg(key)
            .arg(args)
            .query_async(&mut conn)
            .await?;
        Ok(result)
    }
}
