//! Rate limiter engine and per-algorithm configuration.
//!
//! A [`RateLimiter`] is constructed for one product and one algorithm
//! variant, holds its derived (or caller-supplied) store key for its whole
//! lifetime, and delegates every decision to the procedure executing inside
//! the shared store. All contended state lives store-side; limiter instances
//! are cheap and safe to use from many tasks concurrently.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use crate::clock::{Clock, SystemClock};
use crate::context::LimiterContext;
use crate::error::LimiterError;
use crate::key;
use crate::record::DecisionRecord;

/// The four admission-control algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LimiterKind {
    FixedWindow,
    SlideWindow,
    TokenBucket,
    LeakyBucket,
}

impl LimiterKind {
    pub const ALL: [LimiterKind; 4] = [
        LimiterKind::FixedWindow,
        LimiterKind::SlideWindow,
        LimiterKind::TokenBucket,
        LimiterKind::LeakyBucket,
    ];

    /// Name embedded in store keys; also the wire-visible algorithm name.
    pub fn as_str(&self) -> &'static str {
        match self {
            LimiterKind::FixedWindow => "FixedWindow",
            LimiterKind::SlideWindow => "SlideWindow",
            LimiterKind::TokenBucket => "TokenBucket",
            LimiterKind::LeakyBucket => "LeakyBucket",
        }
    }

    pub(crate) fn index(self) -> usize {
        match self {
            LimiterKind::FixedWindow => 0,
            LimiterKind::SlideWindow => 1,
            LimiterKind::TokenBucket => 2,
            LimiterKind::LeakyBucket => 3,
        }
    }
}

impl std::fmt::Display for LimiterKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fixed window parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FixedWindowConfig {
    /// Requests admitted per window. Zero normalizes to 1.
    pub limit: i64,
    /// Window size in seconds. Zero normalizes to 1.
    pub window_secs: i64,
    /// Key expiration in seconds. Unset defaults to
    /// `clamp(window * 2, 300, 600)` and is never re-derived afterwards.
    pub expiration_secs: Option<i64>,
}

/// Sliding window parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SlideWindowConfig {
    /// Requests admitted per rolling window. Zero normalizes to 1.
    pub limit: i64,
    /// Window size in seconds. Zero normalizes to 1.
    pub window_secs: i64,
    /// Key expiration in seconds. Unset defaults to 3600: the hash must
    /// outlive the window comfortably, or its expiry would admit a burst.
    pub expiration_secs: Option<i64>,
}

/// Token bucket parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenBucketConfig {
    /// Bucket capacity. Zero normalizes to 1.
    pub max_tokens: i64,
    /// Reset interval in seconds. Zero normalizes to 1.
    pub window_secs: i64,
    /// Tokens present after initialization or a hard reset; clamped to
    /// `max_tokens`.
    pub init_tokens: i64,
}

/// Leaky bucket parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LeakyBucketConfig {
    /// Bucket capacity in requests.
    pub capacity: i64,
    /// Leak rate in requests per second. Zero normalizes to 1.
    pub leak_rate: i64,
}

/// Closed union over the four algorithms and their parameters.
///
/// Adding a fifth algorithm means adding a variant here (plus its procedure
/// source), not growing conditionals across the crate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Algorithm {
    FixedWindow(FixedWindowConfig),
    SlideWindow(SlideWindowConfig),
    TokenBucket(TokenBucketConfig),
    LeakyBucket(LeakyBucketConfig),
}

impl Algorithm {
    /// Fixed window admitting `limit` requests per `window_secs`.
    pub fn fixed_window(limit: i64, window_secs: i64) -> Self {
        Self::FixedWindow(FixedWindowConfig { limit, window_secs, expiration_secs: None })
    }

    /// Sliding window admitting `limit` requests per rolling `window_secs`.
    pub fn slide_window(limit: i64, window_secs: i64) -> Self {
        Self::SlideWindow(SlideWindowConfig { limit, window_secs, expiration_secs: None })
    }

    /// Token bucket of `max_tokens` refilled over `window_secs`, holding
    /// `init_tokens` after initialization.
    pub fn token_bucket(max_tokens: i64, window_secs: i64, init_tokens: i64) -> Self {
        Self::TokenBucket(TokenBucketConfig { max_tokens, window_secs, init_tokens })
    }

    /// Leaky bucket of `capacity` draining `leak_rate` requests per second.
    pub fn leaky_bucket(capacity: i64, leak_rate: i64) -> Self {
        Self::LeakyBucket(LeakyBucketConfig { capacity, leak_rate })
    }

    pub fn kind(&self) -> LimiterKind {
        match self {
            Algorithm::FixedWindow(_) => LimiterKind::FixedWindow,
            Algorithm::SlideWindow(_) => LimiterKind::SlideWindow,
            Algorithm::TokenBucket(_) => LimiterKind::TokenBucket,
            Algorithm::LeakyBucket(_) => LimiterKind::LeakyBucket,
        }
    }

    /// Apply defaults exactly once; explicit values are never overridden.
    fn normalize(&mut self) {
        match self {
            Algorithm::FixedWindow(cfg) => {
                if cfg.limit == 0 {
                    cfg.limit = 1;
                }
                if cfg.window_secs == 0 {
                    cfg.window_secs = 1;
                }
                if cfg.expiration_secs.is_none() {
                    cfg.expiration_secs = Some((cfg.window_secs * 2).clamp(300, 600));
                }
            }
            Algorithm::SlideWindow(cfg) => {
                if cfg.limit == 0 {
                    cfg.limit = 1;
                }
                if cfg.window_secs == 0 {
                    cfg.window_secs = 1;
                }
                if cfg.expiration_secs.is_none() {
                    cfg.expiration_secs = Some(3600);
                }
            }
            Algorithm::TokenBucket(cfg) => {
                if cfg.max_tokens == 0 {
                    cfg.max_tokens = 1;
                }
                if cfg.window_secs == 0 {
                    cfg.window_secs = 1;
                }
                if cfg.init_tokens > cfg.max_tokens {
                    cfg.init_tokens = cfg.max_tokens;
                }
            }
            Algorithm::LeakyBucket(cfg) => {
                if cfg.leak_rate == 0 {
                    cfg.leak_rate = 1;
                }
            }
        }
    }

    /// Magnitude used to decide hot-key sharding: the per-window request
    /// volume this configuration can drive at a single key.
    fn limit_magnitude(&self) -> i64 {
        match self {
            Algorithm::FixedWindow(cfg) => cfg.limit,
            Algorithm::SlideWindow(cfg) => cfg.limit,
            Algorithm::TokenBucket(cfg) => cfg.max_tokens,
            Algorithm::LeakyBucket(cfg) => cfg.leak_rate,
        }
    }

    fn window_secs(&self) -> i64 {
        match self {
            Algorithm::FixedWindow(cfg) => cfg.window_secs,
            Algorithm::SlideWindow(cfg) => cfg.window_secs,
            Algorithm::TokenBucket(cfg) => cfg.window_secs,
            Algorithm::LeakyBucket(_) => 1,
        }
    }

    /// Ordered argument list the procedure expects, for a call at `now_ms`.
    fn script_args(&self, now_ms: i64) -> Vec<i64> {
        match self {
            Algorithm::FixedWindow(cfg) => {
                vec![cfg.limit, cfg.window_secs, cfg.expiration_secs.unwrap_or(300)]
            }
            Algorithm::SlideWindow(cfg) => {
                vec![cfg.limit, now_ms, cfg.window_secs, cfg.expiration_secs.unwrap_or(3600)]
            }
            Algorithm::TokenBucket(cfg) => {
                let reset_interval_ms = cfg.window_secs * 1000;
                // one token per this many milliseconds
                let interval_per_permit = if reset_interval_ms > cfg.max_tokens {
                    (reset_interval_ms + cfg.max_tokens - 1) / cfg.max_tokens
                } else {
                    1
                };
                vec![interval_per_permit, now_ms, cfg.max_tokens, reset_interval_ms, cfg.init_tokens]
            }
            Algorithm::LeakyBucket(cfg) => {
                vec![cfg.capacity, cfg.leak_rate, now_ms / 1000]
            }
        }
    }
}

/// Extension hook run synchronously after every decision.
pub type DecisionHook = dyn Fn(&RateLimiter, &DecisionRecord) + Send + Sync;

/// Distributed rate limiter bound to one product, algorithm, and store key.
pub struct RateLimiter {
    ctx: Arc<LimiterContext>,
    product: String,
    algorithm: Algorithm,
    store_key: String,
    clock: Arc<dyn Clock>,
    deadline: Option<Duration>,
    hooks: Vec<Arc<DecisionHook>>,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("product", &self.product)
            .field("algorithm", &self.algorithm)
            .field("store_key", &self.store_key)
            .field("deadline", &self.deadline)
            .field("hooks", &self.hooks.len())
            .finish()
    }
}

impl RateLimiter {
    /// Start building a limiter for `product` running `algorithm`.
    pub fn builder(
        ctx: Arc<LimiterContext>,
        product: impl Into<String>,
        algorithm: Algorithm,
    ) -> RateLimiterBuilder {
        RateLimiterBuilder {
            ctx,
            product: product.into(),
            algorithm,
            store_key: None,
            clock: None,
            deadline: None,
            hooks: Vec::new(),
        }
    }

    pub fn product(&self) -> &str {
        &self.product
    }

    pub fn algorithm(&self) -> &Algorithm {
        &self.algorithm
    }

    /// The store key every decision of this instance runs against.
    pub fn store_key(&self) -> &str {
        &self.store_key
    }

    /// Replace the store key for all subsequent decisions.
    pub fn set_store_key(&mut self, key: impl Into<String>) {
        let key = key.into();
        if !key.is_empty() {
            self.store_key = key;
        }
    }

    /// Execute one admission decision.
    ///
    /// Returns the procedure's decision value: 0 means denied; a positive
    /// value means admitted (remaining quota for the window algorithms,
    /// pre-consumption token count for the token bucket, 1 for the leaky
    /// bucket). `Err` means no decision could be obtained — store failures
    /// and deadline timeouts are never folded into a denial.
    ///
    /// Dropping the returned future cancels the in-flight round trip; the
    /// store's own atomicity is the only rollback needed.
    pub async fn acquire(&self) -> Result<i64, LimiterError> {
        let args = self.algorithm.script_args(self.clock.now_millis());

        let invocation = self.invoke(&args);
        let result = match self.deadline {
            Some(deadline) => match tokio::time::timeout(deadline, invocation).await {
                Ok(result) => result,
                Err(_) => Err(LimiterError::Timeout { timeout: deadline }),
            },
            None => invocation.await,
        };

        let record = DecisionRecord {
            kind: self.algorithm.kind(),
            key: self.store_key.clone(),
            result: *result.as_ref().unwrap_or(&0),
            timestamp: SystemTime::now(),
            error: result.as_ref().err().map(ToString::to_string),
        };
        self.ctx.pipeline().publish(record.clone());

        for hook in &self.hooks {
            hook(self, &record);
        }

        result
    }

    /// Digest-first invocation with a single source fallback on cache miss.
    async fn invoke(&self, args: &[i64]) -> Result<i64, LimiterError> {
        let kind = self.algorithm.kind();
        let store = self.ctx.store();

        let Some(digest) = self.ctx.registry().digest(kind) else {
            // Load never succeeded for this procedure; answer from source
            // and let the background refresh repair the digest cache.
            Arc::clone(&self.ctx).spawn_refresh();
            return store.invoke_source(self.ctx.registry().source(kind), &self.store_key, args).await;
        };

        match store.invoke_digest(&digest, &self.store_key, args).await {
            Err(err) if err.is_no_script() => {
                tracing::debug!(
                    kind = kind.as_str(),
                    digest = %digest,
                    "store dropped the cached procedure; falling back to source"
                );
                Arc::clone(&self.ctx).spawn_refresh();
                store.invoke_source(self.ctx.registry().source(kind), &self.store_key, args).await
            }
            other => other,
        }
    }
}

/// Builder for [`RateLimiter`].
pub struct RateLimiterBuilder {
    ctx: Arc<LimiterContext>,
    product: String,
    algorithm: Algorithm,
    store_key: Option<String>,
    clock: Option<Arc<dyn Clock>>,
    deadline: Option<Duration>,
    hooks: Vec<Arc<DecisionHook>>,
}

impl RateLimiterBuilder {
    /// Use `key` verbatim instead of deriving one.
    pub fn store_key(mut self, key: impl Into<String>) -> Self {
        let key = key.into();
        if !key.is_empty() {
            self.store_key = Some(key);
        }
        self
    }

    /// Bound every decision's store round trip by `deadline`.
    pub fn deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Replace the wall clock (tests inject a manual clock here).
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Attach a hook run synchronously after every decision.
    pub fn hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(&RateLimiter, &DecisionRecord) + Send + Sync + 'static,
    {
        self.hooks.push(Arc::new(hook));
        self
    }

    /// Normalize the configuration and fix the store key.
    pub fn build(self) -> RateLimiter {
        let mut algorithm = self.algorithm;
        algorithm.normalize();

        let clock: Arc<dyn Clock> = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let store_key = self.store_key.unwrap_or_else(|| {
            key::derive_key(
                algorithm.kind(),
                &self.product,
                algorithm.window_secs(),
                algorithm.limit_magnitude(),
                clock.now_millis(),
            )
        });

        RateLimiter {
            ctx: self.ctx,
            product: self.product,
            algorithm,
            store_key,
            clock,
            deadline: self.deadline,
            hooks: self.hooks,
        }
    }
}
