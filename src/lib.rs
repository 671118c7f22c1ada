#![forbid(unsafe_code)]

//! # dlimiter
//!
//! Distributed admission control for async Rust. Multiple independent
//! process instances agree — without coordinating with each other — on
//! whether a logical request stream has exceeded its quota, by delegating
//! every stateful decision to an atomic procedure executed inside one
//! shared Redis store.
//!
//! ## Algorithms
//!
//! - **Fixed window**: counter per window period, self-expiring keys
//! - **Sliding window**: sub-bucketed rolling window with lazy eviction
//! - **Token bucket**: refill-over-time with fractional carry-forward
//! - **Leaky bucket**: constant drain bounding sustained throughput
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use dlimiter::{Algorithm, LimiterContext, RateLimiter, RedisStore};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), dlimiter::LimiterError> {
//!     let store = Arc::new(RedisStore::connect("redis://127.0.0.1:6379/0").await?);
//!     let ctx = LimiterContext::initialize(store, true).await;
//!
//!     let limiter =
//!         RateLimiter::builder(ctx, "checkout", Algorithm::fixed_window(100, 1)).build();
//!
//!     match limiter.acquire().await? {
//!         0 => println!("denied"),
//!         remaining => println!("admitted, {remaining} left this window"),
//!     }
//!     Ok(())
//! }
//! ```

pub mod clock;
pub mod context;
pub mod error;
pub mod key;
pub mod limiter;
pub mod record;
pub mod registry;
pub mod scripts;
pub mod store;

// Re-exports
pub use clock::{Clock, ManualClock, SystemClock};
pub use context::LimiterContext;
pub use error::LimiterError;
pub use limiter::{
    Algorithm, FixedWindowConfig, LeakyBucketConfig, LimiterKind, RateLimiter,
    RateLimiterBuilder, SlideWindowConfig, TokenBucketConfig,
};
pub use record::{DecisionRecord, RecordObserver, RecordPipeline, RECORD_QUEUE_CAPACITY};
pub use registry::ScriptRegistry;
pub use store::{RedisStore, ScriptStore, NO_SCRIPT_SENTINEL};
