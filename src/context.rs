//! Limiter context: the one object owning the store handle, the procedure
//! registry, and the notification pipeline.
//!
//! Every [`RateLimiter`](crate::RateLimiter) holds an `Arc` of the context
//! instead of reaching for process-wide globals, so a host application can
//! run several independent limiter universes (distinct stores, distinct
//! observers) side by side.

use std::sync::Arc;

use crate::record::{RecordObserver, RecordPipeline};
use crate::registry::ScriptRegistry;
use crate::store::ScriptStore;

pub struct LimiterContext {
    store: Arc<dyn ScriptStore>,
    registry: ScriptRegistry,
    pipeline: RecordPipeline,
}

impl std::fmt::Debug for LimiterContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LimiterContext").finish_non_exhaustive()
    }
}

impl LimiterContext {
    /// Single setup call for a limiter universe.
    ///
    /// Starts the notification dispatcher and triggers the one-time
    /// procedure load. `compress` strips comments and blank lines from the
    /// procedure sources before they ship to the store — a transport-size
    /// optimization with no semantic effect.
    ///
    /// Initialization never fails: a procedure whose load was rejected is
    /// left without a digest (logged) and is retried transparently by the
    /// refresh that runs when its first invocation reports a cache miss.
    pub async fn initialize(store: Arc<dyn ScriptStore>, compress: bool) -> Arc<Self> {
        let registry = ScriptRegistry::new(compress);
        registry.ensure_loaded(store.as_ref()).await;
        Arc::new(Self { store, registry, pipeline: RecordPipeline::new() })
    }

    /// Register a named observer of the decision stream.
    pub fn register_observer(&self, name: impl Into<String>, observer: Arc<dyn RecordObserver>) {
        self.pipeline.register(name, observer);
    }

    /// Remove a named observer.
    pub fn unregister_observer(&self, name: &str) {
        self.pipeline.unregister(name);
    }

    /// Decision records dropped because the notification queue was full.
    pub fn dropped_records(&self) -> u64 {
        self.pipeline.dropped()
    }

    pub(crate) fn store(&self) -> &dyn ScriptStore {
        self.store.as_ref()
    }

    pub(crate) fn registry(&self) -> &ScriptRegistry {
        &self.registry
    }

    pub(crate) fn pipeline(&self) -> &RecordPipeline {
        &self.pipeline
    }

    /// Kick off a background registry refresh; the current call keeps its
    /// source-based answer and later calls pick the repaired digest up.
    pub(crate) fn spawn_refresh(self: Arc<Self>) {
        tokio::spawn(async move {
            self.registry.refresh(self.store.as_ref()).await;
        });
    }
}
