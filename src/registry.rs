//! Procedure registry: loads each algorithm's source into the store once
//! and caches the resulting content digest for cheap digest-based
//! invocation.

use std::sync::RwLock;

use crate::limiter::LimiterKind;
use crate::scripts;
use crate::store::ScriptStore;

/// Per-kind digest cache plus the effective procedure sources.
///
/// Digests are write-once-then-refresh: [`ScriptRegistry::ensure_loaded`]
/// runs at most one load sequence no matter how many callers race into it,
/// and [`ScriptRegistry::refresh`] re-runs the same sequence when the store
/// signals a cache miss. A failure to load one procedure leaves its digest
/// empty without aborting the others.
pub struct ScriptRegistry {
    /// Effective source per kind, compressed once at construction when the
    /// transport flag asks for it.
    sources: [String; 4],
    digests: RwLock<[Option<String>; 4]>,
    /// Idempotent-init guard: holds whether a load sequence already ran.
    load_guard: tokio::sync::Mutex<bool>,
}

impl ScriptRegistry {
    pub fn new(compress: bool) -> Self {
        let effective = |kind: LimiterKind| {
            let raw = scripts::source_for(kind);
            if compress {
                scripts::compress_source(raw)
            } else {
                raw.to_string()
            }
        };
        Self {
            sources: [
                effective(LimiterKind::FixedWindow),
                effective(LimiterKind::SlideWindow),
                effective(LimiterKind::TokenBucket),
                effective(LimiterKind::LeakyBucket),
            ],
            digests: RwLock::new([None, None, None, None]),
            load_guard: tokio::sync::Mutex::new(false),
        }
    }

    /// The source that is actually sent over the wire for `kind`.
    pub fn source(&self, kind: LimiterKind) -> &str {
        &self.sources[kind.index()]
    }

    /// The cached digest for `kind`, if its load has succeeded.
    pub fn digest(&self, kind: LimiterKind) -> Option<String> {
        self.digests.read().unwrap()[kind.index()].clone()
    }

    /// Load every procedure into the store, at most once per registry.
    ///
    /// Concurrent first calls serialize on the guard and all but one observe
    /// the sequence as already done. Load failures are logged and leave that
    /// kind's digest empty; the next [`refresh`](Self::refresh) retries.
    pub async fn ensure_loaded(&self, store: &dyn ScriptStore) {
        let mut loaded = self.load_guard.lock().await;
        if *loaded {
            return;
        }
        self.load_all(store).await;
        *loaded = true;
    }

    /// Re-run the load sequence, dropping the store's script cache first.
    ///
    /// Invoked (asynchronously) whenever an invocation reports a cache miss.
    /// Safe to run redundantly: concurrent refreshes serialize on the guard
    /// and each re-load is idempotent on the store side.
    pub async fn refresh(&self, store: &dyn ScriptStore) {
        let mut loaded = self.load_guard.lock().await;
        if let Err(err) = store.flush_scripts().await {
            tracing::warn!(error = %err, "script flush failed before reload");
        }
        self.load_all(store).await;
        *loaded = true;
    }

    async fn load_all(&self, store: &dyn ScriptStore) {
        for kind in LimiterKind::ALL {
            match store.load_script(self.source(kind)).await {
                Ok(digest) => {
                    tracing::debug!(kind = kind.as_str(), digest = %digest, "procedure loaded");
                    self.digests.write().unwrap()[kind.index()] = Some(digest);
                }
                Err(err) => {
                    tracing::warn!(kind = kind.as_str(), error = %err, "procedure load failed");
                }
            }
        }
    }
}
