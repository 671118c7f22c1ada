//! Decision notification pipeline.
//!
//! Every decision — admitted, denied, or failed — produces one
//! [`DecisionRecord`] that is pushed through a bounded queue to a single
//! background dispatcher, which fans it out to every registered observer in
//! registration order. Publishing never blocks the request path: when the
//! queue is full the record is dropped and a counter advances instead.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::SystemTime;

use tokio::sync::mpsc;

use crate::limiter::LimiterKind;

/// Capacity of the decision record queue.
pub const RECORD_QUEUE_CAPACITY: usize = 10_000;

/// Immutable outcome of one admission decision.
#[derive(Debug, Clone)]
pub struct DecisionRecord {
    /// Algorithm that produced the decision.
    pub kind: LimiterKind,
    /// Store key the decision was made against.
    pub key: String,
    /// Raw decision value; 0 means denied, per-algorithm positive values
    /// mean admitted. 0 when `error` is set.
    pub result: i64,
    /// When the decision completed.
    pub timestamp: SystemTime,
    /// Error message when no decision could be obtained.
    pub error: Option<String>,
}

impl DecisionRecord {
    /// Whether the request was admitted.
    pub fn is_admitted(&self) -> bool {
        self.error.is_none() && self.result > 0
    }
}

/// Observer of the decision stream.
///
/// Handlers run synchronously on the dispatcher task, one record at a time;
/// an observer that blocks stalls the whole pipeline (deliberately no
/// per-observer isolation).
pub trait RecordObserver: Send + Sync {
    fn on_record(&self, record: &DecisionRecord);
}

type ObserverList = Vec<(String, Arc<dyn RecordObserver>)>;

/// Bounded queue plus single dispatcher fanning records out to observers.
pub struct RecordPipeline {
    tx: mpsc::Sender<DecisionRecord>,
    observers: Arc<RwLock<ObserverList>>,
    dropped: Arc<AtomicU64>,
}

impl RecordPipeline {
    /// Start a pipeline with the default queue capacity.
    ///
    /// Must be called from within a tokio runtime; the dispatcher task is
    /// spawned here and lives until the pipeline is dropped.
    pub fn new() -> Self {
        Self::with_capacity(RECORD_QUEUE_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<DecisionRecord>(capacity.max(1));
        let observers: Arc<RwLock<ObserverList>> = Arc::new(RwLock::new(Vec::new()));
        let dispatcher_observers = observers.clone();

        tokio::spawn(async move {
            while let Some(record) = rx.recv().await {
                // Snapshot under the read lock, invoke outside it, so an
                // observer may (un)register without deadlocking.
                let snapshot: ObserverList =
                    dispatcher_observers.read().unwrap().clone();
                for (_, observer) in &snapshot {
                    observer.on_record(&record);
                }
            }
        });

        Self { tx, observers, dropped: Arc::new(AtomicU64::new(0)) }
    }

    /// Queue a record without blocking; drops it when the queue is full.
    pub fn publish(&self, record: DecisionRecord) {
        if self.tx.try_send(record).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Register `observer` under `name`, replacing any observer already
    /// registered under that name (keeping its position in the fan-out
    /// order).
    pub fn register(&self, name: impl Into<String>, observer: Arc<dyn RecordObserver>) {
        let name = name.into();
        let mut observers = self.observers.write().unwrap();
        if let Some(slot) = observers.iter_mut().find(|(n, _)| *n == name) {
            slot.1 = observer;
        } else {
            observers.push((name, observer));
        }
    }

    /// Remove the observer registered under `name`, if any.
    pub fn unregister(&self, name: &str) {
        self.observers.write().unwrap().retain(|(n, _)| n != name);
    }

    /// Number of records dropped because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
