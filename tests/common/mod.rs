//! In-memory [`ScriptStore`] double.
//!
//! Registers procedure sources under content digests and executes the four
//! state transitions natively, mirroring the embedded Lua line for line, so
//! the whole engine can be exercised hermetically. A single mutex stands in
//! for the store's one-procedure-at-a-time-per-key atomicity.

#![allow(dead_code)]

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use dlimiter::{LimiterError, ScriptStore};

#[derive(Debug, Clone)]
enum Value {
    Counter(i64),
    Buckets(HashMap<i64, i64>),
    Fields(HashMap<&'static str, i64>),
}

#[derive(Default)]
struct Inner {
    scripts: HashMap<String, String>,
    keys: HashMap<String, Value>,
}

#[derive(Default)]
pub struct MemoryScriptStore {
    inner: Mutex<Inner>,
    fail_loads: AtomicBool,
    fail_invocations: AtomicBool,
    pub load_calls: AtomicUsize,
    pub digest_calls: AtomicUsize,
    pub source_calls: AtomicUsize,
}

impl MemoryScriptStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every registered script, as SCRIPT FLUSH (or a store restart)
    /// would; the next digest invocation reports the cache-miss sentinel.
    pub fn forget_scripts(&self) {
        self.inner.lock().unwrap().scripts.clear();
    }

    pub fn set_fail_loads(&self, fail: bool) {
        self.fail_loads.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_invocations(&self, fail: bool) {
        self.fail_invocations.store(fail, Ordering::SeqCst);
    }

    pub fn known_scripts(&self) -> usize {
        self.inner.lock().unwrap().scripts.len()
    }

    fn digest_of(source: &str) -> String {
        let mut hasher = DefaultHasher::new();
        source.hash(&mut hasher);
        format!("{:016x}", hasher.finish())
    }

    fn run(inner: &mut Inner, source: &str, key: &str, args: &[i64]) -> i64 {
        // Each embedded procedure has a marker no other one contains.
        if source.contains("tokensRemaining") {
            Self::token_bucket(inner, key, args)
        } else if source.contains("currentWater") {
            Self::leaky_bucket(inner, key, args)
        } else if source.contains("HDEL") {
            Self::slide_window(inner, key, args)
        } else {
            Self::fixed_window(inner, key, args)
        }
    }

    fn fixed_window(inner: &mut Inner, key: &str, args: &[i64]) -> i64 {
        let limit = args[0];
        let entry = inner
            .keys
            .entry(key.to_string())
            .or_insert(Value::Counter(0));
        let Value::Counter(current) = entry else { panic!("key type clash at {key}") };
        if *current >= limit {
            return 0;
        }
        *current += 1;
        limit - *current + 1
    }

    fn slide_window(inner: &mut Inner, key: &str, args: &[i64]) -> i64 {
        let (limit, cur_time, window_secs) = (args[0], args[1], args[2]);
        let time_range = window_secs * 1000;
        let (new_time, diff) = if time_range > 1000 {
            let little_win = (time_range + 999) / 1000;
            (cur_time / little_win, time_range / little_win)
        } else {
            (cur_time, time_range)
        };

        let entry = inner
            .keys
            .entry(key.to_string())
            .or_insert_with(|| Value::Buckets(HashMap::new()));
        let Value::Buckets(buckets) = entry else { panic!("key type clash at {key}") };

        let mut before = 0;
        buckets.retain(|&ftime, &mut count| {
            if new_time - ftime < diff {
                before += count;
                true
            } else {
                false
            }
        });

        if limit <= before {
            return 0;
        }
        *buckets.entry(new_time).or_insert(0) += 1;
        limit - before
    }

    fn token_bucket(inner: &mut Inner, key: &str, args: &[i64]) -> i64 {
        let (interval, cur_time, max_tokens, reset_interval, init_tokens) =
            (args[0], args[1], args[2], args[3], args[4]);

        let entry = inner
            .keys
            .entry(key.to_string())
            .or_insert_with(|| Value::Fields(HashMap::new()));
        let Value::Fields(fields) = entry else { panic!("key type clash at {key}") };

        if !fields.contains_key("lastRefillTime") {
            fields.insert("lastRefillTime", cur_time);
            fields.insert("tokensRemaining", init_tokens);
            return init_tokens.max(1);
        }
        let last_refill = fields["lastRefillTime"];
        let remaining = fields["tokensRemaining"];

        let current = if cur_time <= last_refill {
            remaining
        } else {
            let elapsed = cur_time - last_refill;
            if elapsed > reset_interval {
                fields.insert("lastRefillTime", cur_time);
                init_tokens
            } else {
                let available = elapsed / interval;
                if available > 0 {
                    fields.insert("lastRefillTime", cur_time - elapsed % interval);
                }
                (available + remaining).min(max_tokens)
            }
        };

        if current > 0 {
            fields.insert("tokensRemaining", current - 1);
        }
        current
    }

    fn leaky_bucket(inner: &mut Inner, key: &str, args: &[i64]) -> i64 {
        let (capacity, leak_rate, cur_time) = (args[0], args[1], args[2]);

        let entry = inner
            .keys
            .entry(key.to_string())
            .or_insert_with(|| Value::Fields(HashMap::new()));
        let Value::Fields(fields) = entry else { panic!("key type clash at {key}") };

        let water = fields.get("currentWater").copied().unwrap_or(0);
        let last_leak = fields.get("lastLeakTime").copied().unwrap_or(cur_time);

        let leaked = (cur_time - last_leak) * leak_rate;
        let new_water = (water - leaked).max(0);
        fields.insert("currentWater", new_water);
        fields.insert("lastLeakTime", cur_time);

        if new_water < capacity {
            fields.insert("currentWater", new_water + 1);
            1
        } else {
            0
        }
    }
}

#[async_trait]
impl ScriptStore for MemoryScriptStore {
    async fn load_script(&self, source: &str) -> Result<String, LimiterError> {
        self.load_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_loads.load(Ordering::SeqCst) {
            return Err(LimiterError::store("script load rejected"));
        }
        let digest = Self::digest_of(source);
        self.inner
            .lock()
            .unwrap()
            .scripts
            .insert(digest.clone(), source.to_string());
        Ok(digest)
    }

    async fn flush_scripts(&self) -> Result<(), LimiterError> {
        self.forget_scripts();
        Ok(())
    }

    async fn invoke_digest(
        &self,
        digest: &str,
        key: &str,
        args: &[i64],
    ) -> Result<i64, LimiterError> {
        self.digest_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_invocations.load(Ordering::SeqCst) {
            return Err(LimiterError::store("store unreachable"));
        }
        let mut inner = self.inner.lock().unwrap();
        let Some(source) = inner.scripts.get(digest).cloned() else {
            return Err(LimiterError::NoScript);
        };
        Ok(Self::run(&mut inner, &source, key, args))
    }

    async fn invoke_source(
        &self,
        source: &str,
        key: &str,
        args: &[i64],
    ) -> Result<i64, LimiterError> {
        self.source_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_invocations.load(Ordering::SeqCst) {
            return Err(LimiterError::store("store unreachable"));
        }
        let mut inner = self.inner.lock().unwrap();
        let digest = Self::digest_of(source);
        inner.scripts.insert(digest, source.to_string());
        Ok(Self::run(&mut inner, source, key, args))
    }
}

/// Wrapper that delays every invocation, for deadline tests.
pub struct SlowStore {
    pub inner: Arc<MemoryScriptStore>,
    pub delay: Duration,
}

#[async_trait]
impl ScriptStore for SlowStore {
    async fn load_script(&self, source: &str) -> Result<String, LimiterError> {
        self.inner.load_script(source).await
    }

    async fn flush_scripts(&self) -> Result<(), LimiterError> {
        self.inner.flush_scripts().await
    }

    async fn invoke_digest(
        &self,
        digest: &str,
        key: &str,
        args: &[i64],
    ) -> Result<i64, LimiterError> {
        tokio::time::sleep(self.delay).await;
        self.inner.invoke_digest(digest, key, args).await
    }

    async fn invoke_source(
        &self,
        source: &str,
        key: &str,
        args: &[i64],
    ) -> Result<i64, LimiterError> {
        tokio::time::sleep(self.delay).await;
        self.inner.invoke_source(source, key, args).await
    }
}
