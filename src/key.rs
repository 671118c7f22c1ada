//! Key space management: one store key per logical quota instance.
//!
//! Keys embed the algorithm name so no two algorithms can ever collide on
//! the same stored state, and popular keys are spread over shards once the
//! configured limit outgrows what a single store partition should absorb.

use rand::Rng;

use crate::limiter::LimiterKind;

/// Namespace tag prefixed to every derived key.
pub const KEY_PREFIX: &str = "dlimiter";

/// Separator between key segments.
pub const KEY_SEPARATOR: &str = "::";

/// Largest per-window request volume a single store partition is expected
/// to absorb; limits above this are spread over `ceil(limit / capacity)`
/// shards.
pub const MAX_PARTITION_CAPACITY: i64 = 5000;

/// Derive the store key for one quota instance.
///
/// Layout: `dlimiter :: kind :: product [:: window-bucket] [:: shard]`.
///
/// The window bucket is appended for [`LimiterKind::FixedWindow`] only:
/// each window period maps to a distinct, self-expiring key, so there is no
/// rollover logic anywhere. The shard suffix is appended for any kind whose
/// limit magnitude exceeds [`MAX_PARTITION_CAPACITY`]; it is drawn at
/// random on every call, trading strict per-key consistency for hot-key
/// load spreading.
pub fn derive_key(
    kind: LimiterKind,
    product: &str,
    window_secs: i64,
    limit_magnitude: i64,
    now_ms: i64,
) -> String {
    let mut key = String::with_capacity(64);
    key.push_str(KEY_PREFIX);
    key.push_str(KEY_SEPARATOR);
    key.push_str(kind.as_str());
    key.push_str(KEY_SEPARATOR);
    key.push_str(product);

    if kind == LimiterKind::FixedWindow {
        let window = window_secs.max(1);
        let bucket = (now_ms / 1000) / window;
        key.push_str(KEY_SEPARATOR);
        key.push_str(&bucket.to_string());
    }

    if limit_magnitude > MAX_PARTITION_CAPACITY {
        let shards = shard_count(limit_magnitude);
        let shard = rand::rng().random_range(0..shards);
        key.push_str(KEY_SEPARATOR);
        key.push_str(&shard.to_string());
    }

    key
}

/// Number of shards a limit of this magnitude is spread over.
pub fn shard_count(limit_magnitude: i64) -> i64 {
    if limit_magnitude <= MAX_PARTITION_CAPACITY {
        1
    } else {
        (limit_magnitude + MAX_PARTITION_CAPACITY - 1) / MAX_PARTITION_CAPACITY
    }
}
