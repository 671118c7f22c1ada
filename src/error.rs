//! Error types for limiter decisions.
//!
//! A decision call either returns a definitive admit/deny value or a
//! [`LimiterError`] meaning no decision could be made; the two are never
//! conflated. In particular a timeout is an error, not a denial.

use std::time::Duration;

/// Unified error type for limiter operations.
#[derive(Debug, thiserror::Error)]
pub enum LimiterError {
    /// The store has no cached procedure for the digest that was invoked.
    ///
    /// This is the store's NOSCRIPT sentinel. The engine recovers from it
    /// with a single source-based invocation plus an asynchronous registry
    /// refresh; it only surfaces to callers if the fallback itself fails.
    #[error("store has no cached procedure for the supplied digest")]
    NoScript,

    /// Transport or command failure reported by the store.
    #[error("store command failed: {message}")]
    Store {
        /// Message reported by the store client.
        message: String,
    },

    /// The store round trip did not complete within the caller's deadline.
    #[error("store round trip exceeded deadline of {timeout:?}")]
    Timeout {
        /// The deadline that was exceeded.
        timeout: Duration,
    },
}

impl LimiterError {
    /// Build a [`LimiterError::Store`] from any displayable cause.
    pub fn store(message: impl std::fmt::Display) -> Self {
        Self::Store { message: message.to_string() }
    }

    /// Check if this error is the store's missing-script sentinel.
    pub fn is_no_script(&self) -> bool {
        matches!(self, Self::NoScript)
    }

    /// Check if this error is a deadline timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

impl From<redis::RedisError> for LimiterError {
    fn from(err: redis::RedisError) -> Self {
        // The redis crate parses the server's exact NOSCRIPT reply into this
        // error kind; it is the recognized cache-miss sentinel.
        if err.kind() == redis::ErrorKind::NoScriptError {
            Self::NoScript
        } else {
            Self::store(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn predicates_cover_variants() {
        assert!(LimiterError::NoScript.is_no_script());
        assert!(!LimiterError::NoScript.is_timeout());

        let timeout = LimiterError::Timeout { timeout: Duration::from_millis(5) };
        assert!(timeout.is_timeout());
        assert!(!timeout.is_no_script());

        let store = LimiterError::store("connection refused");
        assert!(!store.is_timeout());
        assert!(!store.is_no_script());
    }

    #[test]
    fn display_includes_context() {
        let timeout = LimiterError::Timeout { timeout: Duration::from_millis(250) };
        assert!(timeout.to_string().contains("250"));

        let store = LimiterError::store("connection refused");
        assert!(store.to_string().contains("connection refused"));
    }
}
