//! Embedded procedure sources.
//!
//! The four state-transition procedures live under `scripts/` and are
//! compiled into the binary with [`include_str!`]. They run wholly inside
//! the store, so this module is only concerned with handing out the right
//! source text, optionally stripped of comments and blank lines to shrink
//! the wire payload (no semantic effect).

use crate::limiter::LimiterKind;

pub const FIXED_WINDOW_SCRIPT: &str = include_str!("../scripts/fixed_window.lua");
pub const SLIDE_WINDOW_SCRIPT: &str = include_str!("../scripts/slide_window.lua");
pub const TOKEN_BUCKET_SCRIPT: &str = include_str!("../scripts/token_bucket.lua");
pub const LEAKY_BUCKET_SCRIPT: &str = include_str!("../scripts/leaky_bucket.lua");

/// Raw source for one algorithm's procedure.
pub fn source_for(kind: LimiterKind) -> &'static str {
    match kind {
        LimiterKind::FixedWindow => FIXED_WINDOW_SCRIPT,
        LimiterKind::SlideWindow => SLIDE_WINDOW_SCRIPT,
        LimiterKind::TokenBucket => TOKEN_BUCKET_SCRIPT,
        LimiterKind::LeakyBucket => LEAKY_BUCKET_SCRIPT,
    }
}

/// Strip Lua block comments, line comments, and blank lines.
///
/// Good enough for the embedded sources, which never contain `--` inside a
/// string literal.
pub fn compress_source(source: &str) -> String {
    let mut without_blocks = String::with_capacity(source.len());
    let mut rest = source;
    while let Some(start) = rest.find("--[[") {
        without_blocks.push_str(&rest[..start]);
        match rest[start..].find("]]") {
            Some(end) => rest = &rest[start + end + 2..],
            None => {
                rest = "";
                break;
            }
        }
    }
    without_blocks.push_str(rest);

    let mut out = String::with_capacity(without_blocks.len());
    for line in without_blocks.lines() {
        let line = match line.find("--") {
            Some(idx) => &line[..idx],
            None => line,
        };
        let line = line.trim();
        if !line.is_empty() {
            out.push_str(line);
            out.push('\n');
        }
    }
    out
}
