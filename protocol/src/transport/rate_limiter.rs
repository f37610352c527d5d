//! # Per-Peer Rate Limiter
//!
//! Sliding-window call counting keyed by `(peer, rpc)`. Each call is
//! recorded with its arrival instant; timestamps older than the window
//! are pruned on the next call, so the update is O(window size) and the
//! table never grows beyond active peers.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::config::{RATE_LIMIT_MAX_CALLS, RATE_LIMIT_WINDOW_SECS};

/// Sliding-window rate limiter over `(peer_id, rpc)` pairs.
pub struct RateLimiter {
    windows: DashMap<(String, &'static str), VecDeque<Instant>>,
    max_calls: usize,
    window: Duration,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(
            RATE_LIMIT_MAX_CALLS,
            Duration::from_secs(RATE_LIMIT_WINDOW_SECS),
        )
    }
}

impl RateLimiter {
    pub fn new(max_calls: usize, window: Duration) -> Self {
        Self {
            windows: DashMap::new(),
            max_calls,
            window,
        }
    }

    /// Record a call and report whether it is within the limit. The call
    /// is counted either way; a peer hammering a limited RPC stays
    /// limited.
    pub fn allow(&self, peer_id: &str, rpc: &'static str) -> bool {
        let now = Instant::now();
        let mut window = self
            .windows
            .entry((peer_id.to_string(), rpc))
            .or_default();
        while window
            .front()
            .is_some_and(|&t| now.duration_since(t) > self.window)
        {
            window.pop_front();
        }
        window.push_back(now);
        window.len() <= self.max_calls
    }
}
