//! Sliding-window rate limiter keyed by session + forwarded origin.
//!
//! Counters are process-wide, in-memory state with no persistence guarantee
//! across restarts; the limiter exists to damp abuse, not to do exact
//! accounting. At most [`MAX_REQUESTS_PER_WINDOW`] requests are accepted per
//! rolling window per key; the next request inside the window is rejected.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

pub const MAX_REQUESTS_PER_WINDOW: usize = 12;
pub const WINDOW: Duration = Duration::from_secs(60);

/// How many keys the map may hold before a full sweep of empty entries.
const PRUNE_THRESHOLD: usize = 4096;

pub struct SlidingWindowLimiter {
    window: Duration,
    limit: usize,
    hits: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl Default for SlidingWindowLimiter {
    fn default() -> Self {
        Self::new(WINDOW, MAX_REQUESTS_PER_WINDOW)
    }
}

impl SlidingWindowLimiter {
    pub fn new(window: Duration, limit: usize) -> Self {
        Self {
            window,
            limit,
            hits: Mutex::new(HashMap::new()),
        }
    }

    /// Limiter key: session id plus the first forwarded-origin entry, or
    /// `"anon"` when the request carried no origin header.
    pub fn key(session_id: &str, origin: Option<&str>) -> String {
        let origin = origin
            .and_then(|value| value.split(',').next())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .unwrap_or("anon");
        format!("{session_id}:{origin}")
    }

    /// Record one request for `key`. `Ok(())` means accepted; `Err(secs)` is
    /// the number of seconds until the window frees a slot.
    pub fn check(&self, key: &str) -> Result<(), u64> {
        self.check_at(key, Instant::now())
    }

    fn check_at(&self, key: &str, now: Instant) -> Result<(), u64> {
        let mut hits = self.hits.lock().unwrap_or_else(|poisoned| {
            // A panic while holding the lock cannot corrupt a VecDeque of
            // Instants in a way that matters for abuse damping.
            poisoned.into_inner()
        });

        if hits.len() > PRUNE_THRESHOLD {
            hits.retain(|_, window| {
                window
                    .back()
                    .is_some_and(|last| now.duration_since(*last) < self.window)
            });
        }

        let window = hits.entry(key.to_string()).or_default();
        while let Some(oldest) = window.front() {
            if now.duration_since(*oldest) >= self.window {
                window.pop_front();
            } else {
                break;
            }
        }

        if window.len() >= self.limit {
            let oldest = window.front().copied().unwrap_or(now);
            let retry_after = self
                .window
                .saturating_sub(now.duration_since(oldest))
                .as_secs()
                .max(1);
            return Err(retry_after);
        }

        window.push_back(now);
        Ok(())
    }
}
