//! Fixed-window limiter for the test-send endpoint, keyed by recipient.

use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard},
    time::Duration,
};

use tokio::time::Instant;

pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed { remaining: u32 },
    Denied { retry_after_secs: u64 },
}

#[derive(Debug)]
struct Window {
    started: Instant,
    count: u32,
}

#[derive(Debug)]
pub struct TestSendLimiter {
    limit: u32,
    window: Duration,
    windows: Mutex<HashMap<String, Window>>,
}

impl TestSendLimiter {
    /// A `limit` of zero disables limiting.
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn per_minute(limit: u32) -> Self {
        Self::new(limit, DEFAULT_WINDOW)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Window>> {
        self.windows
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn check(&self, key: &str) -> RateDecision {
        if self.limit == 0 {
            return RateDecision::Allowed { remaining: u32::MAX };
        }

        let now = Instant::now();
        let mut windows = self.lock();

        windows.retain(|_, window| now.duration_since(window.started) < self.window);

        let window = windows.entry(key.to_string()).or_insert(Window {
            started: now,
            count: 0,
        });

        if window.count >= self.limit {
            let elapsed = now.duration_since(window.started);
            let retry_after = self.window.saturating_sub(elapsed).as_secs().max(1);
            return RateDecision::Denied {
                retry_after_secs: retry_after,
            };
        }

        window.count += 1;
        RateDecision::Allowed {
            remaining: self.limit - window.count,
        }
    }
}
