//! Log throttling utility
//!
//! Per-frame paths (track reassembly, detection, display) can fail on every
//! frame for a while. The throttler keeps one line per key per interval.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Log throttler that limits how often the same message is logged
pub struct LogThrottler {
    /// Map of message key to last log time
    last_logged: Mutex<HashMap<String, Instant>>,
    /// Throttle interval
    interval: Duration,
}

impl LogThrottler {
    pub fn new(interval: Duration) -> Self {
        Self {
            last_logged: Mutex::new(HashMap::new()),
            interval,
        }
    }

    pub fn with_secs(secs: u64) -> Self {
        Self::new(Duration::from_secs(secs))
    }

    /// Returns `true` (and records the time) if `key` may be logged now
    pub fn should_log(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut map = self.last_logged.lock();
        match map.get(key) {
            Some(last) if now.duration_since(*last) < self.interval => false,
            _ => {
                map.insert(key.to_string(), now);
                true
            }
        }
    }

    /// Forget `key`, e.g. after the failing condition recovered
    pub fn clear(&self, key: &str) {
        self.last_logged.lock().remove(key);
    }
}

impl Default for LogThrottler {
    fn default() -> Self {
        Self::with_secs(5)
    }
}
