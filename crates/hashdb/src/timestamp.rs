//! `timestamp::stamp` (§6): a lightweight progress marker callers can
//! sprinkle through a long-running import/scan to get wall-clock deltas
//! without wiring up a full tracing span.

use std::sync::Mutex;
use std::time::Instant;

use serde::Serialize;

#[derive(Debug, Serialize)]
struct Stamp<'a> {
    name: &'a str,
    delta: f64,
    total: f64,
}

/// Tracks the instant of the previous `stamp` call and the session start,
/// so `delta`/`total` are meaningful across repeated calls.
pub struct Timestamper {
    start: Instant,
    last: Mutex<Instant>,
}

impl Timestamper {
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            start: now,
            last: Mutex::new(now),
        }
    }

    /// Returns `{"name":..,"delta":..,"total":..}` where `delta` is
    /// seconds since the previous `stamp` call and `total` is seconds
    /// since this timestamper was created.
    pub fn stamp(&self, name: &str) -> String {
        let now = Instant::now();
        let mut last = self.last.lock().unwrap();
        let delta = now.duration_since(*last).as_secs_f64();
        let total = now.duration_since(self.start).as_secs_f64();
        *last = now;
        serde_json::to_string(&Stamp { name, delta, total }).unwrap_or_else(|_| "{}".to_string())
    }
}

impl Default for Timestamper {
    fn default() -> Self {
        Self::new()
    }
}
