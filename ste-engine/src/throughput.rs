//! Process-wide throughput accounting.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Counts bytes moved by successful chunk operations.
///
/// Every successful chunk adds its length; progress summaries sample the
/// counter and compute bytes per second since the previous sample.
#[derive(Debug)]
pub struct Throughput {
    current_bytes: AtomicU64,
    last_checked: Mutex<(Instant, u64)>,
}

impl Default for Throughput {
    fn default() -> Self {
        Self {
            current_bytes: AtomicU64::new(0),
            last_checked: Mutex::new((Instant::now(), 0)),
        }
    }
}

impl Throughput {
    /// Creates a zeroed counter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds transferred bytes to the counter.
    pub fn add(&self, bytes: u64) {
        self.current_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Total bytes counted since startup.
    pub fn total_bytes(&self) -> u64 {
        self.current_bytes.load(Ordering::Relaxed)
    }

    /// Bytes per second since the previous call, resetting the sample point.
    pub fn bytes_per_second(&self) -> f64 {
        let now = Instant::now();
        let current = self.current_bytes.load(Ordering::Relaxed);

        let mut last = self.last_checked.lock().unwrap();
        let (last_time, last_bytes) = *last;
        *last = (now, current);

        let elapsed = now.duration_since(last_time).as_secs_f64();
        if elapsed <= 0.0 {
            return 0.0;
        }
        current.saturating_sub(last_bytes) as f64 / elapsed
    }
}
