//! Record of finalized batches, used for throughput and ETA reporting.

use std::time::Duration;

use tokio::time::Instant;

pub const DEFAULT_RATE_WINDOW: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActivityEntry {
    pub count: u64,
    pub timestamp: Instant,
}

#[derive(Debug, Clone, Default)]
pub struct ActivityLog {
    entries: Vec<ActivityEntry>,
    started: Option<Instant>,
}

impl ActivityLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clears previous entries and marks the start of a run.
    pub fn start(&mut self) {
        self.entries.clear();
        self.started = Some(Instant::now());
    }

    /// Zero-sized batches are ignored.
    pub fn record(&mut self, count: u64) {
        self.record_at(count, Instant::now());
    }

    pub fn record_at(&mut self, count: u64, timestamp: Instant) {
        if count == 0 {
            return;
        }
        self.entries.push(ActivityEntry { count, timestamp });
    }

    pub fn total_deleted(&self) -> u64 {
        self.entries.iter().map(|entry| entry.count).sum()
    }

    pub fn batch_count(&self) -> usize {
        self.entries.len()
    }

    pub fn elapsed(&self) -> Duration {
        self.started
            .map(|started| started.elapsed())
            .unwrap_or_default()
    }

    pub fn rate_per_minute(&self) -> f64 {
        self.rate_per_minute_within(DEFAULT_RATE_WINDOW)
    }

    /// Items per minute over the trailing `window`, measured from the oldest
    /// entry inside the window up to now.
    pub fn rate_per_minute_within(&self, window: Duration) -> f64 {
        let now = Instant::now();
        let window_start = now.checked_sub(window);
        let mut count = 0u64;
        let mut oldest: Option<Instant> = None;
        for entry in &self.entries {
            if window_start.is_some_and(|start| entry.timestamp < start) {
                continue;
            }
            count += entry.count;
            oldest = Some(oldest.map_or(entry.timestamp, |o| o.min(entry.timestamp)));
        }
        let Some(oldest) = oldest else {
            return 0.0;
        };
        let span = now.saturating_duration_since(oldest);
        if span.is_zero() {
            return 0.0;
        }
        count as f64 / span.as_secs_f64() * 60.0
    }

    /// `None` until a rate can be measured.
    pub fn estimate_remaining(&self, target: u64) -> Option<Duration> {
        let rate = self.rate_per_minute();
        if rate <= 0.0 {
            return None;
        }
        let total = self.total_deleted();
        if total >= target {
            return Some(Duration::ZERO);
        }
        let remaining = (target - total) as f64;
        Some(Duration::try_from_secs_f64(remaining / rate * 60.0).unwrap_or(Duration::MAX))
    }

    pub fn entries(&self) -> Vec<ActivityEntry> {
        self.entries.clone()
    }
}
