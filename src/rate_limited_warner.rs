//! Throttling for repeated loss diagnostics.
//!
//! Under sustained overload every `log()` call can lose its remote copy.
//! Reporting each loss would flood the diagnostic channel, so losses are
//! tallied here and reported as one aggregated count at most once per
//! interval.

use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, Instant},
};

use once_cell::sync::Lazy;

/// Default interval between aggregated loss reports.
pub const DEFAULT_WARN_INTERVAL: Duration = Duration::from_secs(5);

static EPOCH: Lazy<Instant> = Lazy::new(Instant::now);

/// Milliseconds since [`EPOCH`], shifted by one so zero can mean "never".
fn stamp() -> u64 {
    u64::try_from(EPOCH.elapsed().as_millis())
        .unwrap_or(u64::MAX)
        .saturating_add(1)
}

/// Lock-free tally of lost events with interval-gated reporting.
///
/// Losses are added with [`record_drops`](Self::record_drops). A report hands
/// the accumulated count to a callback and resets it; nothing is reported
/// when the count is zero.
#[derive(Debug)]
pub struct RateLimitedWarner {
    interval_ms: u64,
    last_report: AtomicU64,
    tally: AtomicU64,
}

impl RateLimitedWarner {
    /// The first report after construction is never held back.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval_ms: u64::try_from(interval.as_millis()).unwrap_or(u64::MAX),
            last_report: AtomicU64::new(0),
            tally: AtomicU64::new(0),
        }
    }

    pub fn record_drop(&self) {
        self.record_drops(1);
    }

    pub fn record_drops(&self, count: u64) {
        self.tally.fetch_add(count, Ordering::Relaxed);
    }

    /// Losses recorded since the last report.
    pub fn unreported(&self) -> u64 {
        self.tally.load(Ordering::Relaxed)
    }

    /// Report the tally through `report` if the interval has elapsed since
    /// the previous report.
    pub fn warn_if_due(&self, report: impl FnMut(u64)) {
        let now = stamp();
        let last = self.last_report.load(Ordering::Relaxed);
        if last != 0 && now.saturating_sub(last) < self.interval_ms {
            return;
        }
        self.emit(now, report);
    }

    /// Report the tally now, regardless of the interval.
    pub fn flush(&self, report: impl FnMut(u64)) {
        self.emit(stamp(), report);
    }

    fn emit(&self, now: u64, mut report: impl FnMut(u64)) {
        let count = self.tally.swap(0, Ordering::Relaxed);
        if count == 0 {
            return;
        }
        report(count);
        self.last_report.store(now, Ordering::Relaxed);
    }
}

impl Default for RateLimitedWarner {
    fn default() -> Self {
        Self::new(DEFAULT_WARN_INTERVAL)
    }
}
