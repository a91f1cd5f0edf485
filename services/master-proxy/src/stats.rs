//! Process-wide proxy counters and the periodic status report.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::notify::Notifier;

/// Default interval between status reports.
pub const DEFAULT_REPORT_INTERVAL: Duration = Duration::from_secs(5);

/// Counters shared by every port and session.
#[derive(Debug, Default)]
pub struct GlobalStats {
    /// Sessions handed to a master (monotonic).
    sessions_proxied: AtomicU64,
    /// Copy tasks currently running (two per live session).
    pipes_active: AtomicU64,
    /// Connections closed on accept because no master was known.
    sessions_refused: AtomicU64,
    /// Sessions abandoned because the master could not be dialed.
    dial_failures: AtomicU64,
}

impl GlobalStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a session dispatched to the current master.
    pub fn record_session(&self) {
        self.sessions_proxied.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a connection refused while searching.
    pub fn record_refused(&self) {
        self.sessions_refused.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a failed dial to the master.
    pub fn record_dial_failure(&self) {
        self.dial_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Mark a copy task active until the returned guard drops.
    pub fn pipe_guard(self: &Arc<Self>) -> PipeGuard {
        self.pipes_active.fetch_add(1, Ordering::Relaxed);
        PipeGuard {
            stats: Arc::clone(self),
        }
    }

    pub fn sessions_proxied(&self) -> u64 {
        self.sessions_proxied.load(Ordering::Relaxed)
    }

    pub fn pipes_active(&self) -> u64 {
        self.pipes_active.load(Ordering::Relaxed)
    }

    pub fn sessions_refused(&self) -> u64 {
        self.sessions_refused.load(Ordering::Relaxed)
    }

    pub fn dial_failures(&self) -> u64 {
        self.dial_failures.load(Ordering::Relaxed)
    }

    /// Approximate live sessions (two pipes each).
    pub fn active_sessions(&self) -> u64 {
        self.pipes_active() / 2
    }
}

/// Keeps one copy task counted as active; decrements on drop, including
/// unwinding.
#[derive(Debug)]
pub struct PipeGuard {
    stats: Arc<GlobalStats>,
}

impl Drop for PipeGuard {
    fn drop(&mut self) {
        self.stats.pipes_active.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Computes the proxied-sessions rate between consecutive samples.
#[derive(Debug, Clone)]
pub struct RateSampler {
    last_at: Instant,
    last_count: u64,
}

impl RateSampler {
    pub fn new(now: Instant, count: u64) -> Self {
        Self {
            last_at: now,
            last_count: count,
        }
    }

    /// Sessions per second since the previous sample.
    pub fn sample(&mut self, now: Instant, count: u64) -> f64 {
        let elapsed = now.saturating_duration_since(self.last_at).as_secs_f64();
        let delta = count.saturating_sub(self.last_count);
        self.last_at = now;
        self.last_count = count;

        if elapsed > 0.0 {
            delta as f64 / elapsed
        } else {
            0.0
        }
    }
}

/// One status line.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatusReport {
    pub active: u64,
    pub proxied: u64,
    pub rate: f64,
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Active connections: {}, proxied: {}, rate: {:.1}/sec",
            self.active, self.proxied, self.rate
        )
    }
}

/// Push a status line to `notifier` every `interval`, forever.
pub async fn run_status_loop(
    stats: Arc<GlobalStats>,
    notifier: Arc<dyn Notifier>,
    interval: Duration,
) {
    let mut sampler = RateSampler::new(Instant::now(), stats.sessions_proxied());
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);

    loop {
        ticker.tick().await;

        let proxied = stats.sessions_proxied();
        let report = StatusReport {
            active: stats.active_sessions(),
            proxied,
            rate: sampler.sample(Instant::now(), proxied),
        };

        debug!(
            refused = stats.sessions_refused(),
            dial_failures = stats.dial_failures(),
            "Status sample"
        );
        notifier.status(&report.to_string());
    }
}
