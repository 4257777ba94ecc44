//! # Transfer Statistics
//!
//! Per-channel counters. Workers update them lock-free on the hot path;
//! callers read a consistent-enough [`TransferStats`] snapshot at any time.

use core::sync::atomic::{AtomicU64, Ordering};
use core::time::Duration;

// =============================================================================
// SNAPSHOT
// =============================================================================

/// Cumulative counters for one channel
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferStats {
    /// Bytes moved by completed submissions
    pub bytes: u64,
    /// Time spent between submission and completion
    pub elapsed: Duration,
    /// Hardware submissions issued
    pub submissions: u64,
    /// Successful completions
    pub completions: u64,
    /// Rejected submissions and failed completions
    pub errors: u64,
    /// Completions that did not arrive in time
    pub timeouts: u64,
}

impl TransferStats {
    /// Average throughput over the accumulated transfer time
    pub fn bytes_per_second(&self) -> u64 {
        let nanos = self.elapsed.as_nanos();
        if nanos == 0 {
            return 0;
        }
        (self.bytes as u128 * 1_000_000_000 / nanos) as u64
    }

    /// Check if any error or timeout was recorded
    pub fn has_faults(&self) -> bool {
        self.errors != 0 || self.timeouts != 0
    }
}

// =============================================================================
// LIVE COUNTERS
// =============================================================================

/// Atomic counters backing [`TransferStats`]
#[derive(Debug, Default)]
pub struct StatsCounters {
    bytes: AtomicU64,
    elapsed_ns: AtomicU64,
    submissions: AtomicU64,
    completions: AtomicU64,
    errors: AtomicU64,
    timeouts: AtomicU64,
}

impl StatsCounters {
    /// Create zeroed counters
    pub const fn new() -> Self {
        Self {
            bytes: AtomicU64::new(0),
            elapsed_ns: AtomicU64::new(0),
            submissions: AtomicU64::new(0),
            completions: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
        }
    }

    /// Zero every counter (new transfer bound)
    pub fn reset(&self) {
        self.bytes.store(0, Ordering::Relaxed);
        self.elapsed_ns.store(0, Ordering::Relaxed);
        self.submissions.store(0, Ordering::Relaxed);
        self.completions.store(0, Ordering::Relaxed);
        self.errors.store(0, Ordering::Relaxed);
        self.timeouts.store(0, Ordering::Relaxed);
    }

    /// Count one hardware submission
    #[inline]
    pub fn record_submission(&self) {
        self.submissions.fetch_add(1, Ordering::Relaxed);
    }

    /// Count one successful completion
    #[inline]
    pub fn record_completion(&self, bytes: usize, elapsed: Duration) {
        self.bytes.fetch_add(bytes as u64, Ordering::Relaxed);
        self.elapsed_ns
            .fetch_add(elapsed.as_nanos() as u64, Ordering::Relaxed);
        self.completions.fetch_add(1, Ordering::Relaxed);
    }

    /// Count one error
    #[inline]
    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Count one timeout
    #[inline]
    pub fn record_timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    /// Take a snapshot
    pub fn snapshot(&self) -> TransferStats {
        TransferStats {
            bytes: self.bytes.load(Ordering::Relaxed),
            elapsed: Duration::from_nanos(self.elapsed_ns.load(Ordering::Relaxed)),
            submissions: self.submissions.load(Ordering::Relaxed),
            completions: self.completions.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
        }
    }
}

static_assertions::assert_impl_all!(StatsCounters: Send, Sync);
