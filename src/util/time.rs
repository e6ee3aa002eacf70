//! High-precision timing utilities
//!
//! Latency accounting in fschurn distinguishes the wall time of a whole
//! operation from the accumulated time spent inside raw syscalls. The
//! `SyscallTimer` below collects only the latter, so bandwidth rows reflect
//! device behavior rather than harness overhead (buffer synthesis, index
//! draws, path formatting).

use std::time::{Duration, Instant};

/// High-precision timestamp for latency measurements
///
/// A thin wrapper around `std::time::Instant` with convenience methods for
/// latency tracking.
#[derive(Debug, Clone, Copy)]
pub struct Timestamp {
    instant: Instant,
}

impl Timestamp {
    /// Create a new timestamp representing the current time
    #[inline]
    pub fn now() -> Self {
        Self {
            instant: Instant::now(),
        }
    }

    /// Get the elapsed time since this timestamp
    #[inline]
    pub fn elapsed(&self) -> Duration {
        self.instant.elapsed()
    }

    /// Get the duration between this timestamp and an earlier one
    #[inline]
    pub fn duration_since(&self, earlier: Timestamp) -> Duration {
        self.instant.duration_since(earlier.instant)
    }
}

impl Default for Timestamp {
    fn default() -> Self {
        Self::now()
    }
}

/// Accumulator for syscall-only time within one operation
///
/// Usage: wrap each raw read/write/ioctl call in `measure`, then read
/// `total()` once the record loop finishes. Anything done outside `measure`
/// (allocation, offset draws) is excluded by construction.
#[derive(Debug, Default)]
pub struct SyscallTimer {
    total: Duration,
}

impl SyscallTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` and add its wall time to the accumulated total
    #[inline]
    pub fn measure<T>(&mut self, f: impl FnOnce() -> T) -> T {
        let start = Instant::now();
        let out = f();
        self.total += start.elapsed();
        out
    }

    /// Accumulated syscall time
    #[inline]
    pub fn total(&self) -> Duration {
        self.total
    }
}
