//! Statistics collection
//!
//! One process-wide [`RunStats`] aggregate is shared by every worker.
//! Counters are lock-free relaxed atomics, each on its own cache line so
//! concurrent workers never false-share; latency histograms sit behind
//! short-lived mutexes. The periodic reporter reads eventually-consistent
//! values; after workers join the final report is exact.

use crate::workload::OpKind;
use hdrhistogram::Histogram;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Cache-line aligned atomic counter to prevent false sharing
///
/// Cache lines are 64 bytes on every CPU this tool targets; padding each
/// counter to a full line keeps one worker's updates from invalidating a
/// neighbour's.
#[repr(align(64))]
#[derive(Debug)]
pub struct AlignedCounter {
    value: AtomicU64,
    _padding: [u8; 56],
}

impl AlignedCounter {
    pub fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
            _padding: [0; 56],
        }
    }

    #[inline]
    pub fn add(&self, val: u64) {
        self.value.fetch_add(val, Ordering::Relaxed);
    }

    #[inline]
    pub fn incr(&self) {
        self.add(1);
    }

    #[inline]
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

impl Default for AlignedCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// Expected error classes
///
/// An aging workload draws paths blindly, so misses and collisions are part
/// of normal operation: each class increments its named counter and the op
/// reports success so the run keeps going.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Create/link target already present
    AlreadyExists,
    /// Source path not (yet) created, or already deleted
    FileNotFound,
    /// mkdir failed with ENOSPC
    NoDirSpace,
    /// create failed with ENOSPC before any data was written
    NoInodeSpace,
    /// write failed with ENOSPC
    NoSpace,
}

/// Process-wide run statistics
#[derive(Debug)]
pub struct RunStats {
    // op completion counters
    pub have_created: AlignedCounter,
    pub have_read: AlignedCounter,
    pub have_appended: AlignedCounter,
    pub have_randomly_written: AlignedCounter,
    pub have_randomly_read: AlignedCounter,
    pub have_truncated: AlignedCounter,
    pub have_deleted: AlignedCounter,
    pub have_renamed: AlignedCounter,
    pub have_linked: AlignedCounter,
    pub have_hlinked: AlignedCounter,
    pub have_discarded: AlignedCounter,

    // request counters, one per record-sized syscall
    pub read_requests: AlignedCounter,
    pub randread_requests: AlignedCounter,
    pub write_requests: AlignedCounter,
    pub randwrite_requests: AlignedCounter,
    pub discard_requests: AlignedCounter,

    // byte counters
    pub read_bytes: AlignedCounter,
    pub randread_bytes: AlignedCounter,
    pub write_bytes: AlignedCounter,
    pub randwrite_bytes: AlignedCounter,
    pub discard_bytes: AlignedCounter,

    // sync counters
    pub fsyncs: AlignedCounter,
    pub fdatasyncs: AlignedCounter,

    pub dirs_created: AlignedCounter,

    // expected-error counters
    pub e_already_exists: AlignedCounter,
    pub e_file_not_found: AlignedCounter,
    pub e_no_dir_space: AlignedCounter,
    pub e_no_inode_space: AlignedCounter,
    pub e_no_space: AlignedCounter,

    pub total_errors: AlignedCounter,

    // per-op-kind syscall-time histograms, microseconds
    latencies: Vec<Mutex<Histogram<u64>>>,
}

impl RunStats {
    pub fn new() -> Self {
        let latencies = OpKind::ALL
            .iter()
            .map(|_| {
                Mutex::new(
                    Histogram::new_with_bounds(1, 3_600_000_000, 3)
                        .expect("histogram bounds are static"),
                )
            })
            .collect();

        Self {
            have_created: AlignedCounter::new(),
            have_read: AlignedCounter::new(),
            have_appended: AlignedCounter::new(),
            have_randomly_written: AlignedCounter::new(),
            have_randomly_read: AlignedCounter::new(),
            have_truncated: AlignedCounter::new(),
            have_deleted: AlignedCounter::new(),
            have_renamed: AlignedCounter::new(),
            have_linked: AlignedCounter::new(),
            have_hlinked: AlignedCounter::new(),
            have_discarded: AlignedCounter::new(),
            read_requests: AlignedCounter::new(),
            randread_requests: AlignedCounter::new(),
            write_requests: AlignedCounter::new(),
            randwrite_requests: AlignedCounter::new(),
            discard_requests: AlignedCounter::new(),
            read_bytes: AlignedCounter::new(),
            randread_bytes: AlignedCounter::new(),
            write_bytes: AlignedCounter::new(),
            randwrite_bytes: AlignedCounter::new(),
            discard_bytes: AlignedCounter::new(),
            fsyncs: AlignedCounter::new(),
            fdatasyncs: AlignedCounter::new(),
            dirs_created: AlignedCounter::new(),
            e_already_exists: AlignedCounter::new(),
            e_file_not_found: AlignedCounter::new(),
            e_no_dir_space: AlignedCounter::new(),
            e_no_inode_space: AlignedCounter::new(),
            e_no_space: AlignedCounter::new(),
            total_errors: AlignedCounter::new(),
            latencies,
        }
    }

    /// Fold a completed operation into its completion counter
    pub fn op_completed(&self, kind: OpKind) {
        match kind {
            OpKind::Create => self.have_created.incr(),
            OpKind::Read => self.have_read.incr(),
            OpKind::Append => self.have_appended.incr(),
            OpKind::RandomWrite => self.have_randomly_written.incr(),
            OpKind::RandomRead => self.have_randomly_read.incr(),
            OpKind::Truncate => self.have_truncated.incr(),
            OpKind::Delete => self.have_deleted.incr(),
            OpKind::Rename => self.have_renamed.incr(),
            OpKind::Link => self.have_linked.incr(),
            OpKind::Hardlink => self.have_hlinked.incr(),
            OpKind::RandomDiscard => self.have_discarded.incr(),
        }
    }

    /// Fold an expected error into its classification counter
    pub fn classify(&self, class: ErrorClass) {
        match class {
            ErrorClass::AlreadyExists => self.e_already_exists.incr(),
            ErrorClass::FileNotFound => self.e_file_not_found.incr(),
            ErrorClass::NoDirSpace => self.e_no_dir_space.incr(),
            ErrorClass::NoInodeSpace => self.e_no_inode_space.incr(),
            ErrorClass::NoSpace => self.e_no_space.incr(),
        }
    }

    /// Record syscall-only time for one operation
    pub fn record_latency(&self, kind: OpKind, elapsed: Duration) {
        let micros = elapsed.as_micros().min(u128::from(u64::MAX)) as u64;
        let mut hist = self.latencies[kind.index()].lock().unwrap();
        hist.saturating_record(micros.max(1));
    }

    /// Sum of all op-completion counters
    pub fn completed_total(&self) -> u64 {
        self.have_created.get()
            + self.have_read.get()
            + self.have_appended.get()
            + self.have_randomly_written.get()
            + self.have_randomly_read.get()
            + self.have_truncated.get()
            + self.have_deleted.get()
            + self.have_renamed.get()
            + self.have_linked.get()
            + self.have_hlinked.get()
            + self.have_discarded.get()
    }

    /// Sum of all expected-error counters
    pub fn classified_total(&self) -> u64 {
        self.e_already_exists.get()
            + self.e_file_not_found.get()
            + self.e_no_dir_space.get()
            + self.e_no_inode_space.get()
            + self.e_no_space.get()
    }

    /// True once a device-full class has been observed (fill mode predicate)
    pub fn device_full_seen(&self) -> bool {
        self.e_no_space.get() > 0 || self.e_no_inode_space.get() > 0
    }

    /// Latency percentiles for one op kind, in microseconds, or `None` if
    /// the kind never ran
    pub fn latency_percentiles(&self, kind: OpKind) -> Option<LatencySummary> {
        let hist = self.latencies[kind.index()].lock().unwrap();
        if hist.is_empty() {
            return None;
        }
        Some(LatencySummary {
            count: hist.len(),
            mean_us: hist.mean(),
            p50_us: hist.value_at_quantile(0.50),
            p95_us: hist.value_at_quantile(0.95),
            p99_us: hist.value_at_quantile(0.99),
            max_us: hist.max(),
        })
    }

    /// Abbreviated periodic report
    pub fn print_short_report(&self, elapsed_secs: f64, last_center: f64) {
        println!("elapsed time: {:9.1}", elapsed_secs);
        println!(
            "{:9} = center\n\
             {:9} = files created\t{:9} = files appended to\n\
             {:9} = files random write\t{:9} = files read\n\
             {:9} = files randomly read",
            last_center as u64,
            self.have_created.get(),
            self.have_appended.get(),
            self.have_randomly_written.get(),
            self.have_read.get(),
            self.have_randomly_read.get(),
        );
    }

    /// Full counter report
    pub fn print_report(&self, elapsed_secs: f64, last_center: f64) {
        println!();
        println!("elapsed time: {:9.1}", elapsed_secs);
        println!(
            "\n\
             {:9} = center\n\
             {:9} = files created\n\
             {:9} = files appended to\n\
             {:9} = files randomly written to\n\
             {:9} = files read\n\
             {:9} = files randomly read\n\
             {:9} = files truncated\n\
             {:9} = files deleted\n\
             {:9} = files renamed\n\
             {:9} = softlinks created\n\
             {:9} = hardlinks created\n\
             {:9} = discards completed",
            last_center as u64,
            self.have_created.get(),
            self.have_appended.get(),
            self.have_randomly_written.get(),
            self.have_read.get(),
            self.have_randomly_read.get(),
            self.have_truncated.get(),
            self.have_deleted.get(),
            self.have_renamed.get(),
            self.have_linked.get(),
            self.have_hlinked.get(),
            self.have_discarded.get(),
        );
        println!(
            "{:9} = read requests\n\
             {:9} = read bytes\n\
             {:9} = random read requests\n\
             {:9} = random read bytes\n\
             {:9} = write requests\n\
             {:9} = write bytes\n\
             {:9} = random write requests\n\
             {:9} = random write bytes\n\
             {:9} = fdatasync calls\n\
             {:9} = fsync calls\n\
             {:9} = leaf directories created\n\
             {:9} = discard requests\n\
             {:9} = discard bytes",
            self.read_requests.get(),
            self.read_bytes.get(),
            self.randread_requests.get(),
            self.randread_bytes.get(),
            self.write_requests.get(),
            self.write_bytes.get(),
            self.randwrite_requests.get(),
            self.randwrite_bytes.get(),
            self.fdatasyncs.get(),
            self.fsyncs.get(),
            self.dirs_created.get(),
            self.discard_requests.get(),
            self.discard_bytes.get(),
        );
        println!(
            "{:9} = no create -- file already existed\n\
             {:9} = file not found",
            self.e_already_exists.get(),
            self.e_file_not_found.get(),
        );
        println!(
            "{:9} = no directory space\n\
             {:9} = no space for new inode\n\
             {:9} = no space for write data",
            self.e_no_dir_space.get(),
            self.e_no_inode_space.get(),
            self.e_no_space.get(),
        );
        println!("{:9} = total errors", self.total_errors.get());
    }

    /// Per-op latency percentile table (final report only)
    pub fn print_latency_summary(&self) {
        let mut header_printed = false;
        for kind in OpKind::ALL {
            if let Some(s) = self.latency_percentiles(kind) {
                if !header_printed {
                    println!();
                    println!(
                        "{:<16} {:>9} {:>9} {:>9} {:>9} {:>9}",
                        "op", "count", "p50(us)", "p95(us)", "p99(us)", "max(us)"
                    );
                    header_printed = true;
                }
                println!(
                    "{:<16} {:>9} {:>9} {:>9} {:>9} {:>9}",
                    kind.name(),
                    s.count,
                    s.p50_us,
                    s.p95_us,
                    s.p99_us,
                    s.max_us
                );
            }
        }
    }
}

impl Default for RunStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Percentile snapshot of one op kind's syscall time
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct LatencySummary {
    pub count: u64,
    pub mean_us: f64,
    pub p50_us: u64,
    pub p95_us: u64,
    pub p99_us: u64,
    pub max_us: u64,
}
