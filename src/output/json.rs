//! JSON run summary
//!
//! A machine-readable rendition of the final report, for test harnesses
//! that post-process many runs. One flat document per run.

use crate::stats::{LatencySummary, RunStats};
use crate::workload::OpKind;
use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

/// Final counters of one run
#[derive(Debug, Serialize)]
pub struct RunSummary {
    pub started_at: String,
    pub elapsed_secs: f64,
    pub last_center: f64,

    pub have_created: u64,
    pub have_read: u64,
    pub have_appended: u64,
    pub have_randomly_written: u64,
    pub have_randomly_read: u64,
    pub have_truncated: u64,
    pub have_deleted: u64,
    pub have_renamed: u64,
    pub have_linked: u64,
    pub have_hlinked: u64,
    pub have_discarded: u64,

    pub read_requests: u64,
    pub read_bytes: u64,
    pub randread_requests: u64,
    pub randread_bytes: u64,
    pub write_requests: u64,
    pub write_bytes: u64,
    pub randwrite_requests: u64,
    pub randwrite_bytes: u64,
    pub discard_requests: u64,
    pub discard_bytes: u64,

    pub fsyncs: u64,
    pub fdatasyncs: u64,
    pub dirs_created: u64,

    pub e_already_exists: u64,
    pub e_file_not_found: u64,
    pub e_no_dir_space: u64,
    pub e_no_inode_space: u64,
    pub e_no_space: u64,
    pub total_errors: u64,

    /// Syscall-time percentiles per op kind that actually ran
    pub latencies: BTreeMap<&'static str, LatencySummary>,
}

impl RunSummary {
    pub fn collect(
        stats: &RunStats,
        started_at: DateTime<Utc>,
        elapsed_secs: f64,
        last_center: f64,
    ) -> Self {
        let latencies = OpKind::ALL
            .iter()
            .filter_map(|&kind| stats.latency_percentiles(kind).map(|s| (kind.name(), s)))
            .collect();

        Self {
            started_at: started_at.to_rfc3339(),
            elapsed_secs,
            last_center,
            have_created: stats.have_created.get(),
            have_read: stats.have_read.get(),
            have_appended: stats.have_appended.get(),
            have_randomly_written: stats.have_randomly_written.get(),
            have_randomly_read: stats.have_randomly_read.get(),
            have_truncated: stats.have_truncated.get(),
            have_deleted: stats.have_deleted.get(),
            have_renamed: stats.have_renamed.get(),
            have_linked: stats.have_linked.get(),
            have_hlinked: stats.have_hlinked.get(),
            have_discarded: stats.have_discarded.get(),
            read_requests: stats.read_requests.get(),
            read_bytes: stats.read_bytes.get(),
            randread_requests: stats.randread_requests.get(),
            randread_bytes: stats.randread_bytes.get(),
            write_requests: stats.write_requests.get(),
            write_bytes: stats.write_bytes.get(),
            randwrite_requests: stats.randwrite_requests.get(),
            randwrite_bytes: stats.randwrite_bytes.get(),
            discard_requests: stats.discard_requests.get(),
            discard_bytes: stats.discard_bytes.get(),
            fsyncs: stats.fsyncs.get(),
            fdatasyncs: stats.fdatasyncs.get(),
            dirs_created: stats.dirs_created.get(),
            e_already_exists: stats.e_already_exists.get(),
            e_file_not_found: stats.e_file_not_found.get(),
            e_no_dir_space: stats.e_no_dir_space.get(),
            e_no_inode_space: stats.e_no_inode_space.get(),
            e_no_space: stats.e_no_space.get(),
            total_errors: stats.total_errors.get(),
            latencies,
        }
    }

    pub fn write(&self, path: &Path) -> crate::Result<()> {
        let file = std::fs::File::create(path)
            .with_context(|| format!("cannot create JSON summary {}", path.display()))?;
        serde_json::to_writer_pretty(file, self)
            .with_context(|| format!("cannot serialize JSON summary {}", path.display()))?;
        Ok(())
    }
}
