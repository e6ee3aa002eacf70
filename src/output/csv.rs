//! Per-worker CSV emitters
//!
//! Each worker optionally streams two time-series files:
//!
//! - response times: `<seconds_since_start>,<syscall_seconds>,<op_name>`
//! - bandwidth:      `<seconds_since_start>,<kb_per_second>,<op_name>`
//!
//! Bandwidth rows are only emitted for operations that moved bytes.
//! Filenames encode the run's start epoch, the PID, and the worker index so
//! multi-host runs into a shared output directory never collide.

use crate::workload::OpKind;
use anyhow::Context;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Buffered single-worker CSV stream
pub struct WorkerCsv {
    writer: BufWriter<File>,
    path: PathBuf,
}

impl WorkerCsv {
    /// Response-time stream for `worker`
    pub fn rsptimes(dir: &Path, start_epoch: u64, worker: usize) -> crate::Result<Self> {
        Self::create(
            dir,
            format!(
                "fschurn_{}_{}_{}_th_rspt.csv",
                start_epoch,
                std::process::id(),
                worker
            ),
        )
    }

    /// Bandwidth stream for `worker`
    pub fn bandwidth(dir: &Path, start_epoch: u64, worker: usize) -> crate::Result<Self> {
        Self::create(
            dir,
            format!(
                "fschurn_{}_{}_{}_th_bw.csv",
                start_epoch,
                std::process::id(),
                worker
            ),
        )
    }

    fn create(dir: &Path, filename: String) -> crate::Result<Self> {
        let path = dir.join(filename);
        let file = File::create(&path)
            .with_context(|| format!("cannot create CSV {}", path.display()))?;
        Ok(Self {
            writer: BufWriter::new(file),
            path,
        })
    }

    /// Append one `<elapsed>,<value>,<op>` row
    pub fn append_row(&mut self, elapsed_secs: f64, value: f64, op: OpKind) -> std::io::Result<()> {
        writeln!(self.writer, "{:.9},{:.6},{}", elapsed_secs, value, op.name())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flush buffered rows; called at worker exit
    pub fn finish(&mut self) -> std::io::Result<()> {
        self.writer.flush()
    }
}
