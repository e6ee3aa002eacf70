//! CLI argument parsing using clap
//!
//! Every option may also be given in a TOML settings file (`--config`); a
//! value on the command line always wins. Options that historically shared a
//! short flag have been given distinct ones: `--bandwidth` is `-B` (the `-b`
//! short belongs to `--blocksize`), and `--random-distribution` /
//! `--dedupe-percentage` are long-only.

use super::file;
use super::{Config, DistributionType, Size};
use anyhow::{anyhow, Context};
use clap::Parser;
use std::path::PathBuf;

/// fschurn - filesystem and block-device aging workload generator
#[derive(Parser, Debug)]
#[command(name = "fschurn")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// TOML settings file; command-line options override it
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Root directory for created files
    #[arg(short = 't', long)]
    pub top_directory: Option<PathBuf>,

    /// Leaf basename prefix
    #[arg(short = 'P', long)]
    pub prefix: Option<String>,

    /// Cap on distinct file indices
    #[arg(short = 'f', long)]
    pub max_files: Option<u64>,

    /// Directory tree depth
    #[arg(short = 'l', long)]
    pub levels: Option<u32>,

    /// Subdirectories per level
    #[arg(short = 'D', long)]
    pub dirs_per_level: Option<u64>,

    /// Per-op transfer size in KB: N or MIN:MAX (inclusive)
    #[arg(short = 's', long)]
    pub file_size: Option<String>,

    /// Per-record transfer size in KB: N or MIN:MAX (inclusive)
    #[arg(short = 'b', long)]
    pub blocksize: Option<String>,

    /// Probability (percent) of fsync after a write op
    #[arg(short = 'Y', long)]
    pub fsync: Option<u8>,

    /// Probability (percent) of fdatasync after a write op
    #[arg(short = 'y', long)]
    pub fdatasync: Option<u8>,

    /// Filename access distribution
    #[arg(long, value_enum)]
    pub random_distribution: Option<DistributionType>,

    /// How fast the gaussian mean moves per simulated tick
    #[arg(long)]
    pub mean_velocity: Option<f64>,

    /// Spread of the gaussian filename distribution
    #[arg(long)]
    pub gaussian_stddev: Option<f64>,

    /// How many stddevs creates run ahead of reads
    #[arg(long)]
    pub create_stddevs_ahead: Option<f64>,

    /// -1: tick simulated time once per draw; >0: advance it by this many
    /// seconds of wall time
    #[arg(long)]
    pub drift_time: Option<i64>,

    /// Use direct IO (O_DIRECT); sizes and offsets are 4096-aligned
    #[arg(long)]
    pub direct: bool,

    /// Operate on this block device instead of a file tree
    #[arg(long)]
    pub rawdevice: Option<PathBuf>,

    /// Draw random offsets from a pre-shuffled whole-device permutation
    #[arg(long)]
    pub randommap: bool,

    /// Terminate the run once the device reports ENOSPC
    #[arg(short = 'F', long)]
    pub fill: bool,

    /// Target compressibility of write payloads (0 disables)
    #[arg(short = 'c', long)]
    pub compression_ratio: Option<f64>,

    /// Fraction of duplicate payload blocks (percent)
    #[arg(long)]
    pub dedupe_percentage: Option<u8>,

    /// Number of worker threads
    #[arg(long)]
    pub threads: Option<usize>,

    /// Per-worker operation bound (0 = unbounded)
    #[arg(short = 'o', long)]
    pub operation_count: Option<u64>,

    /// Run duration bound in seconds (0 = unbounded)
    #[arg(short = 'd', long)]
    pub duration: Option<u64>,

    /// Seconds between periodic stats reports (0 = off)
    #[arg(short = 'i', long)]
    pub report_interval: Option<u64>,

    /// Print the abbreviated stats report
    #[arg(short = 'a', long)]
    pub short_stats: bool,

    /// Cross-host barrier file name, created under the top directory
    #[arg(short = 'S', long)]
    pub starting_gun_file: Option<String>,

    /// Workers sleep while this file exists
    #[arg(short = 'p', long)]
    pub pause_file: Option<PathBuf>,

    /// Directory receiving per-worker response-time CSVs
    #[arg(short = 'T', long = "response-times")]
    pub rsptimes_dir: Option<PathBuf>,

    /// Directory receiving per-worker bandwidth CSVs
    #[arg(short = 'B', long = "bandwidth")]
    pub bw_dir: Option<PathBuf>,

    /// Operation weight table ("<op> <weight>" per line)
    #[arg(short = 'w', long)]
    pub workload_table: Option<PathBuf>,

    /// Where simulated time is persisted between runs
    #[arg(long)]
    pub simulated_time_path: Option<PathBuf>,

    /// Write a JSON counters summary here at the end of the run
    #[arg(long)]
    pub json_summary: Option<PathBuf>,
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Resolve the final configuration: settings file first, then CLI
    /// overrides, then validation.
    pub fn into_config(self) -> crate::Result<Config> {
        let mut config = match self.config {
            Some(ref path) => file::load(path)
                .with_context(|| format!("failed to load settings file {}", path.display()))?,
            None => Config::default(),
        };

        if let Some(v) = self.top_directory {
            config.top_directory = v;
        }
        if let Some(v) = self.prefix {
            config.prefix = v;
        }
        if let Some(v) = self.max_files {
            config.max_files = v;
        }
        if let Some(v) = self.levels {
            config.levels = v;
        }
        if let Some(v) = self.dirs_per_level {
            config.dirs_per_level = v;
        }
        if let Some(ref v) = self.file_size {
            config.file_size = v
                .parse::<Size>()
                .map_err(|e| anyhow!("invalid --file-size: {}", e))?;
        }
        if let Some(ref v) = self.blocksize {
            config.blocksize = v
                .parse::<Size>()
                .map_err(|e| anyhow!("invalid --blocksize: {}", e))?;
        }
        if let Some(v) = self.fsync {
            config.fsync_probability_pct = v;
        }
        if let Some(v) = self.fdatasync {
            config.fdatasync_probability_pct = v;
        }
        if let Some(v) = self.random_distribution {
            config.rand_distr_type = v;
        }
        if let Some(v) = self.mean_velocity {
            config.mean_index_velocity = v;
        }
        if let Some(v) = self.gaussian_stddev {
            config.gaussian_stddev = v;
        }
        if let Some(v) = self.create_stddevs_ahead {
            config.create_stddevs_ahead = v;
        }
        if let Some(v) = self.drift_time {
            config.drift_time = v;
        }
        if self.direct {
            config.direct = true;
        }
        if let Some(v) = self.rawdevice {
            config.rawdevice = Some(v);
        }
        if self.randommap {
            config.randommap = true;
        }
        if self.fill {
            config.fill = true;
        }
        if let Some(v) = self.compression_ratio {
            config.compression_ratio = v;
        }
        if let Some(v) = self.dedupe_percentage {
            config.dedupe_percentage = v;
        }
        if let Some(v) = self.threads {
            config.threads = v;
        }
        if let Some(v) = self.operation_count {
            config.opcount = v;
        }
        if let Some(v) = self.duration {
            config.duration = v;
        }
        if let Some(v) = self.report_interval {
            config.stats_report_interval = v;
        }
        if self.short_stats {
            config.short_stats = true;
        }
        if let Some(v) = self.starting_gun_file {
            config.starting_gun_file = Some(v);
        }
        if let Some(v) = self.pause_file {
            config.pause_file = v;
        }
        if let Some(v) = self.rsptimes_dir {
            config.rsptimes_dir = Some(v);
        }
        if let Some(v) = self.bw_dir {
            config.bw_dir = Some(v);
        }
        if let Some(v) = self.workload_table {
            config.workload_table = Some(v);
        }
        if let Some(v) = self.simulated_time_path {
            config.simulated_time_path = v;
        }
        if let Some(v) = self.json_summary {
            config.json_summary = Some(v);
        }

        config
            .validate()
            .map_err(|e| anyhow!("invalid configuration: {}", e))?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults_resolve() {
        let cli = Cli::parse_from(["fschurn"]);
        let config = cli.into_config().unwrap();
        assert_eq!(config.max_files, 20);
        assert_eq!(config.threads, 1);
    }

    #[test]
    fn test_cli_overrides() {
        let cli = Cli::parse_from([
            "fschurn",
            "-t",
            "/tmp/x",
            "-f",
            "5000",
            "--threads",
            "4",
            "-s",
            "64:128",
            "--random-distribution",
            "gaussian",
        ]);
        let config = cli.into_config().unwrap();
        assert_eq!(config.top_directory, PathBuf::from("/tmp/x"));
        assert_eq!(config.max_files, 5000);
        assert_eq!(config.threads, 4);
        assert_eq!(config.file_size, Size::Range(64, 128));
        assert_eq!(config.rand_distr_type, DistributionType::Gaussian);
    }

    #[test]
    fn test_cli_rejects_bad_size() {
        let cli = Cli::parse_from(["fschurn", "-s", "big"]);
        assert!(cli.into_config().is_err());
    }

    #[test]
    fn test_cli_rejects_sync_percentages_over_100() {
        let cli = Cli::parse_from(["fschurn", "-Y", "80", "-y", "30"]);
        assert!(cli.into_config().is_err());
    }

    #[test]
    fn test_blocksize_and_bandwidth_shorts_are_distinct() {
        let cli = Cli::parse_from(["fschurn", "-b", "8", "-B", "/tmp/bw"]);
        let config = cli.into_config().unwrap();
        assert_eq!(config.blocksize, Size::Fixed(8));
        assert_eq!(config.bw_dir, Some(PathBuf::from("/tmp/bw")));
    }
}
