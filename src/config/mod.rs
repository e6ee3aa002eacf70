//! Configuration module
//!
//! Handles CLI argument parsing, optional TOML settings files, and
//! validation. The resolved [`Config`] is immutable for the life of a run;
//! workers receive it behind an `Arc` and never write to it.

pub mod cli;
pub mod file;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

pub const BYTES_PER_KB: u64 = 1024;

/// A size given either as a single KB value or an inclusive KB range
///
/// `--file-size 1024` is `Fixed(1024)`; `--file-size 64:4096` is
/// `Range(64, 4096)` and every operation draws a fresh value from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Size {
    Fixed(u64),
    Range(u64, u64),
}

impl Size {
    /// Draw a size in bytes (KB range bounds are inclusive)
    pub fn draw_bytes<R: rand::Rng>(&self, rng: &mut R) -> u64 {
        match *self {
            Size::Fixed(kb) => kb * BYTES_PER_KB,
            Size::Range(min_kb, max_kb) => {
                rng.gen_range(min_kb * BYTES_PER_KB..=max_kb * BYTES_PER_KB)
            }
        }
    }

    /// Largest value this size can produce, in bytes
    pub fn max_bytes(&self) -> u64 {
        match *self {
            Size::Fixed(kb) => kb * BYTES_PER_KB,
            Size::Range(_, max_kb) => max_kb * BYTES_PER_KB,
        }
    }
}

impl FromStr for Size {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some((min, max)) = s.split_once(':') {
            let min: u64 = min
                .trim()
                .parse()
                .map_err(|_| format!("invalid size range minimum: {:?}", min))?;
            let max: u64 = max
                .trim()
                .parse()
                .map_err(|_| format!("invalid size range maximum: {:?}", max))?;
            if min > max {
                return Err(format!("size range minimum {} exceeds maximum {}", min, max));
            }
            Ok(Size::Range(min, max))
        } else {
            let kb: u64 = s
                .trim()
                .parse()
                .map_err(|_| format!("invalid size: {:?}", s))?;
            Ok(Size::Fixed(kb))
        }
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Size::Fixed(kb) => write!(f, "{}", kb),
            Size::Range(min, max) => write!(f, "{}:{}", min, max),
        }
    }
}

// Sizes appear in TOML settings files as the same "N" / "MIN:MAX" strings
// the CLI accepts.
impl Serialize for Size {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Size {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Size::from_str(&s).map_err(serde::de::Error::custom)
    }
}

/// Filename access distribution type
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum DistributionType {
    /// Equal probability for every file index
    #[default]
    Uniform,
    /// Normal distribution whose mean drifts with simulated time
    Gaussian,
}

impl fmt::Display for DistributionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DistributionType::Uniform => write!(f, "uniform"),
            DistributionType::Gaussian => write!(f, "gaussian"),
        }
    }
}

/// Complete run configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root directory for created files
    pub top_directory: PathBuf,
    /// Leaf basename prefix
    pub prefix: String,
    /// Cap on distinct file indices
    pub max_files: u64,
    /// Directory tree depth
    pub levels: u32,
    /// Subdirectories per level
    pub dirs_per_level: u64,
    /// Per-op total transfer size (KB value or inclusive range)
    pub file_size: Size,
    /// Per-record transfer size (KB value or inclusive range)
    pub blocksize: Size,
    /// Probability of fsync after a write op (percent)
    pub fsync_probability_pct: u8,
    /// Probability of fdatasync after a write op (percent)
    pub fdatasync_probability_pct: u8,
    /// Filename access distribution
    pub rand_distr_type: DistributionType,
    /// How fast the gaussian mean moves per simulated tick
    pub mean_index_velocity: f64,
    /// Spread of the gaussian filename distribution
    pub gaussian_stddev: f64,
    /// How many stddevs creates run ahead of reads
    pub create_stddevs_ahead: f64,
    /// -1: simulated time ticks once per draw; >0: advances by this many
    /// seconds of wall time in the driver
    pub drift_time: i64,
    /// Use O_DIRECT (forces 4096-byte alignment of sizes and offsets)
    pub direct: bool,
    /// Operate on this block device instead of a file tree
    pub rawdevice: Option<PathBuf>,
    /// Draw random offsets from a pre-shuffled whole-device permutation
    pub randommap: bool,
    /// Terminate the run once the device reports ENOSPC
    pub fill: bool,
    /// Target compressibility of write payloads (0.0 disables)
    pub compression_ratio: f64,
    /// Fraction of duplicate payload blocks (percent)
    pub dedupe_percentage: u8,
    /// Number of worker threads
    pub threads: usize,
    /// Per-worker operation bound (0 = unbounded)
    pub opcount: u64,
    /// Run duration bound in seconds (0 = unbounded)
    pub duration: u64,
    /// Seconds between periodic stats reports (0 = off)
    pub stats_report_interval: u64,
    /// Print the abbreviated stats report
    pub short_stats: bool,
    /// Cross-host barrier file name, resolved under `top_directory`
    pub starting_gun_file: Option<String>,
    /// Workers sleep while this file exists
    pub pause_file: PathBuf,
    /// Directory receiving per-worker response-time CSVs
    pub rsptimes_dir: Option<PathBuf>,
    /// Directory receiving per-worker bandwidth CSVs
    pub bw_dir: Option<PathBuf>,
    /// Operation weight table ("<op> <weight>" per line)
    pub workload_table: Option<PathBuf>,
    /// Where simulated time is persisted between runs
    pub simulated_time_path: PathBuf,
    /// Write a JSON counters summary here at the end of the run
    pub json_summary: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            top_directory: PathBuf::from("/tmp/fschurn"),
            prefix: "f".to_string(),
            max_files: 20,
            levels: 2,
            dirs_per_level: 3,
            file_size: Size::Fixed(1024),
            blocksize: Size::Fixed(4),
            fsync_probability_pct: 20,
            fdatasync_probability_pct: 10,
            rand_distr_type: DistributionType::Uniform,
            mean_index_velocity: 0.0,
            gaussian_stddev: 1000.0,
            create_stddevs_ahead: 3.0,
            drift_time: -1,
            direct: false,
            rawdevice: None,
            randommap: false,
            fill: false,
            compression_ratio: 0.0,
            dedupe_percentage: 0,
            threads: 1,
            opcount: 0,
            duration: 1,
            stats_report_interval: 0,
            short_stats: false,
            starting_gun_file: None,
            pause_file: PathBuf::from("/var/tmp/pause"),
            rsptimes_dir: None,
            bw_dir: None,
            workload_table: None,
            simulated_time_path: std::env::temp_dir().join("fschurn-simtime.tmp"),
            json_summary: None,
        }
    }
}

impl Config {
    /// Total leaf directories in the tree, `dirs_per_level ^ levels`
    pub fn total_dirs(&self) -> u64 {
        self.dirs_per_level.saturating_pow(self.levels)
    }

    /// The starting-gun file lives under `top_directory` so every host on a
    /// shared filesystem sees the same barrier.
    pub fn starting_gun_path(&self) -> Option<PathBuf> {
        self.starting_gun_file
            .as_ref()
            .map(|name| self.top_directory.join(name))
    }

    /// Sentinel whose presence ends the run
    pub fn stop_file_path(&self) -> PathBuf {
        self.top_directory.join("stop-file")
    }

    /// Validate the resolved configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.max_files == 0 {
            return Err("max-files must be greater than 0".to_string());
        }
        if self.dirs_per_level == 0 {
            return Err("dirs-per-level must be greater than 0".to_string());
        }
        if self.total_dirs() == u64::MAX {
            return Err(format!(
                "directory tree too large (levels={}, dirs-per-level={})",
                self.levels, self.dirs_per_level
            ));
        }
        if self.threads == 0 {
            return Err("threads must be greater than 0".to_string());
        }
        if self.threads > num_cpus::get() * 8 {
            log::warn!(
                "{} threads heavily oversubscribes {} CPUs",
                self.threads,
                num_cpus::get()
            );
        }
        let sync_pct = u32::from(self.fsync_probability_pct)
            + u32::from(self.fdatasync_probability_pct);
        if sync_pct > 100 {
            return Err(format!(
                "fsync ({}) + fdatasync ({}) probabilities exceed 100",
                self.fsync_probability_pct, self.fdatasync_probability_pct
            ));
        }
        if self.compression_ratio != 0.0 && self.compression_ratio < 1.0 {
            return Err(format!(
                "compression-ratio must be 0 (off) or at least 1.0, got {}",
                self.compression_ratio
            ));
        }
        if self.dedupe_percentage > 100 {
            return Err(format!(
                "dedupe-percentage must be 0-100, got {}",
                self.dedupe_percentage
            ));
        }
        if self.rand_distr_type == DistributionType::Gaussian && self.gaussian_stddev <= 0.0 {
            return Err("gaussian-stddev must be positive".to_string());
        }
        if self.randommap && self.rawdevice.is_none() {
            return Err("randommap requires a rawdevice".to_string());
        }
        if self.blocksize.max_bytes() == 0 {
            return Err("blocksize must be greater than 0".to_string());
        }
        Ok(())
    }
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Configuration:")?;
        writeln!(f, "  Top directory:       {}", self.top_directory.display())?;
        writeln!(f, "  Prefix:              {}", self.prefix)?;
        writeln!(f, "  Max files:           {}", self.max_files)?;
        writeln!(
            f,
            "  Tree:                {} level(s) x {} dir(s)",
            self.levels, self.dirs_per_level
        )?;
        writeln!(f, "  File size (KB):      {}", self.file_size)?;
        writeln!(f, "  Block size (KB):     {}", self.blocksize)?;
        writeln!(
            f,
            "  Sync:                fsync {}%, fdatasync {}%",
            self.fsync_probability_pct, self.fdatasync_probability_pct
        )?;
        writeln!(f, "  Distribution:        {}", self.rand_distr_type)?;
        if self.rand_distr_type == DistributionType::Gaussian {
            writeln!(f, "  Mean velocity:       {}", self.mean_index_velocity)?;
            writeln!(f, "  Gaussian stddev:     {}", self.gaussian_stddev)?;
            writeln!(f, "  Create stddevs ahead:{:>9.1}", self.create_stddevs_ahead)?;
            writeln!(f, "  Drift time:          {}", self.drift_time)?;
        }
        writeln!(f, "  Direct IO:           {}", self.direct)?;
        if let Some(ref dev) = self.rawdevice {
            writeln!(f, "  Raw device:          {}", dev.display())?;
            writeln!(f, "  Random map:          {}", self.randommap)?;
        }
        writeln!(f, "  Fill device:         {}", self.fill)?;
        if self.compression_ratio != 0.0 {
            writeln!(f, "  Compression ratio:   {}", self.compression_ratio)?;
            writeln!(f, "  Dedupe percentage:   {}", self.dedupe_percentage)?;
        }
        writeln!(f, "  Threads:             {}", self.threads)?;
        writeln!(f, "  Operation count:     {}", self.opcount)?;
        writeln!(f, "  Duration:            {}s", self.duration)?;
        if self.stats_report_interval > 0 {
            writeln!(f, "  Report interval:     {}s", self.stats_report_interval)?;
        }
        if let Some(gun) = self.starting_gun_path() {
            writeln!(f, "  Starting gun:        {}", gun.display())?;
        }
        if let Some(ref dir) = self.rsptimes_dir {
            writeln!(f, "  Response times:      {}", dir.display())?;
        }
        if let Some(ref dir) = self.bw_dir {
            writeln!(f, "  Bandwidth:           {}", dir.display())?;
        }
        if let Some(ref table) = self.workload_table {
            writeln!(f, "  Workload table:      {}", table.display())?;
        }
        Ok(())
    }
}
