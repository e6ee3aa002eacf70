//! fschurn - filesystem and block-device aging workload generator
//!
//! fschurn drives a storage stack with a weighted blend of file lifecycle and
//! IO operations (create, read, append, random read/write, truncate, link,
//! rename, delete, discard) for long periods, so that the target filesystem
//! ages the way it would under a real application.
//!
//! # Architecture
//!
//! - **Weighted event source**: per-step operation selection from a workload table
//! - **Index distributions**: uniform, or gaussian with a moving mean that
//!   drifts the working set through the namespace over simulated time
//! - **Path mapper**: deterministic index-to-path mapping over an N-ary tree
//! - **Op handlers**: one per operation kind, with a classified error taxonomy
//! - **Shared stats**: lock-free counters, per-op latency histograms, CSV emitters

pub mod config;
pub mod distribution;
pub mod ops;
pub mod output;
pub mod stats;
pub mod target;
pub mod util;
pub mod worker;
pub mod workload;

// Re-export commonly used types
pub use config::Config;
pub use ops::OpResult;
pub use stats::RunStats;

/// Result type used throughout fschurn
pub type Result<T> = anyhow::Result<T>;
