//! Filename index distributions
//!
//! Each operation targets a file index drawn from the configured access
//! distribution. Two are provided:
//!
//! - **Uniform**: equal probability across the per-directory index range.
//! - **Gaussian moving mean**: a normal distribution whose center is
//!   `simulated_time * mean_index_velocity`. Creates are shifted ahead of
//!   the center by `create_stddevs_ahead` standard deviations, so reads and
//!   deletes naturally trail the freshly created tail of the namespace. As
//!   simulated time advances the whole working set drifts, which is what
//!   ages the filesystem instead of hammering one hot neighbourhood.

pub mod simtime;

pub use simtime::SimClock;

use crate::config::{Config, DistributionType};
use rand::Rng;
use rand_distr::StandardNormal;
use std::sync::Arc;

/// Draws file indices per the configured access distribution
///
/// Shared by all workers; per-draw state lives in the caller's RNG and the
/// process-wide [`SimClock`].
#[derive(Debug)]
pub struct IndexDistribution {
    distr: DistributionType,
    max_files: u64,
    max_files_per_dir: u64,
    mean_index_velocity: f64,
    gaussian_stddev: f64,
    create_stddevs_ahead: f64,
    /// drift_time == -1 ticks the clock once per draw
    tick_per_draw: bool,
    clock: Arc<SimClock>,
}

impl IndexDistribution {
    pub fn new(config: &Config, clock: Arc<SimClock>) -> Self {
        Self {
            distr: config.rand_distr_type,
            max_files: config.max_files,
            max_files_per_dir: config.max_files / config.total_dirs().max(1),
            mean_index_velocity: config.mean_index_velocity,
            gaussian_stddev: config.gaussian_stddev,
            create_stddevs_ahead: config.create_stddevs_ahead,
            tick_per_draw: config.drift_time == -1,
            clock,
        }
    }

    /// Draw the next file index
    ///
    /// `is_create` shifts the gaussian center forward so creates lead the
    /// rest of the workload through the namespace.
    pub fn next_index<R: Rng>(&self, is_create: bool, rng: &mut R) -> u64 {
        match self.distr {
            DistributionType::Uniform => {
                // upper bound inclusive: at least one file even when
                // max_files < total_dirs
                rng.gen_range(0..=self.max_files_per_dir)
            }
            DistributionType::Gaussian => self.next_gaussian_index(is_create, rng),
        }
    }

    fn next_gaussian_index<R: Rng>(&self, is_create: bool, rng: &mut R) -> u64 {
        let mut center = self.clock.now() as f64 * self.mean_index_velocity;
        if is_create {
            center += self.create_stddevs_ahead * self.gaussian_stddev;
        }

        let z: f64 = rng.sample(StandardNormal);
        let value = center + z * self.gaussian_stddev;
        let index = (value.floor() as i64).rem_euclid(self.max_files as i64) as u64;

        self.clock.set_last_center(center);
        if self.tick_per_draw {
            self.clock.tick();
        }
        self.clock.maybe_persist();

        index
    }

    /// The clock this distribution is driven by
    pub fn clock(&self) -> &Arc<SimClock> {
        &self.clock
    }
}
