//! Simulated-time clock with persistence
//!
//! The gaussian moving mean is parameterized by simulated time, a counter
//! that either ticks once per index draw or advances with wall time in the
//! driver. It persists to a small file (a single ASCII integer) so that a
//! later run resumes the drift where the previous one stopped instead of
//! rewinding the working set to the start of the namespace.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Persist every N simulated ticks
const TIME_SAVE_RATE: u64 = 5;

/// Process-wide simulated-time state, shared by all workers
#[derive(Debug)]
pub struct SimClock {
    ticks: AtomicU64,
    /// Last gaussian center computed, as f64 bits (diagnostic)
    last_center: AtomicU64,
    path: PathBuf,
    persist_lock: Mutex<()>,
}

impl SimClock {
    /// Create a clock resuming from `path` if it exists, else from zero
    pub fn load(path: PathBuf) -> crate::Result<Self> {
        let start = match std::fs::read_to_string(&path) {
            Ok(text) => {
                let ticks = text
                    .trim()
                    .parse::<u64>()
                    .unwrap_or_else(|_| {
                        log::warn!(
                            "ignoring unparseable simulated time in {}",
                            path.display()
                        );
                        0
                    });
                if ticks > 0 {
                    log::info!("resuming with simulated time {}", ticks);
                }
                ticks
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => 0,
            Err(e) => {
                return Err(anyhow::Error::from(e)
                    .context(format!("cannot read simulated time {}", path.display())))
            }
        };

        Ok(Self {
            ticks: AtomicU64::new(start),
            last_center: AtomicU64::new(0f64.to_bits()),
            path,
            persist_lock: Mutex::new(()),
        })
    }

    /// Current simulated time
    #[inline]
    pub fn now(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    /// Advance simulated time by one tick (per-draw mode)
    #[inline]
    pub fn tick(&self) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
    }

    /// Advance simulated time by `secs` (wall-clock drift mode)
    pub fn advance(&self, secs: u64) {
        self.ticks.fetch_add(secs, Ordering::Relaxed);
    }

    /// Record the most recent gaussian center
    #[inline]
    pub fn set_last_center(&self, center: f64) {
        self.last_center.store(center.to_bits(), Ordering::Relaxed);
    }

    /// Most recent gaussian center
    pub fn last_center(&self) -> f64 {
        f64::from_bits(self.last_center.load(Ordering::Relaxed))
    }

    /// Persist if the current tick count lands on the save cadence
    ///
    /// Persistence failures are logged, not fatal: losing a checkpoint only
    /// costs drift resume fidelity, never the run.
    pub fn maybe_persist(&self) {
        if self.now() % TIME_SAVE_RATE == 0 {
            if let Err(e) = self.persist() {
                log::warn!("cannot persist simulated time: {:#}", e);
            }
        }
    }

    /// Write the current tick count out, whole file then flush
    pub fn persist(&self) -> crate::Result<()> {
        use std::io::Write;

        // serialize writers so a reader never sees a torn value
        let _guard = self.persist_lock.lock().unwrap();
        let mut file = std::fs::File::create(&self.path)?;
        write!(file, "{:10}", self.now())?;
        file.flush()?;
        Ok(())
    }
}
