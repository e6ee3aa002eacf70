//! Workload operation handlers
//!
//! One handler per [`OpKind`]. Every handler returns the same structured
//! [`OpResult`]; the driver folds it into shared counters without ever
//! branching on shape. Expected failures (path not created yet, create
//! collision, device full) are *classified*, not fatal: the aging workload
//! draws paths blindly and keeps running through them.

pub mod data;
pub mod meta;

use crate::config::Config;
use crate::distribution::{IndexDistribution, SimClock};
use crate::stats::{ErrorClass, RunStats};
use crate::target::block::OffsetPool;
use crate::target::PathMapper;
use crate::util::buffer::PayloadFactory;
use crate::util::time::Timestamp;
use crate::workload::{OpKind, WeightTable};
use rand::Rng;
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;
use std::fs::{File, OpenOptions};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

const ALIGN: u64 = 4096;

/// Shared, read-mostly state threaded into every worker and handler
///
/// All cross-thread mutation happens through the atomics and mutex-guarded
/// members below; the configuration itself is immutable.
#[derive(Debug)]
pub struct RunContext {
    pub config: Config,
    pub stats: RunStats,
    pub mapper: PathMapper,
    pub distribution: IndexDistribution,
    /// Normalized operation weight table
    pub events: WeightTable,
    /// Present when randommap/fill runs against a raw device
    pub offset_pool: Option<OffsetPool>,
    /// Sequential-read cursor for rawdevice mode, wraps at device end
    pub read_offset: AtomicU64,
    /// Sequential-write cursor for rawdevice mode, wraps at device end
    pub write_offset: AtomicU64,
    /// Raised by SIGINT, pool exhaustion, or the coordinator
    stop: AtomicBool,
}

impl RunContext {
    pub fn new(config: Config) -> crate::Result<Self> {
        let clock = Arc::new(SimClock::load(config.simulated_time_path.clone())?);
        let distribution = IndexDistribution::new(&config, clock);
        let mapper = PathMapper::new(&config);

        let events = match config.workload_table {
            Some(ref path) => WeightTable::load(path)?,
            None => WeightTable::equal(),
        };

        let offset_pool = match (&config.rawdevice, config.randommap || config.fill) {
            (Some(device), true) => {
                let recsz = draw_recsz(&config, &mut rand::thread_rng());
                Some(OffsetPool::build(device, recsz)?)
            }
            _ => None,
        };

        Ok(Self {
            config,
            stats: RunStats::new(),
            mapper,
            distribution,
            events,
            offset_pool,
            read_offset: AtomicU64::new(0),
            write_offset: AtomicU64::new(0),
            stop: AtomicBool::new(false),
        })
    }

    #[inline]
    pub fn stopping(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }

    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    pub fn clock(&self) -> &SimClock {
        self.distribution.clock()
    }
}

/// Per-worker mutable state: the RNG and the payload generator
pub struct WorkerEnv {
    pub rng: Xoshiro256PlusPlus,
    pub payloads: PayloadFactory,
}

impl WorkerEnv {
    pub fn new(config: &Config) -> Self {
        Self {
            rng: Xoshiro256PlusPlus::from_entropy(),
            payloads: PayloadFactory::new(config.compression_ratio, config.dedupe_percentage),
        }
    }

    /// Deterministic environment for tests
    pub fn with_seed(config: &Config, seed: u64) -> Self {
        Self {
            rng: Xoshiro256PlusPlus::seed_from_u64(seed),
            payloads: PayloadFactory::with_seed(
                config.compression_ratio,
                config.dedupe_percentage,
                seed,
            ),
        }
    }
}

/// How one operation ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Completed normally
    Ok,
    /// Hit an expected condition; counted, run continues
    Classified(ErrorClass),
    /// Unexpected syscall failure; logged, counted in total_errors
    Fatal,
}

/// Structured result of one operation
#[derive(Debug)]
pub struct OpResult {
    pub kind: OpKind,
    pub outcome: Outcome,
    pub started: Timestamp,
    pub finished: Timestamp,
    /// Accumulated wall time of the raw syscalls only
    pub io_time: Duration,
    /// Bytes actually transferred
    pub bytes: u64,
}

impl OpResult {
    /// Fatal is the only failure at the result level
    pub fn success(&self) -> bool {
        !matches!(self.outcome, Outcome::Fatal)
    }
}

/// A syscall failure, tagged with the syscall name and path for the log
#[derive(Debug, thiserror::Error)]
#[error("{syscall} failed on {path}: {source}")]
pub struct OpError {
    pub syscall: &'static str,
    pub path: PathBuf,
    #[source]
    pub source: std::io::Error,
}

impl OpError {
    pub fn new(syscall: &'static str, path: &Path, source: std::io::Error) -> Self {
        Self {
            syscall,
            path: path.to_path_buf(),
            source,
        }
    }

    pub fn errno(&self) -> Option<i32> {
        self.source.raw_os_error()
    }
}

/// Dispatch one operation to its handler
pub fn dispatch(kind: OpKind, ctx: &RunContext, env: &mut WorkerEnv) -> OpResult {
    match kind {
        OpKind::Read => data::read(ctx, env),
        OpKind::RandomRead => data::random_read(ctx, env),
        OpKind::Create => data::create(ctx, env),
        OpKind::RandomWrite => data::random_write(ctx, env),
        OpKind::Append => data::append(ctx, env),
        OpKind::RandomDiscard => data::random_discard(ctx, env),
        OpKind::Truncate => meta::truncate(ctx, env),
        OpKind::Link => meta::link(ctx, env),
        OpKind::Hardlink => meta::hardlink(ctx, env),
        OpKind::Rename => meta::rename(ctx, env),
        OpKind::Delete => meta::delete(ctx, env),
    }
}

/// Result for an op that ended on an expected condition before any IO
pub(crate) fn classified(kind: OpKind, started: Timestamp, class: ErrorClass) -> OpResult {
    OpResult {
        kind,
        outcome: Outcome::Classified(class),
        started,
        finished: Timestamp::now(),
        io_time: Duration::ZERO,
        bytes: 0,
    }
}

/// Map a handler's outcome into the uniform result shape
///
/// `expected` is the op-specific errno classification table; anything not in
/// it is an op-fatal error, logged with syscall, errno, and path.
pub(crate) fn settle(
    kind: OpKind,
    started: Timestamp,
    bytes: u64,
    io_time: Duration,
    result: Result<(), OpError>,
    expected: &[(i32, ErrorClass)],
) -> OpResult {
    let outcome = match result {
        Ok(()) => Outcome::Ok,
        Err(err) => {
            let class = err
                .errno()
                .and_then(|no| expected.iter().find(|&&(e, _)| e == no))
                .map(|&(_, class)| class);
            match class {
                Some(class) => Outcome::Classified(class),
                None => {
                    log::error!("{}", err);
                    Outcome::Fatal
                }
            }
        }
    };
    OpResult {
        kind,
        outcome,
        started,
        finished: Timestamp::now(),
        io_time,
        bytes,
    }
}

// ---------------------------------------------------------------------------
// size, offset and sync helpers shared by the handlers

fn align_down(size: u64) -> u64 {
    let aligned = (size / ALIGN) * ALIGN;
    if aligned == 0 {
        ALIGN
    } else {
        aligned
    }
}

/// Total bytes one op intends to transfer
pub fn draw_target_size<R: Rng>(config: &Config, rng: &mut R) -> u64 {
    let size = config.file_size.draw_bytes(rng);
    if config.direct {
        align_down(size)
    } else {
        size
    }
}

/// Transfer size of a single record
pub fn draw_recsz<R: Rng>(config: &Config, rng: &mut R) -> u64 {
    let size = config.blocksize.draw_bytes(rng);
    if config.direct {
        align_down(size)
    } else {
        size.max(1)
    }
}

/// Random offset for one record, at most `max_offset`
///
/// Comes from the offset pool when one is configured; pool exhaustion raises
/// the run's stop flag and yields `None`. Otherwise a uniform draw, aligned
/// when direct IO is on.
pub(crate) fn random_seek_offset<R: Rng>(
    ctx: &RunContext,
    max_offset: i64,
    rng: &mut R,
) -> Option<u64> {
    if let Some(ref pool) = ctx.offset_pool {
        return match pool.take() {
            Some(offset) => Some(offset),
            None => {
                log::info!("offset pool exhausted, ending run");
                ctx.request_stop();
                None
            }
        };
    }

    if max_offset <= 0 {
        return Some(0);
    }
    let max_offset = max_offset as u64;
    if ctx.config.direct {
        Some(rng.gen_range(0..=max_offset / ALIGN) * ALIGN)
    } else {
        Some(rng.gen_range(0..=max_offset))
    }
}

/// Call fsync or fdatasync per the configured probability split
pub(crate) fn maybe_sync<R: Rng>(
    ctx: &RunContext,
    fd: RawFd,
    path: &Path,
    rng: &mut R,
) -> Result<(), OpError> {
    let fsync_pct = u32::from(ctx.config.fsync_probability_pct);
    let fdatasync_pct = u32::from(ctx.config.fdatasync_probability_pct);
    if fsync_pct + fdatasync_pct == 0 {
        return Ok(());
    }

    let p: u32 = rng.gen_range(0..=100);
    if p > fsync_pct + fdatasync_pct {
        return Ok(());
    }
    if p > fsync_pct {
        // SAFETY: fd is an open descriptor owned by the caller
        if unsafe { libc::fdatasync(fd) } < 0 {
            return Err(OpError::new("fdatasync", path, std::io::Error::last_os_error()));
        }
        ctx.stats.fdatasyncs.incr();
    } else {
        // SAFETY: as above
        if unsafe { libc::fsync(fd) } < 0 {
            return Err(OpError::new("fsync", path, std::io::Error::last_os_error()));
        }
        ctx.stats.fsyncs.incr();
    }
    Ok(())
}

/// Advance a shared sequential cursor by `step`, wrapping at `size`
///
/// Returns the offset this op should start at. A compare-exchange loop keeps
/// concurrent workers from tearing the cursor.
pub(crate) fn advance_cursor(cursor: &AtomicU64, step: u64, size: u64) -> u64 {
    let mut cur = cursor.load(Ordering::Relaxed);
    loop {
        let start = if cur.saturating_add(step) > size { 0 } else { cur };
        match cursor.compare_exchange_weak(
            cur,
            start.saturating_add(step),
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => return start,
            Err(actual) => cur = actual,
        }
    }
}

// ---------------------------------------------------------------------------
// fd plumbing; RAII File close covers every handler exit path

pub(crate) fn open_read(path: &Path, direct: bool) -> std::io::Result<File> {
    let mut opts = OpenOptions::new();
    opts.read(true);
    if direct {
        opts.custom_flags(libc::O_DIRECT);
    }
    opts.open(path)
}

pub(crate) fn open_write(path: &Path, direct: bool, append: bool) -> std::io::Result<File> {
    let mut opts = OpenOptions::new();
    opts.write(true);
    if append {
        opts.append(true);
    }
    if direct {
        opts.custom_flags(libc::O_DIRECT);
    }
    opts.open(path)
}

pub(crate) fn open_create_excl(path: &Path, direct: bool) -> std::io::Result<File> {
    let mut opts = OpenOptions::new();
    opts.write(true).create_new(true);
    if direct {
        opts.custom_flags(libc::O_DIRECT);
    }
    opts.open(path)
}

/// One read(2) at the current file offset
pub(crate) fn read_once(fd: RawFd, buf: &mut [u8]) -> std::io::Result<usize> {
    // SAFETY: buf is valid for writes of buf.len() bytes for the whole call
    let n = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
    if n < 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(n as usize)
}

/// One pread(2) at `offset`
pub(crate) fn pread_once(fd: RawFd, buf: &mut [u8], offset: u64) -> std::io::Result<usize> {
    // SAFETY: as read_once; offset fits in off_t for any size this tool handles
    let n = unsafe {
        libc::pread(
            fd,
            buf.as_mut_ptr() as *mut libc::c_void,
            buf.len(),
            offset as libc::off_t,
        )
    };
    if n < 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(n as usize)
}

/// write(2) until the whole buffer is on its way, handling partial writes
pub(crate) fn write_full(fd: RawFd, buf: &[u8]) -> std::io::Result<usize> {
    let mut written = 0;
    while written < buf.len() {
        // SAFETY: the slice stays valid across the call
        let n = unsafe {
            libc::write(
                fd,
                buf[written..].as_ptr() as *const libc::c_void,
                buf.len() - written,
            )
        };
        if n < 0 {
            return Err(std::io::Error::last_os_error());
        }
        written += n as usize;
    }
    Ok(written)
}

/// pwrite(2) until the whole buffer lands at `offset`
pub(crate) fn pwrite_full(fd: RawFd, buf: &[u8], offset: u64) -> std::io::Result<usize> {
    let mut written = 0;
    while written < buf.len() {
        // SAFETY: as write_full
        let n = unsafe {
            libc::pwrite(
                fd,
                buf[written..].as_ptr() as *const libc::c_void,
                buf.len() - written,
                (offset + written as u64) as libc::off_t,
            )
        };
        if n < 0 {
            return Err(std::io::Error::last_os_error());
        }
        written += n as usize;
    }
    Ok(written)
}

pub(crate) fn seek_to(fd: RawFd, offset: u64) -> std::io::Result<()> {
    // SAFETY: plain lseek on an open fd
    let rc = unsafe { libc::lseek(fd, offset as libc::off_t, libc::SEEK_SET) };
    if rc < 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

pub(crate) fn seek_end(fd: RawFd) -> std::io::Result<u64> {
    // SAFETY: plain lseek on an open fd
    let rc = unsafe { libc::lseek(fd, 0, libc::SEEK_END) };
    if rc < 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(rc as u64)
}

/// File (or device) size as seen through an open descriptor
pub(crate) fn probe_size(file: &File, rawdevice: bool, path: &Path) -> Result<u64, OpError> {
    if rawdevice {
        seek_end(file.as_raw_fd()).map_err(|e| OpError::new("lseek", path, e))
    } else {
        file.metadata()
            .map(|m| m.len())
            .map_err(|e| OpError::new("fstat", path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Size;
    use tempfile::TempDir;

    fn test_config(dir: &TempDir) -> Config {
        Config {
            top_directory: dir.path().join("top"),
            simulated_time_path: dir.path().join("simtime"),
            file_size: Size::Fixed(4),
            blocksize: Size::Fixed(4),
            fsync_probability_pct: 0,
            fdatasync_probability_pct: 0,
            ..Config::default()
        }
    }

    #[test]
    fn test_draw_sizes_direct_alignment() {
        let dir = TempDir::new().unwrap();
        let config = Config {
            direct: true,
            file_size: Size::Range(1, 100),
            blocksize: Size::Range(1, 16),
            ..test_config(&dir)
        };
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(1);
        for _ in 0..200 {
            let target = draw_target_size(&config, &mut rng);
            let recsz = draw_recsz(&config, &mut rng);
            assert_eq!(target % 4096, 0);
            assert!(target >= 4096);
            assert_eq!(recsz % 4096, 0);
            assert!(recsz >= 4096);
        }
    }

    #[test]
    fn test_random_seek_offset_direct_is_aligned() {
        let dir = TempDir::new().unwrap();
        let config = Config {
            direct: true,
            ..test_config(&dir)
        };
        let ctx = RunContext::new(config).unwrap();
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(2);
        for _ in 0..200 {
            let offset = random_seek_offset(&ctx, 1 << 20, &mut rng).unwrap();
            assert_eq!(offset % 4096, 0);
            assert!(offset <= 1 << 20);
        }
    }

    #[test]
    fn test_random_seek_offset_negative_max_is_zero() {
        let dir = TempDir::new().unwrap();
        let ctx = RunContext::new(test_config(&dir)).unwrap();
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(3);
        assert_eq!(random_seek_offset(&ctx, -512, &mut rng), Some(0));
    }

    #[test]
    fn test_advance_cursor_wraps() {
        let cursor = AtomicU64::new(0);
        let size = 10_000u64;
        assert_eq!(advance_cursor(&cursor, 4096, size), 0);
        assert_eq!(advance_cursor(&cursor, 4096, size), 4096);
        // 8192 + 4096 > 10000, so the third op restarts at 0
        assert_eq!(advance_cursor(&cursor, 4096, size), 0);
        assert_eq!(advance_cursor(&cursor, 4096, size), 4096);
    }

    #[test]
    fn test_advance_cursor_is_race_free() {
        use std::sync::Arc;
        let cursor = Arc::new(AtomicU64::new(0));
        let size = 1 << 30;
        let mut handles = Vec::new();
        for _ in 0..4 {
            let cursor = Arc::clone(&cursor);
            handles.push(std::thread::spawn(move || {
                for _ in 0..10_000 {
                    advance_cursor(&cursor, 8, size);
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        // no wrap occurred, so every advance is accounted for exactly once
        assert_eq!(cursor.load(Ordering::Relaxed), 4 * 10_000 * 8);
    }

    #[test]
    fn test_maybe_sync_certain_fsync() {
        let dir = TempDir::new().unwrap();
        let config = Config {
            fsync_probability_pct: 100,
            fdatasync_probability_pct: 0,
            ..test_config(&dir)
        };
        let ctx = RunContext::new(config).unwrap();
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(4);

        let file = std::fs::File::create(dir.path().join("sync-target")).unwrap();
        for _ in 0..10 {
            maybe_sync(&ctx, file.as_raw_fd(), dir.path(), &mut rng).unwrap();
        }
        assert_eq!(ctx.stats.fsyncs.get(), 10);
        assert_eq!(ctx.stats.fdatasyncs.get(), 0);
    }

    #[test]
    fn test_maybe_sync_disabled() {
        let dir = TempDir::new().unwrap();
        let ctx = RunContext::new(test_config(&dir)).unwrap();
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(5);

        let file = std::fs::File::create(dir.path().join("sync-target")).unwrap();
        for _ in 0..50 {
            maybe_sync(&ctx, file.as_raw_fd(), dir.path(), &mut rng).unwrap();
        }
        assert_eq!(ctx.stats.fsyncs.get() + ctx.stats.fdatasyncs.get(), 0);
    }

    #[test]
    fn test_settle_classifies_expected_errno() {
        let started = Timestamp::now();
        let err = OpError::new(
            "open",
            Path::new("/nope"),
            std::io::Error::from_raw_os_error(libc::ENOENT),
        );
        let result = settle(
            OpKind::Read,
            started,
            0,
            Duration::ZERO,
            Err(err),
            &[(libc::ENOENT, ErrorClass::FileNotFound)],
        );
        assert_eq!(result.outcome, Outcome::Classified(ErrorClass::FileNotFound));
        assert!(result.success());
    }

    #[test]
    fn test_settle_unexpected_errno_is_fatal() {
        let started = Timestamp::now();
        let err = OpError::new(
            "open",
            Path::new("/nope"),
            std::io::Error::from_raw_os_error(libc::EACCES),
        );
        let result = settle(
            OpKind::Read,
            started,
            0,
            Duration::ZERO,
            Err(err),
            &[(libc::ENOENT, ErrorClass::FileNotFound)],
        );
        assert_eq!(result.outcome, Outcome::Fatal);
        assert!(!result.success());
    }

    #[test]
    fn test_worker_env_seeding_is_reproducible() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir);
        let mut a = WorkerEnv::with_seed(&config, 99);
        let mut b = WorkerEnv::with_seed(&config, 99);
        assert_eq!(a.rng.gen::<u64>(), b.rng.gen::<u64>());
    }
}
