//! Worker driver loop and run coordination
//!
//! Each worker thread runs the same loop: draw an operation kind, dispatch
//! it, fold the result into the shared counters, stream optional CSV rows,
//! and honor the termination checks. The coordinator owns everything
//! outside the loop: spawning, the starting gun, periodic reporting,
//! joining, and end-of-run cleanup.

use crate::config::Config;
use crate::ops::{self, Outcome, RunContext, WorkerEnv};
use crate::output::csv::WorkerCsv;
use crate::output::json::RunSummary;
use crate::util::time::Timestamp;
use anyhow::Context;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Stop-file and pause-file polling cadence, in events
const STOP_CHECK_INTERVAL: u64 = 1000;

/// One worker thread's driver
pub struct Worker {
    id: usize,
    ctx: Arc<RunContext>,
    run_start: Timestamp,
    start_epoch: u64,
}

impl Worker {
    pub fn new(id: usize, ctx: Arc<RunContext>, run_start: Timestamp, start_epoch: u64) -> Self {
        Self {
            id,
            ctx,
            run_start,
            start_epoch,
        }
    }

    /// The per-worker event loop; returns once a termination check fires
    pub fn run(&self) -> crate::Result<()> {
        let ctx = &self.ctx;
        let config = &ctx.config;

        // cross-host barrier: wait until the leader's gun file is readable
        if let Some(gun) = config.starting_gun_path() {
            while !is_readable(&gun) {
                if ctx.stopping() {
                    return Ok(());
                }
                std::thread::sleep(Duration::from_secs(1));
            }
        }

        let mut rsptimes = match config.rsptimes_dir {
            Some(ref dir) => Some(WorkerCsv::rsptimes(dir, self.start_epoch, self.id)?),
            None => None,
        };
        let mut bw = match config.bw_dir {
            Some(ref dir) => Some(WorkerCsv::bandwidth(dir, self.start_epoch, self.id)?),
            None => None,
        };

        let stop_file = config.stop_file_path();
        let mut env = WorkerEnv::new(config);
        let mut event_count: u64 = 0;
        let mut ops_done: u64 = 0;
        let mut last_drift = Instant::now();

        loop {
            event_count += 1;
            if event_count % STOP_CHECK_INTERVAL == 0 {
                if is_readable(&stop_file) {
                    break;
                }
                while config.pause_file.exists() && !ctx.stopping() {
                    std::thread::sleep(Duration::from_secs(1));
                }
            }
            if ctx.stopping() {
                break;
            }
            if config.fill && ctx.stats.device_full_seen() {
                break;
            }
            if config.opcount > 0 && ops_done >= config.opcount {
                break;
            }
            if config.duration > 0 && self.run_start.elapsed().as_secs() >= config.duration {
                break;
            }

            let kind = ctx.events.gen_event(&mut env.rng);
            let result = ops::dispatch(kind, ctx, &mut env);
            ops_done += 1;

            match result.outcome {
                Outcome::Ok => ctx.stats.op_completed(kind),
                Outcome::Classified(class) => ctx.stats.classify(class),
                Outcome::Fatal => ctx.stats.total_errors.incr(),
            }
            ctx.stats.record_latency(kind, result.io_time);

            let since_start = result.started.duration_since(self.run_start).as_secs_f64();
            let precise = result.io_time.as_secs_f64();
            if let Some(csv) = rsptimes.as_mut() {
                csv.append_row(since_start, precise, kind)
                    .context("response-time CSV write failed")?;
            }
            if let Some(csv) = bw.as_mut() {
                if result.bytes > 0 && precise > 0.0 {
                    let kb_per_sec = (result.bytes as f64 / 1024.0) / precise;
                    csv.append_row(since_start, kb_per_sec, kind)
                        .context("bandwidth CSV write failed")?;
                }
            }

            if config.drift_time > 0 && last_drift.elapsed().as_secs() >= config.drift_time as u64
            {
                ctx.clock().advance(config.drift_time as u64);
                last_drift = Instant::now();
            }
        }

        if let Some(csv) = rsptimes.as_mut() {
            csv.finish()?;
            println!("response time file is {}", csv.path().display());
        }
        if let Some(csv) = bw.as_mut() {
            csv.finish()?;
            println!("bandwidth file is {}", csv.path().display());
        }
        Ok(())
    }
}

/// Spawns workers, reports, joins, and cleans up one run
pub struct Coordinator {
    ctx: Arc<RunContext>,
}

impl Coordinator {
    pub fn new(config: Config) -> crate::Result<Self> {
        // anything other than "already there" is run-fatal
        std::fs::create_dir_all(&config.top_directory).with_context(|| {
            format!("cannot create top directory {}", config.top_directory.display())
        })?;

        let ctx = Arc::new(RunContext::new(config)?);
        Ok(Self { ctx })
    }

    pub fn context(&self) -> &Arc<RunContext> {
        &self.ctx
    }

    /// Run the whole workload to completion
    pub fn run(&self) -> crate::Result<()> {
        let ctx = Arc::clone(&self.ctx);
        let config = &self.ctx.config;

        // SIGINT raises the shared stop flag; workers notice on their next
        // iteration. A second handler registration (tests, embedding) is
        // harmless to ignore.
        {
            let ctx = Arc::clone(&self.ctx);
            if let Err(e) = ctrlc::set_handler(move || {
                log::info!("interrupt received, stopping workers");
                ctx.request_stop();
            }) {
                log::debug!("signal handler not installed: {}", e);
            }
        }

        let run_start = Timestamp::now();
        let started_at = chrono::Utc::now();
        let start_epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);

        let mut handles = Vec::with_capacity(config.threads);
        for id in 0..config.threads {
            let worker = Worker::new(id, Arc::clone(&ctx), run_start, start_epoch);
            let handle = std::thread::Builder::new()
                .name(format!("worker-{}", id))
                .spawn(move || worker.run())
                .context("cannot spawn worker thread")?;
            handles.push(handle);
        }

        // the barrier drops once every worker is up
        if let Some(gun) = config.starting_gun_path() {
            std::fs::File::create(&gun)
                .with_context(|| format!("cannot create starting gun {}", gun.display()))?;
        }

        // periodic reporting until all workers wind down
        let mut last_report = Instant::now();
        while !handles.iter().all(|h| h.is_finished()) {
            std::thread::sleep(Duration::from_millis(200));
            if config.stats_report_interval > 0
                && last_report.elapsed().as_secs() >= config.stats_report_interval
            {
                let elapsed = run_start.elapsed().as_secs_f64();
                if config.short_stats {
                    ctx.stats.print_short_report(elapsed, ctx.clock().last_center());
                } else {
                    ctx.stats.print_report(elapsed, ctx.clock().last_center());
                }
                last_report = Instant::now();
            }
        }

        for (id, handle) in handles.into_iter().enumerate() {
            match handle.join() {
                Ok(Ok(())) => {}
                Ok(Err(e)) => log::error!("worker {} failed: {:#}", id, e),
                Err(_) => log::error!("worker {} panicked", id),
            }
        }

        let elapsed = run_start.elapsed().as_secs_f64();
        ctx.stats.print_report(elapsed, ctx.clock().last_center());
        ctx.stats.print_latency_summary();

        // checkpoint the drift so the next run resumes from here
        if let Err(e) = ctx.clock().persist() {
            log::warn!("cannot persist simulated time: {:#}", e);
        }

        if let Some(ref path) = config.json_summary {
            RunSummary::collect(&ctx.stats, started_at, elapsed, ctx.clock().last_center())
                .write(path)?;
            println!("JSON summary file is {}", path.display());
        }

        ensure_deleted(&config.stop_file_path());
        if let Some(gun) = config.starting_gun_path() {
            ensure_deleted(&gun);
        }
        Ok(())
    }
}

/// Same access test the workers poll with
fn is_readable(path: &Path) -> bool {
    std::fs::File::open(path).is_ok()
}

/// Delete without complaint when the file is already gone
fn ensure_deleted(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => log::warn!("cannot remove {}: {}", path.display(), e),
    }
}
