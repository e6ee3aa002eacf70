//! Metadata operation handlers: truncate, link, hardlink, rename, delete

use super::{
    classified, draw_target_size, settle, OpError, OpResult, RunContext, WorkerEnv,
};
use crate::stats::ErrorClass;
use crate::util::time::{SyscallTimer, Timestamp};
use crate::workload::OpKind;
use std::path::{Path, PathBuf};

const LINK_SUFFIX: &str = ".s";
const HLINK_SUFFIX: &str = ".h";

/// `<path>.s` / `<path>.h` companion of a workload file
fn companion(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

/// Truncate a file to a third of a freshly drawn target size
pub fn truncate(ctx: &RunContext, env: &mut WorkerEnv) -> OpResult {
    let kind = OpKind::Truncate;
    let index = ctx.distribution.next_index(false, &mut env.rng);
    let path = ctx.mapper.path_of(index);
    let new_len = draw_target_size(&ctx.config, &mut env.rng) / 3;

    let started = Timestamp::now();
    let mut timer = SyscallTimer::new();

    let result = (|| -> Result<(), OpError> {
        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| OpError::new("open", &path, e))?;
        timer
            .measure(|| file.set_len(new_len))
            .map_err(|e| OpError::new("ftruncate", &path, e))?;
        Ok(())
    })();

    settle(
        kind,
        started,
        0,
        timer.total(),
        result,
        &[(libc::ENOENT, ErrorClass::FileNotFound)],
    )
}

/// Symlink a workload file to its `.s` companion
pub fn link(ctx: &RunContext, env: &mut WorkerEnv) -> OpResult {
    let kind = OpKind::Link;
    let index = ctx.distribution.next_index(false, &mut env.rng);
    let source = ctx.mapper.path_of(index);
    let target = companion(&source, LINK_SUFFIX);

    let started = Timestamp::now();

    // a link to a file that was never created is an expected miss
    if !source.is_file() {
        return classified(kind, started, ErrorClass::FileNotFound);
    }

    let mut timer = SyscallTimer::new();
    let result = timer
        .measure(|| std::os::unix::fs::symlink(&source, &target))
        .map_err(|e| OpError::new("symlink", &target, e));

    settle(
        kind,
        started,
        0,
        timer.total(),
        result,
        &[
            (libc::EEXIST, ErrorClass::AlreadyExists),
            (libc::ENOENT, ErrorClass::FileNotFound),
        ],
    )
}

/// Hard-link a workload file to its `.h` companion
pub fn hardlink(ctx: &RunContext, env: &mut WorkerEnv) -> OpResult {
    let kind = OpKind::Hardlink;
    let index = ctx.distribution.next_index(false, &mut env.rng);
    let source = ctx.mapper.path_of(index);
    let target = companion(&source, HLINK_SUFFIX);

    let started = Timestamp::now();

    if !source.is_file() {
        return classified(kind, started, ErrorClass::FileNotFound);
    }

    let mut timer = SyscallTimer::new();
    let result = timer
        .measure(|| std::fs::hard_link(&source, &target))
        .map_err(|e| OpError::new("link", &target, e));

    settle(
        kind,
        started,
        0,
        timer.total(),
        result,
        &[
            (libc::EEXIST, ErrorClass::AlreadyExists),
            (libc::ENOENT, ErrorClass::FileNotFound),
        ],
    )
}

/// Rename one drawn path onto another
pub fn rename(ctx: &RunContext, env: &mut WorkerEnv) -> OpResult {
    let kind = OpKind::Rename;
    let source = ctx.mapper.path_of(ctx.distribution.next_index(false, &mut env.rng));
    let target = ctx.mapper.path_of(ctx.distribution.next_index(false, &mut env.rng));

    let started = Timestamp::now();
    let mut timer = SyscallTimer::new();
    let result = timer
        .measure(|| std::fs::rename(&source, &target))
        .map_err(|e| OpError::new("rename", &source, e));

    settle(
        kind,
        started,
        0,
        timer.total(),
        result,
        &[(libc::ENOENT, ErrorClass::FileNotFound)],
    )
}

/// Unlink a file and whatever companions it accumulated
pub fn delete(ctx: &RunContext, env: &mut WorkerEnv) -> OpResult {
    let kind = OpKind::Delete;
    let index = ctx.distribution.next_index(false, &mut env.rng);
    let path = ctx.mapper.path_of(index);

    let started = Timestamp::now();
    let mut timer = SyscallTimer::new();

    let result = (|| -> Result<(), OpError> {
        for suffix in [LINK_SUFFIX, HLINK_SUFFIX] {
            let extra = companion(&path, suffix);
            // symlink_metadata so a dangling .s companion still gets removed
            if extra.symlink_metadata().is_ok() {
                timer
                    .measure(|| std::fs::remove_file(&extra))
                    .map_err(|e| OpError::new("unlink", &extra, e))?;
            }
        }
        timer
            .measure(|| std::fs::remove_file(&path))
            .map_err(|e| OpError::new("unlink", &path, e))?;
        Ok(())
    })();

    settle(
        kind,
        started,
        0,
        timer.total(),
        result,
        &[(libc::ENOENT, ErrorClass::FileNotFound)],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, Size};
    use crate::ops::{data, Outcome};
    use tempfile::TempDir;

    fn small_config(dir: &TempDir) -> Config {
        Config {
            top_directory: dir.path().join("top"),
            simulated_time_path: dir.path().join("simtime"),
            max_files: 4,
            levels: 1,
            dirs_per_level: 1,
            file_size: Size::Fixed(6),
            blocksize: Size::Fixed(4),
            fsync_probability_pct: 0,
            fdatasync_probability_pct: 0,
            ..Config::default()
        }
    }

    fn populated_ctx(dir: &TempDir, seed: u64) -> (RunContext, WorkerEnv) {
        let ctx = RunContext::new(small_config(dir)).unwrap();
        let mut env = WorkerEnv::with_seed(&ctx.config, seed);
        for _ in 0..100 {
            data::create(&ctx, &mut env);
        }
        (ctx, env)
    }

    #[test]
    fn test_companion_suffixes() {
        let path = Path::new("/tmp/top/d0001/f000000003");
        assert_eq!(
            companion(path, LINK_SUFFIX),
            Path::new("/tmp/top/d0001/f000000003.s")
        );
        assert_eq!(
            companion(path, HLINK_SUFFIX),
            Path::new("/tmp/top/d0001/f000000003.h")
        );
    }

    #[test]
    fn test_truncate_shrinks_file() {
        let dir = TempDir::new().unwrap();
        let (ctx, mut env) = populated_ctx(&dir, 20);

        let result = truncate(&ctx, &mut env);
        assert_eq!(result.outcome, Outcome::Ok);
        // 6 KB / 3 = 2 KB
        assert_eq!(ctx.stats.have_truncated.get(), 0); // driver folds, not handler

        let sizes: Vec<u64> = walk_files(&ctx.config.top_directory)
            .iter()
            .map(|e| e.metadata().unwrap().len())
            .collect();
        assert!(sizes.contains(&2048), "one file should be 2 KB: {:?}", sizes);
    }

    #[test]
    fn test_truncate_missing_classifies() {
        let dir = TempDir::new().unwrap();
        let ctx = RunContext::new(small_config(&dir)).unwrap();
        let mut env = WorkerEnv::with_seed(&ctx.config, 21);

        let result = truncate(&ctx, &mut env);
        assert_eq!(
            result.outcome,
            Outcome::Classified(ErrorClass::FileNotFound)
        );
    }

    #[test]
    fn test_link_creates_companion_then_collides() {
        let dir = TempDir::new().unwrap();
        let (ctx, mut env) = populated_ctx(&dir, 22);

        let first = link(&ctx, &mut env);
        assert_eq!(first.outcome, Outcome::Ok);

        let companions: Vec<_> = walk_files(&ctx.config.top_directory)
            .into_iter()
            .filter(|e| e.path().to_str().unwrap().ends_with(".s"))
            .collect();
        assert_eq!(companions.len(), 1);

        // every index now resolves to the same 5 files; keep linking until
        // we hit the one that already has its companion
        let mut saw_exists = false;
        for _ in 0..50 {
            if link(&ctx, &mut env).outcome == Outcome::Classified(ErrorClass::AlreadyExists) {
                saw_exists = true;
                break;
            }
        }
        assert!(saw_exists);
    }

    #[test]
    fn test_link_missing_source_classifies() {
        let dir = TempDir::new().unwrap();
        let ctx = RunContext::new(small_config(&dir)).unwrap();
        let mut env = WorkerEnv::with_seed(&ctx.config, 23);

        let result = link(&ctx, &mut env);
        assert_eq!(
            result.outcome,
            Outcome::Classified(ErrorClass::FileNotFound)
        );
        assert!(result.success());
    }

    #[test]
    fn test_hardlink_creates_companion() {
        let dir = TempDir::new().unwrap();
        let (ctx, mut env) = populated_ctx(&dir, 24);

        let result = hardlink(&ctx, &mut env);
        assert_eq!(result.outcome, Outcome::Ok);

        let companions: Vec<_> = walk_files(&ctx.config.top_directory)
            .into_iter()
            .filter(|e| e.path().to_str().unwrap().ends_with(".h"))
            .collect();
        assert_eq!(companions.len(), 1);
    }

    #[test]
    fn test_rename_moves_file() {
        let dir = TempDir::new().unwrap();
        let (ctx, mut env) = populated_ctx(&dir, 25);
        let before = walk_files(&ctx.config.top_directory).len();

        let result = rename(&ctx, &mut env);
        assert_eq!(result.outcome, Outcome::Ok);
        // rename either collapses two files into one or moves in place
        let after = walk_files(&ctx.config.top_directory).len();
        assert!(after == before || after == before - 1);
    }

    #[test]
    fn test_delete_removes_file_and_companions() {
        let dir = TempDir::new().unwrap();
        let (ctx, mut env) = populated_ctx(&dir, 26);

        // give every file both companions
        for _ in 0..60 {
            link(&ctx, &mut env);
            hardlink(&ctx, &mut env);
        }
        let before = walk_files(&ctx.config.top_directory).len();

        let result = delete(&ctx, &mut env);
        assert_eq!(result.outcome, Outcome::Ok);
        let after = walk_files(&ctx.config.top_directory).len();
        assert_eq!(after, before - 3, "file plus .s plus .h should go");
    }

    #[test]
    fn test_delete_missing_classifies() {
        let dir = TempDir::new().unwrap();
        let ctx = RunContext::new(small_config(&dir)).unwrap();
        let mut env = WorkerEnv::with_seed(&ctx.config, 27);

        let result = delete(&ctx, &mut env);
        assert_eq!(
            result.outcome,
            Outcome::Classified(ErrorClass::FileNotFound)
        );
    }

    fn walk_files(root: &Path) -> Vec<std::fs::DirEntry> {
        let mut files = Vec::new();
        let mut dirs = vec![root.to_path_buf()];
        while let Some(dir) = dirs.pop() {
            for entry in std::fs::read_dir(dir).unwrap() {
                let entry = entry.unwrap();
                if entry.file_type().unwrap().is_dir() {
                    dirs.push(entry.path());
                } else {
                    files.push(entry);
                }
            }
        }
        files
    }
}
