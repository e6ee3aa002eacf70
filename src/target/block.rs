//! Block device helpers
//!
//! Device size probing, the pre-shuffled offset permutation used by
//! `randommap`, and the BLKDISCARD ioctl wrapper.

use anyhow::Context;
use rand::seq::SliceRandom;
use std::fs::File;
use std::io::{Seek, SeekFrom};
use std::os::unix::io::RawFd;
use std::path::Path;
use std::sync::Mutex;

// _IO(0x12, 119); arg is struct { u64 offset; u64 length; }
const BLKDISCARD: libc::c_ulong = (0x12 << 8) | 119;

/// Size of a file or block device, by seeking to its end
pub fn device_size(path: &Path) -> crate::Result<u64> {
    let mut file = File::open(path)
        .with_context(|| format!("cannot open {}", path.display()))?;
    let size = file
        .seek(SeekFrom::End(0))
        .with_context(|| format!("cannot seek to end of {}", path.display()))?;
    Ok(size)
}

/// Issue a BLKDISCARD for `(offset, length)` on an open device
pub fn blkdiscard(fd: RawFd, offset: u64, length: u64) -> std::io::Result<()> {
    let range: [u64; 2] = [offset, length];
    // SAFETY: fd is an open descriptor and range outlives the call
    let rc = unsafe { libc::ioctl(fd, BLKDISCARD, range.as_ptr()) };
    if rc < 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

/// Pre-shuffled permutation of every record-aligned offset on the device
///
/// A consumable stack: each `take` removes one offset, so a full drain
/// touches every block exactly once. Exhaustion is terminal for the run;
/// the caller raises the stop flag when `take` returns `None`.
#[derive(Debug)]
pub struct OffsetPool {
    offsets: Mutex<Vec<u64>>,
    record_size: u64,
}

impl OffsetPool {
    /// Build the pool for `device`, one entry per `record_size` block
    pub fn build(device: &Path, record_size: u64) -> crate::Result<Self> {
        anyhow::ensure!(record_size > 0, "record size must be positive");
        let size = device_size(device)?;
        let blocks = size / record_size;

        let mut offsets: Vec<u64> = (0..blocks).collect();
        offsets.shuffle(&mut rand::thread_rng());

        log::debug!(
            "offset pool over {}: {} blocks of {} bytes",
            device.display(),
            blocks,
            record_size
        );
        Ok(Self {
            offsets: Mutex::new(offsets),
            record_size,
        })
    }

    /// Pop the next byte offset, or `None` once the device is exhausted
    pub fn take(&self) -> Option<u64> {
        let mut offsets = self.offsets.lock().unwrap();
        offsets.pop().map(|block| block * self.record_size)
    }

    /// Offsets still unconsumed
    pub fn remaining(&self) -> usize {
        self.offsets.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use tempfile::NamedTempFile;

    fn sized_file(len: u64) -> NamedTempFile {
        let file = NamedTempFile::new().unwrap();
        file.as_file().set_len(len).unwrap();
        file
    }

    #[test]
    fn test_device_size_of_regular_file() {
        let file = sized_file(65536);
        assert_eq!(device_size(file.path()).unwrap(), 65536);
    }

    #[test]
    fn test_pool_drain_covers_every_block_once() {
        let file = sized_file(16 * 4096);
        let pool = OffsetPool::build(file.path(), 4096).unwrap();
        assert_eq!(pool.remaining(), 16);

        let mut seen = HashSet::new();
        while let Some(offset) = pool.take() {
            assert_eq!(offset % 4096, 0);
            assert!(offset < 16 * 4096);
            assert!(seen.insert(offset), "offset {} yielded twice", offset);
        }
        assert_eq!(seen.len(), 16);
        assert!(pool.take().is_none());
    }

    #[test]
    fn test_pool_ignores_trailing_partial_block() {
        let file = sized_file(4096 * 3 + 100);
        let pool = OffsetPool::build(file.path(), 4096).unwrap();
        assert_eq!(pool.remaining(), 3);
    }

    #[test]
    fn test_pool_rejects_zero_record_size() {
        let file = sized_file(4096);
        assert!(OffsetPool::build(file.path(), 0).is_err());
    }
}
