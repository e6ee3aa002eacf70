//! Write-payload synthesis and buffer alignment
//!
//! This module provides memory-aligned buffers required for O_DIRECT
//! operations and the payload generator that fills them. Payloads honor the
//! configured compressibility and dedup ratio so that storage backends with
//! inline compression or deduplication see realistic data.

use rand::RngCore;
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;
use std::alloc::{alloc, dealloc, Layout};

/// Alignment required by O_DIRECT on every mainstream Linux filesystem
pub const DIRECT_IO_ALIGNMENT: usize = 4096;

const BLOCK: usize = 4096;

// 95 printable ASCII characters, cycled for incompressible-free filler
const PRINTABLE: &[u8] =
    b"0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ\
      !\"#$%&'()*+,-./:;<=>?@[\\]^_`{|}~ ";

/// Memory-aligned buffer suitable for O_DIRECT operations
///
/// Ensures proper alignment (4096 bytes) required by O_DIRECT file
/// operations.
pub struct AlignedBuffer {
    ptr: *mut u8,
    size: usize,
    layout: Layout,
}

impl AlignedBuffer {
    /// Create a new aligned buffer of `size` bytes
    ///
    /// # Panics
    ///
    /// Panics if alignment is not a power of 2 or if allocation fails.
    pub fn new(size: usize, alignment: usize) -> Self {
        assert!(alignment.is_power_of_two(), "Alignment must be a power of 2");

        // Zero-length payloads still get a real allocation so the pointer
        // stays valid for syscalls that never dereference it.
        let layout = Layout::from_size_align(size.max(alignment), alignment)
            .expect("Invalid layout parameters");

        let ptr = unsafe { alloc(layout) };
        if ptr.is_null() {
            panic!("Failed to allocate aligned buffer");
        }

        AlignedBuffer { ptr, size, layout }
    }

    #[inline(always)]
    pub fn as_slice(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr, self.size) }
    }

    #[inline(always)]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.ptr, self.size) }
    }

    #[inline(always)]
    pub fn size(&self) -> usize {
        self.size
    }

    #[inline(always)]
    pub fn is_aligned(&self) -> bool {
        (self.ptr as usize) % self.layout.align() == 0
    }
}

impl Drop for AlignedBuffer {
    fn drop(&mut self) {
        unsafe {
            dealloc(self.ptr, self.layout);
        }
    }
}

// AlignedBuffer is Send because it owns its memory
unsafe impl Send for AlignedBuffer {}

/// Generator of write payloads
///
/// Two regimes:
///
/// - `compression_ratio == 0.0`: a deterministic printable-ASCII cycle.
///   Cheap to produce, trivially compressible, good for eyeballing files.
/// - otherwise: 4 KiB blocks carrying `4096/compression_ratio` random bytes
///   followed by zeros, with the block sequence repeated so that roughly
///   `dedupe_percentage` percent of blocks are duplicates of earlier ones.
pub struct PayloadFactory {
    compression_ratio: f64,
    dedupe_percentage: u8,
    rng: Xoshiro256PlusPlus,
}

impl PayloadFactory {
    pub fn new(compression_ratio: f64, dedupe_percentage: u8) -> Self {
        Self {
            compression_ratio,
            dedupe_percentage,
            rng: Xoshiro256PlusPlus::from_entropy(),
        }
    }

    /// Create a factory with a fixed seed, for reproducible tests
    pub fn with_seed(compression_ratio: f64, dedupe_percentage: u8, seed: u64) -> Self {
        Self {
            compression_ratio,
            dedupe_percentage,
            rng: Xoshiro256PlusPlus::seed_from_u64(seed),
        }
    }

    /// Synthesize a payload of exactly `size_bytes` bytes
    pub fn gen_buffer(&mut self, size_bytes: usize) -> AlignedBuffer {
        let mut buf = AlignedBuffer::new(size_bytes, DIRECT_IO_ALIGNMENT);
        if size_bytes == 0 {
            return buf;
        }

        if self.compression_ratio == 0.0 {
            for (k, byte) in buf.as_mut_slice().iter_mut().enumerate() {
                *byte = PRINTABLE[k % PRINTABLE.len()];
            }
            return buf;
        }

        self.fill_compressible(buf.as_mut_slice());
        buf
    }

    fn fill_compressible(&mut self, out: &mut [u8]) {
        let dedupe_fraction = f64::from(self.dedupe_percentage) / 100.0;

        // The duplicate-block fraction is 1 - unique/total, so the unique
        // prefix covers the complement of the requested dedup ratio.
        let unique_fraction = 1.0 - dedupe_fraction;
        let unique_blocks = (((out.len() / BLOCK) as f64) * unique_fraction)
            .floor()
            .max(1.0) as usize;

        let random_bytes = ((BLOCK as f64) / self.compression_ratio) as usize;
        let random_bytes = random_bytes.min(BLOCK);

        let mut sequence = vec![0u8; unique_blocks * BLOCK];
        for block in sequence.chunks_mut(BLOCK) {
            self.rng.fill_bytes(&mut block[..random_bytes]);
            block[random_bytes..].fill(0);
        }

        // Cycle the unique block sequence until the payload is full, clamping
        // the last copy at the requested size.
        let mut written = 0usize;
        let mut pass = 0usize;
        while written < out.len() {
            let src_block = pass % unique_blocks;
            let src = &sequence[src_block * BLOCK..(src_block + 1) * BLOCK];
            let n = (out.len() - written).min(BLOCK);
            out[written..written + n].copy_from_slice(&src[..n]);
            written += n;
            pass += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aligned_buffer_4k_alignment() {
        let buffer = AlignedBuffer::new(8192, 4096);
        assert_eq!(buffer.size(), 8192);
        assert!(buffer.is_aligned());
    }

    #[test]
    fn test_aligned_buffer_zero_length() {
        let buffer = AlignedBuffer::new(0, 4096);
        assert_eq!(buffer.size(), 0);
        assert!(buffer.as_slice().is_empty());
        assert!(!buffer.as_slice().as_ptr().is_null());
    }

    #[test]
    #[should_panic(expected = "Alignment must be a power of 2")]
    fn test_invalid_alignment() {
        let _ = AlignedBuffer::new(4096, 513);
    }

    #[test]
    fn test_printable_payload_is_deterministic() {
        let mut a = PayloadFactory::new(0.0, 0);
        let mut b = PayloadFactory::new(0.0, 0);
        let x = a.gen_buffer(1000);
        let y = b.gen_buffer(1000);
        assert_eq!(x.as_slice(), y.as_slice());
        assert!(x.as_slice().iter().all(|&c| (0x20..0x7f).contains(&c)));
    }

    #[test]
    fn test_payload_exact_size() {
        let mut f = PayloadFactory::with_seed(2.0, 50, 7);
        for size in [0usize, 1, 4095, 4096, 4097, 65536, 100_000] {
            let buf = f.gen_buffer(size);
            assert_eq!(buf.size(), size);
        }
    }

    #[test]
    fn test_compressible_zero_fraction() {
        // ratio 4.0 => 1024 random bytes per 4 KiB block, rest zero
        let mut f = PayloadFactory::with_seed(4.0, 0, 42);
        let buf = f.gen_buffer(64 * 4096);
        let zeros = buf.as_slice().iter().filter(|&&b| b == 0).count();
        let frac = zeros as f64 / buf.size() as f64;
        assert!(
            (frac - 0.75).abs() < 0.02,
            "zero fraction {} should approximate 0.75",
            frac
        );
    }

    #[test]
    fn test_dedupe_repeats_block_sequence() {
        // 50% dedup over 16 blocks: 8 unique blocks repeated twice
        let mut f = PayloadFactory::with_seed(2.0, 50, 9);
        let buf = f.gen_buffer(16 * 4096);
        let s = buf.as_slice();
        let half = 8 * 4096;
        assert_eq!(&s[..half], &s[half..]);
    }

    #[test]
    fn test_no_dedupe_blocks_are_unique() {
        let mut f = PayloadFactory::with_seed(2.0, 0, 11);
        let buf = f.gen_buffer(4 * 4096);
        let s = buf.as_slice();
        assert_ne!(&s[..4096], &s[4096..8192]);
        assert_ne!(&s[4096..8192], &s[8192..12288]);
    }
}
