//! A small-object byte-buffer recycler backing payload buffers in the
//! subscription and publication engines.
//!
//! Size-classed free lists in powers of two, up to [`POOL_CAP`]; allocations
//! above the cap bypass the pool entirely. `free` returns a buffer to its
//! size class so a later `alloc` of the same class can reuse its storage
//! instead of the allocator making a fresh one.

use std::sync::Mutex;

/// Buffers this size or larger are never pooled.
pub const POOL_CAP: usize = 8 * 1024 * 1024;

fn size_class(n: usize) -> usize {
    n.max(1).next_power_of_two()
}

fn class_index(class: usize) -> usize {
    class.trailing_zeros() as usize
}

/// A byte buffer checked out of the recycler. `Drop` is intentionally not
/// implemented to return it automatically — callers hand it back
/// explicitly via [`Recycler::free`], mirroring the source's explicit
/// `Free(b)` contract rather than an RAII guard.
pub type Buffer = Vec<u8>;

pub struct Recycler {
    // index i holds buffers of capacity 2^i
    classes: Mutex<Vec<Vec<Buffer>>>,
}

impl Default for Recycler {
    fn default() -> Self {
        Recycler::new()
    }
}

impl Recycler {
    pub fn new() -> Self {
        let num_classes = class_index(POOL_CAP.next_power_of_two()) + 1;
        Recycler {
            classes: Mutex::new((0..num_classes).map(|_| Vec::new()).collect()),
        }
    }

    /// Returns a buffer with capacity at least `n`, reusing pooled storage
    /// of the matching size class when available.
    pub fn alloc(&self, n: usize) -> Buffer {
        let class = size_class(n);
        if class > POOL_CAP {
            return Vec::with_capacity(n);
        }
        let idx = class_index(class);
        let mut classes = self.classes.lock().unwrap();
        if let Some(mut buf) = classes[idx].pop() {
            buf.clear();
            return buf;
        }
        Vec::with_capacity(class)
    }

    /// Returns `buf` to its size class's free list. Above the pool cap the
    /// buffer is simply dropped.
    pub fn free(&self, buf: Buffer) {
        let class = size_class(buf.capacity());
        if class > POOL_CAP {
            return;
        }
        let idx = class_index(class);
        self.classes.lock().unwrap()[idx].push(buf);
    }

    /// Allocates a fresh buffer containing a copy of `data`, the recycler's
    /// `Copy(b)` operation.
    pub fn copy(&self, data: &[u8]) -> Buffer {
        let mut buf = self.alloc(data.len());
        buf.extend_from_slice(data);
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn freed_buffer_is_reused_by_a_same_class_alloc() {
        let pool = Recycler::new();
        let b1 = pool.alloc(100);
        let ptr1 = b1.as_ptr();
        let cap1 = b1.capacity();
        pool.free(b1);
        let b2 = pool.alloc(100);
        assert_eq!(b2.capacity(), cap1);
        assert_eq!(b2.as_ptr(), ptr1);
    }

    #[test]
    fn allocations_above_the_cap_bypass_the_pool() {
        let pool = Recycler::new();
        let big = pool.alloc(POOL_CAP + 1);
        assert!(big.capacity() >= POOL_CAP + 1);
        pool.free(big);
        // Nothing to assert on reuse: bypassed buffers are simply dropped.
    }

    #[test]
    fn copy_duplicates_the_input_bytes() {
        let pool = Recycler::new();
        let buf = pool.copy(b"hello");
        assert_eq!(buf.as_slice(), b"hello");
    }

    #[test]
    fn size_classes_round_up_to_powers_of_two() {
        assert_eq!(size_class(100), 128);
        assert_eq!(size_class(128), 128);
        assert_eq!(size_class(1), 1);
    }
}
