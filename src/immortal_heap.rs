//! Immortal heap: bump allocation of permanent metadata.
//!
//! Memory comes from the OS in chunks (see [`crate::platform`]) and is
//! never returned. Fresh chunks are zeroed by the OS and bump space is
//! never reused, so every allocation starts out zeroed. Running out of
//! memory is fatal.

use crate::platform;
use parking_lot::Mutex;
use std::alloc::{Layout, handle_alloc_error};
use std::ptr::NonNull;

/// Minimum alignment of every immortal allocation.
pub const MIN_ALIGN: usize = 16;

/// Default size of a chunk requested from the OS (64 KiB).
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Allocation counters, for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImmortalHeapStats {
    /// Bytes handed out to callers.
    pub bytes_allocated: usize,
    /// Bytes obtained from the OS.
    pub bytes_reserved: usize,
    pub allocations: usize,
    pub chunks: usize,
}

struct BumpState {
    cursor: usize,
    end: usize,
    stats: ImmortalHeapStats,
}

pub struct ImmortalHeap {
    chunk_size: usize,
    state: Mutex<BumpState>,
}

#[inline]
const fn round_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}

impl ImmortalHeap {
    pub const fn new() -> Self {
        Self::with_chunk_size(DEFAULT_CHUNK_SIZE)
    }

    /// `chunk_size` must be a power of two.
    pub const fn with_chunk_size(chunk_size: usize) -> Self {
        assert!(chunk_size.is_power_of_two());
        Self {
            chunk_size,
            state: Mutex::new(BumpState {
                cursor: 0,
                end: 0,
                stats: ImmortalHeapStats {
                    bytes_allocated: 0,
                    bytes_reserved: 0,
                    allocations: 0,
                    chunks: 0,
                },
            }),
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Allocate `size` zeroed bytes aligned to at least `align` (and
    /// [`MIN_ALIGN`]). The memory lives for the rest of the process.
    ///
    /// `name` identifies the client in trace output.
    pub fn allocate(&self, size: usize, align: usize, name: &'static str) -> NonNull<u8> {
        assert!(align.is_power_of_two() && align <= platform::page_size());
        let align = align.max(MIN_ALIGN);
        let size = round_up(size.max(1), MIN_ALIGN);

        let mut state = self.state.lock();

        // Oversized requests get a dedicated region and leave the chunk alone.
        if size > self.chunk_size / 2 {
            let region = round_up(size, platform::page_size());
            let ptr = Self::reserve(region, size, align, name);
            state.stats.bytes_reserved += region;
            state.stats.bytes_allocated += size;
            state.stats.allocations += 1;
            state.stats.chunks += 1;
            return ptr;
        }

        let mut begin = round_up(state.cursor, align);
        if state.cursor == 0 || begin + size > state.end {
            let chunk = Self::reserve(self.chunk_size, size, align, name);
            state.cursor = chunk.as_ptr() as usize;
            state.end = state.cursor + self.chunk_size;
            state.stats.bytes_reserved += self.chunk_size;
            state.stats.chunks += 1;
            begin = round_up(state.cursor, align);
        }

        state.cursor = begin + size;
        state.stats.bytes_allocated += size;
        state.stats.allocations += 1;

        // SAFETY: begin lies inside a non-null chunk obtained from the OS.
        unsafe { NonNull::new_unchecked(begin as *mut u8) }
    }

    /// Typed convenience over [`ImmortalHeap::allocate`]: a zeroed slice of
    /// `len` elements of `T`, for types where all-zero bytes are valid.
    ///
    /// # Safety
    /// All-zero bytes must be a valid `T`.
    pub unsafe fn allocate_zeroed_slice<T>(&self, len: usize, name: &'static str) -> &[T] {
        let size = core::mem::size_of::<T>() * len;
        let ptr = self.allocate(size, core::mem::align_of::<T>(), name);
        unsafe { core::slice::from_raw_parts(ptr.as_ptr() as *const T, len) }
    }

    pub fn stats(&self) -> ImmortalHeapStats {
        self.state.lock().stats
    }

    #[cold]
    fn reserve(region: usize, size: usize, align: usize, name: &'static str) -> NonNull<u8> {
        tracing::trace!(region, size, client = name, "immortal heap reserving region");
        match NonNull::new(platform::page_alloc(region)) {
            Some(ptr) => ptr,
            None => {
                tracing::error!(region, client = name, "immortal heap out of memory");
                handle_alloc_error(
                    Layout::from_size_align(size, align).unwrap_or(Layout::new::<u8>()),
                )
            }
        }
    }
}

impl Default for ImmortalHeap {
    fn default() -> Self {
        Self::new()
    }
}
