//! Instrumented kernel heap.
//!
//! `linked_list_allocator::Heap` already implements first-fit allocation
//! over a free list (ground: teacher `src/allocator.rs`), so it remains the
//! underlying strategy. This module wraps it with the allocation/free/leak
//! counters `SPEC_FULL.md` §4.2a calls for and validates alignment requests.

use core::alloc::{GlobalAlloc, Layout};
use core::ptr::NonNull;
use linked_list_allocator::Heap;
use spin::Mutex;

/// Virtual address at which the kernel heap is mapped.
pub const HEAP_START: usize = 0x_4444_0000;
/// Size of the kernel heap in bytes.
pub const HEAP_SIZE: usize = 1000 * 1024;

/// Point-in-time counters maintained alongside the allocator.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeapStats {
    /// Total successful allocations since init.
    pub total_allocs: u64,
    /// Total frees since init.
    pub total_frees: u64,
    /// Allocations currently live.
    pub live_allocs: u64,
    /// Bytes currently live.
    pub live_bytes: u64,
    /// Highest `live_allocs` ever observed.
    pub peak_allocs: u64,
    /// Highest `live_bytes` ever observed.
    pub peak_bytes: u64,
    /// Number of corrupted end-of-allocation canaries detected on free.
    pub overflow_count: u64,
}

const CANARY: u8 = 0xAC;

struct Inner {
    heap: Heap,
    stats: HeapStats,
}

/// Counting wrapper around `linked_list_allocator::Heap` suitable for use
/// as `#[global_allocator]`.
pub struct KernelHeap {
    inner: Mutex<Option<Inner>>,
}

impl KernelHeap {
    /// Creates an uninitialized heap; call `init` before any allocation.
    pub const fn empty() -> Self {
        Self {
            inner: Mutex::new(None),
        }
    }

    /// Initializes the heap over `[start, start + size)`.
    ///
    /// # Safety
    /// `start..start+size` must be a mapped, exclusively-owned region.
    pub unsafe fn init(&self, start: usize, size: usize) {
        let heap = Heap::new(start as *mut u8, size);
        *self.inner.lock() = Some(Inner {
            heap,
            stats: HeapStats::default(),
        });
    }

    /// Returns a snapshot of the current allocation counters.
    pub fn stats(&self) -> HeapStats {
        self.inner.lock().as_ref().map_or_else(HeapStats::default, |i| i.stats)
    }

    fn with_canary_layout(layout: Layout) -> Option<Layout> {
        Layout::from_size_align(layout.size() + 1, layout.align()).ok()
    }
}

// SAFETY: `alloc`/`dealloc` only touch the mutex-guarded inner state and
// the allocation they were handed; no aliasing beyond what `GlobalAlloc`'s
// contract already requires of callers.
unsafe impl GlobalAlloc for KernelHeap {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if !layout.align().is_power_of_two() {
            return core::ptr::null_mut();
        }
        let Some(canaried) = Self::with_canary_layout(layout) else {
            return core::ptr::null_mut();
        };
        let mut guard = self.inner.lock();
        let Some(inner) = guard.as_mut() else {
            return core::ptr::null_mut();
        };
        match inner.heap.allocate_first_fit(canaried) {
            Ok(ptr) => {
                ptr.as_ptr().add(layout.size()).write(CANARY);
                inner.stats.total_allocs += 1;
                inner.stats.live_allocs += 1;
                inner.stats.live_bytes += layout.size() as u64;
                inner.stats.peak_allocs = inner.stats.peak_allocs.max(inner.stats.live_allocs);
                inner.stats.peak_bytes = inner.stats.peak_bytes.max(inner.stats.live_bytes);
                ptr.as_ptr()
            }
            Err(_) => core::ptr::null_mut(),
        }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        let Some(canaried) = Self::with_canary_layout(layout) else {
            return;
        };
        let mut guard = self.inner.lock();
        let Some(inner) = guard.as_mut() else {
            return;
        };
        if ptr.add(layout.size()).read() != CANARY {
            inner.stats.overflow_count += 1;
        }
        if let Some(nonnull) = NonNull::new(ptr) {
            inner.heap.deallocate(nonnull, canaried);
        }
        inner.stats.total_frees += 1;
        inner.stats.live_allocs = inner.stats.live_allocs.saturating_sub(1);
        inner.stats.live_bytes = inner.stats.live_bytes.saturating_sub(layout.size() as u64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_case]
    fn allocate_and_free_tracks_live_counters() {
        static HEAP: KernelHeap = KernelHeap::empty();
        let mut backing = alloc::vec![0u8; 4096];
        // SAFETY: `backing` outlives the heap in this test scope.
        unsafe { HEAP.init(backing.as_mut_ptr() as usize, backing.len()) };

        let layout = Layout::from_size_align(64, 8).unwrap();
        // SAFETY: layout is well-formed and the heap was just initialized.
        let ptr = unsafe { HEAP.alloc(layout) };
        assert!(!ptr.is_null());
        assert_eq!(HEAP.stats().live_allocs, 1);
        assert_eq!(HEAP.stats().live_bytes, 64);

        // SAFETY: ptr was returned by a matching alloc with this layout.
        unsafe { HEAP.dealloc(ptr, layout) };
        assert_eq!(HEAP.stats().live_allocs, 0);
        assert_eq!(HEAP.stats().overflow_count, 0);
    }

    #[test_case]
    fn detects_overflow_past_the_allocation() {
        static HEAP: KernelHeap = KernelHeap::empty();
        let mut backing = alloc::vec![0u8; 4096];
        // SAFETY: `backing` outlives the heap in this test scope.
        unsafe { HEAP.init(backing.as_mut_ptr() as usize, backing.len()) };

        let layout = Layout::from_size_align(32, 8).unwrap();
        // SAFETY: layout is well-formed and the heap was just initialized.
        let ptr = unsafe { HEAP.alloc(layout) };
        // SAFETY: writing one byte past the requested size, into the canary.
        unsafe { ptr.add(32).write(0xFF) };
        // SAFETY: ptr was returned by a matching alloc with this layout.
        unsafe { HEAP.dealloc(ptr, layout) };
        assert_eq!(HEAP.stats().overflow_count, 1);
    }
}
