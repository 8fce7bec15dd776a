//! Bitmap physical frame allocator.
//!
//! One bit per 4 KiB physical frame; a set bit means the frame is in use
//! (mapped, reserved, or otherwise unavailable). `alloc` linearly scans for
//! the first clear bit, `free` clears a bit, and `mark_used` sets one
//! without a corresponding free. See `SPEC_FULL.md` §4.1.

use crate::error::{KernelError, KernelResult};

/// 4 KiB, the fixed frame size this allocator tracks.
pub const FRAME_SIZE: usize = 4096;

/// Frames covered by the static bitmap: 4 GiB of physical address space.
const MAX_FRAMES: usize = 1 << 20;
const BITMAP_WORDS: usize = MAX_FRAMES / 32;

/// A bitmap over a fixed span of physical frames.
///
/// Generic over the backing storage so unit tests can exercise the
/// algorithm against a small in-memory array instead of the real
/// kernel-wide static bitmap.
pub struct Bitmap<'a> {
    words: &'a mut [u32],
    total_frames: usize,
    used_frames: usize,
}

impl<'a> Bitmap<'a> {
    /// Wraps `words` as a bitmap tracking `total_frames` frames. All frames
    /// start clear (free).
    pub fn new(words: &'a mut [u32], total_frames: usize) -> Self {
        for w in words.iter_mut() {
            *w = 0;
        }
        Self {
            words,
            total_frames,
            used_frames: 0,
        }
    }

    const fn word_index(frame: usize) -> usize {
        frame / 32
    }

    const fn bit_mask(frame: usize) -> u32 {
        1 << (frame % 32)
    }

    fn is_set(&self, frame: usize) -> bool {
        self.words[Self::word_index(frame)] & Self::bit_mask(frame) != 0
    }

    /// Marks `frame` used unconditionally. Idempotent.
    pub fn mark_used(&mut self, frame: usize) {
        if frame >= self.total_frames {
            return;
        }
        if !self.is_set(frame) {
            self.words[Self::word_index(frame)] |= Self::bit_mask(frame);
            self.used_frames += 1;
        }
    }

    /// Finds and marks the first free frame, returning its index.
    pub fn alloc(&mut self) -> Option<usize> {
        for frame in 0..self.total_frames {
            if !self.is_set(frame) {
                self.words[Self::word_index(frame)] |= Self::bit_mask(frame);
                self.used_frames += 1;
                return Some(frame);
            }
        }
        None
    }

    /// Clears `frame`'s bit. A no-op if the frame was already free.
    pub fn free(&mut self, frame: usize) {
        if frame >= self.total_frames || !self.is_set(frame) {
            return;
        }
        self.words[Self::word_index(frame)] &= !Self::bit_mask(frame);
        self.used_frames -= 1;
    }

    /// Number of frames currently marked used.
    pub fn used(&self) -> usize {
        self.used_frames
    }

    /// Number of frames currently free.
    pub fn free_count(&self) -> usize {
        self.total_frames - self.used_frames
    }

    /// Total frames this bitmap tracks.
    pub fn total(&self) -> usize {
        self.total_frames
    }
}

/// Frames below 1 MiB plus the kernel image/bitmap extent are reserved at
/// boot, matching `original_source/kernel/mm/pmm.c: pmm_init`.
const RESERVED_LOW_FRAMES: usize = 256;

static mut PMM_STORAGE: [u32; BITMAP_WORDS] = [0; BITMAP_WORDS];

/// The kernel-wide physical memory manager, guarded by a spinlock.
pub struct Pmm {
    bitmap: Bitmap<'static>,
}

static PMM: spin::Mutex<Option<Pmm>> = spin::Mutex::new(None);

/// Initializes the global physical memory manager from a multiboot-style
/// `mem_upper` value (KiB above 1 MiB), defaulting to 256 MiB when the boot
/// info did not report one.
pub fn init(mem_upper_kib: Option<u32>) {
    let total_bytes = match mem_upper_kib {
        Some(kib) => (kib as usize) * 1024 + 0x100000,
        None => 256 * 1024 * 1024,
    };
    let total_frames = (total_bytes / FRAME_SIZE).min(MAX_FRAMES);

    // SAFETY: PMM_STORAGE is only ever touched from this single
    // initialization path, guarded by the PMM mutex for all later use.
    let words: &'static mut [u32] = unsafe { &mut *core::ptr::addr_of_mut!(PMM_STORAGE) };
    let mut bitmap = Bitmap::new(words, total_frames);
    for frame in 0..RESERVED_LOW_FRAMES.min(total_frames) {
        bitmap.mark_used(frame);
    }

    *PMM.lock() = Some(Pmm { bitmap });
}

/// Allocates a physical frame, returning its base address.
pub fn alloc_frame() -> KernelResult<usize> {
    let mut guard = PMM.lock();
    let pmm = guard.as_mut().ok_or(KernelError::Fatal)?;
    pmm.bitmap
        .alloc()
        .map(|frame| frame * FRAME_SIZE)
        .ok_or(KernelError::ResourceExhausted)
}

/// Frees a previously allocated physical frame.
pub fn free_frame(addr: usize) {
    if let Some(pmm) = PMM.lock().as_mut() {
        pmm.bitmap.free(addr / FRAME_SIZE);
    }
}

/// Marks the frame containing `addr` used without tracking it as an
/// allocation (used for reserving the kernel image and bitmap extent).
pub fn mark_used(addr: usize) {
    if let Some(pmm) = PMM.lock().as_mut() {
        pmm.bitmap.mark_used(addr / FRAME_SIZE);
    }
}

/// Total frames the PMM was initialized to track.
pub fn total_frames() -> usize {
    PMM.lock().as_ref().map_or(0, |p| p.bitmap.total())
}

/// Frames currently in use.
pub fn used_frames() -> usize {
    PMM.lock().as_ref().map_or(0, |p| p.bitmap.used())
}

/// Frames currently free.
pub fn free_frames() -> usize {
    PMM.lock().as_ref().map_or(0, |p| p.bitmap.free_count())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_case]
    fn alloc_returns_distinct_page_aligned_addresses() {
        let mut storage = [0u32; 4];
        let mut bitmap = Bitmap::new(&mut storage, 100);

        let a = bitmap.alloc().expect("frame 0 should be free");
        let b = bitmap.alloc().expect("frame 1 should be free");
        assert_ne!(a, b, "two successive allocs must return different frames");
        assert_eq!(bitmap.used(), 2);
    }

    #[test_case]
    fn free_is_idempotent_and_conserves_total() {
        let mut storage = [0u32; 4];
        let mut bitmap = Bitmap::new(&mut storage, 64);
        let total = bitmap.total();

        let frame = bitmap.alloc().expect("should allocate");
        assert_eq!(bitmap.used() + bitmap.free_count(), total);

        bitmap.free(frame);
        assert_eq!(bitmap.used(), 0);
        // freeing an already-free frame is a no-op
        bitmap.free(frame);
        assert_eq!(bitmap.used(), 0);
        assert_eq!(bitmap.used() + bitmap.free_count(), total);
    }

    #[test_case]
    fn alloc_stress_returns_to_initial_state() {
        let mut storage = [0u32; 8];
        let mut bitmap = Bitmap::new(&mut storage, 200);

        let mut allocated = alloc::vec::Vec::new();
        while let Some(frame) = bitmap.alloc() {
            allocated.push(frame);
        }
        assert_eq!(bitmap.free_count(), 0);

        let unique: alloc::collections::BTreeSet<_> = allocated.iter().copied().collect();
        assert_eq!(unique.len(), allocated.len(), "all allocations must be distinct");

        for frame in allocated {
            bitmap.free(frame);
        }
        assert_eq!(bitmap.used(), 0);
    }

    #[test_case]
    fn mark_used_does_not_double_count() {
        let mut storage = [0u32; 2];
        let mut bitmap = Bitmap::new(&mut storage, 32);
        bitmap.mark_used(5);
        bitmap.mark_used(5);
        assert_eq!(bitmap.used(), 1);
    }
}
