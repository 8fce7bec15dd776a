//! Shared memory segments. Ground: `SPEC_FULL.md` §4.7,
//! `original_source/kernel/ipc/shm.c`.

use crate::error::{KernelError, KernelResult};
use crate::mm::vmm::{self, PageFlags};
use crate::mm::{frames, pmm};
use crate::sync::spinlock::Spinlock;
use alloc::vec::Vec;

/// Maximum number of concurrently registered shared-memory segments.
pub const MAX_SEGMENTS: usize = 32;

struct Segment {
    key: u32,
    frames: Vec<usize>,
    refcount: u32,
}

struct Registry {
    segments: [Option<Segment>; MAX_SEGMENTS],
}

impl Registry {
    const fn new() -> Self {
        const NONE: Option<Segment> = None;
        Self { segments: [NONE; MAX_SEGMENTS] }
    }
}

static REGISTRY: Spinlock<Registry> = Spinlock::new(Registry::new());

pub type ShmId = usize;

/// Reserves `size` bytes (rounded up to whole frames) under `key`.
pub fn create(key: u32, size: usize) -> KernelResult<ShmId> {
    let mut registry = REGISTRY.lock();
    let slot = registry
        .segments
        .iter()
        .position(Option::is_none)
        .ok_or(KernelError::ResourceExhausted)?;

    let frame_count = size.div_ceil(pmm::FRAME_SIZE);
    let mut frame_list = Vec::with_capacity(frame_count);
    for _ in 0..frame_count {
        frame_list.push(pmm::alloc_frame()?);
    }

    registry.segments[slot] = Some(Segment { key, frames: frame_list, refcount: 0 });
    Ok(slot)
}

/// Maps `id`'s frames into the caller's address space starting at
/// `vaddr`, incrementing its refcount.
pub fn attach(id: ShmId, vaddr: usize) -> KernelResult<()> {
    let mut registry = REGISTRY.lock();
    let segment = registry.segments.get_mut(id).and_then(Option::as_mut).ok_or(KernelError::NotFound)?;
    for (i, frame) in segment.frames.iter().enumerate() {
        frames::share(*frame);
        // SAFETY: vaddr + i*FRAME_SIZE is caller-provided and assumed
        // free; mapping the shared frame does not alter its contents.
        unsafe {
            vmm::map(
                vaddr + i * pmm::FRAME_SIZE,
                *frame,
                PageFlags::PRESENT | PageFlags::WRITABLE | PageFlags::USER,
            )?;
        }
    }
    segment.refcount += 1;
    Ok(())
}

/// Unmaps the segment previously attached at `vaddr`, spanning
/// `frame_count` frames.
pub fn detach(vaddr: usize, frame_count: usize) {
    for i in 0..frame_count {
        // SAFETY: unmapping a caller-owned mapping the caller is
        // relinquishing.
        unsafe { vmm::unmap(vaddr + i * pmm::FRAME_SIZE) };
    }
}

/// Releases `id` once its refcount reaches 0, freeing every frame it
/// held.
pub fn destroy(id: ShmId) -> KernelResult<()> {
    let mut registry = REGISTRY.lock();
    let segment = registry.segments.get_mut(id).and_then(Option::as_mut).ok_or(KernelError::NotFound)?;
    if segment.refcount > 0 {
        segment.refcount -= 1;
        return Ok(());
    }
    for frame in &segment.frames {
        frames::drop_ref(*frame);
    }
    registry.segments[id] = None;
    Ok(())
}

/// Finds the segment registered under `key`, if any.
pub fn find_by_key(key: u32) -> Option<ShmId> {
    REGISTRY.lock().segments.iter().position(|s| s.as_ref().is_some_and(|s| s.key == key))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_case]
    fn create_rounds_size_up_to_whole_frames() {
        let id = create(42, 1).unwrap();
        let registry = REGISTRY.lock();
        assert_eq!(registry.segments[id].as_ref().unwrap().frames.len(), 1);
    }

    #[test_case]
    fn find_by_key_locates_a_created_segment() {
        let id = create(7, 4096).unwrap();
        assert_eq!(find_by_key(7), Some(id));
        assert_eq!(find_by_key(404), None);
    }
}
