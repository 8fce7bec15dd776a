//! Memory management: physical frame bitmap, recursive-paging VMM, and the
//! instrumented kernel heap. See `SPEC_FULL.md` §4.1–§4.2a.

pub mod frames;
pub mod heap;
pub mod pmm;
pub mod vmm;

use crate::error::KernelResult;
use heap::{HeapStats, KernelHeap, HEAP_SIZE, HEAP_START};
use vmm::PageFlags;

#[global_allocator]
static ALLOCATOR: KernelHeap = KernelHeap::empty();

/// Brings up PMM, VMM heap mapping, and the global allocator, in that
/// dependency order (`SPEC_FULL.md` §2).
///
/// # Safety
/// Must run exactly once, after paging is enabled and before any code
/// performs a heap allocation.
pub unsafe fn init(mem_upper_kib: Option<u32>) -> KernelResult<()> {
    pmm::init(mem_upper_kib);

    for offset in (0..HEAP_SIZE).step_by(pmm::FRAME_SIZE) {
        let frame = pmm::alloc_frame()?;
        vmm::map(
            HEAP_START + offset,
            frame,
            PageFlags::PRESENT | PageFlags::WRITABLE,
        )?;
    }
    ALLOCATOR.init(HEAP_START, HEAP_SIZE);
    Ok(())
}

/// Snapshot of the kernel heap's allocation counters.
pub fn heap_stats() -> HeapStats {
    ALLOCATOR.stats()
}
