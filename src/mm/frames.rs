//! Physical frame reference counting for copy-on-write sharing. Ground:
//! `SPEC_FULL.md` §4.6 "Fork"/"Copy-on-write fault",
//! `original_source/kernel/mm/frame_refcount.c`.
//!
//! A frame newly handed out by `pmm::alloc_frame` is implicitly owned by
//! one mapping and is not tracked here; only frames shared by `fork`
//! appear in the table, with a count of how many mappings reference them.

use crate::mm::pmm;
use crate::sync::spinlock::Spinlock;
use alloc::collections::BTreeMap;

static REFCOUNTS: Spinlock<BTreeMap<usize, u32>> = Spinlock::new(BTreeMap::new());

/// Marks `addr` as shared by one additional mapping (used when `fork`
/// installs the same frame, COW-marked, into both address spaces).
pub fn share(addr: usize) {
    let mut table = REFCOUNTS.lock();
    let count = table.entry(addr).or_insert(1);
    *count += 1;
}

/// The number of mappings currently referencing `addr`; frames never
/// explicitly shared report 1.
pub fn refcount(addr: usize) -> u32 {
    REFCOUNTS.lock().get(&addr).copied().unwrap_or(1)
}

/// Drops one reference to `addr`, freeing the frame back to the PMM once
/// the last reference is gone.
pub fn drop_ref(addr: usize) {
    let mut table = REFCOUNTS.lock();
    match table.get_mut(&addr) {
        Some(count) if *count > 1 => {
            *count -= 1;
        }
        Some(_) => {
            table.remove(&addr);
            pmm::free_frame(addr);
        }
        None => pmm::free_frame(addr),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_case]
    fn unshared_frame_reports_refcount_one() {
        assert_eq!(refcount(0x1234_5000), 1);
    }

    #[test_case]
    fn shared_frame_requires_every_reference_dropped_before_reuse() {
        let addr = pmm::alloc_frame().unwrap();
        share(addr);
        assert_eq!(refcount(addr), 2);
        drop_ref(addr);
        assert_eq!(refcount(addr), 1);
        drop_ref(addr);
        assert_eq!(refcount(addr), 1);
    }
}
