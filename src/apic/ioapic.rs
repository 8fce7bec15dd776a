//! I/O APIC: redirection table programming. Ground:
//! `original_source/kernel/apic/ioapic.c`.

use crate::mm::vmm::{self, PageFlags};
use volatile::Volatile;

const IOREGSEL: usize = 0x00;
const IOWIN: usize = 0x10;
const IOAPICVER: u32 = 0x01;
const REDTBL_BASE: u32 = 0x10;

/// Delivery mode / flags for a fixed, edge-triggered, active-high physical
/// redirection entry (this kernel targets single-CPU physical delivery
/// only, per the Non-goals in `SPEC_FULL.md` §1).
const REDTBL_FIXED_PHYSICAL_ACTIVE_HIGH_EDGE: u64 = 0;
const REDTBL_MASKED: u64 = 1 << 16;

/// # Safety
/// The I/O APIC MMIO page must already be mapped at `IOAPIC_BASE_VIRT`.
unsafe fn select(index: u32) {
    (&mut *((super::IOAPIC_BASE_VIRT + IOREGSEL) as *mut Volatile<u32>)).write(index);
}

/// # Safety
/// Same as `select`.
unsafe fn read() -> u32 {
    (&mut *((super::IOAPIC_BASE_VIRT + IOWIN) as *mut Volatile<u32>)).read()
}

/// # Safety
/// Same as `select`.
unsafe fn write(value: u32) {
    (&mut *((super::IOAPIC_BASE_VIRT + IOWIN) as *mut Volatile<u32>)).write(value);
}

/// Number of redirection entries this I/O APIC implements.
///
/// # Safety
/// `init` must have already mapped the MMIO page.
unsafe fn num_entries() -> u8 {
    select(IOAPICVER);
    ((read() >> 16) & 0xFF) as u8 + 1
}

/// Maps the I/O APIC's MMIO page and masks every redirection entry.
///
/// # Safety
/// The VMM must already be initialized.
pub unsafe fn init(phys_base: usize) {
    vmm::map(
        super::IOAPIC_BASE_VIRT,
        phys_base,
        PageFlags::PRESENT | PageFlags::WRITABLE,
    )
    .expect("I/O APIC MMIO page must map");

    for irq in 0..num_entries() {
        set_entry(irq, redtbl_entry(0, true, 0));
    }
}

/// Builds a 64-bit redirection table entry value for `vector`, optionally
/// masked, delivered to `dest_apic_id`.
pub const fn redtbl_entry(vector: u8, masked: bool, dest_apic_id: u8) -> u64 {
    let mut value = REDTBL_FIXED_PHYSICAL_ACTIVE_HIGH_EDGE | vector as u64;
    if masked {
        value |= REDTBL_MASKED;
    }
    value | ((dest_apic_id as u64) << 56)
}

/// Writes a 64-bit redirection entry for `irq` (split across the two
/// 32-bit `IOWIN` registers the entry occupies).
///
/// # Safety
/// `init` must have already mapped the MMIO page; `irq` must be within
/// `num_entries()`.
pub unsafe fn set_entry(irq: u8, entry: u64) {
    let index = REDTBL_BASE + u32::from(irq) * 2;
    select(index);
    write((entry & 0xFFFF_FFFF) as u32);
    select(index + 1);
    write((entry >> 32) as u32);
}

/// Reads back the 64-bit redirection entry for `irq`.
///
/// # Safety
/// Same as `set_entry`.
pub unsafe fn get_entry(irq: u8) -> u64 {
    let index = REDTBL_BASE + u32::from(irq) * 2;
    select(index);
    let low = read() as u64;
    select(index + 1);
    let high = read() as u64;
    (high << 32) | low
}

/// Unmasks `irq`, routing it to `vector` on `dest_apic_id`.
///
/// # Safety
/// Same as `set_entry`.
pub unsafe fn enable_irq(irq: u8, vector: u8, dest_apic_id: u8) {
    set_entry(irq, redtbl_entry(vector, false, dest_apic_id));
}

/// Masks `irq`.
///
/// # Safety
/// Same as `set_entry`.
pub unsafe fn disable_irq(irq: u8) {
    let current = get_entry(irq);
    set_entry(irq, current | REDTBL_MASKED);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_case]
    fn redtbl_entry_encodes_vector_mask_and_destination() {
        let entry = redtbl_entry(0x30, false, 0);
        assert_eq!(entry & 0xFF, 0x30);
        assert_eq!(entry & REDTBL_MASKED, 0);

        let masked = redtbl_entry(0x30, true, 0);
        assert_ne!(masked & REDTBL_MASKED, 0);

        let routed = redtbl_entry(0x30, false, 2);
        assert_eq!((routed >> 56) & 0xFF, 2);
    }
}
