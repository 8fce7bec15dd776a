//! Local APIC + I/O APIC bring-up.
//!
//! Ground: `original_source/kernel/apic/lapic.c` and `kernel/apic/ioapic.c`.
//! The MADT is consulted for the LAPIC/IOAPIC base addresses; when absent
//! (as in the original C kernel, which never parses ACPI either) the
//! architectural defaults are used (`SPEC_FULL.md` §4.4a).

pub mod ioapic;
pub mod lapic;

/// Default physical base of the Local APIC register block.
pub const LAPIC_BASE_PHYS: usize = 0xFEE0_0000;
/// Default physical base of the I/O APIC register block.
pub const IOAPIC_BASE_PHYS: usize = 0xFEC0_0000;

/// Virtual address the Local APIC's MMIO page is mapped at.
pub const LAPIC_BASE_VIRT: usize = 0xE000_0000;
/// Virtual address the I/O APIC's MMIO page is mapped at.
pub const IOAPIC_BASE_VIRT: usize = 0xE000_1000;

/// Locates the Local APIC / I/O APIC physical bases via the MADT if one is
/// reachable from the boot info, else falls back to the architectural
/// defaults (`SPEC_FULL.md` §4.4a).
pub fn discover_bases(madt_lapic: Option<usize>, madt_ioapic: Option<usize>) -> (usize, usize) {
    (
        madt_lapic.unwrap_or(LAPIC_BASE_PHYS),
        madt_ioapic.unwrap_or(IOAPIC_BASE_PHYS),
    )
}

/// Brings up the Local APIC (spurious vector + periodic timer) and the I/O
/// APIC (masked redirection table), then disables the legacy PIC.
///
/// # Safety
/// Must run after the VMM is initialized (to map the MMIO pages) and after
/// the IDT is loaded (so the timer and IRQ vectors have handlers).
pub unsafe fn init(madt_lapic: Option<usize>, madt_ioapic: Option<usize>, timer_hz: u32) {
    let (lapic_phys, ioapic_phys) = discover_bases(madt_lapic, madt_ioapic);
    lapic::init(lapic_phys);
    lapic::init_timer(timer_hz);
    ioapic::init(ioapic_phys);
    crate::idt::disable_legacy_pic();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_case]
    fn madt_override_is_preferred_over_defaults() {
        assert_eq!(discover_bases(Some(0x1000), None), (0x1000, IOAPIC_BASE_PHYS));
        assert_eq!(discover_bases(None, None), (LAPIC_BASE_PHYS, IOAPIC_BASE_PHYS));
    }
}
