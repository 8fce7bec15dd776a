//! Global Descriptor Table and Task-State Segment.
//!
//! Eight flat segment descriptors (kernel/driver/service/user, code+data)
//! plus one TSS descriptor, matching `SPEC_FULL.md` §4.4 and
//! `original_source/include/arch/x86/gdt.h`. The TSS carries the ring-0
//! stack pointer used on any privilege drop and an I/O permission bitmap
//! whose offset is rewritten whenever a driver domain activates
//! (`isolation::activate`, §4.5) instead of switching to a second TSS.

use core::mem::size_of;
use lazy_static::lazy_static;
use spin::Mutex;

/// CPU privilege levels used by this kernel; ring 1 is reserved for
/// isolated drivers and ring 2 for kernel-service trampolines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Ring {
    Kernel = 0,
    Driver = 1,
    Service = 2,
    User = 3,
}

/// Selector indices into the GDT, in RPL-adjusted form.
#[derive(Debug, Clone, Copy)]
pub struct Selectors {
    pub kernel_code: u16,
    pub kernel_data: u16,
    pub driver_code: u16,
    pub driver_data: u16,
    pub service_code: u16,
    pub service_data: u16,
    pub user_code: u16,
    pub user_data: u16,
    pub tss: u16,
}

const GDT_ENTRIES: usize = 10;
const IOPB_SIZE: usize = 8192;

#[repr(C, packed)]
struct TssHeader {
    _reserved0: u32,
    esp0: u32,
    ss0: u32,
    _reserved1: [u32; 22],
    _reserved2: u16,
    iomap_base: u16,
}

/// The I/O Permission Bitmap lives at the end of the TSS; one bit per port,
/// 0 = allowed, 1 = denied. Swapped wholesale on driver domain activation.
#[repr(C, packed)]
pub struct Tss {
    _reserved0: u32,
    pub esp0: u32,
    pub ss0: u32,
    _reserved1: [u32; 22],
    _reserved2: u16,
    pub iomap_base: u16,
    pub iopb: [u8; IOPB_SIZE + 1],
}

impl Tss {
    const fn new() -> Self {
        Self {
            _reserved0: 0,
            esp0: 0,
            ss0: 0,
            _reserved1: [0; 22],
            _reserved2: 0,
            iomap_base: size_of::<TssHeader>() as u16,
            iopb: [0xFF; IOPB_SIZE + 1],
        }
    }
}

/// Kernel stack used whenever the CPU drops privilege into ring 0 (via the
/// TSS `esp0`/`ss0` fields on an interrupt, syscall, or driver-service
/// return from a lower ring).
pub const KERNEL_STACK_SIZE: usize = 4096 * 5;
static mut KERNEL_STACK: [u8; KERNEL_STACK_SIZE] = [0; KERNEL_STACK_SIZE];

lazy_static! {
    static ref TSS: Mutex<Tss> = {
        let mut tss = Tss::new();
        // SAFETY: KERNEL_STACK is a static array; its end address is a
        // valid, stable stack-top for ring-0 entry.
        let stack_top = core::ptr::addr_of!(KERNEL_STACK) as u32 + KERNEL_STACK_SIZE as u32;
        tss.esp0 = stack_top;
        tss.ss0 = 0x10; // kernel data selector, matches GDT_TABLE below
        Mutex::new(tss)
    };
}

#[repr(C, packed)]
#[derive(Clone, Copy)]
struct GdtEntry {
    limit_low: u16,
    base_low: u16,
    base_middle: u8,
    access: u8,
    granularity: u8,
    base_high: u8,
}

impl GdtEntry {
    const fn null() -> Self {
        Self { limit_low: 0, base_low: 0, base_middle: 0, access: 0, granularity: 0, base_high: 0 }
    }

    const fn flat(access: u8) -> Self {
        Self {
            limit_low: 0xFFFF,
            base_low: 0,
            base_middle: 0,
            access,
            granularity: 0xCF,
            base_high: 0,
        }
    }

    fn tss(base: u32, limit: u32) -> Self {
        Self {
            limit_low: (limit & 0xFFFF) as u16,
            base_low: (base & 0xFFFF) as u16,
            base_middle: ((base >> 16) & 0xFF) as u8,
            access: 0x89, // present, ring 0, 32-bit TSS (available)
            granularity: (((limit >> 16) & 0x0F) as u8) | 0x40,
            base_high: ((base >> 24) & 0xFF) as u8,
        }
    }
}

#[repr(C, packed)]
struct GdtPointer {
    limit: u16,
    base: u32,
}

struct Gdt {
    entries: [GdtEntry; GDT_ENTRIES],
}

const fn access_byte(ring: Ring, executable: bool) -> u8 {
    // present(1) | dpl(2) | type(1=code/data) | executable | conforming/direction(0) | rw(1) | accessed(0)
    0x90 | ((ring as u8) << 5) | if executable { 0x0A } else { 0x02 }
}

lazy_static! {
    static ref GDT_TABLE: (Gdt, Selectors) = {
        let tss_base = {
            let guard = TSS.lock();
            core::ptr::addr_of!(*guard) as u32
        };

        let entries = [
            GdtEntry::null(),
            GdtEntry::flat(access_byte(Ring::Kernel, true)),
            GdtEntry::flat(access_byte(Ring::Kernel, false)),
            GdtEntry::flat(access_byte(Ring::Driver, true)),
            GdtEntry::flat(access_byte(Ring::Driver, false)),
            GdtEntry::flat(access_byte(Ring::Service, true)),
            GdtEntry::flat(access_byte(Ring::Service, false)),
            GdtEntry::flat(access_byte(Ring::User, true)),
            GdtEntry::flat(access_byte(Ring::User, false)),
            GdtEntry::tss(tss_base, size_of::<Tss>() as u32 - 1),
        ];

        let selectors = Selectors {
            kernel_code: 1 << 3,
            kernel_data: 2 << 3,
            driver_code: (3 << 3) | Ring::Driver as u16,
            driver_data: (4 << 3) | Ring::Driver as u16,
            service_code: (5 << 3) | Ring::Service as u16,
            service_data: (6 << 3) | Ring::Service as u16,
            user_code: (7 << 3) | Ring::User as u16,
            user_data: (8 << 3) | Ring::User as u16,
            tss: 9 << 3,
        };

        (Gdt { entries }, selectors)
    };
}

/// Loads the GDT, reloads every segment register, and loads the TSS.
///
/// # Safety
/// Must run once during early boot, before any ring transition.
#[cfg(target_arch = "x86")]
pub unsafe fn init() {
    let (gdt, selectors) = &*GDT_TABLE;
    let pointer = GdtPointer {
        limit: (size_of::<GdtEntry>() * GDT_ENTRIES - 1) as u16,
        base: gdt.entries.as_ptr() as u32,
    };

    core::arch::asm!("lgdt [{0}]", in(reg) &pointer, options(readonly, nostack, preserves_flags));
    core::arch::asm!(
        "push {code:e}",
        "lea {tmp:e}, [2f]",
        "push {tmp:e}",
        "retf",
        "2:",
        "mov ds, {data:x}",
        "mov es, {data:x}",
        "mov fs, {data:x}",
        "mov gs, {data:x}",
        "mov ss, {data:x}",
        code = in(reg) u32::from(selectors.kernel_code),
        data = in(reg) selectors.kernel_data,
        tmp = lateout(reg) _,
    );
    core::arch::asm!("ltr {0:x}", in(reg) selectors.tss, options(nostack, preserves_flags));
}

/// On non-`x86` host targets (used only for `cargo check`/`cargo test`
/// self-validation, see `DESIGN.md`), the real ring-transition asm above
/// cannot assemble, so initialization is limited to building the in-memory
/// tables without touching live CPU state.
#[cfg(not(target_arch = "x86"))]
pub unsafe fn init() {
    let _ = &*GDT_TABLE;
}

/// Returns the kernel/driver/service/user segment selectors built during
/// `init`.
pub fn selectors() -> Selectors {
    GDT_TABLE.1
}

/// Sets the TSS's `esp0`, the stack the CPU switches to whenever a ring
/// transition lands in ring 0 (interrupts, syscalls, driver-service traps).
pub fn set_kernel_stack(esp0: u32) {
    TSS.lock().esp0 = esp0;
}

/// Overwrites the TSS's IOPB with `bitmap` and points `iomap_base` at it,
/// so only the ports `bitmap` allows are usable from a lower ring. Ground:
/// `SPEC_FULL.md` §9 "IOPB install" design note — a single TSS's IOPB
/// region is rewritten rather than switching TSS per driver domain.
pub fn install_iopb(bitmap: &[u8; IOPB_SIZE]) {
    let mut tss = TSS.lock();
    tss.iopb[..IOPB_SIZE].copy_from_slice(bitmap);
    tss.iomap_base = size_of::<TssHeader>() as u16;
}

/// Installs an all-deny IOPB, equivalent to no ring below 0 having any
/// port access.
pub fn deny_all_iopb() {
    let mut tss = TSS.lock();
    tss.iopb = [0xFF; IOPB_SIZE + 1];
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_case]
    fn access_byte_encodes_ring_and_type() {
        let kcode = access_byte(Ring::Kernel, true);
        let udata = access_byte(Ring::User, false);
        assert_eq!((kcode >> 5) & 0b11, Ring::Kernel as u8);
        assert_eq!((udata >> 5) & 0b11, Ring::User as u8);
        assert_ne!(kcode & 0x0A, udata & 0x0A);
    }

    #[test_case]
    fn selectors_carry_the_expected_rpl() {
        let sel = Selectors {
            kernel_code: 1 << 3,
            kernel_data: 2 << 3,
            driver_code: (3 << 3) | 1,
            driver_data: (4 << 3) | 1,
            service_code: (5 << 3) | 2,
            service_data: (6 << 3) | 2,
            user_code: (7 << 3) | 3,
            user_data: (8 << 3) | 3,
            tss: 9 << 3,
        };
        assert_eq!(sel.driver_code & 0b11, Ring::Driver as u16);
        assert_eq!(sel.user_code & 0b11, Ring::User as u16);
    }
}
