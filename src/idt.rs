//! Interrupt Descriptor Table and low-level dispatch.
//!
//! 256 gate descriptors: exceptions (0–31) and IRQs (32–47) as ring-0
//! interrupt gates, the syscall vector (0x80) as a ring-3-accessible gate,
//! and the driver-service (0x81) / driver-return (0x82) vectors as
//! ring-1/2-accessible gates. Ground: `original_source/include/arch/x86/idt.h`
//! (`registers_t` full-frame snapshot, `isr_handler`/`irq_handler` dispatch
//! tables) and teacher `src/interrupts.rs` (PIC end-of-interrupt plumbing).

use crate::gdt;
use lazy_static::lazy_static;
use spin::Mutex;

/// First vector the legacy master PIC is remapped to.
pub const PIC_1_OFFSET: u8 = 32;
/// First vector the legacy slave PIC is remapped to.
pub const PIC_2_OFFSET: u8 = 40;
/// Software interrupt vector for the user-mode syscall ABI (§6).
pub const SYSCALL_VECTOR: u8 = 0x80;
/// Software interrupt vector for the ring-1 kernel-service trap (§4.5).
pub const DRIVER_SERVICE_VECTOR: u8 = 0x81;
/// Software interrupt vector a driver issues to return to the kernel.
pub const DRIVER_RETURN_VECTOR: u8 = 0x82;

static PICS: Mutex<pic8259::ChainedPics> =
    Mutex::new(unsafe { pic8259::ChainedPics::new(PIC_1_OFFSET, PIC_2_OFFSET) });

/// Full register snapshot saved by the common ISR/IRQ stub before Rust
/// dispatch, mirroring `registers_t` in `original_source/include/arch/x86/idt.h`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct Registers {
    pub edi: u32,
    pub esi: u32,
    pub ebp: u32,
    pub esp_dummy: u32,
    pub ebx: u32,
    pub edx: u32,
    pub ecx: u32,
    pub eax: u32,
    pub int_no: u32,
    pub err_code: u32,
    pub eip: u32,
    pub cs: u32,
    pub eflags: u32,
    pub user_esp: u32,
    pub user_ss: u32,
}

/// A registered handler for one interrupt vector.
pub type Handler = fn(&Registers);

const NUM_VECTORS: usize = 256;

struct HandlerTable {
    handlers: [Option<Handler>; NUM_VECTORS],
}

impl HandlerTable {
    const fn new() -> Self {
        Self {
            handlers: [None; NUM_VECTORS],
        }
    }
}

static HANDLERS: Mutex<HandlerTable> = Mutex::new(HandlerTable::new());

/// Registers `handler` to run when `vector` fires. Overwrites any previous
/// registration for that vector.
pub fn register_handler(vector: u8, handler: Handler) {
    HANDLERS.lock().handlers[vector as usize] = Some(handler);
}

/// Removes any handler registered for `vector`.
pub fn unregister_handler(vector: u8) {
    HANDLERS.lock().handlers[vector as usize] = None;
}

/// Called by the common stub after saving `Registers`. Dispatches to the
/// registered handler, if any, then issues end-of-interrupt for the PIC/IRQ
/// range. Exceptions with no registered handler panic; unregistered IRQs
/// are acknowledged and dropped.
pub extern "C" fn dispatch(regs: &Registers) {
    let vector = regs.int_no as u8;
    let handler = HANDLERS.lock().handlers[vector as usize];
    match handler {
        Some(h) => h(regs),
        None if vector < PIC_1_OFFSET => {
            panic!("unhandled exception vector {vector} at eip={:#x}", { regs.eip });
        }
        None => {}
    }
    if (PIC_1_OFFSET..=PIC_2_OFFSET + 7).contains(&vector) {
        // SAFETY: vector is a real IRQ in the remapped PIC range.
        unsafe { PICS.lock().notify_end_of_interrupt(vector) };
    }
}

bitflags::bitflags! {
    struct GateFlags: u8 {
        const PRESENT = 0b1000_0000;
        const RING0 = 0b0000_0000;
        const RING1 = 0b0010_0000;
        const RING2 = 0b0100_0000;
        const RING3 = 0b0110_0000;
        const INTERRUPT_GATE_32 = 0b0000_1110;
    }
}

#[repr(C, packed)]
#[derive(Clone, Copy)]
struct IdtEntry {
    offset_low: u16,
    selector: u16,
    zero: u8,
    type_attr: u8,
    offset_high: u16,
}

impl IdtEntry {
    const fn missing() -> Self {
        Self { offset_low: 0, selector: 0, zero: 0, type_attr: 0, offset_high: 0 }
    }

    fn new(handler: u32, selector: u16, flags: GateFlags) -> Self {
        Self {
            offset_low: (handler & 0xFFFF) as u16,
            selector,
            zero: 0,
            type_attr: flags.bits(),
            offset_high: ((handler >> 16) & 0xFFFF) as u16,
        }
    }
}

#[repr(C, packed)]
struct IdtPointer {
    limit: u16,
    base: u32,
}

struct Idt {
    entries: [IdtEntry; NUM_VECTORS],
}

lazy_static! {
    static ref IDT: Mutex<Idt> = Mutex::new(Idt { entries: [IdtEntry::missing(); NUM_VECTORS] });
}

/// Generates the common ISR/IRQ entry trampoline for one vector: pushes
/// the vector number, saves the full register snapshot (`pusha`), calls
/// `dispatch` with a pointer to it, restores, and `iret`s. Ground:
/// `original_source`'s `isr_handler`/`irq_handler` common-stub shape.
macro_rules! stub_without_err {
    ($name:ident, $vector:expr) => {
        #[cfg(target_arch = "x86")]
        #[naked]
        extern "C" fn $name() {
            // SAFETY: naked entry trampoline; builds a `Registers` frame on
            // the stack exactly as the struct layout expects, then calls
            // `dispatch`.
            unsafe {
                core::arch::naked_asm!(
                    "push 0", // dummy error code: this vector has none
                    "push {vec}",
                    "pusha",
                    "push esp",
                    "call {dispatch}",
                    "add esp, 4",
                    "popa",
                    "add esp, 8",
                    "iretd",
                    vec = const $vector,
                    dispatch = sym dispatch,
                );
            }
        }

        /// Only referenced by `idt::init`'s gate table on this host
        /// self-check target; never actually entered since no real
        /// interrupt reaches it outside the real 32-bit target.
        #[cfg(not(target_arch = "x86"))]
        extern "C" fn $name() {}
    };
}

/// Same as `stub_without_err`, for the seven vectors where the CPU itself
/// pushes an error code (8, 10–14, 17) before entering the handler.
macro_rules! stub_with_err {
    ($name:ident, $vector:expr) => {
        #[cfg(target_arch = "x86")]
        #[naked]
        extern "C" fn $name() {
            // SAFETY: the CPU already pushed an error code for this
            // vector; only the vector number needs pushing before pusha.
            unsafe {
                core::arch::naked_asm!(
                    "push {vec}",
                    "pusha",
                    "push esp",
                    "call {dispatch}",
                    "add esp, 4",
                    "popa",
                    "add esp, 8",
                    "iretd",
                    vec = const $vector,
                    dispatch = sym dispatch,
                );
            }
        }

        #[cfg(not(target_arch = "x86"))]
        extern "C" fn $name() {}
    };
}

stub_without_err!(isr0, 0);
stub_without_err!(isr1, 1);
stub_without_err!(isr2, 2);
stub_without_err!(isr3, 3);
stub_without_err!(isr4, 4);
stub_without_err!(isr5, 5);
stub_without_err!(isr6, 6);
stub_without_err!(isr7, 7);
stub_with_err!(isr8, 8);
stub_without_err!(isr9, 9);
stub_with_err!(isr10, 10);
stub_with_err!(isr11, 11);
stub_with_err!(isr12, 12);
stub_with_err!(isr13, 13);
stub_with_err!(isr14, 14);
stub_without_err!(isr16, 16);
stub_with_err!(isr17, 17);
stub_without_err!(isr18, 18);
stub_without_err!(isr19, 19);

macro_rules! irq_stub {
    ($name:ident, $irq:expr, $vector:expr) => {
        stub_without_err!($name, $vector);
    };
}

irq_stub!(irq0, 0, 32);
irq_stub!(irq1, 1, 33);
irq_stub!(irq2, 2, 34);
irq_stub!(irq3, 3, 35);
irq_stub!(irq4, 4, 36);
irq_stub!(irq5, 5, 37);
irq_stub!(irq6, 6, 38);
irq_stub!(irq7, 7, 39);
irq_stub!(irq8, 8, 40);
irq_stub!(irq9, 9, 41);
irq_stub!(irq10, 10, 42);
irq_stub!(irq11, 11, 43);
irq_stub!(irq12, 12, 44);
irq_stub!(irq13, 13, 45);
irq_stub!(irq14, 14, 46);
irq_stub!(irq15, 15, 47);

stub_without_err!(syscall_stub, 0x80);
stub_without_err!(driver_service_stub, 0x81);
stub_without_err!(driver_return_stub, 0x82);

fn set_gate(idt: &mut Idt, vector: u8, handler: extern "C" fn(), selector: u16, flags: GateFlags) {
    idt.entries[vector as usize] = IdtEntry::new(handler as u32, selector, flags | GateFlags::PRESENT);
}

/// Builds all 256 gate descriptors, remaps the legacy PIC, loads the IDT,
/// and (if requested) disables the legacy PIC in favor of the APIC.
///
/// # Safety
/// Must run once during boot after `gdt::init`.
pub unsafe fn init() {
    let sel = gdt::selectors();
    let mut idt = IDT.lock();

    macro_rules! exc {
        ($v:expr, $f:expr) => {
            set_gate(&mut idt, $v, $f, sel.kernel_code, GateFlags::RING0 | GateFlags::INTERRUPT_GATE_32)
        };
    }
    exc!(0, isr0);
    exc!(1, isr1);
    exc!(2, isr2);
    exc!(3, isr3);
    exc!(4, isr4);
    exc!(5, isr5);
    exc!(6, isr6);
    exc!(7, isr7);
    exc!(8, isr8);
    exc!(9, isr9);
    exc!(10, isr10);
    exc!(11, isr11);
    exc!(12, isr12);
    exc!(13, isr13);
    exc!(14, isr14);
    exc!(16, isr16);
    exc!(17, isr17);
    exc!(18, isr18);
    exc!(19, isr19);

    macro_rules! irq {
        ($v:expr, $f:expr) => {
            set_gate(&mut idt, $v, $f, sel.kernel_code, GateFlags::RING0 | GateFlags::INTERRUPT_GATE_32)
        };
    }
    irq!(32, irq0);
    irq!(33, irq1);
    irq!(34, irq2);
    irq!(35, irq3);
    irq!(36, irq4);
    irq!(37, irq5);
    irq!(38, irq6);
    irq!(39, irq7);
    irq!(40, irq8);
    irq!(41, irq9);
    irq!(42, irq10);
    irq!(43, irq11);
    irq!(44, irq12);
    irq!(45, irq13);
    irq!(46, irq14);
    irq!(47, irq15);

    set_gate(
        &mut idt,
        SYSCALL_VECTOR,
        syscall_stub,
        sel.kernel_code,
        GateFlags::RING3 | GateFlags::INTERRUPT_GATE_32,
    );
    set_gate(
        &mut idt,
        DRIVER_SERVICE_VECTOR,
        driver_service_stub,
        sel.kernel_code,
        GateFlags::RING2 | GateFlags::INTERRUPT_GATE_32,
    );
    set_gate(
        &mut idt,
        DRIVER_RETURN_VECTOR,
        driver_return_stub,
        sel.kernel_code,
        GateFlags::RING2 | GateFlags::INTERRUPT_GATE_32,
    );

    let pointer = IdtPointer {
        limit: (core::mem::size_of::<IdtEntry>() * NUM_VECTORS - 1) as u16,
        base: idt.entries.as_ptr() as u32,
    };
    drop(idt);

    #[cfg(target_arch = "x86")]
    core::arch::asm!("lidt [{0}]", in(reg) &pointer, options(readonly, nostack, preserves_flags));
    #[cfg(not(target_arch = "x86"))]
    let _ = &pointer;

    PICS.lock().initialize();
}

/// Masks the legacy PIC entirely, used once the Local APIC's timer and the
/// I/O APIC's redirection table are taking over IRQ delivery.
pub fn disable_legacy_pic() {
    // SAFETY: only called once APIC delivery has taken over IRQ routing.
    unsafe { PICS.lock().disable() };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_case]
    fn register_and_unregister_round_trip() {
        fn handler(_regs: &Registers) {}
        register_handler(200, handler);
        assert!(HANDLERS.lock().handlers[200].is_some());
        unregister_handler(200);
        assert!(HANDLERS.lock().handlers[200].is_none());
    }

    #[test_case]
    fn idt_entry_encodes_split_offset() {
        let entry = IdtEntry::new(0x1234_5678, 0x08, GateFlags::PRESENT | GateFlags::INTERRUPT_GATE_32);
        let (offset_low, offset_high, selector) = (entry.offset_low, entry.offset_high, entry.selector);
        assert_eq!(offset_low, 0x5678);
        assert_eq!(offset_high, 0x1234);
        assert_eq!(selector, 0x08);
    }
}
