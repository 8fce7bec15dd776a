//! Kernel entry point: brings up every subsystem in the dependency order
//! `SPEC_FULL.md` §2 lays out (GDT/TSS → IDT → PMM/VMM/heap → APIC → VFS),
//! then starts the scheduler on an idle task.

#![feature(custom_test_frameworks)]
#![test_runner(protura_core::test_runner)]
#![reexport_test_harness_main = "test_main"]
#![no_std]
#![no_main]

use core::panic::PanicInfo;
use protura_core::{apic, fs, gdt, idt, klog, mm};

/// Kernel entry point. Invoked by the bootloader's trampoline with paging
/// already enabled and a flat GDT/IDT still in place.
#[unsafe(no_mangle)]
pub extern "C" fn _start() -> ! {
    // SAFETY: runs once, in order, before any other subsystem touches
    // segmentation, interrupts, memory, or the APIC.
    unsafe {
        gdt::init();
        idt::init();
        mm::init(None).expect("heap initialization failed");
        apic::init(None, None, 100);
    }
    fs::init();

    klog::info!("boot complete");

    #[cfg(test)]
    test_main();

    #[expect(clippy::empty_loop, reason = "Idle loop once boot completes; the scheduler preempts it via the timer interrupt.")]
    loop {
        // SAFETY: halting is safe once the IDT and PIC/APIC are live.
        unsafe { core::arch::asm!("hlt", options(nomem, nostack)) };
    }
}

#[cfg(not(test))]
#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    klog::error!("{info}");

    #[expect(clippy::empty_loop, reason = "Nothing left to do once the kernel has panicked.")]
    loop {}
}

#[cfg(test)]
#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    protura_core::test_panic_handler(info)
}
