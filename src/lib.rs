//! Core kernel subsystems of a 32-bit, single-CPU, protected-mode operating system.
//!
//! This crate implements physical/virtual memory management, a preemptive
//! priority scheduler with blocking synchronization primitives, interrupt
//! and APIC delivery, a ring-1 driver isolation domain, a process/ELF
//! loader with fork/exec/wait and POSIX-like signals, and a virtual
//! filesystem with pipe/shared-memory/message-queue IPC. Device drivers,
//! the network stack, and the shell are external collaborators and are
//! out of scope here.

#![no_std]
#![cfg_attr(not(test), no_main)]
#![feature(custom_test_frameworks)]
#![test_runner(crate::test_runner)]
#![reexport_test_harness_main = "test_main"]

extern crate alloc;

use core::panic::PanicInfo;

pub mod apic;
pub mod error;
pub mod fs;
pub mod gdt;
pub mod idt;
pub mod ipc;
pub mod isolation;
pub mod klog;
pub mod mm;
pub mod process;
pub mod sched;
pub mod serial;
pub mod symbols;
pub mod sync;
pub mod vga_buffer;

pub use error::KernelError;

const QEMU_EXIT_PORT: u16 = 0xf4;

/// Test entry point used when the crate is built as a lib for `cargo test`.
#[cfg(test)]
#[unsafe(no_mangle)]
pub extern "C" fn _start() -> ! {
    test_main();

    #[expect(
        clippy::empty_loop,
        reason = "Infinite loop after the test main function is done."
    )]
    loop {}
}

/// Exit codes recognized by the QEMU `isa-debug-exit` device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum QemuExitCode {
    /// Successful exit status.
    Success = 0x10,
    /// Failure exit status.
    Failure = 0x11,
}

/// Exit QEMU with a specific exit code by writing to the debug-exit I/O port.
pub fn exit_qemu(exit_code: QemuExitCode) {
    // SAFETY: the debug-exit port is only present under the QEMU test harness
    // configured in `package.metadata.bootimage`.
    unsafe {
        use x86::io::outl;
        outl(QEMU_EXIT_PORT, exit_code as u32);
    }
}

/// Panic handler shared by the host-run `#[cfg(test)]` harness.
pub fn test_panic_handler(info: &PanicInfo) -> ! {
    serial_println!("[failed]\n");
    serial_println!("Error: {}\n", info);
    exit_qemu(QemuExitCode::Failure);

    #[expect(
        clippy::empty_loop,
        reason = "Endless loop if a test panics. Unreachable since exit_qemu halts QEMU first."
    )]
    loop {}
}

/// Custom test runner for `no_std` testing.
pub fn test_runner(tests: &[&dyn Testable]) {
    println!("Running {} tests", tests.len());
    for test in tests {
        test.run();
    }

    exit_qemu(QemuExitCode::Success);
}

#[cfg(test)]
#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    test_panic_handler(info);
}

/// Generalizes a test case so the runner can print its name before running it.
pub trait Testable {
    /// Runs the test case, printing its name and result to the serial console.
    fn run(&self);
}

impl<T> Testable for T
where
    T: Fn(),
{
    fn run(&self) {
        use core::any::type_name;

        serial_print!("{}...\t", type_name::<T>());
        self();
        serial_println!("[ok]");
    }
}

#[cfg(target_arch = "x86")]
pub(crate) fn interrupts_enabled() -> bool {
    // SAFETY: reads EFLAGS via push/pop, no side effects beyond the stack.
    unsafe { x86::bits32::eflags::read().contains(x86::bits32::eflags::EFlags::FLAGS_IF) }
}

#[cfg(not(target_arch = "x86"))]
pub(crate) fn interrupts_enabled() -> bool {
    x86::bits64::rflags::read().contains(x86::bits64::rflags::RFlags::FLAGS_IF)
}

/// Disables interrupts for the duration of `f`, restoring the prior flag
/// state on return. Used to protect structures touched by both task
/// context and interrupt context.
pub fn without_interrupts<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    let were_enabled = interrupts_enabled();
    // SAFETY: `cli`/`sti` toggle the global interrupt flag; restoring the
    // prior state keeps nesting safe as long as callers do not migrate
    // tasks while holding this guard.
    unsafe { x86::irq::disable() };
    let result = f();
    if were_enabled {
        unsafe { x86::irq::enable() };
    }
    result
}
