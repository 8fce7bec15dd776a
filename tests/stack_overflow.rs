//! Test for stack overflow handling in the kernel.
//! Should trigger a double fault and be handled by the kernel.
//!
//! This kernel's 32-bit IDT has no x86_64-style IST: every gate runs on
//! the current stack, so recursion deep enough to run off the guard page
//! is expected to double-fault on vector 8 rather than switch to a
//! reserved stack. Exercises `idt::register_handler` against that vector.

#![no_std]
#![no_main]

use core::panic::PanicInfo;
use protura_core::idt::Registers;
use protura_core::{exit_qemu, gdt, idt, serial_print, serial_println, QemuExitCode};

/// This test checks that a stack overflow is delivered as a double fault.
/// # Panics
/// This test should panic if the stack overflows.
#[unsafe(no_mangle)]
pub extern "C" fn _start() -> ! {
    serial_print!("stack_overflow::stack_overflow...\t");

    // SAFETY: first and only call, at the top of this standalone test binary.
    unsafe {
        gdt::init();
        idt::init();
    }
    idt::register_handler(8, double_fault_handler);

    stack_overflow();

    panic!("Execution should not reach here");
}

#[expect(
    unconditional_recursion,
    reason = "This function is expected to cause a stack overflow."
)]
fn stack_overflow() {
    stack_overflow();
    volatile::Volatile::new(0).read();
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    protura_core::test_panic_handler(info)
}

fn double_fault_handler(_regs: &Registers) {
    serial_println!("[ok]");
    exit_qemu(QemuExitCode::Success);

    #[expect(
        clippy::empty_loop,
        reason = "Endless loop when test finish. It should not be possible as we exit_qemu before."
    )]
    loop {}
}
