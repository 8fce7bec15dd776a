//! Integration test for process creation and teardown.
//!
//! Loads a synthetic ELF32 image through the same `process::create` path
//! a real user binary would take, then exercises `exit`/`waitpid` and the
//! default-signal-disposition table that governs process teardown.

#![no_std]
#![no_main]
#![feature(custom_test_frameworks)]
#![test_runner(protura_core::test_runner)]
#![reexport_test_harness_main = "test_main"]
#![allow(missing_docs)]

extern crate alloc;

use core::panic::PanicInfo;
use protura_core::process::elf::ElfImage;
use protura_core::process::signal::{default_action, DefaultAction, Signal};
use protura_core::process::{self, INIT_PID};
use protura_core::serial_println;

#[unsafe(no_mangle)]
pub extern "C" fn _start() -> ! {
    // SAFETY: first and only call, at the top of this standalone test binary.
    unsafe { protura_core::mm::init(None) }.expect("heap initialization failed");

    test_main();
    #[expect(clippy::empty_loop)]
    loop {}
}

fn minimal_elf() -> alloc::vec::Vec<u8> {
    let mut data = alloc::vec![0u8; 52];
    data[0..4].copy_from_slice(&[0x7F, b'E', b'L', b'F']);
    data[4] = 1; // ELFCLASS32
    data[5] = 1; // ELFDATA2LSB
    data[16..18].copy_from_slice(&2u16.to_le_bytes()); // ET_EXEC
    data[18..20].copy_from_slice(&3u16.to_le_bytes()); // EM_386
    data[24..28].copy_from_slice(&0u32.to_le_bytes());
    data
}

/// Verify a loaded process can be created, exited, and reaped through
/// `waitpid` without faulting.
#[test_case]
fn test_process_create_exit_waitpid_round_trip() {
    let data = minimal_elf();
    let image = ElfImage::parse(&data).unwrap();
    let pid = process::create(INIT_PID, 10, &image).unwrap();
    process::exit(pid, 0).unwrap();
    let (reaped_pid, code) = process::waitpid(INIT_PID, Some(pid), true).unwrap();
    assert_eq!(reaped_pid, pid);
    assert_eq!(code, 0);

    serial_println!("[ok] process create/exit/waitpid round trip");
}

/// Verify `SIGKILL` and `SIGSTOP` cannot have their disposition changed,
/// matching POSIX's fixed-disposition signals.
#[test_case]
fn test_kill_and_stop_dispositions_are_fixed() {
    assert_eq!(default_action(Signal::Kill), DefaultAction::Terminate);
    assert_eq!(default_action(Signal::Stop), DefaultAction::Stop);
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    protura_core::test_panic_handler(info)
}
