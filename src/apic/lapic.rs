//! Local APIC: spurious-vector enable and PIT-calibrated periodic timer.
//! Ground: `original_source/kernel/apic/lapic.c`.

use crate::mm::vmm::{self, PageFlags};
use core::sync::atomic::{AtomicU64, Ordering};
use volatile::Volatile;

const REG_ID: usize = 0x020;
const REG_SPURIOUS: usize = 0x0F0;
const REG_EOI: usize = 0x0B0;
const REG_TPR: usize = 0x080;
const REG_ESR: usize = 0x280;
const REG_LVT_TIMER: usize = 0x320;
const REG_TIMER_INIT_COUNT: usize = 0x380;
const REG_TIMER_CUR_COUNT: usize = 0x390;
const REG_TIMER_DIVIDE: usize = 0x3E0;

const SPURIOUS_VECTOR: u32 = 0x1FF;
const LVT_TIMER_PERIODIC: u32 = 0x2_0000;
/// Vector the periodic timer interrupt is delivered on (first legacy IRQ
/// slot, matching `original_source`'s choice to reuse the PIT/IRQ0 vector).
const TIMER_VECTOR: u32 = 32;

const PIT_CHANNEL0: u16 = 0x40;
const PIT_COMMAND: u16 = 0x43;
const PIT_FREQUENCY_HZ: u32 = 1_193_182;

static UPTIME_MS: AtomicU64 = AtomicU64::new(0);

/// # Safety
/// The LAPIC MMIO page must already be mapped at `LAPIC_BASE_VIRT`.
unsafe fn reg<'a>(offset: usize) -> &'a mut Volatile<u32> {
    &mut *((super::LAPIC_BASE_VIRT + offset) as *mut Volatile<u32>)
}

/// Computes calibrated timer ticks-per-second from a one-shot PIT
/// calibration window, mirroring `lapic_timer_init`'s `elapsed * 100`
/// (the PIT one-shot window is 10 ms, `1000/10 = 100`).
pub const fn ticks_per_second(elapsed_counts: u32) -> u32 {
    elapsed_counts * 100
}

/// Maps the Local APIC's MMIO page, clears the task-priority register and
/// error-status register, and enables it via the spurious-interrupt vector.
///
/// # Safety
/// The VMM must already be initialized; `phys_base` must be the real LAPIC
/// MMIO physical base.
pub unsafe fn init(phys_base: usize) {
    vmm::map(
        super::LAPIC_BASE_VIRT,
        phys_base,
        PageFlags::PRESENT | PageFlags::WRITABLE,
    )
    .expect("LAPIC MMIO page must map");

    reg(REG_TPR).write(0);
    reg(REG_ESR).write(0);
    reg(REG_SPURIOUS).write(SPURIOUS_VECTOR | 0x100);
    reg(REG_EOI).write(0);
}

/// Calibrates the timer against a 10 ms PIT one-shot window, then
/// configures it periodic at `frequency_hz`.
///
/// # Safety
/// `init` must have run first.
pub unsafe fn init_timer(frequency_hz: u32) {
    use x86::io::{inb, outb};

    // Program PIT channel 0, mode 0 (interrupt on terminal count), one-shot.
    let reload = (PIT_FREQUENCY_HZ / 100) as u16; // 10 ms window
    outb(PIT_COMMAND, 0b0011_0000);
    outb(PIT_CHANNEL0, (reload & 0xFF) as u8);
    outb(PIT_CHANNEL0, (reload >> 8) as u8);

    reg(REG_TIMER_DIVIDE).write(0b1011); // divide by 1
    reg(REG_TIMER_INIT_COUNT).write(0xFFFF_FFFF);

    // Busy-wait for the PIT one-shot to reach terminal count (readback).
    loop {
        outb(PIT_COMMAND, 0b1110_0010); // latch command, channel 0
        let status = inb(PIT_CHANNEL0);
        if status & 0x80 != 0 {
            break;
        }
    }

    let elapsed = 0xFFFF_FFFFu32 - reg(REG_TIMER_CUR_COUNT).read();
    let calibrated_hz = ticks_per_second(elapsed);
    let divisor = (calibrated_hz / frequency_hz.max(1)).max(1);

    reg(REG_LVT_TIMER).write(LVT_TIMER_PERIODIC | TIMER_VECTOR);
    reg(REG_TIMER_INIT_COUNT).write(divisor);
}

/// Signals end-of-interrupt to the Local APIC.
///
/// # Safety
/// Must be called from the timer/IRQ handler that owns this EOI cycle.
pub unsafe fn eoi() {
    reg(REG_EOI).write(0);
}

/// Advances the millisecond uptime counter; called once per timer tick.
pub fn tick(ms_per_tick: u64) {
    UPTIME_MS.fetch_add(ms_per_tick, Ordering::Relaxed);
}

/// Milliseconds since the timer was configured.
pub fn uptime_ms() -> u64 {
    UPTIME_MS.load(Ordering::Relaxed)
}

/// Seconds since the timer was configured.
pub fn uptime_sec() -> u64 {
    uptime_ms() / 1000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_case]
    fn calibration_scales_a_ten_millisecond_window_to_hertz() {
        // A PIT running at ~1.193 MHz ticks ~11932 counts in a 10ms window.
        assert_eq!(ticks_per_second(11_932), 1_193_200);
    }

    #[test_case]
    fn uptime_accumulates_across_ticks() {
        let before = uptime_ms();
        tick(10);
        tick(10);
        assert_eq!(uptime_ms(), before + 20);
    }
}
