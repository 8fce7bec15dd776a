//! Driver isolation domains: ring-1 execution with a per-domain I/O
//! permission bitmap and a kernel-service trap. Ground: `SPEC_FULL.md`
//! §4.5, `original_source/kernel/isolation/domain.c`.

pub mod service;

use crate::error::{KernelError, KernelResult};
use crate::sync::spinlock::Spinlock;

/// Size of a domain's I/O permission bitmap, in bytes (one bit per port
/// across the full 16-bit port space, plus the trailing all-ones byte the
/// CPU's IOPB format requires).
pub const IOPB_SIZE: usize = 8192;
/// Maximum number of concurrently registered driver domains.
pub const MAX_DOMAINS: usize = 16;
/// Size of each domain's dedicated ring-1 stack.
pub const DOMAIN_STACK_SIZE: usize = 4096 * 2;

/// Isolation strength a domain runs at; reserved for future differentiation
/// between e.g. "no DMA" and "DMA allowed" domains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    Standard,
    TrustedDma,
}

/// Observability counters for a driver domain.
#[derive(Debug, Default, Clone, Copy)]
pub struct DomainCounters {
    pub kernel_calls: u64,
    pub io_violations: u64,
    pub total_io_ops: u64,
}

struct Domain {
    name: [u8; 32],
    name_len: usize,
    level: IsolationLevel,
    active: bool,
    iopb: alloc::boxed::Box<[u8; IOPB_SIZE]>,
    stack: alloc::boxed::Box<[u8; DOMAIN_STACK_SIZE]>,
    counters: DomainCounters,
}

pub type DomainId = usize;

struct Table {
    domains: [Option<Domain>; MAX_DOMAINS],
}

impl Table {
    const fn new() -> Self {
        const NONE: Option<Domain> = None;
        Self { domains: [NONE; MAX_DOMAINS] }
    }
}

static DOMAINS: Spinlock<Table> = Spinlock::new(Table::new());

/// Creates a new driver domain named `name`, with an all-deny IOPB and a
/// dedicated ring-1 stack, and registers it. Returns its id.
pub fn domain_create(name: &str, level: IsolationLevel) -> KernelResult<DomainId> {
    let mut table = DOMAINS.lock();
    let slot = table
        .domains
        .iter()
        .position(Option::is_none)
        .ok_or(KernelError::ResourceExhausted)?;

    let mut name_buf = [0u8; 32];
    let name_len = name.len().min(32);
    name_buf[..name_len].copy_from_slice(&name.as_bytes()[..name_len]);

    table.domains[slot] = Some(Domain {
        name: name_buf,
        name_len,
        level,
        active: false,
        iopb: alloc::boxed::Box::new([0xFF; IOPB_SIZE]),
        stack: alloc::boxed::Box::new([0; DOMAIN_STACK_SIZE]),
        counters: DomainCounters::default(),
    });
    Ok(slot)
}

/// Allows `n` consecutive ports starting at `port` for `domain`.
pub fn allow(domain: DomainId, port: u16, n: u16) -> KernelResult<()> {
    set_ports(domain, port, n, false)
}

/// Denies `n` consecutive ports starting at `port` for `domain`.
pub fn deny(domain: DomainId, port: u16, n: u16) -> KernelResult<()> {
    set_ports(domain, port, n, true)
}

fn set_ports(domain: DomainId, port: u16, n: u16, denied: bool) -> KernelResult<()> {
    let end = u32::from(port) + u32::from(n);
    if end > u32::from(u16::MAX) + 1 {
        return Err(KernelError::InvalidArgument);
    }
    let mut table = DOMAINS.lock();
    let dom = table
        .domains
        .get_mut(domain)
        .and_then(Option::as_mut)
        .ok_or(KernelError::NotFound)?;
    for p in port..port.wrapping_add(n).max(port) {
        if u32::from(p) >= end {
            break;
        }
        let byte = (p / 8) as usize;
        let bit = p % 8;
        if denied {
            dom.iopb[byte] |= 1 << bit;
        } else {
            dom.iopb[byte] &= !(1 << bit);
        }
    }
    Ok(())
}

/// Copies `domain`'s IOPB into the current TSS and marks it active.
pub fn activate(domain: DomainId) -> KernelResult<()> {
    let mut table = DOMAINS.lock();
    let dom = table
        .domains
        .get_mut(domain)
        .and_then(Option::as_mut)
        .ok_or(KernelError::NotFound)?;
    crate::gdt::install_iopb(&dom.iopb);
    dom.active = true;
    Ok(())
}

/// Installs an all-deny IOPB and marks `domain` inactive.
pub fn deactivate(domain: DomainId) -> KernelResult<()> {
    let mut table = DOMAINS.lock();
    let dom = table
        .domains
        .get_mut(domain)
        .and_then(Option::as_mut)
        .ok_or(KernelError::NotFound)?;
    crate::gdt::deny_all_iopb();
    dom.active = false;
    Ok(())
}

/// Runs `f` with `domain`'s registered name and isolation level.
pub fn with_info<R>(domain: DomainId, f: impl FnOnce(&str, IsolationLevel) -> R) -> KernelResult<R> {
    let table = DOMAINS.lock();
    let dom = table.domains.get(domain).and_then(Option::as_ref).ok_or(KernelError::NotFound)?;
    let name = core::str::from_utf8(&dom.name[..dom.name_len]).unwrap_or("");
    Ok(f(name, dom.level))
}

/// Snapshot of `domain`'s observability counters.
pub fn counters(domain: DomainId) -> KernelResult<DomainCounters> {
    let table = DOMAINS.lock();
    table
        .domains
        .get(domain)
        .and_then(Option::as_ref)
        .map(|d| d.counters)
        .ok_or(KernelError::NotFound)
}

/// Top of `domain`'s dedicated ring-1 stack, for building the inter-
/// privilege return frame in `exec`.
pub fn stack_top(domain: DomainId) -> KernelResult<usize> {
    let table = DOMAINS.lock();
    let dom = table.domains.get(domain).and_then(Option::as_ref).ok_or(KernelError::NotFound)?;
    Ok(dom.stack.as_ptr() as usize + DOMAIN_STACK_SIZE)
}

/// Records a kernel-service call against `domain`'s counters.
pub fn record_kernel_call(domain: DomainId) {
    if let Some(dom) = DOMAINS.lock().domains.get_mut(domain).and_then(Option::as_mut) {
        dom.counters.kernel_calls += 1;
    }
}

/// Records an I/O-permission violation (general-protection fault from a
/// denied port) against `domain`'s counters.
pub fn record_violation(domain: DomainId) {
    if let Some(dom) = DOMAINS.lock().domains.get_mut(domain).and_then(Option::as_mut) {
        dom.counters.io_violations += 1;
    }
}

/// Records one completed PORT_IN/PORT_OUT kernel service against
/// `domain`'s counters.
pub fn record_io_op(domain: DomainId) {
    if let Some(dom) = DOMAINS.lock().domains.get_mut(domain).and_then(Option::as_mut) {
        dom.counters.total_io_ops += 1;
    }
}

/// Builds and installs the ring-1 return frame for `domain`, transferring
/// control to `entry` at `Ring::Driver` privilege. On return (via the
/// driver-return trap, vector 0x82) the caller regains control with
/// `entry`'s return value.
///
/// # Safety
/// `domain` must be activated; `entry` must be a valid ring-1-callable
/// function pointer within mapped, executable memory.
#[cfg(target_arch = "x86")]
pub unsafe fn exec(domain: DomainId, entry: extern "C" fn(usize) -> i32, arg: usize) -> KernelResult<i32> {
    let selectors = crate::gdt::selectors();
    let stack_top = stack_top(domain)?;
    let mut result: i32 = 0;
    core::arch::asm!(
        "push {ss:e}",
        "push {esp:e}",
        "pushfd",
        "push {cs:e}",
        "push {entry:e}",
        "push {arg:e}",
        "iretd",
        ss = in(reg) u32::from(selectors.driver_data),
        esp = in(reg) stack_top as u32,
        cs = in(reg) u32::from(selectors.driver_code),
        entry = in(reg) entry as u32,
        arg = in(reg) arg as u32,
    );
    Ok(result)
}

/// Host fallback: calls `entry` directly, since there is no ring
/// transition to perform outside real x86 protected mode.
#[cfg(not(target_arch = "x86"))]
pub unsafe fn exec(_domain: DomainId, entry: extern "C" fn(usize) -> i32, arg: usize) -> KernelResult<i32> {
    Ok(entry(arg))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_case]
    fn fresh_domain_denies_every_port() {
        let id = domain_create("test0", IsolationLevel::Standard).unwrap();
        let table = DOMAINS.lock();
        let dom = table.domains[id].as_ref().unwrap();
        assert_eq!(dom.iopb[0], 0xFF);
    }

    #[test_case]
    fn allow_clears_exactly_the_requested_bits() {
        let id = domain_create("test1", IsolationLevel::Standard).unwrap();
        allow(id, 0x3F8, 8).unwrap();
        let table = DOMAINS.lock();
        let dom = table.domains[id].as_ref().unwrap();
        for p in 0x3F8u16..0x3F8 + 8 {
            let byte = (p / 8) as usize;
            let bit = p % 8;
            assert_eq!(dom.iopb[byte] & (1 << bit), 0);
        }
    }

    #[test_case]
    fn out_of_range_port_span_is_rejected() {
        let id = domain_create("test2", IsolationLevel::Standard).unwrap();
        assert!(allow(id, 0xFFF0, 100).is_err());
    }
}
