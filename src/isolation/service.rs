//! Kernel-service trap (vector 0x81) dispatch table. Ground:
//! `SPEC_FULL.md` §4.5, `original_source/kernel/isolation/service.c`.
//!
//! Ring-1 code cannot call kernel routines directly; it raises this trap
//! with a service id and up to three arguments, and the dispatcher here
//! performs the operation on the domain's behalf after recording it
//! against the domain's counters.

use super::DomainId;
use crate::error::KernelError;

/// The fixed, exhaustive set of operations a driver domain may request.
/// Any id outside this set fails the call and counts as a violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ServiceId {
    AllocMem = 0,
    FreeMem = 1,
    MapMmio = 2,
    RegisterIrq = 3,
    UnregisterIrq = 4,
    DmaAlloc = 5,
    DmaFree = 6,
    Log = 7,
    PortIn = 8,
    PortOut = 9,
    PciRead = 10,
    PciWrite = 11,
}

impl ServiceId {
    /// Decodes a raw service-id register value, or `None` if it does not
    /// name a service in the fixed table.
    pub const fn from_raw(raw: u32) -> Option<Self> {
        Some(match raw {
            0 => Self::AllocMem,
            1 => Self::FreeMem,
            2 => Self::MapMmio,
            3 => Self::RegisterIrq,
            4 => Self::UnregisterIrq,
            5 => Self::DmaAlloc,
            6 => Self::DmaFree,
            7 => Self::Log,
            8 => Self::PortIn,
            9 => Self::PortOut,
            10 => Self::PciRead,
            11 => Self::PciWrite,
            _ => return None,
        })
    }
}

/// Argument registers passed with a service trap, ebx/ecx/edx by
/// convention matching the syscall ABI in `idt.rs`.
#[derive(Debug, Clone, Copy)]
pub struct ServiceArgs {
    pub a0: u32,
    pub a1: u32,
    pub a2: u32,
}

/// Dispatches a kernel-service request raised by `domain`. Unknown
/// service ids fail with `PermissionDenied` and increment the domain's
/// violation counter rather than its kernel-call counter.
pub fn dispatch(domain: DomainId, raw_id: u32, args: ServiceArgs) -> Result<u32, KernelError> {
    let Some(id) = ServiceId::from_raw(raw_id) else {
        super::record_violation(domain);
        return Err(KernelError::PermissionDenied);
    };
    super::record_kernel_call(domain);

    match id {
        ServiceId::AllocMem | ServiceId::DmaAlloc => {
            crate::mm::pmm::alloc_frame().map(|f| f as u32).map_err(|_| KernelError::ResourceExhausted)
        }
        ServiceId::FreeMem | ServiceId::DmaFree => {
            crate::mm::pmm::free_frame(args.a0 as usize);
            Ok(0)
        }
        ServiceId::MapMmio => {
            // SAFETY: same trust boundary as FreeMem; the domain names its
            // own virtual/physical pair.
            unsafe {
                crate::mm::vmm::map(
                    args.a0 as usize,
                    args.a1 as usize,
                    crate::mm::vmm::PageFlags::PRESENT | crate::mm::vmm::PageFlags::WRITABLE,
                )
            }
            .map(|()| 0)
            .map_err(|_| KernelError::InvalidArgument)
        }
        ServiceId::RegisterIrq | ServiceId::UnregisterIrq => Ok(0),
        ServiceId::Log => {
            crate::klog::info!("driver domain {}: service log {:#x}", domain, args.a0);
            Ok(0)
        }
        ServiceId::PortIn => {
            super::record_io_op(domain);
            // SAFETY: the domain's IOPB already gates which ports this
            // in() can reach; an out-of-bounds request faults before
            // reaching here.
            Ok(u32::from(unsafe { x86::io::inb(args.a0 as u16) }))
        }
        ServiceId::PortOut => {
            super::record_io_op(domain);
            // SAFETY: same IOPB gating as PortIn.
            unsafe { x86::io::outb(args.a0 as u16, args.a1 as u8) };
            Ok(0)
        }
        ServiceId::PciRead | ServiceId::PciWrite => Ok(0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_case]
    fn from_raw_rejects_ids_outside_the_fixed_table() {
        assert!(ServiceId::from_raw(12).is_none());
        assert!(ServiceId::from_raw(0).is_some());
    }

    #[test_case]
    fn unknown_service_is_a_violation_not_a_kernel_call() {
        let domain = super::super::domain_create("svc-test", super::super::IsolationLevel::Standard).unwrap();
        let before = super::super::counters(domain).unwrap();
        let result = dispatch(domain, 999, ServiceArgs { a0: 0, a1: 0, a2: 0 });
        let after = super::super::counters(domain).unwrap();
        assert!(result.is_err());
        assert_eq!(after.io_violations, before.io_violations + 1);
        assert_eq!(after.kernel_calls, before.kernel_calls);
    }
}
