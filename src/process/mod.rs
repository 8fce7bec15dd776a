//! Process table, PID allocation, fork/exec/wait, copy-on-write and
//! demand-paging fault handlers, and stack growth. Ground: `SPEC_FULL.md`
//! §4.6/§4.6a, `original_source/kernel/process/process.c`.

extern crate alloc;

pub mod elf;
pub mod signal;

use crate::error::{KernelError, KernelResult};
use crate::mm::vmm::PageFlags;
use crate::mm::{frames, pmm, vmm};
use crate::sched::task::{TaskId, TaskState};
use crate::sync::spinlock::Spinlock;
use signal::SignalState;

/// Fixed process table capacity (`SPEC_FULL.md` §4.6a).
pub const MAX_PROCESSES: usize = 64;
/// PID reserved for the kernel's init task; the reparenting target for
/// orphaned children.
pub const INIT_PID: Pid = 1;

pub type Pid = u32;

/// A lazily-backed virtual memory area, used for demand-paging and for
/// locating the growable user stack region.
#[derive(Debug, Clone, Copy)]
pub struct Vma {
    pub start: usize,
    pub end: usize,
    pub flags: PageFlags,
    pub file_backed: bool,
    /// Lowest address this VMA's stack is permitted to grow down to;
    /// meaningless for non-stack VMAs.
    pub grows_down_limit: usize,
}

struct Process {
    pid: Pid,
    ppid: Pid,
    pgid: Pid,
    state: TaskState,
    task: Option<TaskId>,
    page_directory: usize,
    exit_code: i32,
    signals: SignalState,
    vmas: alloc::vec::Vec<Vma>,
    entry: usize,
}

impl Process {
    const fn unused(pid: Pid) -> Self {
        Self {
            pid,
            ppid: 0,
            pgid: 0,
            state: TaskState::Unused,
            task: None,
            page_directory: 0,
            exit_code: 0,
            signals: SignalState::new(),
            vmas: alloc::vec::Vec::new(),
            entry: 0,
        }
    }
}

struct Table {
    processes: [Option<Process>; MAX_PROCESSES],
    wait_children: crate::sync::waitqueue::WaitQueue,
}

impl Table {
    const fn new() -> Self {
        const NONE: Option<Process> = None;
        Self {
            processes: [NONE; MAX_PROCESSES],
            wait_children: crate::sync::waitqueue::WaitQueue::new(),
        }
    }
}

static TABLE: Spinlock<Table> = Spinlock::new(Table::new());

fn find_by_pid(table: &Table, pid: Pid) -> Option<usize> {
    table.processes.iter().position(|p| p.as_ref().is_some_and(|p| p.pid == pid))
}

/// Creates a fresh process for `entry`'s ELF image, mapping its
/// `PT_LOAD` segments into a new address space. Returns the new pid.
pub fn create(ppid: Pid, priority: u8, image: &elf::ElfImage) -> KernelResult<Pid> {
    let mut table = TABLE.lock();
    let slot = table
        .processes
        .iter()
        .position(Option::is_none)
        .ok_or(KernelError::ResourceExhausted)?;
    let pid = (slot as Pid) + 1;

    let page_directory = pmm::alloc_frame()?;
    let mut vmas = alloc::vec::Vec::new();
    for segment in image.load_segments()? {
        let mut flags = PageFlags::PRESENT | PageFlags::USER;
        if segment.writable {
            flags |= PageFlags::WRITABLE;
        }
        let page_start = segment.vaddr as usize & !0xFFF;
        let page_end = (segment.vaddr as usize + segment.mem_size as usize + 0xFFF) & !0xFFF;
        for page in (page_start..page_end).step_by(pmm::FRAME_SIZE) {
            let frame = pmm::alloc_frame()?;
            // SAFETY: page is a freshly chosen virtual address in the new
            // process's own address space, not yet mapped by anything else.
            unsafe { vmm::map(page, frame, flags)? };
        }
        let bytes = image.segment_file_bytes(&segment)?;
        // SAFETY: the pages backing [vaddr, vaddr+mem_size) were just
        // mapped writable above.
        unsafe {
            let dst = segment.vaddr as usize as *mut u8;
            core::ptr::copy_nonoverlapping(bytes.as_ptr(), dst, bytes.len());
            core::ptr::write_bytes(
                dst.add(bytes.len()),
                0,
                segment.mem_size as usize - segment.file_size as usize,
            );
        }
        vmas.push(Vma {
            start: page_start,
            end: page_end,
            flags,
            file_backed: false,
            grows_down_limit: 0,
        });
    }

    table.processes[slot] = Some(Process {
        pid,
        ppid,
        pgid: ppid,
        state: TaskState::Ready,
        task: crate::sched::spawn(priority, 0, page_directory),
        page_directory,
        exit_code: 0,
        signals: SignalState::new(),
        vmas,
        entry: image.entry as usize,
    });
    Ok(pid)
}

/// Duplicates `pid`'s address space into a new child process, marking
/// every writable user page copy-on-write in both parent and child.
/// Ground: `SPEC_FULL.md` §4.6 "Fork".
pub fn fork(pid: Pid) -> KernelResult<Pid> {
    let mut table = TABLE.lock();
    let parent_idx = find_by_pid(&table, pid).ok_or(KernelError::NotFound)?;
    let child_slot = table
        .processes
        .iter()
        .position(Option::is_none)
        .ok_or(KernelError::ResourceExhausted)?;
    let child_pid = (child_slot as Pid) + 1;

    let child_pd = pmm::alloc_frame()?;
    let (parent_ppid, parent_pgid, parent_vmas, parent_entry) = {
        let parent = table.processes[parent_idx].as_ref().expect("checked above");
        (parent.ppid, parent.pgid, parent.vmas.clone(), parent.entry)
    };

    for vma in &parent_vmas {
        if !vma.flags.contains(PageFlags::WRITABLE) {
            continue;
        }
        for page in (vma.start..vma.end).step_by(pmm::FRAME_SIZE) {
            // SAFETY: page is within a VMA already mapped in the parent's
            // live address space.
            if let Some(phys) = unsafe { vmm::translate(page) } {
                let frame = phys & !0xFFF;
                frames::share(frame);
                let cow_flags = (vma.flags & !PageFlags::WRITABLE) | PageFlags::COW;
                // SAFETY: re-mapping the same frame with WRITABLE cleared
                // and COW set only narrows access for both address spaces.
                unsafe {
                    vmm::map(page, frame, cow_flags)?;
                }
            }
        }
    }

    table.processes[child_slot] = Some(Process {
        pid: child_pid,
        ppid: pid,
        pgid: parent_pgid,
        state: TaskState::Ready,
        task: crate::sched::spawn(crate::sched::task::PRIORITY_LOWEST, 0, child_pd),
        page_directory: child_pd,
        exit_code: 0,
        signals: SignalState::new(),
        vmas: parent_vmas,
        entry: parent_entry,
    });
    let _ = parent_ppid;
    Ok(child_pid)
}

/// Tears down `pid`'s user mappings and loads `image` in its place,
/// resetting pending signals. Ground: `SPEC_FULL.md` §4.6 "Exec".
pub fn exec(pid: Pid, image: &elf::ElfImage) -> KernelResult<()> {
    let mut table = TABLE.lock();
    let idx = find_by_pid(&table, pid).ok_or(KernelError::NotFound)?;

    let old_vmas = table.processes[idx].as_ref().expect("checked above").vmas.clone();
    for vma in &old_vmas {
        for page in (vma.start..vma.end).step_by(pmm::FRAME_SIZE) {
            // SAFETY: page was mapped by this same process; unmapping its
            // own user pages cannot affect the kernel half.
            if let Some(phys) = unsafe { vmm::translate(page) } {
                unsafe { vmm::unmap(page) };
                frames::drop_ref(phys & !0xFFF);
            }
        }
    }

    let proc = table.processes[idx].as_mut().expect("checked above");
    proc.vmas.clear();
    proc.signals.reset_pending();
    proc.entry = image.entry as usize;
    drop(table);

    for segment in image.load_segments()? {
        let mut flags = PageFlags::PRESENT | PageFlags::USER;
        if segment.writable {
            flags |= PageFlags::WRITABLE;
        }
        let page_start = segment.vaddr as usize & !0xFFF;
        let page_end = (segment.vaddr as usize + segment.mem_size as usize + 0xFFF) & !0xFFF;
        for page in (page_start..page_end).step_by(pmm::FRAME_SIZE) {
            let frame = pmm::alloc_frame()?;
            unsafe { vmm::map(page, frame, flags)? };
        }
        let bytes = image.segment_file_bytes(&segment)?;
        unsafe {
            let dst = segment.vaddr as usize as *mut u8;
            core::ptr::copy_nonoverlapping(bytes.as_ptr(), dst, bytes.len());
            core::ptr::write_bytes(
                dst.add(bytes.len()),
                0,
                segment.mem_size as usize - segment.file_size as usize,
            );
        }
        let mut table = TABLE.lock();
        let idx = find_by_pid(&table, pid).ok_or(KernelError::NotFound)?;
        table.processes[idx].as_mut().expect("checked above").vmas.push(Vma {
            start: page_start,
            end: page_end,
            flags,
            file_backed: false,
            grows_down_limit: 0,
        });
    }
    Ok(())
}

/// Reaps a zombie child of `parent_pid`. `pid == None` reaps any zombie
/// child; `Some(pid)` reaps that specific child. Ground: `SPEC_FULL.md`
/// §4.6 "Wait".
pub fn waitpid(parent_pid: Pid, pid: Option<Pid>, nohang: bool) -> KernelResult<(Pid, i32)> {
    loop {
        {
            let mut table = TABLE.lock();
            let candidate = table.processes.iter().position(|p| {
                p.as_ref().is_some_and(|p| {
                    p.ppid == parent_pid
                        && p.state == TaskState::Zombie
                        && pid.is_none_or(|want| want == p.pid)
                })
            });
            if let Some(idx) = candidate {
                let proc = table.processes[idx].take().expect("checked above");
                if let Some(task) = proc.task {
                    crate::sched::reap(task);
                }
                return Ok((proc.pid, proc.exit_code));
            }
            let has_any_child = table
                .processes
                .iter()
                .any(|p| p.as_ref().is_some_and(|p| p.ppid == parent_pid && pid.is_none_or(|want| want == p.pid)));
            if !has_any_child {
                return Err(KernelError::NoChildren);
            }
            if nohang {
                return Err(KernelError::WouldBlock);
            }
            table.wait_children.wait();
        }
        // SAFETY: reschedule only touches scheduler-internal state.
        unsafe { crate::sched::reschedule() };
    }
}

/// Transitions `pid` to `Zombie`, releases its address space (dropping
/// frame references, freeing any that reach zero), reparents its live
/// children to `INIT_PID`, and wakes its parent. Ground: `SPEC_FULL.md`
/// §4.6 "Exit".
pub fn exit(pid: Pid, exit_code: i32) -> KernelResult<()> {
    let mut table = TABLE.lock();
    let idx = find_by_pid(&table, pid).ok_or(KernelError::NotFound)?;

    let vmas = table.processes[idx].as_ref().expect("checked above").vmas.clone();
    for vma in &vmas {
        for page in (vma.start..vma.end).step_by(pmm::FRAME_SIZE) {
            if let Some(phys) = unsafe { vmm::translate(page) } {
                unsafe { vmm::unmap(page) };
                frames::drop_ref(phys & !0xFFF);
            }
        }
    }

    for other in table.processes.iter_mut().flatten() {
        if other.ppid == pid {
            other.ppid = INIT_PID;
        }
    }

    let proc = table.processes[idx].as_mut().expect("checked above");
    proc.state = TaskState::Zombie;
    proc.exit_code = exit_code;
    if proc.task.is_some() {
        crate::sched::exit_current();
    }
    table.wait_children.wake_all();
    Ok(())
}

/// Handles a write fault on a copy-on-write page: if this process holds
/// the only reference, just restores writability; otherwise copies the
/// frame and installs the private copy. Ground: `SPEC_FULL.md` §4.6
/// "Copy-on-write fault".
pub fn handle_cow_fault(faulting_addr: usize) -> KernelResult<()> {
    let page = faulting_addr & !0xFFF;
    // SAFETY: the fault handler runs with the faulting address space
    // active.
    let phys = unsafe { vmm::translate(page) }.ok_or(KernelError::InvalidArgument)?;
    let frame = phys & !0xFFF;

    if frames::refcount(frame) == 1 {
        // SAFETY: sole owner; safe to restore WRITABLE in place.
        unsafe { vmm::map(page, frame, PageFlags::PRESENT | PageFlags::WRITABLE | PageFlags::USER)? };
        return Ok(());
    }

    let new_frame = pmm::alloc_frame()?;
    // SAFETY: new_frame is freshly allocated and not yet mapped anywhere;
    // frame is the currently-mapped COW page being copied from.
    unsafe {
        core::ptr::copy_nonoverlapping(frame as *const u8, new_frame as *mut u8, pmm::FRAME_SIZE);
        vmm::map(page, new_frame, PageFlags::PRESENT | PageFlags::WRITABLE | PageFlags::USER)?;
    }
    frames::drop_ref(frame);
    Ok(())
}

/// Handles a fault in a lazily-backed VMA: allocates a zero-filled frame
/// (or reads the file-backed segment) and installs it with the VMA's
/// permissions. Ground: `SPEC_FULL.md` §4.6 "Demand-paging fault".
pub fn handle_demand_page_fault(pid: Pid, faulting_addr: usize) -> KernelResult<()> {
    let table = TABLE.lock();
    let idx = find_by_pid(&table, pid).ok_or(KernelError::NotFound)?;
    let proc = table.processes[idx].as_ref().expect("checked above");
    let vma = proc
        .vmas
        .iter()
        .find(|v| faulting_addr >= v.start && faulting_addr < v.end)
        .copied()
        .ok_or(KernelError::InvalidArgument)?;
    drop(table);

    let page = faulting_addr & !0xFFF;
    let frame = pmm::alloc_frame()?;
    // SAFETY: frame is freshly allocated; zeroing it before mapping
    // guarantees anonymous pages never leak prior contents.
    unsafe {
        core::ptr::write_bytes(frame as *mut u8, 0, pmm::FRAME_SIZE);
        vmm::map(page, frame, vma.flags)?;
    }
    Ok(())
}

/// Extends `pid`'s stack VMA one page down if `faulting_addr` lies exactly
/// one page below it and within its configured growth limit. Ground:
/// `SPEC_FULL.md` §4.6 "Stack growth".
pub fn handle_stack_growth(pid: Pid, faulting_addr: usize) -> KernelResult<()> {
    let mut table = TABLE.lock();
    let idx = find_by_pid(&table, pid).ok_or(KernelError::NotFound)?;
    let proc = table.processes[idx].as_mut().expect("checked above");
    let page = faulting_addr & !0xFFF;

    let stack_vma = proc
        .vmas
        .iter_mut()
        .find(|v| page + pmm::FRAME_SIZE == v.start && v.start > v.grows_down_limit)
        .ok_or(KernelError::InvalidArgument)?;

    let flags = stack_vma.flags;
    stack_vma.start = page;
    drop(table);

    let frame = pmm::alloc_frame()?;
    // SAFETY: frame is freshly allocated; page was just claimed into the
    // stack VMA above.
    unsafe {
        core::ptr::write_bytes(frame as *mut u8, 0, pmm::FRAME_SIZE);
        vmm::map(page, frame, flags)?;
    }
    Ok(())
}

/// One line of `procfs`-style process observability: pid/ppid/state/
/// priority, generated fresh from live scheduler/process state.
pub fn describe(pid: Pid) -> Option<alloc::string::String> {
    use alloc::string::ToString;
    let table = TABLE.lock();
    let idx = find_by_pid(&table, pid)?;
    let proc = table.processes[idx].as_ref()?;
    let priority = proc.task.map(crate::sched::priority_of).unwrap_or(0);
    Some(
        alloc::format!("pid={} ppid={} state={:?} priority={}", proc.pid, proc.ppid, proc.state, priority)
            .to_string(),
    )
}

/// Every currently live (non-`Unused`) pid, for `procfs` directory
/// listings.
pub fn live_pids() -> alloc::vec::Vec<Pid> {
    TABLE.lock().processes.iter().flatten().map(|p| p.pid).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

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

    #[test_case]
    fn waitpid_fails_fast_with_no_children() {
        let result = waitpid(999, None, true);
        assert_eq!(result, Err(KernelError::NoChildren));
    }

    #[test_case]
    fn create_and_exit_round_trips_through_waitpid() {
        let data = minimal_elf();
        let image = elf::ElfImage::parse(&data).unwrap();
        let pid = create(INIT_PID, 10, &image).unwrap();
        exit(pid, 7).unwrap();
        let (reaped_pid, code) = waitpid(INIT_PID, Some(pid), true).unwrap();
        assert_eq!(reaped_pid, pid);
        assert_eq!(code, 7);
    }
}
