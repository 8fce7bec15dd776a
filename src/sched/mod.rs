//! Preemptive priority round-robin scheduler. Ground: `SPEC_FULL.md` §4.3,
//! `original_source/kernel/sched/scheduler.c`.
//!
//! A fixed-size task table is scanned for the highest-priority `Ready`
//! task on every reschedule point (tick expiry, voluntary yield, or
//! block); ties are broken in task-table order, giving round-robin
//! behavior within a priority level since the previously running task is
//! appended at the back of its own priority by virtue of the scan order.

pub mod task;

use crate::sync::spinlock::Spinlock;
use task::{Task, TaskId, TaskState, DEFAULT_TIMESLICE};

/// Maximum number of concurrently schedulable tasks, matching the process
/// table capacity (`SPEC_FULL.md` §4.6a).
pub const MAX_TASKS: usize = 64;

/// Kernel's own init task; never exits, reaped children reparent here.
pub const INIT_TASK_ID: TaskId = 1;

struct Scheduler {
    tasks: [Task; MAX_TASKS],
    current: Option<usize>,
    ticks: u64,
}

impl Scheduler {
    const fn new() -> Self {
        const UNUSED: Task = Task::unused(0);
        let mut tasks = [UNUSED; MAX_TASKS];
        let mut i = 0;
        while i < MAX_TASKS {
            tasks[i] = Task::unused(i as TaskId);
            i += 1;
        }
        Self {
            tasks,
            current: None,
            ticks: 0,
        }
    }

    fn find_free_slot(&self) -> Option<usize> {
        self.tasks.iter().position(|t| t.state == TaskState::Unused)
    }

    /// Selects the highest-priority `Ready` task, if any, by table-order
    /// scan (lowest numeric priority wins; ties favor earlier slots, which
    /// round-robins a level since the previously-running task is re-marked
    /// `Ready` and appears after tasks that were already waiting).
    fn pick_next(&self) -> Option<usize> {
        self.tasks
            .iter()
            .enumerate()
            .filter(|(_, t)| t.state == TaskState::Ready)
            .min_by_key(|(_, t)| t.priority)
            .map(|(i, _)| i)
    }
}

static SCHEDULER: Spinlock<Scheduler> = Spinlock::new(Scheduler::new());

/// Creates a new task at `priority` with the given entry stack pointer
/// and page directory, marking it `Ready`.
pub fn spawn(priority: u8, stack_pointer: usize, page_directory: usize) -> Option<TaskId> {
    let mut sched = SCHEDULER.lock();
    let slot = sched.find_free_slot()?;
    let id = slot as TaskId;
    sched.tasks[slot] = Task {
        id,
        state: TaskState::Ready,
        priority,
        base_priority: priority,
        timeslice: DEFAULT_TIMESLICE,
        stack_pointer,
        page_directory,
        wake_time: 0,
        waiting_on: None,
    };
    Some(id)
}

/// The currently running task's id, if the scheduler has started.
pub fn current_id() -> Option<TaskId> {
    let sched = SCHEDULER.lock();
    sched.current.map(|i| sched.tasks[i].id)
}

/// Called once per timer tick: decrements the running task's time slice
/// and wakes any `Sleeping` task whose `wake_time` has arrived. Returns
/// whether a reschedule is now due.
pub fn on_tick() -> bool {
    let mut sched = SCHEDULER.lock();
    let now = sched.ticks + 1;
    sched.ticks = now;

    for task in &mut sched.tasks {
        if task.state == TaskState::Sleeping && task.wake_time <= now {
            task.state = TaskState::Ready;
        }
    }

    if let Some(idx) = sched.current {
        sched.tasks[idx].timeslice = sched.tasks[idx].timeslice.saturating_sub(1);
        sched.tasks[idx].timeslice == 0
    } else {
        false
    }
}

/// Transitions the current task to `Blocked`, recording what it waits on,
/// then triggers a reschedule. Returns the id of the task that blocked.
///
/// # Safety
/// Must be called with the owning primitive's internal spinlock already
/// held and about to be released by the caller before this returns control
/// to the newly scheduled task (the actual context switch happens in
/// `reschedule`, invoked separately by the caller after dropping that lock).
pub fn block_current(waiting_on: Option<TaskId>) -> Option<TaskId> {
    let mut sched = SCHEDULER.lock();
    let idx = sched.current?;
    sched.tasks[idx].state = TaskState::Blocked;
    sched.tasks[idx].waiting_on = waiting_on;
    Some(sched.tasks[idx].id)
}

/// Transitions a task from `Blocked`/`Sleeping` back to `Ready`.
pub fn wake(id: TaskId) {
    let mut sched = SCHEDULER.lock();
    if let Some(task) = sched.tasks.get_mut(id as usize) {
        if task.state == TaskState::Blocked || task.state == TaskState::Sleeping {
            task.state = TaskState::Ready;
            task.waiting_on = None;
        }
    }
}

/// Puts the current task to sleep until `ticks_from_now` ticks have
/// elapsed.
pub fn sleep_ticks(ticks_from_now: u64) {
    let mut sched = SCHEDULER.lock();
    if let Some(idx) = sched.current {
        let wake_time = sched.ticks + ticks_from_now;
        sched.tasks[idx].wake_time = wake_time;
        sched.tasks[idx].state = TaskState::Sleeping;
    }
}

/// The current priority of task `id`.
pub fn priority_of(id: TaskId) -> u8 {
    SCHEDULER.lock().tasks[id as usize].priority
}

/// Boosts `owner`'s priority to at least `to` for priority inheritance,
/// returning the prior priority so it can be restored later.
pub fn boost_priority(owner: TaskId, to: u8) -> u8 {
    let mut sched = SCHEDULER.lock();
    let prior = sched.tasks[owner as usize].priority;
    sched.tasks[owner as usize].boost_priority(to);
    prior
}

/// Restores `owner`'s priority to its own base level.
pub fn restore_priority(owner: TaskId) {
    let mut sched = SCHEDULER.lock();
    sched.tasks[owner as usize].restore_priority();
}

/// Marks the current task `Zombie`, releasing its slot for eventual reap.
pub fn exit_current() {
    let mut sched = SCHEDULER.lock();
    if let Some(idx) = sched.current {
        sched.tasks[idx].state = TaskState::Zombie;
    }
}

/// Frees a `Zombie` task's slot back to `Unused`, called once a parent has
/// reaped its exit status.
pub fn reap(id: TaskId) {
    let mut sched = SCHEDULER.lock();
    if let Some(task) = sched.tasks.get_mut(id as usize) {
        if task.state == TaskState::Zombie {
            *task = Task::unused(id);
        }
    }
}

/// Picks the next `Ready` task and performs the low-level context switch,
/// marking the outgoing task `Ready` again unless it was already moved to
/// a terminal/waiting state by the caller.
///
/// # Safety
/// Interrupts must be disabled; the outgoing task's state must already
/// reflect why it is leaving the CPU (the caller sets `Blocked`/`Sleeping`/
/// `Zombie` before calling, or leaves it `Running` for a plain tick-driven
/// preemption, which this function demotes to `Ready`).
pub unsafe fn reschedule() {
    let (from_sp, to_sp, to_pd, switch_pd) = {
        let mut sched = SCHEDULER.lock();
        let from_idx = sched.current;
        if let Some(idx) = from_idx {
            if sched.tasks[idx].state == TaskState::Running {
                sched.tasks[idx].state = TaskState::Ready;
            }
        }

        let Some(to_idx) = sched.pick_next() else {
            return;
        };
        sched.tasks[to_idx].state = TaskState::Running;
        sched.tasks[to_idx].timeslice = DEFAULT_TIMESLICE;
        let to_pd = sched.tasks[to_idx].page_directory;
        let switch_pd = from_idx.is_none_or(|i| sched.tasks[i].page_directory != to_pd);
        sched.current = Some(to_idx);

        let from_sp_slot: *mut usize = from_idx
            .map(|i| core::ptr::addr_of_mut!(sched.tasks[i].stack_pointer))
            .unwrap_or(core::ptr::null_mut());
        (from_sp_slot, sched.tasks[to_idx].stack_pointer, to_pd, switch_pd)
    };

    switch_context(from_sp, to_sp, if switch_pd { Some(to_pd) } else { None });
}

/// Saves the outgoing task's callee-saved registers and stack pointer into
/// `*from_sp` (skipped if null, i.e. there was no outgoing task), switches
/// CR3 if `new_pd` is given, then restores the incoming task's registers
/// from `to_sp` and returns into it.
///
/// # Safety
/// `from_sp` must be null or point at a valid task's `stack_pointer`
/// field; `to_sp` must be a stack previously saved by this same function
/// or freshly prepared by `task::Task` construction with a matching
/// initial-entry trampoline frame.
#[cfg(target_arch = "x86")]
unsafe fn switch_context(from_sp: *mut usize, to_sp: usize, new_pd: Option<usize>) {
    if let Some(pd) = new_pd {
        core::arch::asm!("mov cr3, {0}", in(reg) pd, options(nostack, preserves_flags));
    }
    core::arch::asm!(
        "pushfd",
        "push ebx",
        "push esi",
        "push edi",
        "push ebp",
        "test {from_sp:e}, {from_sp:e}",
        "jz 2f",
        "mov [{from_sp:e}], esp",
        "2:",
        "mov esp, {to_sp:e}",
        "pop ebp",
        "pop edi",
        "pop esi",
        "pop ebx",
        "popfd",
        from_sp = in(reg) from_sp,
        to_sp = in(reg) to_sp,
        options(preserves_flags),
    );
}

/// Host fallback: no real stack swap is possible without a second CPU
/// context, so this only updates bookkeeping already done by the caller.
#[cfg(not(target_arch = "x86"))]
unsafe fn switch_context(_from_sp: *mut usize, _to_sp: usize, _new_pd: Option<usize>) {}

/// Builds an initial kernel stack for a brand-new task so that the first
/// `reschedule` into it "returns" into `entry` with interrupts enabled.
pub fn prepare_initial_stack(stack_top: usize, entry: extern "C" fn() -> !) -> usize {
    const FRAME_WORDS: usize = 5; // eflags, ebx, esi, edi, ebp
    let mut sp = stack_top;
    sp -= core::mem::size_of::<usize>();
    unsafe {
        (sp as *mut usize).write(entry as usize);
    }
    sp -= FRAME_WORDS * core::mem::size_of::<usize>();
    let default_eflags: usize = 0x202; // interrupts enabled
    unsafe {
        (sp as *mut usize).write(default_eflags);
        ((sp + 4) as *mut usize).write(0);
        ((sp + 8) as *mut usize).write(0);
        ((sp + 12) as *mut usize).write(0);
        ((sp + 16) as *mut usize).write(0);
    }
    sp
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_case]
    fn spawn_allocates_distinct_ids() {
        let a = spawn(5, 0x1000, 0).unwrap();
        let b = spawn(5, 0x2000, 0).unwrap();
        assert_ne!(a, b);
        reap(a);
        reap(b);
    }

    #[test_case]
    fn pick_next_prefers_lower_numeric_priority() {
        let low = spawn(20, 0x1000, 0).unwrap();
        let high = spawn(1, 0x2000, 0).unwrap();
        let sched = SCHEDULER.lock();
        let picked = sched.pick_next().unwrap();
        assert_eq!(sched.tasks[picked].id, high);
        drop(sched);
        reap(low);
        reap(high);
    }

    #[test_case]
    fn sleeping_tasks_wake_once_their_time_arrives() {
        let id = spawn(10, 0x1000, 0).unwrap();
        {
            let mut sched = SCHEDULER.lock();
            let idx = id as usize;
            sched.tasks[idx].state = TaskState::Sleeping;
            sched.tasks[idx].wake_time = sched.ticks + 2;
        }
        on_tick();
        assert_eq!(SCHEDULER.lock().tasks[id as usize].state, TaskState::Sleeping);
        on_tick();
        assert_eq!(SCHEDULER.lock().tasks[id as usize].state, TaskState::Ready);
        reap(id);
    }
}
