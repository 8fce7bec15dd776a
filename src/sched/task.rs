//! Task control block and the states a task moves through across its
//! lifetime. Ground: `SPEC_FULL.md` §4.3, `original_source/include/kernel/scheduler.h`.

/// A task's current scheduling state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Slot is free.
    Unused,
    /// Eligible to run, waiting for the scheduler to pick it.
    Ready,
    /// Currently executing on the (single) CPU.
    Running,
    /// Waiting on a synchronization primitive.
    Blocked,
    /// Waiting for a wake-up time to arrive.
    Sleeping,
    /// Exited; awaiting `waitpid` to reap it.
    Zombie,
}

/// Opaque task identifier, stable for the task's lifetime.
pub type TaskId = u32;

/// Highest (most urgent) priority value a task may hold.
pub const PRIORITY_HIGHEST: u8 = 0;
/// Lowest priority value a task may hold.
pub const PRIORITY_LOWEST: u8 = 31;
/// Default time slice, in timer ticks, granted to a running task.
pub const DEFAULT_TIMESLICE: u8 = 10;

/// Callee-saved general-purpose registers preserved across a context
/// switch (the caller-saved set is already on the stack via the
/// interrupt/call that entered the scheduler).
#[derive(Debug, Default, Clone, Copy)]
#[repr(C)]
pub struct CalleeSaved {
    pub ebx: u32,
    pub esi: u32,
    pub edi: u32,
    pub ebp: u32,
}

/// A single schedulable unit of execution.
pub struct Task {
    pub id: TaskId,
    pub state: TaskState,
    pub priority: u8,
    /// Priority to restore once a mutex-induced boost is released; `None`
    /// when the task is running at its own base priority.
    pub base_priority: u8,
    pub timeslice: u8,
    /// Saved stack pointer; valid only while `state != Running` for the
    /// currently executing task.
    pub stack_pointer: usize,
    /// Physical address of this task's page directory.
    pub page_directory: usize,
    /// Absolute tick count at which a `Sleeping` task becomes `Ready`.
    pub wake_time: u64,
    /// Synchronization object this task is blocked on, if any, used to
    /// detect priority-inheritance chains.
    pub waiting_on: Option<TaskId>,
}

impl Task {
    pub const fn unused(id: TaskId) -> Self {
        Self {
            id,
            state: TaskState::Unused,
            priority: PRIORITY_LOWEST,
            base_priority: PRIORITY_LOWEST,
            timeslice: DEFAULT_TIMESLICE,
            stack_pointer: 0,
            page_directory: 0,
            wake_time: 0,
            waiting_on: None,
        }
    }

    /// Raises this task's effective priority for priority inheritance,
    /// remembering the prior value so it can be restored later.
    pub fn boost_priority(&mut self, to: u8) {
        if to < self.priority {
            self.priority = to;
        }
    }

    /// Restores the task's priority to its own base level.
    pub fn restore_priority(&mut self) {
        self.priority = self.base_priority;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_case]
    fn boost_only_raises_priority() {
        let mut t = Task::unused(1);
        t.priority = 10;
        t.base_priority = 10;
        t.boost_priority(20); // lower numeric priority than 10 means higher urgency; 20 is lower urgency
        assert_eq!(t.priority, 10);
        t.boost_priority(2);
        assert_eq!(t.priority, 2);
        t.restore_priority();
        assert_eq!(t.priority, 10);
    }
}
