//! Bounded typed message queues. Ground: `SPEC_FULL.md` §4.7,
//! `original_source/kernel/ipc/msgq.c`.

use crate::error::{KernelError, KernelResult};
use crate::sync::spinlock::Spinlock;
use crate::sync::waitqueue::WaitQueue;
use alloc::collections::VecDeque;
use alloc::vec::Vec;

/// Maximum number of messages a queue holds before `send` blocks.
pub const QUEUE_CAPACITY: usize = 64;

/// A single queued message: a caller-defined type tag plus payload.
#[derive(Clone, Debug)]
pub struct Message {
    pub mtype: u32,
    pub data: Vec<u8>,
}

struct State {
    messages: VecDeque<Message>,
}

/// A bounded FIFO of typed messages.
pub struct MessageQueue {
    state: Spinlock<State>,
    not_empty: WaitQueue,
    not_full: WaitQueue,
}

impl MessageQueue {
    pub fn new() -> Self {
        Self {
            state: Spinlock::new(State { messages: VecDeque::with_capacity(QUEUE_CAPACITY) }),
            not_empty: WaitQueue::new(),
            not_full: WaitQueue::new(),
        }
    }

    /// Enqueues `message`, blocking while the queue is full.
    pub fn send(&self, message: Message, nonblocking: bool) -> KernelResult<()> {
        loop {
            {
                let mut state = self.state.lock();
                if state.messages.len() < QUEUE_CAPACITY {
                    state.messages.push_back(message);
                    drop(state);
                    self.not_empty.wake_one();
                    return Ok(());
                }
                if nonblocking {
                    return Err(KernelError::WouldBlock);
                }
            }
            self.not_full.wait();
            // SAFETY: reschedule only touches scheduler-internal state.
            unsafe { crate::sched::reschedule() };
        }
    }

    /// Dequeues the first message matching `mtype` (any message when
    /// `mtype == 0`), blocking while none match.
    pub fn receive(&self, mtype: u32, nonblocking: bool) -> KernelResult<Message> {
        loop {
            {
                let mut state = self.state.lock();
                let position = if mtype == 0 {
                    if state.messages.is_empty() { None } else { Some(0) }
                } else {
                    state.messages.iter().position(|m| m.mtype == mtype)
                };
                if let Some(index) = position {
                    let message = state.messages.remove(index).expect("checked position");
                    drop(state);
                    self.not_full.wake_one();
                    return Ok(message);
                }
                if nonblocking {
                    return Err(KernelError::WouldBlock);
                }
            }
            self.not_empty.wait();
            // SAFETY: reschedule only touches scheduler-internal state.
            unsafe { crate::sched::reschedule() };
        }
    }

    pub fn len(&self) -> usize {
        self.state.lock().messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MessageQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_case]
    fn send_then_receive_any_round_trips() {
        let queue = MessageQueue::new();
        queue.send(Message { mtype: 1, data: alloc::vec![1, 2, 3] }, false).unwrap();
        let message = queue.receive(0, false).unwrap();
        assert_eq!(message.mtype, 1);
        assert_eq!(message.data, alloc::vec![1, 2, 3]);
    }

    #[test_case]
    fn receive_matches_requested_mtype_skipping_others() {
        let queue = MessageQueue::new();
        queue.send(Message { mtype: 1, data: alloc::vec![] }, false).unwrap();
        queue.send(Message { mtype: 2, data: alloc::vec![9] }, false).unwrap();
        let message = queue.receive(2, false).unwrap();
        assert_eq!(message.mtype, 2);
        assert_eq!(queue.len(), 1);
    }

    #[test_case]
    fn nonblocking_receive_on_empty_queue_would_block() {
        let queue = MessageQueue::new();
        assert_eq!(queue.receive(0, true).unwrap_err(), KernelError::WouldBlock);
    }

    #[test_case]
    fn nonblocking_send_on_full_queue_would_block() {
        let queue = MessageQueue::new();
        for _ in 0..QUEUE_CAPACITY {
            queue.send(Message { mtype: 1, data: alloc::vec![] }, false).unwrap();
        }
        assert_eq!(queue.send(Message { mtype: 1, data: alloc::vec![] }, true).unwrap_err(), KernelError::WouldBlock);
    }
}
