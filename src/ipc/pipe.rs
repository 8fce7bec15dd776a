//! Fixed-capacity pipe. Ground: `SPEC_FULL.md` §4.7,
//! `original_source/kernel/ipc/pipe.c`.

use crate::error::{KernelError, KernelResult};
use crate::sync::spinlock::Spinlock;
use crate::sync::waitqueue::WaitQueue;
use alloc::collections::VecDeque;

/// Ring-buffer capacity, in bytes, of a single pipe.
pub const PIPE_CAPACITY: usize = 4096;

struct State {
    buffer: VecDeque<u8>,
    readers: u32,
    writers: u32,
}

/// A unidirectional byte pipe shared between reader(s) and writer(s).
pub struct Pipe {
    state: Spinlock<State>,
    readable: WaitQueue,
    writable: WaitQueue,
}

impl Pipe {
    pub fn new() -> Self {
        Self {
            state: Spinlock::new(State { buffer: VecDeque::with_capacity(PIPE_CAPACITY), readers: 1, writers: 1 }),
            readable: WaitQueue::new(),
            writable: WaitQueue::new(),
        }
    }

    pub fn add_reader(&self) {
        self.state.lock().readers += 1;
    }

    pub fn add_writer(&self) {
        self.state.lock().writers += 1;
    }

    /// Closes one reader handle; wakes writers once the last reader is
    /// gone (further writes will then fail).
    pub fn close_reader(&self) {
        let mut state = self.state.lock();
        state.readers = state.readers.saturating_sub(1);
        if state.readers == 0 {
            drop(state);
            self.writable.wake_all();
        }
    }

    /// Closes one writer handle; wakes readers once the last writer is
    /// gone so pending reads observe EOF.
    pub fn close_writer(&self) {
        let mut state = self.state.lock();
        state.writers = state.writers.saturating_sub(1);
        if state.writers == 0 {
            drop(state);
            self.readable.wake_all();
        }
    }

    /// Reads up to `buf.len()` bytes, blocking while empty and at least
    /// one writer remains. Returns 0 once all writers have closed (EOF).
    pub fn read(&self, buf: &mut [u8], nonblocking: bool) -> KernelResult<usize> {
        loop {
            {
                let mut state = self.state.lock();
                if !state.buffer.is_empty() {
                    let n = buf.len().min(state.buffer.len());
                    for slot in buf.iter_mut().take(n) {
                        *slot = state.buffer.pop_front().expect("checked non-empty");
                    }
                    drop(state);
                    self.writable.wake_one();
                    return Ok(n);
                }
                if state.writers == 0 {
                    return Ok(0);
                }
                if nonblocking {
                    return Err(KernelError::WouldBlock);
                }
            }
            self.readable.wait();
            // SAFETY: reschedule only touches scheduler-internal state.
            unsafe { crate::sched::reschedule() };
        }
    }

    /// Writes `buf`, blocking while full and at least one reader remains.
    /// Fails once all readers have closed.
    pub fn write(&self, buf: &[u8], nonblocking: bool) -> KernelResult<usize> {
        let mut written = 0;
        while written < buf.len() {
            {
                let mut state = self.state.lock();
                if state.readers == 0 {
                    return Err(KernelError::Fatal);
                }
                let space = PIPE_CAPACITY - state.buffer.len();
                if space > 0 {
                    let n = (buf.len() - written).min(space);
                    state.buffer.extend(&buf[written..written + n]);
                    written += n;
                    drop(state);
                    self.readable.wake_one();
                    continue;
                }
                if nonblocking {
                    return if written > 0 { Ok(written) } else { Err(KernelError::WouldBlock) };
                }
            }
            self.writable.wait();
            // SAFETY: reschedule only touches scheduler-internal state.
            unsafe { crate::sched::reschedule() };
        }
        Ok(written)
    }
}

impl Default for Pipe {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_case]
    fn write_then_read_round_trips() {
        let pipe = Pipe::new();
        pipe.write(b"hello", false).unwrap();
        let mut buf = [0u8; 5];
        assert_eq!(pipe.read(&mut buf, false).unwrap(), 5);
        assert_eq!(&buf, b"hello");
    }

    #[test_case]
    fn read_returns_eof_once_writers_all_closed() {
        let pipe = Pipe::new();
        pipe.close_writer();
        let mut buf = [0u8; 5];
        assert_eq!(pipe.read(&mut buf, false).unwrap(), 0);
    }

    #[test_case]
    fn write_fails_once_readers_all_closed() {
        let pipe = Pipe::new();
        pipe.close_reader();
        assert!(pipe.write(b"x", false).is_err());
    }

    #[test_case]
    fn nonblocking_read_on_empty_pipe_would_block() {
        let pipe = Pipe::new();
        let mut buf = [0u8; 1];
        assert_eq!(pipe.read(&mut buf, true), Err(KernelError::WouldBlock));
    }
}
