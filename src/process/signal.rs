//! POSIX-like signal numbering, default dispositions, and per-process
//! pending/blocked/handler state. Ground: `SPEC_FULL.md` §4.6,
//! `original_source/kernel/process/signal.c`.

/// Signal numbers this kernel recognizes (a practical subset of POSIX).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Signal {
    Hup = 1,
    Int = 2,
    Quit = 3,
    Ill = 4,
    Abrt = 6,
    Fpe = 8,
    Kill = 9,
    Segv = 11,
    Pipe = 13,
    Alrm = 14,
    Term = 15,
    Chld = 17,
    Cont = 18,
    Stop = 19,
    Tstp = 20,
}

/// Highest signal number this kernel's fixed-size pending/blocked bitsets
/// track.
pub const MAX_SIGNAL: usize = 32;

/// What happens to a process that receives a signal with no installed
/// handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefaultAction {
    Terminate,
    Ignore,
    CoreDump,
    Stop,
    Continue,
}

/// The default action table, ground-truthed against POSIX's signal(7).
/// `SIGKILL`/`SIGSTOP` dispositions are immutable and always resolve here.
pub const fn default_action(signal: Signal) -> DefaultAction {
    match signal {
        Signal::Chld => DefaultAction::Ignore,
        Signal::Cont => DefaultAction::Continue,
        Signal::Stop | Signal::Tstp => DefaultAction::Stop,
        Signal::Ill | Signal::Abrt | Signal::Fpe | Signal::Segv | Signal::Quit => {
            DefaultAction::CoreDump
        }
        Signal::Hup | Signal::Int | Signal::Kill | Signal::Pipe | Signal::Alrm | Signal::Term => {
            DefaultAction::Terminate
        }
    }
}

/// Whether a process may install a custom handler or ignore this signal.
/// `SIGKILL` and `SIGSTOP` may never be caught, blocked, or ignored.
pub const fn disposition_is_fixed(signal: Signal) -> bool {
    matches!(signal, Signal::Kill | Signal::Stop)
}

/// A process's signal disposition for one signal number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Default,
    Ignore,
    Handler(usize),
}

/// Per-process signal state: pending set, blocked set, and one
/// disposition per signal number.
#[derive(Clone, Copy)]
pub struct SignalState {
    pending: u32,
    blocked: u32,
    dispositions: [Disposition; MAX_SIGNAL],
}

impl SignalState {
    pub const fn new() -> Self {
        Self {
            pending: 0,
            blocked: 0,
            dispositions: [Disposition::Default; MAX_SIGNAL],
        }
    }

    /// Marks `signal` pending, unless it is currently blocked.
    pub fn raise(&mut self, signal: Signal) {
        let bit = 1 << (signal as u8);
        if self.blocked & bit == 0 {
            self.pending |= bit;
        }
    }

    /// Sets `signal`'s disposition, rejecting an attempt to change
    /// `SIGKILL`/`SIGSTOP`.
    pub fn set_disposition(&mut self, signal: Signal, disposition: Disposition) -> Result<(), ()> {
        if disposition_is_fixed(signal) {
            return Err(());
        }
        self.dispositions[signal as usize] = disposition;
        Ok(())
    }

    pub fn disposition(&self, signal: Signal) -> Disposition {
        self.dispositions[signal as usize]
    }

    pub fn set_blocked(&mut self, signal: Signal, blocked: bool) {
        let bit = 1 << (signal as u8);
        if blocked {
            self.blocked |= bit;
        } else {
            self.blocked &= !bit;
        }
    }

    /// Takes and clears the lowest-numbered pending, unblocked signal, if
    /// any, for delivery at the next return-to-userspace checkpoint.
    pub fn take_deliverable(&mut self) -> Option<Signal> {
        let deliverable = self.pending & !self.blocked;
        if deliverable == 0 {
            return None;
        }
        let bit = deliverable.trailing_zeros() as u8;
        self.pending &= !(1 << bit);
        signal_from_number(bit)
    }

    /// Clears the pending set entirely; used by `fork`'s child and `exec`.
    pub fn reset_pending(&mut self) {
        self.pending = 0;
    }
}

impl Default for SignalState {
    fn default() -> Self {
        Self::new()
    }
}

fn signal_from_number(n: u8) -> Option<Signal> {
    Some(match n {
        1 => Signal::Hup,
        2 => Signal::Int,
        3 => Signal::Quit,
        4 => Signal::Ill,
        6 => Signal::Abrt,
        8 => Signal::Fpe,
        9 => Signal::Kill,
        11 => Signal::Segv,
        13 => Signal::Pipe,
        14 => Signal::Alrm,
        15 => Signal::Term,
        17 => Signal::Chld,
        18 => Signal::Cont,
        19 => Signal::Stop,
        20 => Signal::Tstp,
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_case]
    fn kill_and_stop_dispositions_cannot_change() {
        let mut state = SignalState::new();
        assert!(state.set_disposition(Signal::Kill, Disposition::Ignore).is_err());
        assert!(state.set_disposition(Signal::Stop, Disposition::Ignore).is_err());
        assert!(state.set_disposition(Signal::Term, Disposition::Ignore).is_ok());
    }

    #[test_case]
    fn blocked_signal_does_not_become_pending() {
        let mut state = SignalState::new();
        state.set_blocked(Signal::Int, true);
        state.raise(Signal::Int);
        assert_eq!(state.take_deliverable(), None);
    }

    #[test_case]
    fn deliverable_signals_come_out_lowest_number_first() {
        let mut state = SignalState::new();
        state.raise(Signal::Term);
        state.raise(Signal::Hup);
        assert_eq!(state.take_deliverable(), Some(Signal::Hup));
        assert_eq!(state.take_deliverable(), Some(Signal::Term));
        assert_eq!(state.take_deliverable(), None);
    }

    #[test_case]
    fn reset_pending_clears_everything() {
        let mut state = SignalState::new();
        state.raise(Signal::Int);
        state.reset_pending();
        assert_eq!(state.take_deliverable(), None);
    }
}
