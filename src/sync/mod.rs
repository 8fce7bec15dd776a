//! Blocking synchronization primitives layered over the scheduler's wait
//! queues, plus the spinlock that protects scheduler-internal state
//! itself. See `SPEC_FULL.md` §4.3.

pub mod condvar;
pub mod mutex;
pub mod rwlock;
pub mod semaphore;
pub mod spinlock;
pub mod waitqueue;

pub use condvar::Condvar;
pub use mutex::Mutex;
pub use rwlock::RwLock;
pub use semaphore::Semaphore;
pub use spinlock::Spinlock;
pub use waitqueue::WaitQueue;
