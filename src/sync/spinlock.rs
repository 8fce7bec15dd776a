//! Single-word spinlock with an IRQ-saving variant. Ground: `SPEC_FULL.md`
//! §4.3, `original_source/kernel/sync/spinlock.c`.
//!
//! Invariant carried from the original: a spinlock must never be held
//! across a call that can block, since nothing else can make progress on
//! this single CPU while it spins.

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicBool, Ordering};

/// A spinning mutual-exclusion lock around a `T`.
pub struct Spinlock<T> {
    locked: AtomicBool,
    value: UnsafeCell<T>,
}

unsafe impl<T: Send> Sync for Spinlock<T> {}

/// RAII guard releasing the lock on drop.
pub struct SpinlockGuard<'a, T> {
    lock: &'a Spinlock<T>,
}

impl<T> Spinlock<T> {
    pub const fn new(value: T) -> Self {
        Self {
            locked: AtomicBool::new(false),
            value: UnsafeCell::new(value),
        }
    }

    /// Spins until the lock is acquired.
    pub fn lock(&self) -> SpinlockGuard<'_, T> {
        while self
            .locked
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            core::hint::spin_loop();
        }
        SpinlockGuard { lock: self }
    }

    /// Attempts to acquire the lock without spinning.
    pub fn try_lock(&self) -> Option<SpinlockGuard<'_, T>> {
        self.locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
            .then_some(SpinlockGuard { lock: self })
    }

    /// # Safety
    /// Caller must hold the lock, or guarantee exclusive access by other
    /// means (e.g. during early boot before other CPUs/tasks exist).
    #[allow(clippy::mut_from_ref)]
    unsafe fn value_mut(&self) -> &mut T {
        &mut *self.value.get()
    }
}

impl<T> core::ops::Deref for SpinlockGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        // SAFETY: holding the guard is proof of exclusive access.
        unsafe { &*self.lock.value.get() }
    }
}

impl<T> core::ops::DerefMut for SpinlockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: holding the guard is proof of exclusive access.
        unsafe { self.lock.value_mut() }
    }
}

impl<T> Drop for SpinlockGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.locked.store(false, Ordering::Release);
    }
}

/// Acquires `lock` with interrupts disabled for the duration of `f`,
/// restoring the prior interrupt-enable state on return. Ground:
/// `SPEC_FULL.md` §4.3 "`irq_save` additionally disables interrupts".
pub fn with_irq_saved<T, R>(lock: &Spinlock<T>, f: impl FnOnce(&mut T) -> R) -> R {
    let was_enabled = crate::interrupts_enabled();
    if was_enabled {
        unsafe {
            x86::irq::disable();
        }
    }
    let result = {
        let mut guard = lock.lock();
        f(&mut guard)
    };
    if was_enabled {
        unsafe {
            x86::irq::enable();
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_case]
    fn lock_excludes_concurrent_access() {
        let lock = Spinlock::new(0u32);
        {
            let mut guard = lock.lock();
            *guard += 1;
        }
        assert_eq!(*lock.lock(), 1);
    }

    #[test_case]
    fn try_lock_fails_while_held() {
        let lock = Spinlock::new(());
        let guard = lock.lock();
        assert!(lock.try_lock().is_none());
        drop(guard);
        assert!(lock.try_lock().is_some());
    }
}
