//! The heap lock serializing writers of the megapage table.
//!
//! Callers that already hold the lock prove it by passing their
//! [`HeapLockGuard`] to the `*_locked` entry points instead of a flag.

use parking_lot::{Mutex, MutexGuard};

pub struct HeapLock {
    inner: Mutex<()>,
}

impl HeapLock {
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(()),
        }
    }

    #[inline]
    pub fn lock(&self) -> HeapLockGuard<'_> {
        HeapLockGuard {
            lock: self,
            _guard: self.inner.lock(),
        }
    }

    #[inline]
    pub fn try_lock(&self) -> Option<HeapLockGuard<'_>> {
        self.inner.try_lock().map(|guard| HeapLockGuard {
            lock: self,
            _guard: guard,
        })
    }

    #[inline]
    pub fn is_locked(&self) -> bool {
        self.inner.is_locked()
    }
}

impl Default for HeapLock {
    fn default() -> Self {
        Self::new()
    }
}

/// Proof that the heap lock is held. Releases it on drop.
pub struct HeapLockGuard<'a> {
    lock: &'a HeapLock,
    _guard: MutexGuard<'a, ()>,
}

impl HeapLockGuard<'_> {
    /// Whether this guard was taken on `lock`.
    #[inline]
    pub fn holds(&self, lock: &HeapLock) -> bool {
        core::ptr::eq(self.lock, lock)
    }
}
