//! Spinlock.
//!
//! The hypervisor runs single-core but takes exceptions while holding
//! nothing, so a plain test-and-set lock is enough to keep the console
//! and other shared state coherent between the trap path and the rest
//! of the code.

use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, Ordering};

/// Error returned by [`SpinLock::try_lock`] when the lock is held.
pub enum TryLockError {
    /// The lock could not be acquired at this time because the
    /// operation would otherwise block.
    WouldBlock,
}

/// A mutual exclusion primitive protecting the inner `T`.
///
/// The data can only be accessed through the RAII guard returned from
/// [`lock`] and [`try_lock`], which guarantees the data is only ever
/// touched while the lock is held.
///
/// [`lock`]: Self::lock
/// [`try_lock`]: Self::try_lock
pub struct SpinLock<T: ?Sized> {
    held: AtomicBool,
    data: UnsafeCell<T>,
}

unsafe impl<T: ?Sized + Send> Send for SpinLock<T> {}
unsafe impl<T: ?Sized + Send> Sync for SpinLock<T> {}

impl<T> SpinLock<T> {
    /// Creates a new spinlock in an unlocked state ready for use.
    #[inline]
    pub const fn new(t: T) -> SpinLock<T> {
        SpinLock {
            held: AtomicBool::new(false),
            data: UnsafeCell::new(t),
        }
    }
}

impl<T: ?Sized> SpinLock<T> {
    /// Acquires the lock, spinning until it is available.
    ///
    /// Returns an RAII guard; the lock is released when the guard goes
    /// out of scope.
    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        while self.held.fetch_or(true, Ordering::SeqCst) {
            core::hint::spin_loop();
        }
        SpinLockGuard { lock: self }
    }

    /// Attempts to acquire the lock without blocking.
    pub fn try_lock(&self) -> Result<SpinLockGuard<'_, T>, TryLockError> {
        if self.held.fetch_or(true, Ordering::SeqCst) {
            Err(TryLockError::WouldBlock)
        } else {
            Ok(SpinLockGuard { lock: self })
        }
    }

    /// Consumes the spinlock, returning the underlying data.
    pub fn into_inner(self) -> T
    where
        T: Sized,
    {
        self.data.into_inner()
    }
}

impl<T: ?Sized + Default> Default for SpinLock<T> {
    fn default() -> SpinLock<T> {
        SpinLock::new(Default::default())
    }
}

/// An RAII scoped-lock guard created by [`SpinLock::lock`] and
/// [`SpinLock::try_lock`].
pub struct SpinLockGuard<'a, T: ?Sized + 'a> {
    lock: &'a SpinLock<T>,
}

unsafe impl<T: ?Sized + Sync> Sync for SpinLockGuard<'_, T> {}

impl<T: ?Sized> Deref for SpinLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T: ?Sized> DerefMut for SpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T: ?Sized> Drop for SpinLockGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.held.store(false, Ordering::SeqCst);
    }
}
