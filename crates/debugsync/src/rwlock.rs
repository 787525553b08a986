//! Reader/writer locks with held-too-long reporting.
//!
//! Exclusive and shared holds are watched independently. [`RwLock`] gives each
//! guard its own watch; [`RawRwLock`] watches the exclusive hold from `lock`
//! to `unlock` and the shared hold from the first concurrent reader to the
//! last reader's release.

use parking_lot::{
    Condvar, Mutex as PlMutex, RwLock as PlRwLock, RwLockReadGuard as PlReadGuard,
    RwLockWriteGuard as PlWriteGuard,
};
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use crate::diagnostics::{Diagnostics, EventKind, Operation, Watch};
use crate::error::misuse;

fn hold_watch(
    diagnostics: &Diagnostics,
    operation: Operation,
    name: Option<&Arc<str>>,
) -> Option<Watch> {
    diagnostics.threshold_watch(
        EventKind::HeldTooLong,
        operation,
        name,
        diagnostics.config().lock_hold_threshold,
    )
}

/// A reader/writer lock that reports holds exceeding the configured
/// `lock_hold_threshold`.
pub struct RwLock<T> {
    name: Option<Arc<str>>,
    diagnostics: Diagnostics,
    inner: PlRwLock<T>,
}

impl<T> RwLock<T> {
    /// Create a lock reporting through [`Diagnostics::default`].
    pub fn new(value: T) -> Self {
        Self::with_diagnostics(value, Diagnostics::default())
    }

    /// Create a lock reporting through `diagnostics`.
    pub fn with_diagnostics(value: T, diagnostics: Diagnostics) -> Self {
        Self {
            name: None,
            diagnostics,
            inner: PlRwLock::new(value),
        }
    }

    /// Label the lock in diagnostics.
    #[must_use]
    pub fn named(mut self, name: impl Into<Arc<str>>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Diagnostic label, if any.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Block until a shared hold is acquired.
    pub fn read(&self) -> RwLockReadGuard<'_, T> {
        let guard = self.inner.read();
        RwLockReadGuard {
            watch: self.watch(Operation::RwLockRead),
            guard,
        }
    }

    /// Acquire a shared hold only if no writer holds the lock right now.
    pub fn try_read(&self) -> Option<RwLockReadGuard<'_, T>> {
        let guard = self.inner.try_read()?;
        Some(RwLockReadGuard {
            watch: self.watch(Operation::RwLockRead),
            guard,
        })
    }

    /// Block until the exclusive hold is acquired.
    pub fn write(&self) -> RwLockWriteGuard<'_, T> {
        let guard = self.inner.write();
        RwLockWriteGuard {
            watch: self.watch(Operation::RwLockWrite),
            guard,
        }
    }

    /// Acquire the exclusive hold only if the lock is free right now.
    pub fn try_write(&self) -> Option<RwLockWriteGuard<'_, T>> {
        let guard = self.inner.try_write()?;
        Some(RwLockWriteGuard {
            watch: self.watch(Operation::RwLockWrite),
            guard,
        })
    }

    /// True if the lock is held in either mode.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.inner.is_locked()
    }

    /// True if a writer holds the lock.
    #[must_use]
    pub fn is_locked_exclusive(&self) -> bool {
        self.inner.is_locked_exclusive()
    }

    /// Mutable access without locking.
    pub fn get_mut(&mut self) -> &mut T {
        self.inner.get_mut()
    }

    /// Consume the lock, returning the protected value.
    pub fn into_inner(self) -> T {
        self.inner.into_inner()
    }

    fn watch(&self, operation: Operation) -> Option<Watch> {
        hold_watch(&self.diagnostics, operation, self.name.as_ref())
    }
}

impl<T: Default> Default for RwLock<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: fmt::Debug> fmt::Debug for RwLock<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RwLock")
            .field("name", &self.name)
            .field("inner", &self.inner)
            .finish()
    }
}

/// Shared hold of a [`RwLock`].
#[must_use = "if unused the RwLock will immediately unlock"]
pub struct RwLockReadGuard<'a, T> {
    watch: Option<Watch>,
    guard: PlReadGuard<'a, T>,
}

impl<T> Deref for RwLockReadGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> Drop for RwLockReadGuard<'_, T> {
    fn drop(&mut self) {
        if let Some(watch) = self.watch.take() {
            watch.release();
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for RwLockReadGuard<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.guard, f)
    }
}

/// Exclusive hold of a [`RwLock`].
#[must_use = "if unused the RwLock will immediately unlock"]
pub struct RwLockWriteGuard<'a, T> {
    watch: Option<Watch>,
    guard: PlWriteGuard<'a, T>,
}

impl<T> Deref for RwLockWriteGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for RwLockWriteGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

impl<T> Drop for RwLockWriteGuard<'_, T> {
    fn drop(&mut self) {
        if let Some(watch) = self.watch.take() {
            watch.release();
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for RwLockWriteGuard<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.guard, f)
    }
}

#[derive(Debug, Default)]
struct RawState {
    writer: bool,
    readers: usize,
    waiting_writers: usize,
    write_watch: Option<Watch>,
    read_watch: Option<Watch>,
}

impl RawState {
    fn writable(&self) -> bool {
        !self.writer && self.readers == 0
    }

    /// New readers queue behind waiting writers.
    fn readable(&self) -> bool {
        !self.writer && self.waiting_writers == 0
    }
}

/// A data-less, writer-preferring reader/writer lock with explicit
/// lock/unlock calls.
///
/// A thread that already holds a shared lock must not take another one while
/// a writer is waiting; it would wait behind that writer forever.
pub struct RawRwLock {
    name: Option<Arc<str>>,
    diagnostics: Diagnostics,
    state: PlMutex<RawState>,
    changed: Condvar,
}

impl Default for RawRwLock {
    fn default() -> Self {
        Self::new()
    }
}

impl RawRwLock {
    /// Create an unlocked lock reporting through [`Diagnostics::default`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_diagnostics(Diagnostics::default())
    }

    /// Create an unlocked lock reporting through `diagnostics`.
    #[must_use]
    pub fn with_diagnostics(diagnostics: Diagnostics) -> Self {
        Self {
            name: None,
            diagnostics,
            state: PlMutex::new(RawState::default()),
            changed: Condvar::new(),
        }
    }

    /// Label the lock in diagnostics.
    #[must_use]
    pub fn named(mut self, name: impl Into<Arc<str>>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Block until the exclusive hold is acquired.
    pub fn lock(&self) {
        let mut state = self.state.lock();
        state.waiting_writers = state.waiting_writers.saturating_add(1);
        while !state.writable() {
            self.changed.wait(&mut state);
        }
        state.waiting_writers = state.waiting_writers.saturating_sub(1);
        self.acquire_exclusive(&mut state);
    }

    /// Acquire the exclusive hold only if the lock is free right now.
    #[must_use]
    pub fn try_lock(&self) -> bool {
        let mut state = self.state.lock();
        if !state.writable() {
            return false;
        }
        self.acquire_exclusive(&mut state);
        true
    }

    /// Release the exclusive hold.
    ///
    /// # Panics
    ///
    /// Panics if the lock is not held exclusively, including when it is held
    /// only by readers.
    pub fn unlock(&self) {
        let watch = {
            let mut state = self.state.lock();
            if !state.writer {
                misuse("unlock of unlocked rwlock");
            }
            state.writer = false;
            state.write_watch.take()
        };
        self.changed.notify_all();
        if let Some(watch) = watch {
            watch.release();
        }
    }

    /// Block until a shared hold is acquired.
    pub fn read_lock(&self) {
        let mut state = self.state.lock();
        while !state.readable() {
            self.changed.wait(&mut state);
        }
        self.acquire_shared(&mut state);
    }

    /// Acquire a shared hold only if no writer holds or awaits the lock.
    #[must_use]
    pub fn try_read_lock(&self) -> bool {
        let mut state = self.state.lock();
        if !state.readable() {
            return false;
        }
        self.acquire_shared(&mut state);
        true
    }

    /// Release one shared hold.
    ///
    /// # Panics
    ///
    /// Panics if no shared hold exists, including when the lock is held
    /// exclusively.
    pub fn read_unlock(&self) {
        let watch = {
            let mut state = self.state.lock();
            if state.readers == 0 {
                misuse("read unlock of unlocked rwlock");
            }
            state.readers = state.readers.saturating_sub(1);
            if state.readers > 0 {
                return;
            }
            state.read_watch.take()
        };
        self.changed.notify_all();
        if let Some(watch) = watch {
            watch.release();
        }
    }

    /// Number of shared holders.
    #[must_use]
    pub fn readers(&self) -> usize {
        self.state.lock().readers
    }

    /// True if the lock is held in either mode.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        let state = self.state.lock();
        state.writer || state.readers > 0
    }

    /// True if a writer holds the lock.
    #[must_use]
    pub fn is_locked_exclusive(&self) -> bool {
        self.state.lock().writer
    }

    fn acquire_exclusive(&self, state: &mut RawState) {
        state.writer = true;
        state.write_watch = hold_watch(
            &self.diagnostics,
            Operation::RwLockWrite,
            self.name.as_ref(),
        );
    }

    fn acquire_shared(&self, state: &mut RawState) {
        state.readers = state.readers.saturating_add(1);
        if state.readers == 1 {
            state.read_watch = hold_watch(
                &self.diagnostics,
                Operation::RwLockRead,
                self.name.as_ref(),
            );
        }
    }
}

impl fmt::Debug for RawRwLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("RawRwLock")
            .field("name", &self.name)
            .field("writer", &state.writer)
            .field("readers", &state.readers)
            .field("waiting_writers", &state.waiting_writers)
            .finish()
    }
}
