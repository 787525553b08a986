//! Mutual exclusion with held-too-long reporting.
//!
//! [`Mutex`] wraps `parking_lot::Mutex` and ties the watch to the guard, so
//! releasing an unheld lock cannot be expressed. [`RawMutex`] keeps the
//! explicit `lock`/`unlock` pair for code that needs to release from a
//! different scope or thread; misusing it panics.

use parking_lot::{Condvar, Mutex as PlMutex, MutexGuard as PlMutexGuard};
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use crate::diagnostics::{Diagnostics, EventKind, Operation, Watch};
use crate::error::misuse;

/// A mutual exclusion lock that reports holders exceeding the configured
/// `lock_hold_threshold`.
pub struct Mutex<T> {
    name: Option<Arc<str>>,
    diagnostics: Diagnostics,
    inner: PlMutex<T>,
}

impl<T> Mutex<T> {
    /// Create a mutex reporting through [`Diagnostics::default`].
    pub fn new(value: T) -> Self {
        Self::with_diagnostics(value, Diagnostics::default())
    }

    /// Create a mutex reporting through `diagnostics`.
    pub fn with_diagnostics(value: T, diagnostics: Diagnostics) -> Self {
        Self {
            name: None,
            diagnostics,
            inner: PlMutex::new(value),
        }
    }

    /// Label the mutex in diagnostics.
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

    /// Block until the lock is acquired. Never times out.
    pub fn lock(&self) -> MutexGuard<'_, T> {
        let guard = self.inner.lock();
        MutexGuard {
            watch: self.hold_watch(),
            guard,
        }
    }

    /// Acquire the lock only if it is free right now.
    pub fn try_lock(&self) -> Option<MutexGuard<'_, T>> {
        let guard = self.inner.try_lock()?;
        Some(MutexGuard {
            watch: self.hold_watch(),
            guard,
        })
    }

    /// True if some thread holds the lock.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.inner.is_locked()
    }

    /// Mutable access without locking; the borrow proves exclusivity.
    pub fn get_mut(&mut self) -> &mut T {
        self.inner.get_mut()
    }

    /// Consume the mutex, returning the protected value.
    pub fn into_inner(self) -> T {
        self.inner.into_inner()
    }

    fn hold_watch(&self) -> Option<Watch> {
        self.diagnostics.threshold_watch(
            EventKind::HeldTooLong,
            Operation::MutexLock,
            self.name.as_ref(),
            self.diagnostics.config().lock_hold_threshold,
        )
    }
}

impl<T: Default> Default for Mutex<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: fmt::Debug> fmt::Debug for Mutex<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mutex")
            .field("name", &self.name)
            .field("inner", &self.inner)
            .finish()
    }
}

/// Scoped hold of a [`Mutex`]. Dropping it releases the lock and its watch.
#[must_use = "if unused the Mutex will immediately unlock"]
pub struct MutexGuard<'a, T> {
    watch: Option<Watch>,
    guard: PlMutexGuard<'a, T>,
}

impl<T> Deref for MutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for MutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

impl<T> Drop for MutexGuard<'_, T> {
    fn drop(&mut self) {
        if let Some(watch) = self.watch.take() {
            watch.release();
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for MutexGuard<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.guard, f)
    }
}

#[derive(Debug, Default)]
struct RawState {
    locked: bool,
    next_ticket: u64,
    serving: u64,
    watch: Option<Watch>,
}

/// A data-less mutex with an explicit `lock`/`unlock` pair.
///
/// Unlike a guard-based lock it may be released from another thread.
/// Blocked callers acquire in arrival order, so a busy holder that keeps
/// relocking cannot starve them.
pub struct RawMutex {
    name: Option<Arc<str>>,
    diagnostics: Diagnostics,
    state: PlMutex<RawState>,
    released: Condvar,
}

impl Default for RawMutex {
    fn default() -> Self {
        Self::new()
    }
}

impl RawMutex {
    /// Create an unlocked mutex reporting through [`Diagnostics::default`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_diagnostics(Diagnostics::default())
    }

    /// Create an unlocked mutex reporting through `diagnostics`.
    #[must_use]
    pub fn with_diagnostics(diagnostics: Diagnostics) -> Self {
        Self {
            name: None,
            diagnostics,
            state: PlMutex::new(RawState::default()),
            released: Condvar::new(),
        }
    }

    /// Label the mutex in diagnostics.
    #[must_use]
    pub fn named(mut self, name: impl Into<Arc<str>>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Block until the lock is acquired. Never times out.
    pub fn lock(&self) {
        let mut state = self.state.lock();
        let ticket = state.next_ticket;
        state.next_ticket = ticket.wrapping_add(1);
        while state.locked || state.serving != ticket {
            self.released.wait(&mut state);
        }
        self.acquire(&mut state);
    }

    /// Acquire the lock only if it is free right now.
    #[must_use]
    pub fn try_lock(&self) -> bool {
        let mut state = self.state.lock();
        if state.locked || state.serving != state.next_ticket {
            return false;
        }
        state.next_ticket = state.next_ticket.wrapping_add(1);
        self.acquire(&mut state);
        true
    }

    /// Release the lock.
    ///
    /// # Panics
    ///
    /// Panics if the lock is not held.
    pub fn unlock(&self) {
        let watch = {
            let mut state = self.state.lock();
            if !state.locked {
                misuse("unlock of unlocked mutex");
            }
            state.locked = false;
            state.watch.take()
        };
        self.released.notify_all();
        if let Some(watch) = watch {
            watch.release();
        }
    }

    /// True if the lock is held.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.state.lock().locked
    }

    fn acquire(&self, state: &mut RawState) {
        state.locked = true;
        state.serving = state.serving.wrapping_add(1);
        state.watch = self.diagnostics.threshold_watch(
            EventKind::HeldTooLong,
            Operation::MutexLock,
            self.name.as_ref(),
            self.diagnostics.config().lock_hold_threshold,
        );
    }
}

impl fmt::Debug for RawMutex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawMutex")
            .field("name", &self.name)
            .field("locked", &self.is_locked())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DebugsyncConfig;
    use crate::diagnostics::testing::RecordingSink;
    use crate::error::SyncResult;
    use crate::timer::Watchdog;
    use std::thread;
    use std::time::Duration;

    fn diagnostics(sink: &Arc<RecordingSink>, threshold: Duration) -> SyncResult<Diagnostics> {
        let config = DebugsyncConfig::builder()
            .lock_hold_threshold(threshold)
            .build()?;
        Ok(Diagnostics::new(sink.clone(), config).with_watchdog(Watchdog::new()))
    }

    #[test]
    fn test_guard_protects_value() -> SyncResult<()> {
        let sink = Arc::new(RecordingSink::default());
        let mutex = Arc::new(Mutex::with_diagnostics(0_u32, diagnostics(&sink, Duration::from_secs(60))?));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let mutex = Arc::clone(&mutex);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        *mutex.lock() += 1;
                    }
                })
            })
            .collect();
        for handle in handles {
            assert!(handle.join().is_ok());
        }

        assert_eq!(*mutex.lock(), 8000);
        assert!(sink.kinds().is_empty());
        Ok(())
    }

    #[test]
    fn test_try_lock() {
        let mutex = Mutex::with_diagnostics((), Diagnostics::silent());
        let guard = mutex.lock();
        assert!(mutex.is_locked());
        assert!(mutex.try_lock().is_none());
        drop(guard);
        assert!(mutex.try_lock().is_some());
        assert!(!mutex.is_locked());
    }

    #[test]
    fn test_held_too_long_reported_once() -> SyncResult<()> {
        let sink = Arc::new(RecordingSink::default());
        let mutex = Mutex::with_diagnostics(1, diagnostics(&sink, Duration::from_millis(10))?)
            .named("state");

        let guard = mutex.lock();
        assert!(sink.wait_for(EventKind::HeldTooLong, Duration::from_secs(2)));
        drop(guard);

        thread::sleep(Duration::from_millis(20));
        assert_eq!(sink.kinds(), vec![EventKind::HeldTooLong]);
        let events = sink.events();
        assert!(events.iter().all(|e| e.name.as_deref() == Some("state")));
        assert!(events.iter().all(|e| e.stack.is_some()));
        Ok(())
    }

    #[test]
    fn test_disabled_arms_nothing() -> SyncResult<()> {
        let sink = Arc::new(RecordingSink::default());
        let config = DebugsyncConfig::builder()
            .enabled(false)
            .lock_hold_threshold(Duration::from_millis(1))
            .build()?;
        let watchdog = Watchdog::new();
        let diagnostics = Diagnostics::new(sink.clone(), config).with_watchdog(watchdog.clone());
        let mutex = Mutex::with_diagnostics((), diagnostics);

        let _guard = mutex.lock();
        assert_eq!(watchdog.pending(), 0);
        thread::sleep(Duration::from_millis(10));
        assert!(sink.kinds().is_empty());
        Ok(())
    }

    #[test]
    fn test_into_inner_and_get_mut() {
        let mut mutex = Mutex::with_diagnostics(vec![1], Diagnostics::silent());
        mutex.get_mut().push(2);
        assert_eq!(mutex.into_inner(), vec![1, 2]);
    }

    #[test]
    fn test_raw_lock_unlock() {
        let mutex = RawMutex::with_diagnostics(Diagnostics::silent());
        mutex.lock();
        assert!(mutex.is_locked());
        assert!(!mutex.try_lock());
        mutex.unlock();
        assert!(mutex.try_lock());
        mutex.unlock();
        assert!(!mutex.is_locked());
    }

    #[test]
    fn test_raw_unlock_from_other_thread() {
        let mutex = Arc::new(RawMutex::with_diagnostics(Diagnostics::silent()));
        mutex.lock();
        let other = Arc::clone(&mutex);
        assert!(thread::spawn(move || other.unlock()).join().is_ok());
        assert!(!mutex.is_locked());
    }

    #[test]
    fn test_raw_release_cancels_watch() -> SyncResult<()> {
        let sink = Arc::new(RecordingSink::default());
        let mutex = RawMutex::with_diagnostics(diagnostics(&sink, Duration::from_millis(20))?);
        mutex.lock();
        mutex.unlock();
        thread::sleep(Duration::from_millis(50));
        assert!(sink.kinds().is_empty());
        Ok(())
    }

    #[test]
    #[should_panic(expected = "unlock of unlocked mutex")]
    fn test_raw_unlock_unlocked_panics() {
        RawMutex::with_diagnostics(Diagnostics::silent()).unlock();
    }

    #[test]
    #[should_panic(expected = "unlock of unlocked mutex")]
    fn test_raw_double_unlock_panics() {
        let mutex = RawMutex::with_diagnostics(Diagnostics::silent());
        mutex.lock();
        mutex.unlock();
        mutex.unlock();
    }
}
