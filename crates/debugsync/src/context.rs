//! Caller-supplied deadlines and cancellation.

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::ExpiryCause;

#[derive(Debug)]
struct CancelState {
    trigger: Mutex<Option<Sender<()>>>,
    done: Receiver<()>,
}

impl CancelState {
    fn is_cancelled(&self) -> bool {
        self.trigger.lock().is_none()
    }
}

/// A deadline and/or cancellation signal bounding a blocking operation.
///
/// Cloning is cheap; clones observe the same cancellation.
#[derive(Debug, Clone, Default)]
pub struct Context {
    deadline: Option<Instant>,
    cancel: Option<Arc<CancelState>>,
}

impl Context {
    /// A context that never expires.
    #[must_use]
    pub fn background() -> Self {
        Self::default()
    }

    /// A context that expires `timeout` from now.
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::background().child_with_timeout(timeout)
    }

    /// A context that expires at `deadline`.
    #[must_use]
    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            deadline: Some(deadline),
            cancel: None,
        }
    }

    /// A context that expires when the returned [`Canceller`] fires.
    #[must_use]
    pub fn with_cancel() -> (Self, Canceller) {
        let (trigger, done) = channel::bounded(0);
        let state = Arc::new(CancelState {
            trigger: Mutex::new(Some(trigger)),
            done,
        });
        let ctx = Self {
            deadline: None,
            cancel: Some(Arc::clone(&state)),
        };
        (ctx, Canceller { state })
    }

    /// Derive a context expiring `timeout` from now, or at this context's
    /// deadline if that comes first. Cancellation is shared with `self`.
    #[must_use]
    pub fn child_with_timeout(&self, timeout: Duration) -> Self {
        let now = Instant::now();
        match now.checked_add(timeout) {
            Some(deadline) => self.child_with_deadline(deadline),
            None => self.clone(),
        }
    }

    /// Derive a context expiring at the earlier of `deadline` and this
    /// context's deadline. Cancellation is shared with `self`.
    #[must_use]
    pub fn child_with_deadline(&self, deadline: Instant) -> Self {
        Self {
            deadline: Some(self.deadline.map_or(deadline, |own| own.min(deadline))),
            cancel: self.cancel.clone(),
        }
    }

    /// When this context expires, if ever.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline; zero once it has passed.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// True once the context has been cancelled or its deadline has passed.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.cause().is_some()
    }

    /// Why the context is done, or `None` while it is live.
    ///
    /// Cancellation wins over an elapsed deadline.
    #[must_use]
    pub fn cause(&self) -> Option<ExpiryCause> {
        if self.is_cancelled() {
            return Some(ExpiryCause::Cancelled);
        }
        self.deadline
            .is_some_and(|deadline| Instant::now() >= deadline)
            .then_some(ExpiryCause::DeadlineElapsed)
    }

    /// True once the context has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|state| state.is_cancelled())
    }

    /// A receiver that becomes ready (disconnected) on cancellation, for use in
    /// a caller's own `select!`. Never ready for a context without a canceller.
    #[must_use]
    pub fn done(&self) -> Receiver<()> {
        match &self.cancel {
            Some(state) => state.done.clone(),
            None => channel::never(),
        }
    }

    pub(crate) fn done_ref(&self) -> Option<&Receiver<()>> {
        self.cancel.as_ref().map(|state| &state.done)
    }
}

/// Cancels the [`Context`] it was created with, and every context derived
/// from it.
///
/// Dropping a canceller does not cancel.
#[derive(Debug, Clone)]
pub struct Canceller {
    state: Arc<CancelState>,
}

impl Canceller {
    /// Cancel. Idempotent.
    pub fn cancel(&self) {
        let trigger = self.state.trigger.lock().take();
        drop(trigger);
    }

    /// True once [`cancel`](Self::cancel) has been called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.state.is_cancelled()
    }
}
