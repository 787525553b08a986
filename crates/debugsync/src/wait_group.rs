//! Counter-based rendezvous with wait-exceeded reporting.

use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::Arc;

use crate::diagnostics::{Diagnostics, EventKind, Operation};
use crate::error::misuse;

struct Shared {
    count: Mutex<i64>,
    zero: Condvar,
    diagnostics: Diagnostics,
    name: Option<Arc<str>>,
}

/// Waits for a collection of tasks to finish.
///
/// Clones share the same counter. A [`wait`](Self::wait) that is still
/// blocked after `wait_threshold` is reported; it keeps waiting regardless.
#[derive(Clone)]
pub struct WaitGroup {
    shared: Arc<Shared>,
}

impl Default for WaitGroup {
    fn default() -> Self {
        Self::new()
    }
}

impl WaitGroup {
    /// Create a wait group reporting through [`Diagnostics::default`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_diagnostics(Diagnostics::default())
    }

    /// Create a wait group reporting through `diagnostics`.
    #[must_use]
    pub fn with_diagnostics(diagnostics: Diagnostics) -> Self {
        Self::build(diagnostics, None)
    }

    /// Create a labelled wait group reporting through `diagnostics`.
    #[must_use]
    pub fn named(name: impl Into<Arc<str>>, diagnostics: Diagnostics) -> Self {
        Self::build(diagnostics, Some(name.into()))
    }

    fn build(diagnostics: Diagnostics, name: Option<Arc<str>>) -> Self {
        Self {
            shared: Arc::new(Shared {
                count: Mutex::new(0),
                zero: Condvar::new(),
                diagnostics,
                name,
            }),
        }
    }

    /// Adjust the counter by `delta`, which may be negative. Reaching zero
    /// releases every waiter.
    ///
    /// # Panics
    ///
    /// Panics if the counter would become negative or overflow.
    pub fn add(&self, delta: i64) {
        let mut count = self.shared.count.lock();
        let next = match count.checked_add(delta) {
            Some(next) if next < 0 => misuse("negative wait group counter"),
            Some(next) => next,
            None => misuse("wait group counter overflow"),
        };
        *count = next;
        if next == 0 {
            self.shared.zero.notify_all();
        }
    }

    /// Decrement the counter by one.
    ///
    /// # Panics
    ///
    /// Panics if the counter is already zero.
    pub fn done(&self) {
        self.add(-1);
    }

    /// Block until the counter is zero.
    pub fn wait(&self) {
        let shared = &self.shared;
        if *shared.count.lock() == 0 {
            return;
        }

        let watch = shared.diagnostics.threshold_watch(
            EventKind::WaitExceeded,
            Operation::WaitGroupWait,
            shared.name.as_ref(),
            shared.diagnostics.config().wait_threshold,
        );
        {
            let mut count = shared.count.lock();
            while *count > 0 {
                shared.zero.wait(&mut count);
            }
        }
        if let Some(watch) = watch {
            watch.complete();
        }
    }

    /// Current counter value. A momentary snapshot.
    #[must_use]
    pub fn count(&self) -> i64 {
        *self.shared.count.lock()
    }
}

impl fmt::Debug for WaitGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WaitGroup")
            .field("name", &self.shared.name)
            .field("count", &self.count())
            .finish()
    }
}
