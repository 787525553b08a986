//! One-shot watchdog timers.
//!
//! A [`Watchdog`] owns a single background thread that fires armed timers in
//! deadline order. Arming pushes onto a min-heap; cancelling flips the timer's
//! state and leaves the heap entry to be discarded lazily, so neither call
//! waits on the worker or on the primitive being watched.
//!
//! Every timer ends in exactly one of two states: it fires (its callback runs
//! once) or it is cancelled (its callback is dropped unrun). Cancelling while
//! the callback is running reports [`CancelOutcome::Fired`]; a follow-up passed
//! to [`TimerHandle::cancel_then`] then runs after the callback returns.

use parking_lot::{Condvar, Mutex};
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::fmt;
use std::mem;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::{Arc, OnceLock, Weak};
use std::thread;
use std::time::{Duration, Instant};

use crate::diagnostics::LOG_TARGET;

/// Name of the timer worker thread.
pub const WORKER_THREAD_NAME: &str = "debugsync-watchdog";

/// Heap size below which cancelled entries are never compacted away.
const COMPACT_MIN_ENTRIES: usize = 64;

/// Stand-in for "never" when `now + after` overflows; `Instant` has no MAX.
const FAR_FUTURE: Duration = Duration::from_secs(30 * 365 * 24 * 60 * 60);

type Callback = Box<dyn FnOnce() + Send + 'static>;

/// Result of cancelling a timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CancelOutcome {
    /// The timer was stopped before its callback ran.
    Cancelled,
    /// The callback has run or is running.
    Fired,
}

impl CancelOutcome {
    /// True if the timer fired.
    #[must_use]
    pub fn fired(self) -> bool {
        self == Self::Fired
    }
}

enum SlotState {
    Armed(Callback),
    Firing { follow_up: Option<Callback> },
    Fired,
    Cancelled,
}

struct Slot {
    deadline: Instant,
    state: Mutex<SlotState>,
}

impl Slot {
    fn is_armed(&self) -> bool {
        matches!(*self.state.lock(), SlotState::Armed(_))
    }

    /// Run the callback if still armed. Returns true if this call fired it.
    fn fire(&self) -> bool {
        let callback = {
            let mut state = self.state.lock();
            match mem::replace(&mut *state, SlotState::Firing { follow_up: None }) {
                SlotState::Armed(callback) => callback,
                other => {
                    *state = other;
                    return false;
                }
            }
        };

        run_guarded(callback);

        let follow_up = {
            let mut state = self.state.lock();
            match mem::replace(&mut *state, SlotState::Fired) {
                SlotState::Firing { follow_up } => follow_up,
                other => {
                    *state = other;
                    None
                }
            }
        };
        if let Some(follow_up) = follow_up {
            run_guarded(follow_up);
        }
        true
    }

    /// Stop the timer, or queue/run `follow_up` if it already fired.
    ///
    /// The flag is true when this call moved the timer out of the armed state.
    fn finish(&self, follow_up: Option<Callback>) -> (CancelOutcome, bool) {
        let mut state = self.state.lock();
        match &mut *state {
            SlotState::Firing { follow_up: queued } => {
                if let Some(next) = follow_up {
                    let chained: Callback = match queued.take() {
                        Some(previous) => Box::new(move || {
                            previous();
                            next();
                        }),
                        None => next,
                    };
                    *queued = Some(chained);
                }
                return (CancelOutcome::Fired, false);
            }
            SlotState::Cancelled => return (CancelOutcome::Cancelled, false),
            SlotState::Armed(_) | SlotState::Fired => {}
        }

        if matches!(*state, SlotState::Fired) {
            drop(state);
            if let Some(follow_up) = follow_up {
                run_guarded(follow_up);
            }
            return (CancelOutcome::Fired, false);
        }

        let discarded = mem::replace(&mut *state, SlotState::Cancelled);
        drop(state);
        drop(discarded);
        (CancelOutcome::Cancelled, true)
    }

    fn discard(&self) {
        let discarded = {
            let mut state = self.state.lock();
            if !matches!(*state, SlotState::Armed(_)) {
                return;
            }
            mem::replace(&mut *state, SlotState::Cancelled)
        };
        drop(discarded);
    }
}

fn run_guarded(callback: Callback) {
    if catch_unwind(AssertUnwindSafe(callback)).is_err() {
        tracing::error!(target: LOG_TARGET, "watchdog callback panicked");
    }
}

struct Entry {
    deadline: Instant,
    seq: u64,
    slot: Arc<Slot>,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.deadline
            .cmp(&other.deadline)
            .then(self.seq.cmp(&other.seq))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WorkerState {
    Idle,
    Running,
    Failed,
}

struct Queue {
    heap: BinaryHeap<Reverse<Entry>>,
    next_seq: u64,
    worker: WorkerState,
    shutdown: bool,
}

struct Shared {
    queue: Mutex<Queue>,
    wakeup: Condvar,
    stale: AtomicUsize,
}

impl Shared {
    fn note_stale(&self) {
        self.stale.fetch_add(1, AtomicOrdering::Relaxed);
    }

    fn forget_stale(&self) {
        let _previous = self
            .stale
            .fetch_update(AtomicOrdering::Relaxed, AtomicOrdering::Relaxed, |n| {
                n.checked_sub(1)
            });
    }

    fn compact_if_needed(&self, queue: &mut Queue) {
        let len = queue.heap.len();
        if len < COMPACT_MIN_ENTRIES {
            return;
        }
        if self.stale.load(AtomicOrdering::Relaxed).saturating_mul(2) > len {
            queue.heap.retain(|Reverse(entry)| entry.slot.is_armed());
            self.stale.store(0, AtomicOrdering::Relaxed);
        }
    }

    fn run(self: Arc<Self>) {
        tracing::debug!(target: LOG_TARGET, "watchdog worker started");
        let mut due: Vec<Arc<Slot>> = Vec::new();
        loop {
            {
                let mut queue = self.queue.lock();
                loop {
                    if queue.shutdown {
                        let pending: Vec<Reverse<Entry>> = queue.heap.drain().collect();
                        drop(queue);
                        for Reverse(entry) in pending {
                            entry.slot.discard();
                        }
                        tracing::debug!(target: LOG_TARGET, "watchdog worker stopped");
                        return;
                    }

                    let now = Instant::now();
                    while queue
                        .heap
                        .peek()
                        .is_some_and(|Reverse(entry)| entry.deadline <= now)
                    {
                        if let Some(Reverse(entry)) = queue.heap.pop() {
                            due.push(entry.slot);
                        }
                    }
                    if !due.is_empty() {
                        break;
                    }

                    match queue.heap.peek().map(|Reverse(entry)| entry.deadline) {
                        Some(deadline) => {
                            let _timed_out = self.wakeup.wait_until(&mut queue, deadline);
                        }
                        None => self.wakeup.wait(&mut queue),
                    }
                }
            }

            for slot in due.drain(..) {
                if !slot.fire() {
                    self.forget_stale();
                }
            }
        }
    }
}

/// Service that fires one-shot timers from a background thread.
///
/// Clones share the same worker. The worker is spawned on the first
/// [`arm`](Self::arm) and stops once every clone is dropped; timers still
/// pending at that point are discarded without firing.
#[derive(Clone)]
pub struct Watchdog {
    owner: Arc<Owner>,
}

struct Owner {
    shared: Arc<Shared>,
}

impl Drop for Owner {
    fn drop(&mut self) {
        self.shared.queue.lock().shutdown = true;
        self.shared.wakeup.notify_all();
    }
}

impl Default for Watchdog {
    fn default() -> Self {
        Self::new()
    }
}

impl Watchdog {
    /// Create a timer service with its own worker thread.
    #[must_use]
    pub fn new() -> Self {
        let shared = Arc::new(Shared {
            queue: Mutex::new(Queue {
                heap: BinaryHeap::new(),
                next_seq: 0,
                worker: WorkerState::Idle,
                shutdown: false,
            }),
            wakeup: Condvar::new(),
            stale: AtomicUsize::new(0),
        });
        Self {
            owner: Arc::new(Owner { shared }),
        }
    }

    /// The process-wide timer service.
    #[must_use]
    pub fn global() -> Self {
        static GLOBAL: OnceLock<Watchdog> = OnceLock::new();
        GLOBAL.get_or_init(Watchdog::new).clone()
    }

    /// Arm a timer that runs `on_fire` once `after` has elapsed.
    pub fn arm<F>(&self, after: Duration, on_fire: F) -> TimerHandle
    where
        F: FnOnce() + Send + 'static,
    {
        let now = Instant::now();
        let deadline = now
            .checked_add(after)
            .or_else(|| now.checked_add(FAR_FUTURE))
            .unwrap_or(now);
        self.arm_at(deadline, on_fire)
    }

    /// Arm a timer that runs `on_fire` at `deadline`.
    ///
    /// A deadline in the past fires as soon as the worker gets to it.
    pub fn arm_at<F>(&self, deadline: Instant, on_fire: F) -> TimerHandle
    where
        F: FnOnce() + Send + 'static,
    {
        let shared = &self.owner.shared;
        let slot = Arc::new(Slot {
            deadline,
            state: Mutex::new(SlotState::Armed(Box::new(on_fire))),
        });

        let wake = {
            let mut queue = shared.queue.lock();
            shared.compact_if_needed(&mut queue);

            let seq = queue.next_seq;
            queue.next_seq = seq.wrapping_add(1);
            let earliest = queue
                .heap
                .peek()
                .is_none_or(|Reverse(entry)| deadline < entry.deadline);
            queue.heap.push(Reverse(Entry {
                deadline,
                seq,
                slot: Arc::clone(&slot),
            }));

            if queue.worker == WorkerState::Idle {
                queue.worker = spawn_worker(Arc::clone(shared));
            }
            earliest
        };
        if wake {
            shared.wakeup.notify_one();
        }

        TimerHandle {
            slot,
            shared: Arc::downgrade(shared),
        }
    }

    /// Number of timers armed and not yet fired or cancelled.
    #[must_use]
    pub fn pending(&self) -> usize {
        let queue = self.owner.shared.queue.lock();
        queue
            .heap
            .iter()
            .filter(|Reverse(entry)| entry.slot.is_armed())
            .count()
    }
}

impl fmt::Debug for Watchdog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let queue = self.owner.shared.queue.lock();
        f.debug_struct("Watchdog")
            .field("queued", &queue.heap.len())
            .field("worker", &queue.worker)
            .finish()
    }
}

fn spawn_worker(shared: Arc<Shared>) -> WorkerState {
    let spawned = thread::Builder::new()
        .name(WORKER_THREAD_NAME.to_string())
        .spawn(move || shared.run());
    match spawned {
        Ok(_detached) => WorkerState::Running,
        Err(error) => {
            tracing::error!(
                target: LOG_TARGET,
                error = %error,
                "failed to spawn watchdog worker; timers will not fire"
            );
            WorkerState::Failed
        }
    }
}

/// Handle to an armed timer. Dropping it cancels the timer.
pub struct TimerHandle {
    slot: Arc<Slot>,
    shared: Weak<Shared>,
}

impl TimerHandle {
    /// Cancel the timer. Idempotent.
    ///
    /// Returns [`CancelOutcome::Fired`] if the callback has already run or is
    /// running; in that case it is not interrupted.
    pub fn cancel(&self) -> CancelOutcome {
        self.finish(None)
    }

    /// Cancel the timer, running `follow_up` only if the timer fired.
    ///
    /// `follow_up` always runs after the fire callback has returned: inline
    /// when the callback is done, otherwise on the worker right after it.
    pub fn cancel_then<F>(&self, follow_up: F) -> CancelOutcome
    where
        F: FnOnce() + Send + 'static,
    {
        self.finish(Some(Box::new(follow_up)))
    }

    fn finish(&self, follow_up: Option<Callback>) -> CancelOutcome {
        let (outcome, newly_stale) = self.slot.finish(follow_up);
        if newly_stale {
            if let Some(shared) = self.shared.upgrade() {
                shared.note_stale();
            }
        }
        outcome
    }

    /// Fire the timer now, on the calling thread, if it is still armed.
    ///
    /// Returns true if this call ran the callback.
    pub fn trigger(&self) -> bool {
        let fired = self.slot.fire();
        if fired {
            if let Some(shared) = self.shared.upgrade() {
                shared.note_stale();
            }
        }
        fired
    }

    /// True once the callback has started.
    #[must_use]
    pub fn has_fired(&self) -> bool {
        matches!(
            *self.slot.state.lock(),
            SlotState::Firing { .. } | SlotState::Fired
        )
    }

    /// True while neither fired nor cancelled.
    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.slot.is_armed()
    }

    /// When the timer is due.
    #[must_use]
    pub fn deadline(&self) -> Instant {
        self.slot.deadline
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl fmt::Debug for TimerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerHandle")
            .field("deadline", &self.slot.deadline)
            .field("armed", &self.is_armed())
            .field("fired", &self.has_fired())
            .finish()
    }
}
