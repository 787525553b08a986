//! Diagnostic events and the sinks that receive them.
//!
//! The watchdog layer speaks a small fixed vocabulary ([`EventKind`]) about a
//! small set of operations ([`Operation`]). Where those events go is up to the
//! [`DiagnosticSink`] handed to each primitive through [`Diagnostics`]; the
//! default [`TracingSink`] forwards them to `tracing`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::DebugsyncConfig;
use crate::stack::Stack;
use crate::timer::{TimerHandle, Watchdog};

/// `tracing` target used for every event emitted by this crate.
pub const LOG_TARGET: &str = "debugsync";

/// Callback invoked instead of the sink's warning when a channel side times out.
pub type ReportCallback = Arc<dyn Fn(&DiagnosticEvent) + Send + Sync>;

/// A watched operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    /// Enqueue on a channel.
    ChannelSend,
    /// Dequeue from a channel.
    ChannelRecv,
    /// Exclusive hold of a mutex.
    MutexLock,
    /// Shared hold of a read/write lock.
    RwLockRead,
    /// Exclusive hold of a read/write lock.
    RwLockWrite,
    /// Blocking wait on a wait group.
    WaitGroupWait,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Operation::ChannelSend => "channel send",
            Operation::ChannelRecv => "channel recv",
            Operation::MutexLock => "mutex",
            Operation::RwLockRead => "rwlock read",
            Operation::RwLockWrite => "rwlock write",
            Operation::WaitGroupWait => "wait group",
        };
        f.write_str(text)
    }
}

/// What happened to a watched operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    /// Still waiting past the threshold (warning).
    Blocked,
    /// A previously reported operation completed (info).
    Unblocked,
    /// A lock has been held past the threshold (warning).
    HeldTooLong,
    /// A wait-group wait is still blocked past the threshold (warning).
    WaitExceeded,
    /// A fail-on-deadline operation gave up (warning).
    Expired,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            EventKind::Blocked => "blocked",
            EventKind::Unblocked => "unblocked",
            EventKind::HeldTooLong => "held too long",
            EventKind::WaitExceeded => "wait exceeded",
            EventKind::Expired => "expired",
        };
        f.write_str(text)
    }
}

/// A single diagnostic, as handed to a [`DiagnosticSink`].
#[derive(Debug, Clone)]
pub struct DiagnosticEvent {
    /// What happened.
    pub kind: EventKind,
    /// To which operation.
    pub operation: Operation,
    /// Label of the primitive, if it has one.
    pub name: Option<Arc<str>>,
    /// The threshold or deadline that was configured for the operation.
    pub threshold: Duration,
    /// Time spent in the operation when the event was emitted.
    pub elapsed: Duration,
    /// Stack of the watched call site, captured when the watch was armed.
    pub stack: Option<Stack>,
}

impl fmt::Display for DiagnosticEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{} {} ({name})", self.operation, self.kind),
            None => write!(f, "{} {}", self.operation, self.kind),
        }
    }
}

/// Destination for diagnostic events.
///
/// Called from the watchdog worker thread as well as from callers' threads.
/// Implementations must not acquire any instrumented lock: the lock being
/// reported may be held by the very thread the event is about.
pub trait DiagnosticSink: Send + Sync {
    /// A slow or failed operation.
    fn warn(&self, event: &DiagnosticEvent);

    /// A confirmation, such as a blocked operation completing.
    fn info(&self, event: &DiagnosticEvent);
}

/// Sink that forwards events to `tracing` under [`LOG_TARGET`].
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl DiagnosticSink for TracingSink {
    fn warn(&self, event: &DiagnosticEvent) {
        tracing::warn!(
            target: LOG_TARGET,
            operation = %event.operation,
            name = event.name.as_deref().unwrap_or_default(),
            elapsed_ms = millis(event.elapsed),
            threshold_ms = millis(event.threshold),
            stack = event.stack.as_ref().map_or("", Stack::as_str),
            "{event}"
        );
    }

    fn info(&self, event: &DiagnosticEvent) {
        tracing::info!(
            target: LOG_TARGET,
            operation = %event.operation,
            name = event.name.as_deref().unwrap_or_default(),
            elapsed_ms = millis(event.elapsed),
            "{event}"
        );
    }
}

/// Sink that drops every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl DiagnosticSink for NoopSink {
    fn warn(&self, _event: &DiagnosticEvent) {}

    fn info(&self, _event: &DiagnosticEvent) {}
}

/// Everything an instrumented primitive needs to report: a sink, a timer
/// service and the layer configuration.
///
/// Cheap to clone; each primitive keeps its own copy.
#[derive(Clone)]
pub struct Diagnostics {
    sink: Arc<dyn DiagnosticSink>,
    watchdog: Watchdog,
    config: Arc<DebugsyncConfig>,
}

impl Default for Diagnostics {
    /// [`TracingSink`], the global [`Watchdog`] and [`DebugsyncConfig::from_env`].
    fn default() -> Self {
        Self::new(Arc::new(TracingSink), DebugsyncConfig::from_env())
    }
}

impl Diagnostics {
    /// Report to `sink` using the global timer service.
    #[must_use]
    pub fn new(sink: Arc<dyn DiagnosticSink>, config: DebugsyncConfig) -> Self {
        Self {
            sink,
            watchdog: Watchdog::global(),
            config: Arc::new(config),
        }
    }

    /// Diagnostics that report nothing, capture no stacks and arm no lock or
    /// wait-group watches.
    #[must_use]
    pub fn silent() -> Self {
        let config = DebugsyncConfig {
            enabled: false,
            capture_stacks: false,
            ..DebugsyncConfig::default()
        };
        Self::new(Arc::new(NoopSink), config)
    }

    /// Use a dedicated timer service instead of the global one.
    #[must_use]
    pub fn with_watchdog(mut self, watchdog: Watchdog) -> Self {
        self.watchdog = watchdog;
        self
    }

    /// The sink events are sent to.
    #[must_use]
    pub fn sink(&self) -> &Arc<dyn DiagnosticSink> {
        &self.sink
    }

    /// The timer service watches are armed on.
    #[must_use]
    pub fn watchdog(&self) -> &Watchdog {
        &self.watchdog
    }

    /// The layer configuration.
    #[must_use]
    pub fn config(&self) -> &DebugsyncConfig {
        &self.config
    }

    /// True when lock and wait-group watches are armed.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    fn capture_stack(&self) -> Option<Stack> {
        self.config
            .capture_stacks
            .then(|| Stack::capture(self.config.max_stack_bytes))
    }

    fn event(
        &self,
        kind: EventKind,
        operation: Operation,
        name: Option<&Arc<str>>,
        threshold: Duration,
    ) -> DiagnosticEvent {
        DiagnosticEvent {
            kind,
            operation,
            name: name.cloned(),
            threshold,
            elapsed: Duration::ZERO,
            stack: self.capture_stack(),
        }
    }

    /// Arm a watch that reports `kind` at `deadline` unless completed first.
    ///
    /// The stack is captured here, on the caller's thread.
    pub(crate) fn watch(
        &self,
        kind: EventKind,
        operation: Operation,
        name: Option<&Arc<str>>,
        deadline: Instant,
        redirect: Option<&ReportCallback>,
    ) -> Watch {
        let started = Instant::now();
        let event = self.event(
            kind,
            operation,
            name,
            deadline.saturating_duration_since(started),
        );

        let mut report = event.clone();
        let sink = Arc::clone(&self.sink);
        let redirect = redirect.cloned();
        let timer = self.watchdog.arm_at(deadline, move || {
            report.elapsed = started.elapsed();
            match redirect {
                Some(callback) => callback(&report),
                None => sink.warn(&report),
            }
        });

        Watch {
            timer,
            started,
            sink: Arc::clone(&self.sink),
            event,
        }
    }

    /// Arm a watch `threshold` from now if lock and wait-group watches are
    /// enabled.
    pub(crate) fn threshold_watch(
        &self,
        kind: EventKind,
        operation: Operation,
        name: Option<&Arc<str>>,
        threshold: Duration,
    ) -> Option<Watch> {
        if !self.is_enabled() {
            return None;
        }
        let deadline = Instant::now().checked_add(threshold)?;
        Some(self.watch(kind, operation, name, deadline, None))
    }

    /// Report a fail-on-deadline operation that gave up after `waited`.
    pub(crate) fn report_expired(
        &self,
        operation: Operation,
        name: Option<&Arc<str>>,
        threshold: Duration,
        waited: Duration,
        redirect: Option<&ReportCallback>,
    ) {
        let mut event = self.event(EventKind::Expired, operation, name, threshold);
        event.elapsed = waited;
        match redirect {
            Some(callback) => callback(&event),
            None => self.sink.warn(&event),
        }
    }
}

impl fmt::Debug for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Diagnostics")
            .field("watchdog", &self.watchdog)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// An armed watch over one blocking operation or critical section.
#[derive(Debug)]
pub(crate) struct Watch {
    timer: TimerHandle,
    started: Instant,
    sink: Arc<dyn DiagnosticSink>,
    event: DiagnosticEvent,
}

impl Watch {
    /// The watched operation completed. If the watch already reported, follow
    /// up with an "unblocked" confirmation, ordered after the report.
    pub(crate) fn complete(self) {
        let Watch {
            timer,
            started,
            sink,
            mut event,
        } = self;
        event.kind = EventKind::Unblocked;
        event.elapsed = started.elapsed();
        event.stack = None;
        timer.cancel_then(move || sink.info(&event));
    }

    /// The watched critical section ended; no confirmation is emitted.
    pub(crate) fn release(self) {
        self.timer.cancel();
    }

    /// Report now instead of at the deadline. No-op if already reported.
    pub(crate) fn report_now(&self) {
        self.timer.trigger();
    }
}

impl fmt::Debug for dyn DiagnosticSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DiagnosticSink")
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::{DiagnosticEvent, DiagnosticSink, EventKind};
    use parking_lot::Mutex;
    use std::thread;
    use std::time::{Duration, Instant};

    /// Records events in arrival order for unit tests.
    #[derive(Debug, Default)]
    pub(crate) struct RecordingSink {
        events: Mutex<Vec<DiagnosticEvent>>,
    }

    impl RecordingSink {
        pub(crate) fn kinds(&self) -> Vec<EventKind> {
            self.events.lock().iter().map(|event| event.kind).collect()
        }

        pub(crate) fn count(&self, kind: EventKind) -> usize {
            self.events
                .lock()
                .iter()
                .filter(|event| event.kind == kind)
                .count()
        }

        pub(crate) fn events(&self) -> Vec<DiagnosticEvent> {
            self.events.lock().clone()
        }

        pub(crate) fn wait_for(&self, kind: EventKind, limit: Duration) -> bool {
            let start = Instant::now();
            while start.elapsed() < limit {
                if self.count(kind) > 0 {
                    return true;
                }
                thread::sleep(Duration::from_millis(1));
            }
            self.count(kind) > 0
        }
    }

    impl DiagnosticSink for RecordingSink {
        fn warn(&self, event: &DiagnosticEvent) {
            self.events.lock().push(event.clone());
        }

        fn info(&self, event: &DiagnosticEvent) {
            self.events.lock().push(event.clone());
        }
    }
}
