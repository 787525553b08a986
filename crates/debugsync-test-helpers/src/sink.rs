//! Recording sink for asserting on diagnostics.

use debugsync::{
    DebugsyncConfig, DiagnosticEvent, DiagnosticSink, Diagnostics, EventKind, Operation, Watchdog,
};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A [`DiagnosticSink`] that records every event in arrival order.
///
/// Warnings and infos land in the same log; [`EventKind`] tells them apart.
#[derive(Debug, Default)]
pub struct CapturingSink {
    events: Mutex<Vec<DiagnosticEvent>>,
    arrived: Condvar,
}

impl CapturingSink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every recorded event.
    pub fn events(&self) -> Vec<DiagnosticEvent> {
        self.events.lock().clone()
    }

    /// Kinds of every recorded event, in order.
    pub fn kinds(&self) -> Vec<EventKind> {
        self.events.lock().iter().map(|event| event.kind).collect()
    }

    /// Number of events of `kind`.
    pub fn count(&self, kind: EventKind) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|event| event.kind == kind)
            .count()
    }

    /// True if an event of `kind` about `operation` was recorded.
    pub fn contains(&self, kind: EventKind, operation: Operation) -> bool {
        self.events
            .lock()
            .iter()
            .any(|event| event.kind == kind && event.operation == operation)
    }

    /// True if nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    /// Forget every recorded event.
    pub fn clear(&self) {
        self.events.lock().clear();
    }

    /// Wait up to `timeout` for an event of `kind`. Returns true once one has
    /// been recorded.
    pub fn wait_for(&self, kind: EventKind, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut events = self.events.lock();
        while !events.iter().any(|event| event.kind == kind) {
            if self.arrived.wait_until(&mut events, deadline).timed_out() {
                return events.iter().any(|event| event.kind == kind);
            }
        }
        true
    }

    fn record(&self, event: &DiagnosticEvent) {
        self.events.lock().push(event.clone());
        self.arrived.notify_all();
    }
}

impl DiagnosticSink for CapturingSink {
    fn warn(&self, event: &DiagnosticEvent) {
        self.record(event);
    }

    fn info(&self, event: &DiagnosticEvent) {
        self.record(event);
    }
}

/// A capturing sink wired into [`Diagnostics`] with a private [`Watchdog`],
/// so timers from other tests never interleave.
pub fn capturing(config: DebugsyncConfig) -> (Arc<CapturingSink>, Diagnostics) {
    let sink = Arc::new(CapturingSink::new());
    let diagnostics = Diagnostics::new(sink.clone(), config).with_watchdog(Watchdog::new());
    (sink, diagnostics)
}
