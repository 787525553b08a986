//! Bounded FIFO channel with blocked-operation reporting.
//!
//! Every blocking operation first tries a non-blocking enqueue or dequeue and
//! only arms a watch when it actually has to wait. What happens once the wait
//! crosses its deadline depends on the channel's [`Policy`]:
//!
//! - [`Policy::WaitAndReport`] keeps waiting, reports "blocked" and, once the
//!   operation completes, "unblocked".
//! - [`Policy::FailOnDeadline`] reports "expired" and hands the failure (and,
//!   for sends, the element) back to the caller.
//!
//! The `*_until` and `try_*` operations never report; they only return typed
//! failures.

use crossbeam::channel::{self, Receiver, Select, SelectedOperation, Sender, TrySendError};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::{ChannelConfig, Policy};
use crate::context::Context;
use crate::diagnostics::{DiagnosticEvent, Diagnostics, EventKind, Operation, ReportCallback};
use crate::error::{ExpiryCause, SendError, SyncError, SyncResult};

/// Replacements for the sink's warning when a channel side times out.
///
/// "unblocked" confirmations still go to the sink.
#[derive(Clone, Default)]
pub struct TimeoutCallbacks {
    /// Called instead of the warning for a slow or expired send.
    pub on_send: Option<ReportCallback>,
    /// Called instead of the warning for a slow or expired receive.
    pub on_recv: Option<ReportCallback>,
}

impl TimeoutCallbacks {
    /// Set the send-side callback.
    #[must_use]
    pub fn on_send<F>(mut self, callback: F) -> Self
    where
        F: Fn(&DiagnosticEvent) + Send + Sync + 'static,
    {
        self.on_send = Some(Arc::new(callback));
        self
    }

    /// Set the receive-side callback.
    #[must_use]
    pub fn on_recv<F>(mut self, callback: F) -> Self
    where
        F: Fn(&DiagnosticEvent) + Send + Sync + 'static,
    {
        self.on_recv = Some(Arc::new(callback));
        self
    }
}

impl fmt::Debug for TimeoutCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimeoutCallbacks")
            .field("on_send", &self.on_send.is_some())
            .field("on_recv", &self.on_recv.is_some())
            .finish()
    }
}

/// Why a raw wait stopped without completing.
enum Interrupt {
    Elapsed,
    Cancelled,
    Disconnected,
}

impl Interrupt {
    fn into_error(self, operation: Operation, waited: Duration) -> SyncError {
        match self {
            Interrupt::Elapsed => {
                SyncError::expired(operation, ExpiryCause::DeadlineElapsed, waited)
            }
            Interrupt::Cancelled => SyncError::expired(operation, ExpiryCause::Cancelled, waited),
            Interrupt::Disconnected => SyncError::disconnected(operation),
        }
    }
}

fn deadline_after(timeout: Duration) -> Option<Instant> {
    Instant::now().checked_add(timeout)
}

fn select_until<'a>(
    select: &mut Select<'a>,
    deadline: Option<Instant>,
) -> Option<SelectedOperation<'a>> {
    match deadline {
        Some(deadline) => select.select_deadline(deadline).ok(),
        None => Some(select.select()),
    }
}

struct Shared {
    config: ChannelConfig,
    name: Option<Arc<str>>,
    diagnostics: Diagnostics,
    callbacks: TimeoutCallbacks,
}

/// An instrumented bounded channel.
///
/// Clones share the same queue, like cloning both ends of a crossbeam channel.
pub struct Channel<T> {
    tx: Sender<T>,
    rx: Receiver<T>,
    shared: Arc<Shared>,
}

impl<T> Clone for Channel<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            rx: self.rx.clone(),
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> fmt::Debug for Channel<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("name", &self.shared.name)
            .field("capacity", &self.shared.config.capacity)
            .field("len", &self.rx.len())
            .field("policy", &self.shared.config.policy)
            .field("timeout", &self.shared.config.timeout)
            .finish()
    }
}

impl<T> Channel<T> {
    /// Create a channel reporting through [`Diagnostics::default`].
    ///
    /// # Errors
    ///
    /// Returns an error if `config` is invalid.
    pub fn new(config: ChannelConfig) -> SyncResult<Self> {
        Self::with_diagnostics(config, Diagnostics::default())
    }

    /// Shorthand for a wait-and-report channel of `capacity` elements.
    ///
    /// # Errors
    ///
    /// Returns an error if `timeout` is zero.
    pub fn bounded(capacity: usize, timeout: Duration) -> SyncResult<Self> {
        Self::new(ChannelConfig::new(capacity, timeout))
    }

    /// Create a channel reporting through `diagnostics`.
    ///
    /// # Errors
    ///
    /// Returns an error if `config` is invalid.
    pub fn with_diagnostics(config: ChannelConfig, diagnostics: Diagnostics) -> SyncResult<Self> {
        Self::with_callbacks(config, diagnostics, TimeoutCallbacks::default())
    }

    /// Create a channel whose timeout reports go to `callbacks` where set.
    ///
    /// # Errors
    ///
    /// Returns an error if `config` is invalid.
    pub fn with_callbacks(
        config: ChannelConfig,
        diagnostics: Diagnostics,
        callbacks: TimeoutCallbacks,
    ) -> SyncResult<Self> {
        config.validate()?;
        let (tx, rx) = channel::bounded(config.capacity);
        let name = config.name.as_deref().map(Arc::from);
        Ok(Self {
            tx,
            rx,
            shared: Arc::new(Shared {
                config,
                name,
                diagnostics,
                callbacks,
            }),
        })
    }

    /// Enqueue `value`, following the channel policy with its configured
    /// timeout.
    ///
    /// # Errors
    ///
    /// Under [`Policy::FailOnDeadline`], returns the element with an expiry
    /// once the timeout passes. Never fails under [`Policy::WaitAndReport`]
    /// unless every receiver is gone.
    pub fn send(&self, value: T) -> Result<(), SendError<T>> {
        let timeout = self.shared.config.timeout;
        let deadline = deadline_after(timeout);
        match self.shared.config.policy {
            Policy::WaitAndReport => self.send_reporting(value, deadline, None),
            Policy::FailOnDeadline => self.send_failing(value, deadline, None, timeout, true),
        }
    }

    /// Enqueue `value`, bounded by `ctx` instead of the configured timeout.
    ///
    /// Under [`Policy::WaitAndReport`] the context's deadline is the reporting
    /// threshold (the configured timeout when it has none) and cancellation
    /// reports immediately; the send still waits for room.
    ///
    /// # Errors
    ///
    /// Under [`Policy::FailOnDeadline`], returns the element with an expiry
    /// once `ctx` is done.
    pub fn send_ctx(&self, value: T, ctx: &Context) -> Result<(), SendError<T>> {
        match self.shared.config.policy {
            Policy::WaitAndReport => {
                let deadline = ctx
                    .deadline()
                    .or_else(|| deadline_after(self.shared.config.timeout));
                self.send_reporting(value, deadline, ctx.done_ref())
            }
            Policy::FailOnDeadline => {
                let threshold = ctx.remaining().unwrap_or_default();
                self.send_failing(value, ctx.deadline(), ctx.done_ref(), threshold, true)
            }
        }
    }

    /// Enqueue `value`, giving up after `timeout` whatever the channel policy.
    ///
    /// # Errors
    ///
    /// Returns the element with an expiry once `timeout` passes.
    pub fn send_timeout(&self, value: T, timeout: Duration) -> Result<(), SendError<T>> {
        self.send_failing(value, deadline_after(timeout), None, timeout, true)
    }

    /// Enqueue `value` unless `ctx` is done first. Never reports.
    ///
    /// # Errors
    ///
    /// Returns the element with an expiry once `ctx` is done.
    pub fn send_until(&self, value: T, ctx: &Context) -> Result<(), SendError<T>> {
        let threshold = ctx.remaining().unwrap_or_default();
        self.send_failing(value, ctx.deadline(), ctx.done_ref(), threshold, false)
    }

    /// Enqueue `value` only if there is room right now. Never reports.
    ///
    /// # Errors
    ///
    /// Returns the element with a [`ExpiryCause::DeadlineElapsed`] expiry if
    /// the channel is full.
    pub fn try_send(&self, value: T) -> Result<(), SendError<T>> {
        self.tx.try_send(value).map_err(|err| match err {
            TrySendError::Full(value) => SendError::new(
                value,
                Interrupt::Elapsed.into_error(Operation::ChannelSend, Duration::ZERO),
            ),
            TrySendError::Disconnected(value) => {
                SendError::new(value, SyncError::disconnected(Operation::ChannelSend))
            }
        })
    }

    /// Dequeue the oldest element, following the channel policy with its
    /// configured timeout.
    ///
    /// # Errors
    ///
    /// Under [`Policy::FailOnDeadline`], returns an expiry once the timeout
    /// passes.
    pub fn recv(&self) -> SyncResult<T> {
        let timeout = self.shared.config.timeout;
        let deadline = deadline_after(timeout);
        match self.shared.config.policy {
            Policy::WaitAndReport => self.recv_reporting(deadline, None),
            Policy::FailOnDeadline => self.recv_failing(deadline, None, timeout, true),
        }
    }

    /// Dequeue, bounded by `ctx` instead of the configured timeout.
    ///
    /// # Errors
    ///
    /// Under [`Policy::FailOnDeadline`], returns an expiry once `ctx` is done.
    pub fn recv_ctx(&self, ctx: &Context) -> SyncResult<T> {
        match self.shared.config.policy {
            Policy::WaitAndReport => {
                let deadline = ctx
                    .deadline()
                    .or_else(|| deadline_after(self.shared.config.timeout));
                self.recv_reporting(deadline, ctx.done_ref())
            }
            Policy::FailOnDeadline => {
                let threshold = ctx.remaining().unwrap_or_default();
                self.recv_failing(ctx.deadline(), ctx.done_ref(), threshold, true)
            }
        }
    }

    /// Dequeue, giving up after `timeout` whatever the channel policy.
    ///
    /// # Errors
    ///
    /// Returns an expiry once `timeout` passes.
    pub fn recv_timeout(&self, timeout: Duration) -> SyncResult<T> {
        self.recv_failing(deadline_after(timeout), None, timeout, true)
    }

    /// Dequeue unless `ctx` is done first. Never reports.
    ///
    /// # Errors
    ///
    /// Returns an expiry once `ctx` is done.
    pub fn recv_until(&self, ctx: &Context) -> SyncResult<T> {
        let threshold = ctx.remaining().unwrap_or_default();
        self.recv_failing(ctx.deadline(), ctx.done_ref(), threshold, false)
    }

    /// Dequeue only if an element is available right now. Never reports.
    ///
    /// # Errors
    ///
    /// Returns a [`ExpiryCause::DeadlineElapsed`] expiry if the channel is
    /// empty.
    pub fn try_recv(&self) -> SyncResult<T> {
        self.rx.try_recv().map_err(|err| {
            if err.is_empty() {
                Interrupt::Elapsed.into_error(Operation::ChannelRecv, Duration::ZERO)
            } else {
                SyncError::disconnected(Operation::ChannelRecv)
            }
        })
    }

    /// Number of queued elements. A momentary snapshot.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// True if nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// True if a send would have to wait.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.tx.is_full()
    }

    /// Buffer capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.shared.config.capacity
    }

    /// Deadline policy.
    #[must_use]
    pub fn policy(&self) -> Policy {
        self.shared.config.policy
    }

    /// Diagnostic label, if any.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.shared.name.as_deref()
    }

    /// The uninstrumented sending end.
    #[must_use]
    pub fn sender(&self) -> Sender<T> {
        self.tx.clone()
    }

    /// The uninstrumented receiving end.
    #[must_use]
    pub fn receiver(&self) -> Receiver<T> {
        self.rx.clone()
    }

    fn send_raw(
        &self,
        value: T,
        deadline: Option<Instant>,
        done: Option<&Receiver<()>>,
    ) -> Result<(), (T, Interrupt)> {
        let mut select = Select::new();
        let _send_index = select.send(&self.tx);
        let done_index = done.map(|done| select.recv(done));

        let Some(oper) = select_until(&mut select, deadline) else {
            return Err((value, Interrupt::Elapsed));
        };
        match done {
            Some(done) if Some(oper.index()) == done_index => {
                let _closed = oper.recv(done);
                Err((value, Interrupt::Cancelled))
            }
            _ => oper
                .send(&self.tx, value)
                .map_err(|err| (err.into_inner(), Interrupt::Disconnected)),
        }
    }

    fn send_reporting(
        &self,
        value: T,
        deadline: Option<Instant>,
        done: Option<&Receiver<()>>,
    ) -> Result<(), SendError<T>> {
        let value = match self.tx.try_send(value) {
            Ok(()) => return Ok(()),
            Err(TrySendError::Full(value)) => value,
            Err(TrySendError::Disconnected(value)) => {
                return Err(SendError::new(
                    value,
                    SyncError::disconnected(Operation::ChannelSend),
                ));
            }
        };

        let shared = &self.shared;
        let watch = deadline.map(|deadline| {
            shared.diagnostics.watch(
                EventKind::Blocked,
                Operation::ChannelSend,
                shared.name.as_ref(),
                deadline,
                shared.callbacks.on_send.as_ref(),
            )
        });

        let result = match self.send_raw(value, None, done) {
            Err((value, Interrupt::Cancelled)) => {
                if let Some(watch) = &watch {
                    watch.report_now();
                }
                self.send_raw(value, None, None)
            }
            other => other,
        };

        if let Some(watch) = watch {
            watch.complete();
        }
        result.map_err(|(value, interrupt)| {
            SendError::new(
                value,
                interrupt.into_error(Operation::ChannelSend, Duration::ZERO),
            )
        })
    }

    fn send_failing(
        &self,
        value: T,
        deadline: Option<Instant>,
        done: Option<&Receiver<()>>,
        threshold: Duration,
        report: bool,
    ) -> Result<(), SendError<T>> {
        let started = Instant::now();
        let value = match self.tx.try_send(value) {
            Ok(()) => return Ok(()),
            Err(TrySendError::Full(value)) => value,
            Err(TrySendError::Disconnected(value)) => {
                return Err(SendError::new(
                    value,
                    SyncError::disconnected(Operation::ChannelSend),
                ));
            }
        };

        self.send_raw(value, deadline, done)
            .map_err(|(value, interrupt)| {
                let waited = started.elapsed();
                let expired = !matches!(interrupt, Interrupt::Disconnected);
                if report && expired {
                    self.shared.diagnostics.report_expired(
                        Operation::ChannelSend,
                        self.shared.name.as_ref(),
                        threshold,
                        waited,
                        self.shared.callbacks.on_send.as_ref(),
                    );
                }
                SendError::new(value, interrupt.into_error(Operation::ChannelSend, waited))
            })
    }

    fn recv_raw(
        &self,
        deadline: Option<Instant>,
        done: Option<&Receiver<()>>,
    ) -> Result<T, Interrupt> {
        let mut select = Select::new();
        let _recv_index = select.recv(&self.rx);
        let done_index = done.map(|done| select.recv(done));

        let Some(oper) = select_until(&mut select, deadline) else {
            return Err(Interrupt::Elapsed);
        };
        match done {
            Some(done) if Some(oper.index()) == done_index => {
                let _closed = oper.recv(done);
                Err(Interrupt::Cancelled)
            }
            _ => oper
                .recv(&self.rx)
                .map_err(|_disconnected| Interrupt::Disconnected),
        }
    }

    fn recv_reporting(
        &self,
        deadline: Option<Instant>,
        done: Option<&Receiver<()>>,
    ) -> SyncResult<T> {
        match self.rx.try_recv() {
            Ok(value) => return Ok(value),
            Err(err) if err.is_disconnected() => {
                return Err(SyncError::disconnected(Operation::ChannelRecv));
            }
            Err(_) => {}
        }

        let shared = &self.shared;
        let watch = deadline.map(|deadline| {
            shared.diagnostics.watch(
                EventKind::Blocked,
                Operation::ChannelRecv,
                shared.name.as_ref(),
                deadline,
                shared.callbacks.on_recv.as_ref(),
            )
        });

        let result = match self.recv_raw(None, done) {
            Err(Interrupt::Cancelled) => {
                if let Some(watch) = &watch {
                    watch.report_now();
                }
                self.recv_raw(None, None)
            }
            other => other,
        };

        if let Some(watch) = watch {
            watch.complete();
        }
        result.map_err(|interrupt| interrupt.into_error(Operation::ChannelRecv, Duration::ZERO))
    }

    fn recv_failing(
        &self,
        deadline: Option<Instant>,
        done: Option<&Receiver<()>>,
        threshold: Duration,
        report: bool,
    ) -> SyncResult<T> {
        let started = Instant::now();
        match self.rx.try_recv() {
            Ok(value) => return Ok(value),
            Err(err) if err.is_disconnected() => {
                return Err(SyncError::disconnected(Operation::ChannelRecv));
            }
            Err(_) => {}
        }

        self.recv_raw(deadline, done).map_err(|interrupt| {
            let waited = started.elapsed();
            let expired = !matches!(interrupt, Interrupt::Disconnected);
            if report && expired {
                self.shared.diagnostics.report_expired(
                    Operation::ChannelRecv,
                    self.shared.name.as_ref(),
                    threshold,
                    waited,
                    self.shared.callbacks.on_recv.as_ref(),
                );
            }
            interrupt.into_error(Operation::ChannelRecv, waited)
        })
    }
}
