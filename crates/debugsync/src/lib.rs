//! # debugsync
//!
//! Drop-in channels, locks and wait-groups that keep their native blocking
//! behaviour but report when an operation blocks, or a lock is held, for
//! longer than a threshold.
//!
//! Every report carries the stack of the blocked call site, captured when the
//! operation started waiting, not when the report fires.
//!
//! ## Architecture
//!
//! - [`timer`] - One-shot watchdog timers fired from a background thread
//! - [`diagnostics`] - Event vocabulary, the [`DiagnosticSink`] seam and the
//!   default `tracing` sink
//! - [`channel`] - Bounded FIFO channel with wait-and-report and
//!   fail-on-deadline policies
//! - [`mutex`] / [`rwlock`] - Locks reporting holders that exceed
//!   `lock_hold_threshold`
//! - [`wait_group`] - Counter rendezvous reporting waits that exceed
//!   `wait_threshold`
//! - [`context`] - Caller deadlines and cancellation
//! - [`config`] / [`error`] - Configuration and error types
//!
//! ## Enabling
//!
//! Channels always report. Lock and wait-group watches are armed only when
//! [`DebugsyncConfig::enabled`] is set; [`DebugsyncConfig::from_env`], used by
//! the `new` constructors, reads it from the `DBGSYNCON` environment variable
//! and leaves it off otherwise.
//!
//! ## Example
//!
//! ```rust
//! use debugsync::prelude::*;
//! use std::time::Duration;
//!
//! let config = ChannelConfig::builder()
//!     .capacity(2)
//!     .timeout(Duration::from_millis(100))
//!     .policy(Policy::FailOnDeadline)
//!     .name("jobs")
//!     .build()?;
//! let jobs: Channel<u32> = Channel::new(config)?;
//!
//! jobs.send(1)?;
//! assert_eq!(jobs.recv()?, 1);
//! assert!(jobs.try_recv().is_err_and(|err| err.is_timeout()));
//!
//! let counter = Mutex::new(0_u32).named("counter");
//! *counter.lock() += 1;
//!
//! let wg = WaitGroup::new();
//! wg.add(1);
//! wg.done();
//! wg.wait();
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![deny(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic_in_result_fn,
    clippy::panic,
    missing_docs,
    missing_debug_implementations
)]
#![warn(clippy::pedantic)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod channel;
pub mod config;
pub mod context;
pub mod diagnostics;
pub mod error;
pub mod mutex;
pub mod rwlock;
pub mod stack;
pub mod timer;
pub mod wait_group;

pub mod prelude;

pub use channel::{Channel, TimeoutCallbacks};
pub use config::{ChannelConfig, ChannelConfigBuilder, DebugsyncConfig, DebugsyncConfigBuilder, Policy};
pub use context::{Canceller, Context};
pub use diagnostics::{
    DiagnosticEvent, DiagnosticSink, Diagnostics, EventKind, LOG_TARGET, NoopSink, Operation,
    ReportCallback, TracingSink,
};
pub use error::{ExpiryCause, SendError, SyncError, SyncResult};
pub use mutex::{Mutex, MutexGuard, RawMutex};
pub use rwlock::{RawRwLock, RwLock, RwLockReadGuard, RwLockWriteGuard};
pub use stack::Stack;
pub use timer::{CancelOutcome, TimerHandle, Watchdog};
pub use wait_group::WaitGroup;
