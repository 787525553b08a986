//! Shared test utilities for debugsync.
//!
//! # Modules
//!
//! - [`mod@must`] - Unwrap helpers with good error messages and `#[track_caller]`
//! - [`assertions`] - Timing assertion macros
//! - [`sink`] - A [`DiagnosticSink`](debugsync::DiagnosticSink) that records events
//! - [`prelude`] - Convenience re-exports
//!
//! # Usage
//!
//! ```toml
//! [dev-dependencies]
//! debugsync-test-helpers = { workspace = true }
//! ```
//!
//! ```rust,ignore
//! use debugsync_test_helpers::prelude::*;
//! ```

#![deny(unsafe_op_in_unsafe_fn)]
#![allow(clippy::unwrap_used, clippy::panic)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod assertions;
pub mod must;
pub mod prelude;
pub mod sink;

pub use must::*;
pub use sink::{CapturingSink, capturing};
