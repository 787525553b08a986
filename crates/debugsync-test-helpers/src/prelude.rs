//! Convenience re-exports for common test utilities.
//!
//! ```rust,ignore
//! use debugsync_test_helpers::prelude::*;
//! ```

pub use crate::must::{must, must_some, must_with};
pub use crate::sink::{CapturingSink, capturing};

pub type TestResult = Result<(), Box<dyn std::error::Error>>;
