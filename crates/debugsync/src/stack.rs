//! Call-stack snapshots attached to diagnostics.

use std::backtrace::Backtrace;
use std::fmt;
use std::sync::{Arc, OnceLock};

/// Marker appended when a captured stack is cut short.
const TRUNCATION_MARKER: &str = "\n... <stack truncated>";

struct Inner {
    frames: Option<Backtrace>,
    max_bytes: usize,
    text: OnceLock<Box<str>>,
}

/// An opaque, cheaply clonable call-stack snapshot.
///
/// Captured when a watch is armed so that it points at the blocked call site,
/// not at the timer thread that eventually reports it. Frames are resolved
/// to text only when the snapshot is first read, so an unreported watch never
/// pays for symbolization.
#[derive(Clone)]
pub struct Stack(Arc<Inner>);

impl Stack {
    /// Capture the current thread's stack, keeping at most `max_bytes` of text.
    ///
    /// Truncation happens on a character boundary and is marked in the text.
    #[must_use]
    pub fn capture(max_bytes: usize) -> Self {
        Self(Arc::new(Inner {
            frames: Some(Backtrace::force_capture()),
            max_bytes,
            text: OnceLock::new(),
        }))
    }

    #[cfg(test)]
    pub(crate) fn from_text(text: String, max_bytes: usize) -> Self {
        Self(Arc::new(Inner {
            frames: None,
            max_bytes,
            text: OnceLock::from(truncate(text, max_bytes)),
        }))
    }

    /// The stack as text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        let inner = &*self.0;
        inner.text.get_or_init(|| {
            let text = inner
                .frames
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_default();
            truncate(text, inner.max_bytes)
        })
    }

    /// True if the snapshot was cut short.
    #[must_use]
    pub fn is_truncated(&self) -> bool {
        self.as_str().ends_with(TRUNCATION_MARKER)
    }
}

fn truncate(mut text: String, max_bytes: usize) -> Box<str> {
    if text.len() > max_bytes {
        let mut end = max_bytes;
        while !text.is_char_boundary(end) {
            end = end.saturating_sub(1);
        }
        text.truncate(end);
        text.push_str(TRUNCATION_MARKER);
    }
    text.into_boxed_str()
}

impl PartialEq for Stack {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0) || self.as_str() == other.as_str()
    }
}

impl Eq for Stack {}

impl fmt::Display for Stack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for Stack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stack")
            .field("resolved", &self.0.text.get().is_some())
            .field("max_bytes", &self.0.max_bytes)
            .finish()
    }
}
