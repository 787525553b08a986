//! Timing assertion macros.
//!
//! Blocking behaviour is asserted through elapsed wall-clock time, so these
//! take an `Instant` and bounds rather than exact values.

/// Assert that at least `min` has elapsed since `start`.
///
/// ```rust
/// use debugsync_test_helpers::assert_elapsed_at_least;
/// use std::time::{Duration, Instant};
///
/// let start = Instant::now();
/// std::thread::sleep(Duration::from_millis(2));
/// assert_elapsed_at_least!(start, Duration::from_millis(1));
/// ```
#[macro_export]
macro_rules! assert_elapsed_at_least {
    ($start:expr, $min:expr $(,)?) => {
        let elapsed = $start.elapsed();
        let min = $min;
        if elapsed < min {
            panic!(
                "assertion failed: elapsed >= min\n  elapsed: `{:?}`,\n      min: `{:?}`",
                elapsed, min
            );
        }
    };
}

/// Assert that the time elapsed since `start` lies in `[min, max]`.
///
/// ```rust
/// use debugsync_test_helpers::assert_elapsed_within;
/// use std::time::{Duration, Instant};
///
/// let start = Instant::now();
/// assert_elapsed_within!(start, Duration::ZERO, Duration::from_secs(5));
/// ```
#[macro_export]
macro_rules! assert_elapsed_within {
    ($start:expr, $min:expr, $max:expr $(,)?) => {
        let elapsed = $start.elapsed();
        let min = $min;
        let max = $max;
        if elapsed < min || elapsed > max {
            panic!(
                "assertion failed: min <= elapsed <= max\n  elapsed: `{:?}`,\n      min: `{:?}`,\n      max: `{:?}`",
                elapsed, min, max
            );
        }
    };
}

/// Assert that a [`CapturingSink`](crate::CapturingSink) recorded exactly the
/// given event kinds, in order.
///
/// ```rust
/// use debugsync_test_helpers::{CapturingSink, assert_events};
///
/// let sink = CapturingSink::new();
/// assert_events!(sink, []);
/// ```
#[macro_export]
macro_rules! assert_events {
    ($sink:expr, [$($kind:expr),* $(,)?]) => {
        let actual = $sink.kinds();
        let expected: ::std::vec::Vec<::debugsync::EventKind> = vec![$($kind),*];
        if actual != expected {
            panic!(
                "assertion failed: recorded events differ\n  actual: `{:?}`,\nexpected: `{:?}`",
                actual, expected
            );
        }
    };
}

#[cfg(test)]
mod tests {
    use crate::CapturingSink;
    use debugsync::{DiagnosticEvent, DiagnosticSink, EventKind, Operation};
    use std::time::{Duration, Instant};

    #[test]
    #[should_panic(expected = "elapsed >= min")]
    fn test_at_least_fails_early() {
        assert_elapsed_at_least!(Instant::now(), Duration::from_secs(60));
    }

    #[test]
    #[should_panic(expected = "min <= elapsed <= max")]
    fn test_within_fails_late() {
        let start = Instant::now();
        std::thread::sleep(Duration::from_millis(5));
        assert_elapsed_within!(start, Duration::ZERO, Duration::from_millis(1));
    }

    #[test]
    fn test_assert_events() {
        let sink = CapturingSink::new();
        sink.warn(&DiagnosticEvent {
            kind: EventKind::HeldTooLong,
            operation: Operation::MutexLock,
            name: None,
            threshold: Duration::ZERO,
            elapsed: Duration::ZERO,
            stack: None,
        });
        assert_events!(sink, [EventKind::HeldTooLong]);
    }
}
