//! Unwrap helpers with good error messages.
//!
//! These replace `unwrap()` and `expect()` in test code; `#[track_caller]`
//! keeps the panic location at the call site.

use std::fmt::Debug;

/// Unwrap a `Result`, panicking with the error value on `Err`.
///
/// ```rust
/// use debugsync_test_helpers::must;
///
/// let result: Result<i32, &str> = Ok(42);
/// assert_eq!(must(result), 42);
/// ```
///
/// # Panics
///
/// Panics if the result is `Err`.
#[track_caller]
pub fn must<T, E: Debug>(result: Result<T, E>) -> T {
    match result {
        Ok(v) => v,
        Err(e) => panic!("must: unexpected Err: {e:?}"),
    }
}

/// Unwrap an `Option`, panicking with `msg` on `None`.
///
/// # Panics
///
/// Panics if the option is `None`.
#[track_caller]
pub fn must_some<T>(option: Option<T>, msg: &str) -> T {
    match option {
        Some(v) => v,
        None => panic!("must_some: {msg}"),
    }
}

/// Unwrap a `Result`, panicking with `context` and the error value on `Err`.
///
/// ```rust
/// use debugsync_test_helpers::must_with;
///
/// let result: Result<i32, &str> = Ok(7);
/// assert_eq!(must_with(result, "building channel"), 7);
/// ```
///
/// # Panics
///
/// Panics if the result is `Err`.
#[track_caller]
pub fn must_with<T, E: Debug>(result: Result<T, E>, context: &str) -> T {
    match result {
        Ok(v) => v,
        Err(e) => panic!("{context}: {e:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_must_ok() {
        let result: Result<u8, String> = Ok(1);
        assert_eq!(must(result), 1);
    }

    #[test]
    #[should_panic(expected = "must: unexpected Err")]
    fn test_must_err_panics() {
        let result: Result<u8, &str> = Err("boom");
        must(result);
    }

    #[test]
    #[should_panic(expected = "must_some: missing")]
    fn test_must_some_none_panics() {
        must_some(None::<u8>, "missing");
    }

    #[test]
    #[should_panic(expected = "opening: \"denied\"")]
    fn test_must_with_context() {
        let result: Result<u8, &str> = Err("denied");
        must_with(result, "opening");
    }
}
