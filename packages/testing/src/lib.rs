#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(coverage_nightly, coverage(off))] // This is all test code, no need to test it.

//! Private helpers for testing message-passing code in this workspace.
//!
//! Code that coordinates several ranks deadlocks instead of failing when it is wrong, so
//! every multi-rank test runs under a watchdog that turns a hang into a test failure.

use std::sync::mpsc;
use std::thread;
use std::time::Duration;

/// Timeout applied by [`with_watchdog()`] under normal conditions.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Runs a test with a timeout to prevent infinite hangs.
///
/// The timeout is [`DEFAULT_TIMEOUT`] under normal conditions and 60 seconds under Miri,
/// where thread synchronization primitives are significantly slower.
///
/// When the `MUTATION_TESTING` environment variable is set to "1", the watchdog
/// is disabled and the test function is executed directly. This allows mutation
/// testing to properly detect hanging mutations.
///
/// # Panics
///
/// Panics if the test exceeds the timeout (when not in mutation testing mode).
///
/// # Example
///
/// ```rust
/// use testing::with_watchdog;
///
/// with_watchdog(|| {
///     // Your test code here
///     assert_eq!(2 + 2, 4);
/// });
/// ```
pub fn with_watchdog<F, R>(test_fn: F) -> R
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    // Miri is dramatically slower for thread synchronization, so we use a
    // longer timeout to avoid false positives while still catching real hangs.
    let timeout = if cfg!(miri) {
        Duration::from_secs(60)
    } else {
        DEFAULT_TIMEOUT
    };

    with_watchdog_timeout(timeout, test_fn)
}

/// Runs a test with a custom timeout to prevent infinite hangs.
///
/// Use this for tests that legitimately run for a long time, such as benchmark runs with many
/// iterations. Behaves like [`with_watchdog()`] otherwise.
///
/// # Panics
///
/// Panics if the test exceeds `timeout` (when not in mutation testing mode).
pub fn with_watchdog_timeout<F, R>(timeout: Duration, test_fn: F) -> R
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    // Check if we are running under mutation testing.
    if std::env::var("MUTATION_TESTING").as_deref() == Ok("1") {
        // Under mutation testing, disable the watchdog to allow hanging mutations.
        return test_fn();
    }

    let (tx, rx) = mpsc::channel();

    let test_handle = thread::spawn(move || {
        let result = test_fn();
        // If this fails, the receiver has timed out.
        drop(tx.send(result));
    });

    match rx.recv_timeout(timeout) {
        Ok(result) => {
            test_handle.join().expect("Test thread should not panic");
            result
        }
        Err(mpsc::RecvTimeoutError::Timeout) => {
            // A hang in a multi-rank test almost always means mismatched sends and receives.
            panic!("Test exceeded {timeout:?} timeout, ranks are probably deadlocked");
        }
        Err(mpsc::RecvTimeoutError::Disconnected) => {
            // Thread panicked, join it to get the panic
            match test_handle.join() {
                Ok(()) => panic!("Test thread disconnected unexpectedly"),
                Err(e) => std::panic::resume_unwind(e),
            }
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn watchdog_returns_correct_value() {
        let result = with_watchdog(|| "hello world");
        assert_eq!(result, "hello world");
    }

    #[test]
    fn custom_timeout_allows_fast_tests() {
        let result = with_watchdog_timeout(Duration::from_secs(1), || 42);
        assert_eq!(result, 42);
    }

    #[test]
    #[should_panic]
    fn watchdog_propagates_test_panics() {
        with_watchdog(|| {
            let ranks_agreed = false;
            assert!(ranks_agreed, "test failure");
        });
    }
}
