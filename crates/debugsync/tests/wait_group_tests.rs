//! Wait-group rendezvous and misuse.

use debugsync::prelude::*;
use debugsync_test_helpers::assert_events;
use debugsync_test_helpers::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[test]
fn test_done_releases_wait() {
    let wg = WaitGroup::with_diagnostics(Diagnostics::silent());
    wg.add(1);

    let worker = wg.clone();
    let handle = thread::spawn(move || worker.done());

    wg.wait();
    assert!(handle.join().is_ok(), "Thread should not panic");
    assert_eq!(wg.count(), 0);
}

#[test]
#[should_panic(expected = "negative")]
fn test_done_without_add_panics() {
    let wg = WaitGroup::with_diagnostics(Diagnostics::silent());
    wg.add(1);

    let worker = wg.clone();
    let handle = thread::spawn(move || worker.done());
    wg.wait();
    assert!(handle.join().is_ok());

    wg.done();
}

#[test]
fn test_many_waiters_released_together() {
    let wg = WaitGroup::with_diagnostics(Diagnostics::silent());
    let released = Arc::new(AtomicUsize::new(0));
    wg.add(3);

    let waiters: Vec<_> = (0..4)
        .map(|_| {
            let wg = wg.clone();
            let released = Arc::clone(&released);
            thread::spawn(move || {
                wg.wait();
                released.fetch_add(1, Ordering::SeqCst);
            })
        })
        .collect();

    thread::sleep(Duration::from_millis(10));
    assert_eq!(released.load(Ordering::SeqCst), 0);
    wg.add(-3);

    for handle in waiters {
        assert!(handle.join().is_ok(), "Thread should not panic");
    }
    assert_eq!(released.load(Ordering::SeqCst), 4);
}

#[test]
fn test_wait_exceeded_then_unblocked() -> TestResult {
    let config = DebugsyncConfig::builder()
        .wait_threshold(Duration::from_millis(10))
        .build()?;
    let (sink, diagnostics) = capturing(config);
    let wg = WaitGroup::named("shutdown", diagnostics);
    wg.add(2);

    for delay in [20_u64, 60] {
        let worker = wg.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(delay));
            worker.done();
        });
    }

    wg.wait();
    assert!(sink.wait_for(EventKind::Unblocked, Duration::from_secs(2)));
    assert_events!(sink, [EventKind::WaitExceeded, EventKind::Unblocked]);

    let exceeded = must_some(sink.events().into_iter().next(), "expected wait exceeded");
    assert_eq!(exceeded.operation, Operation::WaitGroupWait);
    assert_eq!(exceeded.name.as_deref(), Some("shutdown"));
    assert_eq!(exceeded.to_string(), "wait group wait exceeded (shutdown)");
    assert!(exceeded.stack.is_some());
    Ok(())
}

#[test]
fn test_disabled_wait_is_silent() -> TestResult {
    let config = DebugsyncConfig::builder()
        .enabled(false)
        .wait_threshold(Duration::from_millis(1))
        .build()?;
    let (sink, diagnostics) = capturing(config);
    let wg = WaitGroup::with_diagnostics(diagnostics);
    wg.add(1);

    let worker = wg.clone();
    thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        worker.done();
    });
    wg.wait();

    assert!(sink.is_empty());
    Ok(())
}
