//! Overhead of the watchdog layer on uncontended fast paths.

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use debugsync::prelude::*;
use debugsync::{NoopSink, Watchdog};
use std::hint::black_box;
use std::sync::Arc;
use std::time::Duration;

fn watched() -> Diagnostics {
    Diagnostics::new(Arc::new(NoopSink), DebugsyncConfig::default())
}

fn unstacked() -> Diagnostics {
    let config = DebugsyncConfig {
        capture_stacks: false,
        ..DebugsyncConfig::default()
    };
    Diagnostics::new(Arc::new(NoopSink), config)
}

fn bench_timer(c: &mut Criterion) {
    let watchdog = Watchdog::new();

    c.bench_function("timer_arm_cancel", |b| {
        b.iter(|| {
            let handle = watchdog.arm(black_box(Duration::from_secs(60)), || {});
            handle.cancel()
        });
    });
}

fn bench_mutex(c: &mut Criterion) {
    let mut group = c.benchmark_group("mutex_lock");

    for (label, diagnostics) in [
        ("silent", Diagnostics::silent()),
        ("watched_no_stack", unstacked()),
        ("watched", watched()),
    ] {
        let mutex = Mutex::with_diagnostics(0_u64, diagnostics);
        group.bench_with_input(BenchmarkId::new("guard", label), &mutex, |b, mutex| {
            b.iter(|| *mutex.lock() += black_box(1));
        });
    }

    let raw = RawMutex::with_diagnostics(Diagnostics::silent());
    group.bench_function("raw_silent", |b| {
        b.iter(|| {
            raw.lock();
            raw.unlock();
        });
    });

    group.finish();
}

fn bench_rwlock(c: &mut Criterion) {
    let lock = RwLock::with_diagnostics(vec![0_u8; 64], Diagnostics::silent());

    c.bench_function("rwlock_read_silent", |b| {
        b.iter(|| black_box(lock.read().len()));
    });

    c.bench_function("rwlock_write_silent", |b| {
        b.iter(|| {
            if let Some(first) = lock.write().first_mut() {
                *first = black_box(1);
            }
        });
    });
}

fn bench_channel(c: &mut Criterion) {
    let mut group = c.benchmark_group("channel_roundtrip");

    for policy in [Policy::WaitAndReport, Policy::FailOnDeadline] {
        let config = ChannelConfig::builder()
            .capacity(16)
            .timeout(Duration::from_secs(1))
            .policy(policy)
            .build();
        let Ok(ch) = config.and_then(|config| Channel::with_diagnostics(config, watched())) else {
            continue;
        };

        group.bench_function(format!("{policy:?}"), |b| {
            b.iter(|| {
                let sent = ch.send(black_box(7_u32)).is_ok();
                black_box(sent && ch.recv().is_ok())
            });
        });
    }

    group.finish();
}

fn bench_wait_group(c: &mut Criterion) {
    let wg = WaitGroup::with_diagnostics(Diagnostics::silent());

    c.bench_function("wait_group_add_done_wait", |b| {
        b.iter(|| {
            wg.add(black_box(1));
            wg.done();
            wg.wait();
        });
    });
}

criterion_group!(
    benches,
    bench_timer,
    bench_mutex,
    bench_rwlock,
    bench_channel,
    bench_wait_group,
);

criterion_main!(benches);
