//! Property-based tests for ordering and counting invariants.

use debugsync::prelude::*;
use debugsync::{TimerHandle, Watchdog};
use debugsync_test_helpers::capturing;
use parking_lot::Mutex as PlMutex;
use proptest::prelude::*;
use std::sync::Arc;
use std::time::{Duration, Instant};

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn test_channel_is_fifo_within_capacity(
        values in prop::collection::vec(any::<u32>(), 1..64),
    ) {
        let (sink, diagnostics) = capturing(DebugsyncConfig::default());
        let config = ChannelConfig::new(values.len(), Duration::from_secs(1));
        let ch = Channel::with_diagnostics(config, diagnostics)
            .map_err(|err| TestCaseError::fail(err.to_string()))?;

        for value in &values {
            prop_assert!(ch.try_send(*value).is_ok());
        }
        prop_assert!(ch.is_full());
        prop_assert_eq!(ch.len(), values.len());

        let mut received = Vec::with_capacity(values.len());
        while let Ok(value) = ch.try_recv() {
            received.push(value);
        }
        prop_assert_eq!(received, values);
        prop_assert!(sink.is_empty());
    }

    #[test]
    fn test_interleaved_ops_never_exceed_capacity(
        capacity in 1..16usize,
        ops in prop::collection::vec(any::<bool>(), 0..128),
    ) {
        let ch: Channel<usize> = Channel::with_diagnostics(
            ChannelConfig::new(capacity, Duration::from_secs(1)),
            Diagnostics::silent(),
        )
        .map_err(|err| TestCaseError::fail(err.to_string()))?;

        let mut model = std::collections::VecDeque::new();
        for (i, push) in ops.into_iter().enumerate() {
            if push {
                let accepted = ch.try_send(i).is_ok();
                prop_assert_eq!(accepted, model.len() < capacity);
                if accepted {
                    model.push_back(i);
                }
            } else {
                prop_assert_eq!(ch.try_recv().ok(), model.pop_front());
            }
            prop_assert!(ch.len() <= capacity);
            prop_assert_eq!(ch.len(), model.len());
        }
    }

    #[test]
    fn test_wait_group_balances(deltas in prop::collection::vec(1..100i64, 0..32)) {
        let wg = WaitGroup::with_diagnostics(Diagnostics::silent());
        for delta in &deltas {
            wg.add(*delta);
        }
        prop_assert_eq!(wg.count(), deltas.iter().sum::<i64>());

        for delta in deltas.iter().rev() {
            wg.add(-delta);
        }
        prop_assert_eq!(wg.count(), 0);
        wg.wait();
    }

    #[test]
    fn test_child_context_takes_earliest_deadline(
        parent_ms in 1..10_000u64,
        child_ms in 1..10_000u64,
    ) {
        let parent = Context::with_timeout(Duration::from_millis(parent_ms));
        let child = parent.child_with_timeout(Duration::from_millis(child_ms));
        let (Some(parent_deadline), Some(child_deadline)) = (parent.deadline(), child.deadline()) else {
            return Err(TestCaseError::fail("deadlines should be set"));
        };
        prop_assert!(child_deadline <= parent_deadline);
    }

    #[test]
    fn test_config_accepts_nonzero_thresholds(
        lock_ms in 1..1_000_000u64,
        wait_ms in 1..1_000_000u64,
        stack_bytes in 1..65_536usize,
    ) {
        let config = DebugsyncConfig::builder()
            .lock_hold_threshold(Duration::from_millis(lock_ms))
            .wait_threshold(Duration::from_millis(wait_ms))
            .max_stack_bytes(stack_bytes)
            .build();
        prop_assert!(config.is_ok());
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(8))]

    #[test]
    fn test_timers_fire_in_deadline_order(offsets in prop::collection::vec(5..40u64, 1..12)) {
        let watchdog = Watchdog::new();
        let fired = Arc::new(PlMutex::new(Vec::new()));
        let start = Instant::now();

        let handles: Vec<_> = offsets
            .iter()
            .enumerate()
            .map(|(index, offset)| {
                let fired = Arc::clone(&fired);
                let deadline = start + Duration::from_millis(*offset);
                watchdog.arm_at(deadline, move || fired.lock().push((deadline, index)))
            })
            .collect();

        let give_up = Instant::now() + Duration::from_secs(5);
        while fired.lock().len() < offsets.len() && Instant::now() < give_up {
            std::thread::sleep(Duration::from_millis(1));
        }

        let fired = fired.lock().clone();
        prop_assert_eq!(fired.len(), offsets.len());
        prop_assert!(fired.windows(2).all(|pair| pair[0].0 <= pair[1].0));
        prop_assert!(handles.iter().all(TimerHandle::has_fired));
    }
}
