use std::{sync::Arc, thread, time::Duration};

use crate::{ConsumeDecision, LocalRateWindowStore, ManualClock, RateWindow, Stores, SubjectId};

use super::runtime;

fn subject(s: &str) -> SubjectId {
    SubjectId::try_from(s).unwrap()
}

fn burst() -> RateWindow {
    RateWindow::from_raw("burstLimiter", 1, 1000, 60_000).unwrap()
}

fn sustained() -> RateWindow {
    RateWindow::from_raw("sustainedLimiter", 3, 60_000, 0).unwrap()
}

fn store_at(start_ms: u64) -> (LocalRateWindowStore, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(start_ms));
    (LocalRateWindowStore::with_clock(clock.clone()), clock)
}

#[test]
fn first_consume_is_allowed_with_remaining_points() {
    let (store, _clock) = store_at(1_000);

    assert_eq!(
        store.consume_now(&sustained(), &subject("u1")),
        ConsumeDecision::Allowed { remaining_points: 2 }
    );
    assert_eq!(
        store.consume_now(&sustained(), &subject("u1")),
        ConsumeDecision::Allowed { remaining_points: 1 }
    );
}

#[test]
fn burst_denial_pins_block_duration() {
    let (store, clock) = store_at(1_000);
    let w = burst();

    assert!(matches!(
        store.consume_now(&w, &subject("u1")),
        ConsumeDecision::Allowed { .. }
    ));

    clock.advance(200);
    assert_eq!(
        store.consume_now(&w, &subject("u1")),
        ConsumeDecision::Denied {
            ms_before_next: 60_000
        }
    );
}

#[test]
fn later_denials_do_not_extend_the_block() {
    let (store, clock) = store_at(1_000);
    let w = burst();

    store.consume_now(&w, &subject("u1"));
    store.consume_now(&w, &subject("u1"));

    clock.advance(10_000);
    assert_eq!(
        store.consume_now(&w, &subject("u1")),
        ConsumeDecision::Denied {
            ms_before_next: 50_000
        }
    );

    clock.advance(50_000);
    assert_eq!(
        store.consume_now(&w, &subject("u1")),
        ConsumeDecision::Allowed { remaining_points: 0 }
    );
}

#[test]
fn sustained_denial_reports_time_to_period_end() {
    let (store, clock) = store_at(0);
    let w = sustained();

    for _ in 0..3 {
        assert!(matches!(
            store.consume_now(&w, &subject("u1")),
            ConsumeDecision::Allowed { .. }
        ));
        clock.advance(2_000);
    }

    assert_eq!(
        store.consume_now(&w, &subject("u1")),
        ConsumeDecision::Denied {
            ms_before_next: 54_000
        }
    );
}

#[test]
fn window_resets_after_period() {
    let (store, clock) = store_at(0);
    let w = RateWindow::from_raw("w", 1, 1000, 0).unwrap();

    store.consume_now(&w, &subject("u1"));
    assert!(matches!(
        store.consume_now(&w, &subject("u1")),
        ConsumeDecision::Denied { ms_before_next: 1000 }
    ));

    clock.advance(1000);
    assert_eq!(
        store.consume_now(&w, &subject("u1")),
        ConsumeDecision::Allowed { remaining_points: 0 }
    );
}

#[test]
fn subjects_and_windows_are_independent() {
    let (store, _clock) = store_at(0);

    store.consume_now(&burst(), &subject("u1"));

    assert!(matches!(
        store.consume_now(&burst(), &subject("u2")),
        ConsumeDecision::Allowed { .. }
    ));
    assert!(matches!(
        store.consume_now(&sustained(), &subject("u1")),
        ConsumeDecision::Allowed { .. }
    ));
    assert_eq!(store.len(), 3);
}

#[test]
fn concurrent_consumes_grant_exactly_capacity() {
    let store = Arc::new(LocalRateWindowStore::with_clock(Arc::new(ManualClock::new(0))));
    let w = RateWindow::from_raw("w", 10, 60_000, 0).unwrap();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let store = store.clone();
            let w = w.clone();
            thread::spawn(move || {
                (0..10)
                    .filter(|_| {
                        matches!(
                            store.consume_now(&w, &subject("shared")),
                            ConsumeDecision::Allowed { .. }
                        )
                    })
                    .count()
            })
        })
        .collect();

    let allowed: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
    assert_eq!(allowed, 10);
}

#[test]
fn cleanup_drops_only_expired_counters() {
    let (store, clock) = store_at(0);

    store.consume_now(&burst(), &subject("u1"));
    store.consume_now(&sustained(), &subject("u1"));
    assert_eq!(store.len(), 2);

    clock.advance(1_000);
    assert_eq!(store.cleanup(), 1);
    assert_eq!(store.len(), 1);

    clock.advance(59_000);
    assert_eq!(store.cleanup(), 1);
    assert!(store.is_empty());
}

#[test]
fn cleanup_loop_evicts_in_background() {
    runtime::block_on(async {
        let clock = Arc::new(ManualClock::new(0));
        let store = Arc::new(LocalRateWindowStore::with_clock(clock.clone()));

        store.consume_now(&burst(), &subject("u1"));
        let handle = store.run_cleanup_loop(Duration::from_millis(20));

        clock.advance(1_000);
        runtime::async_sleep(Duration::from_millis(100)).await;

        assert!(store.is_empty());
        handle.abort();
    });
}

#[test]
fn local_stores_start_their_own_cleanup_loop() {
    runtime::block_on(async {
        let stores = Stores::local_with_clock(Arc::new(ManualClock::new(0)));

        let handle = stores
            .run_cleanup_loop(Duration::from_millis(20))
            .expect("local stores evict counters in process");
        runtime::async_sleep(Duration::from_millis(50)).await;

        assert!(!handle.is_finished());
        handle.abort();
    });
}
