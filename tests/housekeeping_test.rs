//! Background Housekeeping Tests
//!
//! The worker evaluates the cleanup policy on every poll and evicts expired
//! partial solutions and queries without any call from the application.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use trickle::{
    ContinuousQuery, Engine, EngineConfig, GraphPattern, JoinStrategy, ManualClock, Modifiers, Tuple,
    TuplePattern,
};

fn two_hop() -> ContinuousQuery {
    ContinuousQuery::new(
        GraphPattern::new(vec![
            TuplePattern::parse_triple("?a", "<p>", "?b"),
            TuplePattern::parse_triple("?b", "<q>", "?c"),
        ]),
        Modifiers::default(),
    )
}

fn config(poll_ms: u64) -> EngineConfig {
    EngineConfig { housekeeping_poll_ms: poll_ms, cleanup_interval_secs: 60, ..Default::default() }
}

/// Polls `condition` until it holds or five seconds have passed.
fn wait_for(condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

#[test]
fn test_worker_evicts_expired_partials() {
    for strategy in [JoinStrategy::SymmetricHashJoin, JoinStrategy::Caching] {
        let clock = Arc::new(ManualClock::new(0));
        let engine = Engine::builder()
            .config(config(10))
            .join_strategy(strategy)
            .clock(clock.clone())
            .cleanup_policy(|_, _, _| true)
            .build()
            .unwrap();
        engine.register(two_hop(), 0, |_| {}).unwrap();

        engine.add(&Tuple::triple("<x>", "<p>", "<y>"), 5);
        assert_eq!(engine.partial_count(), 1);

        clock.advance_secs(5);
        assert!(wait_for(|| engine.partial_count() == 0), "{:?} kept an expired partial", strategy);
        engine.shutdown();
    }
}

#[test]
fn test_worker_evicts_expired_queries() {
    let clock = Arc::new(ManualClock::new(0));
    let engine = Engine::builder().config(config(10)).clock(clock.clone()).cleanup_policy(|_, _, _| true).build().unwrap();
    let subscription = engine.register(two_hop(), 30, |_| {}).unwrap();

    clock.advance_secs(30);
    assert!(wait_for(|| !subscription.is_active()));
    assert!(wait_for(|| engine.query_count() == 0));
    engine.shutdown();
}

#[test]
fn test_interval_policy_waits_for_interval() {
    let clock = Arc::new(ManualClock::new(0));
    let engine = Engine::builder().config(config(10)).clock(clock.clone()).build().unwrap();
    engine.register(two_hop(), 0, |_| {}).unwrap();
    engine.add(&Tuple::triple("<x>", "<p>", "<y>"), 5);

    clock.advance_secs(10);
    thread::sleep(Duration::from_millis(100));
    assert_eq!(engine.partial_count(), 1);

    clock.advance_secs(50);
    assert!(wait_for(|| engine.partial_count() == 0));
    engine.shutdown();
}

#[test]
fn test_insertion_wakes_worker() {
    let clock = Arc::new(ManualClock::new(0));
    let engine = Engine::builder()
        .config(config(60_000))
        .clock(clock.clone())
        .cleanup_policy(|_, _, tuples| tuples >= 2)
        .build()
        .unwrap();
    engine.register(two_hop(), 0, |_| {}).unwrap();

    engine.add(&Tuple::triple("<x1>", "<p>", "<y>"), 1);
    clock.advance_secs(1);
    engine.add(&Tuple::triple("<x2>", "<p>", "<y>"), 0);

    assert!(wait_for(|| engine.partial_count() == 1));
    engine.shutdown();
}

#[test]
fn test_worker_survives_panicking_policy() {
    let clock = Arc::new(ManualClock::new(0));
    let calls = Arc::new(AtomicUsize::new(0));
    let calls_clone = Arc::clone(&calls);
    let engine = Engine::builder()
        .config(config(10))
        .clock(clock.clone())
        .cleanup_policy(move |_, _, _| {
            if calls_clone.fetch_add(1, Ordering::SeqCst) == 0 {
                panic!("policy failure");
            }
            true
        })
        .build()
        .unwrap();
    engine.register(two_hop(), 0, |_| {}).unwrap();
    engine.add(&Tuple::triple("<x>", "<p>", "<y>"), 5);

    clock.advance_secs(5);
    assert!(wait_for(|| engine.partial_count() == 0));
    assert!(calls.load(Ordering::SeqCst) >= 2);
    assert!(engine.is_housekeeping());
    engine.shutdown();
}

#[test]
fn test_shutdown_stops_worker() {
    let clock = Arc::new(ManualClock::new(0));
    let engine = Engine::builder().config(config(10)).clock(clock.clone()).cleanup_policy(|_, _, _| true).build().unwrap();
    assert!(engine.is_housekeeping());

    engine.shutdown();
    assert!(!engine.is_housekeeping());
    engine.shutdown();

    engine.register(two_hop(), 0, |_| {}).unwrap();
    engine.add(&Tuple::triple("<x>", "<p>", "<y>"), 5);
    clock.advance_secs(5);
    thread::sleep(Duration::from_millis(50));
    assert_eq!(engine.partial_count(), 1);

    // Manual eviction still works without the worker.
    assert_eq!(engine.remove_expired().solutions, 1);
    assert_eq!(engine.partial_count(), 0);
}
