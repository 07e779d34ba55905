//! Reentrancy and Concurrency Tests
//!
//! Callbacks run while the engine is busy with the operation that produced the
//! solution. These tests call back into the engine from inside callbacks and from
//! several threads at once.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use trickle::{
    ContinuousQuery, Engine, EngineConfig, GraphPattern, JoinStrategy, Modifiers, QueryInfo, Solution,
    Subscription, Tuple, TuplePattern,
};

const STRATEGIES: [JoinStrategy; 2] = [JoinStrategy::SymmetricHashJoin, JoinStrategy::Caching];

fn engine(strategy: JoinStrategy) -> Engine {
    Engine::new(EngineConfig { join_strategy: strategy, start_housekeeping: false, ..Default::default() }).unwrap()
}

fn two_hop() -> ContinuousQuery {
    ContinuousQuery::new(
        GraphPattern::new(vec![
            TuplePattern::parse_triple("?a", "<p>", "?b"),
            TuplePattern::parse_triple("?b", "<q>", "?c"),
        ]),
        Modifiers::default(),
    )
}

fn single(predicate: &str) -> ContinuousQuery {
    ContinuousQuery::new(
        GraphPattern::new(vec![TuplePattern::parse_triple("?s", predicate, "?o")]),
        Modifiers::default(),
    )
}

#[test]
fn test_cancel_inside_callback_stops_remaining_deliveries() {
    for strategy in STRATEGIES {
        let engine = engine(strategy);
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
        let delivered = Arc::new(AtomicUsize::new(0));

        let slot_clone = Arc::clone(&slot);
        let delivered_clone = Arc::clone(&delivered);
        let subscription = engine
            .register(two_hop(), 0, move |_| {
                delivered_clone.fetch_add(1, Ordering::SeqCst);
                if let Some(subscription) = slot_clone.lock().unwrap().as_ref() {
                    subscription.cancel();
                }
            })
            .unwrap();
        *slot.lock().unwrap() = Some(subscription.clone());

        engine.add(&Tuple::triple("<x1>", "<p>", "<y>"), 0);
        engine.add(&Tuple::triple("<x2>", "<p>", "<y>"), 0);
        // Completes both partials at once; only the first reaches the callback.
        engine.add(&Tuple::triple("<y>", "<q>", "<z>"), 0);

        assert_eq!(delivered.load(Ordering::SeqCst), 1, "{:?}", strategy);
        assert!(!subscription.is_active());
        assert_eq!(engine.query_count(), 0);
        assert_eq!(engine.partial_count(), 0);
    }
}

#[test]
fn test_register_inside_callback() {
    for strategy in STRATEGIES {
        let engine = engine(strategy);
        let registered: Arc<Mutex<Vec<Subscription>>> = Arc::new(Mutex::new(Vec::new()));
        let follow_up = Arc::new(AtomicUsize::new(0));

        let inner_engine = engine.clone();
        let registered_clone = Arc::clone(&registered);
        let follow_up_clone = Arc::clone(&follow_up);
        engine
            .register(single("<p>"), 0, move |_| {
                let counter = Arc::clone(&follow_up_clone);
                let subscription = inner_engine
                    .register(single("<q>"), 0, move |_| {
                        counter.fetch_add(1, Ordering::SeqCst);
                    })
                    .unwrap();
                registered_clone.lock().unwrap().push(subscription);
            })
            .unwrap();

        engine.add(&Tuple::triple("<x>", "<p>", "<y>"), 0);
        assert_eq!(engine.query_count(), 2);
        let subscriptions = registered.lock().unwrap().clone();
        assert_eq!(subscriptions.len(), 1);
        assert!(subscriptions[0].is_active());

        engine.add(&Tuple::triple("<y>", "<q>", "<z>"), 0);
        assert_eq!(follow_up.load(Ordering::SeqCst), 1);
    }
}

#[test]
fn test_add_inside_callback_is_applied_before_return() {
    for strategy in STRATEGIES {
        let engine = engine(strategy);
        let downstream = engine.register_channel(single("<derived>"), 0).unwrap();

        let inner_engine = engine.clone();
        let added_inside = Arc::new(Mutex::new(Vec::new()));
        let added_clone = Arc::clone(&added_inside);
        engine
            .register(two_hop(), 0, move |solution: Solution| {
                let binding = solution.bindings().unwrap().clone();
                let derived = Tuple::triple(
                    binding.get(&"a".into()).unwrap().as_str(),
                    "<derived>",
                    binding.get(&"c".into()).unwrap().as_str(),
                );
                added_clone.lock().unwrap().push(inner_engine.add(&derived, 0));
            })
            .unwrap();

        engine.add(&Tuple::triple("<x>", "<p>", "<y>"), 0);
        engine.add(&Tuple::triple("<y>", "<q>", "<z>"), 0);

        let solutions = downstream.drain();
        assert_eq!(solutions.len(), 1, "{:?}", strategy);
        let binding = solutions[0].bindings().unwrap();
        assert_eq!(binding.get(&"s".into()).unwrap().as_str(), "<x>");
        assert_eq!(binding.get(&"o".into()).unwrap().as_str(), "<z>");
        // Deferred adds cannot report whether they changed anything.
        assert_eq!(*added_inside.lock().unwrap(), vec![false]);
    }
}

#[test]
fn test_renew_and_clear_inside_callback() {
    let engine = engine(JoinStrategy::SymmetricHashJoin);
    let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
    let renewed = Arc::new(Mutex::new(Vec::new()));

    let slot_clone = Arc::clone(&slot);
    let renewed_clone = Arc::clone(&renewed);
    let subscription = engine
        .register(single("<p>"), 10, move |_| {
            if let Some(subscription) = slot_clone.lock().unwrap().as_ref() {
                renewed_clone.lock().unwrap().push(subscription.renew(0));
            }
        })
        .unwrap();
    *slot.lock().unwrap() = Some(subscription.clone());

    engine.add(&Tuple::triple("<x>", "<p>", "<y>"), 0);
    assert_eq!(*renewed.lock().unwrap(), vec![true]);
    assert_eq!(engine.query_info(subscription.id()).unwrap().expiration, trickle::Expiration::Never);

    let inner_engine = engine.clone();
    engine.register(single("<clear>"), 0, move |_| inner_engine.clear()).unwrap();
    engine.add(&Tuple::triple("<x>", "<clear>", "<y>"), 0);
    assert_eq!(engine.query_count(), 0);
    assert!(!subscription.is_active());
}

#[test]
fn test_inspection_inside_callback_does_not_block() {
    for strategy in STRATEGIES {
        let engine = engine(strategy);
        let seen: Arc<Mutex<Vec<(Option<QueryInfo>, usize)>>> = Arc::new(Mutex::new(Vec::new()));

        let inner_engine = engine.clone();
        let seen_clone = Arc::clone(&seen);
        let subscription = engine
            .register(single("<p>"), 0, move |solution: Solution| {
                let info = inner_engine.query_info(solution.query_id);
                seen_clone.lock().unwrap().push((info, inner_engine.query_count()));
            })
            .unwrap();

        engine.add(&Tuple::triple("<x>", "<p>", "<y>"), 0);
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].0.is_none());
        assert_eq!(seen[0].1, 1);
        assert!(engine.query_info(subscription.id()).is_some());
    }
}

#[test]
fn test_shutdown_inside_callback() {
    let engine = Engine::new(EngineConfig { housekeeping_poll_ms: 10, ..Default::default() }).unwrap();
    assert!(engine.is_housekeeping());

    let inner_engine = engine.clone();
    engine.register(single("<stop>"), 0, move |_| inner_engine.shutdown()).unwrap();
    engine.add(&Tuple::triple("<x>", "<stop>", "<y>"), 0);

    assert!(!engine.is_housekeeping());
    engine.shutdown();
}

#[test]
fn test_concurrent_adds_from_several_threads() {
    for strategy in STRATEGIES {
        let engine = engine(strategy);
        let handle = engine.register_channel(two_hop(), 0).unwrap();

        let workers: Vec<_> = (0..4)
            .map(|t| {
                let engine = engine.clone();
                thread::spawn(move || {
                    for i in 0..25 {
                        let x = format!("<x{}_{}>", t, i);
                        let y = format!("<y{}_{}>", t, i);
                        let z = format!("<z{}_{}>", t, i);
                        if i % 2 == 0 {
                            engine.add(&Tuple::triple(&x, "<p>", &y), 0);
                            engine.add(&Tuple::triple(&y, "<q>", &z), 0);
                        } else {
                            engine.add(&Tuple::triple(&y, "<q>", &z), 0);
                            engine.add(&Tuple::triple(&x, "<p>", &y), 0);
                        }
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        assert_eq!(handle.drain().len(), 100, "{:?}", strategy);
    }
}

#[test]
fn test_cancel_from_another_thread() {
    let engine = engine(JoinStrategy::SymmetricHashJoin);
    let handle = engine.register_channel(single("<p>"), 0).unwrap();
    let subscription = handle.subscription.clone();

    let canceller = thread::spawn(move || subscription.cancel());
    canceller.join().unwrap();

    engine.add(&Tuple::triple("<x>", "<p>", "<y>"), 0);
    assert!(handle.try_receive().is_none());
    // The engine dropped the sender together with the query.
    assert!(handle.receive().is_none());
}
