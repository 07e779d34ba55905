//! The thread-safe engine facade.
//!
//! All index mutations run under one lock, and callbacks are invoked while it is
//! held. Operations issued from inside a callback of the same engine (cancel,
//! renew, register, add, ...) are queued and applied before the outermost
//! operation releases the lock.

mod housekeeping;
pub mod query_index;
mod subscription;

pub use query_index::{EvictionReport, QueryIndex, Registration};
pub use subscription::{QueryHandle, Subscription};

use crate::config::{interval_cleanup_policy, CleanupPolicy, EngineConfig, JoinStrategy};
use crate::core::{Clock, SystemClock, Tuple};
use crate::error::{EngineError, Result};
use crate::query::{ContinuousQuery, QueryId, Solution};
use crate::registry::{QueryInfo, ResultCallback};
use housekeeping::{Housekeeper, Housekeeping};
use log::{debug, error, info, warn};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex, MutexGuard};
use std::time::Duration;

static NEXT_INSTANCE: AtomicU64 = AtomicU64::new(1);

thread_local! {
    /// Engines whose lock is held by the current thread.
    static ENTERED: RefCell<Vec<u64>> = RefCell::new(Vec::new());
}

fn entered(instance: u64) -> bool {
    ENTERED.try_with(|entered| entered.borrow().contains(&instance)).unwrap_or(false)
}

struct EnteredGuard(u64);

impl EnteredGuard {
    fn enter(instance: u64) -> Self {
        let _ = ENTERED.try_with(|entered| entered.borrow_mut().push(instance));
        Self(instance)
    }
}

impl Drop for EnteredGuard {
    fn drop(&mut self) {
        let _ = ENTERED.try_with(|entered| {
            let mut entered = entered.borrow_mut();
            if let Some(position) = entered.iter().rposition(|instance| *instance == self.0) {
                entered.remove(position);
            }
        });
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| {
        warn!("Recovering engine state after a panic while the lock was held");
        poisoned.into_inner()
    })
}

/// Work issued from inside a callback.
enum DeferredOp {
    Register(Registration),
    Cancel(QueryId),
    Renew { id: QueryId, ttl_secs: u64 },
    Add { tuple: Tuple, ttl_secs: u64 },
    RemoveExpired,
    Clear,
}

pub(crate) struct EngineShared {
    instance: u64,
    config: EngineConfig,
    clock: Arc<dyn Clock>,
    cleanup_policy: CleanupPolicy,
    index: Mutex<QueryIndex>,
    deferred: Mutex<VecDeque<DeferredOp>>,
    next_query_id: AtomicU64,
    last_cleanup_ms: AtomicU64,
    queries_since_cleanup: AtomicU64,
    tuples_since_cleanup: AtomicU64,
    query_count: AtomicUsize,
    partial_count: AtomicUsize,
    housekeeper: Mutex<Option<Housekeeper>>,
}

impl EngineShared {
    fn is_entered(&self) -> bool {
        entered(self.instance)
    }

    fn defer(&self, op: DeferredOp) {
        lock(&self.deferred).push_back(op);
    }

    /// Runs `op` under the index lock, then applies whatever callbacks deferred.
    fn run<R>(&self, op: impl FnOnce(&mut QueryIndex, u64) -> R) -> R {
        let mut index = lock(&self.index);
        let _entered = EnteredGuard::enter(self.instance);
        let result = op(&mut *index, self.clock.now_millis());
        self.drain_deferred(&mut index);
        self.query_count.store(index.query_count(), Ordering::Release);
        self.partial_count.store(index.partial_count(), Ordering::Release);
        result
    }

    fn drain_deferred(&self, index: &mut QueryIndex) {
        loop {
            let next = lock(&self.deferred).pop_front();
            let Some(op) = next else {
                break;
            };
            let now = self.clock.now_millis();
            match op {
                DeferredOp::Register(registration) => {
                    let id = registration.id;
                    let active = Arc::clone(&registration.active);
                    if let Err(err) = index.register(registration, now) {
                        active.store(false, Ordering::Release);
                        warn!("Deferred registration of query {} failed: {}", id, err);
                    }
                }
                DeferredOp::Cancel(id) => {
                    index.unregister(id);
                }
                DeferredOp::Renew { id, ttl_secs } => {
                    index.renew(id, ttl_secs, now);
                }
                DeferredOp::Add { tuple, ttl_secs } => {
                    index.add(&tuple, ttl_secs, now);
                }
                DeferredOp::RemoveExpired => {
                    index.remove_expired(now);
                    self.reset_cleanup_counters(now);
                }
                DeferredOp::Clear => index.clear(),
            }
        }
    }

    fn register(self: &Arc<Self>, query: ContinuousQuery, ttl_secs: u64, callback: ResultCallback) -> Result<Subscription> {
        if !self.config.admits_query_ttl(ttl_secs) {
            return Err(EngineError::IncompatibleQuery(format!(
                "query ttl of {}s exceeds the configured maximum of {:?}s",
                ttl_secs, self.config.max_query_ttl_secs
            )));
        }
        let analysis = query.validate(self.config.arity)?;
        let id = self.next_query_id.fetch_add(1, Ordering::Relaxed);
        let active = Arc::new(AtomicBool::new(true));
        let registration = Registration { id, query, analysis, ttl_secs, active: Arc::clone(&active), callback };

        if self.is_entered() {
            debug!("Deferring registration of query {} issued from a callback", id);
            self.defer(DeferredOp::Register(registration));
        } else {
            self.run(|index, now| index.register(registration, now))?;
        }
        self.queries_since_cleanup.fetch_add(1, Ordering::Relaxed);
        self.signal_if_due();
        Ok(Subscription::new(id, active, Arc::downgrade(self)))
    }

    /// The active flag has already been cleared by the caller.
    fn cancel(&self, id: QueryId) {
        if self.is_entered() {
            self.defer(DeferredOp::Cancel(id));
        } else {
            self.run(|index, _| index.unregister(id));
        }
    }

    fn renew(&self, id: QueryId, ttl_secs: u64) -> bool {
        if !self.config.admits_query_ttl(ttl_secs) {
            debug!("Refusing to renew query {} with ttl {}s", id, ttl_secs);
            return false;
        }
        if self.is_entered() {
            self.defer(DeferredOp::Renew { id, ttl_secs });
            return true;
        }
        self.run(|index, now| index.renew(id, ttl_secs, now))
    }

    fn add(&self, tuple: &Tuple, ttl_secs: u64) -> bool {
        self.tuples_since_cleanup.fetch_add(1, Ordering::Relaxed);
        if self.is_entered() {
            self.defer(DeferredOp::Add { tuple: tuple.clone(), ttl_secs });
            return false;
        }
        let changed = self.run(|index, now| index.add(tuple, ttl_secs, now));
        self.signal_if_due();
        changed
    }

    fn remove_expired(&self) -> EvictionReport {
        if self.is_entered() {
            self.defer(DeferredOp::RemoveExpired);
            return EvictionReport::default();
        }
        self.run(|index, now| {
            let report = index.remove_expired(now);
            self.reset_cleanup_counters(now);
            report
        })
    }

    fn clear(&self) {
        if self.is_entered() {
            self.defer(DeferredOp::Clear);
        } else {
            self.run(|index, _| index.clear());
        }
    }

    /// Reads the index unless the current thread is inside one of this engine's callbacks.
    fn inspect<R>(&self, op: impl FnOnce(&QueryIndex) -> R) -> Option<R> {
        if self.is_entered() {
            return None;
        }
        let index = lock(&self.index);
        Some(op(&*index))
    }

    fn reset_cleanup_counters(&self, now: u64) {
        self.last_cleanup_ms.store(now, Ordering::Release);
        self.queries_since_cleanup.store(0, Ordering::Relaxed);
        self.tuples_since_cleanup.store(0, Ordering::Relaxed);
    }

    /// Wakes the worker early when the cleanup policy says eviction is due.
    fn signal_if_due(&self) {
        let housekeeper = lock(&self.housekeeper);
        let Some(housekeeper) = housekeeper.as_ref() else {
            return;
        };
        match panic::catch_unwind(AssertUnwindSafe(|| self.cleanup_due())) {
            Ok(true) => housekeeper.notify(),
            Ok(false) => {}
            Err(_) => error!("Cleanup policy panicked; leaving the decision to the housekeeping worker"),
        }
    }
}

impl Housekeeping for EngineShared {
    fn cleanup_due(&self) -> bool {
        let now = self.clock.now_millis();
        let since_last = now.saturating_sub(self.last_cleanup_ms.load(Ordering::Acquire)) / 1000;
        (self.cleanup_policy)(
            since_last,
            self.queries_since_cleanup.load(Ordering::Relaxed),
            self.tuples_since_cleanup.load(Ordering::Relaxed),
        )
    }

    fn evict_expired(&self) -> EvictionReport {
        self.remove_expired()
    }
}

impl Drop for EngineShared {
    fn drop(&mut self) {
        debug!("Dropping engine instance {}", self.instance);
    }
}

/// Continuous conjunctive query engine over a stream of tuples.
///
/// Cloning an engine yields another handle to the same index.
///
/// # Example
///
/// ```rust
/// use trickle::{ContinuousQuery, Engine, EngineConfig, GraphPattern, Modifiers, Tuple, TuplePattern};
///
/// let engine = Engine::new(EngineConfig { start_housekeeping: false, ..Default::default() }).unwrap();
/// let pattern = GraphPattern::new(vec![
///     TuplePattern::parse_triple("?a", "<http://ex.org/p>", "?b"),
///     TuplePattern::parse_triple("?b", "<http://ex.org/q>", "?c"),
/// ]);
/// let handle = engine.register_channel(ContinuousQuery::new(pattern, Modifiers::default()), 0).unwrap();
///
/// engine.add(&Tuple::triple("<http://ex.org/x>", "<http://ex.org/p>", "<http://ex.org/y>"), 0);
/// engine.add(&Tuple::triple("<http://ex.org/y>", "<http://ex.org/q>", "<http://ex.org/z>"), 0);
/// assert_eq!(handle.drain().len(), 1);
/// ```
#[derive(Clone)]
pub struct Engine {
    shared: Arc<EngineShared>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("instance", &self.shared.instance)
            .field("config", &self.shared.config)
            .field("queries", &self.query_count())
            .finish_non_exhaustive()
    }
}

impl Engine {
    pub fn new(config: EngineConfig) -> Result<Self> {
        EngineBuilder::new().config(config).build()
    }

    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    /// Registers a query whose solutions are passed to `callback`.
    ///
    /// `ttl_secs` of 0 keeps the query until it is cancelled, satisfied or cleared.
    pub fn register<F>(&self, query: ContinuousQuery, ttl_secs: u64, callback: F) -> Result<Subscription>
    where
        F: FnMut(Solution) + Send + 'static,
    {
        self.shared.register(query, ttl_secs, Box::new(callback))
    }

    /// Registers a query whose solutions are sent over a channel.
    pub fn register_channel(&self, query: ContinuousQuery, ttl_secs: u64) -> Result<QueryHandle> {
        let (sender, receiver) = mpsc::channel::<Solution>();
        let subscription = self.register(query, ttl_secs, move |solution| {
            let _ = sender.send(solution);
        })?;
        Ok(QueryHandle { subscription, receiver })
    }

    /// Adds a tuple that stays live for `ttl_secs` (0 for never).
    ///
    /// Returns whether the index changed. Called from inside a callback, the tuple is
    /// queued and false is returned.
    pub fn add(&self, tuple: &Tuple, ttl_secs: u64) -> bool {
        self.shared.add(tuple, ttl_secs)
    }

    /// Adds tuples one by one; returns how many changed the index.
    pub fn add_all<'a, I>(&self, tuples: I, ttl_secs: u64) -> usize
    where
        I: IntoIterator<Item = &'a Tuple>,
    {
        tuples.into_iter().filter(|tuple| self.add(tuple, ttl_secs)).count()
    }

    /// Evicts expired queries and partial solutions now.
    pub fn remove_expired(&self) -> EvictionReport {
        self.shared.remove_expired()
    }

    /// Unregisters every query and drops all stored state.
    pub fn clear(&self) {
        self.shared.clear();
    }

    /// Number of registered queries after the last completed operation.
    pub fn query_count(&self) -> usize {
        self.shared.query_count.load(Ordering::Acquire)
    }

    /// Number of stored partial solutions after the last completed operation.
    pub fn partial_count(&self) -> usize {
        self.shared.partial_count.load(Ordering::Acquire)
    }

    /// None for unknown queries, and when called from inside a callback.
    pub fn query_info(&self, id: QueryId) -> Option<QueryInfo> {
        self.shared.inspect(|index| index.query_info(id)).flatten()
    }

    pub fn query_ids(&self) -> Vec<QueryId> {
        self.shared.inspect(QueryIndex::query_ids).unwrap_or_default()
    }

    pub fn partial_count_for(&self, id: QueryId) -> Option<usize> {
        self.shared.inspect(|index| index.contains(id).then(|| index.partial_count_for(id))).flatten()
    }

    /// Bindings remembered by a DISTINCT or REDUCED query.
    pub fn dedup_tracked(&self, id: QueryId) -> Option<usize> {
        self.shared.inspect(|index| index.dedup_tracked(id)).flatten()
    }

    /// Stops the housekeeping worker and waits for it to exit. Idempotent.
    pub fn shutdown(&self) {
        let housekeeper = lock(&self.shared.housekeeper).take();
        if let Some(housekeeper) = housekeeper {
            // The worker may be waiting for the lock this thread holds; signal without joining.
            if self.shared.is_entered() {
                drop(housekeeper);
                return;
            }
            housekeeper.shutdown();
            info!("Engine instance {} shut down", self.shared.instance);
        }
    }

    pub fn is_housekeeping(&self) -> bool {
        lock(&self.shared.housekeeper).is_some()
    }
}

/// Builds an [`Engine`] with a custom clock or cleanup policy.
#[derive(Default)]
pub struct EngineBuilder {
    config: EngineConfig,
    clock: Option<Arc<dyn Clock>>,
    cleanup_policy: Option<CleanupPolicy>,
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn join_strategy(mut self, strategy: JoinStrategy) -> Self {
        self.config.join_strategy = strategy;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Replaces the default interval policy. Arguments are seconds since the last
    /// eviction, queries added since, and tuples added since.
    pub fn cleanup_policy<F>(mut self, policy: F) -> Self
    where
        F: Fn(u64, u64, u64) -> bool + Send + Sync + 'static,
    {
        self.cleanup_policy = Some(Arc::new(policy));
        self
    }

    pub fn housekeeping(mut self, enabled: bool) -> Self {
        self.config.start_housekeeping = enabled;
        self
    }

    pub fn build(self) -> Result<Engine> {
        self.config.validate()?;
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock::new()));
        let cleanup_policy =
            self.cleanup_policy.unwrap_or_else(|| interval_cleanup_policy(self.config.cleanup_interval_secs));
        let now = clock.now_millis();
        let start_housekeeping = self.config.start_housekeeping;
        let poll = Duration::from_millis(self.config.housekeeping_poll_ms);

        let shared = Arc::new(EngineShared {
            instance: NEXT_INSTANCE.fetch_add(1, Ordering::Relaxed),
            index: Mutex::new(QueryIndex::new(&self.config)),
            config: self.config,
            clock,
            cleanup_policy,
            deferred: Mutex::new(VecDeque::new()),
            next_query_id: AtomicU64::new(1),
            last_cleanup_ms: AtomicU64::new(now),
            queries_since_cleanup: AtomicU64::new(0),
            tuples_since_cleanup: AtomicU64::new(0),
            query_count: AtomicUsize::new(0),
            partial_count: AtomicUsize::new(0),
            housekeeper: Mutex::new(None),
        });
        if start_housekeeping {
            let housekeeper = Housekeeper::spawn(Arc::downgrade(&shared), poll)?;
            *lock(&shared.housekeeper) = Some(housekeeper);
        }
        info!(
            "Engine instance {} started ({:?} strategy, arity {}, housekeeping {})",
            shared.instance, shared.config.join_strategy, shared.config.arity, start_housekeeping
        );
        Ok(Engine { shared })
    }
}
