//! The query index: registered patterns, join state and expirations.
//!
//! All methods take `&mut self`; the engine serializes access through one lock.

use crate::config::{EngineConfig, JoinStrategy};
use crate::core::{Binding, Expiration, Tuple};
use crate::error::Result;
use crate::indexing::{
    CachedMatch, EntryId, ExpirationManager, MatchCache, PartialSolution, PatternIndex, SolutionStore,
};
use crate::query::{ContinuousQuery, PatternAnalysis, QueryId};
use crate::registry::{Delivery, QueryInfo, QueryRegistry, RegisteredQuery, ResultCallback};
use log::{debug, info, trace};
use serde::Serialize;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

/// A validated query waiting to be indexed.
pub struct Registration {
    pub id: QueryId,
    pub query: ContinuousQuery,
    pub analysis: PatternAnalysis,
    pub ttl_secs: u64,
    pub active: Arc<AtomicBool>,
    pub callback: ResultCallback,
}

/// What one eviction pass removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EvictionReport {
    pub queries: usize,
    pub solutions: usize,
}

/// Closed set of join strategies behind the one query-index interface.
#[derive(Debug)]
enum JoinState {
    SymmetricHashJoin(SolutionStore),
    Caching(MatchCache),
}

impl JoinState {
    fn new(strategy: JoinStrategy) -> Self {
        match strategy {
            JoinStrategy::SymmetricHashJoin => JoinState::SymmetricHashJoin(SolutionStore::new()),
            JoinStrategy::Caching => JoinState::Caching(MatchCache::new()),
        }
    }

    fn remove_query(&mut self, query: QueryId) -> Vec<u64> {
        match self {
            JoinState::SymmetricHashJoin(store) => store.remove_query(query),
            JoinState::Caching(cache) => cache.remove_query(query),
        }
    }

    fn remove(&mut self, id: u64) -> bool {
        match self {
            JoinState::SymmetricHashJoin(store) => store.remove(id).is_some(),
            JoinState::Caching(cache) => cache.remove(id).is_some(),
        }
    }

    fn len(&self) -> usize {
        match self {
            JoinState::SymmetricHashJoin(store) => store.len(),
            JoinState::Caching(cache) => cache.len(),
        }
    }

    fn len_for_query(&self, query: QueryId) -> usize {
        match self {
            JoinState::SymmetricHashJoin(store) => store.len_for_query(query),
            JoinState::Caching(cache) => cache.len_for_query(query),
        }
    }

    fn clear(&mut self) {
        match self {
            JoinState::SymmetricHashJoin(store) => store.clear(),
            JoinState::Caching(cache) => cache.clear(),
        }
    }
}

#[derive(Debug)]
pub struct QueryIndex {
    arity: usize,
    reduced_capacity: usize,
    registry: QueryRegistry,
    patterns: PatternIndex,
    joins: JoinState,
    expirations: ExpirationManager,
}

impl QueryIndex {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            arity: config.arity,
            reduced_capacity: config.reduced_capacity,
            registry: QueryRegistry::with_config(config.registry.clone()),
            patterns: PatternIndex::new(),
            joins: JoinState::new(config.join_strategy),
            expirations: ExpirationManager::new(),
        }
    }

    /// Indexes a validated query. Nothing is indexed when admission fails.
    pub fn register(&mut self, registration: Registration, now: u64) -> Result<()> {
        let Registration { id, query, analysis, ttl_secs, active, callback } = registration;
        self.registry.check_admission(id)?;

        let expiration = Expiration::from_ttl(now, ttl_secs);
        let patterns = query.pattern.patterns().to_vec();
        let registered = RegisteredQuery::new(
            id,
            query.pattern,
            query.modifiers,
            analysis,
            expiration,
            now,
            active,
            callback,
            self.reduced_capacity,
        );
        self.registry.register(registered)?;
        for (index, pattern) in patterns.iter().enumerate() {
            self.patterns.insert(id, index, pattern);
        }
        self.expirations.track(EntryId::Query(id), expiration);
        info!("Registered query {} with {} tuple patterns, expiration {:?}", id, patterns.len(), expiration);
        Ok(())
    }

    /// Removes a query with all its index entries and partial solutions.
    pub fn unregister(&mut self, id: QueryId) -> bool {
        let Ok(query) = self.registry.unregister(id) else {
            return false;
        };
        query.deactivate();
        self.patterns.remove_query(id, query.pattern.patterns());
        let solutions = self.joins.remove_query(id);
        for solution in &solutions {
            self.expirations.untrack(EntryId::Solution(*solution));
        }
        self.expirations.untrack(EntryId::Query(id));
        info!("Unregistered query {} ({} partial solutions dropped)", id, solutions.len());
        true
    }

    /// Extends the expiration of an active query.
    pub fn renew(&mut self, id: QueryId, ttl_secs: u64, now: u64) -> bool {
        let Some(query) = self.registry.get_mut(id) else {
            return false;
        };
        if !query.is_active() {
            return false;
        }
        let expiration = Expiration::from_ttl(now, ttl_secs);
        query.expiration = expiration;
        self.expirations.renew(EntryId::Query(id), expiration);
        debug!("Renewed query {} until {:?}", id, expiration);
        true
    }

    /// Matches one tuple against every indexed pattern and delivers completed solutions.
    ///
    /// Returns whether any stored state changed.
    pub fn add(&mut self, tuple: &Tuple, ttl_secs: u64, now: u64) -> bool {
        if tuple.arity() != self.arity {
            trace!("Ignoring tuple of arity {}: {}", tuple.arity(), tuple);
            return false;
        }
        let expiration = Expiration::from_ttl(now, ttl_secs);
        let mut changed = false;
        let mut satisfied = Vec::new();

        for pattern_ref in self.patterns.lookup(tuple) {
            let Some(query) = self.registry.get(pattern_ref.query) else {
                continue;
            };
            if !query.is_active() {
                continue;
            }
            let Some(binding) = query.pattern.patterns()[pattern_ref.pattern].match_tuple(tuple) else {
                continue;
            };
            trace!("Tuple {} matches pattern {} of query {}", tuple, pattern_ref.pattern, query.id);

            let complete: Vec<(Binding, Expiration)> = match &mut self.joins {
                JoinState::SymmetricHashJoin(store) => {
                    let seed = PartialSolution::new(query.id, pattern_ref.pattern, binding, expiration);
                    let propagation = store.propagate(seed, &query.analysis, &mut self.expirations, now);
                    changed |= propagation.changed;
                    propagation.complete.into_iter().map(|p| (p.binding, p.expiration)).collect()
                }
                JoinState::Caching(cache) => {
                    let cached = CachedMatch { query: query.id, pattern: pattern_ref.pattern, binding, expiration };
                    match cache.add_match(cached, &query.analysis, &mut self.expirations, now) {
                        Some(complete) => {
                            changed = true;
                            complete.into_iter().map(|c| (c.binding, c.expiration)).collect()
                        }
                        None => Vec::new(),
                    }
                }
            };
            if complete.is_empty() {
                continue;
            }

            let Some(query) = self.registry.get_mut(pattern_ref.query) else {
                continue;
            };
            for (binding, solution_expiration) in complete {
                if solution_expiration.is_expired(now) {
                    continue;
                }
                if query.deliver(&binding, solution_expiration) == Delivery::Satisfied {
                    query.deactivate();
                    satisfied.push(query.id);
                    break;
                }
            }
        }

        for id in satisfied {
            debug!("Query {} satisfied its LIMIT/ASK modifier", id);
            self.unregister(id);
        }
        changed
    }

    /// Evicts everything whose expiration is `<= now`; expired queries take their
    /// partial solutions with them.
    pub fn remove_expired(&mut self, now: u64) -> EvictionReport {
        let mut report = EvictionReport::default();
        for entry in self.expirations.remove_expired(now) {
            match entry {
                EntryId::Query(id) => {
                    if self.unregister(id) {
                        report.queries += 1;
                    }
                }
                EntryId::Solution(id) => {
                    if self.joins.remove(id) {
                        report.solutions += 1;
                    }
                }
            }
        }
        if report != EvictionReport::default() {
            debug!("Evicted {} queries and {} partial solutions at {}", report.queries, report.solutions, now);
        }
        report
    }

    /// Drops every query, partial solution and expiration.
    pub fn clear(&mut self) {
        self.registry.clear();
        self.patterns.clear();
        self.joins.clear();
        self.expirations.clear();
        info!("Cleared query index");
    }

    pub fn contains(&self, id: QueryId) -> bool {
        self.registry.contains(id)
    }

    pub fn query_count(&self) -> usize {
        self.registry.len()
    }

    pub fn query_ids(&self) -> Vec<QueryId> {
        self.registry.ids()
    }

    pub fn query_info(&self, id: QueryId) -> Option<QueryInfo> {
        self.registry.get(id).map(RegisteredQuery::info)
    }

    /// Stored partial solutions (or cached matches, for the caching strategy).
    pub fn partial_count(&self) -> usize {
        self.joins.len()
    }

    pub fn partial_count_for(&self, id: QueryId) -> usize {
        self.joins.len_for_query(id)
    }

    pub fn dedup_tracked(&self, id: QueryId) -> Option<usize> {
        self.registry.get(id).map(RegisteredQuery::dedup_tracked)
    }

    pub fn tracked_expirations(&self) -> usize {
        self.expirations.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{GraphPattern, TuplePattern};
    use crate::query::{Modifiers, Solution};
    use std::sync::Mutex;

    fn registration(id: QueryId, patterns: Vec<TuplePattern>, ttl_secs: u64, sink: Arc<Mutex<Vec<Solution>>>) -> Registration {
        let query = ContinuousQuery::new(GraphPattern::new(patterns), Modifiers::default());
        let analysis = query.validate(3).unwrap();
        Registration {
            id,
            query,
            analysis,
            ttl_secs,
            active: Arc::new(AtomicBool::new(true)),
            callback: Box::new(move |s| sink.lock().unwrap().push(s)),
        }
    }

    fn two_hop() -> Vec<TuplePattern> {
        vec![TuplePattern::parse_triple("?a", "<p>", "?b"), TuplePattern::parse_triple("?b", "<q>", "?c")]
    }

    #[test]
    fn test_add_joins_and_delivers() {
        for strategy in [JoinStrategy::SymmetricHashJoin, JoinStrategy::Caching] {
            let config = EngineConfig { join_strategy: strategy, ..Default::default() };
            let mut index = QueryIndex::new(&config);
            let sink = Arc::new(Mutex::new(Vec::new()));
            index.register(registration(1, two_hop(), 0, sink.clone()), 0).unwrap();

            assert!(index.add(&Tuple::triple("<x>", "<p>", "<y>"), 0, 0));
            assert!(!index.add(&Tuple::triple("<x>", "<other>", "<y>"), 0, 0));
            assert!(index.add(&Tuple::triple("<y>", "<q>", "<z>"), 10, 1_000));
            let solutions = sink.lock().unwrap();
            assert_eq!(solutions.len(), 1, "strategy {:?}", strategy);
            assert_eq!(solutions[0].expiration, Expiration::At(11_000));
        }
    }

    #[test]
    fn test_unregister_drops_partials_and_expirations() {
        let mut index = QueryIndex::new(&EngineConfig::default());
        let sink = Arc::new(Mutex::new(Vec::new()));
        index.register(registration(1, two_hop(), 60, sink), 0).unwrap();
        index.add(&Tuple::triple("<x>", "<p>", "<y>"), 5, 0);
        assert_eq!(index.partial_count_for(1), 1);
        assert_eq!(index.tracked_expirations(), 2);

        assert!(index.unregister(1));
        assert!(!index.unregister(1));
        assert_eq!(index.partial_count(), 0);
        assert_eq!(index.tracked_expirations(), 0);
        assert!(!index.add(&Tuple::triple("<y>", "<q>", "<z>"), 0, 0));
    }

    #[test]
    fn test_query_expiry_cascades() {
        let mut index = QueryIndex::new(&EngineConfig::default());
        let sink = Arc::new(Mutex::new(Vec::new()));
        index.register(registration(1, two_hop(), 10, sink), 0).unwrap();
        index.add(&Tuple::triple("<x>", "<p>", "<y>"), 0, 0);

        assert_eq!(index.remove_expired(9_999), EvictionReport::default());
        let report = index.remove_expired(10_000);
        assert_eq!(report.queries, 1);
        assert_eq!(index.query_count(), 0);
        assert_eq!(index.partial_count(), 0);
    }

    #[test]
    fn test_renew_requires_active_known_query() {
        let mut index = QueryIndex::new(&EngineConfig::default());
        let sink = Arc::new(Mutex::new(Vec::new()));
        index.register(registration(1, two_hop(), 10, sink), 0).unwrap();
        assert!(index.renew(1, 20, 5_000));
        assert!(index.remove_expired(10_000).queries == 0);
        assert!(!index.renew(2, 20, 5_000));
        index.clear();
        assert!(!index.renew(1, 20, 5_000));
    }
}
