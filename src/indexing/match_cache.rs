//! Single-pattern match cache for the caching join strategy.
//!
//! Only tuple-level matches are stored. A new match for pattern `k` is extended
//! along the query's precomputed join order starting at `k`, probing the cached
//! matches of each following pattern on a variable it shares with what is bound so
//! far. Intermediate joins are recomputed instead of stored.

use super::expiration::{EntryId, ExpirationManager, SolutionId};
use super::solution_store::StoreOutcome;
use crate::core::{Binding, Expiration, Term, Variable};
use crate::query::{PatternAnalysis, QueryId};
use std::collections::{BTreeSet, HashMap};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedMatch {
    pub query: QueryId,
    pub pattern: usize,
    pub binding: Binding,
    pub expiration: Expiration,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct MatchKey {
    query: QueryId,
    pattern: usize,
    binding: Binding,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ProbeKey {
    query: QueryId,
    pattern: usize,
    variable: Variable,
    term: Term,
}

/// A complete binding found by extending a new match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompleteMatch {
    pub binding: Binding,
    pub expiration: Expiration,
}

#[derive(Debug, Default)]
pub struct MatchCache {
    next_id: SolutionId,
    matches: HashMap<SolutionId, CachedMatch>,
    by_key: HashMap<MatchKey, SolutionId>,
    probes: HashMap<ProbeKey, BTreeSet<SolutionId>>,
    by_query: HashMap<QueryId, BTreeSet<SolutionId>>,
}

impl MatchCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, cached: CachedMatch) -> StoreOutcome {
        let key = MatchKey { query: cached.query, pattern: cached.pattern, binding: cached.binding.clone() };
        if let Some(&id) = self.by_key.get(&key) {
            return match self.matches.get_mut(&id) {
                Some(stored) if cached.expiration > stored.expiration => {
                    stored.expiration = cached.expiration;
                    StoreOutcome::Refreshed(id)
                }
                _ => StoreOutcome::Unchanged,
            };
        }
        let id = self.next_id;
        self.next_id += 1;
        for (variable, term) in cached.binding.iter() {
            self.probes
                .entry(ProbeKey {
                    query: cached.query,
                    pattern: cached.pattern,
                    variable: variable.clone(),
                    term: term.clone(),
                })
                .or_default()
                .insert(id);
        }
        self.by_query.entry(cached.query).or_default().insert(id);
        self.by_key.insert(key, id);
        self.matches.insert(id, cached);
        StoreOutcome::Inserted(id)
    }

    pub fn remove(&mut self, id: SolutionId) -> Option<CachedMatch> {
        let cached = self.matches.remove(&id)?;
        self.by_key.remove(&MatchKey {
            query: cached.query,
            pattern: cached.pattern,
            binding: cached.binding.clone(),
        });
        for (variable, term) in cached.binding.iter() {
            let probe = ProbeKey {
                query: cached.query,
                pattern: cached.pattern,
                variable: variable.clone(),
                term: term.clone(),
            };
            if let Some(ids) = self.probes.get_mut(&probe) {
                ids.remove(&id);
                if ids.is_empty() {
                    self.probes.remove(&probe);
                }
            }
        }
        if let Some(ids) = self.by_query.get_mut(&cached.query) {
            ids.remove(&id);
            if ids.is_empty() {
                self.by_query.remove(&cached.query);
            }
        }
        Some(cached)
    }

    pub fn remove_query(&mut self, query: QueryId) -> Vec<SolutionId> {
        let ids: Vec<SolutionId> =
            self.by_query.get(&query).map(|ids| ids.iter().copied().collect()).unwrap_or_default();
        for id in &ids {
            self.remove(*id);
        }
        ids
    }

    /// Caches a new match and returns the complete bindings it takes part in.
    ///
    /// Returns `None` when the match was already cached with an equal or later expiration.
    /// Cached matches already expired at `now` are skipped.
    pub fn add_match(
        &mut self,
        cached: CachedMatch,
        analysis: &PatternAnalysis,
        expirations: &mut ExpirationManager,
        now: u64,
    ) -> Option<Vec<CompleteMatch>> {
        let id = match self.insert(cached.clone()) {
            StoreOutcome::Inserted(id) | StoreOutcome::Refreshed(id) => id,
            StoreOutcome::Unchanged => return None,
        };
        expirations.track(EntryId::Solution(id), cached.expiration);

        let mut complete = Vec::new();
        self.extend(
            cached.query,
            analysis.join_order(cached.pattern),
            analysis,
            cached.binding,
            cached.expiration,
            now,
            &mut complete,
        );
        Some(complete)
    }

    fn extend(
        &self,
        query: QueryId,
        remaining: &[usize],
        analysis: &PatternAnalysis,
        binding: Binding,
        expiration: Expiration,
        now: u64,
        complete: &mut Vec<CompleteMatch>,
    ) {
        let Some((&next, rest)) = remaining.split_first() else {
            complete.push(CompleteMatch { binding, expiration });
            return;
        };
        let Some((variable, term)) = analysis
            .pattern_variables(next)
            .iter()
            .find_map(|v| binding.get(v).map(|t| (v.clone(), t.clone())))
        else {
            return;
        };
        let probe = ProbeKey { query, pattern: next, variable, term };
        let Some(ids) = self.probes.get(&probe) else {
            return;
        };
        for cached in ids.iter().filter_map(|id| self.matches.get(id)) {
            if !cached.expiration.is_expired(now) && cached.binding.is_compatible(&binding) {
                self.extend(
                    query,
                    rest,
                    analysis,
                    binding.merge(&cached.binding),
                    expiration.min(cached.expiration),
                    now,
                    complete,
                );
            }
        }
    }

    pub fn len(&self) -> usize {
        self.matches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }

    pub fn len_for_query(&self, query: QueryId) -> usize {
        self.by_query.get(&query).map_or(0, BTreeSet::len)
    }

    pub fn clear(&mut self) {
        self.matches.clear();
        self.by_key.clear();
        self.probes.clear();
        self.by_query.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{GraphPattern, Tuple, TuplePattern};
    use crate::query::validate_connectivity;

    fn patterns() -> Vec<TuplePattern> {
        vec![
            TuplePattern::parse_triple("?a", "<p>", "?b"),
            TuplePattern::parse_triple("?b", "<q>", "?c"),
            TuplePattern::parse_triple("?c", "<r>", "?d"),
        ]
    }

    fn cached(pattern: usize, tuple: Tuple) -> CachedMatch {
        CachedMatch {
            query: 1,
            pattern,
            binding: patterns()[pattern].match_tuple(&tuple).unwrap(),
            expiration: Expiration::Never,
        }
    }

    #[test]
    fn test_last_arrival_completes_chain() {
        let analysis = validate_connectivity(&GraphPattern::new(patterns())).unwrap();
        let mut cache = MatchCache::new();
        let mut expirations = ExpirationManager::new();

        let first = cache.add_match(cached(2, Tuple::triple("<z>", "<r>", "<w>")), &analysis, &mut expirations, 0);
        assert_eq!(first, Some(Vec::new()));
        let second = cache.add_match(cached(0, Tuple::triple("<x>", "<p>", "<y>")), &analysis, &mut expirations, 0);
        assert_eq!(second, Some(Vec::new()));
        let third = cache
            .add_match(cached(1, Tuple::triple("<y>", "<q>", "<z>")), &analysis, &mut expirations, 0)
            .unwrap();
        assert_eq!(third.len(), 1);
        assert_eq!(third[0].binding.len(), 4);
    }

    #[test]
    fn test_duplicate_match_is_ignored() {
        let analysis = validate_connectivity(&GraphPattern::new(patterns())).unwrap();
        let mut cache = MatchCache::new();
        let mut expirations = ExpirationManager::new();
        let m = cached(0, Tuple::triple("<x>", "<p>", "<y>"));
        assert!(cache.add_match(m.clone(), &analysis, &mut expirations, 0).is_some());
        assert!(cache.add_match(m, &analysis, &mut expirations, 0).is_none());
        assert_eq!(cache.len_for_query(1), 1);
        assert_eq!(cache.remove_query(1).len(), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_expired_matches_are_skipped_before_eviction() {
        let analysis = validate_connectivity(&GraphPattern::new(patterns())).unwrap();
        let mut cache = MatchCache::new();
        let mut expirations = ExpirationManager::new();
        let short = CachedMatch { expiration: Expiration::At(5_000), ..cached(0, Tuple::triple("<x>", "<p>", "<y>")) };
        cache.add_match(short, &analysis, &mut expirations, 0);
        cache.add_match(cached(2, Tuple::triple("<z>", "<r>", "<w>")), &analysis, &mut expirations, 0);

        let late = cache
            .add_match(cached(1, Tuple::triple("<y>", "<q>", "<z>")), &analysis, &mut expirations, 5_000)
            .unwrap();
        assert!(late.is_empty());
        assert_eq!(cache.len(), 3);
    }
}
