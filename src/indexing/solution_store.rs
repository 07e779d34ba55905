//! Partial-solution store for the symmetric hash join strategy.
//!
//! Every partial solution of every query is kept, keyed by (query, pattern set,
//! binding). A newly derived partial is probed against the stored partials of the
//! same query whose pattern set is disjoint from and adjacent to its own; the probe
//! is a hash lookup on one shared variable followed by a full compatibility check.
//! Because the new partial is stored before anything later arrives, whichever side
//! of a join comes second finds the first, so the result does not depend on arrival
//! order.

use super::expiration::{EntryId, ExpirationManager, SolutionId};
use crate::core::{Binding, Expiration, PatternSet, Term, Variable};
use crate::query::{PatternAnalysis, QueryId};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

/// A binding together with the patterns of its query it already satisfies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialSolution {
    pub query: QueryId,
    pub patterns: PatternSet,
    pub binding: Binding,
    pub expiration: Expiration,
}

impl PartialSolution {
    pub fn new(query: QueryId, pattern: usize, binding: Binding, expiration: Expiration) -> Self {
        Self { query, patterns: PatternSet::single(pattern), binding, expiration }
    }

    /// Joins two compatible partials over disjoint pattern sets.
    fn join(&self, other: &PartialSolution) -> PartialSolution {
        PartialSolution {
            query: self.query,
            patterns: self.patterns.union(other.patterns),
            binding: self.binding.merge(&other.binding),
            expiration: self.expiration.min(other.expiration),
        }
    }
}

/// Result of storing a derived partial or match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOutcome {
    Inserted(SolutionId),
    /// Already stored; its expiration was extended.
    Refreshed(SolutionId),
    /// Already stored with an equal or later expiration.
    Unchanged,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SolutionKey {
    query: QueryId,
    patterns: PatternSet,
    binding: Binding,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ProbeKey {
    query: QueryId,
    patterns: PatternSet,
    variable: Variable,
    term: Term,
}

/// Outcome of propagating one seed partial through the joins of its query.
#[derive(Debug, Default)]
pub struct Propagation {
    pub changed: bool,
    pub complete: Vec<PartialSolution>,
}

#[derive(Debug, Default)]
pub struct SolutionStore {
    next_id: SolutionId,
    solutions: HashMap<SolutionId, PartialSolution>,
    by_key: HashMap<SolutionKey, SolutionId>,
    probes: HashMap<ProbeKey, BTreeSet<SolutionId>>,
    by_query: HashMap<QueryId, BTreeMap<PatternSet, BTreeSet<SolutionId>>>,
}

impl SolutionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, partial: PartialSolution) -> StoreOutcome {
        let key = SolutionKey {
            query: partial.query,
            patterns: partial.patterns,
            binding: partial.binding.clone(),
        };
        if let Some(&id) = self.by_key.get(&key) {
            return match self.solutions.get_mut(&id) {
                Some(stored) if partial.expiration > stored.expiration => {
                    stored.expiration = partial.expiration;
                    StoreOutcome::Refreshed(id)
                }
                _ => StoreOutcome::Unchanged,
            };
        }

        let id = self.next_id;
        self.next_id += 1;
        for (variable, term) in partial.binding.iter() {
            self.probes
                .entry(ProbeKey {
                    query: partial.query,
                    patterns: partial.patterns,
                    variable: variable.clone(),
                    term: term.clone(),
                })
                .or_default()
                .insert(id);
        }
        self.by_query
            .entry(partial.query)
            .or_default()
            .entry(partial.patterns)
            .or_default()
            .insert(id);
        self.by_key.insert(key, id);
        self.solutions.insert(id, partial);
        StoreOutcome::Inserted(id)
    }

    pub fn get(&self, id: SolutionId) -> Option<&PartialSolution> {
        self.solutions.get(&id)
    }

    pub fn remove(&mut self, id: SolutionId) -> Option<PartialSolution> {
        let partial = self.solutions.remove(&id)?;
        self.by_key.remove(&SolutionKey {
            query: partial.query,
            patterns: partial.patterns,
            binding: partial.binding.clone(),
        });
        for (variable, term) in partial.binding.iter() {
            let probe = ProbeKey {
                query: partial.query,
                patterns: partial.patterns,
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
        if let Some(sets) = self.by_query.get_mut(&partial.query) {
            if let Some(ids) = sets.get_mut(&partial.patterns) {
                ids.remove(&id);
                if ids.is_empty() {
                    sets.remove(&partial.patterns);
                }
            }
            if sets.is_empty() {
                self.by_query.remove(&partial.query);
            }
        }
        Some(partial)
    }

    /// Removes every partial of `query` and returns their ids.
    pub fn remove_query(&mut self, query: QueryId) -> Vec<SolutionId> {
        let ids: Vec<SolutionId> = self
            .by_query
            .get(&query)
            .map(|sets| sets.values().flatten().copied().collect())
            .unwrap_or_default();
        for id in &ids {
            self.remove(*id);
        }
        ids
    }

    /// Stored partials that can be joined with `partial` and have not expired as of `now`.
    fn partners(&self, partial: &PartialSolution, analysis: &PatternAnalysis, now: u64) -> Vec<&PartialSolution> {
        let Some(sets) = self.by_query.get(&partial.query) else {
            return Vec::new();
        };
        let mut found = Vec::new();
        for set in sets.keys() {
            if !set.is_disjoint(partial.patterns) || !analysis.is_adjacent(partial.patterns, *set) {
                continue;
            }
            let Some(variable) = analysis.shared_variable(partial.patterns, *set) else {
                continue;
            };
            let Some(term) = partial.binding.get(variable) else {
                continue;
            };
            let probe = ProbeKey {
                query: partial.query,
                patterns: *set,
                variable: variable.clone(),
                term: term.clone(),
            };
            let Some(ids) = self.probes.get(&probe) else {
                continue;
            };
            found.extend(
                ids.iter()
                    .filter_map(|id| self.solutions.get(id))
                    .filter(|candidate| !candidate.expiration.is_expired(now))
                    .filter(|candidate| candidate.binding.is_compatible(&partial.binding)),
            );
        }
        found
    }

    /// Stores `seed` and keeps joining until no further partial grows.
    ///
    /// Each stored or refreshed partial is tracked in `expirations`. Partials covering
    /// the whole graph pattern are returned as candidate complete solutions. Stored
    /// partials already expired at `now` are not joined, even before eviction.
    pub fn propagate(
        &mut self,
        seed: PartialSolution,
        analysis: &PatternAnalysis,
        expirations: &mut ExpirationManager,
        now: u64,
    ) -> Propagation {
        let mut propagation = Propagation::default();
        let mut worklist = VecDeque::from([seed]);
        while let Some(partial) = worklist.pop_front() {
            let id = match self.insert(partial.clone()) {
                StoreOutcome::Inserted(id) | StoreOutcome::Refreshed(id) => id,
                StoreOutcome::Unchanged => continue,
            };
            propagation.changed = true;
            expirations.track(EntryId::Solution(id), partial.expiration);

            if partial.patterns == analysis.full() {
                propagation.complete.push(partial);
                continue;
            }
            let joined: Vec<PartialSolution> =
                self.partners(&partial, analysis, now).into_iter().map(|p| partial.join(p)).collect();
            worklist.extend(joined);
        }
        propagation
    }

    pub fn len(&self) -> usize {
        self.solutions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.solutions.is_empty()
    }

    pub fn len_for_query(&self, query: QueryId) -> usize {
        self.by_query.get(&query).map_or(0, |sets| sets.values().map(BTreeSet::len).sum())
    }

    pub fn clear(&mut self) {
        self.solutions.clear();
        self.by_key.clear();
        self.probes.clear();
        self.by_query.clear();
    }
}
