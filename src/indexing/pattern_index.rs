//! Index from tuple-pattern shape to the registered patterns having that shape.
//!
//! A signature is the pattern's arity, the mask of its constant positions and the
//! constants themselves. An arriving tuple is projected onto every mask in use for
//! its arity, so each lookup is a hash probe independent of the number of queries.

use crate::core::{Slot, Term, Tuple, TuplePattern};
use crate::query::QueryId;
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Signature {
    arity: usize,
    mask: u32,
    constants: Vec<Term>,
}

impl Signature {
    fn of_pattern(pattern: &TuplePattern) -> Self {
        let constants = pattern
            .slots()
            .iter()
            .filter_map(|slot| match slot {
                Slot::Constant(term) => Some(term.clone()),
                Slot::Variable(_) => None,
            })
            .collect();
        Self { arity: pattern.arity(), mask: pattern.constant_mask(), constants }
    }

    fn of_tuple(tuple: &Tuple, mask: u32) -> Self {
        let constants = tuple
            .terms()
            .iter()
            .enumerate()
            .filter(|(i, _)| mask & (1 << i) != 0)
            .map(|(_, term)| term.clone())
            .collect();
        Self { arity: tuple.arity(), mask, constants }
    }
}

/// One tuple pattern of one registered query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PatternRef {
    pub query: QueryId,
    pub pattern: usize,
}

#[derive(Debug, Default)]
pub struct PatternIndex {
    entries: HashMap<Signature, Vec<PatternRef>>,
    /// arity -> constant mask -> number of indexed patterns using it
    masks: HashMap<usize, BTreeMap<u32, usize>>,
}

impl PatternIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, query: QueryId, index: usize, pattern: &TuplePattern) {
        let signature = Signature::of_pattern(pattern);
        *self.masks.entry(signature.arity).or_default().entry(signature.mask).or_default() += 1;
        self.entries.entry(signature).or_default().push(PatternRef { query, pattern: index });
    }

    /// Removes every entry of `query`; `patterns` must be the patterns it was inserted with.
    pub fn remove_query(&mut self, query: QueryId, patterns: &[TuplePattern]) {
        for pattern in patterns {
            let signature = Signature::of_pattern(pattern);
            let Some(refs) = self.entries.get_mut(&signature) else {
                continue;
            };
            let before = refs.len();
            refs.retain(|r| r.query != query);
            let removed = before - refs.len();
            if refs.is_empty() {
                self.entries.remove(&signature);
            }
            if removed > 0 {
                self.release_mask(signature.arity, signature.mask, removed);
            }
        }
    }

    fn release_mask(&mut self, arity: usize, mask: u32, count: usize) {
        if let Some(by_mask) = self.masks.get_mut(&arity) {
            if let Some(uses) = by_mask.get_mut(&mask) {
                *uses = uses.saturating_sub(count);
                if *uses == 0 {
                    by_mask.remove(&mask);
                }
            }
            if by_mask.is_empty() {
                self.masks.remove(&arity);
            }
        }
    }

    /// Every registered pattern whose signature the tuple satisfies.
    ///
    /// Callers still have to run [`TuplePattern::match_tuple`] to check repeated variables.
    pub fn lookup(&self, tuple: &Tuple) -> Vec<PatternRef> {
        let Some(by_mask) = self.masks.get(&tuple.arity()) else {
            return Vec::new();
        };
        let mut found = Vec::new();
        for mask in by_mask.keys() {
            if let Some(refs) = self.entries.get(&Signature::of_tuple(tuple, *mask)) {
                found.extend_from_slice(refs);
            }
        }
        found
    }

    pub fn len(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.masks.clear();
    }
}
