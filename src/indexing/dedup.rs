//! Per-query duplicate suppression for delivered solutions.

use crate::core::Binding;
use crate::query::Distinctness;
use std::collections::{HashSet, VecDeque};

/// DISTINCT keeps every delivered binding forever. REDUCED keeps at most `capacity`
/// of them and forgets the oldest on overflow, so a forgotten binding may be
/// delivered again.
#[derive(Debug)]
pub enum DedupPolicy {
    None,
    Distinct { seen: HashSet<Binding> },
    Reduced { capacity: usize, seen: HashSet<Binding>, order: VecDeque<Binding> },
}

impl DedupPolicy {
    pub fn new(distinctness: Distinctness, reduced_capacity: usize) -> Self {
        match distinctness {
            Distinctness::None => DedupPolicy::None,
            Distinctness::Distinct => DedupPolicy::Distinct { seen: HashSet::new() },
            Distinctness::Reduced => DedupPolicy::Reduced {
                capacity: reduced_capacity.max(1),
                seen: HashSet::new(),
                order: VecDeque::new(),
            },
        }
    }

    /// Returns true when `binding` should be delivered, recording it if tracked.
    pub fn accept(&mut self, binding: &Binding) -> bool {
        match self {
            DedupPolicy::None => true,
            DedupPolicy::Distinct { seen } => seen.insert(binding.clone()),
            DedupPolicy::Reduced { capacity, seen, order } => {
                if seen.contains(binding) {
                    return false;
                }
                while order.len() >= *capacity {
                    match order.pop_front() {
                        Some(oldest) => {
                            seen.remove(&oldest);
                        }
                        None => break,
                    }
                }
                seen.insert(binding.clone());
                order.push_back(binding.clone());
                true
            }
        }
    }

    /// Number of bindings currently remembered.
    pub fn tracked(&self) -> usize {
        match self {
            DedupPolicy::None => 0,
            DedupPolicy::Distinct { seen } | DedupPolicy::Reduced { seen, .. } => seen.len(),
        }
    }
}
