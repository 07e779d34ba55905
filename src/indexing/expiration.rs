//! Time-ordered expiration tracking for queries and stored partial solutions.

use crate::core::Expiration;
use crate::query::QueryId;
use std::collections::{BTreeMap, HashMap, HashSet};

pub type SolutionId = u64;

/// Something whose lifetime the expiration manager tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntryId {
    Query(QueryId),
    Solution(SolutionId),
}

/// Index of `(entry, timestamp)` pairs supporting bulk "everything expired as of now".
///
/// Entries that never expire are simply not tracked.
#[derive(Debug, Default)]
pub struct ExpirationManager {
    by_time: BTreeMap<u64, HashSet<EntryId>>,
    by_entry: HashMap<EntryId, u64>,
}

impl ExpirationManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `entry`'s expiration, replacing any previous one.
    pub fn track(&mut self, entry: EntryId, expiration: Expiration) {
        self.untrack(entry);
        if let Expiration::At(at) = expiration {
            self.by_time.entry(at).or_default().insert(entry);
            self.by_entry.insert(entry, at);
        }
    }

    /// Moves an entry to a new expiration. Returns whether it was tracked before.
    pub fn renew(&mut self, entry: EntryId, expiration: Expiration) -> bool {
        let was_tracked = self.by_entry.contains_key(&entry);
        self.track(entry, expiration);
        was_tracked
    }

    pub fn untrack(&mut self, entry: EntryId) {
        if let Some(at) = self.by_entry.remove(&entry) {
            if let Some(bucket) = self.by_time.get_mut(&at) {
                bucket.remove(&entry);
                if bucket.is_empty() {
                    self.by_time.remove(&at);
                }
            }
        }
    }

    /// Removes and returns every entry whose timestamp is `<= now`, oldest first.
    pub fn remove_expired(&mut self, now: u64) -> Vec<EntryId> {
        let still_valid = match now.checked_add(1) {
            Some(bound) => self.by_time.split_off(&bound),
            None => BTreeMap::new(),
        };
        let expired = std::mem::replace(&mut self.by_time, still_valid);

        let mut evicted = Vec::new();
        for (_, bucket) in expired {
            let mut bucket: Vec<EntryId> = bucket.into_iter().collect();
            bucket.sort_unstable();
            for entry in bucket {
                self.by_entry.remove(&entry);
                evicted.push(entry);
            }
        }
        evicted
    }

    pub fn len(&self) -> usize {
        self.by_entry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_entry.is_empty()
    }

    pub fn clear(&mut self) {
        self.by_time.clear();
        self.by_entry.clear();
    }
}
