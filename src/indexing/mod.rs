//! Index structures behind the query index: pattern signatures, stored partial
//! solutions, cached matches, expirations and duplicate suppression.

pub mod dedup;
pub mod expiration;
pub mod match_cache;
pub mod pattern_index;
pub mod solution_store;

pub use dedup::DedupPolicy;
pub use expiration::{EntryId, ExpirationManager, SolutionId};
pub use match_cache::{CachedMatch, CompleteMatch, MatchCache};
pub use pattern_index::{PatternIndex, PatternRef};
pub use solution_store::{PartialSolution, Propagation, SolutionStore, StoreOutcome};
