//! Configuration structures and utilities

use crate::error::{EngineError, Result};
use crate::registry::QueryRegistryConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

/// How the query index stores intermediate state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinStrategy {
    /// Store every partial solution and join new partials against stored ones.
    #[default]
    SymmetricHashJoin,
    /// Store only single-pattern matches and recompute joins on arrival.
    Caching,
}

/// Decides whether the background eviction pass should run, given
/// `(seconds_since_last_cleanup, queries_added_since_last, tuples_added_since_last)`.
pub type CleanupPolicy = Arc<dyn Fn(u64, u64, u64) -> bool + Send + Sync>;

/// Runs eviction every `interval_secs` seconds, but only once tuples have been added.
pub fn interval_cleanup_policy(interval_secs: u64) -> CleanupPolicy {
    Arc::new(move |since_last, _queries, tuples| tuples > 0 && since_last >= interval_secs)
}

/// Engine configuration, deserializable from JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Arity of tuples and tuple patterns (3 for triples, 4 for quads)
    pub arity: usize,
    /// Number of bindings a REDUCED query remembers
    pub reduced_capacity: usize,
    pub join_strategy: JoinStrategy,
    /// Interval used by the default cleanup policy
    pub cleanup_interval_secs: u64,
    /// How often the housekeeping worker evaluates the cleanup policy
    pub housekeeping_poll_ms: u64,
    /// Upper bound on query ttls; when set, infinite (0) ttls are refused too
    pub max_query_ttl_secs: Option<u64>,
    pub registry: QueryRegistryConfig,
    /// Spawn the background housekeeping worker when the engine is built
    pub start_housekeeping: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            arity: 3,
            reduced_capacity: 1000,
            join_strategy: JoinStrategy::default(),
            cleanup_interval_secs: 30,
            housekeeping_poll_ms: 1000,
            max_query_ttl_secs: None,
            registry: QueryRegistryConfig::default(),
            start_housekeeping: true,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if !(3..=4).contains(&self.arity) {
            return Err(EngineError::Config(format!("arity must be 3 or 4, got {}", self.arity)));
        }
        if self.reduced_capacity == 0 {
            return Err(EngineError::Config("reduced_capacity must be positive".to_string()));
        }
        if self.housekeeping_poll_ms == 0 {
            return Err(EngineError::Config("housekeeping_poll_ms must be positive".to_string()));
        }
        if self.registry.max_queries == Some(0) {
            return Err(EngineError::Config("registry.max_queries must be positive".to_string()));
        }
        Ok(())
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: EngineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    /// Whether a query may be registered or renewed with this ttl.
    pub fn admits_query_ttl(&self, ttl_secs: u64) -> bool {
        match self.max_query_ttl_secs {
            Some(max) => ttl_secs > 0 && ttl_secs <= max,
            None => true,
        }
    }
}
