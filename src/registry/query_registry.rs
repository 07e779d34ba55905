use crate::core::{Binding, Expiration, GraphPattern};
use crate::indexing::dedup::DedupPolicy;
use crate::query::{Modifiers, PatternAnalysis, Projection, QueryId, QueryOutput, Solution};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Receives every accepted solution of one query.
pub type ResultCallback = Box<dyn FnMut(Solution) + Send>;

/// Snapshot of a registered query, for callers and logging.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryInfo {
    pub query_id: QueryId,
    pub registered_at: u64,
    pub expiration: Expiration,
    pub pattern_len: usize,
    pub delivered: u64,
    pub active: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryRegistryConfig {
    /// Maximum number of queries that can be registered at once
    pub max_queries: Option<usize>,
}

/// Defining usual errors specific to the Query Registry Operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueryRegistryError {
    #[error("Query not found : {0}")]
    QueryNotFound(QueryId),
    #[error("Query already exists : {0}")]
    QueryAlreadyExists(QueryId),
    #[error("Maximum number of registered queries reached")]
    MaxQueriesReached,
}

/// What happened to one candidate complete solution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Suppressed,
    Delivered,
    /// LIMIT reached or ASK answered; the query must be removed.
    Satisfied,
}

/// Matching-side state of one registered query.
pub struct RegisteredQuery {
    pub id: QueryId,
    pub pattern: GraphPattern,
    pub modifiers: Modifiers,
    pub analysis: PatternAnalysis,
    pub expiration: Expiration,
    pub registered_at: u64,
    active: Arc<AtomicBool>,
    callback: ResultCallback,
    dedup: DedupPolicy,
    skipped: u64,
    delivered: u64,
}

impl fmt::Debug for RegisteredQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredQuery")
            .field("id", &self.id)
            .field("patterns", &self.pattern.len())
            .field("modifiers", &self.modifiers)
            .field("expiration", &self.expiration)
            .field("delivered", &self.delivered)
            .finish_non_exhaustive()
    }
}

impl RegisteredQuery {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: QueryId,
        pattern: GraphPattern,
        modifiers: Modifiers,
        analysis: PatternAnalysis,
        expiration: Expiration,
        registered_at: u64,
        active: Arc<AtomicBool>,
        callback: ResultCallback,
        reduced_capacity: usize,
    ) -> Self {
        let dedup = DedupPolicy::new(modifiers.distinctness, reduced_capacity);
        Self {
            id,
            pattern,
            modifiers,
            analysis,
            expiration,
            registered_at,
            active,
            callback,
            dedup,
            skipped: 0,
            delivered: 0,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn deactivate(&self) {
        self.active.store(false, Ordering::Release);
    }

    pub fn delivered(&self) -> u64 {
        self.delivered
    }

    pub fn dedup_tracked(&self) -> usize {
        self.dedup.tracked()
    }

    pub fn info(&self) -> QueryInfo {
        QueryInfo {
            query_id: self.id,
            registered_at: self.registered_at,
            expiration: self.expiration,
            pattern_len: self.pattern.len(),
            delivered: self.delivered,
            active: self.is_active(),
        }
    }

    /// Runs a candidate complete solution through the modifiers and, if accepted,
    /// through the callback.
    ///
    /// Order: filters on the full binding, projection, duplicate policy, OFFSET,
    /// LIMIT, then ASK / CONSTRUCT / plain bindings.
    pub fn deliver(&mut self, binding: &Binding, expiration: Expiration) -> Delivery {
        if !self.is_active() {
            return Delivery::Suppressed;
        }
        if !self.modifiers.filters.iter().all(|filter| filter.evaluate(binding)) {
            return Delivery::Suppressed;
        }
        let projected = match &self.modifiers.projection {
            Projection::All => binding.clone(),
            Projection::Variables(variables) => binding.project(variables),
        };
        if !self.dedup.accept(&projected) {
            return Delivery::Suppressed;
        }
        if let Some(offset) = self.modifiers.offset {
            if self.skipped < offset {
                self.skipped += 1;
                return Delivery::Suppressed;
            }
        }
        if let Some(limit) = self.modifiers.limit {
            if self.delivered >= limit {
                return Delivery::Satisfied;
            }
        }

        let output = if self.modifiers.ask {
            QueryOutput::Ask(true)
        } else if let Some(template) = &self.modifiers.construct {
            QueryOutput::Constructed(template.instantiate(binding))
        } else {
            QueryOutput::Bindings(projected)
        };
        self.delivered += 1;
        (self.callback)(Solution { query_id: self.id, output, expiration });

        let limit_reached = self.modifiers.limit.map_or(false, |limit| self.delivered >= limit);
        if self.modifiers.ask || limit_reached {
            Delivery::Satisfied
        } else {
            Delivery::Delivered
        }
    }
}

/// Table of registered queries owned by the query index.
#[derive(Debug, Default)]
pub struct QueryRegistry {
    queries: HashMap<QueryId, RegisteredQuery>,
    config: QueryRegistryConfig,
}

impl QueryRegistry {
    /// Create a new Query Registry with the default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Create option if you wish to create with a custom configuration
    pub fn with_config(config: QueryRegistryConfig) -> Self {
        QueryRegistry { queries: HashMap::new(), config }
    }

    /// Fails when the id is taken or the configured maximum is reached.
    pub fn check_admission(&self, id: QueryId) -> Result<(), QueryRegistryError> {
        if self.queries.contains_key(&id) {
            return Err(QueryRegistryError::QueryAlreadyExists(id));
        }
        if let Some(max) = self.config.max_queries {
            if self.queries.len() >= max {
                return Err(QueryRegistryError::MaxQueriesReached);
            }
        }
        Ok(())
    }

    pub fn register(&mut self, query: RegisteredQuery) -> Result<(), QueryRegistryError> {
        self.check_admission(query.id)?;
        self.queries.insert(query.id, query);
        Ok(())
    }

    pub fn unregister(&mut self, id: QueryId) -> Result<RegisteredQuery, QueryRegistryError> {
        self.queries.remove(&id).ok_or(QueryRegistryError::QueryNotFound(id))
    }

    pub fn get(&self, id: QueryId) -> Option<&RegisteredQuery> {
        self.queries.get(&id)
    }

    pub fn get_mut(&mut self, id: QueryId) -> Option<&mut RegisteredQuery> {
        self.queries.get_mut(&id)
    }

    pub fn contains(&self, id: QueryId) -> bool {
        self.queries.contains_key(&id)
    }

    pub fn ids(&self) -> Vec<QueryId> {
        let mut ids: Vec<QueryId> = self.queries.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.queries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }

    /// Removes every query, marking each inactive.
    pub fn clear(&mut self) {
        for query in self.queries.values() {
            query.deactivate();
        }
        self.queries.clear();
    }
}
