//! Continuous query model: graph pattern, modifiers and the solutions delivered to subscribers.

use crate::core::{Binding, Expiration, GraphPattern, Tuple, Variable};
use crate::error::{EngineError, Result};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

pub mod connectivity;
pub mod hooks;

pub use connectivity::{validate_connectivity, PatternAnalysis};
pub use hooks::{ComparisonOp, ConstructTemplate, Filter, Operand, TermComparison, TupleTemplate};

pub type QueryId = u64;

/// Which variables of a complete solution are delivered.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Projection {
    #[default]
    All,
    Variables(Vec<Variable>),
}

/// Duplicate handling for delivered solutions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Distinctness {
    #[default]
    None,
    Distinct,
    Reduced,
}

/// Solution modifiers applied to every complete solution before delivery.
#[derive(Clone, Default)]
pub struct Modifiers {
    pub projection: Projection,
    pub distinctness: Distinctness,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    pub ask: bool,
    pub construct: Option<Arc<dyn ConstructTemplate>>,
    pub filters: Vec<Arc<dyn Filter>>,
}

impl fmt::Debug for Modifiers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Modifiers")
            .field("projection", &self.projection)
            .field("distinctness", &self.distinctness)
            .field("limit", &self.limit)
            .field("offset", &self.offset)
            .field("ask", &self.ask)
            .field("construct", &self.construct.is_some())
            .field("filters", &self.filters.len())
            .finish()
    }
}

impl Modifiers {
    pub fn select(variables: &[&str]) -> Self {
        Self {
            projection: Projection::Variables(variables.iter().map(|v| Variable::new(v)).collect()),
            ..Default::default()
        }
    }

    pub fn ask() -> Self {
        Self { ask: true, ..Default::default() }
    }

    pub fn construct(template: impl ConstructTemplate + 'static) -> Self {
        Self { construct: Some(Arc::new(template)), ..Default::default() }
    }

    pub fn distinct(mut self) -> Self {
        self.distinctness = Distinctness::Distinct;
        self
    }

    pub fn reduced(mut self) -> Self {
        self.distinctness = Distinctness::Reduced;
        self
    }

    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn with_filter(mut self, filter: impl Filter + 'static) -> Self {
        self.filters.push(Arc::new(filter));
        self
    }
}

/// Registration input: a graph pattern plus its modifiers.
#[derive(Debug, Clone)]
pub struct ContinuousQuery {
    pub pattern: GraphPattern,
    pub modifiers: Modifiers,
}

impl ContinuousQuery {
    pub fn new(pattern: GraphPattern, modifiers: Modifiers) -> Self {
        Self { pattern, modifiers }
    }

    /// Rejects modifier combinations the engine does not implement and checks connectivity.
    pub fn validate(&self, arity: usize) -> Result<PatternAnalysis> {
        if let Some(bad) = self.pattern.patterns().iter().find(|tp| tp.arity() != arity) {
            return Err(EngineError::IncompatibleQuery(format!(
                "tuple pattern `{}` has arity {}, engine is configured for {}",
                bad,
                bad.arity(),
                arity
            )));
        }
        if self.modifiers.ask && self.modifiers.construct.is_some() {
            return Err(EngineError::IncompatibleQuery(
                "a query cannot be both ASK and CONSTRUCT".to_string(),
            ));
        }
        if let Projection::Variables(variables) = &self.modifiers.projection {
            let bound = self.pattern.variables();
            if let Some(missing) = variables.iter().find(|v| !bound.contains(*v)) {
                return Err(EngineError::IncompatibleQuery(format!(
                    "projected variable {} does not occur in the graph pattern",
                    missing
                )));
            }
        }
        validate_connectivity(&self.pattern)
    }
}

/// What a subscriber receives for one accepted complete solution.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryOutput {
    Bindings(Binding),
    Constructed(Vec<Tuple>),
    Ask(bool),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Solution {
    pub query_id: QueryId,
    pub output: QueryOutput,
    /// Earliest expiration among the tuples that produced this solution.
    pub expiration: Expiration,
}

impl Solution {
    pub fn bindings(&self) -> Option<&Binding> {
        match &self.output {
            QueryOutput::Bindings(binding) => Some(binding),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::TuplePattern;

    fn two_hop() -> GraphPattern {
        GraphPattern::new(vec![
            TuplePattern::parse_triple("?a", "<p>", "?b"),
            TuplePattern::parse_triple("?b", "<q>", "?c"),
        ])
    }

    #[test]
    fn test_validate_accepts_connected_select() {
        let query = ContinuousQuery::new(two_hop(), Modifiers::select(&["a", "c"]).distinct());
        assert!(query.validate(3).is_ok());
    }

    #[test]
    fn test_validate_rejects_unknown_projection() {
        let query = ContinuousQuery::new(two_hop(), Modifiers::select(&["zz"]));
        assert!(matches!(query.validate(3), Err(EngineError::IncompatibleQuery(_))));
    }

    #[test]
    fn test_validate_rejects_arity_mismatch() {
        let query = ContinuousQuery::new(two_hop(), Modifiers::default());
        assert!(matches!(query.validate(4), Err(EngineError::IncompatibleQuery(_))));
    }

    #[test]
    fn test_validate_rejects_ask_construct() {
        let mut modifiers = Modifiers::construct(TupleTemplate::default());
        modifiers.ask = true;
        let query = ContinuousQuery::new(two_hop(), modifiers);
        assert!(query.validate(3).is_err());
    }
}
