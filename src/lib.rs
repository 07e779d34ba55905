//! # Trickle
//!
//! Trickle is a continuous query engine for streams of RDF-style tuples.
//!
//! Queries are registered once as conjunctive graph patterns and stay registered.
//! Every tuple added to the engine is matched against the registered patterns and
//! joined incrementally with earlier matches; each time a query gains a complete
//! solution, its callback is invoked. Tuples and queries carry a time-to-live and
//! are evicted by a background housekeeping worker once they expire.
//!
//! ## Features
//!
//! - Incremental joins, either with a symmetric hash join over stored partial
//!   solutions or with a cache of single-pattern matches
//! - SELECT projection, DISTINCT / REDUCED, LIMIT / OFFSET, ASK, CONSTRUCT and FILTER
//! - Per-tuple and per-query expiration with cascading eviction
//! - Cancellation and renewal handles that are safe to use from inside callbacks
//! - A SPARQL subset translator and an N-Triples / N-Quads line parser
//!
//! ## Example
//!
//! ```rust
//! use trickle::parsing::parse_query;
//! use trickle::{Engine, EngineConfig, Result, Tuple};
//!
//! fn example() -> Result<()> {
//!     let engine = Engine::new(EngineConfig { start_housekeeping: false, ..Default::default() })?;
//!     let query = parse_query("SELECT ?a ?c WHERE { ?a <http://ex.org/p> ?b . ?b <http://ex.org/q> ?c }")?;
//!     let handle = engine.register_channel(query, 0)?;
//!
//!     engine.add(&Tuple::triple("<http://ex.org/x>", "<http://ex.org/p>", "<http://ex.org/y>"), 60);
//!     engine.add(&Tuple::triple("<http://ex.org/y>", "<http://ex.org/q>", "<http://ex.org/z>"), 60);
//!     assert_eq!(handle.drain().len(), 1);
//!     Ok(())
//! }
//! # example().unwrap();
//! ```

#![warn(clippy::pedantic)]
#![allow(clippy::missing_docs_in_private_items)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::redundant_closure_for_method_calls)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::new_without_default)]

/// Core data structures and types
pub mod core;

/// Continuous query model and validation
pub mod query;

/// Pattern index, join state, deduplication and expiration bookkeeping
pub mod indexing;

/// Registered queries and their delivery pipeline
pub mod registry;

/// Thread-safe engine facade and background housekeeping
pub mod engine;

/// Configuration structures and utilities
pub mod config;

/// Module for parsing queries and RDF lines
pub mod parsing;

pub mod error;

// Re-export commonly used types
pub use crate::config::{interval_cleanup_policy, CleanupPolicy, EngineConfig, JoinStrategy};
pub use crate::core::{
    Binding, Clock, Expiration, GraphPattern, ManualClock, PatternSet, Slot, SystemClock, Term, Tuple,
    TuplePattern, Variable,
};
pub use crate::engine::{Engine, EngineBuilder, EvictionReport, QueryHandle, Subscription};
pub use crate::error::{EngineError, Result};
pub use crate::query::{
    ComparisonOp, ConstructTemplate, ContinuousQuery, Distinctness, Filter, Modifiers, Operand, Projection,
    QueryId, QueryOutput, Solution, TermComparison, TupleTemplate,
};
pub use crate::registry::QueryInfo;
