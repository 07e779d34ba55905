//! Text front ends: the SPARQL subset translator and the N-Triples/N-Quads line parser.

pub mod query_parser;
pub mod rdf_parser;

pub use query_parser::{parse_query, QueryParser};
pub use rdf_parser::parse_rdf_line;
