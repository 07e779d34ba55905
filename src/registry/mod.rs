//! Table of registered continuous queries and their delivery state.

pub mod query_registry;

pub use query_registry::{
    Delivery, QueryInfo, QueryRegistry, QueryRegistryConfig, QueryRegistryError, RegisteredQuery,
    ResultCallback,
};
