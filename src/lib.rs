//! Penumbra: the query core of an embedded property-graph engine.
//!
//! Logical plans are rewritten by the optimizer, lowered to a tree of
//! pull-based vectorized operators and executed against columnar node and
//! relationship tables under a transaction.

#![warn(missing_docs)]

pub mod catalog;
pub mod config;
pub mod engine;
pub mod function;
pub mod primitives;
pub mod processor;
pub mod query;
pub mod storage;
pub mod transaction;
pub mod types;

pub use config::EngineConfig;
pub use engine::Engine;
pub use processor::{PlanExplain, QueryResult};
pub use types::{PenumbraError, Result, Value};
