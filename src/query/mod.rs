#![forbid(unsafe_code)]

//! Query planning.
//!
//! Bound expressions, factorized schemas, the logical operator tree and the
//! optimizer passes that rewrite it before it is mapped to physical operators.

/// Bound expressions and their unique names.
pub mod expression;

/// Logical operator tree.
///
/// Intermediate representation consumed by the optimizer and plan mapper.
pub mod logical;

/// Logical plan rewrites.
pub mod optimizer;

/// Performance profiling for query phases.
pub mod profile;

/// Factorization groups and the expression-to-position layout.
pub mod schema;

pub use expression::{Expression, ExpressionKind, ExpressionRef};
pub use logical::{LogicalOperator, LogicalOperatorType, LogicalPlan};
pub use optimizer::{Optimizer, OptimizerPass};
pub use schema::Schema;
