#![forbid(unsafe_code)]

//! Identifiers, scalar values and the crate-wide error type.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Identifier of a physical node or relationship table.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
pub struct TableId(pub u64);

/// Identifier of a transaction handed out by the transaction manager.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct TransactionId(pub u64);

/// Identifier assigned to physical operators by the plan mapper.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default)]
pub struct OperatorId(pub u32);

/// Index of a node group inside a table (committed or uncommitted).
pub type NodeGroupIdx = u64;
/// Position of a property column inside a table.
pub type ColumnId = u32;
/// Row offset of a node inside its table.
pub type NodeOffset = u64;

/// Table-qualified node identifier.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
pub struct InternalId {
    /// Table owning the row.
    pub table: TableId,
    /// Row offset within the table.
    pub offset: NodeOffset,
}

impl InternalId {
    /// Creates a new internal identifier.
    pub const fn new(table: TableId, offset: NodeOffset) -> Self {
        Self { table, offset }
    }
}

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for OperatorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for InternalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.table.0, self.offset)
    }
}

impl From<u64> for TableId {
    fn from(value: u64) -> Self {
        TableId(value)
    }
}

/// Logical type of a column or expression.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Serialize, Deserialize)]
pub enum LogicalType {
    /// Boolean.
    Bool,
    /// Signed 64-bit integer.
    Int64,
    /// 64-bit float.
    Double,
    /// UTF-8 string.
    String,
    /// Table-qualified node or relationship id.
    InternalId,
    /// Type not yet resolved by the binder.
    Any,
}

impl fmt::Display for LogicalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LogicalType::Bool => "BOOL",
            LogicalType::Int64 => "INT64",
            LogicalType::Double => "DOUBLE",
            LogicalType::String => "STRING",
            LogicalType::InternalId => "INTERNAL_ID",
            LogicalType::Any => "ANY",
        };
        f.write_str(name)
    }
}

/// Scalar value flowing through storage, vectors and query results.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", content = "v")]
pub enum Value {
    /// Null.
    Null,
    /// Boolean.
    Bool(bool),
    /// Signed 64-bit integer.
    Int64(i64),
    /// 64-bit float.
    Double(f64),
    /// UTF-8 string.
    String(String),
    /// Internal node or relationship identifier.
    InternalId(InternalId),
}

impl Value {
    /// Returns the logical type of the value, `Any` for nulls.
    pub fn logical_type(&self) -> LogicalType {
        match self {
            Value::Null => LogicalType::Any,
            Value::Bool(_) => LogicalType::Bool,
            Value::Int64(_) => LogicalType::Int64,
            Value::Double(_) => LogicalType::Double,
            Value::String(_) => LogicalType::String,
            Value::InternalId(_) => LogicalType::InternalId,
        }
    }

    /// Returns `true` when the value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Total ordering used by sorts: nulls last, numbers compared numerically.
    pub fn total_cmp(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Null, _) => Ordering::Greater,
            (_, Value::Null) => Ordering::Less,
            _ => self.partial_cmp_value(other).unwrap_or(Ordering::Equal),
        }
    }

    /// Compares two non-null values of compatible types.
    pub fn partial_cmp_value(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::Int64(a), Value::Int64(b)) => Some(a.cmp(b)),
            (Value::Double(a), Value::Double(b)) => a.partial_cmp(b),
            (Value::Int64(a), Value::Double(b)) => (*a as f64).partial_cmp(b),
            (Value::Double(a), Value::Int64(b)) => a.partial_cmp(&(*b as f64)),
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            (Value::InternalId(a), Value::InternalId(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Int64(v) => write!(f, "{v}"),
            Value::Double(v) => write!(f, "{v}"),
            Value::String(v) => f.write_str(v),
            Value::InternalId(v) => write!(f, "{v}"),
        }
    }
}

/// Errors surfaced at the query boundary.
#[derive(Debug, Error)]
pub enum PenumbraError {
    /// User-visible query failure (unsupported shape, bad parameter, binder error).
    #[error("query error: {0}")]
    Query(String),
    /// Storage-layer misuse or failure.
    #[error("storage error: {0}")]
    Storage(String),
    /// Table id did not resolve to a live table.
    #[error("table {0} not found")]
    TableNotFound(TableId),
    /// Named catalog object was not found.
    #[error("{0} not found")]
    NotFound(&'static str),
    /// Invalid argument supplied by a caller.
    #[error("invalid argument: {0}")]
    Invalid(&'static str),
    /// Query was interrupted by its issuer.
    #[error("interrupted")]
    Interrupted,
    /// Query exceeded its deadline.
    #[error("query timed out")]
    Timeout,
    /// Configuration could not be loaded or parsed.
    #[error("configuration error: {0}")]
    Config(String),
    /// I/O failure while reading configuration.
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
}

impl PenumbraError {
    /// Returns a machine-readable code for the error variant.
    pub fn code(&self) -> &'static str {
        match self {
            PenumbraError::Query(_) => "QueryError",
            PenumbraError::Storage(_) => "StorageError",
            PenumbraError::TableNotFound(_) => "TableNotFound",
            PenumbraError::NotFound(_) => "NotFound",
            PenumbraError::Invalid(_) => "InvalidArgument",
            PenumbraError::Interrupted => "Interrupted",
            PenumbraError::Timeout => "Timeout",
            PenumbraError::Config(_) => "ConfigError",
            PenumbraError::Io(_) => "Io",
        }
    }
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, PenumbraError>;
