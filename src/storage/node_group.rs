use crate::types::{ColumnId, LogicalType, NodeOffset, PenumbraError, Result, Value};

/// Fixed-capacity columnar storage unit of a node table.
///
/// Committed groups are published behind `Arc` and never mutated afterwards;
/// commits that extend a partially filled group replace it with a copy.
#[derive(Clone, Debug)]
pub struct NodeGroup {
    start_offset: NodeOffset,
    capacity: u64,
    columns: Vec<Vec<Value>>,
    num_rows: u64,
}

impl NodeGroup {
    /// Creates an empty group whose first row has offset `start_offset`.
    pub fn new(start_offset: NodeOffset, capacity: u64, num_columns: usize) -> Self {
        Self {
            start_offset,
            capacity,
            columns: vec![Vec::new(); num_columns],
            num_rows: 0,
        }
    }

    /// Offset of the first row.
    pub fn start_offset(&self) -> NodeOffset {
        self.start_offset
    }

    /// Number of rows stored.
    pub fn num_rows(&self) -> u64 {
        self.num_rows
    }

    /// Maximum number of rows.
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Whether another row can be appended.
    pub fn is_full(&self) -> bool {
        self.num_rows >= self.capacity
    }

    /// Appends a row; the caller validated arity and types.
    pub fn append(&mut self, row: Vec<Value>) -> Result<NodeOffset> {
        if self.is_full() {
            return Err(PenumbraError::Storage("node group is full".into()));
        }
        if row.len() != self.columns.len() {
            return Err(PenumbraError::Storage(format!(
                "expected {} column values, got {}",
                self.columns.len(),
                row.len()
            )));
        }
        for (column, value) in self.columns.iter_mut().zip(row) {
            column.push(value);
        }
        let offset = self.start_offset + self.num_rows;
        self.num_rows += 1;
        Ok(offset)
    }

    /// Value of `column` at row index `row` (relative to the group).
    pub fn value(&self, column: ColumnId, row: u64) -> &Value {
        &self.columns[column as usize][row as usize]
    }
}

/// Checks a row against the declared column types.
pub(crate) fn validate_row(types: &[LogicalType], row: &[Value]) -> Result<()> {
    if types.len() != row.len() {
        return Err(PenumbraError::Storage(format!(
            "expected {} column values, got {}",
            types.len(),
            row.len()
        )));
    }
    for (ty, value) in types.iter().zip(row) {
        let ok = match value {
            Value::Null => true,
            Value::Int64(_) => matches!(ty, LogicalType::Int64 | LogicalType::Double),
            other => other.logical_type() == *ty,
        };
        if !ok {
            return Err(PenumbraError::Storage(format!(
                "value {value} does not match column type {ty}"
            )));
        }
    }
    Ok(())
}
