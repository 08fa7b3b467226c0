//! Typed, fixed-capacity value columns.

use std::sync::Arc;

use crate::types::{InternalId, LogicalType, TableId, Value};

use super::state::{DataChunkState, SharedChunkState};
use super::VECTOR_CAPACITY;

#[derive(Clone, Debug)]
enum VectorData {
    Bool(Vec<bool>),
    Int64(Vec<i64>),
    Double(Vec<f64>),
    String(Vec<String>),
    InternalId(Vec<InternalId>),
}

impl VectorData {
    fn with_type(ty: LogicalType) -> Self {
        match ty {
            LogicalType::Bool => VectorData::Bool(vec![false; VECTOR_CAPACITY]),
            LogicalType::Int64 => VectorData::Int64(vec![0; VECTOR_CAPACITY]),
            LogicalType::Double => VectorData::Double(vec![0.0; VECTOR_CAPACITY]),
            LogicalType::String | LogicalType::Any => {
                VectorData::String(vec![String::new(); VECTOR_CAPACITY])
            }
            LogicalType::InternalId => {
                VectorData::InternalId(vec![InternalId::new(TableId(0), 0); VECTOR_CAPACITY])
            }
        }
    }
}

/// A batch of at most [`VECTOR_CAPACITY`] values of one logical type plus a
/// null mask. Vectors of one row batch share a [`SharedChunkState`].
#[derive(Clone, Debug)]
pub struct ValueVector {
    data_type: LogicalType,
    data: VectorData,
    nulls: Vec<bool>,
    state: SharedChunkState,
}

impl ValueVector {
    /// Creates a vector with its own fresh state.
    pub fn new(data_type: LogicalType) -> Self {
        Self::with_state(data_type, DataChunkState::shared())
    }

    /// Creates a vector bound to an existing shared state.
    pub fn with_state(data_type: LogicalType, state: SharedChunkState) -> Self {
        Self {
            data_type,
            data: VectorData::with_type(data_type),
            nulls: vec![false; VECTOR_CAPACITY],
            state,
        }
    }

    /// Logical type of the values.
    pub fn data_type(&self) -> LogicalType {
        self.data_type
    }

    /// Shared selection state.
    pub fn state(&self) -> &SharedChunkState {
        &self.state
    }

    /// Rebinds the vector to another shared state.
    pub fn set_state(&mut self, state: SharedChunkState) {
        self.state = state;
    }

    /// Returns `true` when `other` shares this vector's state.
    pub fn shares_state_with(&self, other: &ValueVector) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }

    /// Whether the value at `pos` is null.
    pub fn is_null(&self, pos: usize) -> bool {
        self.nulls[pos]
    }

    /// Sets or clears the null flag at `pos`.
    pub fn set_null(&mut self, pos: usize, is_null: bool) {
        self.nulls[pos] = is_null;
    }

    /// Reads the value at `pos`.
    pub fn get_value(&self, pos: usize) -> Value {
        if self.nulls[pos] {
            return Value::Null;
        }
        match &self.data {
            VectorData::Bool(v) => Value::Bool(v[pos]),
            VectorData::Int64(v) => Value::Int64(v[pos]),
            VectorData::Double(v) => Value::Double(v[pos]),
            VectorData::String(v) => Value::String(v[pos].clone()),
            VectorData::InternalId(v) => Value::InternalId(v[pos]),
        }
    }

    /// Writes `value` at `pos`. Values of a mismatching type are stored as null.
    pub fn set_value(&mut self, pos: usize, value: &Value) {
        let stored = match (&mut self.data, value) {
            (VectorData::Bool(v), Value::Bool(x)) => {
                v[pos] = *x;
                true
            }
            (VectorData::Int64(v), Value::Int64(x)) => {
                v[pos] = *x;
                true
            }
            (VectorData::Double(v), Value::Double(x)) => {
                v[pos] = *x;
                true
            }
            (VectorData::Double(v), Value::Int64(x)) => {
                v[pos] = *x as f64;
                true
            }
            (VectorData::String(v), Value::String(x)) => {
                v[pos].clone_from(x);
                true
            }
            (VectorData::InternalId(v), Value::InternalId(x)) => {
                v[pos] = *x;
                true
            }
            _ => false,
        };
        self.nulls[pos] = !stored;
    }

    /// Reads an `INT64` value, `None` for nulls or other types.
    pub fn get_i64(&self, pos: usize) -> Option<i64> {
        match &self.data {
            VectorData::Int64(v) if !self.nulls[pos] => Some(v[pos]),
            _ => None,
        }
    }

    /// Writes an `INT64` value.
    pub fn set_i64(&mut self, pos: usize, value: i64) {
        self.set_value(pos, &Value::Int64(value));
    }

    /// Reads an internal id, `None` for nulls or other types.
    pub fn get_internal_id(&self, pos: usize) -> Option<InternalId> {
        match &self.data {
            VectorData::InternalId(v) if !self.nulls[pos] => Some(v[pos]),
            _ => None,
        }
    }

    /// Writes an internal id.
    pub fn set_internal_id(&mut self, pos: usize, id: InternalId) {
        self.set_value(pos, &Value::InternalId(id));
    }

    /// Values at the currently selected positions.
    pub fn selected_values(&self) -> Vec<Value> {
        let state = self.state.read();
        state
            .sel_vector()
            .iter()
            .map(|pos| self.get_value(pos))
            .collect()
    }
}
