//! Selection/cardinality state shared by every vector of one row batch.

use std::sync::Arc;

use parking_lot::RwLock;

use super::selection::SelectionVector;

/// Shared handle to a [`DataChunkState`]. Lives as long as the longest-lived
/// vector that references it.
pub type SharedChunkState = Arc<RwLock<DataChunkState>>;

/// Active-row state of a data chunk.
///
/// A flat state exposes exactly one "current" row to its consumers even when
/// the underlying batch holds more; an unflat state exposes the whole
/// selection.
#[derive(Clone, Debug, Default)]
pub struct DataChunkState {
    selection: SelectionVector,
    flat: bool,
}

impl DataChunkState {
    /// Creates an empty unflat state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty state wrapped for sharing.
    pub fn shared() -> SharedChunkState {
        Arc::new(RwLock::new(Self::new()))
    }

    /// Creates a flat state with a single active row at position 0.
    pub fn single() -> SharedChunkState {
        let mut state = Self::new();
        state.selection.set_to_unfiltered(1);
        state.flat = true;
        Arc::new(RwLock::new(state))
    }

    /// Current selection vector.
    pub fn sel_vector(&self) -> &SelectionVector {
        &self.selection
    }

    /// Mutable access to the selection vector.
    pub fn sel_vector_mut(&mut self) -> &mut SelectionVector {
        &mut self.selection
    }

    /// Number of active rows.
    pub fn sel_size(&self) -> usize {
        self.selection.sel_size()
    }

    /// Whether the chunk currently exposes a single flattened row.
    pub fn is_flat(&self) -> bool {
        self.flat
    }

    /// Marks the state flat (single current row) or unflat.
    pub fn set_flat(&mut self, flat: bool) {
        self.flat = flat;
    }

    /// Clears the selection to zero rows.
    pub fn reset(&mut self) {
        self.selection.set_to_unfiltered(0);
    }
}
