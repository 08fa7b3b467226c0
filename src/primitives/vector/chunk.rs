//! Data chunks and the per-pipeline result set.

use std::sync::Arc;

use crate::types::{LogicalType, Value};

use super::state::{DataChunkState, SharedChunkState};
use super::value_vector::ValueVector;

/// Address of a vector inside a [`ResultSet`].
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Default)]
pub struct DataPos {
    /// Index of the data chunk (one per schema group).
    pub chunk_pos: usize,
    /// Index of the vector inside the chunk.
    pub vector_pos: usize,
}

impl DataPos {
    /// Creates a new data position.
    pub const fn new(chunk_pos: usize, vector_pos: usize) -> Self {
        Self {
            chunk_pos,
            vector_pos,
        }
    }
}

/// Vectors that move through the pipeline together under one state.
#[derive(Clone, Debug)]
pub struct DataChunk {
    state: SharedChunkState,
    vectors: Vec<ValueVector>,
}

impl DataChunk {
    /// Creates a chunk whose vectors have the given types.
    pub fn new(types: &[LogicalType]) -> Self {
        let state = DataChunkState::shared();
        let vectors = types
            .iter()
            .map(|ty| ValueVector::with_state(*ty, Arc::clone(&state)))
            .collect();
        Self { state, vectors }
    }

    /// Creates a chunk backed by a flat single-row state.
    pub fn single_state(types: &[LogicalType]) -> Self {
        let mut chunk = Self::new(types);
        let state = DataChunkState::single();
        for vector in &mut chunk.vectors {
            vector.set_state(Arc::clone(&state));
        }
        chunk.state = state;
        chunk
    }

    /// Shared state of the chunk.
    pub fn state(&self) -> &SharedChunkState {
        &self.state
    }

    /// Number of vectors.
    pub fn num_vectors(&self) -> usize {
        self.vectors.len()
    }

    /// Vector at `pos`.
    pub fn vector(&self, pos: usize) -> &ValueVector {
        &self.vectors[pos]
    }

    /// Mutable vector at `pos`.
    pub fn vector_mut(&mut self, pos: usize) -> &mut ValueVector {
        &mut self.vectors[pos]
    }

    /// Number of active rows.
    pub fn sel_size(&self) -> usize {
        self.state.read().sel_size()
    }
}

/// Vectorized row batch shared by all operators of one pipeline instance.
///
/// Holds one [`DataChunk`] per schema group. The logical number of tuples
/// currently exposed is the product of the chunks' active row counts.
#[derive(Clone, Debug, Default)]
pub struct ResultSet {
    chunks: Vec<DataChunk>,
}

impl ResultSet {
    /// Builds a result set from pre-constructed chunks.
    pub fn new(chunks: Vec<DataChunk>) -> Self {
        Self { chunks }
    }

    /// Number of chunks.
    pub fn num_chunks(&self) -> usize {
        self.chunks.len()
    }

    /// Chunk at `pos`.
    pub fn chunk(&self, pos: usize) -> &DataChunk {
        &self.chunks[pos]
    }

    /// Mutable chunk at `pos`.
    pub fn chunk_mut(&mut self, pos: usize) -> &mut DataChunk {
        &mut self.chunks[pos]
    }

    /// Vector at `pos`.
    pub fn vector(&self, pos: DataPos) -> &ValueVector {
        self.chunks[pos.chunk_pos].vector(pos.vector_pos)
    }

    /// Mutable vector at `pos`.
    pub fn vector_mut(&mut self, pos: DataPos) -> &mut ValueVector {
        self.chunks[pos.chunk_pos].vector_mut(pos.vector_pos)
    }

    /// Returns `true` when `pos` addresses an existing vector.
    pub fn contains(&self, pos: DataPos) -> bool {
        self.chunks
            .get(pos.chunk_pos)
            .is_some_and(|chunk| pos.vector_pos < chunk.num_vectors())
    }

    /// Number of logical tuples currently exposed across all chunks.
    pub fn multiplicity(&self) -> u64 {
        self.chunks
            .iter()
            .map(|chunk| chunk.sel_size() as u64)
            .product()
    }

    /// Expands the current factorized batch into flat tuples over `positions`.
    ///
    /// Every chunk participates in the cross product, so chunks that are not
    /// projected still contribute their multiplicity.
    pub fn flat_tuples(&self, positions: &[DataPos]) -> Vec<Vec<Value>> {
        let selected: Vec<Vec<usize>> = self
            .chunks
            .iter()
            .map(|chunk| chunk.state().read().sel_vector().iter().collect())
            .collect();
        if selected.iter().any(Vec::is_empty) {
            return Vec::new();
        }
        let mut out = Vec::new();
        let mut cursor = vec![0usize; selected.len()];
        loop {
            out.push(
                positions
                    .iter()
                    .map(|pos| {
                        let row = selected[pos.chunk_pos][cursor[pos.chunk_pos]];
                        self.vector(*pos).get_value(row)
                    })
                    .collect(),
            );
            let mut level = selected.len();
            loop {
                if level == 0 {
                    return out;
                }
                level -= 1;
                cursor[level] += 1;
                if cursor[level] < selected[level].len() {
                    break;
                }
                cursor[level] = 0;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multiplicity_is_product_of_chunk_sizes() {
        let mut result = ResultSet::new(vec![
            DataChunk::new(&[LogicalType::Int64]),
            DataChunk::new(&[LogicalType::Int64]),
        ]);
        for (chunk_pos, size) in [(0usize, 2usize), (1, 3)] {
            let chunk = result.chunk_mut(chunk_pos);
            for pos in 0..size {
                chunk.vector_mut(0).set_i64(pos, (chunk_pos * 10 + pos) as i64);
            }
            chunk.state().write().sel_vector_mut().set_to_unfiltered(size);
        }
        assert_eq!(result.multiplicity(), 6);
        let tuples = result.flat_tuples(&[DataPos::new(0, 0), DataPos::new(1, 0)]);
        assert_eq!(tuples.len(), 6);
        assert_eq!(tuples[0], vec![Value::Int64(0), Value::Int64(10)]);
        assert_eq!(tuples[5], vec![Value::Int64(1), Value::Int64(12)]);
    }

    #[test]
    fn empty_chunk_yields_no_tuples() {
        let result = ResultSet::new(vec![DataChunk::new(&[LogicalType::Int64])]);
        assert_eq!(result.multiplicity(), 0);
        assert!(result.flat_tuples(&[DataPos::new(0, 0)]).is_empty());
    }
}
