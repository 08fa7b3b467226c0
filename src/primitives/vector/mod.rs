//! Vectorized batch primitives.
//!
//! Columns travel through the engine in fixed-capacity [`ValueVector`]s. All
//! vectors of one row batch share a single [`DataChunkState`] so that a
//! filter narrowing the selection is observed by every column at once.

mod chunk;
mod selection;
mod state;
mod value_vector;

/// Maximum number of values held by one vector.
pub const VECTOR_CAPACITY: usize = 2048;

pub use chunk::{DataChunk, DataPos, ResultSet};
pub use selection::SelectionVector;
pub use state::{DataChunkState, SharedChunkState};
pub use value_vector::ValueVector;
