//! Low-level execution primitives.
//!
//! Value vectors, data chunks and result sets that physical operators pass
//! between each other.

/// Vectors, chunks and selection state.
pub mod vector;
