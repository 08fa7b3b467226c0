//! Selection vectors over a fixed-capacity batch.

use super::VECTOR_CAPACITY;

/// Set of active row positions inside a batch.
///
/// `Unfiltered` means every position in `0..size` is active; `Filtered`
/// holds an explicit, strictly increasing list of positions. Neither form
/// may describe more than [`VECTOR_CAPACITY`] rows.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SelectionVector {
    /// All rows `0..size` are active.
    Unfiltered {
        /// Number of active rows.
        size: usize,
    },
    /// Only the listed positions are active.
    Filtered(Vec<u16>),
}

impl Default for SelectionVector {
    fn default() -> Self {
        SelectionVector::Unfiltered { size: 0 }
    }
}

impl SelectionVector {
    /// Creates an unfiltered selection over `0..size`.
    pub fn unfiltered(size: usize) -> Self {
        assert!(size <= VECTOR_CAPACITY, "selection size exceeds capacity");
        SelectionVector::Unfiltered { size }
    }

    /// Creates a filtered selection from explicit positions.
    pub fn filtered(positions: Vec<u16>) -> Self {
        assert!(
            positions.len() <= VECTOR_CAPACITY,
            "selection size exceeds capacity"
        );
        debug_assert!(positions.windows(2).all(|w| w[0] < w[1]));
        SelectionVector::Filtered(positions)
    }

    /// Builds a selection of the positions in `0..size` for which `predicate` holds.
    pub fn from_predicate<F>(size: usize, predicate: F) -> Self
    where
        F: Fn(usize) -> bool,
    {
        let positions: Vec<u16> = (0..size)
            .filter(|&pos| predicate(pos))
            .map(|pos| pos as u16)
            .collect();
        if positions.len() == size {
            Self::unfiltered(size)
        } else {
            Self::filtered(positions)
        }
    }

    /// Resets to an unfiltered selection of `size` rows.
    pub fn set_to_unfiltered(&mut self, size: usize) {
        *self = Self::unfiltered(size);
    }

    /// Replaces the selection with explicit positions.
    pub fn set_to_filtered(&mut self, positions: Vec<u16>) {
        *self = Self::filtered(positions);
    }

    /// Number of active rows.
    pub fn sel_size(&self) -> usize {
        match self {
            SelectionVector::Unfiltered { size } => *size,
            SelectionVector::Filtered(positions) => positions.len(),
        }
    }

    /// Returns `true` when no row is active.
    pub fn is_empty(&self) -> bool {
        self.sel_size() == 0
    }

    /// Returns `true` when the selection is the identity over `0..size`.
    pub fn is_unfiltered(&self) -> bool {
        matches!(self, SelectionVector::Unfiltered { .. })
    }

    /// Physical position of the `idx`-th active row.
    pub fn get(&self, idx: usize) -> usize {
        match self {
            SelectionVector::Unfiltered { size } => {
                debug_assert!(idx < *size);
                idx
            }
            SelectionVector::Filtered(positions) => positions[idx] as usize,
        }
    }

    /// Iterates the active physical positions in order.
    pub fn iter(&self) -> Box<dyn Iterator<Item = usize> + '_> {
        match self {
            SelectionVector::Unfiltered { size } => Box::new(0..*size),
            SelectionVector::Filtered(positions) => {
                Box::new(positions.iter().map(|&pos| pos as usize))
            }
        }
    }

    /// Keeps only the active rows for which `predicate` holds.
    pub fn filter<F>(&self, predicate: F) -> Self
    where
        F: Fn(usize) -> bool,
    {
        match self {
            SelectionVector::Unfiltered { size } => Self::from_predicate(*size, predicate),
            SelectionVector::Filtered(positions) => Self::Filtered(
                positions
                    .iter()
                    .copied()
                    .filter(|&pos| predicate(pos as usize))
                    .collect(),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn predicate_selecting_everything_stays_unfiltered() {
        let sel = SelectionVector::from_predicate(10, |_| true);
        assert!(sel.is_unfiltered());
        assert_eq!(sel.sel_size(), 10);
    }

    #[test]
    fn filter_narrows_positions() {
        let sel = SelectionVector::from_predicate(10, |pos| pos % 2 == 0);
        assert_eq!(sel.iter().collect::<Vec<_>>(), vec![0, 2, 4, 6, 8]);
        let narrowed = sel.filter(|pos| pos > 3);
        assert_eq!(narrowed.iter().collect::<Vec<_>>(), vec![4, 6, 8]);
        assert_eq!(narrowed.get(1), 6);
    }

    #[test]
    #[should_panic(expected = "selection size exceeds capacity")]
    fn oversize_selection_is_rejected() {
        let _ = SelectionVector::unfiltered(VECTOR_CAPACITY + 1);
    }
}
