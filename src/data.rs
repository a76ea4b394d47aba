//! Immutable count-matrix view of the aligned sequences, with its
//! reverse-complement mirror.

use crate::alphabet::{complement_vec, ColumnCounts, K};
use crate::index::{Index, Range};

/// The read-only, shared data store: one count vector per alignment
/// column, grouped by sequence, plus the complement-permuted mirror used
/// for reverse-complement ranges.
///
/// Built once at load time and never mutated afterward -- every sampler
/// chain holds only a shared reference (`Arc<DataStore>`).
#[derive(Debug, Clone)]
pub struct DataStore {
    forward: Vec<Vec<ColumnCounts>>,
    complement: Vec<Vec<ColumnCounts>>,
}

impl DataStore {
    /// Build a data store from per-sequence columns of soft counts.
    ///
    /// The complement mirror is derived eagerly so that every
    /// `complement()` lookup afterward is O(1), matching the "both stores
    /// are immutable after load" invariant from spec.md sec.3.
    pub fn new(forward: Vec<Vec<ColumnCounts>>) -> Self {
        let complement = forward
            .iter()
            .map(|seq| seq.iter().map(complement_vec).collect())
            .collect();
        DataStore {
            forward,
            complement,
        }
    }

    pub fn num_sequences(&self) -> usize {
        self.forward.len()
    }

    /// Length, in columns, of sequence `seq`.
    pub fn len(&self, seq: usize) -> usize {
        self.forward[seq].len()
    }

    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }

    /// The lengths of every sequence, in order -- used to size the
    /// cluster-assignment and TFBS-start maps.
    pub fn sizes(&self) -> Vec<usize> {
        self.forward.iter().map(|s| s.len()).collect()
    }

    /// The forward count vector at `index`.
    pub fn get(&self, index: Index) -> &ColumnCounts {
        &self.forward[index.seq][index.pos]
    }

    /// The complement-permuted count vector at `index`.
    pub fn get_complement(&self, index: Index) -> &ColumnCounts {
        &self.complement[index.seq][index.pos]
    }

    /// Iterate the columns of `range` in the orientation it specifies,
    /// yielding `(column_index_within_range, &count_vector)` pairs.
    ///
    /// For a forward range this walks `index.pos .. index.pos+length` in
    /// increasing order, reading the forward store. For a reversed range
    /// it walks the same coordinate span from high to low, reading the
    /// complement store -- this is exactly the traversal spec.md sec.4.3
    /// describes for `log_predictive` and `add`/`remove`.
    pub fn columns(&self, range: Range) -> impl Iterator<Item = (usize, &ColumnCounts)> + '_ {
        let seq = range.index.seq;
        let pos = range.index.pos;
        let length = range.length;
        let reverse = range.reverse;
        (0..length).map(move |i| {
            if !reverse {
                (i, &self.forward[seq][pos + i])
            } else {
                (i, &self.complement[seq][pos + length - i - 1])
            }
        })
    }

    /// True iff `range` lies entirely within one sequence.
    pub fn range_in_bounds(&self, range: &Range) -> bool {
        range.index.seq < self.num_sequences() && range.end_pos() <= self.len(range.index.seq)
    }
}

/// Zero-initialized `[[T; K]]`-shaped data, used for the per-position
/// cluster-assignment map and TFBS-start map.
pub fn zeroed_shape<T: Copy>(sizes: &[usize], init: T) -> Vec<Vec<T>> {
    sizes.iter().map(|&n| vec![init; n]).collect()
}

pub const ALPHABET_SIZE: usize = K;

#[cfg(test)]
mod tests {
    use super::*;

    fn uniform_store(n_seq: usize, len: usize, counts: ColumnCounts) -> DataStore {
        DataStore::new(vec![vec![counts; len]; n_seq])
    }

    #[test]
    fn complement_mirror_matches_permutation() {
        let store = uniform_store(1, 3, [1.0, 2.0, 3.0, 4.0, 0.0]);
        let fwd = *store.get(Index::new(0, 0));
        let cmp = *store.get_complement(Index::new(0, 0));
        assert_eq!(cmp, complement_vec(&fwd));
    }

    #[test]
    fn forward_columns_traverse_low_to_high() {
        let mut forward = vec![Vec::new()];
        for i in 0..5 {
            forward[0].push([i as f64, 0.0, 0.0, 0.0, 0.0]);
        }
        let store = DataStore::new(forward);
        let range = Range::forward(Index::new(0, 1), 3);
        let got: Vec<f64> = store.columns(range).map(|(_, c)| c[0]).collect();
        assert_eq!(got, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn reverse_columns_traverse_high_to_low_via_complement() {
        let mut forward = vec![Vec::new()];
        for i in 0..5 {
            // Put the "signal" only in the T channel so the complement
            // (A<->T) moves it to channel 0.
            forward[0].push([0.0, 0.0, 0.0, i as f64, 0.0]);
        }
        let store = DataStore::new(forward);
        let range = Range::new(Index::new(0, 1), 3, true);
        let got: Vec<f64> = store.columns(range).map(|(_, c)| c[0]).collect();
        // reverse traversal of positions 1,2,3 is 3,2,1; complement moves
        // the T-channel value into the A channel.
        assert_eq!(got, vec![3.0, 2.0, 1.0]);
    }
}
