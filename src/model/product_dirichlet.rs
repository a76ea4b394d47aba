//! Product-Dirichlet foreground model: a `W x K` position-weight matrix
//! over the alphabet, with conjugate Dirichlet pseudocounts.

use std::sync::Arc;

use ndarray::Array2;

use crate::alphabet::K;
use crate::data::DataStore;
use crate::index::Range;
use crate::model::{lnbeta, ComponentModel};

/// Foreground motif model of fixed width `W`.
///
/// `counts[i]` always holds `alpha[i] + observed soft counts at column i`,
/// so `log_likelihood` can read off `lnbeta(counts[i]) - lnbeta(alpha[i])`
/// directly without re-subtracting the prior -- ground truth:
/// `component-model_product.cc`, where `m_counts` is initialized to
/// `m_alpha` and only ever incremented/decremented by observations.
#[derive(Clone)]
pub struct ProductDirichlet {
    width: usize,
    alpha: Array2<f64>,
    counts: Array2<f64>,
    data: Arc<DataStore>,
}

impl ProductDirichlet {
    /// Construct a fresh (unobserved) product-Dirichlet model with a flat
    /// pseudocount matrix: every column gets the same `alpha_default`
    /// pseudocount vector.
    pub fn new(width: usize, alpha_default: [f64; K], data: Arc<DataStore>) -> Self {
        let mut alpha = Array2::<f64>::zeros((width, K));
        for mut row in alpha.rows_mut() {
            row.assign(&ndarray::arr1(&alpha_default));
        }
        let counts = alpha.clone();
        ProductDirichlet {
            width,
            alpha,
            counts,
            data,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }
}

impl ComponentModel for ProductDirichlet {
    fn add(&mut self, range: Range) -> usize {
        assert_eq!(
            range.length, self.width,
            "product-Dirichlet add: range length must equal motif width"
        );
        for (i, col) in self.data.columns(range) {
            for k in 0..K {
                self.counts[[i, k]] += col[k];
            }
        }
        1
    }

    fn remove(&mut self, range: Range) -> usize {
        assert_eq!(
            range.length, self.width,
            "product-Dirichlet remove: range length must equal motif width"
        );
        for (i, col) in self.data.columns(range) {
            for k in 0..K {
                self.counts[[i, k]] -= col[k];
                debug_assert!(
                    self.counts[[i, k]] >= -1e-9,
                    "product-Dirichlet count went negative: remove without matching add"
                );
            }
        }
        1
    }

    fn log_predictive(&self, range: Range) -> f64 {
        if range.length != self.width {
            return f64::NEG_INFINITY;
        }
        let mut result = 0.0;
        for (i, col) in self.data.columns(range) {
            let row = self.counts.row(i);
            let with_obs: Vec<f64> = (0..K).map(|k| row[k] + col[k]).collect();
            let without: Vec<f64> = row.to_vec();
            result += lnbeta(&with_obs) - lnbeta(&without);
        }
        result
    }

    fn log_predictive_set(&self, ranges: &[Range]) -> f64 {
        assert!(!ranges.is_empty());
        let length = ranges[0].length;
        if length != self.width {
            return f64::NEG_INFINITY;
        }
        let mut result = 0.0;
        for i in 0..length {
            let mut tmp = [0.0f64; K];
            for r in ranges {
                let col = column_at(&self.data, *r, i);
                for k in 0..K {
                    tmp[k] += col[k];
                }
            }
            let row = self.counts.row(i);
            let with_obs: Vec<f64> = (0..K).map(|k| row[k] + tmp[k]).collect();
            let without: Vec<f64> = row.to_vec();
            result += lnbeta(&with_obs) - lnbeta(&without);
        }
        result
    }

    fn log_likelihood(&self) -> f64 {
        let mut result = 0.0;
        for i in 0..self.width {
            result += lnbeta(&self.counts.row(i).to_vec()) - lnbeta(&self.alpha.row(i).to_vec());
        }
        result
    }

    fn count(&self, range: Range) -> usize {
        range.length / self.width
    }

    fn width(&self) -> Option<usize> {
        Some(self.width)
    }

    fn clone_box(&self) -> Box<dyn ComponentModel> {
        Box::new(self.clone())
    }

    fn sufficient_stats(&self) -> Option<Vec<crate::alphabet::ColumnCounts>> {
        Some(
            self.counts
                .rows()
                .into_iter()
                .map(|row| {
                    let mut col = [0.0; K];
                    col.copy_from_slice(row.as_slice().expect("counts row is contiguous"));
                    col
                })
                .collect(),
        )
    }
}

/// Fetch the `i`-th column of `range` respecting its own orientation, used
/// by `log_predictive_set` when summing several ranges column-wise.
fn column_at(data: &DataStore, range: Range, i: usize) -> crate::alphabet::ColumnCounts {
    let index = if !range.reverse {
        range.index.advanced(i)
    } else {
        range.index.advanced(range.length - i - 1)
    };
    if !range.reverse {
        *data.get(index)
    } else {
        *data.get_complement(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::Index;

    fn store_with(col: [f64; K], len: usize) -> Arc<DataStore> {
        Arc::new(DataStore::new(vec![vec![col; len]]))
    }

    #[test]
    fn length_mismatch_returns_neg_infinity() {
        let data = store_with([1.0, 0.0, 0.0, 0.0, 0.0], 10);
        let model = ProductDirichlet::new(4, [1.0; K], data);
        let bad_range = Range::forward(Index::new(0, 0), 5);
        assert_eq!(model.log_predictive(bad_range), f64::NEG_INFINITY);
    }

    #[test]
    fn remove_is_inverse_of_add() {
        let data = store_with([1.0, 2.0, 3.0, 4.0, 0.0], 10);
        let mut model = ProductDirichlet::new(4, [0.5; K], data);
        let before = model.counts.clone();
        let range = Range::forward(Index::new(0, 0), 4);
        model.add(range);
        model.remove(range);
        for i in 0..4 {
            for k in 0..K {
                assert!((model.counts[[i, k]] - before[[i, k]]).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn log_predictive_single_range_equals_log_predictive_set_single() {
        let data = store_with([1.0, 2.0, 3.0, 4.0, 0.0], 10);
        let model = ProductDirichlet::new(4, [0.5; K], data);
        let range = Range::forward(Index::new(0, 0), 4);
        let a = model.log_predictive(range);
        let b = model.log_predictive_set(&[range]);
        assert!((a - b).abs() < 1e-9);
    }

    #[test]
    fn log_predictive_set_sums_disjoint_ranges_columnwise() {
        let data = store_with([1.0, 0.0, 0.0, 0.0, 0.0], 20);
        let model = ProductDirichlet::new(4, [0.5; K], data);
        let r1 = Range::forward(Index::new(0, 0), 4);
        let r2 = Range::forward(Index::new(0, 8), 4);
        let joint = model.log_predictive_set(&[r1, r2]);
        // joint counts double the single-range counts at every column, so
        // this should differ from a plain sum of independent evaluations;
        // just check it is finite and not equal to 2x a single evaluation
        // (since the beta function is nonlinear in the counts).
        let single = model.log_predictive(r1);
        assert!(joint.is_finite());
        assert!((joint - 2.0 * single).abs() > 1e-6);
    }

    #[test]
    fn reverse_forward_duality_on_symmetric_data() {
        // A count matrix symmetric under the complement permutation:
        // every column is invariant under A<->T, C<->G.
        let col = [2.0, 3.0, 3.0, 2.0, 0.0];
        let data = store_with(col, 10);
        let model = ProductDirichlet::new(4, [0.5; K], data);
        let fwd = Range::forward(Index::new(0, 0), 4);
        let rev = Range::new(Index::new(0, 0), 4, true);
        let a = model.log_predictive(fwd);
        let b = model.log_predictive(rev);
        assert!((a - b).abs() < 1e-9);
    }
}
