//! Component models: the predictive-density contract shared by the
//! foreground product-Dirichlet model and the background models.

pub mod background;
pub mod product_dirichlet;

use crate::alphabet::ColumnCounts;
use crate::index::Range;
use statrs::function::gamma::ln_gamma;

/// log of the multivariate Beta function: `sum(ln_gamma(x_k)) -
/// ln_gamma(sum(x_k))`.
pub fn lnbeta(x: &[f64]) -> f64 {
    let sum: f64 = x.iter().sum();
    let terms: f64 = x.iter().map(|&v| ln_gamma(v)).sum();
    terms - ln_gamma(sum)
}

/// Identifies which foreground baseline (by motif width) a cluster was
/// cloned from, so the cluster manager can find a matching free cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BaselineTag(pub u32);

/// The common contract every component model exposes (spec.md sec.4.2).
///
/// Modeled as a trait object rather than an open class hierarchy: the set
/// of implementors is fixed at compile time (`ProductDirichlet`,
/// `IndependenceBackground`, `EntropyBackground`, `DefaultBackground`) --
/// see DESIGN.md, Open Question 3.
pub trait ComponentModel: Send + Sync {
    /// Update sufficient statistics to include `range`. Returns the
    /// number of motif occurrences affected.
    fn add(&mut self, range: Range) -> usize;

    /// The exact inverse of a prior `add` of the same range. Returns the
    /// number of motif occurrences affected.
    fn remove(&mut self, range: Range) -> usize;

    /// log probability of `range` conditional on everything the model has
    /// observed so far. Returns `-inf` for a range whose length does not
    /// match this model's fixed width (foreground models only).
    fn log_predictive(&self, range: Range) -> f64;

    /// log probability of a set of ranges observed jointly.
    fn log_predictive_set(&self, ranges: &[Range]) -> f64;

    /// log probability of everything the model has seen, under its own
    /// prior.
    fn log_likelihood(&self) -> f64;

    /// Number of motif occurrences contained in `range`.
    fn count(&self, range: Range) -> usize;

    /// `Some(width)` for a fixed-width foreground model, `None` for a
    /// background model (whose width is unconstrained).
    fn width(&self) -> Option<usize>;

    /// Deep copy.
    fn clone_box(&self) -> Box<dyn ComponentModel>;

    /// `Some(alpha + n)` per column, `W` rows, for a fixed-width
    /// foreground model; `None` for a background model, whose
    /// sufficient statistics aren't organized by motif column.
    fn sufficient_stats(&self) -> Option<Vec<ColumnCounts>> {
        None
    }
}

impl Clone for Box<dyn ComponentModel> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lnbeta_matches_beta_function_definition() {
        // B(1,1) = 1, so ln B(1,1) = 0
        assert!((lnbeta(&[1.0, 1.0])).abs() < 1e-9);
        // B(2,2) = 1/6
        let expected = (1.0f64 / 6.0).ln();
        assert!((lnbeta(&[2.0, 2.0]) - expected).abs() < 1e-9);
    }
}
