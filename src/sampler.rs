//! The per-chain Gibbs sampler: per-position reassignment sweeps plus
//! optional interleaved Metropolis-Hastings whole-motif moves.

use rand::Rng;

use crate::alphabet::ColumnCounts;
use crate::cluster::ClusterTag;
use crate::index::{Index, Range};
use crate::model::BaselineTag;
use crate::state::{DpmPartition, PartitionState};

/// One registered foreground motif width, paired with the baseline tag
/// `ClusterManager::acquire_free_cluster` uses to mint a fresh cluster of
/// that width.
#[derive(Debug, Clone, Copy)]
pub struct MotifBaseline {
    pub baseline: BaselineTag,
    pub width: usize,
}

/// Pitman-Yor mixture weights: `alpha` is the concentration parameter,
/// `discount` the second Pitman-Yor parameter (0 recovers the plain
/// Dirichlet-process weight, the Open-Question collapsing spec.md
/// authorizes).
#[derive(Debug, Clone, Copy)]
pub struct MixtureParams {
    pub alpha: f64,
    pub discount: f64,
}

/// One foreground cluster's report-facing snapshot at a single sampling
/// step: its tag, occupancy, and `alpha + n` matrix (one row per motif
/// column).
pub type ClusterSnapshot = (ClusterTag, usize, Vec<ColumnCounts>);

/// Per-chain scalar and partition trace, one entry per sampling step.
#[derive(Debug, Clone, Default)]
pub struct SamplingHistory {
    pub switches: Vec<f64>,
    pub log_likelihood: Vec<f64>,
    pub log_posterior: Vec<f64>,
    pub num_components: Vec<f64>,
    pub temperature: Vec<f64>,
    pub partitions: Vec<DpmPartition>,
    pub cluster_stats: Vec<Vec<ClusterSnapshot>>,
}

impl SamplingHistory {
    #[allow(clippy::too_many_arguments)]
    pub fn push_step(
        &mut self,
        switches: f64,
        log_likelihood: f64,
        log_posterior: f64,
        num_components: f64,
        temperature: f64,
        partition: DpmPartition,
        cluster_stats: Vec<ClusterSnapshot>,
    ) {
        self.switches.push(switches);
        self.log_likelihood.push(log_likelihood);
        self.log_posterior.push(log_posterior);
        self.num_components.push(num_components);
        self.temperature.push(temperature);
        self.partitions.push(partition);
        self.cluster_stats.push(cluster_stats);
    }
}

/// Snapshot every live foreground cluster's `(tag, size, alpha + n)` at
/// the instant a sampling step's partition is recorded, so a later report
/// can dump the exact matrix backing whichever partition gets selected.
pub fn foreground_snapshot(state: &PartitionState) -> Vec<ClusterSnapshot> {
    let bg_tag = state.bg_tag();
    state
        .clusters()
        .used_clusters()
        .filter(|c| c.tag() != bg_tag)
        .filter_map(|c| c.sufficient_stats().map(|stats| (c.tag(), c.size(), stats)))
        .collect()
}

/// One candidate placement a Gibbs step weighs: either "leave this
/// position to the background" or "start a motif of some baseline's
/// width here", in a given orientation.
enum Candidate {
    Background,
    ExistingCluster { tag: ClusterTag, reverse: bool },
    NewCluster { baseline: MotifBaseline, reverse: bool },
}

/// Drives one chain's sweeps and Metropolis moves against its own
/// `PartitionState`. Holds no RNG itself -- every sampling call takes one,
/// so tests can inject a seeded `ChaCha8Rng` and production code can seed
/// from wall-clock/thread launch order without threading two code paths
/// through the rest of the type.
pub struct GibbsSampler {
    params: MixtureParams,
    baselines: Vec<MotifBaseline>,
    metropolis_frequency: usize,
    temperature: f64,
}

impl GibbsSampler {
    pub fn new(
        params: MixtureParams,
        baselines: Vec<MotifBaseline>,
        metropolis_frequency: usize,
        temperature: f64,
    ) -> Self {
        GibbsSampler {
            params,
            baselines,
            metropolis_frequency,
            temperature,
        }
    }

    pub fn temperature(&self) -> f64 {
        self.temperature
    }

    fn max_width(&self) -> usize {
        self.baselines.iter().map(|b| b.width).max().unwrap_or(0)
    }

    /// Run one Metropolis-Hastings whole-cluster move every
    /// `metropolis_frequency` steps (a frequency of 0 disables MH moves
    /// entirely), interleaved between Gibbs sweeps per SPEC_FULL.md sec.4.6.
    pub fn metropolis_interleave<R: Rng + ?Sized>(&self, state: &mut PartitionState, step: usize, rng: &mut R) -> bool {
        if self.metropolis_frequency == 0 || step % self.metropolis_frequency != 0 {
            return false;
        }
        self.metropolis_step(state, rng)
    }

    /// Propose shifting a uniformly-chosen foreground cluster one position
    /// left or right, and accept with probability
    /// `min(1, exp(new_log_likelihood - old_log_likelihood))` against the
    /// pre-move checkpoint. `move_left`/`move_right` themselves only roll
    /// back on the "cluster would be emptied" bailout, so a rejected-but-
    /// applied move is undone here instead. Returns `false` with no effect
    /// if there is no foreground cluster yet to move.
    fn metropolis_step<R: Rng + ?Sized>(&self, state: &mut PartitionState, rng: &mut R) -> bool {
        let candidates: Vec<ClusterTag> = state
            .clusters()
            .used_tags()
            .iter()
            .copied()
            .filter(|&tag| tag != state.bg_tag())
            .collect();
        if candidates.is_empty() {
            return false;
        }
        let tag = candidates[rng.gen_range(0..candidates.len())];
        let left = rng.gen_bool(0.5);

        let checkpoint = state.checkpoint(tag);
        let before = state.total_log_likelihood();

        let moved = if left {
            state.move_left(tag, 1)
        } else {
            state.move_right(tag, 1)
        };
        if !moved {
            return false;
        }

        let after = state.total_log_likelihood();
        let log_ratio = after - before;
        let accept = log_ratio >= 0.0 || rng.gen::<f64>() < log_ratio.exp();
        if !accept {
            state.restore_checkpoint(checkpoint);
        }
        accept
    }

    /// log probability density of placing `range` under whichever model
    /// `candidate` names, plus its Pitman-Yor prior weight. Background is
    /// scored as a single-position addition; foreground candidates are
    /// scored at their own fixed width.
    fn log_weight(&self, state: &PartitionState, index: Index, candidate: &Candidate) -> Option<(f64, Range)> {
        match *candidate {
            Candidate::Background => {
                let range = Range::forward(index, 1);
                let bg = state.clusters().cluster(state.bg_tag());
                let prior = (bg.size() as f64).max(1.0).ln();
                Some((prior + bg.model().log_predictive(range), range))
            }
            Candidate::ExistingCluster { tag, reverse } => {
                let cluster = state.clusters().cluster(tag);
                let width = cluster.model().width()?;
                if width > state.get_free_range(index, self.max_width())? {
                    return None;
                }
                let range = Range::new(index, width, reverse);
                let prior = (cluster.size() as f64 - self.params.discount).max(f64::MIN_POSITIVE).ln();
                Some((prior + cluster.model().log_predictive(range), range))
            }
            Candidate::NewCluster { baseline, reverse } => {
                let free = state.get_free_range(index, self.max_width())?;
                if baseline.width > free {
                    return None;
                }
                let range = Range::new(index, baseline.width, reverse);
                let used_components = state
                    .clusters()
                    .used_tags()
                    .iter()
                    .filter(|&&t| t != state.bg_tag())
                    .count() as f64;
                let prior = (self.params.alpha + self.params.discount * used_components).ln();
                // a fresh cluster has no observations yet, so its
                // predictive density is read directly off the registered
                // (still-empty) baseline prototype.
                let predictive = state.clusters().baseline_model(baseline.baseline).log_predictive(range);
                Some((prior + predictive, range))
            }
        }
    }

    /// Resample the cluster owning `index`: remove whatever currently
    /// starts there (if anything), weigh every candidate placement in log
    /// space, sample one with a log-sum-exp-stabilized categorical draw,
    /// and commit it. Returns `true` if the winning placement differs from
    /// the one removed (a "switch", tallied in the sampling history).
    pub fn gibbs_step<R: Rng + ?Sized>(
        &self,
        state: &mut PartitionState,
        index: Index,
        rng: &mut R,
    ) -> bool {
        let previous_tag = state.clusters().assignment(index);
        let was_motif_start = previous_tag
            .map(|tag| !state.is_background(tag))
            .unwrap_or(false);

        if was_motif_start {
            let tag = previous_tag.unwrap();
            let width = state
                .clusters()
                .cluster(tag)
                .model()
                .width()
                .expect("motif-owning cluster must be foreground");
            state.remove(Range::forward(index, width), tag);
        }

        let mut candidates = vec![Candidate::Background];
        for &tag in state.clusters().used_tags() {
            if tag != state.bg_tag() {
                candidates.push(Candidate::ExistingCluster { tag, reverse: false });
                candidates.push(Candidate::ExistingCluster { tag, reverse: true });
            }
        }
        for &baseline in &self.baselines {
            candidates.push(Candidate::NewCluster { baseline, reverse: false });
            candidates.push(Candidate::NewCluster { baseline, reverse: true });
        }

        let mut weights = Vec::with_capacity(candidates.len());
        let mut ranges = Vec::with_capacity(candidates.len());
        let mut surviving = Vec::with_capacity(candidates.len());
        for (i, candidate) in candidates.iter().enumerate() {
            if let Some((w, range)) = self.log_weight(state, index, candidate) {
                weights.push(w / self.temperature);
                ranges.push(range);
                surviving.push(i);
            }
        }

        let winner = categorical_from_log_weights(&weights, rng);
        let chosen_range = ranges[winner];

        let new_tag = match &candidates[surviving[winner]] {
            Candidate::Background => state.bg_tag(),
            Candidate::ExistingCluster { tag, .. } => *tag,
            Candidate::NewCluster { baseline, .. } => {
                state.clusters_mut().acquire_free_cluster(baseline.baseline)
            }
        };

        state.add(chosen_range, new_tag);

        match previous_tag {
            Some(tag) if tag == new_tag && !was_motif_start => false,
            _ => true,
        }
    }
}

/// Sample an index in proportion to `exp(log_weights)`, normalizing in log
/// space with the standard log-sum-exp trick so no intermediate
/// probability underflows. The cumulative sum is monotone, so the draw is
/// located with a binary search rather than a linear scan.
fn categorical_from_log_weights<R: Rng + ?Sized>(log_weights: &[f64], rng: &mut R) -> usize {
    assert!(!log_weights.is_empty(), "categorical draw over an empty candidate set");
    let max = log_weights.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let mut cumulative = Vec::with_capacity(log_weights.len());
    let mut total = 0.0;
    for &w in log_weights {
        total += (w - max).exp();
        cumulative.push(total);
    }
    let draw = rng.gen::<f64>() * total;
    bisection::bisect_left(&cumulative, &draw).min(log_weights.len() - 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster_manager::ClusterManager;
    use crate::data::DataStore;
    use crate::model::background::IndependenceBackground;
    use crate::model::product_dirichlet::ProductDirichlet;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use std::sync::Arc;

    fn make_chain(seq_len: usize) -> (PartitionState, GibbsSampler) {
        let data = Arc::new(DataStore::new(vec![vec![[1.0, 1.0, 1.0, 1.0, 0.0]; seq_len]]));
        let mut mgr = ClusterManager::new(&[seq_len]);
        let bg_tag = mgr.add_fixed_cluster(Box::new(IndependenceBackground::new([1.0; 5], &data, None)));
        let baseline_tag = mgr.register_baseline(Box::new(ProductDirichlet::new(4, [0.5; 5], data)));
        let state = PartitionState::new(&[seq_len], mgr, bg_tag, 4, 4);
        let sampler = GibbsSampler::new(
            MixtureParams { alpha: 1.0, discount: 0.0 },
            vec![MotifBaseline { baseline: baseline_tag, width: 4 }],
            0,
            1.0,
        );
        (state, sampler)
    }

    #[test]
    fn gibbs_step_leaves_num_tfbs_zero_or_one_after_a_single_position() {
        let (mut state, sampler) = make_chain(30);
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        sampler.gibbs_step(&mut state, Index::new(0, 5), &mut rng);
        assert!(state.num_tfbs() <= 1);
    }

    #[test]
    fn categorical_from_log_weights_always_in_range() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        for _ in 0..50 {
            let idx = categorical_from_log_weights(&[1.0, 2.0, -5.0, 0.5], &mut rng);
            assert!(idx < 4);
        }
    }

    #[test]
    fn metropolis_interleave_is_a_no_op_at_zero_frequency() {
        let (mut state, _) = make_chain(30);
        let sampler = GibbsSampler::new(
            MixtureParams { alpha: 1.0, discount: 0.0 },
            vec![],
            0,
            1.0,
        );
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        assert!(!sampler.metropolis_interleave(&mut state, 0, &mut rng));
        assert!(!sampler.metropolis_interleave(&mut state, 5, &mut rng));
    }

    #[test]
    fn metropolis_interleave_only_fires_on_the_configured_stride() {
        let (mut state, _) = make_chain(30);
        let sampler = GibbsSampler::new(
            MixtureParams { alpha: 1.0, discount: 0.0 },
            vec![],
            3,
            1.0,
        );
        let mut rng = ChaCha8Rng::seed_from_u64(2);
        // no foreground cluster exists yet, so every attempt is a no-op
        // regardless of stride -- this only checks the stride gate itself
        // doesn't panic on steps that aren't multiples of the frequency.
        for step in 0..9 {
            sampler.metropolis_interleave(&mut state, step, &mut rng);
        }
        assert_eq!(state.num_tfbs(), 0);
    }

    #[test]
    fn metropolis_step_relocates_or_leaves_the_motif_untouched() {
        let (mut state, sampler) = make_chain(40);
        let baseline = sampler.baselines[0].baseline;
        let tag = state.clusters_mut().acquire_free_cluster(baseline);
        let range = Range::forward(Index::new(0, 15), 4);
        state.add(range, tag);
        assert_eq!(state.num_tfbs(), 1);

        let mut rng = ChaCha8Rng::seed_from_u64(99);
        for step in 0..10 {
            sampler.metropolis_interleave(&mut state, step, &mut rng);
        }
        // a single motif can be shifted or rejected any number of times,
        // but it is never duplicated or dropped by the MH interleave.
        assert_eq!(state.num_tfbs(), 1);
    }
}
