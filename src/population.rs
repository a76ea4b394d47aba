//! Population MCMC: independent chains run in parallel OS threads, their
//! sampling histories merged sample-major, chain-minor.

use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::index::Index;
use crate::sampler::{foreground_snapshot, ClusterSnapshot, GibbsSampler, SamplingHistory};
use crate::state::{DpmPartition, PartitionState};

/// One chain's starting state, owned exclusively by its own thread for the
/// duration of `sample()` -- no chain ever observes another chain's state.
pub struct Chain {
    pub state: PartitionState,
    pub sampler: GibbsSampler,
    pub rng: ChaCha8Rng,
}

impl Chain {
    pub fn new(state: PartitionState, sampler: GibbsSampler, seed: u64) -> Self {
        Chain {
            state,
            sampler,
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }
}

/// Runs `N` chains to completion and merges their histories.
///
/// Grounded on `pmcmc.cc`: each chain is a fully independent `PartitionState`
/// + `GibbsSampler` + RNG + history; the driver synchronizes only at spawn
/// and at join (`std::thread::scope` gives this for free without requiring
/// `'static` bounds on the borrowed `DataStore`).
pub struct PopulationDriver {
    chains: Vec<Chain>,
    positions: Vec<Index>,
}

impl PopulationDriver {
    pub fn new(chains: Vec<Chain>, positions: Vec<Index>) -> Self {
        assert!(!chains.is_empty(), "population driver needs at least one chain");
        PopulationDriver { chains, positions }
    }

    pub fn num_chains(&self) -> usize {
        self.chains.len()
    }

    /// Run `burnin` sweeps (not recorded) followed by `samples` sweeps
    /// (recorded), one sweep per sampling step. Each sweep visits every
    /// registered position in a freshly shuffled order (the chain's own
    /// RNG), tallying both the Gibbs switch count and, afterward, the log
    /// likelihood/posterior/component-count summary for that step.
    pub fn sample(mut self, burnin: usize, samples: usize) -> PopulationHistory {
        let positions = &self.positions;
        let histories: Vec<SamplingHistory> = std::thread::scope(|scope| {
            let mut handles = Vec::with_capacity(self.chains.len());
            for chain in &mut self.chains {
                handles.push(scope.spawn(move || run_chain(chain, positions, burnin, samples)));
            }
            handles.into_iter().map(|h| h.join().expect("chain thread panicked")).collect()
        });
        merge_histories(histories, samples)
    }
}

/// One pooled posterior sample: its log posterior, the temperature its
/// chain was run at (non-1.0 chains are annealing/burnin helpers, excluded
/// from the posterior estimators), and the partition itself.
#[derive(Debug, Clone)]
pub struct PooledSample {
    pub log_posterior: f64,
    pub temperature: f64,
    pub partition: DpmPartition,
    pub cluster_stats: Vec<ClusterSnapshot>,
}

/// Per-chain scalar traces plus every chain's partitions pooled in
/// sample-major, chain-minor order.
pub struct PopulationHistory {
    pub chains: Vec<SamplingHistory>,
    pub pooled: Vec<PooledSample>,
}

fn run_chain(chain: &mut Chain, positions: &[Index], burnin: usize, samples: usize) -> SamplingHistory {
    let mut history = SamplingHistory::default();

    for step in 0..burnin {
        sweep(chain, positions);
        chain.sampler.metropolis_interleave(&mut chain.state, step, &mut chain.rng);
    }

    for step in 0..samples {
        let switches = sweep(chain, positions);
        chain.sampler.metropolis_interleave(&mut chain.state, step, &mut chain.rng);
        let log_likelihood = chain.state.total_log_likelihood();
        let log_posterior = log_likelihood; // the prior term cancels in acceptance ratios and is omitted here, matching the original's combined-term bookkeeping
        let num_components = chain.state.clusters().used_tags().len() as f64 - 1.0; // excludes background
        history.push_step(
            switches,
            log_likelihood,
            log_posterior,
            num_components,
            chain.sampler.temperature(),
            chain.state.partition(),
            foreground_snapshot(&chain.state),
        );
    }

    history
}

fn sweep(chain: &mut Chain, positions: &[Index]) -> f64 {
    let mut order: Vec<Index> = positions.to_vec();
    shuffle(&mut order, &mut chain.rng);
    let mut switches = 0.0;
    for &index in &order {
        if chain.sampler.gibbs_step(&mut chain.state, index, &mut chain.rng) {
            switches += 1.0;
        }
    }
    switches
}

fn shuffle(items: &mut [Index], rng: &mut impl RngCore) {
    for i in (1..items.len()).rev() {
        let j = (rng.next_u64() as usize) % (i + 1);
        items.swap(i, j);
    }
}

/// Merge per-chain histories: scalar vectors stay grouped per chain, but
/// partitions are pooled sample-major, chain-minor -- for sample index `j`
/// from `0..samples`, push chain 0's `j`-th partition, then chain 1's, and
/// so on (ground truth: `population_mcmc_t::update_sampling_history`'s
/// nested loop order: outer loop over sample index, inner loop over chain
/// index).
fn merge_histories(histories: Vec<SamplingHistory>, samples: usize) -> PopulationHistory {
    for history in &histories {
        debug_assert_eq!(history.partitions.len(), samples);
    }
    let mut pooled = Vec::with_capacity(samples * histories.len());
    for j in 0..samples {
        for history in &histories {
            pooled.push(PooledSample {
                log_posterior: history.log_posterior[j],
                temperature: history.temperature[j],
                partition: history.partitions[j].clone(),
                cluster_stats: history.cluster_stats[j].clone(),
            });
        }
    }
    PopulationHistory { chains: histories, pooled }
}
