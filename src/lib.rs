//! Nonparametric Bayesian inference of transcription factor binding sites
//! from aligned sequence data: a collapsed-Gibbs Dirichlet/Pitman-Yor
//! process mixture over a background model and an unbounded set of
//! fixed-width foreground motif components, sampled by a population of
//! parallel MCMC chains and summarized by a posterior partition
//! estimator.

pub mod alphabet;
pub mod cluster;
pub mod cluster_manager;
pub mod config;
pub mod data;
pub mod error;
pub mod estimate;
pub mod index;
pub mod io;
pub mod model;
pub mod population;
pub mod sampler;
pub mod state;

pub use cluster::{Cluster, ClusterTag};
pub use cluster_manager::ClusterManager;
pub use config::Config;
pub use data::DataStore;
pub use error::{DpmError, Result};
pub use estimate::{inclusion_probabilities, Estimator};
pub use index::{Index, Range};
pub use population::{Chain, PooledSample, PopulationDriver, PopulationHistory};
pub use sampler::{ClusterSnapshot, GibbsSampler, MixtureParams, MotifBaseline, SamplingHistory};
pub use state::{DpmPartition, PartitionState};
