//! Command-line configuration, mirroring the teacher's
//! clap-derive-plus-serde `Config` shape.

use std::path::PathBuf;

use clap::Parser;
use serde::Deserialize;

use crate::error::{DpmError, Result};
use crate::model::background::AscentConfig;

/// Background model selector, matching the CLI's `--background` flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackgroundKind {
    IndependenceDirichlet,
    Entropy,
    Default,
    MixtureDirichlet,
}

impl std::str::FromStr for BackgroundKind {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "independence-dirichlet" => Ok(BackgroundKind::IndependenceDirichlet),
            "entropy" => Ok(BackgroundKind::Entropy),
            "default" => Ok(BackgroundKind::Default),
            "mixture-dirichlet" => Ok(BackgroundKind::MixtureDirichlet),
            other => Err(format!("unrecognized background model {other:?}")),
        }
    }
}

/// Full run configuration: loadable from CLI flags directly, or from a
/// JSON config file via `serde_json`, the same split the teacher's own
/// `Config` type draws between `Deserialize` and its CLI consumer.
#[derive(Parser, Debug, Deserialize)]
#[clap(name = "tfbs-dpm", about = "Nonparametric Bayesian TFBS inference")]
pub struct Config {
    /// Path to the alignment-count input file.
    #[clap(long)]
    pub data_file: PathBuf,

    /// Foreground motif widths to consider, one baseline cluster each.
    #[clap(long, use_value_delimiter = true, default_value = "10")]
    pub motif_widths: Vec<usize>,

    /// Pitman-Yor concentration parameter.
    #[clap(long, default_value_t = 1.0)]
    pub alpha: f64,

    /// Pitman-Yor discount parameter (0.0 recovers the plain DP weight).
    #[clap(long, default_value_t = 0.0)]
    pub discount: f64,

    /// Number of parallel chains.
    #[clap(long, default_value_t = 4)]
    pub population_size: usize,

    /// Burnin sweeps discarded before sampling begins.
    #[clap(long, default_value_t = 100)]
    pub burnin: usize,

    /// Recorded sampling sweeps.
    #[clap(long, default_value_t = 1000)]
    pub samples: usize,

    /// Background model variant.
    #[clap(long, default_value = "default", parse(try_from_str))]
    pub background: BackgroundKind,

    /// Background pseudocount vector (ignored for `mixture-dirichlet`).
    #[clap(long, use_value_delimiter = true, default_value = "1.0,1.0,1.0,1.0,1.0")]
    pub background_alpha: Vec<f64>,

    /// Background-marginal cache file path.
    #[clap(long)]
    pub cache_file: Option<PathBuf>,

    /// Metropolis-Hastings moves attempted per sweep.
    #[clap(long, default_value_t = 1)]
    pub metropolis_frequency: usize,

    /// Output report path.
    #[clap(long)]
    pub output: PathBuf,

    /// Overrides the chain RNG seeds for reproducible runs/tests; absent
    /// means seed from wall-clock and thread launch order.
    #[clap(long)]
    pub rng_seed: Option<u64>,

    /// Load the full configuration from a JSON file instead of the flags
    /// above (the file's `config_file` field, if present, is ignored).
    #[clap(long)]
    #[serde(skip)]
    pub config_file: Option<PathBuf>,

    /// Gradient-ascent tuning for the `default` background model.
    #[clap(skip)]
    #[serde(skip)]
    pub ascent: AscentConfig,
}

impl Config {
    pub fn min_tfbs_length(&self) -> usize {
        self.motif_widths.iter().copied().min().unwrap_or(0)
    }

    pub fn max_tfbs_length(&self) -> usize {
        self.motif_widths.iter().copied().max().unwrap_or(0)
    }

    /// Reject configurations spec.md sec.7 Kind 2 calls out: an
    /// out-of-range discount, a non-positive concentration parameter, an
    /// empty or zero-width motif list, or a malformed background
    /// pseudocount vector. Caught here, before any chain starts sampling,
    /// rather than surfacing as a downstream panic.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..1.0).contains(&self.discount) {
            return Err(DpmError::InvalidConfig(format!(
                "discount must be in [0, 1), got {}",
                self.discount
            )));
        }
        if self.alpha <= 0.0 {
            return Err(DpmError::InvalidConfig(format!("alpha must be positive, got {}", self.alpha)));
        }
        if self.motif_widths.is_empty() || self.motif_widths.iter().any(|&w| w == 0) {
            return Err(DpmError::InvalidConfig(
                "motif-widths must list at least one nonzero width".to_string(),
            ));
        }
        if self.background_alpha.len() != 5 {
            return Err(DpmError::InvalidConfig(format!(
                "background-alpha must list exactly 5 values, got {}",
                self.background_alpha.len()
            )));
        }
        if self.background_alpha.iter().any(|&a| a <= 0.0) {
            return Err(DpmError::InvalidConfig(
                "background-alpha values must all be positive".to_string(),
            ));
        }
        if self.population_size == 0 {
            return Err(DpmError::InvalidConfig("population-size must be at least 1".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn background_kind_round_trips_through_from_str() {
        assert_eq!(
            "entropy".parse::<BackgroundKind>().unwrap(),
            BackgroundKind::Entropy
        );
        assert!("nonsense".parse::<BackgroundKind>().is_err());
    }

    #[test]
    fn motif_width_bounds_track_the_configured_widths() {
        let cfg = Config {
            data_file: PathBuf::from("in.fa"),
            motif_widths: vec![6, 10, 8],
            alpha: 1.0,
            discount: 0.0,
            population_size: 1,
            burnin: 0,
            samples: 1,
            background: BackgroundKind::Default,
            background_alpha: vec![1.0; 5],
            cache_file: None,
            metropolis_frequency: 0,
            output: PathBuf::from("out.txt"),
            rng_seed: Some(1),
            config_file: None,
            ascent: AscentConfig::default(),
        };
        assert_eq!(cfg.min_tfbs_length(), 6);
        assert_eq!(cfg.max_tfbs_length(), 10);
    }

    fn valid_config() -> Config {
        Config {
            data_file: PathBuf::from("in.fa"),
            motif_widths: vec![10],
            alpha: 1.0,
            discount: 0.0,
            population_size: 1,
            burnin: 0,
            samples: 1,
            background: BackgroundKind::Default,
            background_alpha: vec![1.0; 5],
            cache_file: None,
            metropolis_frequency: 0,
            output: PathBuf::from("out.txt"),
            rng_seed: Some(1),
            config_file: None,
            ascent: AscentConfig::default(),
        }
    }

    #[test]
    fn validate_accepts_a_well_formed_config() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn validate_rejects_discount_outside_zero_one() {
        let mut cfg = valid_config();
        cfg.discount = 1.0;
        assert!(matches!(cfg.validate(), Err(DpmError::InvalidConfig(_))));
        cfg.discount = -0.1;
        assert!(matches!(cfg.validate(), Err(DpmError::InvalidConfig(_))));
    }

    #[test]
    fn validate_rejects_nonpositive_alpha() {
        let mut cfg = valid_config();
        cfg.alpha = 0.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_empty_motif_widths() {
        let mut cfg = valid_config();
        cfg.motif_widths = vec![];
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_malformed_background_alpha() {
        let mut cfg = valid_config();
        cfg.background_alpha = vec![1.0, 2.0];
        assert!(cfg.validate().is_err());
    }
}
