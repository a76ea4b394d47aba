//! CLI entry point: load an alignment-count file, run the population Gibbs
//! sampler, and write a posterior-partition report.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use tfbs_dpm::cluster_manager::ClusterManager;
use tfbs_dpm::config::{BackgroundKind, Config};
use tfbs_dpm::index::{Index, Range};
use tfbs_dpm::io::{load_alignment_counts, Report};
use tfbs_dpm::model::background::{DefaultBackground, EntropyBackground, IndependenceBackground, IndependenceMixture};
use tfbs_dpm::model::product_dirichlet::ProductDirichlet;
use tfbs_dpm::model::ComponentModel;
use tfbs_dpm::population::{Chain, PopulationDriver};
use tfbs_dpm::sampler::{GibbsSampler, MixtureParams, MotifBaseline};
use tfbs_dpm::state::PartitionState;
use tfbs_dpm::{inclusion_probabilities, Estimator};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let result = Config::try_parse()
        .map_err(anyhow::Error::from)
        .and_then(load_config_file)
        .and_then(run);

    if let Err(err) = result {
        tracing::error!(error = %err, "tfbs-dpm run failed");
        for cause in err.chain().skip(1) {
            tracing::error!(cause = %cause, "caused by");
        }
        std::process::exit(1);
    }
    Ok(())
}

/// If `--config-file` names a JSON file, it replaces every flag-derived
/// field except `config_file` itself (spec.md sec.6: configuration may
/// come from flags directly or from a file).
fn load_config_file(cli: Config) -> Result<Config> {
    let Some(path) = cli.config_file.clone() else {
        return Ok(cli);
    };
    let text = std::fs::read_to_string(&path).with_context(|| format!("reading config file {}", path.display()))?;
    let mut config: Config =
        serde_json::from_str(&text).with_context(|| format!("parsing config file {}", path.display()))?;
    config.config_file = Some(path);
    Ok(config)
}

fn run(config: Config) -> Result<()> {
    config.validate().context("validating configuration")?;

    let data = Arc::new(load_alignment_counts(&config.data_file).context("loading alignment-count file")?);
    let sizes = data.sizes();

    let background_alpha = alpha_array(&config.background_alpha)?;

    let mut chains = Vec::with_capacity(config.population_size);
    for i in 0..config.population_size {
        let mut manager = ClusterManager::new(&sizes);
        let bg_model = build_background(&config, background_alpha, &data)?;
        let bg_tag = manager.add_fixed_cluster(bg_model);

        let mut baselines = Vec::with_capacity(config.motif_widths.len());
        for &width in &config.motif_widths {
            let baseline_tag =
                manager.register_baseline(Box::new(ProductDirichlet::new(width, [1.0; 5], data.clone())));
            baselines.push(MotifBaseline { baseline: baseline_tag, width });
        }

        let mut state = PartitionState::new(
            &sizes,
            manager,
            bg_tag,
            config.min_tfbs_length(),
            config.max_tfbs_length(),
        );
        for (seq, &len) in sizes.iter().enumerate() {
            if len > 0 {
                state.add(Range::forward(Index::new(seq, 0), len), bg_tag);
            }
        }

        let sampler = GibbsSampler::new(
            MixtureParams { alpha: config.alpha, discount: config.discount },
            baselines,
            config.metropolis_frequency,
            1.0,
        );
        let seed = config.rng_seed.unwrap_or_else(|| derive_seed(i));
        chains.push(Chain::new(state, sampler, seed));
    }

    let positions: Vec<Index> = sizes
        .iter()
        .enumerate()
        .flat_map(|(seq, &len)| (0..len).map(move |pos| Index::new(seq, pos)))
        .collect();

    let n_chains = chains.len();
    tracing::info!(chains = n_chains, burnin = config.burnin, samples = config.samples, "starting population sampler");
    let driver = PopulationDriver::new(chains, positions);
    let history = driver.sample(config.burnin, config.samples);

    let best = Estimator::map(&history.pooled).context("no posterior samples survived temperature filtering")?;

    let posterior = inclusion_probabilities(&history.pooled);
    let components: Vec<Vec<f64>> = history.chains.iter().map(|c| c.num_components.clone()).collect();
    let switches: Vec<Vec<f64>> = history.chains.iter().map(|c| c.switches.clone()).collect();
    let likelihood: Vec<Vec<f64>> = history.chains.iter().map(|c| c.log_likelihood.clone()).collect();

    let cluster_sizes: Vec<(tfbs_dpm::ClusterTag, usize)> =
        best.cluster_stats.iter().map(|(tag, size, _)| (*tag, *size)).collect();

    let mut report = Report::new()
        .matrix("posterior", &posterior)
        .matrix("components", &components)
        .matrix("switches", &switches)
        .matrix("likelihood", &likelihood)
        .cluster_list(&cluster_sizes);
    for (tag, _, stats) in &best.cluster_stats {
        report = report.cluster_matrix(*tag, stats);
    }

    report.write_to(&config.output).context("writing report")?;
    tracing::info!(output = %config.output.display(), "wrote report");
    Ok(())
}

fn alpha_array(values: &[f64]) -> Result<[f64; 5]> {
    let mut out = [0.0; 5];
    out.copy_from_slice(values);
    Ok(out)
}

fn build_background(
    config: &Config,
    alpha: [f64; 5],
    data: &Arc<tfbs_dpm::DataStore>,
) -> Result<Box<dyn ComponentModel>> {
    let cache = config.cache_file.as_deref();
    let data_ref = data.as_ref();
    Ok(match config.background {
        BackgroundKind::IndependenceDirichlet => Box::new(IndependenceBackground::new(alpha, data_ref, cache)),
        BackgroundKind::Entropy => Box::new(EntropyBackground::new(alpha[0].max(1e-6), data_ref, cache)),
        BackgroundKind::Default => {
            Box::new(DefaultBackground::new(alpha, data_ref, config.ascent, cache))
        }
        BackgroundKind::MixtureDirichlet => {
            let alphas = [alpha, alpha.map(|a| a * 2.0)];
            let weights = [0.5, 0.5];
            Box::new(IndependenceMixture::new(&alphas, &weights, data_ref))
        }
    })
}

fn derive_seed(chain_index: usize) -> u64 {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);
    nanos
        .wrapping_mul(2_654_435_761)
        .wrapping_add(chain_index as u64)
}
