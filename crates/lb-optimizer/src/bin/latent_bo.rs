//! Runs batch Bayesian optimization over the latent space of a synthetic
//! decoder/classifier pair.
//!
//! Usage: `latent-bo [CONFIG.json] [--out OUTCOME.json]`

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::Parser;
use serde::{Deserialize, Serialize};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use lb_objective::{
    ExpectedScoreEvaluator, GaussianClassScore, LinearDecoder, SoftmaxClassifier,
    SyntheticObjectiveConfig,
};
use lb_optimizer::{BayesOptLoop, OptimizationConfig, OptimizationOutcome, RoundSummary};
use lb_types::Bounds;

#[derive(Debug, Serialize, Deserialize)]
struct RunFile {
    optimization: OptimizationConfig,
    #[serde(default)]
    objective: SyntheticObjectiveConfig,
}

impl RunFile {
    fn tutorial() -> Result<Self> {
        let objective = SyntheticObjectiveConfig::default();
        let bounds = Bounds::uniform(objective.latent_dim, -6.0, 6.0)?;
        Ok(Self {
            optimization: OptimizationConfig::new("latent-bo", bounds),
            objective,
        })
    }
}

#[derive(Parser, Debug)]
#[command(name = "latent-bo")]
#[command(about = "Batch Bayesian optimization over a decoder's latent space")]
#[command(version)]
struct Cli {
    /// Run file with `optimization` and `objective` sections (tutorial defaults when omitted)
    config: Option<PathBuf>,

    /// Write the outcome (partial on failure) as JSON
    #[arg(short, long)]
    out: Option<PathBuf>,
}

fn load(path: Option<&Path>) -> Result<RunFile> {
    let Some(path) = path else {
        return RunFile::tutorial();
    };
    let text = fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing config {}", path.display()))
}

fn write_outcome(path: &Path, outcome: &OptimizationOutcome) -> Result<()> {
    let json = serde_json::to_string_pretty(outcome)?;
    fs::write(path, json).with_context(|| format!("writing outcome {}", path.display()))
}

fn run(cli: &Cli) -> Result<bool> {
    let file = load(cli.config.as_deref())?;
    let objective_cfg = &file.objective;
    if objective_cfg.latent_dim != file.optimization.bounds.dim() {
        bail!(
            "objective latent_dim {} does not match bounds dimension {}",
            objective_cfg.latent_dim,
            file.optimization.bounds.dim()
        );
    }

    let evaluator = ExpectedScoreEvaluator::new(
        LinearDecoder::new(objective_cfg.latent_dim, objective_cfg.pixels, objective_cfg.seed),
        SoftmaxClassifier::new(objective_cfg.pixels, objective_cfg.classes, objective_cfg.seed),
        GaussianClassScore::new(objective_cfg.target_class as f64, objective_cfg.width),
    )
    .with_mode(file.optimization.evaluation_mode);

    let bo = BayesOptLoop::new(file.optimization.clone(), evaluator);
    let mut progress = |summary: &RoundSummary| {
        println!(
            "round {:>3}  best {:.6}  evaluations {}",
            summary.round, summary.best_value, summary.dataset_size
        );
    };

    let (outcome, ok) = match bo.run_with_observer(&mut progress) {
        Ok(outcome) => (outcome, true),
        Err(failure) => {
            error!(round = failure.round, "{}", failure);
            (failure.outcome, false)
        }
    };

    if let Some(best) = outcome.dataset.best_observation() {
        info!(value = best.value, round = best.round, "best observation");
    }
    if let Some(path) = &cli.out {
        write_outcome(path, &outcome)?;
        info!(path = %path.display(), "outcome written");
    }
    Ok(ok)
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    match run(&cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}
