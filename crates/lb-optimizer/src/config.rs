//! Run configuration for the optimization loop.

use serde::{Deserialize, Serialize};

use lb_acquisition::{AcquisitionRequest, SOBOL_DIMENSIONS};
use lb_objective::EvaluationMode;
use lb_surrogate::GpConfig;
use lb_types::{Bounds, ConfigError};

fn default_name() -> String {
    "latent-bo".to_string()
}
fn default_initial_samples() -> usize {
    5
}
fn default_batch_size() -> usize {
    3
}
fn default_rounds() -> usize {
    25
}
fn default_fit_max_iters() -> u64 {
    100
}
fn default_num_restarts() -> usize {
    10
}
fn default_raw_samples() -> usize {
    100
}
fn default_mc_samples() -> usize {
    512
}
fn default_acquisition_max_iters() -> usize {
    200
}

/// Top-level configuration for an optimization run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationConfig {
    #[serde(default = "default_name")]
    pub name: String,

    /// Search box over the latent space.
    pub bounds: Bounds,

    /// Size of the uniform random initial design (N0).
    #[serde(default = "default_initial_samples")]
    pub initial_samples: usize,

    /// Points proposed and evaluated per round (Q).
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Number of acquisition rounds after initialization (R).
    #[serde(default = "default_rounds")]
    pub rounds: usize,

    /// Iteration cap for each surrogate fit.
    #[serde(default = "default_fit_max_iters")]
    pub fit_max_iters: u64,

    #[serde(default = "default_num_restarts")]
    pub num_restarts: usize,

    #[serde(default = "default_raw_samples")]
    pub raw_samples: usize,

    /// Quasi-Monte-Carlo samples used to estimate batch expected improvement.
    #[serde(default = "default_mc_samples")]
    pub mc_samples: usize,

    /// Iteration cap for each acquisition restart.
    #[serde(default = "default_acquisition_max_iters")]
    pub acquisition_max_iters: usize,

    #[serde(default)]
    pub seed: u64,

    #[serde(default)]
    pub evaluation_mode: EvaluationMode,
}

impl OptimizationConfig {
    pub fn new(name: impl Into<String>, bounds: Bounds) -> Self {
        Self {
            name: name.into(),
            bounds,
            initial_samples: default_initial_samples(),
            batch_size: default_batch_size(),
            rounds: default_rounds(),
            fit_max_iters: default_fit_max_iters(),
            num_restarts: default_num_restarts(),
            raw_samples: default_raw_samples(),
            mc_samples: default_mc_samples(),
            acquisition_max_iters: default_acquisition_max_iters(),
            seed: 0,
            evaluation_mode: EvaluationMode::default(),
        }
    }

    pub fn with_initial_samples(mut self, n: usize) -> Self {
        self.initial_samples = n;
        self
    }

    pub fn with_batch_size(mut self, q: usize) -> Self {
        self.batch_size = q;
        self
    }

    pub fn with_rounds(mut self, rounds: usize) -> Self {
        self.rounds = rounds;
        self
    }

    pub fn with_fit_max_iters(mut self, n: u64) -> Self {
        self.fit_max_iters = n;
        self
    }

    pub fn with_restarts(mut self, num_restarts: usize, raw_samples: usize) -> Self {
        self.num_restarts = num_restarts;
        self.raw_samples = raw_samples;
        self
    }

    pub fn with_mc_samples(mut self, n: usize) -> Self {
        self.mc_samples = n;
        self
    }

    pub fn with_acquisition_max_iters(mut self, n: usize) -> Self {
        self.acquisition_max_iters = n;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_evaluation_mode(mut self, mode: EvaluationMode) -> Self {
        self.evaluation_mode = mode;
        self
    }

    /// Check every setting; bounds are already validated on construction.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("initial_samples", self.initial_samples),
            ("batch_size", self.batch_size),
            ("num_restarts", self.num_restarts),
            ("mc_samples", self.mc_samples),
            ("acquisition_max_iters", self.acquisition_max_iters),
        ];
        if let Some((field, _)) = positive.iter().find(|(_, v)| *v == 0) {
            return Err(ConfigError::NonPositive { field: *field });
        }
        if self.fit_max_iters == 0 {
            return Err(ConfigError::NonPositive {
                field: "fit_max_iters",
            });
        }
        if self.batch_size > SOBOL_DIMENSIONS {
            return Err(ConfigError::BatchTooLarge {
                batch_size: self.batch_size,
                limit: SOBOL_DIMENSIONS,
            });
        }
        if self.raw_samples < self.num_restarts {
            return Err(ConfigError::RawSamplesBelowRestarts {
                raw_samples: self.raw_samples,
                num_restarts: self.num_restarts,
            });
        }
        Ok(())
    }

    /// Surrogate solver settings derived from this run.
    pub fn gp_config(&self) -> GpConfig {
        GpConfig {
            max_iters: self.fit_max_iters,
            ..GpConfig::default()
        }
    }

    /// Acquisition request for round `round` (1-based).
    pub fn acquisition_request(&self, round: usize) -> AcquisitionRequest {
        AcquisitionRequest {
            q: self.batch_size,
            bounds: self.bounds.clone(),
            num_restarts: self.num_restarts,
            raw_samples: self.raw_samples,
            mc_samples: self.mc_samples,
            max_iters: self.acquisition_max_iters,
            seed: self.seed.wrapping_add(round as u64),
        }
    }

    /// Total evaluations the run will perform.
    pub fn total_evaluations(&self) -> usize {
        self.initial_samples + self.rounds * self.batch_size
    }
}
