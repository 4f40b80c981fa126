//! # lb-optimizer
//!
//! Batch Bayesian optimization over a latent space.
//!
//! [`BayesOptLoop`] evaluates a random initial design, then for a fixed number
//! of rounds fits a surrogate on every observation so far, asks the
//! acquisition strategy for a jointly optimized batch, evaluates it and
//! records the best value. Failures stop the run and hand back everything
//! collected before the failing round.

mod bo_loop;
mod config;
mod sampling;
mod state;

pub use bo_loop::BayesOptLoop;
pub use config::OptimizationConfig;
pub use sampling::initial_design;
pub use state::{
    LoopFailure, LoopState, OptimizationOutcome, OptimizationStatus, RoundObserver, RoundSummary,
    RunId,
};
