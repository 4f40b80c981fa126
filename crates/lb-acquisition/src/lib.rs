//! # lb-acquisition
//!
//! Acquisition strategies that turn a fitted surrogate into the next batch of
//! candidate points. [`QExpectedImprovement`] optimizes all `q` points of a
//! batch jointly, estimating batch expected improvement with shared
//! quasi-Monte-Carlo base samples.

mod optimize;
mod qei;
mod qmc;

pub use optimize::{AdamSettings, QExpectedImprovement};
pub use qei::{count_near_duplicates, q_expected_improvement};
pub use qmc::{normal_base_samples, sobol_unit, SOBOL_DIMENSIONS};

use lb_surrogate::Posterior;
use lb_types::{AcquisitionError, Bounds, Point};

/// Everything an acquisition call needs besides the model and incumbent.
#[derive(Debug, Clone, PartialEq)]
pub struct AcquisitionRequest {
    /// Number of points to propose jointly.
    pub q: usize,
    pub bounds: Bounds,
    pub num_restarts: usize,
    pub raw_samples: usize,
    pub mc_samples: usize,
    /// Iteration cap per restart.
    pub max_iters: usize,
    pub seed: u64,
}

impl AcquisitionRequest {
    pub fn validate(&self) -> Result<(), AcquisitionError> {
        if self.q == 0 || self.q > SOBOL_DIMENSIONS {
            return Err(AcquisitionError::InvalidBatchSize {
                q: self.q,
                limit: SOBOL_DIMENSIONS,
            });
        }
        let invalid = |message: &str| {
            Err(AcquisitionError::InvalidRequest {
                message: message.to_string(),
            })
        };
        if self.num_restarts == 0 {
            return invalid("num_restarts must be positive");
        }
        if self.raw_samples < self.num_restarts {
            return invalid("raw_samples must be at least num_restarts");
        }
        if self.mc_samples == 0 {
            return invalid("mc_samples must be positive");
        }
        if self.max_iters == 0 {
            return invalid("max_iters must be positive");
        }
        Ok(())
    }
}

/// Proposes a batch of candidates from a posterior and the best value so far.
pub trait AcquisitionStrategy {
    /// Return exactly `request.q` points, each inside `request.bounds`.
    fn propose<P: Posterior>(
        &self,
        posterior: &P,
        best_value: f64,
        request: &AcquisitionRequest,
    ) -> Result<Vec<Point>, AcquisitionError>;
}
