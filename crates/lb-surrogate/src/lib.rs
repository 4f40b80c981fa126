//! # lb-surrogate
//!
//! Probabilistic surrogate for Bayesian optimization.
//!
//! [`GaussianProcess`] fits an exact GP (constant mean, Matérn 5/2 kernel with
//! one lengthscale per latent dimension, Gaussian noise) by maximizing the
//! marginal log-likelihood with L-BFGS. Each fit consumes the full dataset and
//! produces a fresh, immutable [`GpModel`]; the previous model only seeds the
//! hyperparameter search.

mod fit;
mod gp;
mod kernel;
mod linalg;

pub use fit::{FitReport, Fitted, GaussianProcess, GpConfig};
pub use gp::{GpHyperparameters, GpModel};
pub use linalg::robust_cholesky;

use lb_types::{Bounds, Dataset, Point, SurrogateError};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

/// Marginal predictive distribution at one point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub mean: f64,
    pub variance: f64,
}

/// Joint predictive distribution over a set of points.
#[derive(Debug, Clone, PartialEq)]
pub struct JointPrediction {
    pub mean: DVector<f64>,
    pub covariance: DMatrix<f64>,
}

/// A fitted model that can be queried at arbitrary points of the domain.
pub trait Posterior: Sync {
    /// Dimension of the points accepted by the model.
    fn dim(&self) -> usize;

    /// Per-point mean and variance of the latent function.
    fn predict(&self, points: &[Point]) -> Vec<Prediction>;

    /// Mean vector and covariance matrix of the latent function over `points`.
    fn joint(&self, points: &[Point]) -> JointPrediction;
}

/// Fits a [`Posterior`] from the full dataset.
pub trait Surrogate {
    type Model: Posterior;

    /// Fit from scratch; `previous` (the last round's model) only warm-starts
    /// the parameter search.
    fn fit(
        &self,
        dataset: &Dataset,
        bounds: &Bounds,
        previous: Option<&Self::Model>,
    ) -> Result<Fitted<Self::Model>, SurrogateError>;
}
