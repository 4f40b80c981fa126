//! Fitted Gaussian-process posterior.

use nalgebra::{linalg::Cholesky, DMatrix, DVector, Dyn};
use serde::{Deserialize, Serialize};

use lb_types::{Bounds, Point, SurrogateError};

use crate::kernel::{cross_kernel, kernel_matrix, matern52};
use crate::linalg::robust_cholesky;
use crate::{JointPrediction, Posterior, Prediction};

/// Lower bound on the observation noise variance (standardized units).
pub(crate) const NOISE_FLOOR: f64 = 1e-4;

/// GP hyperparameters, stored in the unconstrained space the optimizer
/// works in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GpHyperparameters {
    /// Natural log of the per-dimension lengthscales (unit-cube units).
    pub log_lengthscales: Vec<f64>,
    pub log_outputscale: f64,
    /// Noise variance is `NOISE_FLOOR + exp(raw_noise)`.
    pub raw_noise: f64,
    /// Constant prior mean (standardized units).
    pub mean: f64,
}

impl GpHyperparameters {
    /// Starting point for a cold fit.
    pub fn initial(dim: usize) -> Self {
        Self {
            log_lengthscales: vec![0.5f64.ln(); dim],
            log_outputscale: 0.0,
            raw_noise: (1e-2 - NOISE_FLOOR).ln(),
            mean: 0.0,
        }
    }

    pub fn dim(&self) -> usize {
        self.log_lengthscales.len()
    }

    pub fn lengthscales(&self) -> Vec<f64> {
        self.log_lengthscales.iter().map(|l| l.exp()).collect()
    }

    pub fn outputscale(&self) -> f64 {
        self.log_outputscale.exp()
    }

    pub fn noise(&self) -> f64 {
        NOISE_FLOOR + self.raw_noise.exp()
    }

    /// Flatten as `[log_lengthscales.., log_outputscale, raw_noise, mean]`.
    pub fn to_vec(&self) -> Vec<f64> {
        let mut v = self.log_lengthscales.clone();
        v.extend([self.log_outputscale, self.raw_noise, self.mean]);
        v
    }

    /// Inverse of [`to_vec`](Self::to_vec).
    pub fn from_slice(dim: usize, values: &[f64]) -> Result<Self, SurrogateError> {
        if values.len() != dim + 3 {
            return Err(SurrogateError::HyperparameterLength {
                expected: dim + 3,
                found: values.len(),
            });
        }
        Ok(Self {
            log_lengthscales: values[..dim].to_vec(),
            log_outputscale: values[dim],
            raw_noise: values[dim + 1],
            mean: values[dim + 2],
        })
    }
}

/// Exact GP posterior conditioned on a standardized, unit-cube dataset.
///
/// Queries take points in the original domain and return moments on the
/// original outcome scale.
#[derive(Debug, Clone)]
pub struct GpModel {
    bounds: Bounds,
    hyper: GpHyperparameters,
    lengthscales: Vec<f64>,
    outputscale: f64,
    x_train: Vec<Vec<f64>>,
    /// Cholesky factor of `K + σ²I`.
    chol: Cholesky<f64, Dyn>,
    l: DMatrix<f64>,
    /// `(K + σ²I)^{-1} (y - m)`.
    alpha: DVector<f64>,
    y_mean: f64,
    y_std: f64,
}

impl GpModel {
    /// Condition a GP with fixed hyperparameters on unit-cube inputs `x_train`
    /// and standardized targets `y_std_train`.
    pub fn new(
        bounds: Bounds,
        hyper: GpHyperparameters,
        x_train: Vec<Vec<f64>>,
        y_std_train: &[f64],
        y_mean: f64,
        y_std: f64,
    ) -> Result<Self, SurrogateError> {
        if x_train.is_empty() {
            return Err(SurrogateError::EmptyDataset);
        }
        if hyper.dim() != bounds.dim() {
            return Err(SurrogateError::DimensionMismatch {
                expected: bounds.dim(),
                found: hyper.dim(),
            });
        }

        let lengthscales = hyper.lengthscales();
        let outputscale = hyper.outputscale();
        let mut k = kernel_matrix(&x_train, &lengthscales, outputscale);
        let noise = hyper.noise();
        for i in 0..k.nrows() {
            k[(i, i)] += noise;
        }
        let chol = robust_cholesky(&k)?;

        let residual =
            DVector::from_iterator(y_std_train.len(), y_std_train.iter().map(|y| y - hyper.mean));
        let alpha = chol.solve(&residual);
        let l = chol.l();

        Ok(Self {
            bounds,
            hyper,
            lengthscales,
            outputscale,
            x_train,
            chol,
            l,
            alpha,
            y_mean,
            y_std,
        })
    }

    pub fn hyperparameters(&self) -> &GpHyperparameters {
        &self.hyper
    }

    pub fn bounds(&self) -> &Bounds {
        &self.bounds
    }

    pub fn num_train(&self) -> usize {
        self.x_train.len()
    }

    /// Observation noise variance on the original outcome scale.
    pub fn noise_variance(&self) -> f64 {
        self.hyper.noise() * self.y_std * self.y_std
    }

    fn normalize_all(&self, points: &[Point]) -> Vec<Vec<f64>> {
        points.iter().map(|p| self.bounds.normalize(p)).collect()
    }

    /// `L^{-1} K(X, X*)`, one column per query point.
    fn whitened_cross(&self, k_cross: &DMatrix<f64>) -> DMatrix<f64> {
        self.l
            .solve_lower_triangular(k_cross)
            .unwrap_or_else(|| self.chol.solve(k_cross))
    }
}

impl Posterior for GpModel {
    fn dim(&self) -> usize {
        self.bounds.dim()
    }

    fn predict(&self, points: &[Point]) -> Vec<Prediction> {
        let scale = self.y_std * self.y_std;
        self.normalize_all(points)
            .iter()
            .map(|x| {
                let k_star = DVector::from_iterator(
                    self.x_train.len(),
                    self.x_train
                        .iter()
                        .map(|xt| matern52(x, xt, &self.lengthscales, self.outputscale)),
                );
                let mean = self.hyper.mean + k_star.dot(&self.alpha);
                let v = self
                    .l
                    .solve_lower_triangular(&k_star)
                    .unwrap_or_else(|| DVector::zeros(k_star.len()));
                let variance = (self.outputscale - v.dot(&v)).max(0.0);
                Prediction {
                    mean: self.y_mean + self.y_std * mean,
                    variance: variance * scale,
                }
            })
            .collect()
    }

    fn joint(&self, points: &[Point]) -> JointPrediction {
        let xs = self.normalize_all(points);
        let k_cross = cross_kernel(&self.x_train, &xs, &self.lengthscales, self.outputscale);
        let k_query = kernel_matrix(&xs, &self.lengthscales, self.outputscale);

        let mean = (k_cross.transpose() * &self.alpha).add_scalar(self.hyper.mean);
        let v = self.whitened_cross(&k_cross);
        let covariance = k_query - v.transpose() * v;

        JointPrediction {
            mean: mean.map(|m| self.y_mean + self.y_std * m),
            covariance: covariance * (self.y_std * self.y_std),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn fixed_model() -> GpModel {
        let bounds = Bounds::uniform(1, 0.0, 10.0).unwrap();
        let xs: Vec<f64> = vec![0.0, 1.0, 2.0, 3.0];
        let ys: Vec<f64> = xs.iter().map(|x| x.sin()).collect();
        let x_train = xs.iter().map(|x| bounds.normalize(&[*x])).collect();
        let hyper = GpHyperparameters {
            log_lengthscales: vec![0.1f64.ln()],
            log_outputscale: 0.0,
            raw_noise: (1e-6f64).ln(),
            mean: 0.0,
        };
        GpModel::new(bounds, hyper, x_train, &ys, 0.0, 1.0).unwrap()
    }

    #[test]
    fn hyperparameter_vector_round_trip() {
        let h = GpHyperparameters::initial(3);
        let back = GpHyperparameters::from_slice(3, &h.to_vec()).unwrap();
        assert_eq!(h, back);
        assert!(GpHyperparameters::from_slice(2, &h.to_vec()).is_err());
        assert_relative_eq!(h.noise(), 1e-2, epsilon = 1e-12);
    }

    #[test]
    fn mean_interpolates_training_data() {
        let model = fixed_model();
        let preds = model.predict(&[vec![1.0], vec![2.0]]);
        assert_relative_eq!(preds[0].mean, 1.0f64.sin(), epsilon = 1e-2);
        assert_relative_eq!(preds[1].mean, 2.0f64.sin(), epsilon = 1e-2);
    }

    #[test]
    fn variance_small_near_data_large_far_away() {
        let model = fixed_model();
        let preds = model.predict(&[vec![1.0], vec![9.5]]);
        assert!(preds[0].variance < 1e-3);
        assert!(preds[1].variance > 0.9);
        assert!(preds[1].variance <= 1.0 + 1e-12);
    }

    #[test]
    fn joint_matches_marginals() {
        let model = fixed_model();
        let points = vec![vec![0.5], vec![4.0], vec![8.0]];
        let marginal = model.predict(&points);
        let joint = model.joint(&points);
        for (i, p) in marginal.iter().enumerate() {
            assert_relative_eq!(joint.mean[i], p.mean, epsilon = 1e-9);
            assert_relative_eq!(joint.covariance[(i, i)], p.variance, epsilon = 1e-9);
        }
        assert_relative_eq!(
            joint.covariance[(0, 1)],
            joint.covariance[(1, 0)],
            epsilon = 1e-12
        );
    }

    #[test]
    fn predictions_use_original_scale() {
        let bounds = Bounds::uniform(1, 0.0, 1.0).unwrap();
        let hyper = GpHyperparameters::initial(1);
        let model = GpModel::new(
            bounds,
            hyper,
            vec![vec![0.5]],
            &[0.0],
            10.0,
            2.0,
        )
        .unwrap();
        let pred = model.predict(&[vec![0.5]])[0];
        assert_relative_eq!(pred.mean, 10.0, epsilon = 1e-9);
        // Far-field variance scales with y_std².
        let far = model.joint(&[vec![0.5]]);
        assert!(far.covariance[(0, 0)] <= 4.0);
    }

    #[test]
    fn rejects_mismatched_dimension() {
        let bounds = Bounds::uniform(2, 0.0, 1.0).unwrap();
        let err = GpModel::new(
            bounds,
            GpHyperparameters::initial(1),
            vec![vec![0.5, 0.5]],
            &[0.0],
            0.0,
            1.0,
        )
        .unwrap_err();
        assert!(matches!(err, SurrogateError::DimensionMismatch { .. }));
    }
}
