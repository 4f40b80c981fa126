//! Monte-Carlo batch expected improvement.

use nalgebra::{DMatrix, DVector};

use lb_surrogate::{robust_cholesky, JointPrediction, Posterior};
use lb_types::{Bounds, Point};

/// `qEI = mean_n max(0, max_j (μ + L z_n)_j - best)` over the rows `z_n` of
/// `base_samples`. A covariance that cannot be factored scores zero.
pub fn q_expected_improvement(
    joint: &JointPrediction,
    best_value: f64,
    base_samples: &DMatrix<f64>,
) -> f64 {
    let q = joint.mean.len();
    if q == 0 || base_samples.ncols() != q || base_samples.nrows() == 0 {
        return 0.0;
    }
    if joint.mean.iter().any(|m| !m.is_finite()) {
        return 0.0;
    }
    let l = match robust_cholesky(&joint.covariance) {
        Ok(chol) => chol.l(),
        Err(_) => return 0.0,
    };

    // Row n of `draws` is μ + L z_n.
    let draws = base_samples * l.transpose();
    let total: f64 = draws
        .row_iter()
        .map(|row| {
            let best_draw = row
                .iter()
                .zip(joint.mean.iter())
                .map(|(d, m)| d + m)
                .fold(f64::NEG_INFINITY, f64::max);
            (best_draw - best_value).max(0.0)
        })
        .sum();
    total / base_samples.nrows() as f64
}

/// qEI as a function of a flattened batch in the unit cube.
pub(crate) struct BatchObjective<'a, P> {
    pub posterior: &'a P,
    pub bounds: &'a Bounds,
    pub best_value: f64,
    pub base_samples: &'a DMatrix<f64>,
    pub q: usize,
}

impl<P: Posterior> BatchObjective<'_, P> {
    pub fn dim(&self) -> usize {
        self.q * self.bounds.dim()
    }

    /// Split a joint unit-cube vector into `q` points in the original domain.
    pub fn to_points(&self, unit: &[f64]) -> Vec<Point> {
        unit.chunks(self.bounds.dim())
            .map(|chunk| self.bounds.clamp(&self.bounds.unnormalize(chunk)))
            .collect()
    }

    pub fn value(&self, unit: &[f64]) -> f64 {
        let points = self.to_points(unit);
        let joint = self.posterior.joint(&points);
        let value = q_expected_improvement(&joint, self.best_value, self.base_samples);
        if value.is_finite() {
            value
        } else {
            0.0
        }
    }
}

/// Number of point pairs closer than `1e-6` of the box diagonal.
pub fn count_near_duplicates(points: &[Point], bounds: &Bounds) -> usize {
    let threshold = 1e-6 * bounds.diagonal();
    let mut pairs = 0;
    for (i, a) in points.iter().enumerate() {
        for b in &points[i + 1..] {
            let dist = DVector::from_iterator(a.len(), a.iter().zip(b).map(|(x, y)| x - y)).norm();
            if dist < threshold {
                pairs += 1;
            }
        }
    }
    pairs
}
