//! Multi-start optimization of qEI over the joint `q·D` unit cube.

use finitediff::FiniteDiff;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use lb_surrogate::Posterior;
use lb_types::{AcquisitionError, Point};

use crate::qei::{count_near_duplicates, BatchObjective};
use crate::qmc::{normal_base_samples, sobol_unit, SOBOL_DIMENSIONS};
use crate::{AcquisitionRequest, AcquisitionStrategy};

/// Settings for the projected Adam ascent run from each restart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdamSettings {
    pub learning_rate: f64,
    pub beta1: f64,
    pub beta2: f64,
    pub epsilon: f64,
    /// Iterations without relative improvement before a restart stops early.
    pub patience: usize,
    pub rel_tolerance: f64,
    /// Boltzmann temperature used to pick restarts from the raw pool.
    pub eta: f64,
}

impl Default for AdamSettings {
    fn default() -> Self {
        Self {
            learning_rate: 0.025,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
            patience: 25,
            rel_tolerance: 1e-9,
            eta: 1.0,
        }
    }
}

/// Batch expected improvement, optimized jointly over all `q` points with
/// quasi-Monte-Carlo integration.
#[derive(Debug, Clone, Default)]
pub struct QExpectedImprovement {
    settings: AdamSettings,
}

impl QExpectedImprovement {
    pub fn new(settings: AdamSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &AdamSettings {
        &self.settings
    }
}

impl AcquisitionStrategy for QExpectedImprovement {
    fn propose<P: Posterior>(
        &self,
        posterior: &P,
        best_value: f64,
        request: &AcquisitionRequest,
    ) -> Result<Vec<Point>, AcquisitionError> {
        request.validate()?;
        if posterior.dim() != request.bounds.dim() {
            return Err(AcquisitionError::DimensionMismatch {
                posterior: posterior.dim(),
                bounds: request.bounds.dim(),
            });
        }
        if !best_value.is_finite() {
            return Err(AcquisitionError::InvalidBestValue { value: best_value });
        }

        let base_samples = normal_base_samples(request.mc_samples, request.q, request.seed)?;
        let objective = BatchObjective {
            posterior,
            bounds: &request.bounds,
            best_value,
            base_samples: &base_samples,
            q: request.q,
        };

        let starts = initial_conditions(
            &objective,
            request.raw_samples,
            request.num_restarts,
            request.seed,
            self.settings.eta,
        );

        let results: Vec<(Vec<f64>, f64)> = starts
            .into_par_iter()
            .map(|start| adam_ascent(&objective, start, request.max_iters, &self.settings))
            .collect();

        // Strict comparison keeps the lowest restart index on ties.
        let mut winner: Option<(usize, &(Vec<f64>, f64))> = None;
        for (index, result) in results.iter().enumerate() {
            if !result.1.is_finite() {
                continue;
            }
            match winner {
                Some((_, best)) if result.1 <= best.1 => {}
                _ => winner = Some((index, result)),
            }
        }
        let (index, (unit, value)) = winner.ok_or(AcquisitionError::NoFiniteCandidate)?;
        debug!(restart = index, qei = *value, "acquisition optimum");

        let batch = objective.to_points(unit);
        let duplicates = count_near_duplicates(&batch, &request.bounds);
        if duplicates > 0 {
            debug!(duplicates, "proposed batch contains near-duplicate points");
        }
        Ok(batch)
    }
}

/// Pick `num_restarts` starting batches from a Sobol pool of `raw_samples`.
///
/// The best raw batch is always kept; the rest are drawn without replacement
/// with weights `exp(eta · z)` on the standardized scores.
pub(crate) fn initial_conditions<P: Posterior>(
    objective: &BatchObjective<'_, P>,
    raw_samples: usize,
    num_restarts: usize,
    seed: u64,
    eta: f64,
) -> Vec<Vec<f64>> {
    let pool = sobol_unit(raw_samples, objective.dim(), seed);
    let scores: Vec<f64> = pool.par_iter().map(|x| objective.value(x)).collect();
    let picks = boltzmann_select(&scores, num_restarts, seed, eta);
    picks.into_iter().map(|i| pool[i].clone()).collect()
}

fn boltzmann_select(scores: &[f64], k: usize, seed: u64, eta: f64) -> Vec<usize> {
    let n = scores.len();
    let k = k.min(n);
    if k == 0 {
        return Vec::new();
    }
    let mut rng = ChaCha8Rng::seed_from_u64(seed.wrapping_add(SOBOL_DIMENSIONS as u64));

    let max = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let weights: Vec<f64> = if max <= 0.0 {
        vec![1.0; n]
    } else {
        let mean = scores.iter().sum::<f64>() / n as f64;
        let std = (scores.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / n as f64).sqrt();
        if std > 0.0 {
            scores.iter().map(|s| (eta * (s - mean) / std).exp()).collect()
        } else {
            vec![1.0; n]
        }
    };

    let mut chosen = Vec::with_capacity(k);
    let mut available = vec![true; n];
    if max > 0.0 {
        // First index holding the maximum score.
        let best = scores.iter().position(|s| *s == max).unwrap_or(0);
        chosen.push(best);
        available[best] = false;
    }
    while chosen.len() < k {
        let total: f64 = (0..n).filter(|&i| available[i]).map(|i| weights[i]).sum();
        let mut target = rng.random::<f64>() * total;
        let mut pick = None;
        for i in (0..n).filter(|&i| available[i]) {
            pick = Some(i);
            if target < weights[i] {
                break;
            }
            target -= weights[i];
        }
        match pick {
            Some(i) => {
                chosen.push(i);
                available[i] = false;
            }
            None => break,
        }
    }
    chosen
}

/// Projected Adam ascent with central finite-difference gradients, clamped
/// to the unit cube. Returns the best iterate seen and its value.
pub(crate) fn adam_ascent<P: Posterior>(
    objective: &BatchObjective<'_, P>,
    start: Vec<f64>,
    max_iters: usize,
    settings: &AdamSettings,
) -> (Vec<f64>, f64) {
    let dim = start.len();
    let mut x = start;
    let mut m = vec![0.0; dim];
    let mut v = vec![0.0; dim];

    let mut best_x = x.clone();
    let mut best_value = objective.value(&x);
    let mut stall = 0;

    for t in 1..=max_iters {
        let grad = batch_gradient(objective, &x);

        let bias1 = 1.0 - settings.beta1.powi(t as i32);
        let bias2 = 1.0 - settings.beta2.powi(t as i32);
        for i in 0..dim {
            m[i] = settings.beta1 * m[i] + (1.0 - settings.beta1) * grad[i];
            v[i] = settings.beta2 * v[i] + (1.0 - settings.beta2) * grad[i] * grad[i];
            let step = settings.learning_rate * (m[i] / bias1) / ((v[i] / bias2).sqrt() + settings.epsilon);
            x[i] = (x[i] + step).clamp(0.0, 1.0);
        }

        let value = objective.value(&x);
        if value > best_value + settings.rel_tolerance * best_value.abs() {
            best_value = value;
            best_x.copy_from_slice(&x);
            stall = 0;
        } else {
            stall += 1;
            if stall >= settings.patience {
                break;
            }
        }
    }
    (best_x, best_value)
}

/// Central-difference gradient of qEI at `x`. Steps past a face of the cube
/// evaluate on the face, so derivatives there are one-sided.
pub(crate) fn batch_gradient<P: Posterior>(objective: &BatchObjective<'_, P>, x: &Vec<f64>) -> Vec<f64> {
    x.central_diff(&|p: &Vec<f64>| objective.value(p))
}
