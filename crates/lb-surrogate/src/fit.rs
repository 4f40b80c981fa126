//! Hyperparameter fitting by penalized marginal-likelihood maximization.

use std::f64::consts::PI;

use argmin::core::{
    CostFunction, Error, Executor, Gradient, State, TerminationReason, TerminationStatus,
};
use argmin::solver::linesearch::MoreThuenteLineSearch;
use argmin::solver::quasinewton::LBFGS;
use nalgebra::DVector;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use lb_types::{Bounds, Dataset, SurrogateError};

use crate::gp::{GpHyperparameters, GpModel};
use crate::kernel::{kernel_matrix, matern52_with_grad};
use crate::linalg::robust_cholesky;
use crate::Surrogate;

type Params = Vec<f64>;
type Lbfgs = LBFGS<MoreThuenteLineSearch<Params, Params, f64>, Params, Params, f64>;

/// Gamma(shape, rate) priors on the constrained hyperparameters.
const LENGTHSCALE_PRIOR: (f64, f64) = (3.0, 6.0);
const OUTPUTSCALE_PRIOR: (f64, f64) = (2.0, 0.15);
const NOISE_PRIOR: (f64, f64) = (1.1, 0.05);

/// Solver settings for the hyperparameter fit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GpConfig {
    /// Iteration cap for L-BFGS.
    pub max_iters: u64,
    pub tol_grad: f64,
    pub lbfgs_memory: usize,
}

impl Default for GpConfig {
    fn default() -> Self {
        Self {
            max_iters: 100,
            tol_grad: 1e-5,
            lbfgs_memory: 7,
        }
    }
}

/// Outcome of one hyperparameter fit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitReport {
    pub iterations: u64,
    /// False when the solver hit its iteration cap or errored out.
    pub converged: bool,
    /// Penalized log marginal likelihood per observation at the kept parameters.
    pub objective: f64,
    pub status: String,
}

/// A freshly fitted model together with how its fit went.
#[derive(Debug, Clone)]
pub struct Fitted<M> {
    pub model: M,
    pub report: FitReport,
}

/// Exact GP surrogate fitted with L-BFGS (More-Thuente line search).
#[derive(Debug, Clone, Default)]
pub struct GaussianProcess {
    config: GpConfig,
}

impl GaussianProcess {
    pub fn new(config: GpConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &GpConfig {
        &self.config
    }

    fn solve(
        &self,
        problem: MllProblem<'_>,
        init: Params,
    ) -> Result<(Params, f64, u64, TerminationStatus), Error> {
        let linesearch = MoreThuenteLineSearch::new();
        let solver: Lbfgs =
            LBFGS::new(linesearch, self.config.lbfgs_memory).with_tolerance_grad(self.config.tol_grad)?;

        let max_iters = self.config.max_iters;
        let result = Executor::new(problem, solver)
            .configure(|state| state.param(init).max_iters(max_iters))
            .run()?;

        let state = result.state();
        let best = state
            .get_best_param()
            .cloned()
            .ok_or_else(|| Error::msg("solver finished without a parameter vector"))?;
        Ok((
            best,
            state.get_best_cost(),
            state.get_iter(),
            state.get_termination_status().clone(),
        ))
    }
}

impl Surrogate for GaussianProcess {
    type Model = GpModel;

    fn fit(
        &self,
        dataset: &Dataset,
        bounds: &Bounds,
        previous: Option<&GpModel>,
    ) -> Result<Fitted<GpModel>, SurrogateError> {
        let dim = bounds.dim();
        if dataset.is_empty() {
            return Err(SurrogateError::EmptyDataset);
        }

        let mut x = Vec::with_capacity(dataset.len());
        let mut raw_y = Vec::with_capacity(dataset.len());
        for (index, obs) in dataset.observations().iter().enumerate() {
            if obs.point.len() != dim {
                return Err(SurrogateError::DimensionMismatch {
                    expected: dim,
                    found: obs.point.len(),
                });
            }
            if !obs.value.is_finite() || obs.point.iter().any(|v| !v.is_finite()) {
                return Err(SurrogateError::NonFiniteObservation { index });
            }
            x.push(bounds.normalize(&obs.point));
            raw_y.push(obs.value);
        }
        let (y_mean, y_std) = standardization(&raw_y);
        let y: Vec<f64> = raw_y.iter().map(|v| (v - y_mean) / y_std).collect();

        let warm = previous
            .map(GpModel::hyperparameters)
            .filter(|h| h.dim() == dim)
            .cloned();
        let init = warm.clone().unwrap_or_else(|| GpHyperparameters::initial(dim));

        let best_seen = Mutex::new(None);
        let problem = MllProblem {
            x: &x,
            y: &y,
            best: &best_seen,
        };

        let (candidate, iterations, converged, status) = match self.solve(problem, init.to_vec()) {
            Ok((params, _cost, iterations, status)) => {
                let converged = matches!(
                    status,
                    TerminationStatus::Terminated(
                        TerminationReason::SolverConverged | TerminationReason::TargetCostReached
                    )
                );
                let status = match status {
                    TerminationStatus::Terminated(reason) => format!("{reason:?}"),
                    TerminationStatus::NotTerminated => "NotTerminated".to_string(),
                };
                (Some(params), iterations, converged, status)
            }
            Err(err) => {
                debug!("L-BFGS aborted: {}", err);
                (None, 0, false, format!("SolverError: {err}"))
            }
        };

        let tracked = best_seen.lock().as_ref().map(|(p, _)| p.clone());

        // Solver result first, then the best point it visited, then the starting points.
        let mut attempts: Vec<Params> = Vec::with_capacity(4);
        attempts.extend(candidate);
        attempts.extend(tracked);
        attempts.push(init.to_vec());
        if warm.is_some() {
            attempts.push(GpHyperparameters::initial(dim).to_vec());
        }

        let mut last_err = SurrogateError::SingularKernel { jitter: 0.0 };
        for params in attempts {
            if params.iter().any(|v| !v.is_finite()) {
                continue;
            }
            let objective = match penalized_mll(&x, &y, &params, false) {
                Ok((value, _)) if value.is_finite() => value,
                Ok(_) => continue,
                Err(err) => {
                    last_err = err;
                    continue;
                }
            };
            let hyper = GpHyperparameters::from_slice(dim, &params)?;
            match GpModel::new(bounds.clone(), hyper, x.clone(), &y, y_mean, y_std) {
                Ok(model) => {
                    debug!(
                        iterations,
                        converged,
                        %status,
                        objective,
                        train = model.num_train(),
                        noise = model.noise_variance(),
                        "GP fit finished"
                    );
                    return Ok(Fitted {
                        model,
                        report: FitReport {
                            iterations,
                            converged,
                            objective,
                            status,
                        },
                    });
                }
                Err(err) => last_err = err,
            }
        }
        Err(last_err)
    }
}

/// Sample mean and standard deviation used to standardize outcomes.
fn standardization(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    if values.len() < 2 {
        return (mean, 1.0);
    }
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    let std = var.sqrt();
    if std < 1e-8 {
        (mean, 1.0)
    } else {
        (mean, std)
    }
}

fn gamma_log_density(value: f64, (shape, rate): (f64, f64)) -> f64 {
    (shape - 1.0) * value.ln() - rate * value
}

/// Log marginal likelihood plus log priors, divided by the number of
/// observations, with its gradient in `to_vec` order when `with_grad` is set.
pub(crate) fn penalized_mll(
    x: &[Vec<f64>],
    y: &[f64],
    params: &[f64],
    with_grad: bool,
) -> Result<(f64, Vec<f64>), SurrogateError> {
    let dim = x.first().map(Vec::len).ok_or(SurrogateError::EmptyDataset)?;
    let hyper = GpHyperparameters::from_slice(dim, params)?;
    let lengthscales = hyper.lengthscales();
    let outputscale = hyper.outputscale();
    let noise = hyper.noise();
    let n = y.len();

    let k_f = kernel_matrix(x, &lengthscales, outputscale);
    let mut k = k_f.clone();
    for i in 0..n {
        k[(i, i)] += noise;
    }
    let chol = robust_cholesky(&k)?;

    let residual = DVector::from_iterator(n, y.iter().map(|v| v - hyper.mean));
    let alpha = chol.solve(&residual);
    let log_det: f64 = 2.0 * chol.l_dirty().diagonal().iter().map(|d| d.ln()).sum::<f64>();
    let mll = -0.5 * residual.dot(&alpha) - 0.5 * log_det - 0.5 * n as f64 * (2.0 * PI).ln();

    let prior = lengthscales
        .iter()
        .map(|l| gamma_log_density(*l, LENGTHSCALE_PRIOR))
        .sum::<f64>()
        + gamma_log_density(outputscale, OUTPUTSCALE_PRIOR)
        + gamma_log_density(noise, NOISE_PRIOR);

    let scale = 1.0 / n as f64;
    let value = (mll + prior) * scale;
    if !with_grad {
        return Ok((value, Vec::new()));
    }

    // dMLL/dθ = ½ tr((ααᵀ - K⁻¹) ∂K/∂θ)
    let w = &alpha * alpha.transpose() - chol.inverse();
    let mut grad = vec![0.0; dim + 3];
    let mut dk = vec![0.0; dim];
    for i in 0..n {
        for j in 0..i {
            matern52_with_grad(&x[i], &x[j], &lengthscales, outputscale, &mut dk);
            let wij = w[(i, j)];
            for (g, d) in grad.iter_mut().zip(&dk) {
                *g += wij * d;
            }
        }
    }
    let raw_noise_exp = hyper.raw_noise.exp();
    grad[dim] = 0.5 * w.component_mul(&k_f).sum();
    grad[dim + 1] = 0.5 * w.trace() * raw_noise_exp;
    grad[dim + 2] = alpha.sum();

    let (a, b) = LENGTHSCALE_PRIOR;
    for (g, l) in grad.iter_mut().zip(&lengthscales) {
        *g += (a - 1.0) - b * l;
    }
    let (a, b) = OUTPUTSCALE_PRIOR;
    grad[dim] += (a - 1.0) - b * outputscale;
    let (a, b) = NOISE_PRIOR;
    grad[dim + 1] += ((a - 1.0) / noise - b) * raw_noise_exp;

    for g in grad.iter_mut() {
        *g *= scale;
    }
    Ok((value, grad))
}

/// Negated penalized MLL as an argmin minimization problem.
struct MllProblem<'a> {
    x: &'a [Vec<f64>],
    y: &'a [f64],
    /// Lowest cost evaluated so far, kept across solver failures.
    best: &'a Mutex<Option<(Params, f64)>>,
}

impl MllProblem<'_> {
    fn record(&self, params: &[f64], cost: f64) {
        let mut best = self.best.lock();
        if best.as_ref().map_or(true, |(_, c)| cost < *c) {
            *best = Some((params.to_vec(), cost));
        }
    }
}

impl CostFunction for MllProblem<'_> {
    type Param = Params;
    type Output = f64;

    fn cost(&self, params: &Self::Param) -> Result<Self::Output, Error> {
        let (value, _) = penalized_mll(self.x, self.y, params, false)?;
        if !value.is_finite() {
            return Err(Error::msg(format!("non-finite marginal likelihood {value}")));
        }
        self.record(params, -value);
        Ok(-value)
    }
}

impl Gradient for MllProblem<'_> {
    type Param = Params;
    type Gradient = Params;

    fn gradient(&self, params: &Self::Param) -> Result<Self::Gradient, Error> {
        let (_, grad) = penalized_mll(self.x, self.y, params, true)?;
        if grad.iter().any(|g| !g.is_finite()) {
            return Err(Error::msg("non-finite marginal likelihood gradient"));
        }
        Ok(grad.into_iter().map(|g| -g).collect())
    }
}
