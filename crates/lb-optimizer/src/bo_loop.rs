//! The batch Bayesian-optimization loop: fit, propose, evaluate, record.

use tracing::{debug, error, info, warn};

use lb_acquisition::{count_near_duplicates, AcquisitionStrategy, QExpectedImprovement};
use lb_objective::Objective;
use lb_surrogate::{GaussianProcess, Surrogate};
use lb_types::{
    AcquisitionError, Dataset, EvaluationError, LbError, LbResult, Point, RoundWarning,
};

use crate::config::OptimizationConfig;
use crate::sampling::initial_design;
use crate::state::{
    LoopFailure, OptimizationOutcome, OptimizationStatus, RoundObserver, RoundSummary,
};

/// Drives one optimization run. Owns the objective and the model components;
/// the dataset lives only inside [`run`](Self::run).
pub struct BayesOptLoop<O, S = GaussianProcess, A = QExpectedImprovement> {
    config: OptimizationConfig,
    objective: O,
    surrogate: S,
    strategy: A,
}

impl<O: Objective> BayesOptLoop<O> {
    /// Loop with the default GP surrogate and batch expected improvement.
    pub fn new(config: OptimizationConfig, objective: O) -> Self {
        let surrogate = GaussianProcess::new(config.gp_config());
        Self::with_components(config, objective, surrogate, QExpectedImprovement::default())
    }
}

impl<O, S, A> BayesOptLoop<O, S, A>
where
    O: Objective,
    S: Surrogate,
    A: AcquisitionStrategy,
{
    pub fn with_components(config: OptimizationConfig, objective: O, surrogate: S, strategy: A) -> Self {
        Self {
            config,
            objective,
            surrogate,
            strategy,
        }
    }

    pub fn config(&self) -> &OptimizationConfig {
        &self.config
    }

    pub fn run(&self) -> Result<OptimizationOutcome, LoopFailure> {
        self.run_with_observer(&mut |_: &RoundSummary| {})
    }

    /// Run to completion, calling `observer` after every round.
    pub fn run_with_observer(
        &self,
        observer: &mut dyn RoundObserver,
    ) -> Result<OptimizationOutcome, LoopFailure> {
        let mut outcome = OptimizationOutcome::new(OptimizationStatus::new(&self.config.name));
        info!(
            run_id = %outcome.status.id,
            name = %self.config.name,
            dim = self.config.bounds.dim(),
            planned_evaluations = self.config.total_evaluations(),
            "starting optimization"
        );

        match self.drive(&mut outcome, observer) {
            Ok(()) => {
                outcome.status.mark_done();
                info!(
                    best = ?outcome.best_value(),
                    evaluations = outcome.dataset.len(),
                    "optimization done"
                );
                Ok(outcome)
            }
            Err((round, err)) => {
                error!(round, error = %err, "optimization failed");
                outcome.status.mark_failed(err.to_string());
                Err(LoopFailure {
                    error: err,
                    round,
                    outcome,
                })
            }
        }
    }

    fn drive(
        &self,
        outcome: &mut OptimizationOutcome,
        observer: &mut dyn RoundObserver,
    ) -> Result<(), (usize, LbError)> {
        let config = &self.config;
        config.validate().map_err(|e| (0, LbError::from(e)))?;

        let design = initial_design(&config.bounds, config.initial_samples, config.seed);
        let values = self.evaluate(&design).map_err(|e| (0, e))?;
        outcome
            .dataset
            .extend_batch(0, &design, &values)
            .map_err(|e| (0, e))?;
        let mut best = best_of(&outcome.dataset).map_err(|e| (0, e))?;
        outcome.best_history.push(best);
        outcome.status.mark_running();
        info!(best, samples = design.len(), "initial design evaluated");

        let mut previous: Option<S::Model> = None;
        for round in 1..=config.rounds {
            let fitted = self
                .surrogate
                .fit(&outcome.dataset, &config.bounds, previous.as_ref())
                .map_err(|e| (round, LbError::from(e)))?;
            debug!(
                round,
                iterations = fitted.report.iterations,
                objective = fitted.report.objective,
                "surrogate fitted"
            );
            if !fitted.report.converged {
                warn!(round, status = %fitted.report.status, "surrogate fit did not converge");
                outcome.warnings.push(RoundWarning::FitNonConvergence {
                    round,
                    iterations: fitted.report.iterations,
                    status: fitted.report.status.clone(),
                });
            }

            let request = config.acquisition_request(round);
            let batch = self
                .strategy
                .propose(&fitted.model, best, &request)
                .map_err(|e| (round, LbError::from(e)))?;
            let batch = self.check_batch(batch).map_err(|e| (round, e))?;

            let duplicates = count_near_duplicates(&batch, &config.bounds);
            if duplicates > 0 {
                warn!(round, duplicates, "batch contains near-duplicate points");
                outcome.warnings.push(RoundWarning::AcquisitionDegenerate {
                    round,
                    duplicate_pairs: duplicates,
                });
            }

            let values = self.evaluate(&batch).map_err(|e| (round, e))?;
            outcome
                .dataset
                .extend_batch(round, &batch, &values)
                .map_err(|e| (round, e))?;

            best = values.iter().copied().fold(best, f64::max);
            outcome.best_history.push(best);
            outcome.fit_reports.push(fitted.report);
            outcome.status.rounds_completed = round;
            previous = Some(fitted.model);

            info!(
                round,
                best,
                batch_best = values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
                evaluations = outcome.dataset.len(),
                "round complete"
            );
            observer.on_round(&RoundSummary {
                round,
                batch,
                values,
                best_value: best,
                dataset_size: outcome.dataset.len(),
            });
        }
        Ok(())
    }

    /// Evaluate a batch and check it returned one finite score per point.
    fn evaluate(&self, batch: &[Point]) -> LbResult<Vec<f64>> {
        let values = self.objective.evaluate(batch)?;
        if values.len() != batch.len() {
            return Err(EvaluationError::BatchLengthMismatch {
                expected: batch.len(),
                found: values.len(),
            }
            .into());
        }
        if let Some((index, value)) = values.iter().enumerate().find(|(_, v)| !v.is_finite()) {
            return Err(EvaluationError::NonFiniteScore {
                index,
                value: *value,
            }
            .into());
        }
        Ok(values)
    }

    /// Enforce batch size and bounds on a proposed batch.
    fn check_batch(&self, batch: Vec<Point>) -> LbResult<Vec<Point>> {
        let bounds = &self.config.bounds;
        if batch.len() != self.config.batch_size {
            return Err(AcquisitionError::InvalidRequest {
                message: format!(
                    "strategy proposed {} points, expected {}",
                    batch.len(),
                    self.config.batch_size
                ),
            }
            .into());
        }
        if let Some(point) = batch.iter().find(|p| p.len() != bounds.dim()) {
            return Err(AcquisitionError::InvalidRequest {
                message: format!(
                    "strategy proposed a point of dimension {}, bounds have {}",
                    point.len(),
                    bounds.dim()
                ),
            }
            .into());
        }
        Ok(batch.iter().map(|p| bounds.clamp(p)).collect())
    }
}

fn best_of(dataset: &Dataset) -> LbResult<f64> {
    dataset
        .best_value()
        .ok_or_else(|| lb_types::internal_error!("dataset is empty after initialization"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use lb_acquisition::AcquisitionRequest;
    use lb_surrogate::{FitReport, Fitted, JointPrediction, Posterior, Prediction};
    use lb_types::{Bounds, ConfigError, SurrogateError};
    use nalgebra::{DMatrix, DVector};
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;
    use tracing_subscriber::layer::SubscriberExt;

    use crate::state::LoopState;

    /// Flat prior posterior.
    struct FlatModel {
        dim: usize,
    }

    impl Posterior for FlatModel {
        fn dim(&self) -> usize {
            self.dim
        }

        fn predict(&self, points: &[Point]) -> Vec<Prediction> {
            points
                .iter()
                .map(|_| Prediction {
                    mean: 0.0,
                    variance: 1.0,
                })
                .collect()
        }

        fn joint(&self, points: &[Point]) -> JointPrediction {
            let n = points.len();
            JointPrediction {
                mean: DVector::zeros(n),
                covariance: DMatrix::identity(n, n),
            }
        }
    }

    struct StubSurrogate {
        converged: bool,
    }

    impl Surrogate for StubSurrogate {
        type Model = FlatModel;

        fn fit(
            &self,
            dataset: &Dataset,
            bounds: &Bounds,
            _previous: Option<&FlatModel>,
        ) -> Result<Fitted<FlatModel>, SurrogateError> {
            if dataset.is_empty() {
                return Err(SurrogateError::EmptyDataset);
            }
            Ok(Fitted {
                model: FlatModel { dim: bounds.dim() },
                report: FitReport {
                    iterations: 3,
                    converged: self.converged,
                    objective: -1.0,
                    status: if self.converged {
                        "SolverConverged".into()
                    } else {
                        "MaxItersReached".into()
                    },
                },
            })
        }
    }

    /// Uniform random proposals seeded by the request.
    struct RandomStrategy;

    impl AcquisitionStrategy for RandomStrategy {
        fn propose<P: Posterior>(
            &self,
            _posterior: &P,
            _best_value: f64,
            request: &AcquisitionRequest,
        ) -> Result<Vec<Point>, AcquisitionError> {
            let mut rng = ChaCha8Rng::seed_from_u64(request.seed);
            Ok((0..request.q)
                .map(|_| {
                    request
                        .bounds
                        .lower()
                        .iter()
                        .zip(request.bounds.upper())
                        .map(|(&lo, &hi)| rng.random_range(lo..hi))
                        .collect()
                })
                .collect())
        }
    }

    /// Always proposes the same point.
    struct RepeatStrategy;

    impl AcquisitionStrategy for RepeatStrategy {
        fn propose<P: Posterior>(
            &self,
            _posterior: &P,
            _best_value: f64,
            request: &AcquisitionRequest,
        ) -> Result<Vec<Point>, AcquisitionError> {
            Ok(vec![request.bounds.lower().to_vec(); request.q])
        }
    }

    /// Scores points by their global evaluation index from a fixed table.
    struct TableObjective {
        table: Vec<f64>,
        calls: AtomicUsize,
        evaluated: AtomicUsize,
        fail_on_call: Option<usize>,
    }

    impl TableObjective {
        fn new(table: Vec<f64>) -> Self {
            Self {
                table,
                calls: AtomicUsize::new(0),
                evaluated: AtomicUsize::new(0),
                fail_on_call: None,
            }
        }

        fn failing_on(mut self, call: usize) -> Self {
            self.fail_on_call = Some(call);
            self
        }
    }

    impl Objective for TableObjective {
        fn evaluate(&self, batch: &[Point]) -> Result<Vec<f64>, EvaluationError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_on_call == Some(call) {
                return Err(EvaluationError::Decode {
                    index: 0,
                    message: "decoder rejected latent".into(),
                });
            }
            let start = self.evaluated.fetch_add(batch.len(), Ordering::SeqCst);
            Ok((start..start + batch.len())
                .map(|i| self.table[i % self.table.len()])
                .collect())
        }
    }

    fn tutorial_config() -> OptimizationConfig {
        OptimizationConfig::new("scenario", Bounds::uniform(20, -6.0, 6.0).unwrap())
            .with_initial_samples(5)
            .with_batch_size(3)
            .with_rounds(2)
            .with_seed(42)
    }

    fn stub_loop(
        config: OptimizationConfig,
        objective: TableObjective,
    ) -> BayesOptLoop<TableObjective, StubSurrogate, RandomStrategy> {
        BayesOptLoop::with_components(
            config,
            objective,
            StubSurrogate { converged: true },
            RandomStrategy,
        )
    }

    fn score_table() -> Vec<f64> {
        vec![0.1, 0.4, 0.2, 0.05, 0.3, 0.6, 0.15, 0.5, 0.9, 0.2, 0.7]
    }

    #[test]
    fn tutorial_scenario_sizes() {
        let outcome = stub_loop(tutorial_config(), TableObjective::new(score_table()))
            .run()
            .unwrap();
        assert_eq!(outcome.dataset.len(), 11);
        assert_eq!(outcome.best_history.len(), 3);
        assert_eq!(outcome.best_history, vec![0.4, 0.6, 0.9]);
        assert_eq!(outcome.status.state, LoopState::Done);
        assert_eq!(outcome.status.rounds_completed, 2);
        assert_eq!(outcome.fit_reports.len(), 2);
        assert!(outcome.warnings.is_empty());
    }

    #[test]
    fn dataset_grows_by_batch_and_history_is_monotone() {
        let config = tutorial_config().with_rounds(4);
        let mut sizes = Vec::new();
        let mut batch_lengths = Vec::new();
        let mut in_bounds = true;
        let bounds = config.bounds.clone();
        let outcome = stub_loop(config, TableObjective::new(score_table()))
            .run_with_observer(&mut |s: &RoundSummary| {
                sizes.push(s.dataset_size);
                batch_lengths.push(s.batch.len());
                in_bounds &= s.batch.iter().all(|p| bounds.contains(p));
            })
            .unwrap();

        assert_eq!(sizes, vec![8, 11, 14, 17]);
        assert_eq!(batch_lengths, vec![3; 4]);
        assert!(in_bounds);
        assert!(outcome.best_history.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(
            outcome.best_history.last().copied(),
            outcome.dataset.best_value()
        );
        for (k, obs) in outcome.dataset.observations().iter().enumerate() {
            let expected_round = if k < 5 { 0 } else { (k - 5) / 3 + 1 };
            assert_eq!(obs.round, expected_round);
        }
    }

    #[test]
    fn evaluation_failure_keeps_prior_rounds_only() {
        // Call 0 is the initial design, call 1 is round 1.
        let objective = TableObjective::new(score_table()).failing_on(1);
        let failure = stub_loop(tutorial_config(), objective).run().unwrap_err();

        assert_eq!(failure.round, 1);
        assert!(matches!(
            failure.error,
            LbError::Evaluation(EvaluationError::Decode { .. })
        ));
        assert_eq!(failure.outcome.dataset.len(), 5);
        assert_eq!(failure.outcome.best_history.len(), 1);
        assert_eq!(failure.outcome.status.state, LoopState::Failed);
        assert!(failure.outcome.status.error.is_some());
    }

    #[test]
    fn zero_initial_samples_fails_before_evaluating() {
        let objective = TableObjective::new(score_table());
        let bo = stub_loop(tutorial_config().with_initial_samples(0), objective);
        let failure = bo.run().unwrap_err();

        assert_eq!(failure.round, 0);
        assert!(matches!(
            failure.error,
            LbError::Config(ConfigError::NonPositive {
                field: "initial_samples"
            })
        ));
        assert_eq!(bo.objective.calls.load(Ordering::SeqCst), 0);
        assert!(failure.outcome.dataset.is_empty());
    }

    #[test]
    fn zero_rounds_evaluates_initial_design_only() {
        let outcome = stub_loop(
            tutorial_config().with_rounds(0),
            TableObjective::new(score_table()),
        )
        .run()
        .unwrap();
        assert_eq!(outcome.dataset.len(), 5);
        assert_eq!(outcome.best_history, vec![0.4]);
    }

    #[test]
    fn same_seed_reproduces_run() {
        let a = stub_loop(tutorial_config(), TableObjective::new(score_table()))
            .run()
            .unwrap();
        let b = stub_loop(tutorial_config(), TableObjective::new(score_table()))
            .run()
            .unwrap();
        assert_eq!(a.dataset, b.dataset);
        assert_eq!(a.best_history, b.best_history);
    }

    #[test]
    fn non_finite_scores_are_fatal_and_not_appended() {
        let objective = |batch: &[Point]| -> Result<Vec<f64>, EvaluationError> {
            Ok(vec![f64::NAN; batch.len()])
        };
        let bo = BayesOptLoop::with_components(
            tutorial_config(),
            objective,
            StubSurrogate { converged: true },
            RandomStrategy,
        );
        let failure = bo.run().unwrap_err();
        assert_eq!(failure.round, 0);
        assert!(matches!(
            failure.error,
            LbError::Evaluation(EvaluationError::NonFiniteScore { index: 0, .. })
        ));
        assert!(failure.outcome.dataset.is_empty());
    }

    #[test]
    fn short_batches_are_rejected() {
        // Scores the initial design fully, then drops one score per batch.
        let objective = |batch: &[Point]| -> Result<Vec<f64>, EvaluationError> {
            let n = if batch.len() == 5 { 5 } else { batch.len() - 1 };
            Ok(vec![1.0; n])
        };
        let bo = BayesOptLoop::with_components(
            tutorial_config(),
            objective,
            StubSurrogate { converged: true },
            RandomStrategy,
        );
        let failure = bo.run().unwrap_err();
        assert_eq!(failure.round, 1);
        assert!(matches!(
            failure.error,
            LbError::Evaluation(EvaluationError::BatchLengthMismatch {
                expected: 3,
                found: 2
            })
        ));
        assert_eq!(failure.outcome.dataset.len(), 5);
    }

    #[test]
    fn soft_conditions_become_warnings() {
        let bo = BayesOptLoop::with_components(
            tutorial_config(),
            TableObjective::new(score_table()),
            StubSurrogate { converged: false },
            RepeatStrategy,
        );
        let outcome = bo.run().unwrap();
        assert_eq!(outcome.dataset.len(), 11);

        let fit_warnings = outcome
            .warnings
            .iter()
            .filter(|w| matches!(w, RoundWarning::FitNonConvergence { .. }))
            .count();
        let degenerate: Vec<_> = outcome
            .warnings
            .iter()
            .filter_map(|w| match w {
                RoundWarning::AcquisitionDegenerate {
                    round,
                    duplicate_pairs,
                } => Some((*round, *duplicate_pairs)),
                _ => None,
            })
            .collect();
        assert_eq!(fit_warnings, 2);
        assert_eq!(degenerate, vec![(1, 3), (2, 3)]);
    }

    /// Counts WARN events emitted on the current thread.
    struct WarnCounter(Arc<AtomicUsize>);

    impl<T: tracing::Subscriber> tracing_subscriber::Layer<T> for WarnCounter {
        fn on_event(&self, event: &tracing::Event<'_>, _ctx: tracing_subscriber::layer::Context<'_, T>) {
            if *event.metadata().level() == tracing::Level::WARN {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    #[test]
    fn each_warning_is_logged_once() {
        let config = OptimizationConfig::new("warn", Bounds::uniform(2, -6.0, 6.0).unwrap())
            .with_initial_samples(4)
            .with_batch_size(2)
            .with_rounds(2)
            .with_fit_max_iters(1)
            .with_restarts(2, 8)
            .with_mc_samples(32)
            .with_acquisition_max_iters(5)
            .with_seed(2);
        let objective = |batch: &[Point]| -> Result<Vec<f64>, EvaluationError> {
            Ok(batch.iter().map(|p| -(p[0] * p[0]) - p[1].abs()).collect())
        };

        let warnings = Arc::new(AtomicUsize::new(0));
        let subscriber = tracing_subscriber::registry().with(WarnCounter(warnings.clone()));
        let outcome = tracing::subscriber::with_default(subscriber, || {
            BayesOptLoop::new(config, objective).run().unwrap()
        });

        assert!(!outcome.warnings.is_empty());
        assert_eq!(warnings.load(Ordering::SeqCst), outcome.warnings.len());
    }

    #[test]
    fn full_pipeline_with_gaussian_process() {
        let config = OptimizationConfig::new("gp", Bounds::uniform(2, -6.0, 6.0).unwrap())
            .with_initial_samples(5)
            .with_batch_size(2)
            .with_rounds(2)
            .with_fit_max_iters(30)
            .with_restarts(3, 16)
            .with_mc_samples(64)
            .with_acquisition_max_iters(20)
            .with_seed(5);
        let objective = |batch: &[Point]| -> Result<Vec<f64>, EvaluationError> {
            Ok(batch
                .iter()
                .map(|p| (-(p[0] - 1.0).powi(2) - (p[1] + 2.0).powi(2)).exp())
                .collect())
        };

        let first = BayesOptLoop::new(config.clone(), objective).run().unwrap();
        assert_eq!(first.dataset.len(), 9);
        assert_eq!(first.best_history.len(), 3);
        assert!(first
            .dataset
            .observations()
            .iter()
            .all(|o| config.bounds.contains(&o.point)));
        assert!(first.best_history.windows(2).all(|w| w[0] <= w[1]));

        let second = BayesOptLoop::new(config, objective).run().unwrap();
        assert_eq!(first.dataset, second.dataset);
        assert_eq!(first.best_history, second.best_history);
    }
}
