//! Run lifecycle, per-round summaries and the final outcome.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use lb_surrogate::FitReport;
use lb_types::{Dataset, LbError, Point, RoundWarning};

/// Unique optimization run identifier.
pub type RunId = Uuid;

/// Lifecycle state of an optimization run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoopState {
    Initializing,
    Running,
    Done,
    Failed,
}

/// Aggregate status of an optimization run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationStatus {
    pub id: RunId,
    pub name: String,
    pub state: LoopState,
    pub rounds_completed: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl OptimizationStatus {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            state: LoopState::Initializing,
            rounds_completed: 0,
            started_at: Utc::now(),
            finished_at: None,
            error: None,
        }
    }

    pub fn mark_running(&mut self) {
        self.state = LoopState::Running;
    }

    pub fn mark_done(&mut self) {
        self.state = LoopState::Done;
        self.finished_at = Some(Utc::now());
    }

    pub fn mark_failed(&mut self, error: String) {
        self.state = LoopState::Failed;
        self.finished_at = Some(Utc::now());
        self.error = Some(error);
    }
}

/// What happened in one completed round, handed to a [`RoundObserver`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundSummary {
    /// 1-based round index.
    pub round: usize,
    pub batch: Vec<Point>,
    pub values: Vec<f64>,
    /// Best value over the whole dataset after this round.
    pub best_value: f64,
    pub dataset_size: usize,
}

/// Callback invoked after every completed round.
pub trait RoundObserver {
    fn on_round(&mut self, summary: &RoundSummary);
}

impl<F> RoundObserver for F
where
    F: FnMut(&RoundSummary),
{
    fn on_round(&mut self, summary: &RoundSummary) {
        self(summary)
    }
}

/// Everything a run produced, complete or partial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationOutcome {
    pub status: OptimizationStatus,
    pub dataset: Dataset,
    /// Best value after initialization, then after each round.
    pub best_history: Vec<f64>,
    pub fit_reports: Vec<FitReport>,
    pub warnings: Vec<RoundWarning>,
}

impl OptimizationOutcome {
    pub(crate) fn new(status: OptimizationStatus) -> Self {
        Self {
            status,
            dataset: Dataset::new(),
            best_history: Vec::new(),
            fit_reports: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn best_value(&self) -> Option<f64> {
        self.best_history.last().copied()
    }
}

/// A run that stopped early. `outcome` holds the data collected before the
/// failing round; nothing from that round is included.
#[derive(Debug, Error)]
#[error("optimization failed in round {round}: {error}")]
pub struct LoopFailure {
    #[source]
    pub error: LbError,
    /// 0 for initialization, k for round k.
    pub round: usize,
    pub outcome: OptimizationOutcome,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_lifecycle() {
        let mut status = OptimizationStatus::new("run");
        assert_eq!(status.state, LoopState::Initializing);

        status.mark_running();
        assert_eq!(status.state, LoopState::Running);
        assert!(status.finished_at.is_none());

        status.mark_done();
        assert_eq!(status.state, LoopState::Done);
        assert!(status.finished_at.unwrap() >= status.started_at);
    }

    #[test]
    fn failure_records_message() {
        let mut status = OptimizationStatus::new("run");
        status.mark_failed("evaluator exploded".into());
        assert_eq!(status.state, LoopState::Failed);
        assert_eq!(status.error.as_deref(), Some("evaluator exploded"));
    }

    #[test]
    fn closure_observer() {
        let mut seen = Vec::new();
        {
            let mut observer = |s: &RoundSummary| seen.push(s.round);
            let summary = RoundSummary {
                round: 2,
                batch: vec![vec![0.0]],
                values: vec![1.0],
                best_value: 1.0,
                dataset_size: 6,
            };
            observer.on_round(&summary);
        }
        assert_eq!(seen, vec![2]);
    }

    #[test]
    fn outcome_serializes() {
        let outcome = OptimizationOutcome::new(OptimizationStatus::new("run"));
        let json = serde_json::to_string(&outcome).unwrap();
        let back: OptimizationOutcome = serde_json::from_str(&json).unwrap();
        assert_eq!(outcome, back);
        assert_eq!(back.best_value(), None);
    }
}
