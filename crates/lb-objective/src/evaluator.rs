//! Decode → classify → expected-score composition.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use lb_types::{EvaluationError, ModelError, Point};

use crate::score::ClassScore;

/// Maps a latent vector to an image.
pub trait LatentDecoder {
    type Image;

    fn decode(&self, latent: &[f64]) -> Result<Self::Image, ModelError>;

    /// Expected length of the latent vectors accepted by [`decode`](Self::decode).
    fn latent_dim(&self) -> usize;
}

/// Maps an image to a probability distribution over classes.
pub trait ImageClassifier<I> {
    fn class_probabilities(&self, image: &I) -> Result<Vec<f64>, ModelError>;

    fn num_classes(&self) -> usize;
}

/// Scores a batch of latent points. Output order follows input order.
pub trait Objective {
    fn evaluate(&self, batch: &[Point]) -> Result<Vec<f64>, EvaluationError>;
}

impl<F> Objective for F
where
    F: Fn(&[Point]) -> Result<Vec<f64>, EvaluationError>,
{
    fn evaluate(&self, batch: &[Point]) -> Result<Vec<f64>, EvaluationError> {
        self(batch)
    }
}

/// How the points of a batch are evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationMode {
    #[default]
    Sequential,
    /// Evaluate points concurrently on the rayon pool.
    Parallel,
}

/// Tolerance on `sum(p) == 1` for classifier outputs.
const PROBABILITY_SUM_TOLERANCE: f64 = 1e-6;

/// Objective that scores `z` as `Σ_c p(c | decode(z)) · score(c)`.
#[derive(Debug, Clone)]
pub struct ExpectedScoreEvaluator<D, C, S> {
    decoder: D,
    classifier: C,
    score: S,
    mode: EvaluationMode,
}

impl<D, C, S> ExpectedScoreEvaluator<D, C, S>
where
    D: LatentDecoder,
    C: ImageClassifier<D::Image>,
    S: ClassScore,
{
    pub fn new(decoder: D, classifier: C, score: S) -> Self {
        Self {
            decoder,
            classifier,
            score,
            mode: EvaluationMode::Sequential,
        }
    }

    pub fn with_mode(mut self, mode: EvaluationMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn mode(&self) -> EvaluationMode {
        self.mode
    }

    /// Score one latent point; `index` is its position in the batch.
    pub fn score_point(&self, index: usize, latent: &[f64]) -> Result<f64, EvaluationError> {
        let expected = self.decoder.latent_dim();
        if latent.len() != expected {
            return Err(EvaluationError::DimensionMismatch {
                index,
                expected,
                found: latent.len(),
            });
        }

        let image = self
            .decoder
            .decode(latent)
            .map_err(|e| EvaluationError::Decode {
                index,
                message: e.to_string(),
            })?;

        let probs = self
            .classifier
            .class_probabilities(&image)
            .map_err(|e| EvaluationError::Classify {
                index,
                message: e.to_string(),
            })?;
        validate_distribution(index, &probs)?;

        let value: f64 = probs
            .iter()
            .enumerate()
            .map(|(class, p)| p * self.score.score(class))
            .sum();

        if !value.is_finite() {
            return Err(EvaluationError::NonFiniteScore { index, value });
        }
        Ok(value)
    }
}

impl<D, C, S> Objective for ExpectedScoreEvaluator<D, C, S>
where
    D: LatentDecoder + Sync,
    C: ImageClassifier<D::Image> + Sync,
    S: ClassScore + Sync,
{
    fn evaluate(&self, batch: &[Point]) -> Result<Vec<f64>, EvaluationError> {
        debug!(points = batch.len(), mode = ?self.mode, "evaluating batch");
        match self.mode {
            EvaluationMode::Sequential => batch
                .iter()
                .enumerate()
                .map(|(i, z)| self.score_point(i, z))
                .collect(),
            EvaluationMode::Parallel => {
                let results: Vec<Result<f64, EvaluationError>> = batch
                    .par_iter()
                    .enumerate()
                    .map(|(i, z)| self.score_point(i, z))
                    .collect();
                // Collecting in order surfaces the lowest failing index, as in
                // sequential mode.
                results.into_iter().collect()
            }
        }
    }
}

fn validate_distribution(index: usize, probs: &[f64]) -> Result<(), EvaluationError> {
    if probs.is_empty() {
        return Err(EvaluationError::InvalidDistribution {
            index,
            message: "classifier returned no classes".to_string(),
        });
    }
    if let Some((class, p)) = probs
        .iter()
        .enumerate()
        .find(|(_, p)| !p.is_finite() || **p < 0.0)
    {
        return Err(EvaluationError::InvalidDistribution {
            index,
            message: format!("probability {p} for class {class}"),
        });
    }
    let total: f64 = probs.iter().sum();
    if (total - 1.0).abs() > PROBABILITY_SUM_TOLERANCE {
        return Err(EvaluationError::InvalidDistribution {
            index,
            message: format!("probabilities sum to {total}"),
        });
    }
    Ok(())
}
