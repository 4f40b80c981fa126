//! Observations and the append-only dataset owned by the optimization loop.

use serde::{Deserialize, Serialize};

use crate::errors::{EvaluationError, LbError, LbResult};

/// A point in the latent space.
pub type Point = Vec<f64>;

/// One evaluated point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub point: Point,
    pub value: f64,
    /// 0 for the initial design, k for the batch proposed in round k.
    pub round: usize,
}

/// Every observation collected so far, in evaluation order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    observations: Vec<Observation>,
}

impl Dataset {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    /// Dimension of the stored points, `None` while empty.
    pub fn dim(&self) -> Option<usize> {
        self.observations.first().map(|o| o.point.len())
    }

    pub fn observations(&self) -> &[Observation] {
        &self.observations
    }

    pub fn points(&self) -> Vec<&[f64]> {
        self.observations.iter().map(|o| o.point.as_slice()).collect()
    }

    pub fn values(&self) -> Vec<f64> {
        self.observations.iter().map(|o| o.value).collect()
    }

    /// Maximum observed value.
    pub fn best_value(&self) -> Option<f64> {
        self.best_observation().map(|o| o.value)
    }

    /// Observation holding the maximum value; the earliest one wins ties.
    pub fn best_observation(&self) -> Option<&Observation> {
        self.observations.iter().fold(None, |best, o| match best {
            Some(b) if b.value >= o.value => Some(b),
            _ => Some(o),
        })
    }

    /// Append a single observation.
    pub fn push(&mut self, observation: Observation) -> LbResult<()> {
        self.check_point(0, &observation.point)?;
        if !observation.value.is_finite() {
            return Err(EvaluationError::NonFiniteScore {
                index: 0,
                value: observation.value,
            }
            .into());
        }
        self.observations.push(observation);
        Ok(())
    }

    /// Append a whole evaluated batch, or nothing at all if any entry is
    /// invalid.
    pub fn extend_batch(&mut self, round: usize, points: &[Point], values: &[f64]) -> LbResult<()> {
        if points.len() != values.len() {
            return Err(EvaluationError::BatchLengthMismatch {
                expected: points.len(),
                found: values.len(),
            }
            .into());
        }
        let expected_dim = self.dim().or_else(|| points.first().map(Vec::len));
        for (index, (point, value)) in points.iter().zip(values).enumerate() {
            if let Some(dim) = expected_dim {
                if point.len() != dim {
                    return Err(LbError::Internal(format!(
                        "batch point {index} has dimension {}, dataset holds dimension {dim}",
                        point.len()
                    )));
                }
            }
            if !value.is_finite() {
                return Err(EvaluationError::NonFiniteScore {
                    index,
                    value: *value,
                }
                .into());
            }
        }

        self.observations
            .extend(points.iter().zip(values).map(|(point, value)| Observation {
                point: point.clone(),
                value: *value,
                round,
            }));
        Ok(())
    }

    fn check_point(&self, index: usize, point: &[f64]) -> LbResult<()> {
        match self.dim() {
            Some(dim) if dim != point.len() => Err(LbError::Internal(format!(
                "point {index} has dimension {}, dataset holds dimension {dim}",
                point.len()
            ))),
            _ => Ok(()),
        }
    }
}
