//! Per-class scoring functions.

use serde::{Deserialize, Serialize};

/// Maps a class index to a scalar reward.
pub trait ClassScore {
    fn score(&self, class: usize) -> f64;
}

impl<F> ClassScore for F
where
    F: Fn(usize) -> f64,
{
    fn score(&self, class: usize) -> f64 {
        self(class)
    }
}

/// `score(c) = exp(-width · (c - target)²)`, peaking at the target class.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GaussianClassScore {
    pub target: f64,
    pub width: f64,
}

impl GaussianClassScore {
    pub fn new(target: f64, width: f64) -> Self {
        Self { target, width }
    }
}

impl Default for GaussianClassScore {
    fn default() -> Self {
        // Prefer images of the digit 3.
        Self::new(3.0, 2.0)
    }
}

impl ClassScore for GaussianClassScore {
    fn score(&self, class: usize) -> f64 {
        let d = class as f64 - self.target;
        (-self.width * d * d).exp()
    }
}

/// Explicit per-class scores; classes past the end of the table score 0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableScore {
    scores: Vec<f64>,
}

impl TableScore {
    pub fn new(scores: Vec<f64>) -> Self {
        Self { scores }
    }
}

impl ClassScore for TableScore {
    fn score(&self, class: usize) -> f64 {
        self.scores.get(class).copied().unwrap_or(0.0)
    }
}
