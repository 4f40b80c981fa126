//! # lb-objective
//!
//! Objective evaluation for latent-space optimization.
//!
//! A latent point is scored by decoding it into an image, classifying the
//! image, and taking the expectation of a per-class score under the
//! classifier's predicted distribution. The decoder and classifier are
//! injected capabilities; deterministic synthetic implementations are
//! provided for demos and tests.

mod evaluator;
mod score;
mod synthetic;

pub use evaluator::{
    EvaluationMode, ExpectedScoreEvaluator, ImageClassifier, LatentDecoder, Objective,
};
pub use score::{ClassScore, GaussianClassScore, TableScore};
pub use synthetic::{LinearDecoder, SoftmaxClassifier, SyntheticObjectiveConfig};
