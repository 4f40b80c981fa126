//! Deterministic stand-ins for a pretrained decoder and classifier.
//!
//! Both models are random linear layers drawn from a seeded ChaCha stream, so
//! the same seed always yields the same objective surface.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use lb_types::ModelError;

use crate::evaluator::{ImageClassifier, LatentDecoder};

/// Shape and seed of the synthetic decoder/classifier pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyntheticObjectiveConfig {
    pub latent_dim: usize,
    /// Number of pixels in a decoded image.
    pub pixels: usize,
    pub classes: usize,
    /// Class preferred by the Gaussian class score.
    pub target_class: usize,
    /// Sharpness of the Gaussian class score.
    pub width: f64,
    pub seed: u64,
}

impl Default for SyntheticObjectiveConfig {
    fn default() -> Self {
        Self {
            latent_dim: 20,
            pixels: 64,
            classes: 10,
            target_class: 3,
            width: 2.0,
            seed: 7,
        }
    }
}

/// `image = sigmoid(W z + b)` with `W` drawn uniformly and scaled by `1/√D`.
#[derive(Debug, Clone)]
pub struct LinearDecoder {
    weights: Vec<Vec<f64>>,
    bias: Vec<f64>,
}

impl LinearDecoder {
    pub fn new(latent_dim: usize, pixels: usize, seed: u64) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let scale = 1.0 / (latent_dim.max(1) as f64).sqrt();
        let weights = (0..pixels)
            .map(|_| {
                (0..latent_dim)
                    .map(|_| rng.random_range(-1.0..1.0) * scale)
                    .collect()
            })
            .collect();
        let bias = (0..pixels).map(|_| rng.random_range(-0.5..0.5)).collect();
        Self { weights, bias }
    }

    pub fn pixels(&self) -> usize {
        self.bias.len()
    }
}

impl LatentDecoder for LinearDecoder {
    type Image = Vec<f64>;

    fn decode(&self, latent: &[f64]) -> Result<Vec<f64>, ModelError> {
        if latent.iter().any(|z| !z.is_finite()) {
            return Err(ModelError::new("latent vector contains non-finite entries"));
        }
        Ok(self
            .weights
            .iter()
            .zip(&self.bias)
            .map(|(row, b)| {
                let a: f64 = row.iter().zip(latent).map(|(w, z)| w * z).sum::<f64>() + b;
                1.0 / (1.0 + (-a).exp())
            })
            .collect())
    }

    fn latent_dim(&self) -> usize {
        self.weights.first().map_or(0, Vec::len)
    }
}

/// `p = softmax(W x + b)` over a fixed number of classes.
#[derive(Debug, Clone)]
pub struct SoftmaxClassifier {
    weights: Vec<Vec<f64>>,
    bias: Vec<f64>,
}

impl SoftmaxClassifier {
    pub fn new(pixels: usize, classes: usize, seed: u64) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed.wrapping_add(1));
        let scale = 4.0 / (pixels.max(1) as f64).sqrt();
        let weights = (0..classes)
            .map(|_| (0..pixels).map(|_| rng.random_range(-1.0..1.0) * scale).collect())
            .collect();
        let bias = (0..classes).map(|_| rng.random_range(-0.5..0.5)).collect();
        Self { weights, bias }
    }
}

impl ImageClassifier<Vec<f64>> for SoftmaxClassifier {
    fn class_probabilities(&self, image: &Vec<f64>) -> Result<Vec<f64>, ModelError> {
        let expected = self.weights.first().map_or(0, Vec::len);
        if image.len() != expected {
            return Err(ModelError::new(format!(
                "image has {} pixels, classifier expects {expected}",
                image.len()
            )));
        }

        let logits: Vec<f64> = self
            .weights
            .iter()
            .zip(&self.bias)
            .map(|(row, b)| row.iter().zip(image).map(|(w, x)| w * x).sum::<f64>() + b)
            .collect();
        let max = logits.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let exps: Vec<f64> = logits.iter().map(|l| (l - max).exp()).collect();
        let total: f64 = exps.iter().sum();
        Ok(exps.into_iter().map(|e| e / total).collect())
    }

    fn num_classes(&self) -> usize {
        self.bias.len()
    }
}
