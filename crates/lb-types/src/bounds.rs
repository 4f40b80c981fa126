//! Box-shaped search domain.

use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;
use crate::observation::Point;

/// A D-dimensional box `[lower_i, upper_i]` defining the valid latent domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawBounds")]
pub struct Bounds {
    lower: Vec<f64>,
    upper: Vec<f64>,
}

#[derive(Deserialize)]
struct RawBounds {
    lower: Vec<f64>,
    upper: Vec<f64>,
}

impl TryFrom<RawBounds> for Bounds {
    type Error = ConfigError;

    fn try_from(raw: RawBounds) -> Result<Self, Self::Error> {
        Bounds::new(raw.lower, raw.upper)
    }
}

impl Bounds {
    /// Validate and build a box from per-dimension lower and upper limits.
    pub fn new(lower: Vec<f64>, upper: Vec<f64>) -> Result<Self, ConfigError> {
        if lower.len() != upper.len() {
            return Err(ConfigError::BoundsLengthMismatch {
                lower: lower.len(),
                upper: upper.len(),
            });
        }
        if lower.is_empty() {
            return Err(ConfigError::EmptyBounds);
        }
        for (dim, (&lo, &hi)) in lower.iter().zip(&upper).enumerate() {
            // The width must be representable too, or sampling and normalization overflow.
            if !lo.is_finite() || !hi.is_finite() || lo >= hi || !(hi - lo).is_finite() {
                return Err(ConfigError::InvalidBounds {
                    dim,
                    lower: lo,
                    upper: hi,
                });
            }
        }
        Ok(Self { lower, upper })
    }

    /// The same `[low, high]` interval in every one of `dim` dimensions.
    pub fn uniform(dim: usize, low: f64, high: f64) -> Result<Self, ConfigError> {
        Self::new(vec![low; dim], vec![high; dim])
    }

    /// The unit cube `[0, 1]^dim`.
    pub fn unit(dim: usize) -> Result<Self, ConfigError> {
        Self::uniform(dim, 0.0, 1.0)
    }

    pub fn dim(&self) -> usize {
        self.lower.len()
    }

    pub fn lower(&self) -> &[f64] {
        &self.lower
    }

    pub fn upper(&self) -> &[f64] {
        &self.upper
    }

    /// Width of each dimension.
    pub fn ranges(&self) -> Vec<f64> {
        self.lower
            .iter()
            .zip(&self.upper)
            .map(|(lo, hi)| hi - lo)
            .collect()
    }

    /// Length of the box diagonal.
    pub fn diagonal(&self) -> f64 {
        self.ranges().iter().fold(0.0, |acc: f64, r| acc.hypot(*r))
    }

    /// Component-wise containment (inclusive on both ends).
    pub fn contains(&self, point: &[f64]) -> bool {
        point.len() == self.dim()
            && point
                .iter()
                .zip(self.lower.iter().zip(&self.upper))
                .all(|(x, (lo, hi))| *x >= *lo && *x <= *hi)
    }

    /// Map a point of the box onto the unit cube.
    pub fn normalize(&self, point: &[f64]) -> Point {
        point
            .iter()
            .zip(self.lower.iter().zip(&self.upper))
            .map(|(x, (lo, hi))| (x - lo) / (hi - lo))
            .collect()
    }

    /// Map a point of the unit cube back into the box.
    pub fn unnormalize(&self, unit: &[f64]) -> Point {
        unit.iter()
            .zip(self.lower.iter().zip(&self.upper))
            .map(|(u, (lo, hi))| lo + u * (hi - lo))
            .collect()
    }

    /// Project a point onto the box.
    pub fn clamp(&self, point: &[f64]) -> Point {
        point
            .iter()
            .zip(self.lower.iter().zip(&self.upper))
            .map(|(x, (lo, hi))| x.clamp(*lo, *hi))
            .collect()
    }
}
