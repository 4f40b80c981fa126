use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for latent-bo
#[derive(Error, Debug)]
pub enum LbError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Evaluation error: {0}")]
    Evaluation(#[from] EvaluationError),

    #[error("Surrogate error: {0}")]
    Surrogate(#[from] SurrogateError),

    #[error("Acquisition error: {0}")]
    Acquisition(#[from] AcquisitionError),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Configuration errors, raised before the loop touches the evaluator
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Bounds length mismatch: lower has {lower} entries, upper has {upper}")]
    BoundsLengthMismatch { lower: usize, upper: usize },

    #[error("Bounds must span at least one dimension")]
    EmptyBounds,

    #[error("Invalid bounds in dimension {dim}: lower {lower} must be finite and below upper {upper}")]
    InvalidBounds { dim: usize, lower: f64, upper: f64 },

    #[error("{field} must be positive")]
    NonPositive { field: &'static str },

    #[error("raw_samples ({raw_samples}) must be at least num_restarts ({num_restarts})")]
    RawSamplesBelowRestarts {
        raw_samples: usize,
        num_restarts: usize,
    },

    #[error("Batch size {batch_size} exceeds the quasi-random dimension limit of {limit}")]
    BatchTooLarge { batch_size: usize, limit: usize },
}

/// Objective evaluation errors. Always fatal for the round that raised them.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvaluationError {
    #[error("Decoding failed for point {index}: {message}")]
    Decode { index: usize, message: String },

    #[error("Classification failed for point {index}: {message}")]
    Classify { index: usize, message: String },

    #[error("Invalid class distribution for point {index}: {message}")]
    InvalidDistribution { index: usize, message: String },

    #[error("Point {index} has dimension {found}, expected {expected}")]
    DimensionMismatch {
        index: usize,
        expected: usize,
        found: usize,
    },

    #[error("Non-finite score {value} for point {index}")]
    NonFiniteScore { index: usize, value: f64 },

    #[error("Evaluator returned {found} scores for a batch of {expected}")]
    BatchLengthMismatch { expected: usize, found: usize },
}

/// Surrogate fitting and prediction errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SurrogateError {
    #[error("Cannot fit a surrogate on an empty dataset")]
    EmptyDataset,

    #[error("Dimension mismatch: expected {expected}, found {found}")]
    DimensionMismatch { expected: usize, found: usize },

    #[error("Observation {index} is not finite")]
    NonFiniteObservation { index: usize },

    #[error("Kernel matrix is not positive definite even with jitter {jitter:e}")]
    SingularKernel { jitter: f64 },

    #[error("Hyperparameter vector has length {found}, expected {expected}")]
    HyperparameterLength { expected: usize, found: usize },
}

/// Acquisition errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AcquisitionError {
    #[error("Posterior dimension {posterior} does not match bounds dimension {bounds}")]
    DimensionMismatch { posterior: usize, bounds: usize },

    #[error("Best observed value must be finite, got {value}")]
    InvalidBestValue { value: f64 },

    #[error("Batch size {q} is outside the supported range 1..={limit}")]
    InvalidBatchSize { q: usize, limit: usize },

    #[error("Invalid acquisition request: {message}")]
    InvalidRequest { message: String },

    #[error("No restart produced a finite acquisition value")]
    NoFiniteCandidate,
}

/// Failure reported by an external model (decoder, classifier) behind a
/// capability trait.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{0}")]
pub struct ModelError(pub String);

impl ModelError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Conditions that are logged and recorded but never stop a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RoundWarning {
    /// Surrogate fit stopped at its iteration cap or its solver gave up;
    /// the round used the last parameters produced.
    FitNonConvergence {
        round: usize,
        iterations: u64,
        status: String,
    },
    /// The proposed batch contains near-duplicate points.
    AcquisitionDegenerate {
        round: usize,
        duplicate_pairs: usize,
    },
}

/// Result type alias for latent-bo operations
pub type LbResult<T> = Result<T, LbError>;

/// Macro for creating internal errors
#[macro_export]
macro_rules! internal_error {
    ($($arg:tt)*) => {
        $crate::LbError::Internal(format!($($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = ConfigError::RawSamplesBelowRestarts {
            raw_samples: 4,
            num_restarts: 10,
        };

        assert!(error.to_string().contains("raw_samples"));
        assert!(error.to_string().contains('4'));
        assert!(error.to_string().contains("10"));
    }

    #[test]
    fn test_error_conversion() {
        let eval_error = EvaluationError::Decode {
            index: 2,
            message: "bad latent".to_string(),
        };
        let lb_error: LbError = eval_error.into();

        match lb_error {
            LbError::Evaluation(EvaluationError::Decode { index, .. }) => assert_eq!(index, 2),
            _ => panic!("Expected Evaluation error"),
        }
    }

    #[test]
    fn internal_error_macro_formats() {
        let internal = internal_error!("Something went wrong: {}", 42);
        assert!(matches!(internal, LbError::Internal(ref m) if m.contains("42")));
        assert_eq!(internal.to_string(), "Internal error: Something went wrong: 42");
    }

    #[test]
    fn round_warning_round_trip() {
        let warning = RoundWarning::FitNonConvergence {
            round: 3,
            iterations: 100,
            status: "MaxItersReached".to_string(),
        };
        let json = serde_json::to_string(&warning).unwrap();
        let back: RoundWarning = serde_json::from_str(&json).unwrap();
        assert_eq!(warning, back);
    }
}
