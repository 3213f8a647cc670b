//! Error types for bezier-sketch-model.

use thiserror::Error;

use bezier_sketch_core::SketchError;

/// Top-level error type for model operations.
///
/// Configuration and shape mismatches are programmer errors: fatal, raised
/// immediately at call time, never retried.
#[derive(Debug, Error)]
pub enum ModelError {
    /// A capability was requested that the model was not constructed with
    /// (rational output from a non-rational model, degree outside the
    /// supported range, variational sampling from a deterministic model).
    #[error("Configuration mismatch: {message}")]
    ConfigMismatch { message: String },

    /// Batch or sequence dimensions disagree between pipeline stages.
    #[error("Shape mismatch in {stage}: expected {expected:?}, got {actual:?}")]
    Shape {
        stage: &'static str,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    /// A tensor-backend operation failed.
    #[error("Tensor operation failed: {message}")]
    Tensor { message: String },

    /// Invalid input surfaced by the core batching layer.
    #[error(transparent)]
    Core(#[from] SketchError),
}

impl ModelError {
    /// Wrap a candle error with the operation that failed.
    pub fn tensor(op: &str, err: candle_core::Error) -> Self {
        ModelError::Tensor {
            message: format!("{op}: {err}"),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        ModelError::ConfigMismatch {
            message: message.into(),
        }
    }
}

/// Result type alias for model operations.
pub type ModelResult<T> = Result<T, ModelError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_mismatch_display() {
        let err = ModelError::config("rational output requested from a non-rational model");
        assert!(err.to_string().contains("non-rational"));
    }

    #[test]
    fn test_shape_display() {
        let err = ModelError::Shape {
            stage: "aggregate",
            expected: vec![4, 8, 16],
            actual: vec![4, 8, 12],
        };
        assert!(err.to_string().contains("aggregate"));
        assert!(err.to_string().contains("12"));
    }
}
