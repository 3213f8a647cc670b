//! Error types for bezier-sketch-core.

use thiserror::Error;

/// Top-level error type for bezier-sketch-core.
#[derive(Debug, Error)]
pub enum SketchError {
    #[error("Empty stroke at index {index}: strokes must contain at least one sample")]
    EmptyStroke { index: usize },

    #[error("Empty sketch: sketches must contain at least one stroke")]
    EmptySketch,

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Validation error: {field} - {message}")]
    ValidationError { field: String, message: String },

    #[error("Degree {degree} outside supported range [{low}, {high}]")]
    DegreeOutOfRange { degree: usize, low: usize, high: usize },

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl From<serde_json::Error> for SketchError {
    fn from(err: serde_json::Error) -> Self {
        SketchError::SerializationError(err.to_string())
    }
}

/// Result type alias for core operations.
pub type SketchResult<T> = Result<T, SketchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SketchError::EmptyStroke { index: 3 };
        assert!(err.to_string().contains("index 3"));
    }

    #[test]
    fn test_degree_out_of_range() {
        let err = SketchError::DegreeOutOfRange {
            degree: 9,
            low: 3,
            high: 7,
        };
        assert!(err.to_string().contains('9'));
        assert!(err.to_string().contains("[3, 7]"));
    }
}
