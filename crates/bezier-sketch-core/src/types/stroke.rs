//! Pen samples and strokes.

use serde::{Deserialize, Serialize};

/// 2D point type used throughout the pipeline.
pub type Point = [f32; 2];

/// One pen sample: a 2D position plus a pen-lift flag.
///
/// The flag marks the *last* sample of a pen-down segment, mirroring the
/// three-column `(x, y, pen_state)` rows yielded by the dataset iterator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Absolute position on the canvas.
    pub position: Point,
    /// Pen lifted after this sample.
    pub pen_lift: bool,
}

impl Sample {
    pub fn new(x: f32, y: f32, pen_lift: bool) -> Self {
        Self {
            position: [x, y],
            pen_lift,
        }
    }
}

/// One continuous pen-down path within a sketch.
///
/// Strokes are immutable once read from the dataset. Derived attributes
/// (`start_anchor`, `local_offsets`) are computed on demand; degenerate
/// (empty) strokes are rejected at the batch normalizer boundary, not here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stroke {
    samples: Vec<Sample>,
}

impl Stroke {
    pub fn new(samples: Vec<Sample>) -> Self {
        Self { samples }
    }

    /// Build a stroke from dataset rows with columns `(x, y, pen_state)`.
    pub fn from_rows(rows: &[[f32; 3]]) -> Self {
        let samples = rows
            .iter()
            .map(|row| Sample::new(row[0], row[1], row[2] != 0.0))
            .collect();
        Self { samples }
    }

    /// Number of samples in the stroke.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    /// Absolute position of the first sample.
    ///
    /// Returns `None` for an empty stroke; valid strokes always have one.
    pub fn start_anchor(&self) -> Option<Point> {
        self.samples.first().map(|s| s.position)
    }

    /// Sample positions relative to the start anchor, pen state dropped.
    ///
    /// A length-1 stroke yields the single offset `[0, 0]`.
    pub fn local_offsets(&self) -> Vec<Point> {
        let Some(anchor) = self.start_anchor() else {
            return Vec::new();
        };
        self.samples
            .iter()
            .map(|s| [s.position[0] - anchor[0], s.position[1] - anchor[1]])
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_offsets_subtract_anchor() {
        let stroke = Stroke::from_rows(&[
            [10.0, 20.0, 0.0],
            [13.0, 24.0, 0.0],
            [16.0, 28.0, 1.0],
        ]);
        assert_eq!(stroke.start_anchor(), Some([10.0, 20.0]));
        assert_eq!(
            stroke.local_offsets(),
            vec![[0.0, 0.0], [3.0, 4.0], [6.0, 8.0]]
        );
    }

    #[test]
    fn test_single_sample_stroke_is_valid() {
        let stroke = Stroke::from_rows(&[[5.0, -2.0, 1.0]]);
        assert_eq!(stroke.len(), 1);
        assert_eq!(stroke.local_offsets(), vec![[0.0, 0.0]]);
    }

    #[test]
    fn test_pen_state_parsed_from_rows() {
        let stroke = Stroke::from_rows(&[[0.0, 0.0, 0.0], [1.0, 1.0, 1.0]]);
        assert!(!stroke.samples()[0].pen_lift);
        assert!(stroke.samples()[1].pen_lift);
    }
}
