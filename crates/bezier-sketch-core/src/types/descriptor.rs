//! Fixed-size curve descriptors.

use serde::{Deserialize, Serialize};

use crate::error::{SketchError, SketchResult};
use crate::SATURATED_WEIGHT_LOGIT;

use super::Point;

/// Fixed-size encoding of one stroke as a rational Bezier curve of a chosen
/// degree.
///
/// The descriptor stores control-point *deltas*, not absolute positions:
/// reconstruction prepends an implicit origin point and cumulative-sums, so
/// a degree-`d` descriptor carries `d` deltas and expands to the classical
/// `d + 1` control points anchored at the origin. Translation of the stroke
/// lives entirely in its start anchor.
///
/// `rational_weights` holds one raw logit per *interior* control point
/// (`d - 1` of them); endpoint weights are implicitly pinned at
/// [`SATURATED_WEIGHT_LOGIT`]. Non-rational descriptors omit them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurveDescriptor {
    control_point_deltas: Vec<Point>,
    #[serde(skip_serializing_if = "Option::is_none")]
    rational_weights: Option<Vec<f32>>,
    degree: usize,
}

impl CurveDescriptor {
    /// Create a descriptor, validating the delta/weight counts against the
    /// degree.
    pub fn new(
        control_point_deltas: Vec<Point>,
        rational_weights: Option<Vec<f32>>,
        degree: usize,
    ) -> SketchResult<Self> {
        if control_point_deltas.len() != degree {
            return Err(SketchError::DimensionMismatch {
                expected: degree,
                actual: control_point_deltas.len(),
            });
        }
        if let Some(ref weights) = rational_weights {
            if weights.len() != degree - 1 {
                return Err(SketchError::DimensionMismatch {
                    expected: degree - 1,
                    actual: weights.len(),
                });
            }
        }
        Ok(Self {
            control_point_deltas,
            rational_weights,
            degree,
        })
    }

    /// Build a non-rational descriptor from a flat `[dx0, dy0, dx1, ...]`
    /// slice, as emitted by an embedder head.
    pub fn from_flat(flat: &[f32], degree: usize) -> SketchResult<Self> {
        if flat.len() != degree * 2 {
            return Err(SketchError::DimensionMismatch {
                expected: degree * 2,
                actual: flat.len(),
            });
        }
        let deltas = flat.chunks_exact(2).map(|c| [c[0], c[1]]).collect();
        Self::new(deltas, None, degree)
    }

    /// Attach interior weight logits, turning this into a rational descriptor.
    pub fn with_weights(mut self, weights: Vec<f32>) -> SketchResult<Self> {
        if weights.len() != self.degree - 1 {
            return Err(SketchError::DimensionMismatch {
                expected: self.degree - 1,
                actual: weights.len(),
            });
        }
        self.rational_weights = Some(weights);
        Ok(self)
    }

    pub fn degree(&self) -> usize {
        self.degree
    }

    pub fn control_point_deltas(&self) -> &[Point] {
        &self.control_point_deltas
    }

    pub fn rational_weights(&self) -> Option<&[f32]> {
        self.rational_weights.as_deref()
    }

    pub fn is_rational(&self) -> bool {
        self.rational_weights.is_some()
    }

    /// Reconstruct absolute control points in the sketch frame.
    ///
    /// Prepends the implicit origin, cumulative-sums the deltas, then
    /// translates by `start_anchor`.
    pub fn control_points(&self, start_anchor: Point) -> Vec<Point> {
        let mut points = Vec::with_capacity(self.degree + 1);
        let mut acc = [0.0f32, 0.0f32];
        points.push([start_anchor[0], start_anchor[1]]);
        for delta in &self.control_point_deltas {
            acc[0] += delta[0];
            acc[1] += delta[1];
            points.push([start_anchor[0] + acc[0], start_anchor[1] + acc[1]]);
        }
        points
    }

    /// Weights for all `degree + 1` control points, endpoints saturated,
    /// sigmoid applied. `None` for non-rational descriptors.
    pub fn full_weights(&self) -> Option<Vec<f32>> {
        let interior = self.rational_weights.as_ref()?;
        let mut logits = Vec::with_capacity(interior.len() + 2);
        logits.push(SATURATED_WEIGHT_LOGIT);
        logits.extend_from_slice(interior);
        logits.push(SATURATED_WEIGHT_LOGIT);
        Some(logits.into_iter().map(sigmoid).collect())
    }
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_points_cumsum_from_anchor() {
        // A straight line: three equal deltas along (1, 2).
        let desc =
            CurveDescriptor::new(vec![[1.0, 2.0], [1.0, 2.0], [1.0, 2.0]], None, 3).unwrap();
        let points = desc.control_points([10.0, 0.0]);
        assert_eq!(
            points,
            vec![[10.0, 0.0], [11.0, 2.0], [12.0, 4.0], [13.0, 6.0]]
        );
    }

    #[test]
    fn test_from_flat_round_trip() {
        let flat = [0.5, -0.5, 1.0, 1.0];
        let desc = CurveDescriptor::from_flat(&flat, 2).unwrap();
        assert_eq!(desc.control_point_deltas(), &[[0.5, -0.5], [1.0, 1.0]]);
        assert!(!desc.is_rational());
    }

    #[test]
    fn test_weight_count_checked() {
        let desc = CurveDescriptor::from_flat(&[0.0; 6], 3).unwrap();
        assert!(desc.clone().with_weights(vec![0.0, 0.0]).is_ok());
        assert!(matches!(
            desc.with_weights(vec![0.0]),
            Err(SketchError::DimensionMismatch {
                expected: 2,
                actual: 1
            })
        ));
    }

    #[test]
    fn test_full_weights_saturate_endpoints() {
        let desc = CurveDescriptor::new(vec![[1.0, 0.0], [1.0, 0.0]], Some(vec![0.0]), 2)
            .unwrap();
        let weights = desc.full_weights().unwrap();
        assert_eq!(weights.len(), 3);
        // sigmoid(5) ~ 0.9933, sigmoid(0) = 0.5
        assert!((weights[0] - 0.9933).abs() < 1e-3);
        assert!((weights[1] - 0.5).abs() < 1e-6);
        assert!((weights[2] - 0.9933).abs() < 1e-3);
    }

    #[test]
    fn test_delta_count_must_match_degree() {
        assert!(CurveDescriptor::new(vec![[0.0, 0.0]], None, 3).is_err());
    }
}
