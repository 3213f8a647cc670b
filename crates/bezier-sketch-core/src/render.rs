//! Render boundary: the exact data shape handed to the external curve codec.
//!
//! The codec turns control points plus optional rational weights into a
//! drawable polyline; this crate only *produces* that shape, it never
//! renders.

use crate::types::{first_stop, CurveDescriptor, Point};

/// One stroke, decoded and ready for the curve codec.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderableCurve {
    /// Absolute control points, `degree + 1` of them.
    pub control_points: Vec<Point>,
    /// Per-control-point weights in (0, 1), endpoints saturated; `None` for
    /// a non-rational curve.
    pub rational_weights: Option<Vec<f32>>,
    /// Stroke placement within the sketch.
    pub start: Point,
}

impl RenderableCurve {
    /// Decode a descriptor at its anchor into codec form.
    pub fn from_descriptor(descriptor: &CurveDescriptor, start_anchor: Point) -> Self {
        Self {
            control_points: descriptor.control_points(start_anchor),
            rational_weights: descriptor.full_weights(),
            start: start_anchor,
        }
    }
}

/// Number of valid strokes in a generated sequence, derived from its
/// stop bits.
///
/// The stroke where the stop bit first fires is the last real one; padding
/// is also marked 1.0, so the first firing index + 1 bounds the sequence.
/// A sequence whose stop never fires is fully valid.
pub fn stop_index(stop_bits: &[f32]) -> usize {
    match first_stop(stop_bits) {
        Some(index) => index + 1,
        None => stop_bits.len(),
    }
}

/// Decode a descriptor sequence into renderable curves, truncated at the
/// stop index.
pub fn decode_strokes(
    descriptors: &[CurveDescriptor],
    anchors: &[Point],
    stop_bits: &[f32],
) -> Vec<RenderableCurve> {
    let n = stop_index(stop_bits)
        .min(descriptors.len())
        .min(anchors.len());
    descriptors[..n]
        .iter()
        .zip(&anchors[..n])
        .map(|(descriptor, &anchor)| RenderableCurve::from_descriptor(descriptor, anchor))
        .collect()
}
