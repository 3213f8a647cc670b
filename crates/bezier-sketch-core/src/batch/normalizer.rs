//! Stroke batch normalization: anchors, local offsets, packing.

use crate::error::{SketchError, SketchResult};
use crate::types::{Point, Sketch};

use super::PackedSequence;

/// One sketch's strokes, normalized and packed for recurrent encoding.
#[derive(Debug, Clone)]
pub struct NormalizedStrokes {
    /// Absolute start position of each stroke, in original stroke order.
    pub start_anchors: Vec<Point>,
    /// Packed local-offset sequences (anchor subtracted, pen state dropped).
    pub offsets: PackedSequence,
    /// Per-stroke sample counts, in original stroke order.
    pub lengths: Vec<usize>,
}

impl NormalizedStrokes {
    /// Number of strokes in the sketch.
    pub fn stroke_count(&self) -> usize {
        self.start_anchors.len()
    }
}

/// Normalize one sketch: compute each stroke's start anchor, subtract it to
/// get local offsets, and pack the offset sequences.
///
/// Degenerate input is rejected here; everything downstream assumes
/// `stroke_count >= 1` and per-stroke `length >= 1`.
pub fn normalize_sketch(sketch: &Sketch) -> SketchResult<NormalizedStrokes> {
    if sketch.is_empty() {
        return Err(SketchError::EmptySketch);
    }

    let mut start_anchors = Vec::with_capacity(sketch.stroke_count());
    let mut sequences = Vec::with_capacity(sketch.stroke_count());
    let mut lengths = Vec::with_capacity(sketch.stroke_count());

    for (index, stroke) in sketch.strokes().iter().enumerate() {
        let anchor = stroke
            .start_anchor()
            .ok_or(SketchError::EmptyStroke { index })?;
        start_anchors.push(anchor);
        lengths.push(stroke.len());
        sequences.push(stroke.local_offsets());
    }

    let offsets = PackedSequence::from_sequences(&sequences)?;
    tracing::debug!(
        strokes = start_anchors.len(),
        max_len = offsets.max_len(),
        "normalized sketch"
    );

    Ok(NormalizedStrokes {
        start_anchors,
        offsets,
        lengths,
    })
}

/// Normalize every sketch in a batch, preserving batch order.
pub fn normalize_batch(sketches: &[Sketch]) -> SketchResult<Vec<NormalizedStrokes>> {
    sketches.iter().map(normalize_sketch).collect()
}

/// Normalize a dataset batch of `(sketch, label)` pairs.
///
/// The class label is dataset metadata; the pipeline drops it.
pub fn normalize_labeled_batch<L>(batch: &[(Sketch, L)]) -> SketchResult<Vec<NormalizedStrokes>> {
    batch
        .iter()
        .map(|(sketch, _)| normalize_sketch(sketch))
        .collect()
}
