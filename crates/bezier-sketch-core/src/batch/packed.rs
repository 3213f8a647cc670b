//! Explicit packed-sequence representation for variable-length recurrence.

use crate::error::{SketchError, SketchResult};
use crate::types::Point;

/// A batch of variable-length 2D sequences, padded and length-sorted, with
/// the permutation needed to restore original order.
///
/// Rows are sorted by descending length so recurrent consumers can shrink
/// the active batch as timesteps advance; `permutation` maps a sorted row
/// back to its original index and `inverse` maps an original index to its
/// sorted row. Padded positions are zero and must be excluded from
/// recurrent updates via [`PackedSequence::timestep_mask`].
#[derive(Debug, Clone, PartialEq)]
pub struct PackedSequence {
    data: Vec<f32>,
    batch: usize,
    max_len: usize,
    features: usize,
    lengths: Vec<usize>,
    permutation: Vec<usize>,
    inverse: Vec<usize>,
}

impl PackedSequence {
    /// Pack a batch of 2D point sequences.
    ///
    /// Every sequence must be non-empty; callers reject degenerate strokes
    /// before packing.
    pub fn from_sequences(sequences: &[Vec<Point>]) -> SketchResult<Self> {
        if sequences.is_empty() {
            return Err(SketchError::ValidationError {
                field: "sequences".to_string(),
                message: "cannot pack an empty batch".to_string(),
            });
        }
        for (index, seq) in sequences.iter().enumerate() {
            if seq.is_empty() {
                return Err(SketchError::EmptyStroke { index });
            }
        }

        let batch = sequences.len();
        let max_len = sequences.iter().map(Vec::len).max().unwrap_or(0);
        let features = 2;

        let mut permutation: Vec<usize> = (0..batch).collect();
        permutation.sort_by_key(|&i| std::cmp::Reverse(sequences[i].len()));
        let mut inverse = vec![0usize; batch];
        for (sorted_row, &original) in permutation.iter().enumerate() {
            inverse[original] = sorted_row;
        }

        let mut data = vec![0.0f32; batch * max_len * features];
        let mut lengths = Vec::with_capacity(batch);
        for (sorted_row, &original) in permutation.iter().enumerate() {
            let seq = &sequences[original];
            lengths.push(seq.len());
            for (t, point) in seq.iter().enumerate() {
                let base = (sorted_row * max_len + t) * features;
                data[base] = point[0];
                data[base + 1] = point[1];
            }
        }

        tracing::trace!(batch, max_len, "packed sequence batch");
        Ok(Self {
            data,
            batch,
            max_len,
            features,
            lengths,
            permutation,
            inverse,
        })
    }

    /// Flat padded data in sorted order, laid out `[batch, max_len, features]`.
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn batch(&self) -> usize {
        self.batch
    }

    pub fn max_len(&self) -> usize {
        self.max_len
    }

    pub fn features(&self) -> usize {
        self.features
    }

    /// True sequence lengths, in sorted (descending) order.
    pub fn lengths(&self) -> &[usize] {
        &self.lengths
    }

    /// Sorted row `i` holds the sequence originally at `permutation()[i]`.
    pub fn permutation(&self) -> &[usize] {
        &self.permutation
    }

    /// Original sequence `j` sits at sorted row `inverse_permutation()[j]`.
    pub fn inverse_permutation(&self) -> &[usize] {
        &self.inverse
    }

    /// Per-row validity mask for timestep `t`: 1.0 where `t < length`.
    pub fn timestep_mask(&self, t: usize) -> Vec<f32> {
        self.lengths
            .iter()
            .map(|&len| if t < len { 1.0 } else { 0.0 })
            .collect()
    }

    /// Number of rows still active at timestep `t`.
    pub fn active_rows(&self, t: usize) -> usize {
        self.lengths.iter().take_while(|&&len| t < len).count()
    }
}
