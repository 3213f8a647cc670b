//! Sketches: ordered stroke sequences with stop bits.

use serde::{Deserialize, Serialize};

use super::Stroke;

/// An ordered sequence of strokes forming one drawing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sketch {
    strokes: Vec<Stroke>,
}

impl Sketch {
    pub fn new(strokes: Vec<Stroke>) -> Self {
        Self { strokes }
    }

    /// Number of real strokes in the sketch.
    pub fn stroke_count(&self) -> usize {
        self.strokes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strokes.is_empty()
    }

    pub fn strokes(&self) -> &[Stroke] {
        &self.strokes
    }

    /// Stop-bit sequence padded out to `padded_len`.
    ///
    /// The last real stroke is marked 1.0; every position at or beyond
    /// `stroke_count` is also 1.0 so a consumer can treat "stop" and
    /// "padding" identically. Strictly interior positions are 0.0.
    pub fn stop_bits(&self, padded_len: usize) -> Vec<f32> {
        let n = self.stroke_count();
        (0..padded_len.max(n))
            .map(|i| if i + 1 >= n { 1.0 } else { 0.0 })
            .collect()
    }
}

/// First index at which a stop-bit sequence fires.
///
/// Because padding is also marked 1.0, this is the index of the sketch's
/// last real stroke without consulting the stroke count.
pub fn first_stop(stop_bits: &[f32]) -> Option<usize> {
    stop_bits.iter().position(|&b| b >= 0.5)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Stroke;

    fn stroke() -> Stroke {
        Stroke::from_rows(&[[0.0, 0.0, 0.0], [1.0, 1.0, 1.0]])
    }

    #[test]
    fn test_stop_bits_mark_last_real_stroke() {
        let sketch = Sketch::new(vec![stroke(), stroke(), stroke()]);
        assert_eq!(sketch.stop_bits(5), vec![0.0, 0.0, 1.0, 1.0, 1.0]);
    }

    #[test]
    fn test_stop_bits_are_monotonic() {
        for n in 1..6 {
            let sketch = Sketch::new(vec![stroke(); n]);
            let bits = sketch.stop_bits(8);
            for pair in bits.windows(2) {
                assert!(pair[1] >= pair[0], "stop bits must be non-decreasing");
            }
            assert_eq!(first_stop(&bits), Some(n - 1));
        }
    }

    #[test]
    fn test_single_stroke_sketch_stops_immediately() {
        let sketch = Sketch::new(vec![stroke()]);
        assert_eq!(sketch.stop_bits(3), vec![1.0, 1.0, 1.0]);
        assert_eq!(first_stop(&sketch.stop_bits(3)), Some(0));
    }
}
