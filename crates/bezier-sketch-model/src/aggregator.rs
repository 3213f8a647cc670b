//! Sketch aggregation: per-stroke embeddings back into padded per-sketch
//! sequences.

use candle_core::Tensor;

use bezier_sketch_core::types::Point;

use crate::embedder::DegreeOutput;
use crate::error::{ModelError, ModelResult};

/// One sketch's embedded strokes, ready for aggregation.
#[derive(Debug, Clone)]
pub struct EmbeddedSketch {
    /// `[strokes, descriptor_dim]`
    pub descriptors: Tensor,
    /// `[strokes, weight_dim]`, rational models only.
    pub weights: Option<Tensor>,
    /// Per-stroke start anchors, original order.
    pub start_anchors: Vec<Point>,
}

impl EmbeddedSketch {
    /// Pair an embedder output with the normalizer's anchors.
    pub fn new(output: DegreeOutput, start_anchors: Vec<Point>) -> ModelResult<Self> {
        let (strokes, _) = output
            .control_point_deltas
            .dims2()
            .map_err(|e| ModelError::tensor("embedded sketch dims", e))?;
        if strokes != start_anchors.len() {
            return Err(ModelError::Shape {
                stage: "embedded sketch anchors",
                expected: vec![strokes],
                actual: vec![start_anchors.len()],
            });
        }
        Ok(Self {
            descriptors: output.control_point_deltas,
            weights: output.rational_weights,
            start_anchors,
        })
    }

    pub fn stroke_count(&self) -> usize {
        self.start_anchors.len()
    }
}

/// Batch-aligned per-sketch sequences, padded along the stroke-count
/// dimension.
///
/// All tensors pad with zeros except `stop_bits`, which pads with ones so a
/// consumer can treat "stop" and "padding" identically.
#[derive(Debug, Clone)]
pub struct SketchAggregate {
    /// `[sketches, max_strokes, descriptor_dim]`
    pub descriptors: Tensor,
    /// `[sketches, max_strokes, weight_dim]`, rational models only.
    pub weights: Option<Tensor>,
    /// `[sketches, max_strokes, 2]`
    pub anchors: Tensor,
    /// `[sketches, max_strokes, 1]`
    pub stop_bits: Tensor,
    /// True stroke count per sketch.
    pub stroke_counts: Vec<usize>,
}

impl SketchAggregate {
    pub fn batch(&self) -> usize {
        self.stroke_counts.len()
    }

    pub fn max_strokes(&self) -> ModelResult<usize> {
        let (_, max_strokes, _) = self
            .descriptors
            .dims3()
            .map_err(|e| ModelError::tensor("aggregate dims", e))?;
        Ok(max_strokes)
    }

    pub fn descriptor_dim(&self) -> ModelResult<usize> {
        let (_, _, dim) = self
            .descriptors
            .dims3()
            .map_err(|e| ModelError::tensor("aggregate dims", e))?;
        Ok(dim)
    }

    /// Prepend a zero seed row along the stroke dimension so the first real
    /// stroke becomes a prediction target. Seed stop bit is 0.
    pub fn with_seed_row(&self) -> ModelResult<SketchAggregate> {
        Ok(SketchAggregate {
            descriptors: prepend_zero_row(&self.descriptors)?,
            weights: match &self.weights {
                Some(w) => Some(prepend_zero_row(w)?),
                None => None,
            },
            anchors: prepend_zero_row(&self.anchors)?,
            stop_bits: prepend_zero_row(&self.stop_bits)?,
            stroke_counts: self.stroke_counts.clone(),
        })
    }

    /// Unit weights in the rational shape, for handing non-rational output
    /// to a consumer that expects a weight tensor.
    pub fn unit_weights(&self, weight_dim: usize) -> ModelResult<Tensor> {
        let (sketches, max_strokes, _) = self
            .descriptors
            .dims3()
            .map_err(|e| ModelError::tensor("aggregate dims", e))?;
        Tensor::ones(
            (sketches, max_strokes, weight_dim),
            self.descriptors.dtype(),
            self.descriptors.device(),
        )
        .map_err(|e| ModelError::tensor("unit weights", e))
    }

    /// Validity mask derived from the stroke counts: `[sketches,
    /// max_strokes, 1]` with 1.0 at real positions.
    pub fn valid_mask(&self) -> ModelResult<Tensor> {
        let (sketches, max_strokes, _) = self
            .descriptors
            .dims3()
            .map_err(|e| ModelError::tensor("aggregate dims", e))?;
        let mut data = Vec::<f32>::with_capacity(sketches * max_strokes);
        for &count in &self.stroke_counts {
            for position in 0..max_strokes {
                data.push(if position < count { 1.0 } else { 0.0 });
            }
        }
        Tensor::from_vec(data, (sketches, max_strokes, 1), self.descriptors.device())
            .map_err(|e| ModelError::tensor("valid mask", e))
    }

    /// The unpadded rows of sketch `index`: descriptors, weights, anchors.
    pub fn sketch(&self, index: usize) -> ModelResult<(Tensor, Option<Tensor>, Tensor)> {
        let count = *self
            .stroke_counts
            .get(index)
            .ok_or_else(|| ModelError::config(format!("sketch index {index} out of batch")))?;
        let take = |t: &Tensor, what: &'static str| -> ModelResult<Tensor> {
            t.get(index)
                .and_then(|row| row.narrow(0, 0, count))
                .map_err(|e| ModelError::tensor(what, e))
        };
        let descriptors = take(&self.descriptors, "sketch descriptors")?;
        let weights = match &self.weights {
            Some(w) => Some(take(w, "sketch weights")?),
            None => None,
        };
        let anchors = take(&self.anchors, "sketch anchors")?;
        Ok((descriptors, weights, anchors))
    }
}

/// Group per-stroke embeddings into batch-aligned per-sketch sequences.
pub fn aggregate_sketches(sketches: &[EmbeddedSketch]) -> ModelResult<SketchAggregate> {
    if sketches.is_empty() {
        return Err(ModelError::config("cannot aggregate an empty batch"));
    }
    let rational = sketches[0].weights.is_some();
    for (i, sketch) in sketches.iter().enumerate() {
        if sketch.weights.is_some() != rational {
            return Err(ModelError::config(format!(
                "sketch {i} weight presence disagrees with the batch"
            )));
        }
    }

    let stroke_counts: Vec<usize> = sketches.iter().map(EmbeddedSketch::stroke_count).collect();
    let max_strokes = *stroke_counts.iter().max().expect("non-empty batch");
    let device = sketches[0].descriptors.device();

    let mut descriptor_rows = Vec::with_capacity(sketches.len());
    let mut weight_rows = Vec::with_capacity(sketches.len());
    let mut anchor_rows = Vec::with_capacity(sketches.len());
    let mut stop_data = Vec::<f32>::with_capacity(sketches.len() * max_strokes);

    for sketch in sketches {
        let count = sketch.stroke_count();
        descriptor_rows.push(pad_rows(&sketch.descriptors, max_strokes)?);
        if let Some(weights) = &sketch.weights {
            weight_rows.push(pad_rows(weights, max_strokes)?);
        }

        let mut anchor_data = Vec::with_capacity(max_strokes * 2);
        for anchor in &sketch.start_anchors {
            anchor_data.extend_from_slice(anchor);
        }
        anchor_data.resize(max_strokes * 2, 0.0);
        anchor_rows.push(
            Tensor::from_vec(anchor_data, (max_strokes, 2), device)
                .map_err(|e| ModelError::tensor("anchor rows", e))?,
        );

        // Stop marks the last real stroke; padding is also 1.
        for position in 0..max_strokes {
            stop_data.push(if position + 1 >= count { 1.0 } else { 0.0 });
        }
    }

    let descriptors = Tensor::stack(&descriptor_rows, 0)
        .map_err(|e| ModelError::tensor("descriptor stack", e))?;
    let weights = if rational {
        Some(Tensor::stack(&weight_rows, 0).map_err(|e| ModelError::tensor("weight stack", e))?)
    } else {
        None
    };
    let anchors =
        Tensor::stack(&anchor_rows, 0).map_err(|e| ModelError::tensor("anchor stack", e))?;
    let stop_bits = Tensor::from_vec(stop_data, (sketches.len(), max_strokes, 1), device)
        .map_err(|e| ModelError::tensor("stop bits", e))?;

    tracing::debug!(
        sketches = stroke_counts.len(),
        max_strokes,
        "aggregated sketch batch"
    );

    Ok(SketchAggregate {
        descriptors,
        weights,
        anchors,
        stop_bits,
        stroke_counts,
    })
}

/// Pad a `[rows, dim]` tensor with zero rows up to `target_rows`.
fn pad_rows(tensor: &Tensor, target_rows: usize) -> ModelResult<Tensor> {
    let (rows, dim) = tensor
        .dims2()
        .map_err(|e| ModelError::tensor("pad rows dims", e))?;
    if rows == target_rows {
        return Ok(tensor.clone());
    }
    let pad = Tensor::zeros((target_rows - rows, dim), tensor.dtype(), tensor.device())
        .map_err(|e| ModelError::tensor("pad rows zeros", e))?;
    Tensor::cat(&[tensor, &pad], 0).map_err(|e| ModelError::tensor("pad rows concat", e))
}

/// Prepend one zero row along dim 1 of a `[batch, rows, dim]` tensor.
fn prepend_zero_row(tensor: &Tensor) -> ModelResult<Tensor> {
    let (batch, _, dim) = tensor
        .dims3()
        .map_err(|e| ModelError::tensor("seed row dims", e))?;
    let seed = Tensor::zeros((batch, 1, dim), tensor.dtype(), tensor.device())
        .map_err(|e| ModelError::tensor("seed row zeros", e))?;
    Tensor::cat(&[&seed, tensor], 1).map_err(|e| ModelError::tensor("seed row concat", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    fn embedded(strokes: usize, rational: bool) -> EmbeddedSketch {
        let descriptors = Tensor::from_vec(
            (0..strokes * 6).map(|v| v as f32).collect::<Vec<f32>>(),
            (strokes, 6),
            &Device::Cpu,
        )
        .unwrap();
        let weights = rational.then(|| {
            Tensor::from_vec(vec![0.5f32; strokes * 2], (strokes, 2), &Device::Cpu).unwrap()
        });
        let start_anchors = (0..strokes).map(|i| [i as f32, -(i as f32)]).collect();
        EmbeddedSketch {
            descriptors,
            weights,
            start_anchors,
        }
    }

    #[test]
    fn test_aggregate_pads_to_batch_max() {
        let agg =
            aggregate_sketches(&[embedded(3, false), embedded(1, false)]).unwrap();
        assert_eq!(agg.descriptors.dims(), &[2, 3, 6]);
        assert_eq!(agg.anchors.dims(), &[2, 3, 2]);
        assert_eq!(agg.stop_bits.dims(), &[2, 3, 1]);
        assert_eq!(agg.stroke_counts, vec![3, 1]);
    }

    #[test]
    fn test_stop_bits_pad_with_ones() {
        let agg =
            aggregate_sketches(&[embedded(3, false), embedded(1, false)]).unwrap();
        let bits = agg.stop_bits.squeeze(2).unwrap().to_vec2::<f32>().unwrap();
        assert_eq!(bits[0], vec![0.0, 0.0, 1.0]);
        // One real stroke: stop fires at 0 and padding stays 1.
        assert_eq!(bits[1], vec![1.0, 1.0, 1.0]);
    }

    #[test]
    fn test_padding_is_zero_for_data_tensors() {
        let agg =
            aggregate_sketches(&[embedded(2, false), embedded(1, false)]).unwrap();
        let rows = agg.descriptors.to_vec3::<f32>().unwrap();
        assert_eq!(rows[1][1], vec![0.0; 6]);
        let anchors = agg.anchors.to_vec3::<f32>().unwrap();
        assert_eq!(anchors[1][1], vec![0.0, 0.0]);
    }

    #[test]
    fn test_seed_row_prepended() {
        let agg = aggregate_sketches(&[embedded(2, true)]).unwrap();
        let seeded = agg.with_seed_row().unwrap();
        assert_eq!(seeded.descriptors.dims(), &[1, 3, 6]);
        let rows = seeded.descriptors.to_vec3::<f32>().unwrap();
        assert_eq!(rows[0][0], vec![0.0; 6]);
        let bits = seeded.stop_bits.to_vec3::<f32>().unwrap();
        assert_eq!(bits[0][0], vec![0.0]);
    }

    #[test]
    fn test_unit_weights_shape() {
        let agg = aggregate_sketches(&[embedded(2, false)]).unwrap();
        let weights = agg.unit_weights(4).unwrap();
        assert_eq!(weights.dims(), &[1, 2, 4]);
        assert_eq!(weights.to_vec3::<f32>().unwrap()[0][0], vec![1.0; 4]);
    }

    #[test]
    fn test_mixed_weight_presence_rejected() {
        assert!(matches!(
            aggregate_sketches(&[embedded(2, true), embedded(2, false)]),
            Err(ModelError::ConfigMismatch { .. })
        ));
    }

    #[test]
    fn test_valid_mask_matches_counts() {
        let agg =
            aggregate_sketches(&[embedded(3, false), embedded(1, false)]).unwrap();
        let mask = agg.valid_mask().unwrap().squeeze(2).unwrap();
        assert_eq!(
            mask.to_vec2::<f32>().unwrap(),
            vec![vec![1.0, 1.0, 1.0], vec![1.0, 0.0, 0.0]]
        );
    }
}
