//! Compute context: device placement and recurrent-state factories.
//!
//! Every call that needs device placement or a zero-initialized state pair
//! gets it from an explicit `ComputeContext` instead of re-deriving global
//! accelerator availability at each call site.

use candle_core::{DType, Device, Tensor};

use crate::error::{ModelError, ModelResult};

/// A hidden/cell state pair for one recurrent level.
///
/// Both tensors are shaped `(num_layers * directions, batch, hidden)`,
/// matching the per-layer, per-direction slicing the recurrent stacks
/// perform.
#[derive(Debug, Clone)]
pub struct StatePair {
    pub hidden: Tensor,
    pub cell: Tensor,
}

impl StatePair {
    /// Slice out the `(batch, hidden)` hidden/cell states for one layer and
    /// direction. Direction 0 is forward, 1 is backward.
    pub fn slice(&self, layer: usize, directions: usize, direction: usize) -> ModelResult<(Tensor, Tensor)> {
        let index = layer * directions + direction;
        let h = self
            .hidden
            .get(index)
            .map_err(|e| ModelError::tensor("state hidden slice", e))?;
        let c = self
            .cell
            .get(index)
            .map_err(|e| ModelError::tensor("state cell slice", e))?;
        Ok((h, c))
    }

    /// Validate the leading dimensions against a model's expectations.
    pub fn check_shape(
        &self,
        stage: &'static str,
        num_layers: usize,
        directions: usize,
        batch: usize,
        hidden: usize,
    ) -> ModelResult<()> {
        let expected = vec![num_layers * directions, batch, hidden];
        let actual = self
            .hidden
            .dims()
            .to_vec();
        if actual != expected {
            return Err(ModelError::Shape {
                stage,
                expected,
                actual,
            });
        }
        Ok(())
    }
}

/// Owns device placement for a pipeline run.
#[derive(Debug, Clone)]
pub struct ComputeContext {
    device: Device,
    dtype: DType,
}

impl ComputeContext {
    /// Pick an accelerator if one is available, otherwise the CPU. The
    /// decision is made once; callers thread the context through.
    pub fn new() -> ModelResult<Self> {
        let device = Device::cuda_if_available(0)
            .map_err(|e| ModelError::tensor("device selection", e))?;
        tracing::info!(gpu = device.is_cuda(), "compute context initialized");
        Ok(Self {
            device,
            dtype: DType::F32,
        })
    }

    /// CPU-only context, used by tests and small inference runs.
    pub fn cpu() -> Self {
        Self {
            device: Device::Cpu,
            dtype: DType::F32,
        }
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    /// Zero-initialized state pair shaped
    /// `(num_layers * directions, batch, hidden)`.
    pub fn zero_state(
        &self,
        num_layers: usize,
        directions: usize,
        batch: usize,
        hidden: usize,
    ) -> ModelResult<StatePair> {
        let shape = (num_layers * directions, batch, hidden);
        let hidden_t = Tensor::zeros(shape, self.dtype, &self.device)
            .map_err(|e| ModelError::tensor("zero hidden state", e))?;
        let cell_t = Tensor::zeros(shape, self.dtype, &self.device)
            .map_err(|e| ModelError::tensor("zero cell state", e))?;
        Ok(StatePair {
            hidden: hidden_t,
            cell: cell_t,
        })
    }

    /// Materialize host data as a tensor on this context's device.
    pub fn tensor_from_vec<S: Into<candle_core::Shape>>(
        &self,
        data: Vec<f32>,
        shape: S,
    ) -> ModelResult<Tensor> {
        Tensor::from_vec(data, shape, &self.device)
            .map_err(|e| ModelError::tensor("tensor from host data", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_state_shape() {
        let ctx = ComputeContext::cpu();
        let state = ctx.zero_state(2, 2, 3, 16).unwrap();
        assert_eq!(state.hidden.dims(), &[4, 3, 16]);
        assert_eq!(state.cell.dims(), &[4, 3, 16]);
    }

    #[test]
    fn test_slice_per_layer_and_direction() {
        let ctx = ComputeContext::cpu();
        let state = ctx.zero_state(2, 2, 3, 16).unwrap();
        let (h, c) = state.slice(1, 2, 1).unwrap();
        assert_eq!(h.dims(), &[3, 16]);
        assert_eq!(c.dims(), &[3, 16]);
    }

    #[test]
    fn test_check_shape_mismatch() {
        let ctx = ComputeContext::cpu();
        let state = ctx.zero_state(1, 2, 3, 16).unwrap();
        assert!(state.check_shape("embedder", 1, 2, 3, 16).is_ok());
        assert!(matches!(
            state.check_shape("embedder", 2, 2, 3, 16),
            Err(ModelError::Shape { stage: "embedder", .. })
        ));
    }
}
