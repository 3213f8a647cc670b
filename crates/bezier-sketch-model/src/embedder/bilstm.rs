//! Masked bidirectional LSTM stack over padded sequences.
//!
//! Candle has no packed-sequence recurrence, so validity is enforced with
//! per-timestep masks: a padded step carries the previous state through
//! unchanged, which keeps pad positions out of every row's final state.

use candle_core::Tensor;
use candle_nn::rnn::{lstm, LSTMConfig, LSTMState, LSTM, RNN};
use candle_nn::VarBuilder;

use crate::error::{ModelError, ModelResult};

/// One bidirectional layer: a forward and a backward cell over the same
/// input sequence.
pub(crate) struct BiLstmLayer {
    fwd: LSTM,
    bwd: LSTM,
}

/// Per-layer output: the full hidden sequence plus the masked final states
/// of both directions.
pub(crate) struct BiLstmOutput {
    /// `[batch, steps, 2 * hidden]` — forward and backward hidden states
    /// concatenated per timestep.
    pub seq: Tensor,
    /// Forward state after each row's last valid step, `[batch, hidden]`.
    pub final_fwd: Tensor,
    /// Backward state after timestep 0, `[batch, hidden]`.
    pub final_bwd: Tensor,
}

impl BiLstmLayer {
    pub fn new(in_dim: usize, hidden: usize, vb: VarBuilder) -> ModelResult<Self> {
        let fwd = lstm(in_dim, hidden, LSTMConfig::default(), vb.pp("fwd"))
            .map_err(|e| ModelError::tensor("forward LSTM init", e))?;
        let bwd = lstm(in_dim, hidden, LSTMConfig::default(), vb.pp("bwd"))
            .map_err(|e| ModelError::tensor("backward LSTM init", e))?;
        Ok(Self { fwd, bwd })
    }

    /// Run both directions over `xs` (`[batch, steps, in_dim]`).
    ///
    /// `masks[t]` is `[batch, 1]` with 1.0 where timestep `t` is valid;
    /// `keeps[t]` is its complement. Initial states come from the caller's
    /// state pair, sliced per direction.
    pub fn forward(
        &self,
        xs: &Tensor,
        masks: &[Tensor],
        keeps: &[Tensor],
        init_fwd: LSTMState,
        init_bwd: LSTMState,
    ) -> ModelResult<BiLstmOutput> {
        let (_, steps, _) = xs
            .dims3()
            .map_err(|e| ModelError::tensor("bilstm input dims", e))?;

        let mut fwd_outs: Vec<Tensor> = Vec::with_capacity(steps);
        let mut state = init_fwd;
        for t in 0..steps {
            let x_t = step_input(xs, t)?;
            state = masked_step(&self.fwd, &x_t, &masks[t], &keeps[t], &state)?;
            fwd_outs.push(state.h().clone());
        }
        let final_fwd = state.h().clone();

        let mut bwd_outs: Vec<Option<Tensor>> = vec![None; steps];
        let mut state = init_bwd;
        for t in (0..steps).rev() {
            let x_t = step_input(xs, t)?;
            state = masked_step(&self.bwd, &x_t, &masks[t], &keeps[t], &state)?;
            bwd_outs[t] = Some(state.h().clone());
        }
        let final_bwd = state.h().clone();

        let mut per_step: Vec<Tensor> = Vec::with_capacity(steps);
        for (fwd_h, bwd_h) in fwd_outs.iter().zip(bwd_outs.iter()) {
            let bwd_h = bwd_h.as_ref().expect("all timesteps visited");
            let joined = Tensor::cat(&[fwd_h, bwd_h], 1)
                .map_err(|e| ModelError::tensor("bilstm direction concat", e))?;
            per_step.push(joined);
        }
        let seq = Tensor::stack(&per_step, 1)
            .map_err(|e| ModelError::tensor("bilstm sequence stack", e))?;

        Ok(BiLstmOutput {
            seq,
            final_fwd,
            final_bwd,
        })
    }
}

fn step_input(xs: &Tensor, t: usize) -> ModelResult<Tensor> {
    xs.narrow(1, t, 1)
        .and_then(|x| x.squeeze(1))
        .map_err(|e| ModelError::tensor("bilstm step input", e))
}

/// One recurrent step that freezes rows whose sequence already ended.
fn masked_step(
    cell: &LSTM,
    x_t: &Tensor,
    mask: &Tensor,
    keep: &Tensor,
    state: &LSTMState,
) -> ModelResult<LSTMState> {
    let next = cell
        .step(x_t, state)
        .map_err(|e| ModelError::tensor("LSTM step", e))?;
    let h = blend(mask, next.h(), keep, state.h())?;
    let c = blend(mask, next.c(), keep, state.c())?;
    Ok(LSTMState { h, c })
}

fn blend(mask: &Tensor, next: &Tensor, keep: &Tensor, prev: &Tensor) -> ModelResult<Tensor> {
    let taken = mask
        .broadcast_mul(next)
        .map_err(|e| ModelError::tensor("mask apply", e))?;
    let kept = keep
        .broadcast_mul(prev)
        .map_err(|e| ModelError::tensor("mask keep", e))?;
    taken
        .add(&kept)
        .map_err(|e| ModelError::tensor("mask blend", e))
}
