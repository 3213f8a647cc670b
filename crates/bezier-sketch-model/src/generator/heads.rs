//! Output heads for the sketch generator: direct regression or mixture
//! density, with the negative log-likelihood and sampling routines both
//! modes share.

use candle_core::{Tensor, D};
use candle_nn::{linear, Linear, Module, VarBuilder};

use crate::error::{ModelError, ModelResult};
use crate::generator::OutputMode;
use crate::noise::NoiseSource;

const LN_2PI: f64 = 1.837_877_066_409_345;

/// One output block (descriptor, anchor, or interior weights).
pub(crate) enum BlockHead {
    Regression {
        mean: Linear,
    },
    Mixture {
        means: Linear,
        log_stds: Linear,
        logits: Linear,
        n_mix: usize,
        dim: usize,
    },
}

impl BlockHead {
    pub fn new(
        feature_dim: usize,
        dim: usize,
        output: &OutputMode,
        vb: VarBuilder,
    ) -> ModelResult<Self> {
        match *output {
            OutputMode::Regression => Ok(BlockHead::Regression {
                mean: linear(feature_dim, dim, vb.pp("mean"))
                    .map_err(|e| ModelError::tensor("regression head init", e))?,
            }),
            OutputMode::Mixture { n_mix } => Ok(BlockHead::Mixture {
                means: linear(feature_dim, n_mix * dim, vb.pp("means"))
                    .map_err(|e| ModelError::tensor("mixture mean head init", e))?,
                log_stds: linear(feature_dim, n_mix * dim, vb.pp("log_stds"))
                    .map_err(|e| ModelError::tensor("mixture scale head init", e))?,
                logits: linear(feature_dim, n_mix, vb.pp("logits"))
                    .map_err(|e| ModelError::tensor("mixture logit head init", e))?,
                n_mix,
                dim,
            }),
        }
    }

    /// Distribution parameters over a feature sequence `[batch, steps,
    /// feature_dim]`.
    pub fn params(&self, features: &Tensor) -> ModelResult<BlockParams> {
        match self {
            BlockHead::Regression { mean } => Ok(BlockParams::Regression {
                mean: mean
                    .forward(features)
                    .map_err(|e| ModelError::tensor("regression mean", e))?,
            }),
            BlockHead::Mixture {
                means,
                log_stds,
                logits,
                n_mix,
                dim,
            } => {
                let (batch, steps, _) = features
                    .dims3()
                    .map_err(|e| ModelError::tensor("head feature dims", e))?;
                let reshape = |t: Tensor, what: &'static str| -> ModelResult<Tensor> {
                    t.reshape((batch, steps, *n_mix, *dim))
                        .map_err(|e| ModelError::tensor(what, e))
                };
                Ok(BlockParams::Mixture {
                    means: reshape(
                        means
                            .forward(features)
                            .map_err(|e| ModelError::tensor("mixture means", e))?,
                        "mixture means reshape",
                    )?,
                    log_stds: reshape(
                        log_stds
                            .forward(features)
                            .map_err(|e| ModelError::tensor("mixture scales", e))?,
                        "mixture scales reshape",
                    )?,
                    logits: logits
                        .forward(features)
                        .map_err(|e| ModelError::tensor("mixture logits", e))?,
                    n_mix: *n_mix,
                    dim: *dim,
                })
            }
        }
    }
}

/// Predicted distribution parameters for one output block.
#[derive(Debug, Clone)]
pub enum BlockParams {
    /// `mean`: `[batch, steps, dim]`
    Regression { mean: Tensor },
    /// `means`/`log_stds`: `[batch, steps, n_mix, dim]`,
    /// `logits`: `[batch, steps, n_mix]`
    Mixture {
        means: Tensor,
        log_stds: Tensor,
        logits: Tensor,
        n_mix: usize,
        dim: usize,
    },
}

/// Negative log-likelihood of `target` under the predicted distribution,
/// averaged over positions where `valid_mask` is 1.
///
/// For regression output this degrades to the masked mean squared error.
pub fn nll(params: &BlockParams, target: &Tensor, valid_mask: &Tensor) -> ModelResult<Tensor> {
    match params {
        BlockParams::Regression { mean } => {
            let sq = target
                .sub(mean)
                .and_then(|d| d.sqr())
                .map_err(|e| ModelError::tensor("regression residual", e))?;
            let per_step = sq
                .sum(D::Minus1)
                .map_err(|e| ModelError::tensor("regression residual sum", e))?;
            masked_mean(&per_step, valid_mask)
        }
        BlockParams::Mixture {
            means,
            log_stds,
            logits,
            ..
        } => {
            let target = target
                .unsqueeze(2)
                .map_err(|e| ModelError::tensor("target expand", e))?;
            let diff = target
                .broadcast_sub(means)
                .map_err(|e| ModelError::tensor("mixture residual", e))?;
            let z = diff
                .mul(
                    &log_stds
                        .neg()
                        .and_then(|t| t.exp())
                        .map_err(|e| ModelError::tensor("inverse scale", e))?,
                )
                .map_err(|e| ModelError::tensor("standardized residual", e))?;
            // log N(x | mu, sigma) summed over the block dimensions.
            let component_log_prob = z
                .sqr()
                .and_then(|t| t.affine(-0.5, -0.5 * LN_2PI))
                .and_then(|t| t.sub(log_stds))
                .and_then(|t| t.sum(D::Minus1))
                .map_err(|e| ModelError::tensor("component log prob", e))?;
            let log_mix = candle_nn::ops::log_softmax(logits, D::Minus1)
                .map_err(|e| ModelError::tensor("mixture log weights", e))?;
            let joint = component_log_prob
                .add(&log_mix)
                .map_err(|e| ModelError::tensor("joint log prob", e))?;
            let log_likelihood = log_sum_exp(&joint)?;
            let mean = masked_mean(&log_likelihood, valid_mask)?;
            mean.neg()
                .map_err(|e| ModelError::tensor("nll negate", e))
        }
    }
}

/// Analytic KL divergence of `N(mu, exp(logvar))` against a standard
/// normal, averaged over valid positions.
pub fn kl_divergence(mu: &Tensor, logvar: &Tensor, valid_mask: &Tensor) -> ModelResult<Tensor> {
    // -0.5 * (1 + logvar - mu^2 - exp(logvar)), summed over the latent dim.
    let per_dim = logvar
        .affine(1.0, 1.0)
        .and_then(|t| t.sub(&mu.sqr()?))
        .and_then(|t| t.sub(&logvar.exp()?))
        .and_then(|t| t.affine(-0.5, 0.0))
        .map_err(|e| ModelError::tensor("kl per-dim", e))?;
    let per_step = per_dim
        .sum(D::Minus1)
        .map_err(|e| ModelError::tensor("kl sum", e))?;
    masked_mean(&per_step, valid_mask)
}

/// Draw one value from the params at a single step (`batch == 1`,
/// `steps == 1`), host-side.
///
/// Mixture output picks a component by its softmax weight with one uniform
/// draw, then samples the component's diagonal Gaussian; regression output
/// returns the mean.
pub(crate) fn sample_block(
    params: &BlockParams,
    noise: &mut dyn NoiseSource,
) -> ModelResult<Vec<f32>> {
    match params {
        BlockParams::Regression { mean } => mean
            .flatten_all()
            .and_then(|t| t.to_vec1::<f32>())
            .map_err(|e| ModelError::tensor("regression sample to host", e)),
        BlockParams::Mixture {
            means,
            log_stds,
            logits,
            n_mix,
            dim,
        } => {
            let logits: Vec<f32> = logits
                .flatten_all()
                .and_then(|t| t.to_vec1::<f32>())
                .map_err(|e| ModelError::tensor("mixture logits to host", e))?;
            let weights = softmax_host(&logits);
            let component = pick_component(&weights, noise.uniform());

            let means: Vec<f32> = means
                .flatten_all()
                .and_then(|t| t.to_vec1::<f32>())
                .map_err(|e| ModelError::tensor("mixture means to host", e))?;
            let log_stds: Vec<f32> = log_stds
                .flatten_all()
                .and_then(|t| t.to_vec1::<f32>())
                .map_err(|e| ModelError::tensor("mixture scales to host", e))?;
            debug_assert_eq!(means.len(), n_mix * dim);

            let eps = noise.standard_normal(*dim);
            let base = component * dim;
            Ok((0..*dim)
                .map(|i| means[base + i] + log_stds[base + i].exp() * eps[i])
                .collect())
        }
    }
}

fn softmax_host(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|&l| (l - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

fn pick_component(weights: &[f32], draw: f32) -> usize {
    let mut cumulative = 0.0;
    for (i, &w) in weights.iter().enumerate() {
        cumulative += w;
        if draw < cumulative {
            return i;
        }
    }
    weights.len() - 1
}

/// Log-sum-exp over the last dimension of a `[batch, steps, n]` tensor.
fn log_sum_exp(x: &Tensor) -> ModelResult<Tensor> {
    let max = x
        .max_keepdim(D::Minus1)
        .map_err(|e| ModelError::tensor("lse max", e))?;
    x.broadcast_sub(&max)
        .and_then(|t| t.exp())
        .and_then(|t| t.sum_keepdim(D::Minus1))
        .and_then(|t| t.log())
        .and_then(|t| t.add(&max))
        .and_then(|t| t.squeeze(2))
        .map_err(|e| ModelError::tensor("lse", e))
}

/// Mean of `x` (`[batch, steps]`) over positions where `valid_mask`
/// (`[batch, steps, 1]`) is 1.
fn masked_mean(x: &Tensor, valid_mask: &Tensor) -> ModelResult<Tensor> {
    let mask = valid_mask
        .squeeze(2)
        .map_err(|e| ModelError::tensor("mask squeeze", e))?;
    let masked_sum = x
        .mul(&mask)
        .and_then(|t| t.sum_all())
        .map_err(|e| ModelError::tensor("masked sum", e))?;
    let count = mask
        .sum_all()
        .map_err(|e| ModelError::tensor("mask count", e))?;
    masked_sum
        .div(&count)
        .map_err(|e| ModelError::tensor("masked mean", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::noise::ZeroNoise;
    use candle_core::Device;

    #[test]
    fn test_pick_component_cumulative() {
        let weights = [0.2, 0.5, 0.3];
        assert_eq!(pick_component(&weights, 0.0), 0);
        assert_eq!(pick_component(&weights, 0.25), 1);
        assert_eq!(pick_component(&weights, 0.95), 2);
        assert_eq!(pick_component(&weights, 1.0), 2);
    }

    #[test]
    fn test_softmax_host_normalizes() {
        let weights = softmax_host(&[1.0, 2.0, 3.0]);
        let sum: f32 = weights.iter().sum();
        assert!((sum - 1.0).abs() < 1e-6);
        assert!(weights[2] > weights[1] && weights[1] > weights[0]);
    }

    #[test]
    fn test_mixture_nll_matches_single_gaussian() {
        // One component, mean 0, log_std 0: nll of x = 0 over 2 dims is
        // 0.5 * ln(2*pi) per dim.
        let device = Device::Cpu;
        let params = BlockParams::Mixture {
            means: Tensor::zeros((1, 1, 1, 2), candle_core::DType::F32, &device).unwrap(),
            log_stds: Tensor::zeros((1, 1, 1, 2), candle_core::DType::F32, &device).unwrap(),
            logits: Tensor::zeros((1, 1, 1), candle_core::DType::F32, &device).unwrap(),
            n_mix: 1,
            dim: 2,
        };
        let target = Tensor::zeros((1, 1, 2), candle_core::DType::F32, &device).unwrap();
        let mask = Tensor::ones((1, 1, 1), candle_core::DType::F32, &device).unwrap();
        let loss = nll(&params, &target, &mask).unwrap().to_scalar::<f32>().unwrap();
        let expected = LN_2PI as f32; // 2 dims * 0.5 * ln(2 pi)
        assert!((loss - expected).abs() < 1e-4, "loss {loss} vs {expected}");
    }

    #[test]
    fn test_nll_is_finite_and_masks_padding() {
        let device = Device::Cpu;
        let params = BlockParams::Mixture {
            means: Tensor::zeros((1, 2, 3, 2), candle_core::DType::F32, &device).unwrap(),
            log_stds: Tensor::zeros((1, 2, 3, 2), candle_core::DType::F32, &device).unwrap(),
            logits: Tensor::zeros((1, 2, 3), candle_core::DType::F32, &device).unwrap(),
            n_mix: 3,
            dim: 2,
        };
        // Step 1 target is garbage but masked out.
        let target =
            Tensor::from_vec(vec![0.0f32, 0.0, 1e6, 1e6], (1, 2, 2), &device).unwrap();
        let mask = Tensor::from_vec(vec![1.0f32, 0.0], (1, 2, 1), &device).unwrap();
        let loss = nll(&params, &target, &mask).unwrap().to_scalar::<f32>().unwrap();
        assert!(loss.is_finite());
        assert!((loss - LN_2PI as f32).abs() < 1e-4);
    }

    #[test]
    fn test_kl_zero_at_standard_normal() {
        let device = Device::Cpu;
        let mu = Tensor::zeros((1, 2, 4), candle_core::DType::F32, &device).unwrap();
        let logvar = Tensor::zeros((1, 2, 4), candle_core::DType::F32, &device).unwrap();
        let mask = Tensor::ones((1, 2, 1), candle_core::DType::F32, &device).unwrap();
        let kl = kl_divergence(&mu, &logvar, &mask).unwrap().to_scalar::<f32>().unwrap();
        assert!(kl.abs() < 1e-6);
    }

    #[test]
    fn test_kl_positive_off_prior() {
        let device = Device::Cpu;
        let mu = Tensor::from_vec(vec![2.0f32; 4], (1, 1, 4), &device).unwrap();
        let logvar = Tensor::zeros((1, 1, 4), candle_core::DType::F32, &device).unwrap();
        let mask = Tensor::ones((1, 1, 1), candle_core::DType::F32, &device).unwrap();
        let kl = kl_divergence(&mu, &logvar, &mask).unwrap().to_scalar::<f32>().unwrap();
        assert!((kl - 8.0).abs() < 1e-4); // 0.5 * mu^2 per dim = 2, times 4
    }

    #[test]
    fn test_zero_noise_sample_takes_first_component_mean() {
        let device = Device::Cpu;
        let params = BlockParams::Mixture {
            means: Tensor::from_vec(vec![1.0f32, 2.0, 10.0, 20.0], (1, 1, 2, 2), &device)
                .unwrap(),
            log_stds: Tensor::zeros((1, 1, 2, 2), candle_core::DType::F32, &device).unwrap(),
            logits: Tensor::zeros((1, 1, 2), candle_core::DType::F32, &device).unwrap(),
            n_mix: 2,
            dim: 2,
        };
        let mut noise = ZeroNoise;
        let value = sample_block(&params, &mut noise).unwrap();
        assert_eq!(value, vec![1.0, 2.0]);
    }
}
