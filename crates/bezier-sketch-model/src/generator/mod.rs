//! Sketch generator: a recurrent decoder over stroke-descriptor sequences.
//!
//! Capability selection happens once at construction — latent mode, output
//! mode, and weight mode form a closed set of variants that all answer the
//! same `forward` / `generate` contract. There is no per-call boolean
//! fan-out; a capability the model was not built with is a configuration
//! error at call time.

mod heads;
mod sampling;

pub use heads::{kl_divergence, nll, BlockParams};
pub use sampling::{Conditioning, GeneratedSketch, GeneratedStroke, GenerationState, StopMonitor};

use candle_core::Tensor;
use candle_nn::rnn::{lstm, LSTMConfig, LSTMState, LSTM, RNN};
use candle_nn::{linear, Linear, Module, VarBuilder};
use serde::{Deserialize, Serialize};

use crate::aggregator::SketchAggregate;
use crate::context::StatePair;
use crate::error::{ModelError, ModelResult};
use crate::noise::NoiseSource;

use heads::BlockHead;

/// Latent bottleneck between the recurrent state and the output heads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LatentMode {
    Deterministic,
    Variational { latent_dim: usize },
}

/// Shape of the predicted next-stroke distribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputMode {
    Regression,
    Mixture { n_mix: usize },
}

/// Whether the model carries interior rational weights.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WeightMode {
    NonRational,
    Rational { weight_dim: usize },
}

/// Sketch generator configuration, fixed at construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorConfig {
    /// Flattened descriptor size, `degree * 2`.
    pub descriptor_dim: usize,
    pub hidden_size: usize,
    pub num_layers: usize,
    pub latent: LatentMode,
    pub output: OutputMode,
    pub weights: WeightMode,
    /// Stop probability above which generation terminates.
    pub stop_threshold: f32,
    /// Hard cap on autoregressively generated strokes.
    pub max_strokes: usize,
}

impl GeneratorConfig {
    pub fn validate(&self) -> ModelResult<()> {
        if self.descriptor_dim == 0 || self.descriptor_dim % 2 != 0 {
            return Err(ModelError::config(
                "descriptor_dim must be a positive even number (degree * 2)",
            ));
        }
        if self.hidden_size == 0 || self.num_layers == 0 {
            return Err(ModelError::config(
                "generator hidden_size and num_layers must be positive",
            ));
        }
        if self.max_strokes == 0 {
            return Err(ModelError::config("max_strokes must be positive"));
        }
        if let WeightMode::Rational { weight_dim } = self.weights {
            if weight_dim + 1 != self.degree() {
                return Err(ModelError::config(format!(
                    "weight_dim must be degree - 1 ({} for degree {})",
                    self.degree() - 1,
                    self.degree()
                )));
            }
        }
        if let OutputMode::Mixture { n_mix } = self.output {
            if n_mix == 0 {
                return Err(ModelError::config("n_mix must be positive"));
            }
        }
        if let LatentMode::Variational { latent_dim } = self.latent {
            if latent_dim == 0 {
                return Err(ModelError::config("latent_dim must be positive"));
            }
        }
        Ok(())
    }

    /// Curve degree implied by the descriptor size.
    pub fn degree(&self) -> usize {
        self.descriptor_dim / 2
    }

    /// Interior weight count, 0 for non-rational models.
    pub fn weight_dim(&self) -> usize {
        match self.weights {
            WeightMode::NonRational => 0,
            WeightMode::Rational { weight_dim } => weight_dim,
        }
    }

    /// Recurrent input size: descriptor + weights + anchor.
    pub fn input_dim(&self) -> usize {
        self.descriptor_dim + self.weight_dim() + 2
    }

    /// Dimension feeding the output heads.
    fn feature_dim(&self) -> usize {
        match self.latent {
            LatentMode::Deterministic => self.hidden_size,
            LatentMode::Variational { latent_dim } => latent_dim,
        }
    }
}

struct LatentHeads {
    mu: Linear,
    logvar: Linear,
}

/// Teacher-forced prediction output: per-step distribution parameters for
/// the next stroke, plus the stop logits and (variational models) the KL
/// term for the training objective.
pub struct TeacherForcedOutput {
    pub descriptor: BlockParams,
    pub anchor: BlockParams,
    pub weights: Option<BlockParams>,
    /// `[sketches, steps, 1]`
    pub stop_logits: Tensor,
    /// KL divergence against the standard normal prior; variational only.
    pub kl: Option<Tensor>,
    valid_mask: Tensor,
}

impl TeacherForcedOutput {
    /// NLL of the true next descriptors under the predicted distribution.
    pub fn descriptor_nll(&self, targets: &Tensor) -> ModelResult<Tensor> {
        nll(&self.descriptor, targets, &self.valid_mask)
    }

    /// NLL of the true next anchors.
    pub fn anchor_nll(&self, targets: &Tensor) -> ModelResult<Tensor> {
        nll(&self.anchor, targets, &self.valid_mask)
    }

    /// NLL of the true interior weights; rational models only.
    pub fn weight_nll(&self, targets: &Tensor) -> ModelResult<Tensor> {
        let params = self.weights.as_ref().ok_or_else(|| {
            ModelError::config("weight NLL requested from a non-rational generator")
        })?;
        nll(params, targets, &self.valid_mask)
    }
}

/// Recurrent decoder over aggregated stroke sequences.
pub struct SketchGenerator {
    config: GeneratorConfig,
    cells: Vec<LSTM>,
    latent: Option<LatentHeads>,
    descriptor_head: BlockHead,
    anchor_head: BlockHead,
    weight_head: Option<BlockHead>,
    stop_head: Linear,
}

impl SketchGenerator {
    pub fn new(config: GeneratorConfig, vb: VarBuilder) -> ModelResult<Self> {
        config.validate()?;

        let mut cells = Vec::with_capacity(config.num_layers);
        for l in 0..config.num_layers {
            let in_dim = if l == 0 {
                config.input_dim()
            } else {
                config.hidden_size
            };
            cells.push(
                lstm(
                    in_dim,
                    config.hidden_size,
                    LSTMConfig::default(),
                    vb.pp(format!("lstm_{l}")),
                )
                .map_err(|e| ModelError::tensor("generator LSTM init", e))?,
            );
        }

        let latent = match config.latent {
            LatentMode::Deterministic => None,
            LatentMode::Variational { latent_dim } => Some(LatentHeads {
                mu: linear(config.hidden_size, latent_dim, vb.pp("latent_mu"))
                    .map_err(|e| ModelError::tensor("latent mu head init", e))?,
                logvar: linear(config.hidden_size, latent_dim, vb.pp("latent_logvar"))
                    .map_err(|e| ModelError::tensor("latent logvar head init", e))?,
            }),
        };

        let feature_dim = config.feature_dim();
        let descriptor_head = BlockHead::new(
            feature_dim,
            config.descriptor_dim,
            &config.output,
            vb.pp("descriptor_head"),
        )?;
        let anchor_head = BlockHead::new(feature_dim, 2, &config.output, vb.pp("anchor_head"))?;
        let weight_head = match config.weights {
            WeightMode::NonRational => None,
            WeightMode::Rational { weight_dim } => Some(BlockHead::new(
                feature_dim,
                weight_dim,
                &config.output,
                vb.pp("weight_head"),
            )?),
        };
        let stop_head = linear(feature_dim, 1, vb.pp("stop_head"))
            .map_err(|e| ModelError::tensor("stop head init", e))?;

        tracing::info!(
            degree = config.degree(),
            variational = matches!(config.latent, LatentMode::Variational { .. }),
            mixture = matches!(config.output, OutputMode::Mixture { .. }),
            rational = matches!(config.weights, WeightMode::Rational { .. }),
            "sketch generator constructed"
        );

        Ok(Self {
            config,
            cells,
            latent,
            descriptor_head,
            anchor_head,
            weight_head,
            stop_head,
        })
    }

    pub fn config(&self) -> &GeneratorConfig {
        &self.config
    }

    pub fn is_variational(&self) -> bool {
        self.latent.is_some()
    }

    pub fn is_rational(&self) -> bool {
        self.weight_head.is_some()
    }

    /// Check a weights tensor's presence against the construction-time
    /// weight mode.
    fn check_weight_presence(&self, present: bool) -> ModelResult<()> {
        match (self.is_rational(), present) {
            (true, false) => Err(ModelError::config(
                "rational generator requires a weights tensor",
            )),
            (false, true) => Err(ModelError::config(
                "rational weights supplied to a non-rational generator",
            )),
            _ => Ok(()),
        }
    }

    /// Teacher-forced pass: with the aggregate's true history as input
    /// (shifted one step by the zero seed row), predict each next stroke's
    /// distribution parameters.
    pub fn forward(
        &self,
        init: &StatePair,
        aggregate: &SketchAggregate,
        noise: &mut dyn NoiseSource,
    ) -> ModelResult<TeacherForcedOutput> {
        self.check_weight_presence(aggregate.weights.is_some())?;
        let batch = aggregate.batch();
        let steps = aggregate.max_strokes()?;
        let descriptor_dim = aggregate.descriptor_dim()?;
        if descriptor_dim != self.config.descriptor_dim {
            return Err(ModelError::Shape {
                stage: "generator forward descriptors",
                expected: vec![self.config.descriptor_dim],
                actual: vec![descriptor_dim],
            });
        }
        init.check_shape(
            "sketch generator state",
            self.config.num_layers,
            1,
            batch,
            self.config.hidden_size,
        )?;

        // Inputs are the seeded sequence truncated to `steps`, so the
        // prediction at position t targets the true row t.
        let seeded = aggregate.with_seed_row()?;
        let narrow = |t: &Tensor, what: &'static str| -> ModelResult<Tensor> {
            t.narrow(1, 0, steps)
                .map_err(|e| ModelError::tensor(what, e))
        };
        let mut blocks = vec![narrow(&seeded.descriptors, "seeded descriptors")?];
        if let Some(weights) = &seeded.weights {
            blocks.push(narrow(weights, "seeded weights")?);
        }
        blocks.push(narrow(&seeded.anchors, "seeded anchors")?);
        let block_refs: Vec<&Tensor> = blocks.iter().collect();
        let inputs = Tensor::cat(&block_refs, 2)
            .map_err(|e| ModelError::tensor("generator input concat", e))?;

        let hidden_seq = self.run_cells(&inputs, init)?;
        let valid_mask = aggregate.valid_mask()?;

        let (features, kl) = match &self.latent {
            None => (hidden_seq, None),
            Some(latent) => {
                let mu = latent
                    .mu
                    .forward(&hidden_seq)
                    .map_err(|e| ModelError::tensor("latent mu", e))?;
                let logvar = latent
                    .logvar
                    .forward(&hidden_seq)
                    .map_err(|e| ModelError::tensor("latent logvar", e))?;
                let latent_dim = mu
                    .dims3()
                    .map_err(|e| ModelError::tensor("latent dims", e))?
                    .2;
                let eps = Tensor::from_vec(
                    noise.standard_normal(batch * steps * latent_dim),
                    (batch, steps, latent_dim),
                    mu.device(),
                )
                .map_err(|e| ModelError::tensor("latent noise", e))?;
                let std = logvar
                    .affine(0.5, 0.0)
                    .and_then(|t| t.exp())
                    .map_err(|e| ModelError::tensor("latent std", e))?;
                let z = std
                    .mul(&eps)
                    .and_then(|t| t.add(&mu))
                    .map_err(|e| ModelError::tensor("reparameterized latent", e))?;
                let kl = kl_divergence(&mu, &logvar, &valid_mask)?;
                (z, Some(kl))
            }
        };

        let descriptor = self.descriptor_head.params(&features)?;
        let anchor = self.anchor_head.params(&features)?;
        let weights = match &self.weight_head {
            Some(head) => Some(head.params(&features)?),
            None => None,
        };
        let stop_logits = self
            .stop_head
            .forward(&features)
            .map_err(|e| ModelError::tensor("stop logits", e))?;

        Ok(TeacherForcedOutput {
            descriptor,
            anchor,
            weights,
            stop_logits,
            kl,
            valid_mask,
        })
    }

    /// Run the stacked cells over `[batch, steps, input_dim]`, returning the
    /// top layer's hidden sequence `[batch, steps, hidden]`.
    fn run_cells(&self, inputs: &Tensor, init: &StatePair) -> ModelResult<Tensor> {
        let (_, steps, _) = inputs
            .dims3()
            .map_err(|e| ModelError::tensor("generator input dims", e))?;
        let mut states = self.initial_states(init)?;
        let mut top: Vec<Tensor> = Vec::with_capacity(steps);
        for t in 0..steps {
            let mut x = inputs
                .narrow(1, t, 1)
                .and_then(|x| x.squeeze(1))
                .map_err(|e| ModelError::tensor("generator step input", e))?;
            x = self.step_stack(&x, &mut states)?;
            top.push(x);
        }
        Tensor::stack(&top, 1).map_err(|e| ModelError::tensor("hidden sequence stack", e))
    }

    pub(crate) fn initial_states(&self, init: &StatePair) -> ModelResult<Vec<LSTMState>> {
        (0..self.config.num_layers)
            .map(|l| {
                let (h, c) = init.slice(l, 1, 0)?;
                Ok(LSTMState { h, c })
            })
            .collect()
    }

    /// One step through every layer; returns the top hidden state.
    pub(crate) fn step_stack(
        &self,
        input: &Tensor,
        states: &mut [LSTMState],
    ) -> ModelResult<Tensor> {
        let mut x = input.clone();
        for (cell, state) in self.cells.iter().zip(states.iter_mut()) {
            *state = cell
                .step(&x, state)
                .map_err(|e| ModelError::tensor("generator LSTM step", e))?;
            x = state.h().clone();
        }
        Ok(x)
    }

    /// Project a single step's hidden state `[1, hidden]` into features
    /// `[1, 1, feature_dim]`, sampling the latent for variational models.
    pub(crate) fn step_features(
        &self,
        hidden: &Tensor,
        noise: &mut dyn NoiseSource,
    ) -> ModelResult<Tensor> {
        let features = match &self.latent {
            None => hidden.clone(),
            Some(latent) => {
                let mu = latent
                    .mu
                    .forward(hidden)
                    .map_err(|e| ModelError::tensor("latent mu", e))?;
                let logvar = latent
                    .logvar
                    .forward(hidden)
                    .map_err(|e| ModelError::tensor("latent logvar", e))?;
                let latent_dim = mu
                    .dims2()
                    .map_err(|e| ModelError::tensor("latent dims", e))?
                    .1;
                let eps = Tensor::from_vec(
                    noise.standard_normal(latent_dim),
                    (1, latent_dim),
                    mu.device(),
                )
                .map_err(|e| ModelError::tensor("latent noise", e))?;
                logvar
                    .affine(0.5, 0.0)
                    .and_then(|t| t.exp())
                    .and_then(|t| t.mul(&eps))
                    .and_then(|t| t.add(&mu))
                    .map_err(|e| ModelError::tensor("reparameterized latent", e))?
            }
        };
        features
            .unsqueeze(1)
            .map_err(|e| ModelError::tensor("feature unsqueeze", e))
    }

    pub(crate) fn descriptor_head(&self) -> &BlockHead {
        &self.descriptor_head
    }

    pub(crate) fn anchor_head(&self) -> &BlockHead {
        &self.anchor_head
    }

    pub(crate) fn weight_head(&self) -> Option<&BlockHead> {
        self.weight_head.as_ref()
    }

    pub(crate) fn stop_probability(&self, features: &Tensor) -> ModelResult<f32> {
        let logit = self
            .stop_head
            .forward(features)
            .and_then(|t| t.flatten_all())
            .and_then(|t| t.to_vec1::<f32>())
            .map_err(|e| ModelError::tensor("stop logit", e))?[0];
        Ok(1.0 / (1.0 + (-logit).exp()))
    }
}
