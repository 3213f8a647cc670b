//! Autoregressive sketch sampling.

use candle_core::Tensor;

use bezier_sketch_core::render::RenderableCurve;
use bezier_sketch_core::types::{CurveDescriptor, Point};

use crate::aggregator::SketchAggregate;
use crate::context::StatePair;
use crate::error::{ModelError, ModelResult};
use crate::noise::NoiseSource;

use super::heads::sample_block;
use super::SketchGenerator;

/// Per-sketch generation state. The transition `Generating -> Stopped`
/// happens the first step the stop signal fires and is never reversed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationState {
    Generating,
    Stopped,
}

/// Tracks the stop signal across generation steps.
#[derive(Debug, Clone)]
pub struct StopMonitor {
    threshold: f32,
    state: GenerationState,
}

impl StopMonitor {
    pub fn new(threshold: f32) -> Self {
        Self {
            threshold,
            state: GenerationState::Generating,
        }
    }

    pub fn state(&self) -> GenerationState {
        self.state
    }

    /// Feed one step's stop probability; returns true once stopped.
    /// Strokes observed after the transition are discarded by the caller.
    pub fn observe(&mut self, stop_probability: f32) -> bool {
        if self.state == GenerationState::Stopped {
            return true;
        }
        if stop_probability > self.threshold {
            self.state = GenerationState::Stopped;
            return true;
        }
        false
    }
}

/// One sampled stroke: its curve descriptor and placement anchor.
#[derive(Debug, Clone)]
pub struct GeneratedStroke {
    pub descriptor: CurveDescriptor,
    pub anchor: Point,
}

/// A fully sampled sketch.
#[derive(Debug, Clone)]
pub struct GeneratedSketch {
    pub strokes: Vec<GeneratedStroke>,
    /// True when the stop signal fired before `max_strokes`.
    pub stopped_early: bool,
}

impl GeneratedSketch {
    pub fn stroke_count(&self) -> usize {
        self.strokes.len()
    }

    /// Decode every stroke for the curve codec.
    pub fn renderables(&self) -> Vec<RenderableCurve> {
        self.strokes
            .iter()
            .map(|s| RenderableCurve::from_descriptor(&s.descriptor, s.anchor))
            .collect()
    }
}

/// One sketch's true descriptor sequence, used to condition generation.
#[derive(Debug, Clone)]
pub struct Conditioning {
    /// `[strokes, descriptor_dim]`
    pub descriptors: Tensor,
    /// `[strokes, weight_dim]`, rational models only.
    pub weights: Option<Tensor>,
    /// `[strokes, 2]`
    pub anchors: Tensor,
}

impl Conditioning {
    /// Pull one sketch's unpadded rows out of an aggregate.
    pub fn from_aggregate(aggregate: &SketchAggregate, index: usize) -> ModelResult<Self> {
        let (descriptors, weights, anchors) = aggregate.sketch(index)?;
        Ok(Self {
            descriptors,
            weights,
            anchors,
        })
    }

    fn stroke_count(&self) -> ModelResult<usize> {
        Ok(self
            .descriptors
            .dims2()
            .map_err(|e| ModelError::tensor("conditioning dims", e))?
            .0)
    }

    /// Input row `t`: descriptor, weights (if present), anchor concatenated
    /// to `[1, input_dim]`.
    fn input_row(&self, t: usize) -> ModelResult<Tensor> {
        let row = |tensor: &Tensor, what: &'static str| -> ModelResult<Tensor> {
            tensor
                .narrow(0, t, 1)
                .map_err(|e| ModelError::tensor(what, e))
        };
        let mut blocks = vec![row(&self.descriptors, "conditioning descriptor row")?];
        if let Some(weights) = &self.weights {
            blocks.push(row(weights, "conditioning weight row")?);
        }
        blocks.push(row(&self.anchors, "conditioning anchor row")?);
        let refs: Vec<&Tensor> = blocks.iter().collect();
        Tensor::cat(&refs, 1).map_err(|e| ModelError::tensor("conditioning row concat", e))
    }
}

impl SketchGenerator {
    /// Autoregressively sample one sketch.
    ///
    /// When `conditioning` is given, the true sequence is consumed first to
    /// warm the recurrent state (the conditional-generation path); sampling
    /// then starts from the zero seed descriptor. Each step samples the
    /// next descriptor, interior weights (rational models), and anchor,
    /// feeds them back as the next input, and consults the stop signal;
    /// generation halts at the first firing or at `max_strokes`, whichever
    /// comes first.
    pub fn generate(
        &self,
        init: &StatePair,
        conditioning: Option<&Conditioning>,
        noise: &mut dyn NoiseSource,
    ) -> ModelResult<GeneratedSketch> {
        let config = self.config();
        init.check_shape(
            "sketch generator state",
            config.num_layers,
            1,
            1,
            config.hidden_size,
        )?;
        if let Some(conditioning) = conditioning {
            self.check_weight_presence(conditioning.weights.is_some())?;
        }

        let device = init.hidden.device().clone();
        let mut states = self.initial_states(init)?;

        if let Some(conditioning) = conditioning {
            for t in 0..conditioning.stroke_count()? {
                let x = conditioning.input_row(t)?;
                self.step_stack(&x, &mut states)?;
            }
        }

        let degree = config.degree();
        let input_dim = config.input_dim();
        let mut x = Tensor::zeros((1, input_dim), init.hidden.dtype(), &device)
            .map_err(|e| ModelError::tensor("seed input", e))?;

        let mut monitor = StopMonitor::new(config.stop_threshold);
        let mut strokes = Vec::new();
        for step in 0..config.max_strokes {
            let hidden = self.step_stack(&x, &mut states)?;
            let features = self.step_features(&hidden, noise)?;

            let descriptor_flat =
                sample_block(&self.descriptor_head().params(&features)?, noise)?;
            let anchor = sample_block(&self.anchor_head().params(&features)?, noise)?;
            let weights = match self.weight_head() {
                Some(head) => Some(sample_block(&head.params(&features)?, noise)?),
                None => None,
            };
            let stop_probability = self.stop_probability(&features)?;

            let mut descriptor = CurveDescriptor::from_flat(&descriptor_flat, degree)?;
            if let Some(weights) = &weights {
                descriptor = descriptor.with_weights(weights.clone())?;
            }
            strokes.push(GeneratedStroke {
                descriptor,
                anchor: [anchor[0], anchor[1]],
            });

            if monitor.observe(stop_probability) {
                tracing::debug!(step, stop_probability, "generation stopped");
                break;
            }

            let mut feedback = descriptor_flat;
            if let Some(weights) = weights {
                feedback.extend(weights);
            }
            feedback.extend(anchor);
            x = Tensor::from_vec(feedback, (1, input_dim), &device)
                .map_err(|e| ModelError::tensor("feedback input", e))?;
        }

        Ok(GeneratedSketch {
            strokes,
            stopped_early: monitor.state() == GenerationState::Stopped,
        })
    }
}
