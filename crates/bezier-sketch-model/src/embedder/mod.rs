//! Stroke embedder: variable-length offset sequences to fixed-size curve
//! descriptors.
//!
//! A bidirectional LSTM consumes one sketch's packed offset sequences (the
//! strokes form the batch dimension); the concatenated final forward and
//! backward hidden states are projected through per-degree linear heads
//! into control-point deltas and, for rational models, interior weight
//! logits.

mod bilstm;

use candle_core::Tensor;
use candle_nn::rnn::LSTMState;
use candle_nn::{linear, Linear, Module, VarBuilder};

use bezier_sketch_core::{DegreeRange, PackedSequence};

use crate::context::StatePair;
use crate::error::{ModelError, ModelResult};

use bilstm::BiLstmLayer;

/// Stroke embedder configuration, fixed at construction.
#[derive(Debug, Clone)]
pub struct EmbedderConfig {
    /// Hidden size per direction.
    pub hidden_size: usize,
    /// Stacked bidirectional layers.
    pub num_layers: usize,
    /// Supported curve degree range; one projection head per degree.
    pub degrees: DegreeRange,
    /// Emit interior rational-weight logits alongside control points.
    pub rational: bool,
}

impl EmbedderConfig {
    pub fn validate(&self) -> ModelResult<()> {
        if self.hidden_size == 0 || self.num_layers == 0 {
            return Err(ModelError::config(
                "embedder hidden_size and num_layers must be positive",
            ));
        }
        if self.rational && self.degrees.low < 2 {
            return Err(ModelError::config(
                "rational embedders need degree >= 2 (a degree-1 curve has no interior control points)",
            ));
        }
        Ok(())
    }
}

/// Embedder output for one degree: per-stroke descriptors in original
/// stroke order.
#[derive(Debug, Clone)]
pub struct DegreeOutput {
    pub degree: usize,
    /// `[strokes, degree * 2]`, reshapeable to `(degree, 2)` per stroke.
    pub control_point_deltas: Tensor,
    /// `[strokes, degree - 1]` interior weight logits, rational models only.
    pub rational_weights: Option<Tensor>,
}

/// Full multi-degree embedding of one sketch's strokes.
#[derive(Debug, Clone)]
pub struct StrokeEmbedding {
    pub per_degree: Vec<DegreeOutput>,
}

/// Multi-degree inference output: embeddings plus per-degree selection
/// losses used to pick the best-fitting degree per stroke.
#[derive(Debug, Clone)]
pub struct SelectionOutput {
    pub embedding: StrokeEmbedding,
    /// `[strokes, supported_degrees]`; lower is a better fit.
    pub selection_losses: Tensor,
}

impl SelectionOutput {
    /// Best-fitting degree per stroke (argmin over the loss row).
    pub fn best_degrees(&self, degrees: &DegreeRange) -> ModelResult<Vec<usize>> {
        let rows = self
            .selection_losses
            .to_vec2::<f32>()
            .map_err(|e| ModelError::tensor("selection losses to host", e))?;
        Ok(rows
            .iter()
            .map(|row| {
                let mut best = 0;
                for (i, &v) in row.iter().enumerate() {
                    if v < row[best] {
                        best = i;
                    }
                }
                degrees.low + best
            })
            .collect())
    }
}

/// Bidirectional recurrent encoder with per-degree projection heads.
pub struct StrokeEmbedder {
    config: EmbedderConfig,
    layers: Vec<BiLstmLayer>,
    ctrlpt_heads: Vec<Linear>,
    weight_heads: Vec<Linear>,
    selection_head: Linear,
}

impl StrokeEmbedder {
    pub fn new(config: EmbedderConfig, vb: VarBuilder) -> ModelResult<Self> {
        config.validate()?;
        let hidden = config.hidden_size;
        let encoded = 2 * hidden;

        let mut layers = Vec::with_capacity(config.num_layers);
        for l in 0..config.num_layers {
            let in_dim = if l == 0 { 2 } else { encoded };
            layers.push(BiLstmLayer::new(
                in_dim,
                hidden,
                vb.pp(format!("bilstm_{l}")),
            )?);
        }

        let mut ctrlpt_heads = Vec::with_capacity(config.degrees.count());
        let mut weight_heads = Vec::new();
        for degree in config.degrees.degrees() {
            ctrlpt_heads.push(
                linear(encoded, degree * 2, vb.pp(format!("ctrlpt_head_{degree}")))
                    .map_err(|e| ModelError::tensor("control-point head init", e))?,
            );
            if config.rational {
                weight_heads.push(
                    linear(encoded, degree - 1, vb.pp(format!("ratw_head_{degree}")))
                        .map_err(|e| ModelError::tensor("weight head init", e))?,
                );
            }
        }
        let selection_head = linear(
            encoded,
            config.degrees.count(),
            vb.pp("degree_selection_head"),
        )
        .map_err(|e| ModelError::tensor("selection head init", e))?;

        tracing::info!(
            hidden,
            layers = config.num_layers,
            degrees = config.degrees.count(),
            rational = config.rational,
            "stroke embedder constructed"
        );

        Ok(Self {
            config,
            layers,
            ctrlpt_heads,
            weight_heads,
            selection_head,
        })
    }

    pub fn config(&self) -> &EmbedderConfig {
        &self.config
    }

    pub fn rational(&self) -> bool {
        self.config.rational
    }

    /// Encode a packed batch into one fixed-size vector per stroke,
    /// restored to original stroke order. `[strokes, 2 * hidden]`.
    fn encode(&self, packed: &PackedSequence, init: &StatePair) -> ModelResult<Tensor> {
        init.check_shape(
            "stroke embedder state",
            self.config.num_layers,
            2,
            packed.batch(),
            self.config.hidden_size,
        )?;

        let device = init.hidden.device();
        let mut xs = Tensor::from_vec(
            packed.data().to_vec(),
            (packed.batch(), packed.max_len(), packed.features()),
            device,
        )
        .map_err(|e| ModelError::tensor("packed data to tensor", e))?;

        let mut masks = Vec::with_capacity(packed.max_len());
        let mut keeps = Vec::with_capacity(packed.max_len());
        for t in 0..packed.max_len() {
            let mask = Tensor::from_vec(packed.timestep_mask(t), (packed.batch(), 1), device)
                .map_err(|e| ModelError::tensor("timestep mask", e))?;
            let keep = mask
                .affine(-1.0, 1.0)
                .map_err(|e| ModelError::tensor("timestep keep mask", e))?;
            masks.push(mask);
            keeps.push(keep);
        }

        let mut final_fwd = None;
        let mut final_bwd = None;
        for (l, layer) in self.layers.iter().enumerate() {
            let (h_f, c_f) = init.slice(l, 2, 0)?;
            let (h_b, c_b) = init.slice(l, 2, 1)?;
            let out = layer.forward(
                &xs,
                &masks,
                &keeps,
                LSTMState { h: h_f, c: c_f },
                LSTMState { h: h_b, c: c_b },
            )?;
            xs = out.seq;
            final_fwd = Some(out.final_fwd);
            final_bwd = Some(out.final_bwd);
        }
        let (final_fwd, final_bwd) = (
            final_fwd.expect("at least one layer"),
            final_bwd.expect("at least one layer"),
        );

        let encoded = Tensor::cat(&[&final_fwd, &final_bwd], 1)
            .map_err(|e| ModelError::tensor("final state concat", e))?;

        // Rows are in length-sorted order; restore original stroke order.
        let indices: Vec<u32> = packed
            .inverse_permutation()
            .iter()
            .map(|&i| i as u32)
            .collect();
        let indices = Tensor::from_vec(indices, (packed.batch(),), device)
            .map_err(|e| ModelError::tensor("unsort index tensor", e))?;
        encoded
            .index_select(&indices, 0)
            .map_err(|e| ModelError::tensor("unsort encodings", e))
    }

    /// Embed strokes at every supported degree.
    pub fn embed(&self, packed: &PackedSequence, init: &StatePair) -> ModelResult<StrokeEmbedding> {
        let encoded = self.encode(packed, init)?;
        self.project(&encoded)
    }

    /// Project an encoded batch through every degree head.
    fn project(&self, encoded: &Tensor) -> ModelResult<StrokeEmbedding> {
        let mut per_degree = Vec::with_capacity(self.ctrlpt_heads.len());
        for (i, degree) in self.config.degrees.degrees().enumerate() {
            let control_point_deltas = self.ctrlpt_heads[i]
                .forward(encoded)
                .map_err(|e| ModelError::tensor("control-point projection", e))?;
            let rational_weights = if self.config.rational {
                Some(
                    self.weight_heads[i]
                        .forward(encoded)
                        .map_err(|e| ModelError::tensor("weight projection", e))?,
                )
            } else {
                None
            };
            per_degree.push(DegreeOutput {
                degree,
                control_point_deltas,
                rational_weights,
            });
        }
        Ok(StrokeEmbedding { per_degree })
    }

    /// Embed strokes at one target degree within the supported range.
    ///
    /// Selects the projection head indexed by `target_degree - low`; a
    /// target outside the range is a configuration error.
    pub fn embed_degree(
        &self,
        packed: &PackedSequence,
        init: &StatePair,
        target_degree: usize,
    ) -> ModelResult<DegreeOutput> {
        let index = self
            .config
            .degrees
            .head_index(target_degree)
            .map_err(|e| ModelError::config(e.to_string()))?;
        let embedding = self.embed(packed, init)?;
        Ok(embedding.per_degree.into_iter().nth(index).expect("head index in range"))
    }

    /// Multi-degree inference mode: all embeddings plus the degree-selection
    /// losses.
    pub fn embed_with_selection(
        &self,
        packed: &PackedSequence,
        init: &StatePair,
    ) -> ModelResult<SelectionOutput> {
        let encoded = self.encode(packed, init)?;
        let selection_losses = self
            .selection_head
            .forward(&encoded)
            .map_err(|e| ModelError::tensor("selection projection", e))?;
        let embedding = self.project(&encoded)?;
        Ok(SelectionOutput {
            embedding,
            selection_losses,
        })
    }
}
