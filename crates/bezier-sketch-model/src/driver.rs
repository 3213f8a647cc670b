//! Inference driver: the embed -> aggregate -> generate loop behind the
//! rendering surface.
//!
//! Plotting itself lives outside this crate; the driver produces
//! `RenderableCurve` data in exactly the shape the curve codec accepts.

use bezier_sketch_core::batch::normalize_sketch;
use bezier_sketch_core::render::RenderableCurve;
use bezier_sketch_core::types::{CurveDescriptor, Sketch};

use crate::aggregator::{aggregate_sketches, EmbeddedSketch};
use crate::context::ComputeContext;
use crate::embedder::StrokeEmbedder;
use crate::error::{ModelError, ModelResult};
use crate::generator::{Conditioning, GeneratedSketch, SketchGenerator};
use crate::noise::NoiseSource;

/// What an inference run should produce.
///
/// The degree and the mode flags implied by the loaded models must match
/// their construction-time configuration; mismatches are rejected before
/// any tensor work starts.
#[derive(Debug, Clone)]
pub struct InferenceRequest {
    /// Sketches from the batch to reconstruct.
    pub nsamples: usize,
    /// Generated variants per sketch.
    pub rsamples: usize,
    /// Target curve degree, within the embedder's supported range.
    pub bezier_degree: usize,
    /// The caller's expectation of the loaded models' weight mode.
    pub rational: bool,
    /// The caller's expectation of the generator's latent mode.
    pub variational: bool,
}

/// One input sketch's inference output: its reconstruction and the
/// generated variants.
#[derive(Debug, Clone)]
pub struct SketchReconstruction {
    /// The input sketch, embedded and decoded back through the descriptor.
    pub reference: Vec<RenderableCurve>,
    /// Autoregressively sampled variants conditioned on the input.
    pub variants: Vec<GeneratedSketch>,
}

/// Drive the full pipeline over a batch of sketches.
pub fn run_inference(
    ctx: &ComputeContext,
    embedder: &StrokeEmbedder,
    generator: &SketchGenerator,
    sketches: &[Sketch],
    request: &InferenceRequest,
    noise: &mut dyn NoiseSource,
) -> ModelResult<Vec<SketchReconstruction>> {
    if embedder.rational() != generator.is_rational() {
        return Err(ModelError::config(
            "embedder and generator disagree on rational weights",
        ));
    }
    if request.rational != generator.is_rational() {
        return Err(ModelError::config(
            "request rational flag does not match the loaded model",
        ));
    }
    if request.variational != generator.is_variational() {
        return Err(ModelError::config(
            "request variational flag does not match the loaded model",
        ));
    }
    if generator.config().descriptor_dim != request.bezier_degree * 2 {
        return Err(ModelError::config(format!(
            "generator descriptor_dim {} does not fit degree {}",
            generator.config().descriptor_dim,
            request.bezier_degree
        )));
    }

    let take = request.nsamples.min(sketches.len());
    let mut embedded = Vec::with_capacity(take);
    for sketch in &sketches[..take] {
        let normalized = normalize_sketch(sketch)?;
        let init = ctx.zero_state(
            embedder.config().num_layers,
            2,
            normalized.stroke_count(),
            embedder.config().hidden_size,
        )?;
        let output = embedder.embed_degree(&normalized.offsets, &init, request.bezier_degree)?;
        embedded.push(EmbeddedSketch::new(output, normalized.start_anchors)?);
    }
    let aggregate = aggregate_sketches(&embedded)?;
    tracing::debug!(sketches = take, "embedded inference batch");

    let mut results = Vec::with_capacity(take);
    for (index, sketch) in embedded.iter().enumerate() {
        let reference = reconstruct(sketch, request.bezier_degree)?;

        let mut variants = Vec::with_capacity(request.rsamples);
        let conditioning = Conditioning::from_aggregate(&aggregate, index)?;
        for _ in 0..request.rsamples {
            let init = ctx.zero_state(
                generator.config().num_layers,
                1,
                1,
                generator.config().hidden_size,
            )?;
            variants.push(generator.generate(&init, Some(&conditioning), noise)?);
        }
        results.push(SketchReconstruction {
            reference,
            variants,
        });
    }
    Ok(results)
}

/// Decode an embedded sketch back into renderable curves.
fn reconstruct(sketch: &EmbeddedSketch, degree: usize) -> ModelResult<Vec<RenderableCurve>> {
    let descriptor_rows = sketch
        .descriptors
        .to_vec2::<f32>()
        .map_err(|e| ModelError::tensor("descriptors to host", e))?;
    let weight_rows = match &sketch.weights {
        Some(weights) => Some(
            weights
                .to_vec2::<f32>()
                .map_err(|e| ModelError::tensor("weights to host", e))?,
        ),
        None => None,
    };

    let mut curves = Vec::with_capacity(descriptor_rows.len());
    for (row, flat) in descriptor_rows.iter().enumerate() {
        let mut descriptor = CurveDescriptor::from_flat(flat, degree)?;
        if let Some(weight_rows) = &weight_rows {
            descriptor = descriptor.with_weights(weight_rows[row].clone())?;
        }
        curves.push(RenderableCurve::from_descriptor(
            &descriptor,
            sketch.start_anchors[row],
        ));
    }
    Ok(curves)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedder::EmbedderConfig;
    use crate::generator::{GeneratorConfig, LatentMode, OutputMode, WeightMode};
    use crate::noise::GaussianNoise;
    use bezier_sketch_core::types::Stroke;
    use bezier_sketch_core::DegreeRange;
    use candle_nn::{VarBuilder, VarMap};

    fn sketch(offset: f32) -> Sketch {
        Sketch::new(vec![
            Stroke::from_rows(&[
                [offset, offset, 0.0],
                [offset + 1.0, offset + 2.0, 0.0],
                [offset + 3.0, offset + 4.0, 1.0],
            ]),
            Stroke::from_rows(&[[offset + 5.0, offset, 0.0], [offset + 6.0, offset, 1.0]]),
        ])
    }

    fn models(rational: bool) -> (StrokeEmbedder, SketchGenerator, ComputeContext) {
        let ctx = ComputeContext::cpu();
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, ctx.dtype(), ctx.device());
        let embedder = StrokeEmbedder::new(
            EmbedderConfig {
                hidden_size: 8,
                num_layers: 1,
                degrees: DegreeRange::new(3, 5).unwrap(),
                rational,
            },
            vb.pp("embedder"),
        )
        .unwrap();
        let generator = SketchGenerator::new(
            GeneratorConfig {
                descriptor_dim: 8,
                hidden_size: 8,
                num_layers: 1,
                latent: LatentMode::Deterministic,
                output: OutputMode::Regression,
                weights: if rational {
                    WeightMode::Rational { weight_dim: 3 }
                } else {
                    WeightMode::NonRational
                },
                stop_threshold: 2.0,
                max_strokes: 4,
            },
            vb.pp("generator"),
        )
        .unwrap();
        (embedder, generator, ctx)
    }

    #[test]
    fn test_run_inference_end_to_end() {
        let (embedder, generator, ctx) = models(false);
        let request = InferenceRequest {
            nsamples: 2,
            rsamples: 2,
            bezier_degree: 4,
            rational: false,
            variational: false,
        };
        let sketches = vec![sketch(0.0), sketch(10.0), sketch(20.0)];
        let results = run_inference(
            &ctx,
            &embedder,
            &generator,
            &sketches,
            &request,
            &mut GaussianNoise::seeded(5),
        )
        .unwrap();

        assert_eq!(results.len(), 2);
        for result in &results {
            assert_eq!(result.reference.len(), 2);
            // Degree 4: five control points per curve.
            assert_eq!(result.reference[0].control_points.len(), 5);
            assert_eq!(result.variants.len(), 2);
            for variant in &result.variants {
                assert!(variant.stroke_count() <= 4);
            }
        }
    }

    #[test]
    fn test_rational_reference_carries_weights() {
        let (embedder, generator, ctx) = models(true);
        let request = InferenceRequest {
            nsamples: 1,
            rsamples: 1,
            bezier_degree: 4,
            rational: true,
            variational: false,
        };
        let results = run_inference(
            &ctx,
            &embedder,
            &generator,
            &[sketch(0.0)],
            &request,
            &mut GaussianNoise::seeded(5),
        )
        .unwrap();
        let weights = results[0].reference[0].rational_weights.as_ref().unwrap();
        assert_eq!(weights.len(), 5);
    }

    #[test]
    fn test_mode_mismatch_rejected() {
        let (embedder, _, ctx) = models(true);
        let (_, generator, _) = models(false);
        let request = InferenceRequest {
            nsamples: 1,
            rsamples: 1,
            bezier_degree: 4,
            rational: false,
            variational: false,
        };
        assert!(matches!(
            run_inference(
                &ctx,
                &embedder,
                &generator,
                &[sketch(0.0)],
                &request,
                &mut GaussianNoise::seeded(5),
            ),
            Err(ModelError::ConfigMismatch { .. })
        ));
    }

    #[test]
    fn test_variational_flag_mismatch_rejected() {
        let (embedder, generator, ctx) = models(false);
        let request = InferenceRequest {
            nsamples: 1,
            rsamples: 1,
            bezier_degree: 4,
            rational: false,
            variational: true, // generator is deterministic
        };
        assert!(matches!(
            run_inference(
                &ctx,
                &embedder,
                &generator,
                &[sketch(0.0)],
                &request,
                &mut GaussianNoise::seeded(5),
            ),
            Err(ModelError::ConfigMismatch { .. })
        ));
    }

    #[test]
    fn test_degree_mismatch_rejected() {
        let (embedder, generator, ctx) = models(false);
        let request = InferenceRequest {
            nsamples: 1,
            rsamples: 1,
            bezier_degree: 3, // generator was built for degree 4
            rational: false,
            variational: false,
        };
        assert!(matches!(
            run_inference(
                &ctx,
                &embedder,
                &generator,
                &[sketch(0.0)],
                &request,
                &mut GaussianNoise::seeded(5),
            ),
            Err(ModelError::ConfigMismatch { .. })
        ));
    }
}
