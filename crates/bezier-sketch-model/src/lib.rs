//! Bezier Sketch Model Library
//!
//! The tensor-backed half of the sketch pipeline: a bidirectional
//! recurrent stroke embedder that compresses variable-length pen-offset
//! sequences into fixed-size curve descriptors, and a recurrent sketch
//! generator that predicts or samples the next stroke's descriptor,
//! placement anchor, and stop signal through a mixture-density or direct
//! regression output layer, optionally with a variational latent.
//!
//! # Architecture
//!
//! - `ComputeContext`: device placement and zero-state factories
//! - `StrokeEmbedder`: packed offsets -> per-degree curve descriptors
//! - `aggregate_sketches`: per-stroke embeddings -> padded per-sketch
//!   sequences with stop bits
//! - `SketchGenerator`: teacher-forced prediction and autoregressive
//!   sampling over descriptor sequences
//! - `run_inference`: the embed -> aggregate -> generate driving loop
//!
//! Model capabilities (variational, mixture output, rational weights) are
//! fixed at construction; requesting a capability a model was not built
//! with is a `ModelError::ConfigMismatch` at call time.
//!
//! All computation is synchronous and batch-parallel; the only
//! non-determinism is the explicit sampling, which draws from an
//! injectable [`noise::NoiseSource`].

pub mod aggregator;
pub mod context;
pub mod driver;
pub mod embedder;
pub mod error;
pub mod generator;
pub mod noise;

// Re-exports for convenience
pub use aggregator::{aggregate_sketches, EmbeddedSketch, SketchAggregate};
pub use context::{ComputeContext, StatePair};
pub use driver::{run_inference, InferenceRequest, SketchReconstruction};
pub use embedder::{EmbedderConfig, StrokeEmbedder};
pub use error::{ModelError, ModelResult};
pub use generator::{
    GeneratedSketch, GeneratorConfig, LatentMode, OutputMode, SketchGenerator, WeightMode,
};
pub use noise::{GaussianNoise, NoiseSource, ZeroNoise};
