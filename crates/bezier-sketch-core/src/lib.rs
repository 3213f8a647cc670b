//! Bezier Sketch Core Library
//!
//! Provides the domain types and batching discipline for the two-level
//! sketch pipeline: raw pen samples are normalized into per-stroke local
//! offset sequences, encoded (by `bezier-sketch-model`) into fixed-size
//! rational Bezier curve descriptors, and handed to an external curve
//! codec for rendering.
//!
//! # Architecture
//!
//! This crate defines:
//! - Domain types (`Sample`, `Stroke`, `Sketch`, `CurveDescriptor`)
//! - The stroke batch normalizer and its explicit `PackedSequence` value type
//! - Stop-bit construction for variable-count stroke sequences
//! - The render boundary (`RenderableCurve`) consumed by the curve codec
//! - Error types and result aliases
//! - Configuration structures (`DegreeRange`)
//!
//! # Example
//!
//! ```
//! use bezier_sketch_core::{Sketch, Stroke, batch::normalize_sketch};
//!
//! let stroke = Stroke::from_rows(&[[10.0, 20.0, 0.0], [13.0, 24.0, 1.0]]);
//! let sketch = Sketch::new(vec![stroke]);
//! let normalized = normalize_sketch(&sketch).unwrap();
//! assert_eq!(normalized.start_anchors, vec![[10.0, 20.0]]);
//! ```

pub mod batch;
pub mod config;
pub mod error;
pub mod render;
pub mod types;

// Re-exports for convenience
pub use batch::{normalize_sketch, NormalizedStrokes, PackedSequence};
pub use config::DegreeRange;
pub use error::{SketchError, SketchResult};
pub use render::{stop_index, RenderableCurve};
pub use types::{CurveDescriptor, Sample, Sketch, Stroke};

/// Logit value whose sigmoid is close enough to 1 to pin an endpoint weight.
///
/// Rational curve endpoints always carry this weight so that only interior
/// control points are free to bend the curve.
pub const SATURATED_WEIGHT_LOGIT: f32 = 5.0;
