//! Core domain types for the Bezier sketch pipeline.

mod descriptor;
mod sketch;
mod stroke;

pub use descriptor::*;
pub use sketch::*;
pub use stroke::*;
