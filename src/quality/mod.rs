//! Quality Gate Pipeline (§4.6): an ordered series of validation layers
//! that decide pass/fail against an artifact.

pub mod layer;
pub mod layers;
pub mod pipeline;
pub mod scorecard;

pub use layer::{LayerReport, QualityLayer, ScaleMapper};
pub use pipeline::{Pipeline, canonical_pipeline, world_class_floor_applies};
pub use scorecard::Scorecard;
