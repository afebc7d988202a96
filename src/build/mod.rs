//! Kernel build and packaging
//!
//! - `tooling`: compiler setup, configuration and `make` invocations
//! - `pipeline`: the ordered steps from checked-out tree to cached packages

mod pipeline;
mod tooling;

pub use pipeline::{BuildOutcome, BuildPipeline, BuildResult, PipelineSettings};
pub use tooling::{BuildTooling, DebianMakeTooling};

#[cfg(test)]
pub(crate) use pipeline::testing;
