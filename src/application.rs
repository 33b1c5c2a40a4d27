//! Application layer module
//!
//! Wires settings, storage, fetcher and parsers into a complete listing run.

pub mod pipeline;

pub use pipeline::{ListingPipeline, PipelineError, RunSummary};
