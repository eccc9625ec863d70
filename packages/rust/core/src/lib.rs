//! Generation pipeline orchestration and domain logic for Notecast.
//!
//! This crate chains the pipeline stages (aggregate → synthesize → render →
//! poll → publish) into end-to-end jobs driven by [`pipeline::Studio`], and
//! records every step in the job ledger.

pub mod aggregator;
pub mod cost;
pub mod estimator;
pub mod ledger;
pub mod pipeline;
pub mod poller;
pub mod publisher;
pub mod renderer;
pub mod synthesizer;

#[cfg(test)]
pub(crate) mod testing;

pub use aggregator::{AggregatedContext, SourceCatalog};
pub use cost::{CostModel, PreflightEstimate, preflight_estimate};
pub use ledger::JobLedger;
pub use pipeline::{GenerationRequest, Studio, StudioParts};
pub use renderer::{MediaRenderer, RenderOutcome, renderer_for};
