//! # Listing Acquisition
//!
//! Phase a of a run: store page link discovery followed by bounded
//! concurrent fetch, parse, dedup and accept of each listing.

pub mod context;
pub mod orchestrator;

pub use context::{AcceptedListing, RunContext};
pub use orchestrator::{
    Acquisition, AcquisitionOrchestrator, AcquisitionStats, ListingOutcome, OrchestratorConfig,
    OrchestratorError, RejectionReason,
};
