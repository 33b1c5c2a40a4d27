//! Catalog Lister - store listing acquisition for bulk marketplace upload
//!
//! Fetches a seller's store page, parses every listing, drops anything seen
//! in a previous run, prices what is left through the fee/tax/markup cascade
//! and writes 50-item batches of CSV records and product images.

pub mod application;
pub mod crawling;
pub mod domain;
pub mod infrastructure;

pub use application::{ListingPipeline, PipelineError, RunSummary};
pub use domain::{BatchPartitioner, PriceTransformer, PricingConfig, Product};
pub use infrastructure::{DedupStore, DocumentFetcher, Settings, SettingsManager};
