//! Domain module - listing, pricing and batch rules
//!
//! Pure types and calculations with no network or storage access.

pub mod batch;
pub mod pricing;
pub mod product;

pub use batch::{BatchLayout, BatchPartitioner, BATCH_CAPACITY};
pub use pricing::{PriceTransformer, PricingConfig};
pub use product::{ParsedListing, Product, ProductError};
