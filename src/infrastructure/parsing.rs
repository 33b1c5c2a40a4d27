//! HTML parsing for store pages and listing detail pages
//!
//! Selectors are compiled once per parser and the parsers hold no mutable
//! state, so one instance is shared by every in-flight task.

pub mod config;
pub mod error;
pub mod listing_parser;
pub mod store_page_parser;

pub use config::{ListingSelectors, StorePageSelectors};
pub use error::{ParsingError, ParsingResult};
pub use listing_parser::ListingParser;
pub use store_page_parser::StorePageParser;

use scraper::Selector;
use tracing::warn;

/// Compile a list of selector strings, failing on the first invalid one.
pub(crate) fn compile_selectors(selector_strings: &[String]) -> ParsingResult<Vec<Selector>> {
    if selector_strings.is_empty() {
        return Err(ParsingError::ConfigurationError {
            message: "At least one selector is required".to_string(),
        });
    }

    selector_strings
        .iter()
        .map(|selector_str| compile_selector(selector_str))
        .collect()
}

pub(crate) fn compile_selector(selector_str: &str) -> ParsingResult<Selector> {
    Selector::parse(selector_str).map_err(|e| {
        warn!("Failed to compile selector '{}': {}", selector_str, e);
        ParsingError::invalid_selector(selector_str, &e.to_string())
    })
}
