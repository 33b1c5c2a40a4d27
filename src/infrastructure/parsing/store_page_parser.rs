//! Store page link discovery

use scraper::{Html, Selector};
use tracing::debug;
use url::Url;

use super::config::StorePageSelectors;
use super::{ParsingError, ParsingResult, compile_selectors};

/// Extracts listing links from a store page
pub struct StorePageParser {
    link_selectors: Vec<Selector>,
}

impl StorePageParser {
    pub fn new() -> ParsingResult<Self> {
        Self::with_config(&StorePageSelectors::default())
    }

    pub fn with_config(selectors: &StorePageSelectors) -> ParsingResult<Self> {
        Ok(Self {
            link_selectors: compile_selectors(&selectors.item_link)?,
        })
    }

    /// Listing links in document order, resolved against `base_url` and
    /// truncated to `cap`.
    pub fn extract_links(&self, html: &str, base_url: &str, cap: usize) -> ParsingResult<Vec<String>> {
        let base = Url::parse(base_url)
            .map_err(|e| ParsingError::url_resolution_failed(base_url, format!("Invalid base URL: {e}")))?;
        let document = Html::parse_document(html);

        let mut links = Vec::new();
        for selector in &self.link_selectors {
            for element in document.select(selector) {
                if links.len() >= cap {
                    return Ok(links);
                }
                let Some(href) = element.value().attr("href") else {
                    continue;
                };
                match base.join(href.trim()) {
                    Ok(url) => links.push(url.to_string()),
                    Err(e) => debug!("Skipping unresolvable link '{}': {}", href, e),
                }
            }
            if !links.is_empty() {
                break;
            }
        }

        debug!("Found {} listing links on {}", links.len(), base_url);
        Ok(links)
    }
}
