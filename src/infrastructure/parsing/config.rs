//! CSS selectors for store and listing pages
//!
//! Defaults target the marketplace markup the lister was written against.
//! Each field is a list so a markup change can be handled by adding a
//! fallback without touching the parsers.

use serde::{Deserialize, Serialize};

/// Selectors for a single listing detail page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ListingSelectors {
    /// Emphasized text inside the main title heading
    pub title: Vec<String>,

    /// Text inside the primary price block
    pub price: Vec<String>,

    /// First image carousel slide
    pub image_carousel: Vec<String>,

    /// Single active slide, used only when no carousel is present
    pub active_image: Vec<String>,

    /// First text span of the quantity block
    pub availability: Vec<String>,

    /// Multi-SKU variation selector
    pub variations: Vec<String>,

    pub price_currency_prefix: String,
    pub price_unit_suffix: String,

    /// Exact availability text that marks a listing as well stocked
    pub availability_marker: String,
}

impl Default for ListingSelectors {
    fn default() -> Self {
        Self {
            title: vec!["h1.x-item-title__mainTitle span.ux-textspans.ux-textspans--BOLD".to_string()],
            price: vec!["div.x-price-primary span.ux-textspans".to_string()],
            image_carousel: vec!["div.ux-image-carousel-item".to_string()],
            active_image: vec!["div.ux-image-carousel-item.active.image img".to_string()],
            availability: vec!["div.d-quantity__availability span.ux-textspans".to_string()],
            variations: vec!["div.vim.x-msku".to_string()],
            price_currency_prefix: "US $".to_string(),
            price_unit_suffix: "/ea".to_string(),
            availability_marker: "More than 10 available".to_string(),
        }
    }
}

/// Selectors for a store (seller listing index) page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StorePageSelectors {
    pub item_link: Vec<String>,
}

impl Default for StorePageSelectors {
    fn default() -> Self {
        Self {
            item_link: vec!["a.s-item__link".to_string()],
        }
    }
}
