//! Product value types
//!
//! `ParsedListing` is what the listing parser sees on a page; `Product` is an
//! accepted, priced listing with its run sequence number fixed.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Raw extraction result for one listing page. Every field may be absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParsedListing {
    pub title: Option<String>,
    pub raw_price: Option<f64>,
    pub images: Vec<String>,
    pub available: bool,
    pub has_variations: bool,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProductError {
    #[error("Product title must not be empty")]
    EmptyTitle,

    #[error("Product price must be a finite non-negative number, got {0}")]
    InvalidPrice(f64),

    #[error("Product must have at least one image")]
    NoImages,
}

/// Accepted product. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Product {
    url: String,
    title: String,
    price: f64,
    images: Vec<String>,
    sequence: usize,
}

impl Product {
    /// Build a product from an accepted listing.
    ///
    /// `sequence` is the zero-based position of the product in the run's
    /// accepted collection; batch membership for both the export file and the
    /// image folder is derived from it.
    pub fn new(
        url: impl Into<String>,
        title: impl Into<String>,
        price: f64,
        images: Vec<String>,
        sequence: usize,
    ) -> Result<Self, ProductError> {
        let title = title.into();
        if title.trim().is_empty() {
            return Err(ProductError::EmptyTitle);
        }
        if !price.is_finite() || price < 0.0 {
            return Err(ProductError::InvalidPrice(price));
        }
        if images.is_empty() {
            return Err(ProductError::NoImages);
        }

        Ok(Self {
            url: url.into(),
            title,
            price,
            images,
            sequence,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn price(&self) -> f64 {
        self.price
    }

    /// Image locators in page order. Returns an owned copy.
    pub fn images(&self) -> Vec<String> {
        self.images.clone()
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    pub fn sequence(&self) -> usize {
        self.sequence
    }
}

impl std::fmt::Display for Product {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Product(title={}, price={}, images={} images)",
            self.title,
            self.price,
            self.images.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Product {
        Product::new(
            "https://www.ebay.com/itm/1",
            "Desk Lamp",
            25.0,
            vec!["https://i.ebayimg.com/a.jpg".to_string()],
            0,
        )
        .unwrap()
    }

    #[test]
    fn images_are_returned_as_copy() {
        let product = sample();
        let mut images = product.images();
        images.push("https://i.ebayimg.com/extra.jpg".to_string());
        images[0].clear();

        assert_eq!(product.image_count(), 1);
        assert_eq!(product.images(), vec!["https://i.ebayimg.com/a.jpg".to_string()]);
    }

    #[test]
    fn rejects_invalid_fields() {
        let images = vec!["a.jpg".to_string()];
        assert_eq!(
            Product::new("u", "  ", 1.0, images.clone(), 0),
            Err(ProductError::EmptyTitle)
        );
        assert_eq!(
            Product::new("u", "t", -1.0, images.clone(), 0),
            Err(ProductError::InvalidPrice(-1.0))
        );
        assert!(matches!(
            Product::new("u", "t", f64::NAN, images, 0),
            Err(ProductError::InvalidPrice(_))
        ));
        assert_eq!(
            Product::new("u", "t", 1.0, Vec::new(), 0),
            Err(ProductError::NoImages)
        );
    }

    #[test]
    fn display_summarizes_product() {
        assert_eq!(
            sample().to_string(),
            "Product(title=Desk Lamp, price=25, images=1 images)"
        );
    }
}
