//! Listing detail page parser
//!
//! Extraction never fails on missing markup: absent fields come back as
//! `None`/empty and the orchestrator decides whether to reject.

use scraper::{ElementRef, Html, Selector};
use tracing::{debug, trace};

use super::config::ListingSelectors;
use super::{ParsingResult, compile_selector, compile_selectors};
use crate::domain::product::ParsedListing;

/// Parser for listing detail pages
pub struct ListingParser {
    title_selectors: Vec<Selector>,
    price_selectors: Vec<Selector>,
    carousel_selectors: Vec<Selector>,
    active_image_selectors: Vec<Selector>,
    availability_selectors: Vec<Selector>,
    variation_selectors: Vec<Selector>,
    media_selector: Selector,
    nested_img_selector: Selector,
    price_currency_prefix: String,
    price_unit_suffix: String,
    availability_marker: String,
}

impl ListingParser {
    pub fn new() -> ParsingResult<Self> {
        Self::with_config(&ListingSelectors::default())
    }

    pub fn with_config(selectors: &ListingSelectors) -> ParsingResult<Self> {
        Ok(Self {
            title_selectors: compile_selectors(&selectors.title)?,
            price_selectors: compile_selectors(&selectors.price)?,
            carousel_selectors: compile_selectors(&selectors.image_carousel)?,
            active_image_selectors: compile_selectors(&selectors.active_image)?,
            availability_selectors: compile_selectors(&selectors.availability)?,
            variation_selectors: compile_selectors(&selectors.variations)?,
            media_selector: compile_selector("img, button")?,
            nested_img_selector: compile_selector("img")?,
            price_currency_prefix: selectors.price_currency_prefix.clone(),
            price_unit_suffix: selectors.price_unit_suffix.clone(),
            availability_marker: selectors.availability_marker.clone(),
        })
    }

    pub fn parse(&self, html: &str) -> ParsedListing {
        let document = Html::parse_document(html);
        self.parse_document(&document)
    }

    pub fn parse_document(&self, document: &Html) -> ParsedListing {
        let listing = ParsedListing {
            title: self.extract_title(document),
            raw_price: self.extract_price(document),
            images: self.extract_images(document),
            available: self.is_available(document),
            has_variations: self.has_variations(document),
        };
        trace!("Parsed listing: {:?}", listing);
        listing
    }

    fn first_match<'a>(document: &'a Html, selectors: &[Selector]) -> Option<ElementRef<'a>> {
        selectors
            .iter()
            .find_map(|selector| document.select(selector).next())
    }

    fn extract_title(&self, document: &Html) -> Option<String> {
        let Some(element) = Self::first_match(document, &self.title_selectors) else {
            debug!("Title heading not found");
            return None;
        };
        let title = element.text().collect::<String>().trim().to_string();
        (!title.is_empty()).then_some(title)
    }

    fn extract_price(&self, document: &Html) -> Option<f64> {
        let Some(element) = Self::first_match(document, &self.price_selectors) else {
            debug!("Price block not found");
            return None;
        };
        let text = element.text().collect::<String>();
        let price = self.parse_price_text(&text);
        if price.is_none() {
            debug!("Could not convert price text '{}' to a number", text.trim());
        }
        price
    }

    /// Strip the currency prefix and per-unit suffix, then parse. Anything
    /// else left in the text (thousands separators included) means no price.
    pub fn parse_price_text(&self, text: &str) -> Option<f64> {
        let stripped = text
            .replace(&self.price_currency_prefix, "")
            .replace(&self.price_unit_suffix, "");
        stripped
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|price| price.is_finite())
    }

    fn extract_images(&self, document: &Html) -> Vec<String> {
        let mut images: Vec<String> = Vec::new();

        if let Some(carousel) = Self::first_match(document, &self.carousel_selectors) {
            for element in carousel.select(&self.media_selector) {
                let source = match element.value().name() {
                    "img" => element.value().attr("src"),
                    _ => element
                        .select(&self.nested_img_selector)
                        .next()
                        .and_then(|img| img.value().attr("src")),
                };
                // An <img> inside a <button> is visited twice
                if let Some(src) = source.map(str::trim).filter(|s| !s.is_empty()) {
                    if !images.iter().any(|existing| existing == src) {
                        images.push(src.to_string());
                    }
                }
            }
        } else if let Some(src) = Self::first_match(document, &self.active_image_selectors)
            .and_then(|img| img.value().attr("src"))
        {
            images.push(src.to_string());
        }

        if images.is_empty() {
            debug!("No listing images found");
        }
        images
    }

    fn is_available(&self, document: &Html) -> bool {
        match Self::first_match(document, &self.availability_selectors) {
            Some(element) => element.text().collect::<String>() == self.availability_marker,
            None => {
                debug!("Availability information not found");
                false
            }
        }
    }

    fn has_variations(&self, document: &Html) -> bool {
        Self::first_match(document, &self.variation_selectors).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const FULL_LISTING: &str = r#"
        <html><body>
          <h1 class="x-item-title__mainTitle">
            <span class="ux-textspans ux-textspans--BOLD">Vintage Brass Desk Lamp</span>
          </h1>
          <div class="x-price-primary"><span class="ux-textspans">US $24.99/ea</span></div>
          <div class="ux-image-carousel-item active image">
            <img src="https://img.example.com/a/s-l1600.jpg">
            <button><img src="https://img.example.com/b/s-l1600.jpg"></button>
            <button>no image</button>
          </div>
          <div class="ux-image-carousel-item image">
            <img src="https://img.example.com/other/s-l1600.jpg">
          </div>
          <div class="d-quantity__availability">
            <span class="ux-textspans">More than 10 available</span>
            <span class="ux-textspans">25 sold</span>
          </div>
        </body></html>
    "#;

    #[test]
    fn parses_complete_listing() {
        let parser = ListingParser::new().unwrap();
        let listing = parser.parse(FULL_LISTING);

        assert_eq!(listing.title.as_deref(), Some("Vintage Brass Desk Lamp"));
        assert_eq!(listing.raw_price, Some(24.99));
        assert_eq!(
            listing.images,
            vec![
                "https://img.example.com/a/s-l1600.jpg",
                "https://img.example.com/b/s-l1600.jpg",
            ]
        );
        assert!(listing.available);
        assert!(!listing.has_variations);
    }

    #[test]
    fn missing_markup_yields_absent_fields() {
        let parser = ListingParser::new().unwrap();
        let listing = parser.parse("<html><body><h1>Plain page</h1></body></html>");

        assert_eq!(listing, ParsedListing::default());
    }

    #[test]
    fn title_requires_emphasized_span() {
        let parser = ListingParser::new().unwrap();
        let html = r#"<h1 class="x-item-title__mainTitle"><span class="ux-textspans">Muted</span></h1>"#;
        assert_eq!(parser.parse(html).title, None);
    }

    #[rstest]
    #[case("US $24.99/ea", Some(24.99))]
    #[case("US $1,299.00", None)]
    #[case("US $1299.00", Some(1299.0))]
    #[case(" 12 ", Some(12.0))]
    #[case("US $0.50/ea", Some(0.5))]
    #[case("EUR 10,00", None)]
    #[case("Price not available", None)]
    #[case("", None)]
    #[case("US $inf", None)]
    fn price_text_conversion(#[case] text: &str, #[case] expected: Option<f64>) {
        let parser = ListingParser::new().unwrap();
        assert_eq!(parser.parse_price_text(text), expected);
    }

    #[test]
    fn active_slide_used_without_carousel_match() {
        let selectors = ListingSelectors {
            image_carousel: vec!["div.no-such-carousel".to_string()],
            ..ListingSelectors::default()
        };
        let parser = ListingParser::with_config(&selectors).unwrap();
        let html = r#"
            <div class="ux-image-carousel-item active image"><img src="https://img.example.com/only.jpg"></div>
        "#;
        assert_eq!(parser.parse(html).images, vec!["https://img.example.com/only.jpg"]);
    }

    #[test]
    fn availability_requires_exact_text() {
        let parser = ListingParser::new().unwrap();
        let html = r#"<div class="d-quantity__availability"><span class="ux-textspans">7 available</span></div>"#;
        assert!(!parser.parse(html).available);

        let html = r#"<div class="d-quantity__availability"><span class="ux-textspans">More than 10 available </span></div>"#;
        assert!(!parser.parse(html).available);
    }

    #[test]
    fn detects_variation_selector() {
        let parser = ListingParser::new().unwrap();
        let html = r#"<div class="vim x-msku"><select><option>Red</option></select></div>"#;
        assert!(parser.parse(html).has_variations);

        let html = r#"<div class="vim"></div>"#;
        assert!(!parser.parse(html).has_variations);
    }

    #[test]
    fn invalid_selector_is_rejected() {
        let selectors = ListingSelectors {
            title: vec!["h1[".to_string()],
            ..ListingSelectors::default()
        };
        assert!(ListingParser::with_config(&selectors).is_err());
    }
}
