//! Price cascade: marketplace fee, then sales tax, then profit markup.
//!
//! Each percentage compounds on the running total, and the final value is
//! rounded up to the next whole currency unit.

use serde::{Deserialize, Serialize};
use tracing::warn;

pub const DEFAULT_FACEBOOK_FEE: f64 = 5.0;
pub const DEFAULT_SALES_TAX: f64 = 7.5;
pub const DEFAULT_ADDITIONAL_PROFIT: f64 = 10.0;

/// Percentages applied to every raw price. Read-only during a run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PricingConfig {
    pub facebook_fee: f64,
    pub sales_tax: f64,
    pub additional_profit: f64,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            facebook_fee: DEFAULT_FACEBOOK_FEE,
            sales_tax: DEFAULT_SALES_TAX,
            additional_profit: DEFAULT_ADDITIONAL_PROFIT,
        }
    }
}

impl PricingConfig {
    /// Names of the percentages that are negative or not finite.
    pub fn invalid_fields(&self) -> Vec<&'static str> {
        [
            ("facebookFee", self.facebook_fee),
            ("salesTax", self.sales_tax),
            ("additionalProfit", self.additional_profit),
        ]
        .into_iter()
        .filter(|(_, value)| !value.is_finite() || *value < 0.0)
        .map(|(name, _)| name)
        .collect()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PriceTransformer {
    config: PricingConfig,
}

impl PriceTransformer {
    pub fn new(config: PricingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PricingConfig {
        &self.config
    }

    /// Apply the fee → tax → profit cascade and round up.
    ///
    /// Falls back to the raw price when the computation does not yield a
    /// finite number.
    pub fn transform(&self, raw_price: f64) -> f64 {
        transform(raw_price, &self.config)
    }
}

pub fn transform(raw_price: f64, config: &PricingConfig) -> f64 {
    let with_fee = raw_price + raw_price * config.facebook_fee / 100.0;
    let with_tax = with_fee + with_fee * config.sales_tax / 100.0;
    let with_profit = with_tax + with_tax * config.additional_profit / 100.0;
    let final_price = with_profit.ceil();

    if final_price.is_finite() {
        final_price
    } else {
        warn!(
            "Error calculating final price for {} with {:?}; keeping original price",
            raw_price, config
        );
        raw_price
    }
}
