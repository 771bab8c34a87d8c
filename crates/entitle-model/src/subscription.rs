//! Upstream Subscriptions

use crate::product::Product;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A purchased quantity of a product over a time window; the source that
/// pools are created and refreshed from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    /// Subscription id.
    pub id: String,
    /// Marketed product.
    pub product: Product,
    /// Product granted to derived sub-pools, when different.
    pub derived_product: Option<Product>,
    /// Purchased quantity.
    pub quantity: i64,
    /// Window start.
    pub start_date: DateTime<Utc>,
    /// Window end.
    pub end_date: DateTime<Utc>,
    /// Contract number.
    pub contract_number: Option<String>,
    /// Account number.
    pub account_number: Option<String>,
    /// Order number.
    pub order_number: Option<String>,
    /// Set when the subscription was imported from an upstream pool.
    pub upstream_pool_id: Option<String>,
}

impl Subscription {
    /// Create a subscription.
    pub fn new(
        id: &str,
        product: Product,
        quantity: i64,
        start_date: DateTime<Utc>,
        end_date: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.to_string(),
            product,
            derived_product: None,
            quantity,
            start_date,
            end_date,
            contract_number: None,
            account_number: None,
            order_number: None,
            upstream_pool_id: None,
        }
    }
}
