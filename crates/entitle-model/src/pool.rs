//! Consumable Entitlement Pools

use crate::attrs;
use crate::product::Product;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Links a pool back to the subscription it was created from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubscriptionSubKey {
    /// The primary pool for the subscription.
    Master,
    /// A bonus pool derived from the subscription's virtualization rules.
    Derived,
}

/// A quantity of a product available for consumption over a time window.
///
/// Pool-level attributes override product-level attributes ("flattened
/// attributes"); the product attribute map is a snapshot taken when the
/// pool was created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pool {
    /// Pool id.
    pub id: String,
    /// Product id the pool grants.
    pub product_id: String,
    /// Product display name.
    pub product_name: String,
    /// Total quantity; `-1` means unlimited.
    pub quantity: i64,
    /// Units already consumed.
    pub consumed: i64,
    /// Units consumed by manifest/distributor consumers.
    pub exported: i64,
    /// First instant the pool is usable.
    pub start_date: DateTime<Utc>,
    /// Last instant the pool is usable.
    pub end_date: DateTime<Utc>,
    /// Pool-level attributes.
    pub attributes: HashMap<String, String>,
    /// Product attribute snapshot.
    pub product_attributes: HashMap<String, String>,
    /// Provided (engineering) product ids.
    pub provided_ids: HashSet<String>,
    /// Derived product id, if the product declares one.
    pub derived_product_id: Option<String>,
    /// Derived product display name, when known.
    pub derived_product_name: Option<String>,
    /// Provided product ids granted to derived sub-pools.
    pub derived_provided_ids: HashSet<String>,
    /// Originating subscription.
    pub subscription_id: Option<String>,
    /// Role of this pool within its subscription.
    pub subscription_subkey: Option<SubscriptionSubKey>,
    /// Stack the pool was derived from, for stack sub-pools.
    pub source_stack_id: Option<String>,
    /// Consumer whose entitlements drive a stack sub-pool.
    pub source_consumer: Option<String>,
    /// Restricts consumption to a single username.
    pub restricted_to_username: Option<String>,
    /// Contract number carried over from the subscription.
    pub contract_number: Option<String>,
    /// Account number carried over from the subscription.
    pub account_number: Option<String>,
    /// Order number carried over from the subscription.
    pub order_number: Option<String>,
    /// Set when a refresh decided the pool should be removed.
    pub marked_for_delete: bool,
}

impl Pool {
    /// Create a pool for a product, snapshotting its attributes.
    pub fn new(
        id: &str,
        product: &Product,
        quantity: i64,
        start_date: DateTime<Utc>,
        end_date: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.to_string(),
            product_id: product.id.clone(),
            product_name: product.name.clone(),
            quantity,
            consumed: 0,
            exported: 0,
            start_date,
            end_date,
            attributes: HashMap::new(),
            product_attributes: product.attributes.clone(),
            provided_ids: product.provided_ids.clone(),
            derived_product_id: product.derived_id.clone(),
            derived_product_name: None,
            derived_provided_ids: product.derived_provided_ids.clone(),
            subscription_id: None,
            subscription_subkey: None,
            source_stack_id: None,
            source_consumer: None,
            restricted_to_username: None,
            contract_number: None,
            account_number: None,
            order_number: None,
            marked_for_delete: false,
        }
    }

    /// Set a pool-level attribute.
    pub fn set_attribute(&mut self, name: &str, value: &str) {
        self.attributes.insert(name.to_string(), value.to_string());
    }

    /// Builder-style pool attribute setter.
    pub fn with_attribute(mut self, name: &str, value: &str) -> Self {
        self.set_attribute(name, value);
        self
    }

    /// Attribute lookup preferring the pool-level value ("flattening").
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .get(name)
            .or_else(|| self.product_attributes.get(name))
            .map(String::as_str)
    }

    /// Attribute lookup preferring the product-level value.
    pub fn product_attribute(&self, name: &str) -> Option<&str> {
        self.product_attributes
            .get(name)
            .or_else(|| self.attributes.get(name))
            .map(String::as_str)
    }

    /// Whether the attribute is present at either level.
    pub fn has_attribute(&self, name: &str) -> bool {
        self.attribute(name).is_some()
    }

    /// Whether the flattened attribute value is a case-insensitive "true".
    pub fn attribute_is_true(&self, name: &str) -> bool {
        self.attribute(name).map(attrs::parse_bool).unwrap_or(false)
    }

    /// The full flattened attribute map, pool values overriding product
    /// values.
    pub fn flattened_attributes(&self) -> HashMap<String, String> {
        let mut flat = self.product_attributes.clone();
        flat.extend(
            self.attributes
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );
        flat
    }

    /// Whether the pool carries unlimited quantity.
    pub fn is_unlimited(&self) -> bool {
        self.quantity < 0
    }

    /// Units still available for consumption.
    pub fn available(&self) -> i64 {
        self.quantity - self.consumed
    }

    /// Whether the pool can satisfy a bind of `quantity` units.
    pub fn entitlements_available(&self, quantity: i64) -> bool {
        self.is_unlimited() || self.available() >= quantity
    }

    /// Whether the pool grants the given product, directly or via a
    /// provided product.
    pub fn provides(&self, product_id: &str) -> bool {
        self.product_id == product_id || self.provided_ids.contains(product_id)
    }

    /// Whether the pool grants the product through its derived product set.
    pub fn provides_derived(&self, product_id: &str) -> bool {
        self.derived_product_id.as_deref() == Some(product_id) ||
            self.derived_provided_ids.contains(product_id)
    }

    /// Instance multiplier, defaulting to 1.
    pub fn instance_multiplier(&self) -> i64 {
        self.attribute(attrs::INSTANCE_MULTIPLIER)
            .and_then(attrs::parse_positive)
            .unwrap_or(1)
    }

    /// Stacking identifier, if the product stacks.
    pub fn stack_id(&self) -> Option<&str> {
        self.product_attribute(attrs::STACKING_ID)
    }

    /// Whether the pool participates in stacking.
    pub fn is_stacked(&self) -> bool {
        self.stack_id().is_some()
    }

    /// Whether this is a policy-derived bonus/sub pool.
    pub fn is_derived(&self) -> bool {
        self.attribute_is_true(attrs::POOL_DERIVED)
    }

    /// Whether "yes" multi-entitlement consumption is allowed.
    pub fn is_multi_entitlement(&self) -> bool {
        self.attribute(attrs::MULTI_ENTITLEMENT)
            .map(|v| v.eq_ignore_ascii_case("yes"))
            .unwrap_or(false)
    }

    /// Whether the pool has ended as of `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.end_date
    }

    /// Whether the pool has started as of `now`.
    pub fn has_started(&self, now: DateTime<Utc>) -> bool {
        now >= self.start_date
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn window() -> (DateTime<Utc>, DateTime<Utc>) {
        (
            Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
        )
    }

    #[test]
    fn test_pool_attribute_overrides_product() {
        let product = Product::new("srv-100", "Server").with_attribute(attrs::VIRT_ONLY, "false");
        let (start, end) = window();
        let pool = Pool::new("p1", &product, 10, start, end)
            .with_attribute(attrs::VIRT_ONLY, "true");

        assert_eq!(pool.attribute(attrs::VIRT_ONLY), Some("true"));
        assert_eq!(pool.product_attribute(attrs::VIRT_ONLY), Some("false"));
        assert_eq!(pool.flattened_attributes().get(attrs::VIRT_ONLY).unwrap(), "true");
    }

    #[test]
    fn test_availability() {
        let product = Product::new("srv-100", "Server");
        let (start, end) = window();
        let mut pool = Pool::new("p1", &product, 5, start, end);
        pool.consumed = 3;

        assert_eq!(pool.available(), 2);
        assert!(pool.entitlements_available(2));
        assert!(!pool.entitlements_available(3));

        pool.quantity = -1;
        assert!(pool.is_unlimited());
        assert!(pool.entitlements_available(1000));
    }

    #[test]
    fn test_provides() {
        let mut product = Product::new("srv-100", "Server");
        product.provided_ids.insert("eng-1".to_string());
        let (start, end) = window();
        let pool = Pool::new("p1", &product, 5, start, end);

        assert!(pool.provides("srv-100"));
        assert!(pool.provides("eng-1"));
        assert!(!pool.provides("eng-2"));
    }
}
