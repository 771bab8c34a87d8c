//! Marketed Product Definitions

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// A marketed product. Attributes are free-form key/value pairs; the
/// policy engine interprets the ones it knows and ignores the rest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    /// Upstream-assigned product id (SKU).
    pub id: String,
    /// Display name.
    pub name: String,
    /// Quantity multiplier applied when pools are created.
    pub multiplier: i64,
    /// Attribute map.
    pub attributes: HashMap<String, String>,
    /// Provided (engineering) product ids.
    pub provided_ids: HashSet<String>,
    /// Product granted to derived sub-pools, if any.
    pub derived_id: Option<String>,
    /// Provided product ids for derived sub-pools.
    pub derived_provided_ids: HashSet<String>,
}

impl Product {
    /// Create a product with no attributes.
    pub fn new(id: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            multiplier: 1,
            attributes: HashMap::new(),
            provided_ids: HashSet::new(),
            derived_id: None,
            derived_provided_ids: HashSet::new(),
        }
    }

    /// Set an attribute, replacing any previous value.
    pub fn set_attribute(&mut self, name: &str, value: &str) {
        self.attributes.insert(name.to_string(), value.to_string());
    }

    /// Builder-style attribute setter.
    pub fn with_attribute(mut self, name: &str, value: &str) -> Self {
        self.set_attribute(name, value);
        self
    }

    /// Look up an attribute value.
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    /// Whether the attribute is present.
    pub fn has_attribute(&self, name: &str) -> bool {
        self.attributes.contains_key(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attrs;

    #[test]
    fn test_attribute_lookup() {
        let product = Product::new("srv-100", "Server Premium")
            .with_attribute(attrs::SOCKETS, "2")
            .with_attribute(attrs::SUPPORT_LEVEL, "Premium");

        assert_eq!(product.attribute(attrs::SOCKETS), Some("2"));
        assert!(product.has_attribute(attrs::SUPPORT_LEVEL));
        assert!(!product.has_attribute(attrs::VIRT_LIMIT));
    }
}
