//! Checks applied to every pool regardless of attributes.

use super::{Rule, RuleContext};
use crate::validation::{capability_gate_severity, keys, Severity, ValidationResult};
use entitle_model::attrs;
use entitle_model::ConsumerType;

/// Capability a manifest consumer must declare to receive pools whose
/// product carries a derived product.
pub const DERIVED_PRODUCT_CAPABILITY: &str = "derived_product";

/// Multi-entitlement, default consumer-type restriction, username
/// restriction, and the derived-product capability gate for manifest
/// consumers.
pub struct GlobalRule;

impl Rule for GlobalRule {
    fn name(&self) -> &'static str {
        "global"
    }

    fn gating_attribute(&self) -> Option<&'static str> {
        None
    }

    fn evaluate(&self, ctx: &RuleContext<'_>, result: &mut ValidationResult) {
        let pool = ctx.pool;
        let consumer = ctx.consumer;

        if consumer.is_manifest() {
            // Distributors may extract anything except pools carrying a
            // derived product they cannot represent downstream.
            if pool.derived_product_id.is_some() &&
                !consumer.has_capability(DERIVED_PRODUCT_CAPABILITY)
            {
                match capability_gate_severity(ctx.caller) {
                    Severity::Error => result.add_error(keys::DERIVED_UNSUPPORTED),
                    Severity::Warning => result.add_warning(keys::DERIVED_UNSUPPORTED_WARN),
                }
            }
            return;
        }

        if ctx.has_entitlement_to(&pool.id) && !pool.is_multi_entitlement() {
            result.add_error(keys::ALREADY_HAS_PRODUCT);
        }

        if ctx.quantity > 1 && !pool.is_multi_entitlement() {
            result.add_error(keys::MULTI_ENTITLEMENT_UNSUPPORTED);
        }

        // A product with no explicit type requirement is restricted to
        // machine consumers.
        if pool.product_attribute(attrs::REQUIRES_CONSUMER_TYPE).is_none() &&
            !matches!(consumer.consumer_type, ConsumerType::System | ConsumerType::Hypervisor)
        {
            result.add_error(keys::CONSUMER_TYPE_MISMATCH);
        }

        if let Some(required_user) = pool.restricted_to_username.as_deref() {
            if consumer.username.as_deref() != Some(required_user) {
                result.add_error_with(
                    keys::USER_RESTRICTED,
                    &[required_user, consumer.username.as_deref().unwrap_or("")],
                );
            }
        }
    }
}
