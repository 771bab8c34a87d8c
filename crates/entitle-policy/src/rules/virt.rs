//! Virtualization and Consumer-Targeting Rules

use super::{Rule, RuleContext};
use crate::validation::{keys, CallerType, ValidationResult};
use entitle_model::attrs;
use entitle_model::facts;

/// Virt-only pools warn physical consumers on listing and block them on
/// bind; manifest consumers are blocked outright when the pool is
/// policy-derived.
pub struct VirtOnlyRule;

impl Rule for VirtOnlyRule {
    fn name(&self) -> &'static str {
        "virt_only"
    }

    fn gating_attribute(&self) -> Option<&'static str> {
        Some(attrs::VIRT_ONLY)
    }

    fn evaluate(&self, ctx: &RuleContext<'_>, result: &mut ValidationResult) {
        if !ctx.pool.attribute_is_true(attrs::VIRT_ONLY) {
            return;
        }

        if ctx.consumer.is_manifest() {
            if ctx.pool.is_derived() {
                result.add_error(keys::POOL_NOT_AVAILABLE_TO_MANIFEST);
            }
        } else if !ctx.consumer.is_guest() {
            match ctx.caller {
                CallerType::Bind | CallerType::BestPools => result.add_error(keys::VIRT_ONLY),
                _ => result.add_warning(keys::VIRT_ONLY_WARN),
            }
        }
    }
}

/// Physical-only pools warn guests on listing and block them on bind.
pub struct PhysicalOnlyRule;

impl Rule for PhysicalOnlyRule {
    fn name(&self) -> &'static str {
        "physical_only"
    }

    fn gating_attribute(&self) -> Option<&'static str> {
        Some(attrs::PHYSICAL_ONLY)
    }

    fn evaluate(&self, ctx: &RuleContext<'_>, result: &mut ValidationResult) {
        if !ctx.pool.attribute_is_true(attrs::PHYSICAL_ONLY) {
            return;
        }

        if !ctx.consumer.is_manifest() && ctx.consumer.is_guest() {
            match ctx.caller {
                CallerType::Bind | CallerType::BestPools => result.add_error(keys::PHYSICAL_ONLY),
                _ => result.add_warning(keys::PHYSICAL_ONLY_WARN),
            }
        }
    }
}

/// Host-restricted sub-pools only serve guests of the recorded host.
pub struct RequiresHostRule;

impl Rule for RequiresHostRule {
    fn name(&self) -> &'static str {
        "requires_host"
    }

    fn gating_attribute(&self) -> Option<&'static str> {
        Some(attrs::REQUIRES_HOST)
    }

    fn evaluate(&self, ctx: &RuleContext<'_>, result: &mut ValidationResult) {
        if ctx.consumer.is_manifest() {
            result.add_error(keys::POOL_NOT_AVAILABLE_TO_MANIFEST);
            return;
        }

        if ctx.consumer.fact(facts::VIRT_UUID).is_none() {
            result.add_error(keys::VIRT_ONLY);
            return;
        }

        let required_host = ctx.pool.attribute(attrs::REQUIRES_HOST);
        let resolved = ctx.host.map(|h| h.uuid.as_str());
        if resolved.is_none() || resolved != required_host {
            result.add_error(keys::HOST_MISMATCH);
        }
    }
}

/// Consumer-restricted pools only serve the recorded consumer UUID.
pub struct RequiresConsumerRule;

impl Rule for RequiresConsumerRule {
    fn name(&self) -> &'static str {
        "requires_consumer"
    }

    fn gating_attribute(&self) -> Option<&'static str> {
        Some(attrs::REQUIRES_CONSUMER)
    }

    fn evaluate(&self, ctx: &RuleContext<'_>, result: &mut ValidationResult) {
        if ctx.consumer.is_manifest() {
            result.add_error(keys::POOL_NOT_AVAILABLE_TO_MANIFEST);
            return;
        }

        if ctx.pool.attribute(attrs::REQUIRES_CONSUMER) != Some(ctx.consumer.uuid.as_str()) {
            result.add_error(keys::CONSUMER_MISMATCH);
        }
    }
}

/// Type-restricted pools require a matching consumer type; hypervisors
/// satisfy a `system` requirement.
pub struct RequiresConsumerTypeRule;

impl Rule for RequiresConsumerTypeRule {
    fn name(&self) -> &'static str {
        "requires_consumer_type"
    }

    fn gating_attribute(&self) -> Option<&'static str> {
        Some(attrs::REQUIRES_CONSUMER_TYPE)
    }

    fn evaluate(&self, ctx: &RuleContext<'_>, result: &mut ValidationResult) {
        // Distributors can access everything.
        if ctx.consumer.is_manifest() {
            return;
        }

        let required = match ctx.pool.attribute(attrs::REQUIRES_CONSUMER_TYPE) {
            Some(value) => value,
            None => return,
        };

        let label = ctx.consumer.consumer_type.label();
        if required != label {
            let hypervisor_as_system = required == "system" && label == "hypervisor";
            if !hypervisor_as_system {
                result.add_error(keys::CONSUMER_TYPE_MISMATCH);
            }
        }
    }
}

/// Temporary pools for newborn guests with no resolved host. Hidden with
/// errors rather than warnings so they never show up in listings for
/// ineligible consumers.
pub struct UnmappedGuestsOnlyRule;

impl Rule for UnmappedGuestsOnlyRule {
    fn name(&self) -> &'static str {
        "unmapped_guests_only"
    }

    fn gating_attribute(&self) -> Option<&'static str> {
        Some(attrs::UNMAPPED_GUESTS_ONLY)
    }

    fn evaluate(&self, ctx: &RuleContext<'_>, result: &mut ValidationResult) {
        if !ctx.pool.attribute_is_true(attrs::UNMAPPED_GUESTS_ONLY) {
            return;
        }

        if ctx.host.is_some() {
            result.add_error(keys::UNMAPPED_HAS_HOST);
        }

        if !ctx.consumer.is_newborn(ctx.now) {
            result.add_error(keys::UNMAPPED_NOT_NEW);
        }

        if ctx.caller == CallerType::Bind && !ctx.pool.has_started(ctx.now) {
            result.add_error(keys::UNMAPPED_FUTURE_BIND);
        }
    }
}
