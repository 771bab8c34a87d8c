//! Capacity-Attribute Comparison Rules
//!
//! Mismatches between consumer facts and product capacity attributes are
//! warnings for ordinary consumers. Manifest consumers are instead gated
//! on declared capabilities, with severity chosen by the caller type.

use super::{Rule, RuleContext};
use crate::validation::{capability_gate_severity, keys, CallerType, Severity, ValidationResult};
use entitle_model::attrs;
use entitle_model::facts;
use entitle_model::ConsumerType;

fn capability_gate(
    ctx: &RuleContext<'_>,
    capability: &str,
    error_key: &'static str,
    warn_key: &'static str,
    result: &mut ValidationResult,
) {
    if !ctx.consumer.has_capability(capability) {
        match capability_gate_severity(ctx.caller) {
            Severity::Error => result.add_error(error_key),
            Severity::Warning => result.add_warning(warn_key),
        }
    }
}

/// Architecture list comparison; a mismatch is never more than a warning.
pub struct ArchitectureRule;

impl Rule for ArchitectureRule {
    fn name(&self) -> &'static str {
        "architecture"
    }

    fn gating_attribute(&self) -> Option<&'static str> {
        Some(attrs::ARCH)
    }

    fn evaluate(&self, ctx: &RuleContext<'_>, result: &mut ValidationResult) {
        if ctx.consumer.is_manifest() {
            return;
        }

        let is_system = matches!(ctx.consumer.consumer_type, ConsumerType::System);
        if !facts::arch_matches(
            ctx.pool.product_attribute(attrs::ARCH),
            facts::arch(ctx.consumer),
            is_system,
        ) {
            result.add_warning(keys::ARCH_MISMATCH);
        }
    }
}

/// Socket count comparison for physical consumers. A consumer-reported
/// socket count of 0 is treated as missing, so it is skipped silently.
pub struct SocketsRule;

impl Rule for SocketsRule {
    fn name(&self) -> &'static str {
        "sockets"
    }

    fn gating_attribute(&self) -> Option<&'static str> {
        Some(attrs::SOCKETS)
    }

    fn evaluate(&self, ctx: &RuleContext<'_>, result: &mut ValidationResult) {
        if ctx.consumer.is_manifest() || ctx.consumer.is_guest() {
            return;
        }

        if ctx.pool.is_stacked() {
            return;
        }

        let consumer_sockets = match facts::sockets(ctx.consumer) {
            Some(count) => count,
            None => return,
        };

        if let Some(pool_sockets) =
            ctx.pool.product_attribute(attrs::SOCKETS).and_then(attrs::parse_positive)
        {
            if pool_sockets < consumer_sockets {
                result.add_warning(keys::SOCKET_MISMATCH);
            }
        }
    }
}

/// Core count comparison; capability-gated for manifest consumers.
pub struct CoresRule;

impl Rule for CoresRule {
    fn name(&self) -> &'static str {
        "cores"
    }

    fn gating_attribute(&self) -> Option<&'static str> {
        Some(attrs::CORES)
    }

    fn evaluate(&self, ctx: &RuleContext<'_>, result: &mut ValidationResult) {
        if ctx.consumer.is_manifest() {
            capability_gate(
                ctx,
                attrs::CORES,
                keys::CORES_UNSUPPORTED,
                keys::CORES_UNSUPPORTED_WARN,
                result,
            );
            return;
        }

        if ctx.consumer.is_guest() || ctx.pool.is_stacked() {
            return;
        }

        let consumer_cores = match facts::cores(ctx.consumer) {
            Some(count) => count,
            None => return,
        };

        if let Some(pool_cores) =
            ctx.pool.product_attribute(attrs::CORES).and_then(attrs::parse_positive)
        {
            if pool_cores < consumer_cores {
                result.add_warning(keys::CORE_MISMATCH);
            }
        }
    }
}

/// Virtual CPU comparison for guests.
pub struct VcpuRule;

impl Rule for VcpuRule {
    fn name(&self) -> &'static str {
        "vcpu"
    }

    fn gating_attribute(&self) -> Option<&'static str> {
        Some(attrs::VCPU)
    }

    fn evaluate(&self, ctx: &RuleContext<'_>, result: &mut ValidationResult) {
        // The attribute predates manifest capability declarations, so
        // manifest consumers are never checked for it.
        if ctx.consumer.is_manifest() || !ctx.consumer.is_guest() {
            return;
        }

        if ctx.pool.is_stacked() {
            return;
        }

        let consumer_vcpus = match facts::vcpus(ctx.consumer) {
            Some(count) => count,
            None => return,
        };

        if let Some(pool_vcpus) =
            ctx.pool.product_attribute(attrs::VCPU).and_then(attrs::parse_positive)
        {
            if pool_vcpus < consumer_vcpus {
                result.add_warning(keys::VCPU_MISMATCH);
            }
        }
    }
}

/// RAM comparison in whole GB; capability-gated for manifest consumers.
pub struct RamRule;

impl Rule for RamRule {
    fn name(&self) -> &'static str {
        "ram"
    }

    fn gating_attribute(&self) -> Option<&'static str> {
        Some(attrs::RAM)
    }

    fn evaluate(&self, ctx: &RuleContext<'_>, result: &mut ValidationResult) {
        if ctx.consumer.is_manifest() {
            capability_gate(
                ctx,
                attrs::RAM,
                keys::RAM_UNSUPPORTED,
                keys::RAM_UNSUPPORTED_WARN,
                result,
            );
            return;
        }

        if ctx.pool.is_stacked() {
            return;
        }

        let consumer_ram = match facts::ram_gb(ctx.consumer) {
            Some(gb) => gb,
            None => return,
        };

        if let Some(product_ram) =
            ctx.pool.product_attribute(attrs::RAM).and_then(attrs::parse_positive)
        {
            if consumer_ram > product_ram {
                result.add_warning(keys::RAM_MISMATCH);
            }
        }
    }
}

/// Bind quantities on instance-based pools must divide evenly by the
/// multiplier on physical systems; capability-gated for manifest
/// consumers.
pub struct InstanceMultiplierRule;

impl Rule for InstanceMultiplierRule {
    fn name(&self) -> &'static str {
        "instance_multiplier"
    }

    fn gating_attribute(&self) -> Option<&'static str> {
        Some(attrs::INSTANCE_MULTIPLIER)
    }

    fn evaluate(&self, ctx: &RuleContext<'_>, result: &mut ValidationResult) {
        if ctx.consumer.is_manifest() {
            capability_gate(
                ctx,
                attrs::INSTANCE_MULTIPLIER,
                keys::INSTANCE_UNSUPPORTED,
                keys::INSTANCE_UNSUPPORTED_WARN,
                result,
            );
            return;
        }

        if ctx.caller != CallerType::Bind || ctx.consumer.is_guest() {
            return;
        }

        let multiplier = ctx.pool.instance_multiplier();
        if multiplier > 1 && ctx.quantity % multiplier != 0 {
            result.add_error(keys::QUANTITY_MISMATCH);
        }
    }
}
