//! Validation Results and Reason Codes
//!
//! Policy violations are never Rust errors. Each rule reports reason-coded
//! entries into a [`ValidationResult`]; callers map error keys to API
//! failures and warning keys to informational output.

use serde::{Deserialize, Serialize};

/// Stable reason codes emitted by the rule set.
pub mod keys {
    /// Virt-only pool requested by a physical consumer (blocking).
    pub const VIRT_ONLY: &str = "rulefailed.virt.only";
    /// Virt-only pool requested by a physical consumer (advisory).
    pub const VIRT_ONLY_WARN: &str = "rulewarning.virt.only";
    /// Physical-only pool requested by a guest (blocking).
    pub const PHYSICAL_ONLY: &str = "rulefailed.physical.only";
    /// Physical-only pool requested by a guest (advisory).
    pub const PHYSICAL_ONLY_WARN: &str = "rulewarning.physical.only";
    /// Derived or host-restricted pools never serve manifest consumers.
    pub const POOL_NOT_AVAILABLE_TO_MANIFEST: &str = "pool.not.available.to.manifest.consumers";
    /// Guest's resolved host does not own the requested sub-pool.
    pub const HOST_MISMATCH: &str = "virt.guest.host.does.not.match.pool.owner";
    /// Unmapped-guest pool requested by a guest with a resolved host.
    pub const UNMAPPED_HAS_HOST: &str = "virt.guest.cannot.use.unmapped.guest.pool.has.host";
    /// Unmapped-guest pool requested past the newborn window.
    pub const UNMAPPED_NOT_NEW: &str = "virt.guest.cannot.use.unmapped.guest.pool.not.new";
    /// Unmapped-guest pool bind attempted before the pool starts.
    pub const UNMAPPED_FUTURE_BIND: &str = "virt.guest.cannot.bind.future.unmapped.guest.pool";
    /// Consumer type does not satisfy the pool's type requirement.
    pub const CONSUMER_TYPE_MISMATCH: &str = "rulefailed.consumer.type.mismatch";
    /// Pool is reserved for a different consumer UUID.
    pub const CONSUMER_MISMATCH: &str = "consumer.does.not.match.pool.consumer.requirement";
    /// Pool is reserved for a different username.
    pub const USER_RESTRICTED: &str = "pool.not.available.to.user";
    /// Repeat bind against a pool without multi-entitlement.
    pub const ALREADY_HAS_PRODUCT: &str = "rulefailed.consumer.already.has.product";
    /// Quantity above one against a pool without multi-entitlement.
    pub const MULTI_ENTITLEMENT_UNSUPPORTED: &str =
        "rulefailed.pool.does.not.support.multi-entitlement";
    /// Requested quantity exceeds remaining capacity.
    pub const NO_ENTITLEMENTS_AVAILABLE: &str = "rulefailed.no.entitlements.available";
    /// Quantity is not a multiple of the instance multiplier.
    pub const QUANTITY_MISMATCH: &str = "rulefailed.quantity.mismatch";
    /// Pool window has ended.
    pub const EXPIRED: &str = "subscription.expired";
    /// Pool window has not started.
    pub const NOT_STARTED: &str = "subscription.not.started";
    /// Product architecture does not cover the consumer.
    pub const ARCH_MISMATCH: &str = "rulewarning.architecture.mismatch";
    /// Product socket count is below the consumer's.
    pub const SOCKET_MISMATCH: &str = "rulewarning.unsupported.number.of.sockets";
    /// Product core count is below the consumer's.
    pub const CORE_MISMATCH: &str = "rulewarning.unsupported.number.of.cores";
    /// Product vCPU count is below the guest's.
    pub const VCPU_MISMATCH: &str = "rulewarning.unsupported.number.of.vcpus";
    /// Product RAM is below the consumer's.
    pub const RAM_MISMATCH: &str = "rulewarning.unsupported.ram";
    /// Manifest consumer lacks the cores capability (blocking).
    pub const CORES_UNSUPPORTED: &str = "rulefailed.cores.unsupported.by.consumer";
    /// Manifest consumer lacks the cores capability (advisory).
    pub const CORES_UNSUPPORTED_WARN: &str = "rulewarning.cores.unsupported.by.consumer";
    /// Manifest consumer lacks the ram capability (blocking).
    pub const RAM_UNSUPPORTED: &str = "rulefailed.ram.unsupported.by.consumer";
    /// Manifest consumer lacks the ram capability (advisory).
    pub const RAM_UNSUPPORTED_WARN: &str = "rulewarning.ram.unsupported.by.consumer";
    /// Manifest consumer lacks the instance multiplier capability (blocking).
    pub const INSTANCE_UNSUPPORTED: &str = "rulefailed.instance.unsupported.by.consumer";
    /// Manifest consumer lacks the instance multiplier capability (advisory).
    pub const INSTANCE_UNSUPPORTED_WARN: &str = "rulewarning.instance.unsupported.by.consumer";
    /// Manifest consumer lacks the derived product capability (blocking).
    pub const DERIVED_UNSUPPORTED: &str = "rulefailed.derivedproduct.unsupported.by.consumer";
    /// Manifest consumer lacks the derived product capability (advisory).
    pub const DERIVED_UNSUPPORTED_WARN: &str = "rulewarning.derivedproduct.unsupported.by.consumer";
}

/// Which engine entry point is asking, selecting the severity of
/// capability-gated checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallerType {
    /// An actual bind about to create entitlements.
    Bind,
    /// Autobind candidate evaluation.
    BestPools,
    /// Pool listing for display.
    ListPools,
    /// Unspecified caller.
    Unknown,
}

impl CallerType {
    /// Wire label for the caller type.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Bind => "bind",
            Self::BestPools => "best_pools",
            Self::ListPools => "list_pools",
            Self::Unknown => "unknown",
        }
    }
}

/// Severity of a reported entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Blocks the operation.
    Error,
    /// Informational; the operation proceeds.
    Warning,
}

/// Severity of capability-gated attribute checks for a caller type.
/// Consulted uniformly by every gated rule instead of branching per rule.
pub fn capability_gate_severity(caller: CallerType) -> Severity {
    match caller {
        CallerType::Bind | CallerType::BestPools => Severity::Error,
        CallerType::ListPools | CallerType::Unknown => Severity::Warning,
    }
}

/// A reason code plus positional parameters, rendered by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationMessage {
    /// Stable machine-readable reason code.
    pub key: String,
    /// Positional parameters for localized rendering.
    pub params: Vec<String>,
}

impl ValidationMessage {
    /// Create a message with no parameters.
    pub fn new(key: &str) -> Self {
        Self { key: key.to_string(), params: Vec::new() }
    }

    /// Create a message with positional parameters.
    pub fn with_params(key: &str, params: &[&str]) -> Self {
        Self {
            key: key.to_string(),
            params: params.iter().map(|p| p.to_string()).collect(),
        }
    }
}

/// Ordered accumulator of errors and warnings for one evaluation.
/// Successful iff no errors; warnings never block.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationResult {
    errors: Vec<ValidationMessage>,
    warnings: Vec<ValidationMessage>,
}

impl ValidationResult {
    /// Create an empty (successful) result.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an error. Duplicate keys for the same cause are suppressed.
    pub fn add_error(&mut self, key: &str) {
        self.push_error(ValidationMessage::new(key));
    }

    /// Record an error with parameters.
    pub fn add_error_with(&mut self, key: &str, params: &[&str]) {
        self.push_error(ValidationMessage::with_params(key, params));
    }

    /// Record a warning. Duplicate keys are suppressed.
    pub fn add_warning(&mut self, key: &str) {
        let message = ValidationMessage::new(key);
        if !self.warnings.iter().any(|w| w.key == message.key) {
            self.warnings.push(message);
        }
    }

    /// Record at the given severity.
    pub fn add_at(&mut self, severity: Severity, key: &str) {
        match severity {
            Severity::Error => self.add_error(key),
            Severity::Warning => self.add_warning(key),
        }
    }

    fn push_error(&mut self, message: ValidationMessage) {
        if !self.errors.iter().any(|e| e.key == message.key) {
            self.errors.push(message);
        }
    }

    /// Whether the evaluation passed (no errors).
    pub fn is_successful(&self) -> bool {
        self.errors.is_empty()
    }

    /// Whether any error was recorded.
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Whether any warning was recorded.
    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }

    /// Whether a specific error key was recorded.
    pub fn has_error(&self, key: &str) -> bool {
        self.errors.iter().any(|e| e.key == key)
    }

    /// Whether a specific warning key was recorded.
    pub fn has_warning(&self, key: &str) -> bool {
        self.warnings.iter().any(|w| w.key == key)
    }

    /// Recorded errors, in evaluation order.
    pub fn errors(&self) -> &[ValidationMessage] {
        &self.errors
    }

    /// Recorded warnings, in evaluation order.
    pub fn warnings(&self) -> &[ValidationMessage] {
        &self.warnings
    }
}
