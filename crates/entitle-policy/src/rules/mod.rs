//! Pre-Entitlement Rule Set
//!
//! Each rule is an independent, order-insensitive check implementing
//! [`Rule`]. A rule only fires when its gating attribute is present on
//! the pool's flattened attributes; the global rule always fires.

mod global;
mod limits;
mod virt;

pub use global::GlobalRule;
pub use limits::{
    ArchitectureRule, CoresRule, InstanceMultiplierRule, RamRule, SocketsRule, VcpuRule,
};
pub use virt::{
    PhysicalOnlyRule, RequiresConsumerRule, RequiresConsumerTypeRule, RequiresHostRule,
    UnmappedGuestsOnlyRule, VirtOnlyRule,
};

use crate::validation::{CallerType, ValidationResult};
use chrono::{DateTime, Utc};
use entitle_model::{Consumer, Entitlement, Pool};

/// Everything a rule may consult. All state is passed in; rules hold
/// none of their own.
pub struct RuleContext<'a> {
    /// Consumer requesting the bind.
    pub consumer: &'a Consumer,
    /// Resolved host of a guest consumer, when one exists.
    pub host: Option<&'a Consumer>,
    /// The consumer's current entitlements.
    pub consumer_entitlements: &'a [Entitlement],
    /// Pool being evaluated.
    pub pool: &'a Pool,
    /// Requested quantity.
    pub quantity: i64,
    /// Entry point asking for the evaluation.
    pub caller: CallerType,
    /// Evaluation instant.
    pub now: DateTime<Utc>,
}

impl RuleContext<'_> {
    /// Whether the consumer already holds an entitlement to the pool.
    pub fn has_entitlement_to(&self, pool_id: &str) -> bool {
        self.consumer_entitlements.iter().any(|e| e.pool.id == pool_id)
    }
}

/// A single admissibility check.
pub trait Rule: Send + Sync {
    /// Rule name, for trace output.
    fn name(&self) -> &'static str;

    /// Attribute that must be present on the pool for the rule to fire;
    /// `None` fires unconditionally.
    fn gating_attribute(&self) -> Option<&'static str>;

    /// Evaluate the rule, reporting violations into `result`.
    fn evaluate(&self, ctx: &RuleContext<'_>, result: &mut ValidationResult);
}

/// The standard rule collection, in registration order. Evaluation
/// outcome does not depend on the order.
pub fn default_rules() -> Vec<Box<dyn Rule>> {
    vec![
        Box::new(GlobalRule),
        Box::new(ArchitectureRule),
        Box::new(SocketsRule),
        Box::new(RamRule),
        Box::new(CoresRule),
        Box::new(VcpuRule),
        Box::new(RequiresConsumerTypeRule),
        Box::new(VirtOnlyRule),
        Box::new(PhysicalOnlyRule),
        Box::new(RequiresHostRule),
        Box::new(RequiresConsumerRule),
        Box::new(InstanceMultiplierRule),
        Box::new(UnmappedGuestsOnlyRule),
    ]
}
