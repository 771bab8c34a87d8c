//! Entitlement Enforcer
//!
//! Pre-entitlement validation for bind requests, listing filters,
//! quantity-change checks, and the post-entitlement/post-unbind pool
//! side effects driven by `virt_limit`.
//!
//! The enforcer is stateless across calls; everything it consults is
//! passed in, so concurrent evaluations for different consumers are
//! independent.

use crate::config::EngineConfig;
use crate::helper::PoolHelper;
use crate::rules::{default_rules, Rule, RuleContext};
use crate::validation::{keys, CallerType, ValidationResult};
use chrono::{DateTime, Utc};
use entitle_model::attrs::{self, VirtLimit};
use entitle_model::{Consumer, Entitlement, Pool};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::{debug, trace};

/// A pool paired with a requested quantity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolQuantity {
    /// The pool.
    pub pool: Pool,
    /// Requested units.
    pub quantity: i64,
}

impl PoolQuantity {
    /// Pair a pool with a quantity.
    pub fn new(pool: Pool, quantity: i64) -> Self {
        Self { pool, quantity }
    }
}

/// Validates binds and applies pool side effects.
pub struct Enforcer {
    config: EngineConfig,
    rules: Vec<Box<dyn Rule>>,
}

impl Enforcer {
    /// Create an enforcer with the standard rule set.
    pub fn new(config: EngineConfig) -> Self {
        Self { config, rules: default_rules() }
    }

    /// Validate one bind request. Violations are reported in the result,
    /// never as errors.
    #[allow(clippy::too_many_arguments)]
    pub fn pre_entitlement(
        &self,
        consumer: &Consumer,
        host: Option<&Consumer>,
        consumer_entitlements: &[Entitlement],
        pool: &Pool,
        quantity: i64,
        caller: CallerType,
        now: DateTime<Utc>,
    ) -> ValidationResult {
        let mut result = ValidationResult::new();
        let ctx = RuleContext {
            consumer,
            host,
            consumer_entitlements,
            pool,
            quantity,
            caller,
            now,
        };

        for rule in &self.rules {
            let fires = rule
                .gating_attribute()
                .map(|attr| pool.has_attribute(attr))
                .unwrap_or(true);
            if fires {
                rule.evaluate(&ctx, &mut result);
            } else {
                trace!(rule = rule.name(), pool = %pool.id, "rule not applicable");
            }
        }

        self.finish_validation(&mut result, pool, quantity, caller, now);
        result
    }

    /// Validate a batch of bind requests. Each pool is evaluated
    /// independently; stacking compatibility is the selector's concern.
    pub fn pre_entitlement_batch(
        &self,
        consumer: &Consumer,
        host: Option<&Consumer>,
        consumer_entitlements: &[Entitlement],
        requests: &[PoolQuantity],
        caller: CallerType,
        now: DateTime<Utc>,
    ) -> HashMap<String, ValidationResult> {
        requests
            .iter()
            .map(|request| {
                let result = self.pre_entitlement(
                    consumer,
                    host,
                    consumer_entitlements,
                    &request.pool,
                    request.quantity,
                    caller,
                    now,
                );
                (request.pool.id.clone(), result)
            })
            .collect()
    }

    /// Keep the pools a consumer could actually use. Pools with errors
    /// are always dropped; pools with warnings are kept only when
    /// `show_all` is set.
    pub fn filter_pools(
        &self,
        consumer: &Consumer,
        host: Option<&Consumer>,
        consumer_entitlements: &[Entitlement],
        pools: &[Pool],
        show_all: bool,
        now: DateTime<Utc>,
    ) -> Vec<Pool> {
        pools
            .iter()
            .filter(|pool| {
                let result = self.pre_entitlement(
                    consumer,
                    host,
                    consumer_entitlements,
                    pool,
                    1,
                    CallerType::ListPools,
                    now,
                );
                let keep = result.is_successful() && (!result.has_warnings() || show_all);
                if !keep {
                    debug!(pool = %pool.id, "omitting pool due to failed rules");
                }
                keep
            })
            .cloned()
            .collect()
    }

    /// Validate a quantity change on an existing entitlement.
    pub fn update(
        &self,
        consumer: &Consumer,
        entitlement: &Entitlement,
        change: i64,
        now: DateTime<Utc>,
    ) -> ValidationResult {
        let mut result = ValidationResult::new();
        let pool = &entitlement.pool;

        if !consumer.is_manifest() {
            if !pool.is_multi_entitlement() && entitlement.quantity + change > 1 {
                result.add_error(keys::MULTI_ENTITLEMENT_UNSUPPORTED);
            }

            if !consumer.is_guest() {
                let multiplier = pool.instance_multiplier();
                if multiplier > 1 && (entitlement.quantity + change) % multiplier != 0 {
                    result.add_error(keys::QUANTITY_MISMATCH);
                }
            }
        }

        self.finish_validation(&mut result, pool, change, CallerType::Unknown, now);
        result
    }

    /// Capacity and window checks applied to every evaluation.
    fn finish_validation(
        &self,
        result: &mut ValidationResult,
        pool: &Pool,
        quantity: i64,
        caller: CallerType,
        now: DateTime<Utc>,
    ) {
        if !pool.entitlements_available(quantity) {
            result.add_error(keys::NO_ENTITLEMENTS_AVAILABLE);
        }

        if pool.is_expired(now) {
            result.add_error_with(
                keys::EXPIRED,
                &[&pool.product_id, &pool.end_date.to_rfc3339()],
            );
        }

        // Binds against future pools are rejected except for temporary
        // unmapped-guest pools, which carry their own future-bind rule.
        if caller == CallerType::Bind &&
            !pool.has_started(now) &&
            !pool.attribute_is_true(attrs::UNMAPPED_GUESTS_ONLY)
        {
            result.add_error(keys::NOT_STARTED);
        }
    }

    /// Apply pool side effects after entitlements were created.
    ///
    /// The entitlement pool snapshots must reflect post-bind state, and
    /// the caller must hold locks on every pool the helper will touch.
    /// `sub_pools_for_stacks` lists stack sub-pools that already exist,
    /// so repeat binds into a stack do not create a second one.
    pub fn post_entitlement(
        &self,
        consumer: &Consumer,
        helper: &dyn PoolHelper,
        entitlements: &[Entitlement],
        sub_pools_for_stacks: &[Pool],
    ) {
        let virt_limited: Vec<(&Entitlement, HashMap<String, String>)> = entitlements
            .iter()
            .filter_map(|ent| {
                let flat = ent.pool.flattened_attributes();
                flat.contains_key(attrs::VIRT_LIMIT).then_some((ent, flat))
            })
            .collect();
        if virt_limited.is_empty() {
            return;
        }

        // Standalone manifest binds carry no bonus bookkeeping at all.
        if consumer.is_manifest() && self.config.standalone {
            return;
        }

        debug!(consumer = %consumer.uuid, "running virt_limit post-bind");

        let stacks_with_sub_pools: HashSet<&str> = sub_pools_for_stacks
            .iter()
            .filter_map(|p| p.source_stack_id.as_deref())
            .collect();
        let owns_guest_pools = !consumer.is_manifest() && !consumer.is_guest();
        let mut covered_stacks: HashSet<String> = HashSet::new();

        for (ent, flat) in &virt_limited {
            let host_limited =
                flat.get(attrs::HOST_LIMITED).map(|v| attrs::parse_bool(v)).unwrap_or(false);

            if owns_guest_pools && (self.config.standalone || host_limited) {
                // One sub-pool per stack; non-stacked pools derive one
                // per entitlement.
                if let Some(stack_id) = flat.get(attrs::STACKING_ID) {
                    if stacks_with_sub_pools.contains(stack_id.as_str()) ||
                        !covered_stacks.insert(stack_id.clone())
                    {
                        debug!(pool = %ent.pool.id, "stack already has a sub-pool");
                        continue;
                    }
                }

                let virt_limit =
                    match flat.get(attrs::VIRT_LIMIT).and_then(|v| attrs::parse_virt_limit(v)) {
                        Some(limit) => limit,
                        None => continue,
                    };
                let quantity = match virt_limit {
                    VirtLimit::Unlimited => -1,
                    VirtLimit::Limited(limit) => limit * ent.quantity,
                };
                helper.create_host_restricted_pool(&ent.pool, consumer, quantity);
            } else if consumer.is_manifest() && !self.config.standalone && !host_limited {
                // Exports drain the shared bonus pool.
                self.adjust_bonus_quantity(helper, ent, flat, BonusAdjust::Drain);
            }
        }
    }

    /// Reverse the bonus-pool effect of a removed entitlement.
    pub fn post_unbind(&self, consumer: &Consumer, helper: &dyn PoolHelper, entitlement: &Entitlement) {
        let flat = entitlement.pool.flattened_attributes();
        if !flat.contains_key(attrs::VIRT_LIMIT) {
            return;
        }

        let host_limited =
            flat.get(attrs::HOST_LIMITED).map(|v| attrs::parse_bool(v)).unwrap_or(false);

        if !self.config.standalone && !host_limited && consumer.is_manifest() {
            debug!(consumer = %consumer.uuid, "running virt_limit post-unbind");
            self.adjust_bonus_quantity(helper, entitlement, &flat, BonusAdjust::Restore);
        }
    }

    fn adjust_bonus_quantity(
        &self,
        helper: &dyn PoolHelper,
        entitlement: &Entitlement,
        flat: &HashMap<String, String>,
        direction: BonusAdjust,
    ) {
        let subscription_id = match entitlement.pool.subscription_id.as_deref() {
            Some(id) => id,
            None => return,
        };

        let virt_limit = match flat.get(attrs::VIRT_LIMIT).and_then(|v| attrs::parse_virt_limit(v)) {
            Some(limit) => limit,
            None => return,
        };

        match virt_limit {
            VirtLimit::Limited(limit) => {
                let magnitude = limit * entitlement.quantity;
                if magnitude == 0 {
                    return;
                }
                let delta = match direction {
                    BonusAdjust::Drain => -magnitude,
                    BonusAdjust::Restore => magnitude,
                };
                for pool in helper.pools_for_subscription(subscription_id) {
                    if pool.is_derived() {
                        debug!(pool = %pool.id, delta, "adjusting bonus pool quantity");
                        helper.update_pool_quantity(&pool.id, delta);
                    }
                }
            }
            VirtLimit::Unlimited => match direction {
                BonusAdjust::Drain => {
                    // An unlimited bonus pool only closes once the
                    // physical pool is exhausted by export; quantity 0
                    // blocks future binds where -1 would not.
                    if entitlement.pool.exported >= entitlement.pool.quantity {
                        for pool in helper.pools_for_subscription(subscription_id) {
                            if pool.is_derived() {
                                helper.set_pool_quantity(&pool.id, 0);
                            }
                        }
                    }
                }
                BonusAdjust::Restore => {
                    for pool in helper.pools_for_subscription(subscription_id) {
                        if pool.is_derived() && pool.quantity == 0 {
                            helper.set_pool_quantity(&pool.id, -1);
                        }
                    }
                }
            },
        }
    }
}

#[derive(Clone, Copy)]
enum BonusAdjust {
    Drain,
    Restore,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::helper::MemoryPoolService;
    use chrono::{Duration, TimeZone};
    use entitle_model::{ConsumerType, Product, Subscription};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap()
    }

    fn window() -> (DateTime<Utc>, DateTime<Utc>) {
        (
            Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
        )
    }

    fn pool_for(product: &Product, quantity: i64) -> Pool {
        let (start, end) = window();
        Pool::new("p1", product, quantity, start, end)
    }

    fn system() -> Consumer {
        let mut consumer = Consumer::new(ConsumerType::System, now() - Duration::days(30));
        consumer.set_fact(entitle_model::facts::SOCKETS, "4");
        consumer
    }

    fn guest() -> Consumer {
        let mut consumer = system();
        consumer.set_fact(entitle_model::facts::IS_VIRT_GUEST, "true");
        consumer.set_fact(entitle_model::facts::VIRT_UUID, "guest-uuid-1");
        consumer
    }

    fn distributor() -> Consumer {
        Consumer::new(ConsumerType::Distributor, now() - Duration::days(30))
    }

    fn enforcer() -> Enforcer {
        Enforcer::new(EngineConfig::hosted())
    }

    fn validate(consumer: &Consumer, pool: &Pool, quantity: i64, caller: CallerType) -> ValidationResult {
        enforcer().pre_entitlement(consumer, None, &[], pool, quantity, caller, now())
    }

    #[test]
    fn test_capacity_always_errors() {
        let product = Product::new("srv-100", "Server");
        let mut pool = pool_for(&product, 5);
        pool.consumed = 5;

        let result = validate(&system(), &pool, 1, CallerType::ListPools);
        assert!(result.has_error(keys::NO_ENTITLEMENTS_AVAILABLE));
        assert!(!result.has_warning(keys::NO_ENTITLEMENTS_AVAILABLE));

        // Unlimited pools are exempt.
        let product =
            Product::new("srv-100", "Server").with_attribute(attrs::MULTI_ENTITLEMENT, "yes");
        let mut pool = pool_for(&product, -1);
        pool.consumed = 5000;
        let result = validate(&system(), &pool, 100, CallerType::Bind);
        assert!(result.is_successful());
    }

    #[test]
    fn test_expired_pool_rejected() {
        let product = Product::new("srv-100", "Server");
        let mut pool = pool_for(&product, 5);
        pool.end_date = now() - Duration::days(1);

        let result = validate(&system(), &pool, 1, CallerType::Bind);
        assert!(result.has_error(keys::EXPIRED));
    }

    #[test]
    fn test_future_pool_rejected_only_at_bind() {
        let product = Product::new("srv-100", "Server");
        let mut pool = pool_for(&product, 5);
        pool.start_date = now() + Duration::days(10);

        assert!(validate(&system(), &pool, 1, CallerType::Bind).has_error(keys::NOT_STARTED));
        assert!(validate(&system(), &pool, 1, CallerType::ListPools).is_successful());
    }

    #[test]
    fn test_multi_entitlement_rules() {
        let product = Product::new("srv-100", "Server");
        let pool = pool_for(&product, 10);

        let result = validate(&system(), &pool, 2, CallerType::Bind);
        assert!(result.has_error(keys::MULTI_ENTITLEMENT_UNSUPPORTED));

        // Repeat bind against the same pool.
        let consumer = system();
        let existing =
            vec![Entitlement::new("e1", &consumer.uuid, pool.clone(), 1, now() - Duration::days(1))];
        let result =
            enforcer().pre_entitlement(&consumer, None, &existing, &pool, 1, CallerType::Bind, now());
        assert!(result.has_error(keys::ALREADY_HAS_PRODUCT));

        // Both are allowed once the product opts into multi-entitlement.
        let product = Product::new("srv-100", "Server").with_attribute(attrs::MULTI_ENTITLEMENT, "yes");
        let pool = pool_for(&product, 10);
        let result =
            enforcer().pre_entitlement(&consumer, None, &existing, &pool, 2, CallerType::Bind, now());
        assert!(result.is_successful());
    }

    #[test]
    fn test_person_consumer_needs_type_requirement() {
        let product = Product::new("srv-100", "Server");
        let pool = pool_for(&product, 10);
        let person = Consumer::new(ConsumerType::Person, now() - Duration::days(30));

        let result = validate(&person, &pool, 1, CallerType::Bind);
        assert!(result.has_error(keys::CONSUMER_TYPE_MISMATCH));

        let product = Product::new("srv-100", "Server")
            .with_attribute(attrs::REQUIRES_CONSUMER_TYPE, "person");
        let pool = pool_for(&product, 10);
        assert!(validate(&person, &pool, 1, CallerType::Bind).is_successful());

        // Hypervisors satisfy a system requirement.
        let product = Product::new("srv-100", "Server")
            .with_attribute(attrs::REQUIRES_CONSUMER_TYPE, "system");
        let pool = pool_for(&product, 10);
        let hypervisor = Consumer::new(ConsumerType::Hypervisor, now() - Duration::days(30));
        assert!(validate(&hypervisor, &pool, 1, CallerType::Bind).is_successful());
    }

    #[test]
    fn test_username_restriction() {
        let product = Product::new("srv-100", "Server");
        let mut pool = pool_for(&product, 10);
        pool.restricted_to_username = Some("alice".to_string());

        let mut consumer = system();
        consumer.username = Some("bob".to_string());
        let result = validate(&consumer, &pool, 1, CallerType::Bind);
        assert!(result.has_error(keys::USER_RESTRICTED));

        consumer.username = Some("alice".to_string());
        assert!(validate(&consumer, &pool, 1, CallerType::Bind).is_successful());
    }

    #[test]
    fn test_virt_only_severity_by_caller() {
        let product = Product::new("srv-100", "Server").with_attribute(attrs::VIRT_ONLY, "true");
        let pool = pool_for(&product, 10);

        let result = validate(&system(), &pool, 1, CallerType::Bind);
        assert!(result.has_error(keys::VIRT_ONLY));

        let result = validate(&system(), &pool, 1, CallerType::ListPools);
        assert!(result.is_successful());
        assert!(result.has_warning(keys::VIRT_ONLY_WARN));

        assert!(validate(&guest(), &pool, 1, CallerType::Bind).is_successful());
    }

    #[test]
    fn test_physical_only_warns_guests() {
        let product = Product::new("srv-100", "Server").with_attribute(attrs::PHYSICAL_ONLY, "true");
        let pool = pool_for(&product, 10);

        assert!(validate(&guest(), &pool, 1, CallerType::Bind).has_error(keys::PHYSICAL_ONLY));
        let listed = validate(&guest(), &pool, 1, CallerType::ListPools);
        assert!(listed.is_successful());
        assert!(listed.has_warning(keys::PHYSICAL_ONLY_WARN));

        assert!(validate(&system(), &pool, 1, CallerType::Bind).is_successful());
    }

    #[test]
    fn test_derived_pools_blocked_for_manifest() {
        let product = Product::new("srv-100", "Server").with_attribute(attrs::VIRT_ONLY, "true");
        let mut pool = pool_for(&product, 10);
        pool.set_attribute(attrs::POOL_DERIVED, "true");

        for caller in [CallerType::Bind, CallerType::BestPools, CallerType::ListPools] {
            let result = validate(&distributor(), &pool, 1, caller);
            assert!(result.has_error(keys::POOL_NOT_AVAILABLE_TO_MANIFEST));
        }

        let product = Product::new("srv-100", "Server")
            .with_attribute(attrs::REQUIRES_HOST, "host-uuid-9");
        let pool = pool_for(&product, 10);
        for caller in [CallerType::Bind, CallerType::BestPools, CallerType::ListPools] {
            let result = validate(&distributor(), &pool, 1, caller);
            assert!(result.has_error(keys::POOL_NOT_AVAILABLE_TO_MANIFEST));
        }
    }

    #[test]
    fn test_requires_host_matching() {
        let product = Product::new("srv-100", "Server")
            .with_attribute(attrs::REQUIRES_HOST, "host-uuid-9");
        let pool = pool_for(&product, 10);

        // Physical consumer has no virt uuid at all.
        let mut physical = system();
        physical.facts.remove(entitle_model::facts::VIRT_UUID);
        assert!(validate(&physical, &pool, 1, CallerType::Bind).has_error(keys::VIRT_ONLY));

        // Guest with no resolvable host.
        let result = enforcer().pre_entitlement(&guest(), None, &[], &pool, 1, CallerType::Bind, now());
        assert!(result.has_error(keys::HOST_MISMATCH));

        // Guest on the wrong host.
        let wrong_host = system();
        let result = enforcer()
            .pre_entitlement(&guest(), Some(&wrong_host), &[], &pool, 1, CallerType::Bind, now());
        assert!(result.has_error(keys::HOST_MISMATCH));

        // Guest on the recorded host.
        let mut host = system();
        host.uuid = "host-uuid-9".to_string();
        let result =
            enforcer().pre_entitlement(&guest(), Some(&host), &[], &pool, 1, CallerType::Bind, now());
        assert!(result.is_successful());
    }

    #[test]
    fn test_unmapped_guest_pool_rules() {
        let product = Product::new("srv-100", "Server")
            .with_attribute(attrs::VIRT_ONLY, "true")
            .with_attribute(attrs::UNMAPPED_GUESTS_ONLY, "true");
        let pool = pool_for(&product, 10);

        // Newborn hostless guest is the only eligible consumer.
        let mut newborn = guest();
        newborn.created = now() - Duration::hours(2);
        let result =
            enforcer().pre_entitlement(&newborn, None, &[], &pool, 1, CallerType::Bind, now());
        assert!(result.is_successful());

        // A resolved host disqualifies.
        let host = system();
        let result = enforcer()
            .pre_entitlement(&newborn, Some(&host), &[], &pool, 1, CallerType::Bind, now());
        assert!(result.has_error(keys::UNMAPPED_HAS_HOST));

        // So does age.
        let result =
            enforcer().pre_entitlement(&guest(), None, &[], &pool, 1, CallerType::Bind, now());
        assert!(result.has_error(keys::UNMAPPED_NOT_NEW));

        // Future pools cannot be bound, but may be listed.
        let mut future = pool.clone();
        future.start_date = now() + Duration::days(3);
        let result =
            enforcer().pre_entitlement(&newborn, None, &[], &future, 1, CallerType::Bind, now());
        assert!(result.has_error(keys::UNMAPPED_FUTURE_BIND));
        let result =
            enforcer().pre_entitlement(&newborn, None, &[], &future, 1, CallerType::ListPools, now());
        assert!(result.is_successful());
    }

    #[test]
    fn test_socket_mismatch_is_warning_and_zero_is_unknown() {
        let product = Product::new("srv-100", "Server").with_attribute(attrs::SOCKETS, "2");
        let pool = pool_for(&product, 10);

        let result = validate(&system(), &pool, 1, CallerType::Bind);
        assert!(result.is_successful());
        assert!(result.has_warning(keys::SOCKET_MISMATCH));

        // A reported socket count of zero is missing data, not zero.
        let mut consumer = system();
        consumer.set_fact(entitle_model::facts::SOCKETS, "0");
        let result = validate(&consumer, &pool, 1, CallerType::Bind);
        assert!(!result.has_warning(keys::SOCKET_MISMATCH));

        // Missing fact skips silently too.
        let mut consumer = system();
        consumer.facts.remove(entitle_model::facts::SOCKETS);
        let result = validate(&consumer, &pool, 1, CallerType::Bind);
        assert!(!result.has_warning(keys::SOCKET_MISMATCH));
    }

    #[test]
    fn test_stacked_pools_skip_socket_warning() {
        let product = Product::new("srv-100", "Server")
            .with_attribute(attrs::SOCKETS, "2")
            .with_attribute(attrs::STACKING_ID, "stack-1");
        let pool = pool_for(&product, 10);

        let result = validate(&system(), &pool, 1, CallerType::Bind);
        assert!(!result.has_warning(keys::SOCKET_MISMATCH));
    }

    #[test]
    fn test_ram_mismatch_rounds_to_gb() {
        let product = Product::new("srv-100", "Server").with_attribute(attrs::RAM, "4");
        let pool = pool_for(&product, 10);

        // 8 GB reported in KB against a 4 GB product.
        let mut consumer = system();
        consumer.set_fact(entitle_model::facts::MEMTOTAL, "8388608");
        let result = validate(&consumer, &pool, 1, CallerType::Bind);
        assert!(result.has_warning(keys::RAM_MISMATCH));

        // Exactly 4 GB is covered.
        consumer.set_fact(entitle_model::facts::MEMTOTAL, "4194304");
        let result = validate(&consumer, &pool, 1, CallerType::Bind);
        assert!(!result.has_warning(keys::RAM_MISMATCH));
    }

    #[test]
    fn test_capability_gates_for_manifest() {
        let product = Product::new("srv-100", "Server").with_attribute(attrs::CORES, "8");
        let pool = pool_for(&product, 10);

        let result = validate(&distributor(), &pool, 1, CallerType::Bind);
        assert!(result.has_error(keys::CORES_UNSUPPORTED));

        let result = validate(&distributor(), &pool, 1, CallerType::ListPools);
        assert!(result.is_successful());
        assert!(result.has_warning(keys::CORES_UNSUPPORTED_WARN));

        let mut capable = distributor();
        capable.capabilities.insert(attrs::CORES.to_string());
        assert!(validate(&capable, &pool, 1, CallerType::Bind).is_successful());
    }

    #[test]
    fn test_instance_multiplier_divisibility() {
        let product = Product::new("srv-100", "Server")
            .with_attribute(attrs::INSTANCE_MULTIPLIER, "2")
            .with_attribute(attrs::MULTI_ENTITLEMENT, "yes");
        let pool = pool_for(&product, 10);

        assert!(validate(&system(), &pool, 3, CallerType::Bind).has_error(keys::QUANTITY_MISMATCH));
        // Fires only on actual binds, and never for guests.
        assert!(!validate(&system(), &pool, 3, CallerType::BestPools).has_error(keys::QUANTITY_MISMATCH));
        assert!(validate(&guest(), &pool, 3, CallerType::Bind).is_successful());
        assert!(validate(&system(), &pool, 4, CallerType::Bind).is_successful());
    }

    #[test]
    fn test_batch_reports_each_pool_independently() {
        let good = Product::new("srv-100", "Server");
        let bad = Product::new("srv-200", "Server Virt").with_attribute(attrs::VIRT_ONLY, "true");
        let (start, end) = window();
        let requests = vec![
            PoolQuantity::new(Pool::new("a", &good, 10, start, end), 1),
            PoolQuantity::new(Pool::new("b", &bad, 10, start, end), 1),
        ];

        let results = enforcer().pre_entitlement_batch(
            &system(),
            None,
            &[],
            &requests,
            CallerType::Bind,
            now(),
        );
        assert!(results["a"].is_successful());
        assert!(results["b"].has_error(keys::VIRT_ONLY));
    }

    #[test]
    fn test_filter_pools_hides_warned_pools() {
        let plain = Product::new("srv-100", "Server");
        let small = Product::new("srv-200", "Server Small").with_attribute(attrs::SOCKETS, "2");
        let expired = Product::new("srv-300", "Server Old");
        let (start, end) = window();
        let mut expired_pool = Pool::new("c", &expired, 10, start, end);
        expired_pool.end_date = now() - Duration::days(1);
        let pools = vec![
            Pool::new("a", &plain, 10, start, end),
            Pool::new("b", &small, 10, start, end),
            expired_pool,
        ];

        let visible = enforcer().filter_pools(&system(), None, &[], &pools, false, now());
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].id, "a");

        let all = enforcer().filter_pools(&system(), None, &[], &pools, true, now());
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn test_update_validates_quantity_change() {
        let product = Product::new("srv-100", "Server")
            .with_attribute(attrs::MULTI_ENTITLEMENT, "yes")
            .with_attribute(attrs::INSTANCE_MULTIPLIER, "2");
        let pool = pool_for(&product, 10);
        let consumer = system();
        let ent = Entitlement::new("e1", &consumer.uuid, pool, 2, now() - Duration::days(1));

        assert!(enforcer().update(&consumer, &ent, 2, now()).is_successful());
        assert!(enforcer().update(&consumer, &ent, 1, now()).has_error(keys::QUANTITY_MISMATCH));
    }

    fn virt_limited_setup(virt_limit: &str) -> (Subscription, MemoryPoolService, Vec<Pool>) {
        let (start, end) = window();
        let product =
            Product::new("srv-100", "Server").with_attribute(attrs::VIRT_LIMIT, virt_limit);
        let sub = Subscription::new("sub-1", product, 10, start, end);
        let deriver = crate::derivation::PoolDeriver::new(EngineConfig::hosted());
        let pools = deriver.create_pools(&sub);
        let service = MemoryPoolService::new();
        for pool in &pools {
            service.insert(pool.clone());
        }
        (sub, service, pools)
    }

    #[test]
    fn test_system_bind_in_hosted_leaves_bonus_untouched() {
        let (_sub, service, pools) = virt_limited_setup("10");
        let bonus_id = pools[1].id.clone();
        assert_eq!(service.get(&bonus_id).unwrap().quantity, 100);

        let consumer = system();
        let mut master = pools[0].clone();
        master.consumed = 1;
        let ent = Entitlement::new("e1", &consumer.uuid, master, 1, now());

        enforcer().post_entitlement(&consumer, &service, std::slice::from_ref(&ent), &[]);
        assert_eq!(service.get(&bonus_id).unwrap().quantity, 100);
        // No host-restricted pool was created either.
        assert_eq!(service.all().len(), 2);
    }

    #[test]
    fn test_manifest_bind_drains_and_unbind_restores() {
        let (_sub, service, pools) = virt_limited_setup("10");
        let bonus_id = pools[1].id.clone();

        let consumer = distributor();
        let mut master = pools[0].clone();
        master.consumed = 3;
        master.exported = 3;
        let ent = Entitlement::new("e1", &consumer.uuid, master, 3, now());

        let enf = enforcer();
        enf.post_entitlement(&consumer, &service, std::slice::from_ref(&ent), &[]);
        assert_eq!(service.get(&bonus_id).unwrap().quantity, 70);

        enf.post_unbind(&consumer, &service, &ent);
        assert_eq!(service.get(&bonus_id).unwrap().quantity, 100);
    }

    #[test]
    fn test_unlimited_bonus_zeroed_only_on_exhaustion() {
        let (_sub, service, pools) = virt_limited_setup("unlimited");
        let bonus_id = pools[1].id.clone();
        assert_eq!(service.get(&bonus_id).unwrap().quantity, -1);

        let consumer = distributor();

        // Partial export leaves the unlimited pool alone.
        let mut master = pools[0].clone();
        master.consumed = 4;
        master.exported = 4;
        let ent = Entitlement::new("e1", &consumer.uuid, master.clone(), 4, now());
        let enf = enforcer();
        enf.post_entitlement(&consumer, &service, std::slice::from_ref(&ent), &[]);
        assert_eq!(service.get(&bonus_id).unwrap().quantity, -1);

        // Full export closes it.
        master.consumed = 10;
        master.exported = 10;
        let ent = Entitlement::new("e2", &consumer.uuid, master, 6, now());
        enf.post_entitlement(&consumer, &service, std::slice::from_ref(&ent), &[]);
        assert_eq!(service.get(&bonus_id).unwrap().quantity, 0);

        // Unbind restores unlimited.
        enf.post_unbind(&consumer, &service, &ent);
        assert_eq!(service.get(&bonus_id).unwrap().quantity, -1);
    }

    #[test]
    fn test_standalone_bind_creates_host_restricted_pool() {
        let (start, end) = window();
        let product = Product::new("srv-100", "Server")
            .with_attribute(attrs::VIRT_LIMIT, "4")
            .with_attribute(attrs::STACKING_ID, "stack-1");
        let sub = Subscription::new("sub-1", product, 10, start, end);
        let deriver = crate::derivation::PoolDeriver::new(EngineConfig::standalone());
        let pools = deriver.create_pools(&sub);
        let service = MemoryPoolService::new();
        for pool in &pools {
            service.insert(pool.clone());
        }

        let consumer = system();
        let ent = Entitlement::new("e1", &consumer.uuid, pools[0].clone(), 2, now());

        let enf = Enforcer::new(EngineConfig::standalone());
        enf.post_entitlement(&consumer, &service, std::slice::from_ref(&ent), &[]);

        let host_pool = service
            .all()
            .into_iter()
            .find(|p| p.attribute(attrs::REQUIRES_HOST).is_some())
            .expect("host-restricted pool created");
        assert_eq!(host_pool.quantity, 8);
        assert_eq!(host_pool.attribute(attrs::REQUIRES_HOST), Some(consumer.uuid.as_str()));

        // A second bind into the same stack does not create another one.
        let ent2 = Entitlement::new("e2", &consumer.uuid, pools[0].clone(), 2, now());
        let existing_sub_pools = vec![host_pool];
        enf.post_entitlement(&consumer, &service, std::slice::from_ref(&ent2), &existing_sub_pools);
        let host_pools = service
            .all()
            .into_iter()
            .filter(|p| p.attribute(attrs::REQUIRES_HOST).is_some())
            .count();
        assert_eq!(host_pools, 1);
    }

    #[test]
    fn test_guest_bind_never_derives_pools() {
        let (_sub, service, pools) = virt_limited_setup("10");
        let consumer = guest();
        let ent = Entitlement::new("e1", &consumer.uuid, pools[0].clone(), 1, now());

        let enf = Enforcer::new(EngineConfig::standalone());
        enf.post_entitlement(&consumer, &service, std::slice::from_ref(&ent), &[]);
        assert_eq!(service.all().len(), 2);
    }
}
