//! Autobind Selector
//!
//! Given the products a consumer needs and the pools it could draw from,
//! picks the pool/quantity combination that covers the requirement with
//! the least waste. Candidates are grouped by stacking identifier, scored
//! with a balance heuristic that penalizes over-coverage harder than
//! entitlement count, and selected group by group until nothing needed
//! remains.

use crate::config::EngineConfig;
use crate::enforcer::{Enforcer, PoolQuantity};
use crate::error::PolicyError;
use crate::validation::CallerType;
use chrono::{DateTime, Utc};
use entitle_model::attrs;
use entitle_model::facts;
use entitle_model::{Consumer, ConsumerType, Entitlement, Pool};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Compliance snapshot supplied by the external compliance calculator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ComplianceStatus {
    /// Fully covered products, by product id.
    pub compliant_products: HashMap<String, Vec<Entitlement>>,
    /// Partially covered products, by product id.
    pub partially_compliant_products: HashMap<String, Vec<Entitlement>>,
    /// Partially covered stacks, by stack id.
    pub partial_stacks: HashMap<String, Vec<Entitlement>>,
}

impl ComplianceStatus {
    /// Create an empty snapshot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every distinct attached entitlement across the three maps.
    pub fn attached_entitlements(&self) -> Vec<Entitlement> {
        let mut seen = HashSet::new();
        let mut attached = Vec::new();
        for map in [
            &self.compliant_products,
            &self.partially_compliant_products,
            &self.partial_stacks,
        ] {
            for ents in map.values() {
                for ent in ents {
                    if seen.insert(ent.id.clone()) {
                        attached.push(ent.clone());
                    }
                }
            }
        }
        attached
    }
}

struct ScoredPool {
    pool: Pool,
    priority: f64,
}

struct EntitlementGroup {
    stack_id: Option<String>,
    pools: Vec<ScoredPool>,
}

impl EntitlementGroup {
    fn average_priority(&self) -> f64 {
        if self.pools.is_empty() {
            return 0.0;
        }
        self.pools.iter().map(|p| p.priority).sum::<f64>() / self.pools.len() as f64
    }

    fn earliest_end(&self) -> Option<DateTime<Utc>> {
        self.pools.iter().map(|p| p.pool.end_date).min()
    }

    fn covered_products(&self, needed: &HashSet<String>, consider_derived: bool) -> HashSet<String> {
        let mut covered = HashSet::new();
        for scored in &self.pools {
            for product_id in needed {
                let provides = if consider_derived && scored.pool.derived_product_id.is_some() {
                    scored.pool.provides_derived(product_id)
                } else {
                    scored.pool.provides(product_id)
                };
                if provides {
                    covered.insert(product_id.clone());
                }
            }
        }
        covered
    }
}

/// Attributes whose coverage drives quantity for the given consumer.
fn enforced_attributes(consumer: &Consumer) -> &'static [&'static str] {
    if consumer.is_guest() {
        &[attrs::VCPU, attrs::RAM]
    } else {
        &[attrs::SOCKETS, attrs::CORES, attrs::RAM]
    }
}

fn consumer_value(consumer: &Consumer, attr: &str) -> Option<i64> {
    match attr {
        attrs::SOCKETS => facts::sockets(consumer),
        attrs::CORES => facts::cores(consumer),
        attrs::RAM => facts::ram_gb(consumer),
        attrs::VCPU => facts::vcpus(consumer),
        _ => None,
    }
}

fn div_ceil(need: i64, per: i64) -> i64 {
    (need + per - 1) / per
}

fn round_up_to(value: i64, increment: i64) -> i64 {
    if increment <= 1 || value % increment == 0 {
        value
    } else {
        value + increment - value % increment
    }
}

/// Picks the best pools and quantities to satisfy a consumer's demand.
pub struct AutobindSelector {
    config: EngineConfig,
    enforcer: Enforcer,
}

impl AutobindSelector {
    /// Create a selector for the given deployment configuration.
    pub fn new(config: EngineConfig) -> Self {
        let enforcer = Enforcer::new(config.clone());
        Self { config, enforcer }
    }

    /// Select the pool/quantity combination covering `product_ids`.
    ///
    /// Returns `Ok(empty)` when nothing is needed, and a rule-execution
    /// error when a required product has no admissible coverage at all.
    /// `exempt_levels` augments the configured service-level exemptions;
    /// `consider_derived` scores pools by their derived (guest-facing)
    /// product sets, for host-autobind-on-behalf-of-guest flows.
    #[allow(clippy::too_many_arguments)]
    pub fn select_best_pools(
        &self,
        consumer: &Consumer,
        host: Option<&Consumer>,
        product_ids: &[&str],
        candidates: &[Pool],
        compliance: &ComplianceStatus,
        service_level_override: Option<&str>,
        exempt_levels: &HashSet<String>,
        consider_derived: bool,
        now: DateTime<Utc>,
    ) -> Result<Vec<PoolQuantity>, PolicyError> {
        let mut needed: HashSet<String> = product_ids
            .iter()
            .filter(|id| !compliance.compliant_products.contains_key(**id))
            .map(|id| id.to_string())
            .collect();

        if needed.is_empty() {
            debug!(consumer = %consumer.uuid, "nothing to cover");
            return Ok(Vec::new());
        }

        let attached = compliance.attached_entitlements();
        let admissible = self.admissible_pools(
            consumer,
            host,
            &attached,
            candidates,
            service_level_override,
            exempt_levels,
            now,
        );
        debug!(total = candidates.len(), admissible = admissible.len(), "filtered candidate pools");

        let mut groups = self.build_groups(consumer, admissible);

        // Groups failing the guest-limit gate are discarded, but the
        // products they would have covered turn into a hard failure if
        // nothing else covers them.
        let mut guest_limit_blocked: HashSet<String> = HashSet::new();
        groups.retain(|group| {
            if self.guest_limit_ok(group, consumer, &attached) {
                true
            } else {
                debug!(stack = ?group.stack_id, "group exceeds guest limit");
                guest_limit_blocked.extend(group.covered_products(&needed, consider_derived));
                false
            }
        });

        let mut selection: Vec<PoolQuantity> = Vec::new();
        let mut used = vec![false; groups.len()];

        // A partially covered stack must be extended before any new
        // stack is opened for the same products.
        for (idx, group) in groups.iter().enumerate() {
            let stack_id = match &group.stack_id {
                Some(id) => id,
                None => continue,
            };
            let stack_ents = match compliance.partial_stacks.get(stack_id) {
                Some(ents) => ents,
                None => continue,
            };
            let covered = group.covered_products(&needed, consider_derived);
            if covered.is_empty() {
                continue;
            }
            selection.extend(self.select_from_group(group, consumer, stack_ents));
            for product in covered {
                needed.remove(&product);
            }
            used[idx] = true;
        }

        while !needed.is_empty() {
            let best = groups
                .iter()
                .enumerate()
                .filter(|(idx, _)| !used[*idx])
                .filter_map(|(idx, group)| {
                    let covered = group.covered_products(&needed, consider_derived);
                    (!covered.is_empty()).then_some((idx, group, covered))
                })
                .max_by(|(_, a, ca), (_, b, cb)| {
                    // Higher priority, more coverage, fewer pools, and
                    // expiring first, in that order.
                    a.average_priority()
                        .partial_cmp(&b.average_priority())
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then_with(|| ca.len().cmp(&cb.len()))
                        .then_with(|| b.pools.len().cmp(&a.pools.len()))
                        .then_with(|| b.earliest_end().cmp(&a.earliest_end()))
                });

            match best {
                Some((idx, group, covered)) => {
                    selection.extend(self.select_from_group(group, consumer, &[]));
                    for product in covered {
                        needed.remove(&product);
                    }
                    used[idx] = true;
                }
                None => break,
            }
        }

        if !needed.is_empty() {
            if needed.iter().any(|p| guest_limit_blocked.contains(p)) {
                return Err(PolicyError::RuleExecution(
                    "guest limit exceeded with no covering hypervisor entitlement".to_string(),
                ));
            }
            if selection.is_empty() {
                let mut missing: Vec<&str> = needed.iter().map(String::as_str).collect();
                missing.sort_unstable();
                return Err(PolicyError::RuleExecution(format!(
                    "no valid pools available for: {}",
                    missing.join(", ")
                )));
            }
        }

        selection.sort_by(|a, b| a.pool.id.cmp(&b.pool.id));
        Ok(selection)
    }

    #[allow(clippy::too_many_arguments)]
    fn admissible_pools(
        &self,
        consumer: &Consumer,
        host: Option<&Consumer>,
        attached: &[Entitlement],
        candidates: &[Pool],
        service_level_override: Option<&str>,
        exempt_levels: &HashSet<String>,
        now: DateTime<Utc>,
    ) -> Vec<Pool> {
        let is_system = matches!(consumer.consumer_type, ConsumerType::System);
        candidates
            .iter()
            .filter(|pool| {
                let result = self.enforcer.pre_entitlement(
                    consumer,
                    host,
                    attached,
                    pool,
                    1,
                    CallerType::BestPools,
                    now,
                );
                if !result.is_successful() {
                    debug!(pool = %pool.id, "pool failed admissibility");
                    return false;
                }
                if !facts::arch_matches(
                    pool.product_attribute(attrs::ARCH),
                    facts::arch(consumer),
                    is_system,
                ) {
                    debug!(pool = %pool.id, "pool architecture does not match");
                    return false;
                }
                self.service_level_ok(consumer, pool, service_level_override, exempt_levels)
            })
            .cloned()
            .collect()
    }

    fn service_level_ok(
        &self,
        consumer: &Consumer,
        pool: &Pool,
        service_level_override: Option<&str>,
        exempt_levels: &HashSet<String>,
    ) -> bool {
        let effective = service_level_override
            .filter(|level| !level.is_empty())
            .or(consumer.service_level.as_deref())
            .filter(|level| !level.is_empty())
            .or(self.config.default_service_level.as_deref());
        let effective = match effective {
            Some(level) if !level.is_empty() => level,
            _ => return true,
        };

        let pool_level = match pool.product_attribute(attrs::SUPPORT_LEVEL) {
            Some(level) if !level.is_empty() => level,
            _ => return true,
        };

        pool.attribute_is_true(attrs::SUPPORT_LEVEL_EXEMPT) ||
            self.config.is_level_exempt(pool_level) ||
            exempt_levels.iter().any(|l| l.eq_ignore_ascii_case(pool_level)) ||
            pool_level.eq_ignore_ascii_case(effective)
    }

    fn build_groups(&self, consumer: &Consumer, pools: Vec<Pool>) -> Vec<EntitlementGroup> {
        let mut stacked: HashMap<String, Vec<ScoredPool>> = HashMap::new();
        let mut singles: Vec<EntitlementGroup> = Vec::new();

        for pool in pools {
            let priority = self.pool_priority(&pool, consumer);
            let scored = ScoredPool { pool, priority };
            match scored.pool.stack_id().map(str::to_string) {
                Some(stack_id) => stacked.entry(stack_id).or_default().push(scored),
                None => singles.push(EntitlementGroup { stack_id: None, pools: vec![scored] }),
            }
        }

        let mut groups: Vec<EntitlementGroup> = stacked
            .into_iter()
            .map(|(stack_id, pools)| EntitlementGroup { stack_id: Some(stack_id), pools })
            .chain(singles)
            .collect();

        // Priority-ordered pools within each group; expiring-first and
        // id break ties so selection is deterministic.
        for group in &mut groups {
            group.pools.sort_by(|a, b| {
                b.priority
                    .partial_cmp(&a.priority)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.pool.end_date.cmp(&b.pool.end_date))
                    .then_with(|| a.pool.id.cmp(&b.pool.id))
            });
        }
        groups.sort_by(|a, b| a.stack_id.cmp(&b.stack_id));
        groups
    }

    /// The balance heuristic. Each enforced attribute contributes
    /// `max(0, 10 - over_coverage - (required - 1) / 2) * 2` on top of a
    /// base of 100, so a wasted unit of capacity costs twice what half an
    /// extra entitlement does. Virt-only and host-restricted pools get
    /// flat bonuses so guests drain them before open pools.
    fn pool_priority(&self, pool: &Pool, consumer: &Consumer) -> f64 {
        let mut priority = 100.0;

        if pool.attribute_is_true(attrs::VIRT_ONLY) {
            priority += 100.0;
        }
        if pool.attribute(attrs::REQUIRES_HOST).is_some() {
            priority += 150.0;
        }

        for attr in enforced_attributes(consumer) {
            let consumer_val = consumer_value(consumer, attr);
            let pool_val = pool.product_attribute(attr).and_then(attrs::parse_positive);
            match (consumer_val, pool_val) {
                (Some(need), Some(per)) if need > 0 => {
                    let required = div_ceil(need, per);
                    let multi =
                        if *attr == attrs::SOCKETS { pool.instance_multiplier() } else { 1 };
                    let enough =
                        pool.is_unlimited() || pool.available() / multi >= required;
                    if enough {
                        let covered = per * required;
                        let over = (covered - need) as f64;
                        let count_penalty = (required - 1) as f64 / 2.0;
                        priority += (10.0 - over - count_penalty).max(0.0) * 2.0;
                    }
                }
                _ => priority += 20.0,
            }
        }

        debug!(pool = %pool.id, priority, "scored pool");
        priority
    }

    /// Quantities to take from a group, extending `existing` stack
    /// entitlements when the stack is already partially bound.
    fn select_from_group(
        &self,
        group: &EntitlementGroup,
        consumer: &Consumer,
        existing: &[Entitlement],
    ) -> Vec<PoolQuantity> {
        // Remaining per-attribute demand after existing stack coverage.
        let mut remaining: Vec<(&'static str, i64)> = enforced_attributes(consumer)
            .iter()
            .filter_map(|attr| {
                let need = consumer_value(consumer, attr)?;
                let already: i64 = existing
                    .iter()
                    .map(|ent| coverage_units(&ent.pool, consumer, attr, ent.quantity))
                    .sum();
                Some((*attr, need - already))
            })
            .collect();

        let mut picked = Vec::new();
        for scored in &group.pools {
            let pool = &scored.pool;
            if !picked.is_empty() && !remaining.iter().any(|(_, n)| *n > 0) {
                break;
            }

            let mut quantity = self.quantity_for(pool, consumer, &remaining);
            if !pool.is_multi_entitlement() {
                quantity = quantity.min(1);
            }
            if !pool.is_unlimited() {
                quantity = quantity.min(pool.available().max(0));
            }
            if quantity <= 0 {
                continue;
            }

            for (attr, need) in remaining.iter_mut() {
                *need -= coverage_units(pool, consumer, attr, quantity);
            }
            picked.push(PoolQuantity::new(pool.clone(), quantity));

            if !pool.is_stacked() {
                break;
            }
        }
        picked
    }

    fn quantity_for(&self, pool: &Pool, consumer: &Consumer, remaining: &[(&str, i64)]) -> i64 {
        let increment = if consumer.is_guest() { 1 } else { pool.instance_multiplier() };
        let mut required = 0;

        if pool.is_stacked() {
            for (attr, need) in remaining {
                if *need <= 0 {
                    continue;
                }
                let per = match pool.product_attribute(attr).and_then(attrs::parse_positive) {
                    Some(per) => per,
                    None => continue,
                };
                let count = div_ceil(*need, per);
                let quantity = if *attr == attrs::SOCKETS {
                    count * increment
                } else {
                    round_up_to(count, increment)
                };
                required = required.max(quantity);
            }
        }

        if required == 0 {
            required = increment;
        }
        required
    }

    fn guest_limit_ok(
        &self,
        group: &EntitlementGroup,
        consumer: &Consumer,
        attached: &[Entitlement],
    ) -> bool {
        let enforces = group
            .pools
            .iter()
            .any(|p| p.pool.product_attribute(attrs::GUEST_LIMIT).is_some());
        if !enforces {
            return true;
        }

        let active = consumer.active_guest_count();
        if active == 0 {
            return true;
        }

        // An attached entitlement with an unlimited guest limit covers
        // every guest on the system, unlocking guest-limited products
        // without binding the hypervisor product again.
        if attached.iter().any(|ent| {
            ent.pool.product_attribute(attrs::GUEST_LIMIT).and_then(attrs::parse_int) == Some(-1)
        }) {
            return true;
        }

        group.pools.iter().any(|scored| {
            match scored.pool.product_attribute(attrs::GUEST_LIMIT).and_then(attrs::parse_int) {
                Some(-1) => true,
                Some(limit) => limit >= active,
                None => true,
            }
        })
    }
}

/// Units of an attribute covered by `quantity` of a pool. Socket
/// coverage counts instances, so the quantity is divided back by the
/// instance multiplier.
fn coverage_units(pool: &Pool, consumer: &Consumer, attr: &str, quantity: i64) -> i64 {
    let per = match pool.product_attribute(attr).and_then(attrs::parse_positive) {
        Some(per) => per,
        None => return 0,
    };
    if attr == attrs::SOCKETS && !consumer.is_guest() {
        per * (quantity / pool.instance_multiplier())
    } else {
        per * quantity
    }
}
