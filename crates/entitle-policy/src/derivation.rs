//! Pool Derivation Engine
//!
//! Creates master and bonus pools from subscriptions, refreshes them when
//! the subscription changes, and recomputes stack-derived sub-pools from
//! the set of entitlements currently stacked under an identifier.
//!
//! Every operation reports what it touched through [`PoolUpdate`] change
//! flags so callers can skip persistence and events for untouched fields.

use crate::config::EngineConfig;
use entitle_model::attrs::{self, VirtLimit};
use entitle_model::entitlement::sort_oldest_first;
use entitle_model::{Consumer, Entitlement, Pool, Subscription, SubscriptionSubKey};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};
use uuid::Uuid;

/// Which fields of a pool a derivation operation actually changed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PoolUpdate {
    /// Pool the update applies to.
    pub pool_id: String,
    /// Start or end date moved.
    pub dates_changed: bool,
    /// Quantity recomputed.
    pub quantity_changed: bool,
    /// Product identity or provided products replaced.
    pub products_changed: bool,
    /// Product attribute map replaced.
    pub product_attributes_changed: bool,
    /// Contract, account, or order number replaced.
    pub order_changed: bool,
    /// Pool should be removed by the caller.
    pub marked_for_delete: bool,
}

impl PoolUpdate {
    fn new(pool_id: &str) -> Self {
        Self { pool_id: pool_id.to_string(), ..Self::default() }
    }

    /// Whether anything changed at all.
    pub fn changed(&self) -> bool {
        self.dates_changed ||
            self.quantity_changed ||
            self.products_changed ||
            self.product_attributes_changed ||
            self.order_changed ||
            self.marked_for_delete
    }
}

/// Derives and refreshes pools from subscriptions and stacks.
pub struct PoolDeriver {
    config: EngineConfig,
}

impl PoolDeriver {
    /// Create a deriver for the given deployment configuration.
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    /// Create all pools a fresh subscription requires.
    pub fn create_pools(&self, sub: &Subscription) -> Vec<Pool> {
        self.create_pools_with_existing(sub, &[])
    }

    /// Create any pools still missing for a subscription. Attribute
    /// changes can require a bonus pool even when the master pool
    /// already exists, so the pre-existing pools are passed in.
    pub fn create_pools_with_existing(&self, sub: &Subscription, existing: &[Pool]) -> Vec<Pool> {
        let mut pools = Vec::new();
        let master_quantity = self.master_quantity(sub);

        debug!(subscription = %sub.id, "checking which pools need creation");

        if !has_subkey(existing, SubscriptionSubKey::Master) {
            pools.push(self.master_pool(sub, master_quantity));
        }

        if !has_subkey(existing, SubscriptionSubKey::Derived) {
            if let Some(bonus) = self.bonus_pool(sub, master_quantity) {
                pools.push(bonus);
            }
        }

        pools
    }

    /// Recompute a stack-derived sub-pool from the entitlements stacked
    /// under its identifier. The oldest surviving entitlement anchors
    /// product identity and order data; removing it shifts those fields
    /// to the next-oldest contributor.
    pub fn update_pool_from_stack(&self, pool: &mut Pool, stacked: &[Entitlement]) -> PoolUpdate {
        let mut update = PoolUpdate::new(&pool.id);
        if stacked.is_empty() {
            return update;
        }

        let mut ents = stacked.to_vec();
        sort_oldest_first(&mut ents);
        let eldest = &ents[0];

        // Quantity follows the eldest entitlement whose pool carries a
        // numeric virt_limit; unlimited contributors alone pin it to -1;
        // with no virt_limit in the stack the quantity is left alone.
        let first_numeric = ents.iter().find_map(|e| {
            match e.pool.product_attribute(attrs::VIRT_LIMIT).and_then(attrs::parse_virt_limit) {
                Some(VirtLimit::Limited(n)) => Some((e, n)),
                _ => None,
            }
        });
        let new_quantity = if let Some((ent, limit)) = first_numeric {
            Some(limit * ent.quantity)
        } else if ents.iter().any(|e| {
            e.pool.product_attribute(attrs::VIRT_LIMIT).and_then(attrs::parse_virt_limit) ==
                Some(VirtLimit::Unlimited)
        }) {
            Some(-1)
        } else {
            None
        };
        if let Some(quantity) = new_quantity {
            if quantity != pool.quantity {
                pool.quantity = quantity;
                update.quantity_changed = true;
            }
        }

        // Window spans all contributors.
        let start = ents.iter().map(|e| e.pool.start_date).min().unwrap_or(pool.start_date);
        let end = ents.iter().map(|e| e.pool.end_date).max().unwrap_or(pool.end_date);
        if start != pool.start_date || end != pool.end_date {
            pool.start_date = start;
            pool.end_date = end;
            update.dates_changed = true;
        }

        // Product identity from the eldest contributor, preferring its
        // derived product when it carries one.
        let eldest_pool = &eldest.pool;
        let (product_id, product_name) = match &eldest_pool.derived_product_id {
            Some(derived_id) => (
                derived_id.clone(),
                eldest_pool
                    .derived_product_name
                    .clone()
                    .unwrap_or_else(|| eldest_pool.product_name.clone()),
            ),
            None => (eldest_pool.product_id.clone(), eldest_pool.product_name.clone()),
        };

        let mut provided: HashSet<String> = HashSet::new();
        for ent in &ents {
            if ent.pool.derived_product_id.is_some() {
                provided.extend(ent.pool.derived_provided_ids.iter().cloned());
            } else {
                provided.extend(ent.pool.provided_ids.iter().cloned());
            }
        }

        if product_id != pool.product_id ||
            product_name != pool.product_name ||
            provided != pool.provided_ids
        {
            pool.product_id = product_id;
            pool.product_name = product_name;
            pool.provided_ids = provided;
            update.products_changed = true;
        }

        // Attributes union-merge across contributors; the earliest
        // contributor wins on conflicting keys.
        let mut merged: HashMap<String, String> = HashMap::new();
        for ent in &ents {
            for (key, value) in &ent.pool.product_attributes {
                merged.entry(key.clone()).or_insert_with(|| value.clone());
            }
        }
        if merged != pool.product_attributes {
            pool.product_attributes = merged;
            update.product_attributes_changed = true;
        }

        if eldest_pool.contract_number != pool.contract_number ||
            eldest_pool.account_number != pool.account_number ||
            eldest_pool.order_number != pool.order_number
        {
            pool.contract_number = eldest_pool.contract_number.clone();
            pool.account_number = eldest_pool.account_number.clone();
            pool.order_number = eldest_pool.order_number.clone();
            update.order_changed = true;
        }

        if update.changed() {
            debug!(pool = %pool.id, "stack recompute changed pool");
        }
        update
    }

    /// Refresh a subscription's existing pools after the subscription
    /// changed, returning an update per pool that needed one.
    pub fn update_pools(&self, sub: &Subscription, pools: &mut [Pool]) -> Vec<PoolUpdate> {
        let master_quantity = self.master_quantity(sub);
        // Bonus quantities in hosted mode shrink by what the master pool
        // has exported.
        let exported = pools.iter().find(|p| !p.is_derived()).map(|p| p.exported).unwrap_or(0);

        let mut updates = Vec::new();
        for pool in pools.iter_mut() {
            let mut update = PoolUpdate::new(&pool.id);

            if sub.start_date != pool.start_date || sub.end_date != pool.end_date {
                pool.start_date = sub.start_date;
                pool.end_date = sub.end_date;
                update.dates_changed = true;
            }

            let expected = self.expected_quantity(sub, pool, master_quantity, exported, &mut update);
            if expected != pool.quantity {
                pool.quantity = expected;
                update.quantity_changed = true;
            }

            self.refresh_products(sub, pool, &mut update);

            if sub.contract_number != pool.contract_number ||
                sub.account_number != pool.account_number ||
                sub.order_number != pool.order_number
            {
                pool.contract_number = sub.contract_number.clone();
                pool.account_number = sub.account_number.clone();
                pool.order_number = sub.order_number.clone();
                update.order_changed = true;
            }

            if update.changed() {
                updates.push(update);
            }
        }
        updates
    }

    fn expected_quantity(
        &self,
        sub: &Subscription,
        pool: &Pool,
        master_quantity: i64,
        exported: i64,
        update: &mut PoolUpdate,
    ) -> i64 {
        let is_bonus = pool.is_derived() && pool.attribute_is_true(attrs::VIRT_ONLY);
        if !is_bonus {
            return master_quantity;
        }

        let had_virt_limit = pool.product_attribute(attrs::VIRT_LIMIT).is_some() ||
            sub.product.has_attribute(attrs::VIRT_LIMIT);
        if !had_virt_limit {
            return master_quantity;
        }

        match sub.product.attribute(attrs::VIRT_LIMIT).and_then(attrs::parse_virt_limit) {
            None => {
                // virt_limit disappeared from the subscription; the bonus
                // pool has to go. Zero disables it for callers that do
                // not honor the delete flag.
                warn!(pool = %pool.id, "virt_limit removed from subscription, flagging bonus pool");
                update.marked_for_delete = true;
                0
            }
            Some(VirtLimit::Unlimited) => {
                // Zero only happens when export exhaustion forced it;
                // leave that in place.
                if pool.quantity == 0 {
                    0
                } else {
                    -1
                }
            }
            Some(VirtLimit::Limited(limit)) => {
                if self.config.standalone && !pool.attribute_is_true(attrs::UNMAPPED_GUESTS_ONLY) {
                    limit
                } else {
                    (master_quantity - exported) * limit
                }
            }
        }
    }

    fn refresh_products(&self, sub: &Subscription, pool: &mut Pool, update: &mut PoolUpdate) {
        if pool.marked_for_delete || update.marked_for_delete {
            return;
        }

        let (product, provided) = match &sub.derived_product {
            Some(derived) if pool.is_derived() => (derived, derived_provided_ids(sub)),
            _ => (&sub.product, sub.product.provided_ids.clone()),
        };

        if product.id != pool.product_id ||
            product.name != pool.product_name ||
            provided != pool.provided_ids
        {
            pool.product_id = product.id.clone();
            pool.product_name = product.name.clone();
            pool.provided_ids = provided;
            update.products_changed = true;
        }

        if product.attributes != pool.product_attributes {
            pool.product_attributes = product.attributes.clone();
            update.product_attributes_changed = true;
        }
    }

    fn master_pool(&self, sub: &Subscription, quantity: i64) -> Pool {
        let mut pool = Pool::new(
            &Uuid::new_v4().to_string(),
            &sub.product,
            quantity,
            sub.start_date,
            sub.end_date,
        );
        pool.subscription_id = Some(sub.id.clone());
        pool.subscription_subkey = Some(SubscriptionSubKey::Master);
        pool.contract_number = sub.contract_number.clone();
        pool.account_number = sub.account_number.clone();
        pool.order_number = sub.order_number.clone();
        if let Some(derived) = &sub.derived_product {
            pool.derived_product_id = Some(derived.id.clone());
            pool.derived_product_name = Some(derived.name.clone());
            pool.derived_provided_ids = derived_provided_ids(sub);
        }

        // Surface a product-level virt_only as an explicit pool attribute
        // so downstream consumers see it without flattening.
        if let Some(value) = sub.product.attribute(attrs::VIRT_ONLY) {
            if !value.is_empty() {
                pool.set_attribute(attrs::VIRT_ONLY, value);
            }
        }

        debug!(pool = %pool.id, subscription = %sub.id, "created master pool");
        pool
    }

    fn bonus_pool(&self, sub: &Subscription, master_quantity: i64) -> Option<Pool> {
        let virt_limit = sub.product.attribute(attrs::VIRT_LIMIT)?;
        let virt_limit = match attrs::parse_virt_limit(virt_limit) {
            Some(limit) => limit,
            None => {
                warn!(subscription = %sub.id, "invalid virt_limit attribute, skipping bonus pool");
                return None;
            }
        };

        let quantity = match virt_limit {
            VirtLimit::Unlimited => -1,
            VirtLimit::Limited(limit) => limit * master_quantity,
        };

        let host_limited = sub
            .product
            .attribute(attrs::HOST_LIMITED)
            .map(attrs::parse_bool)
            .unwrap_or(false);

        // Favor the derived product when the subscription carries one;
        // guests consuming the bonus pool get the guest-facing SKU.
        let sku = sub.derived_product.as_ref().unwrap_or(&sub.product);
        let mut pool =
            Pool::new(&Uuid::new_v4().to_string(), sku, quantity, sub.start_date, sub.end_date);
        if sub.derived_product.is_some() {
            pool.provided_ids = derived_provided_ids(sub);
            pool.derived_product_id = None;
            pool.derived_provided_ids = HashSet::new();
        }

        pool.set_attribute(attrs::VIRT_ONLY, "true");
        pool.set_attribute(attrs::POOL_DERIVED, "true");
        pool.set_attribute(attrs::PHYSICAL_ONLY, "false");
        // A bonus pool must never spawn bonus pools of its own.
        pool.set_attribute(attrs::VIRT_LIMIT, "0");
        if host_limited || self.config.standalone {
            pool.set_attribute(attrs::UNMAPPED_GUESTS_ONLY, "true");
        }

        pool.subscription_id = Some(sub.id.clone());
        pool.subscription_subkey = Some(SubscriptionSubKey::Derived);
        pool.contract_number = sub.contract_number.clone();
        pool.account_number = sub.account_number.clone();
        pool.order_number = sub.order_number.clone();

        debug!(pool = %pool.id, subscription = %sub.id, "created bonus pool");
        Some(pool)
    }

    fn master_quantity(&self, sub: &Subscription) -> i64 {
        if sub.quantity < 0 {
            return -1;
        }
        let mut quantity = sub.quantity * sub.product.multiplier.max(1);

        // Hosted catalogs pre-multiply instance-based quantities before
        // export; only multiply locally for directly sourced
        // subscriptions.
        if sub.upstream_pool_id.is_none() {
            if let Some(multiplier) = sub
                .product
                .attribute(attrs::INSTANCE_MULTIPLIER)
                .and_then(attrs::parse_positive)
            {
                quantity *= multiplier;
            }
        }
        quantity
    }
}

/// Union of the subscription's declared derived-provided sets.
fn derived_provided_ids(sub: &Subscription) -> HashSet<String> {
    let mut ids = sub.product.derived_provided_ids.clone();
    if let Some(derived) = &sub.derived_product {
        ids.extend(derived.provided_ids.iter().cloned());
    }
    ids
}

fn has_subkey(pools: &[Pool], subkey: SubscriptionSubKey) -> bool {
    pools.iter().any(|p| p.subscription_subkey == Some(subkey))
}

/// Builds the host-restricted sub-pool a standalone bind derives from a
/// virt-limited pool. Consumable only by guests of the binding host.
pub fn host_restricted_pool(source: &Pool, host: &Consumer, quantity: i64) -> Pool {
    let (product_id, product_name, provided) = match &source.derived_product_id {
        Some(derived_id) => (
            derived_id.clone(),
            source
                .derived_product_name
                .clone()
                .unwrap_or_else(|| source.product_name.clone()),
            source.derived_provided_ids.clone(),
        ),
        None => (source.product_id.clone(), source.product_name.clone(), source.provided_ids.clone()),
    };

    let mut pool = Pool {
        id: Uuid::new_v4().to_string(),
        product_id,
        product_name,
        quantity,
        consumed: 0,
        exported: 0,
        start_date: source.start_date,
        end_date: source.end_date,
        attributes: HashMap::new(),
        product_attributes: source.product_attributes.clone(),
        provided_ids: provided,
        derived_product_id: None,
        derived_product_name: None,
        derived_provided_ids: HashSet::new(),
        subscription_id: source.subscription_id.clone(),
        subscription_subkey: Some(SubscriptionSubKey::Derived),
        source_stack_id: source.stack_id().map(str::to_string),
        source_consumer: Some(host.uuid.clone()),
        restricted_to_username: None,
        contract_number: source.contract_number.clone(),
        account_number: source.account_number.clone(),
        order_number: source.order_number.clone(),
        marked_for_delete: false,
    };

    pool.set_attribute(attrs::REQUIRES_HOST, &host.uuid);
    pool.set_attribute(attrs::VIRT_ONLY, "true");
    pool.set_attribute(attrs::POOL_DERIVED, "true");
    pool.set_attribute(attrs::PHYSICAL_ONLY, "false");
    pool.set_attribute(attrs::VIRT_LIMIT, "0");
    pool
}
