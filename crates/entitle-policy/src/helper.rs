//! Pool Write Contract
//!
//! The engine decides what to write but never performs the write itself.
//! Side-effecting operations go through [`PoolHelper`], implemented by
//! the persistence layer; [`MemoryPoolService`] is the in-memory
//! reference implementation used in tests and embeddable by callers.

use crate::derivation;
use entitle_model::{Consumer, Pool};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Narrow write contract back into the pool store.
pub trait PoolHelper {
    /// Persist a newly derived pool.
    fn create_pool(&self, pool: Pool);

    /// All pools created from the given subscription.
    fn pools_for_subscription(&self, subscription_id: &str) -> Vec<Pool>;

    /// Adjust a pool's quantity by a signed delta.
    fn update_pool_quantity(&self, pool_id: &str, delta: i64);

    /// Set a pool's quantity to an absolute value.
    fn set_pool_quantity(&self, pool_id: &str, quantity: i64);

    /// Derive and persist a host-restricted sub-pool from a bound pool.
    fn create_host_restricted_pool(&self, source: &Pool, host: &Consumer, quantity: i64) -> Pool {
        let pool = derivation::host_restricted_pool(source, host, quantity);
        self.create_pool(pool.clone());
        pool
    }
}

/// In-memory pool store.
#[derive(Clone, Default)]
pub struct MemoryPoolService {
    pools: Arc<RwLock<HashMap<String, Pool>>>,
}

impl MemoryPoolService {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a pool.
    pub fn insert(&self, pool: Pool) {
        self.pools.write().insert(pool.id.clone(), pool);
    }

    /// Fetch a pool by id.
    pub fn get(&self, pool_id: &str) -> Option<Pool> {
        self.pools.read().get(pool_id).cloned()
    }

    /// All stored pools.
    pub fn all(&self) -> Vec<Pool> {
        self.pools.read().values().cloned().collect()
    }
}

impl PoolHelper for MemoryPoolService {
    fn create_pool(&self, pool: Pool) {
        self.insert(pool);
    }

    fn pools_for_subscription(&self, subscription_id: &str) -> Vec<Pool> {
        self.pools
            .read()
            .values()
            .filter(|p| p.subscription_id.as_deref() == Some(subscription_id))
            .cloned()
            .collect()
    }

    fn update_pool_quantity(&self, pool_id: &str, delta: i64) {
        if let Some(pool) = self.pools.write().get_mut(pool_id) {
            pool.quantity += delta;
        }
    }

    fn set_pool_quantity(&self, pool_id: &str, quantity: i64) {
        if let Some(pool) = self.pools.write().get_mut(pool_id) {
            pool.quantity = quantity;
        }
    }
}
