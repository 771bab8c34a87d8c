//! Granted Entitlements

use crate::pool::Pool;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A consumer's claim on a quantity of a pool.
///
/// Carries a full pool snapshot so stack computations are a pure
/// function of the entitlement set passed in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entitlement {
    /// Entitlement id.
    pub id: String,
    /// Consumer holding the entitlement.
    pub consumer_uuid: String,
    /// Snapshot of the pool consumed from.
    pub pool: Pool,
    /// Units consumed.
    pub quantity: i64,
    /// Creation time; drives oldest-first stack ordering.
    pub created: DateTime<Utc>,
}

impl Entitlement {
    /// Create an entitlement.
    pub fn new(id: &str, consumer_uuid: &str, pool: Pool, quantity: i64, created: DateTime<Utc>) -> Self {
        Self {
            id: id.to_string(),
            consumer_uuid: consumer_uuid.to_string(),
            pool,
            quantity,
            created,
        }
    }
}

/// Orders entitlements oldest-first, falling back to id so the order is
/// total even for same-instant grants.
pub fn sort_oldest_first(entitlements: &mut [Entitlement]) {
    entitlements.sort_by(|a, b| a.created.cmp(&b.created).then_with(|| a.id.cmp(&b.id)));
}
