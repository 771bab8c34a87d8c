//! Consumers of Entitlements
//!
//! A consumer is anything that binds against pools: a physical system, a
//! hypervisor, a person, or a downstream distributor importing a manifest.

use crate::facts;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

/// Hours after registration during which a guest counts as newborn.
pub const NEWBORN_GRACE_HOURS: i64 = 24;

/// Consumer type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConsumerType {
    /// A physical or virtual machine.
    System,
    /// A virtualization host.
    Hypervisor,
    /// A person, for person-restricted subscriptions.
    Person,
    /// A downstream server consuming via manifest export.
    Distributor,
}

impl ConsumerType {
    /// Label used in `requires_consumer_type` attribute values.
    pub fn label(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::Hypervisor => "hypervisor",
            Self::Person => "person",
            Self::Distributor => "distributor",
        }
    }

    /// Whether the type consumes through manifest export.
    pub fn is_manifest(&self) -> bool {
        matches!(self, Self::Distributor)
    }
}

/// A guest registered against a hypervisor consumer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuestId {
    /// Guest virt UUID.
    pub guest_id: String,
    /// Whether the guest is currently active.
    pub active: bool,
}

/// A consumer snapshot, fully materialized before any engine call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Consumer {
    /// Consumer UUID.
    pub uuid: String,
    /// Registering username, if any.
    pub username: Option<String>,
    /// Consumer type.
    pub consumer_type: ConsumerType,
    /// Fact map reported by the consumer.
    pub facts: HashMap<String, String>,
    /// Declared feature-support capabilities.
    pub capabilities: HashSet<String>,
    /// Requested service level.
    pub service_level: Option<String>,
    /// Installed (engineering) product ids.
    pub installed_product_ids: Vec<String>,
    /// Guests reported by a hypervisor.
    pub guest_ids: Vec<GuestId>,
    /// Registration time.
    pub created: DateTime<Utc>,
}

impl Consumer {
    /// Create a consumer registered at `created`.
    pub fn new(consumer_type: ConsumerType, created: DateTime<Utc>) -> Self {
        Self {
            uuid: Uuid::new_v4().to_string(),
            username: None,
            consumer_type,
            facts: HashMap::new(),
            capabilities: HashSet::new(),
            service_level: None,
            installed_product_ids: Vec::new(),
            guest_ids: Vec::new(),
            created,
        }
    }

    /// Set a fact, replacing any previous value.
    pub fn set_fact(&mut self, name: &str, value: &str) {
        self.facts.insert(name.to_string(), value.to_string());
    }

    /// Look up a fact value.
    pub fn fact(&self, name: &str) -> Option<&str> {
        self.facts.get(name).map(String::as_str)
    }

    /// Whether the consumer imports via manifest.
    pub fn is_manifest(&self) -> bool {
        self.consumer_type.is_manifest()
    }

    /// Whether the consumer reports itself as a virtual guest.
    pub fn is_guest(&self) -> bool {
        self.fact(facts::IS_VIRT_GUEST)
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false)
    }

    /// Whether the consumer declared support for the given feature.
    pub fn has_capability(&self, name: &str) -> bool {
        self.capabilities.contains(name)
    }

    /// Whether the consumer registered within the newborn grace window.
    pub fn is_newborn(&self, now: DateTime<Utc>) -> bool {
        now - self.created < Duration::hours(NEWBORN_GRACE_HOURS)
    }

    /// Count of guests currently reported active.
    pub fn active_guest_count(&self) -> i64 {
        self.guest_ids.iter().filter(|g| g.active).count() as i64
    }
}
