//! Entitlement Policy Engine
//!
//! Decides whether a consumer may consume from a pool, derives the bonus
//! and host-restricted sub-pools that virtualization and stacking rules
//! produce, and picks the best pool/quantity combination to satisfy a
//! consumer's product demand.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        POLICY ENGINE                            │
//! │                                                                 │
//! │  bind request ──► ENFORCER ──► ValidationResult                 │
//! │                      │  (rule set: virt/physical/host/limits)   │
//! │                      ▼                                          │
//! │                 POOL DERIVATION ──► PoolUpdate / new pools      │
//! │                      ▲  (bonus, host-restricted, stack-derived) │
//! │                      │                                          │
//! │  auto-attach ──► AUTOBIND SELECTOR ──► Vec<PoolQuantity>        │
//! │                     (stack grouping + balance scoring)          │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The engine is pure: it performs no I/O, holds no state between calls,
//! and reports every write it wants through [`PoolHelper`]. Callers own
//! locking and transactions.

#![warn(missing_docs)]

pub mod autobind;
pub mod config;
pub mod derivation;
pub mod enforcer;
pub mod error;
pub mod helper;
pub mod rules;
pub mod validation;

pub use autobind::{AutobindSelector, ComplianceStatus};
pub use config::EngineConfig;
pub use derivation::{PoolDeriver, PoolUpdate};
pub use enforcer::{Enforcer, PoolQuantity};
pub use error::PolicyError;
pub use helper::{MemoryPoolService, PoolHelper};
pub use validation::{CallerType, ValidationResult};
