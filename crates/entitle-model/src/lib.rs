//! Subscription Entitlement Domain Model
//!
//! Products carry free-form attributes; pools hold a consumable quantity
//! of a product over a time window; consumers report facts and
//! capabilities; entitlements link the two. This crate is the leaf
//! dependency of the policy engine: plain data, attribute/fact
//! resolution, no policy decisions.
//!
//! Shared object graphs are avoided on purpose. Pools snapshot their
//! product's attributes at creation, and entitlements snapshot their
//! pool, so every policy evaluation is a pure function of the values
//! passed in.

#![warn(missing_docs)]

pub mod attrs;
pub mod consumer;
pub mod entitlement;
pub mod facts;
pub mod pool;
pub mod product;
pub mod subscription;

pub use consumer::{Consumer, ConsumerType, GuestId};
pub use entitlement::Entitlement;
pub use pool::{Pool, SubscriptionSubKey};
pub use product::Product;
pub use subscription::Subscription;
