//! Product and Pool Attribute Catalog
//!
//! Attributes are opaque key/value pairs carried by products and pools and
//! interpreted by policy code. Every attribute the engine inspects has a
//! named constant here, and all value coercion goes through the helpers in
//! this module so malformed-value fallback lives in exactly one place.

/// Socket count covered by a single entitlement.
pub const SOCKETS: &str = "sockets";
/// Core count covered by a single entitlement.
pub const CORES: &str = "cores";
/// Virtual CPU count covered for guest consumers.
pub const VCPU: &str = "vcpu";
/// RAM in GB covered by a single entitlement.
pub const RAM: &str = "ram";
/// Comma-separated list of supported architectures.
pub const ARCH: &str = "arch";
/// Bind quantities must be a multiple of this value on physical systems.
pub const INSTANCE_MULTIPLIER: &str = "instance_multiplier";
/// Maximum number of active guests a stacked entitlement may cover.
pub const GUEST_LIMIT: &str = "guest_limit";
/// "yes" when a pool may be bound more than once / with quantity > 1.
pub const MULTI_ENTITLEMENT: &str = "multi-entitlement";
/// Identifier grouping entitlements into a stack.
pub const STACKING_ID: &str = "stacking_id";
/// "true" when only virtual guests may consume the pool.
pub const VIRT_ONLY: &str = "virt_only";
/// "true" when only physical systems should consume the pool.
pub const PHYSICAL_ONLY: &str = "physical_only";
/// Marks bonus/sub pools derived by policy rather than a subscription.
pub const POOL_DERIVED: &str = "pool_derived";
/// "true" when only newborn guests with no resolved host may consume.
pub const UNMAPPED_GUESTS_ONLY: &str = "unmapped_guests_only";
/// Restricts the pool to guests of a specific host consumer.
pub const REQUIRES_HOST: &str = "requires_host";
/// Restricts the pool to a single consumer UUID.
pub const REQUIRES_CONSUMER: &str = "requires_consumer";
/// Restricts the pool to a consumer type label.
pub const REQUIRES_CONSUMER_TYPE: &str = "requires_consumer_type";
/// Guests granted per consumed unit; numeric or "unlimited".
pub const VIRT_LIMIT: &str = "virt_limit";
/// "true" when bonus capacity is granted per-host instead of shared.
pub const HOST_LIMITED: &str = "host_limited";
/// Service level of the product ("Premium", "Standard", ...).
pub const SUPPORT_LEVEL: &str = "support_level";
/// "true" when the product's service level is exempt from level filtering.
pub const SUPPORT_LEVEL_EXEMPT: &str = "support_level_exempt";

/// Sentinel value for unbounded virtualization capacity.
pub const UNLIMITED: &str = "unlimited";

/// A parsed `virt_limit` attribute value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VirtLimit {
    /// Bonus capacity is unbounded.
    Unlimited,
    /// Bonus capacity is `n` per consumed unit.
    Limited(i64),
}

/// Parses a `virt_limit` value. Malformed and non-positive values are
/// treated as not set.
pub fn parse_virt_limit(value: &str) -> Option<VirtLimit> {
    if value.trim().eq_ignore_ascii_case(UNLIMITED) {
        return Some(VirtLimit::Unlimited);
    }
    parse_positive(value).map(VirtLimit::Limited)
}

/// Parses a counted attribute value.
///
/// Malformed values fall back to "no constraint" rather than failing the
/// evaluation, and a literal `0` means "unknown", not "zero".
pub fn parse_positive(value: &str) -> Option<i64> {
    match value.trim().parse::<i64>() {
        Ok(n) if n > 0 => Some(n),
        _ => None,
    }
}

/// Parses an integer attribute value, keeping negative sentinels such as
/// the `-1` used by `guest_limit` for "unlimited".
pub fn parse_int(value: &str) -> Option<i64> {
    value.trim().parse::<i64>().ok()
}

/// True for a case-insensitive `"true"`.
pub fn parse_bool(value: &str) -> bool {
    value.trim().eq_ignore_ascii_case("true")
}

/// Splits a comma-separated attribute value, tolerating whitespace and
/// empty segments.
pub fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}
