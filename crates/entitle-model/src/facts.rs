//! Consumer Fact Resolution
//!
//! Maps raw consumer facts to the calculated values policy comparisons
//! use. Resolution is pure and total: malformed facts resolve to `None`
//! and the corresponding check is skipped, never failed.

use crate::attrs;
use crate::consumer::Consumer;

/// Socket count fact.
pub const SOCKETS: &str = "cpu.cpu_socket(s)";
/// Cores-per-socket fact.
pub const CORES_PER_SOCKET: &str = "cpu.core(s)_per_socket";
/// Total memory fact, in KB.
pub const MEMTOTAL: &str = "memory.memtotal";
/// Machine architecture fact.
pub const ARCH: &str = "uname.machine";
/// "true" when the consumer is a virtual guest.
pub const IS_VIRT_GUEST: &str = "virt.is_guest";
/// Virtualization UUID of a guest, used for host resolution.
pub const VIRT_UUID: &str = "virt.uuid";

/// Resolved socket count. A reported count of `0` is treated as unknown
/// so it never produces a spurious mismatch.
pub fn sockets(consumer: &Consumer) -> Option<i64> {
    consumer.fact(SOCKETS).and_then(attrs::parse_positive)
}

/// Raw cores-per-socket value.
pub fn cores_per_socket(consumer: &Consumer) -> Option<i64> {
    consumer.fact(CORES_PER_SOCKET).and_then(attrs::parse_positive)
}

/// Total core count: cores-per-socket times sockets, assuming one socket
/// when the socket fact is unknown.
pub fn cores(consumer: &Consumer) -> Option<i64> {
    cores_per_socket(consumer).map(|cps| cps * sockets(consumer).unwrap_or(1))
}

/// Virtual CPU count as seen by a guest.
pub fn vcpus(consumer: &Consumer) -> Option<i64> {
    cores_per_socket(consumer)
}

/// Memory in whole GB, rounded to nearest from the KB fact.
pub fn ram_gb(consumer: &Consumer) -> Option<i64> {
    let kb = consumer.fact(MEMTOTAL)?.trim().parse::<f64>().ok()?;
    if kb <= 0.0 {
        return None;
    }
    Some((kb / 1024.0 / 1024.0).round() as i64)
}

/// Machine architecture.
pub fn arch(consumer: &Consumer) -> Option<&str> {
    consumer.fact(ARCH)
}

/// Matches a product architecture list against a consumer architecture.
///
/// The list is comma-separated and case-insensitive. `ALL` matches
/// anything, and `x86` is an alias for the i386/i586/i686 variants.
/// Non-system consumers with no architecture fact pass unconditionally.
pub fn arch_matches(product_arch: Option<&str>, consumer_arch: Option<&str>, is_system: bool) -> bool {
    if consumer_arch.is_none() && !is_system {
        return true;
    }

    let product_arch = match product_arch {
        Some(value) => value,
        None => return true,
    };

    let mut supported: Vec<String> = attrs::split_list(product_arch)
        .into_iter()
        .map(|a| a.to_uppercase())
        .collect();

    if supported.iter().any(|a| a == "X86") {
        supported.push("I386".to_string());
        supported.push("I586".to_string());
        supported.push("I686".to_string());
    }

    if supported.iter().any(|a| a == "ALL") {
        return true;
    }

    match consumer_arch {
        Some(arch) => supported.iter().any(|a| *a == arch.to_uppercase()),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consumer::ConsumerType;
    use chrono::{TimeZone, Utc};

    fn consumer_with(facts: &[(&str, &str)]) -> Consumer {
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        let mut consumer = Consumer::new(ConsumerType::System, now);
        for (name, value) in facts {
            consumer.set_fact(name, value);
        }
        consumer
    }

    #[test]
    fn test_zero_sockets_resolve_as_unknown() {
        assert_eq!(sockets(&consumer_with(&[(SOCKETS, "0")])), None);
        assert_eq!(sockets(&consumer_with(&[(SOCKETS, "4")])), Some(4));
        assert_eq!(sockets(&consumer_with(&[])), None);
        assert_eq!(sockets(&consumer_with(&[(SOCKETS, "several")])), None);
    }

    #[test]
    fn test_cores_multiply_sockets() {
        let consumer = consumer_with(&[(SOCKETS, "4"), (CORES_PER_SOCKET, "4")]);
        assert_eq!(cores(&consumer), Some(16));

        // Unknown socket count assumes a single socket.
        let consumer = consumer_with(&[(CORES_PER_SOCKET, "8")]);
        assert_eq!(cores(&consumer), Some(8));
    }

    #[test]
    fn test_ram_rounds_to_nearest_gb() {
        // 8388608 KB = exactly 8 GB
        let consumer = consumer_with(&[(MEMTOTAL, "8388608")]);
        assert_eq!(ram_gb(&consumer), Some(8));

        // Slightly over 1 GB rounds down to 1.
        let consumer = consumer_with(&[(MEMTOTAL, "1100000")]);
        assert_eq!(ram_gb(&consumer), Some(1));

        let consumer = consumer_with(&[(MEMTOTAL, "lots")]);
        assert_eq!(ram_gb(&consumer), None);
    }

    #[test]
    fn test_arch_matching() {
        assert!(arch_matches(Some("x86_64"), Some("x86_64"), true));
        assert!(arch_matches(Some("X86_64,ppc64"), Some("ppc64"), true));
        assert!(!arch_matches(Some("x86_64"), Some("s390x"), true));

        // ALL wildcard and missing product arch both pass.
        assert!(arch_matches(Some("ALL"), Some("s390x"), true));
        assert!(arch_matches(None, Some("s390x"), true));

        // x86 alias covers the i?86 variants but not x86_64.
        assert!(arch_matches(Some("x86"), Some("i586"), true));
        assert!(arch_matches(Some("x86"), Some("i686"), true));
        assert!(!arch_matches(Some("x86"), Some("x86_64"), true));

        // Non-system consumers without an arch fact always pass.
        assert!(arch_matches(Some("x86_64"), None, false));
        assert!(!arch_matches(Some("x86_64"), None, true));
    }
}
