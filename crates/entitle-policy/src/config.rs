//! Engine Configuration

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Deployment configuration the policy engine consults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    /// On-premise deployment. Standalone servers create host-restricted
    /// sub-pools at bind time; hosted servers maintain shared bonus pools.
    pub standalone: bool,
    /// Service level applied when the consumer requests none.
    pub default_service_level: Option<String>,
    /// Service levels exempt from service-level filtering.
    pub exempt_service_levels: HashSet<String>,
}

impl EngineConfig {
    /// Hosted-mode configuration.
    pub fn hosted() -> Self {
        Self::default()
    }

    /// Standalone (on-premise) configuration.
    pub fn standalone() -> Self {
        Self { standalone: true, ..Self::default() }
    }

    /// Whether a service level is exempt from filtering.
    pub fn is_level_exempt(&self, level: &str) -> bool {
        self.exempt_service_levels
            .iter()
            .any(|exempt| exempt.eq_ignore_ascii_case(level))
    }
}
