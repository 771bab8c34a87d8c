//! Engine Error Types

use thiserror::Error;

/// Fatal engine failures.
///
/// Policy violations never surface here; they are reported through
/// `ValidationResult`. These variants cover the cases where evaluation
/// itself cannot complete.
#[derive(Debug, Error)]
pub enum PolicyError {
    /// Autobind could not satisfy a mandatory product and no partial
    /// result was acceptable.
    #[error("rule execution failed: {0}")]
    RuleExecution(String),

    /// A product reference in the input could not be resolved.
    #[error("unresolvable product reference: {0}")]
    MissingProduct(String),
}
