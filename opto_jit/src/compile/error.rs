//! Compile-fatal failures.

use thiserror::Error;

/// Why a compilation was abandoned.
///
/// Once recorded, the compile is *failing*: every later phase checks
/// [`Compile::failing`](super::Compile::failing) and does nothing, and the
/// driver falls back to a lower tier.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Bailout {
    /// The graph outgrew the configured node limit.
    #[error("out of nodes: {live} live nodes exceed the limit of {limit}")]
    NodeLimitExceeded { live: usize, limit: usize },
    /// A method handle resolved to a target whose signature does not
    /// match the call site.
    #[error("signature mismatch linking {callee} to {target}")]
    SignatureMismatch { callee: String, target: String },
    /// A structural invariant did not hold.
    #[error("invariant violated: {0}")]
    Invariant(String),
    #[error("{0}")]
    Other(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let b = Bailout::NodeLimitExceeded { live: 10, limit: 8 };
        assert_eq!(b.to_string(), "out of nodes: 10 live nodes exceed the limit of 8");
        let s = Bailout::SignatureMismatch {
            callee: "m1".into(),
            target: "m2".into(),
        };
        assert!(s.to_string().contains("m1"));
    }
}
