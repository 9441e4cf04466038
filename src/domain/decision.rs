//! Outcome of gating a single attempt.

use std::time::SystemTime;

/// Decision made by the attempt gate for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    /// Within the free budget; nothing but the free counter changed.
    Allow,
    /// Free budget exhausted; a block window was opened and the failure
    /// tally advanced, but this request may still proceed.
    AllowAndRecordFailure,
    /// Locked out until `retry_not_before`.
    Deny {
        /// Earliest time the next attempt will be considered.
        retry_not_before: SystemTime,
    },
}

impl GateDecision {
    /// Whether the request may proceed.
    pub fn is_allowed(&self) -> bool {
        !self.is_denied()
    }

    /// Whether the request is locked out.
    pub fn is_denied(&self) -> bool {
        matches!(self, GateDecision::Deny { .. })
    }

    /// The retry time for a denial.
    pub fn retry_not_before(&self) -> Option<SystemTime> {
        match self {
            GateDecision::Deny { retry_not_before } => Some(*retry_not_before),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_predicates() {
        let at = SystemTime::UNIX_EPOCH + Duration::from_secs(10);

        assert!(GateDecision::Allow.is_allowed());
        assert!(GateDecision::AllowAndRecordFailure.is_allowed());
        assert!(GateDecision::Deny { retry_not_before: at }.is_denied());

        assert_eq!(GateDecision::Allow.retry_not_before(), None);
        assert_eq!(
            GateDecision::Deny { retry_not_before: at }.retry_not_before(),
            Some(at)
        );
    }
}
