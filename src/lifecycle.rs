//! Lifecycle enforcement.
//!
//! Pure decision logic over a contract snapshot: whether a transfer is
//! admissible and whether an expiration burn has to be confirmed first.
//! Performs no I/O; the orchestrator supplies the snapshot.

use crate::error::ContractReason;
use crate::types::{Account, ContractState};

/// Inputs to a lifecycle decision.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LifecycleSnapshot {
    pub now: u64,
    pub expiration_time: u64,
    pub current_supply: u128,
    pub requester_balance: u128,
    pub requester_limit: u128,
    pub requested_amount: u128,
}

impl LifecycleSnapshot {
    /// Project a contract snapshot onto `requester`.
    pub fn from_state(state: &ContractState, requester: &Account, requested_amount: u128) -> Self {
        Self {
            now: state.now,
            expiration_time: state.expiration_time,
            current_supply: state.total_supply,
            requester_balance: state.balance_of(requester),
            requester_limit: state.limit_of(requester),
            requested_amount,
        }
    }
}

/// Outcome of a lifecycle decision.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Decision {
    /// Nothing to do (zero-amount request).
    NoAction,
    /// Burn must be confirmed before the transfer is built.
    BurnThenTransfer,
    TransferOnly,
    Reject(ContractReason),
}

/// Stateless lifecycle rules.
#[derive(Clone, Copy, Debug, Default)]
pub struct LifecycleEnforcer;

impl LifecycleEnforcer {
    pub fn new() -> Self {
        Self
    }

    /// Decide how a transfer request proceeds.
    ///
    /// Rules apply in order: a burned supply rejects any positive amount;
    /// expiration forces a burn first (post-burn balances are zero, so a
    /// transfer built against the stale snapshot would fail on submission);
    /// otherwise balance and then license limit must cover the amount.
    pub fn decide(&self, s: &LifecycleSnapshot) -> Decision {
        if s.current_supply == 0 && s.requested_amount > 0 {
            return Decision::Reject(ContractReason::AlreadyBurned);
        }
        if s.now >= s.expiration_time {
            return Decision::BurnThenTransfer;
        }
        self.admit(s)
    }

    /// Admission check on a snapshot re-queried after a confirmed burn.
    ///
    /// Never requests another burn.
    pub fn decide_after_burn(&self, s: &LifecycleSnapshot) -> Decision {
        self.admit(s)
    }

    fn admit(&self, s: &LifecycleSnapshot) -> Decision {
        if s.requested_amount > s.requester_balance {
            return Decision::Reject(ContractReason::InsufficientBalance);
        }
        if s.requested_amount > s.requester_limit {
            return Decision::Reject(ContractReason::ExceedsLicense);
        }
        if s.requested_amount == 0 {
            return Decision::NoAction;
        }
        Decision::TransferOnly
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> LifecycleSnapshot {
        LifecycleSnapshot {
            now: 1_000,
            expiration_time: 2_000,
            current_supply: 1_000,
            requester_balance: 1_000,
            requester_limit: 500,
            requested_amount: 200,
        }
    }

    #[test]
    fn test_active_within_limits_transfers() {
        assert_eq!(LifecycleEnforcer.decide(&snapshot()), Decision::TransferOnly);
    }

    #[test]
    fn test_expired_requires_burn() {
        let s = LifecycleSnapshot { now: 2_000, ..snapshot() };
        assert_eq!(LifecycleEnforcer.decide(&s), Decision::BurnThenTransfer);

        // Expiry wins over an otherwise inadmissible amount.
        let s = LifecycleSnapshot { now: 5_000, requested_amount: 10_000, ..snapshot() };
        assert_eq!(LifecycleEnforcer.decide(&s), Decision::BurnThenTransfer);
    }

    #[test]
    fn test_burned_supply_rejects() {
        let s = LifecycleSnapshot { current_supply: 0, now: 3_000, ..snapshot() };
        assert_eq!(
            LifecycleEnforcer.decide(&s),
            Decision::Reject(ContractReason::AlreadyBurned)
        );
    }

    #[test]
    fn test_distinct_rejection_reasons() {
        let over_balance = LifecycleSnapshot { requested_amount: 1_001, requester_limit: 5_000, ..snapshot() };
        assert_eq!(
            LifecycleEnforcer.decide(&over_balance),
            Decision::Reject(ContractReason::InsufficientBalance)
        );

        let over_limit = LifecycleSnapshot { requested_amount: 501, ..snapshot() };
        assert_eq!(
            LifecycleEnforcer.decide(&over_limit),
            Decision::Reject(ContractReason::ExceedsLicense)
        );
    }

    #[test]
    fn test_zero_amount_is_no_action() {
        let s = LifecycleSnapshot { requested_amount: 0, ..snapshot() };
        assert_eq!(LifecycleEnforcer.decide(&s), Decision::NoAction);

        let burned = LifecycleSnapshot { requested_amount: 0, current_supply: 0, ..snapshot() };
        assert_eq!(LifecycleEnforcer.decide(&burned), Decision::NoAction);
    }

    #[test]
    fn test_after_burn_reports_empty_balance() {
        let s = LifecycleSnapshot {
            now: 3_000,
            current_supply: 0,
            requester_balance: 0,
            ..snapshot()
        };
        assert_eq!(
            LifecycleEnforcer.decide_after_burn(&s),
            Decision::Reject(ContractReason::InsufficientBalance)
        );
    }
}
