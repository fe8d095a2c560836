//! In-process node that executes the token contract.
//!
//! Backs the sandbox CLI and the test suite. Contract semantics follow the
//! deployed contract: require() messages, owner-only burn and license
//! updates, per-account nonces that advance even when execution reverts.
//! Faults can be injected to exercise the orchestrator's retry paths.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use crate::adapters::{
    ContractCall, ContractQuery, NodeTransport, Receipt, ReceiptStatus, SignedPayload,
};
use crate::error::AdapterError;
use crate::keys::SIGNATURE_LEN;
use crate::types::{Account, TxHash};

#[derive(Default)]
struct Ledger {
    now: u64,
    expiration_time: u64,
    total_supply: u128,
    owner: Option<Account>,
    balances: HashMap<Account, u128>,
    limits: HashMap<Account, u128>,
    nonces: HashMap<Account, u64>,
    block: u64,
    receipts: HashMap<TxHash, PendingReceipt>,
    accepted: Vec<SignedPayload>,
    /// Transactions admitted but not yet executed.
    mempool: Vec<SignedPayload>,
    /// Every broadcast that reached the node, in arrival order.
    broadcasts: Vec<SignedPayload>,
    faults: Faults,
}

struct PendingReceipt {
    receipt: Receipt,
    polls_remaining: u32,
}

#[derive(Default)]
struct Faults {
    /// Broadcasts that fail before reaching the mempool.
    lost_broadcasts: u32,
    /// Broadcasts that are accepted but whose acknowledgement is lost.
    lost_acks: u32,
    /// Broadcasts parked in the mempool with the acknowledgement lost.
    mempool_holds: u32,
    /// Broadcasts refused at admission.
    refused_broadcasts: u32,
    /// Balance reads answered by a lagging replica.
    stale_balance_reads: u32,
    stale_balances: HashMap<Account, u128>,
    /// Receipt polls that fail with a transport error.
    failed_receipt_polls: u32,
    /// Polls each new receipt stays hidden for.
    receipt_delay: u32,
    /// Receipts that never become visible.
    withheld_receipts: u32,
}

/// Simulated node hosting a single token contract.
pub struct SimulatedNode {
    ledger: Mutex<Ledger>,
}

impl SimulatedNode {
    /// Create a node whose clock reads `now` and whose contract expires at
    /// `expiration_time`.
    pub fn new(now: u64, expiration_time: u64) -> Self {
        Self {
            ledger: Mutex::new(Ledger {
                now,
                expiration_time,
                ..Default::default()
            }),
        }
    }

    /// Constructor semantics: the owner receives the entire supply.
    pub fn mint(&self, owner: &Account, supply: u128) {
        let mut ledger = self.ledger.lock();
        ledger.owner = Some(owner.clone());
        ledger.total_supply = supply;
        ledger.balances.insert(owner.clone(), supply);
    }

    /// Seed a license limit without a transaction.
    pub fn seed_limit(&self, account: &Account, limit: u128) {
        self.ledger.lock().limits.insert(account.clone(), limit);
    }

    pub fn set_time(&self, now: u64) {
        self.ledger.lock().now = now;
    }

    pub fn fail_next_broadcasts(&self, count: u32) {
        self.ledger.lock().faults.lost_broadcasts = count;
    }

    pub fn lose_next_acks(&self, count: u32) {
        self.ledger.lock().faults.lost_acks = count;
    }

    /// Keep the next broadcasts pending in the mempool, unexecuted, and
    /// drop their acknowledgement. [`SimulatedNode::mine_pending`] executes
    /// them.
    pub fn hold_next_broadcasts(&self, count: u32) {
        self.ledger.lock().faults.mempool_holds = count;
    }

    pub fn refuse_next_broadcasts(&self, count: u32) {
        self.ledger.lock().faults.refused_broadcasts = count;
    }

    /// Answer the next `reads` balance queries from the balances as they
    /// are now, whatever executes in between.
    pub fn serve_stale_balances(&self, reads: u32) {
        let mut ledger = self.ledger.lock();
        ledger.faults.stale_balances = ledger.balances.clone();
        ledger.faults.stale_balance_reads = reads;
    }

    /// Execute every transaction waiting in the mempool.
    pub fn mine_pending(&self) {
        let mut ledger = self.ledger.lock();
        for tx in std::mem::take(&mut ledger.mempool) {
            ledger.include(&tx);
        }
    }

    pub fn fail_next_receipt_polls(&self, count: u32) {
        self.ledger.lock().faults.failed_receipt_polls = count;
    }

    pub fn delay_receipts(&self, polls: u32) {
        self.ledger.lock().faults.receipt_delay = polls;
    }

    pub fn withhold_next_receipts(&self, count: u32) {
        self.ledger.lock().faults.withheld_receipts = count;
    }

    pub fn balance_of(&self, account: &Account) -> u128 {
        self.ledger.lock().balances.get(account).copied().unwrap_or(0)
    }

    pub fn limit_of(&self, account: &Account) -> u128 {
        self.ledger.lock().limits.get(account).copied().unwrap_or(0)
    }

    pub fn total_supply(&self) -> u128 {
        self.ledger.lock().total_supply
    }

    pub fn sum_of_balances(&self) -> u128 {
        self.ledger.lock().balances.values().sum()
    }

    /// Every transaction the node accepted, in acceptance order.
    pub fn accepted(&self) -> Vec<SignedPayload> {
        self.ledger.lock().accepted.clone()
    }

    /// Nonces accepted from `account`, in acceptance order.
    pub fn accepted_nonces(&self, account: &Account) -> Vec<u64> {
        self.ledger
            .lock()
            .accepted
            .iter()
            .filter(|tx| &tx.unsigned.from == account)
            .map(|tx| tx.unsigned.nonce)
            .collect()
    }

    /// Every transaction broadcast to the node, including refused and
    /// duplicate ones, in arrival order.
    pub fn broadcasts(&self) -> Vec<SignedPayload> {
        self.ledger.lock().broadcasts.clone()
    }

    /// Names of accepted contract calls, in acceptance order.
    pub fn accepted_calls(&self) -> Vec<&'static str> {
        self.ledger
            .lock()
            .accepted
            .iter()
            .map(|tx| tx.unsigned.call.name())
            .collect()
    }
}

impl Ledger {
    /// Execute `tx` in a new block and record its receipt.
    fn include(&mut self, tx: &SignedPayload) {
        let from = tx.unsigned.from.clone();
        self.nonces.insert(from.clone(), tx.unsigned.nonce + 1);
        self.block += 1;
        let status = self.execute(&from, &tx.unsigned.call);
        debug!(tx = %tx.tx_hash, nonce = tx.unsigned.nonce, ?status, "simulated execution");

        let polls_remaining = if self.faults.withheld_receipts > 0 {
            self.faults.withheld_receipts -= 1;
            u32::MAX
        } else {
            self.faults.receipt_delay
        };
        let receipt = Receipt {
            tx_hash: tx.tx_hash.clone(),
            status,
            block: self.block,
        };
        self.receipts
            .insert(tx.tx_hash.clone(), PendingReceipt { receipt, polls_remaining });
        self.accepted.push(tx.clone());
    }

    fn execute(&mut self, from: &Account, call: &ContractCall) -> ReceiptStatus {
        let is_owner = self.owner.as_ref() == Some(from);
        match call {
            ContractCall::Transfer { to, amount } => {
                if self.now >= self.expiration_time {
                    return ReceiptStatus::Reverted("Tokens expired".into());
                }
                let balance = self.balances.get(from).copied().unwrap_or(0);
                if balance < *amount {
                    return ReceiptStatus::Reverted("Insufficient balance".into());
                }
                let limit = self.limits.get(from).copied().unwrap_or(0);
                if limit < *amount {
                    return ReceiptStatus::Reverted("Exceeds license limit".into());
                }
                self.balances.insert(from.clone(), balance - amount);
                *self.balances.entry(to.clone()).or_insert(0) += amount;
                self.limits.insert(from.clone(), limit - amount);
                ReceiptStatus::Success
            }
            ContractCall::BurnExpired => {
                if !is_owner {
                    return ReceiptStatus::Reverted("Only owner can call this".into());
                }
                if self.now < self.expiration_time {
                    return ReceiptStatus::Reverted("Tokens not yet expired".into());
                }
                self.balances.insert(from.clone(), 0);
                self.total_supply = 0;
                ReceiptStatus::Success
            }
            ContractCall::SetLicense { account, limit } => {
                if !is_owner {
                    return ReceiptStatus::Reverted("Only owner can call this".into());
                }
                self.limits.insert(account.clone(), *limit);
                ReceiptStatus::Success
            }
        }
    }
}

#[async_trait]
impl NodeTransport for SimulatedNode {
    async fn latest_timestamp(&self) -> Result<u64, AdapterError> {
        Ok(self.ledger.lock().now)
    }

    async fn read(&self, _contract: &str, query: ContractQuery) -> Result<u128, AdapterError> {
        let mut ledger = self.ledger.lock();
        Ok(match query {
            ContractQuery::ExpirationTime => ledger.expiration_time as u128,
            ContractQuery::TotalSupply => ledger.total_supply,
            ContractQuery::BalanceOf(account) if ledger.faults.stale_balance_reads > 0 => {
                ledger.faults.stale_balance_reads -= 1;
                ledger.faults.stale_balances.get(&account).copied().unwrap_or(0)
            }
            ContractQuery::BalanceOf(account) => ledger.balances.get(&account).copied().unwrap_or(0),
            ContractQuery::LicensedLimits(account) => ledger.limits.get(&account).copied().unwrap_or(0),
        })
    }

    async fn account_sequence(&self, account: &Account) -> Result<u64, AdapterError> {
        Ok(self.ledger.lock().nonces.get(account).copied().unwrap_or(0))
    }

    async fn broadcast(&self, tx: &SignedPayload) -> Result<(), AdapterError> {
        let mut ledger = self.ledger.lock();

        if ledger.faults.lost_broadcasts > 0 {
            ledger.faults.lost_broadcasts -= 1;
            return Err(AdapterError::Network("connection reset by peer".into()));
        }
        ledger.broadcasts.push(tx.clone());

        if ledger.faults.refused_broadcasts > 0 {
            ledger.faults.refused_broadcasts -= 1;
            return Err(AdapterError::RejectedByNode("fee below node minimum".into()));
        }
        if tx.signature.len() != SIGNATURE_LEN {
            return Err(AdapterError::RejectedByNode("malformed signature".into()));
        }
        if ledger.receipts.contains_key(&tx.tx_hash)
            || ledger.mempool.iter().any(|pending| pending.tx_hash == tx.tx_hash)
        {
            return Err(AdapterError::RejectedByNode("already known".into()));
        }

        let from = &tx.unsigned.from;
        if ledger
            .mempool
            .iter()
            .any(|pending| &pending.unsigned.from == from && pending.unsigned.nonce == tx.unsigned.nonce)
        {
            return Err(AdapterError::RejectedByNode("replacement transaction underpriced".into()));
        }
        let expected = ledger.nonces.get(from).copied().unwrap_or(0);
        if tx.unsigned.nonce != expected {
            return Err(AdapterError::RejectedByNode(format!(
                "invalid nonce: expected {}, got {}",
                expected, tx.unsigned.nonce
            )));
        }

        if ledger.faults.mempool_holds > 0 {
            ledger.faults.mempool_holds -= 1;
            ledger.mempool.push(tx.clone());
            return Err(AdapterError::Network("response timed out".into()));
        }

        ledger.include(tx);

        if ledger.faults.lost_acks > 0 {
            ledger.faults.lost_acks -= 1;
            return Err(AdapterError::Network("response timed out".into()));
        }
        Ok(())
    }

    async fn receipt(&self, tx_hash: &TxHash) -> Result<Option<Receipt>, AdapterError> {
        let mut ledger = self.ledger.lock();
        if ledger.faults.failed_receipt_polls > 0 {
            ledger.faults.failed_receipt_polls -= 1;
            return Err(AdapterError::Network("receipt query failed".into()));
        }
        match ledger.receipts.get_mut(tx_hash) {
            None => Ok(None),
            Some(pending) if pending.polls_remaining > 0 => {
                if pending.polls_remaining != u32::MAX {
                    pending.polls_remaining -= 1;
                }
                Ok(None)
            }
            Some(pending) => Ok(Some(pending.receipt.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::chain_a::normalize_address;

    fn account(byte: u8) -> Account {
        normalize_address(&format!("0x{}", hex::encode([byte; 20]))).unwrap()
    }

    #[test]
    fn test_transfer_requires() {
        let mut ledger = Ledger {
            now: 10,
            expiration_time: 100,
            ..Default::default()
        };
        let owner = account(1);
        let holder = account(2);
        ledger.owner = Some(owner.clone());
        ledger.total_supply = 1_000;
        ledger.balances.insert(owner.clone(), 1_000);

        let transfer = ContractCall::Transfer { to: holder.clone(), amount: 10 };
        assert_eq!(
            ledger.execute(&owner, &transfer),
            ReceiptStatus::Reverted("Exceeds license limit".into())
        );

        ledger.limits.insert(owner.clone(), 50);
        assert_eq!(ledger.execute(&owner, &transfer), ReceiptStatus::Success);
        assert_eq!(ledger.balances[&holder], 10);
        assert_eq!(ledger.limits[&owner], 40);

        ledger.now = 100;
        assert_eq!(
            ledger.execute(&owner, &transfer),
            ReceiptStatus::Reverted("Tokens expired".into())
        );
    }

    #[test]
    fn test_burn_is_owner_only_and_time_gated() {
        let mut ledger = Ledger {
            now: 10,
            expiration_time: 100,
            ..Default::default()
        };
        let owner = account(1);
        ledger.owner = Some(owner.clone());
        ledger.total_supply = 500;
        ledger.balances.insert(owner.clone(), 500);

        assert_eq!(
            ledger.execute(&owner, &ContractCall::BurnExpired),
            ReceiptStatus::Reverted("Tokens not yet expired".into())
        );
        ledger.now = 100;
        assert_eq!(
            ledger.execute(&account(3), &ContractCall::BurnExpired),
            ReceiptStatus::Reverted("Only owner can call this".into())
        );
        assert_eq!(ledger.execute(&owner, &ContractCall::BurnExpired), ReceiptStatus::Success);
        assert_eq!(ledger.total_supply, 0);
        assert_eq!(ledger.balances[&owner], 0);
    }
}
