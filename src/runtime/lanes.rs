//! Per-(chain, account) submission lanes.
//!
//! A lane serializes every transaction from one account on one chain, so
//! nonces are issued strictly in order. Independent lanes run concurrently.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::warn;

use crate::adapters::SignedPayload;
use crate::error::{ErrorKind, Result};
use crate::types::{Account, Network};

/// Nonce bookkeeping for one lane.
#[derive(Debug, Default)]
pub struct LaneState {
    /// Nonces accepted by the node, in issue order.
    issued: Vec<u64>,
    /// Last transaction whose outcome could not be determined.
    unresolved: Option<SignedPayload>,
}

impl LaneState {
    /// Validate the chain-reported next nonce against lane history.
    ///
    /// A nonce at or below the last accepted or unresolved one means an
    /// earlier transaction is still pending; reusing it is refused.
    pub fn check(&mut self, chain_nonce: u64) -> Result<u64> {
        let mut last = self.issued.last().copied();

        if let Some(tx) = &self.unresolved {
            let nonce = tx.unsigned.nonce;
            if chain_nonce <= nonce {
                return Err(ErrorKind::Indeterminate {
                    tx_hash: tx.tx_hash.to_string(),
                });
            }
            last = last.max(Some(nonce));
            self.unresolved = None;
        }

        if let Some(last) = last {
            if chain_nonce <= last {
                return Err(ErrorKind::Indeterminate {
                    tx_hash: format!("nonce {}", last),
                });
            }
            if chain_nonce > last + 1 {
                warn!(last, chain_nonce, "account used outside this orchestrator");
            }
        }
        Ok(chain_nonce)
    }

    pub fn record_accepted(&mut self, nonce: u64) {
        self.issued.push(nonce);
    }

    /// Hold `tx` until the chain nonce moves past it.
    pub fn park(&mut self, tx: SignedPayload) {
        self.unresolved = Some(tx);
    }

    /// Transaction held by [`LaneState::park`], if still unresolved.
    pub fn unresolved(&self) -> Option<&SignedPayload> {
        self.unresolved.as_ref()
    }
}

type LaneKey = (Network, Account);

/// Registry of lanes, created on first use.
#[derive(Default)]
pub struct NonceLanes {
    lanes: Mutex<HashMap<LaneKey, Arc<AsyncMutex<LaneState>>>>,
}

impl NonceLanes {
    pub fn new() -> Self {
        Self::default()
    }

    fn lane(&self, network: Network, account: &Account) -> Arc<AsyncMutex<LaneState>> {
        self.lanes
            .lock()
            .entry((network, account.clone()))
            .or_default()
            .clone()
    }

    /// Wait for exclusive use of the lane.
    pub async fn acquire(&self, network: Network, account: &Account) -> OwnedMutexGuard<LaneState> {
        self.lane(network, account).lock_owned().await
    }

    /// Accepted nonces for the lane, in issue order.
    pub async fn history(&self, network: Network, account: &Account) -> Vec<u64> {
        let lane = self.lanes.lock().get(&(network, account.clone())).cloned();
        match lane {
            Some(lane) => lane.lock().await.issued.clone(),
            None => Vec::new(),
        }
    }
}
