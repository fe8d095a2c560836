//! Chain adapters for the licensed token contract.
//!
//! Provides a unified interface for building, signing and submitting token
//! transactions on each supported backend. Each adapter owns the encoding of
//! its chain's native transaction format and talks to its node through a
//! [`NodeTransport`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sha3::{Digest, Keccak256};
use tracing::debug;

use crate::error::AdapterError;
use crate::keys::OperatorKey;
use crate::types::{Account, ContractState, Network, TxHandle, TxHash};

pub mod chain_a;
pub mod chain_b;
pub mod simulated;

pub use chain_a::ChainAAdapter;
pub use chain_b::ChainBAdapter;
pub use simulated::SimulatedNode;

/// Token contract mutation carried by a transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ContractCall {
    Transfer { to: Account, amount: u128 },
    BurnExpired,
    SetLicense { account: Account, limit: u128 },
}

impl ContractCall {
    /// Canonical function signature used for selector derivation.
    pub fn signature(&self) -> &'static str {
        match self {
            ContractCall::Transfer { .. } => "transfer(address,uint256)",
            ContractCall::BurnExpired => "burnExpired()",
            ContractCall::SetLicense { .. } => "setLicense(address,uint256)",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ContractCall::Transfer { .. } => "transfer",
            ContractCall::BurnExpired => "burnExpired",
            ContractCall::SetLicense { .. } => "setLicense",
        }
    }
}

/// Read-only contract views.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ContractQuery {
    ExpirationTime,
    TotalSupply,
    BalanceOf(Account),
    LicensedLimits(Account),
}

/// Transaction built for a chain but not yet signed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnsignedPayload {
    pub network: Network,
    pub contract: String,
    pub from: Account,
    pub nonce: u64,
    pub call: ContractCall,
    /// Chain-native encoding of the transaction body.
    pub encoded: Vec<u8>,
    /// Digest the signature commits to.
    pub digest: [u8; 32],
}

/// Signed transaction ready for broadcast.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignedPayload {
    pub unsigned: UnsignedPayload,
    pub signature: Vec<u8>,
    /// Locally computed transaction hash; the node reports the same value.
    pub tx_hash: TxHash,
}

impl SignedPayload {
    pub fn handle(&self) -> TxHandle {
        TxHandle {
            network: self.unsigned.network,
            hash: self.tx_hash.clone(),
            from: self.unsigned.from.clone(),
            nonce: self.unsigned.nonce,
        }
    }
}

/// Execution outcome recorded by the node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReceiptStatus {
    Success,
    Reverted(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Receipt {
    pub tx_hash: TxHash,
    pub status: ReceiptStatus,
    pub block: u64,
}

/// Result of waiting for a submitted transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Confirmation {
    Confirmed { block: u64 },
    RevertedWith(String),
    TimedOut,
}

/// Low-level node RPC.
///
/// Implemented by the embedding collaborator for real networks and by
/// [`SimulatedNode`] for tests and the sandbox CLI.
#[async_trait]
pub trait NodeTransport: Send + Sync {
    /// Latest block timestamp in seconds.
    async fn latest_timestamp(&self) -> Result<u64, AdapterError>;

    /// Evaluate a read-only contract view.
    async fn read(&self, contract: &str, query: ContractQuery) -> Result<u128, AdapterError>;

    /// Next nonce the node expects from `account`.
    async fn account_sequence(&self, account: &Account) -> Result<u64, AdapterError>;

    /// Broadcast a signed transaction.
    async fn broadcast(&self, tx: &SignedPayload) -> Result<(), AdapterError>;

    /// Receipt for `tx_hash`, if the transaction has been executed.
    async fn receipt(&self, tx_hash: &TxHash) -> Result<Option<Receipt>, AdapterError>;
}

/// Capability set every backend provides to the orchestrator.
#[async_trait]
pub trait ChainAdapter: Send + Sync {
    fn network(&self) -> Network;

    /// Address of the token contract this adapter is bound to.
    fn contract(&self) -> &str;

    /// Parse and normalize a user-supplied address.
    fn normalize(&self, raw: &str) -> Result<Account, AdapterError>;

    /// Account controlled by `key` on this chain.
    fn account_of(&self, key: &OperatorKey) -> Account;

    /// Snapshot the contract, including balances and limits for `accounts`.
    async fn query_state(&self, accounts: &[Account]) -> Result<ContractState, AdapterError>;

    async fn read_limit(&self, account: &Account) -> Result<u128, AdapterError>;

    fn build_transfer(
        &self,
        from: &Account,
        to: &Account,
        amount: u128,
        nonce: u64,
    ) -> Result<UnsignedPayload, AdapterError>;

    fn build_burn(&self, from: &Account, nonce: u64) -> Result<UnsignedPayload, AdapterError>;

    fn build_set_license(
        &self,
        from: &Account,
        account: &Account,
        limit: u128,
        nonce: u64,
    ) -> Result<UnsignedPayload, AdapterError>;

    fn sign(&self, payload: UnsignedPayload, key: &OperatorKey)
        -> Result<SignedPayload, AdapterError>;

    async fn submit(&self, signed: &SignedPayload) -> Result<TxHandle, AdapterError>;

    async fn await_confirmation(
        &self,
        handle: &TxHandle,
        timeout: Duration,
    ) -> Result<Confirmation, AdapterError>;

    async fn next_nonce(&self, account: &Account) -> Result<u64, AdapterError>;
}

/// First four bytes of keccak256 over a function signature.
pub fn selector(signature: &str) -> [u8; 4] {
    let digest = Keccak256::digest(signature.as_bytes());
    [digest[0], digest[1], digest[2], digest[3]]
}

/// Left-pad a 20-byte address into a 32-byte ABI word.
pub(crate) fn address_word(address: &[u8; 20]) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[12..].copy_from_slice(address);
    word
}

/// Big-endian uint256 ABI word.
pub(crate) fn uint_word(value: u128) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[16..].copy_from_slice(&value.to_be_bytes());
    word
}

/// Selector followed by the ABI-encoded arguments of `call`.
///
/// `address_of` maps an already-normalized account to its 20-byte body.
pub(crate) fn encode_call<F>(call: &ContractCall, address_of: F) -> Result<Vec<u8>, AdapterError>
where
    F: Fn(&Account) -> Result<[u8; 20], AdapterError>,
{
    let mut data = Vec::with_capacity(4 + 64);
    data.extend_from_slice(&selector(call.signature()));
    match call {
        ContractCall::Transfer { to, amount } => {
            data.extend_from_slice(&address_word(&address_of(to)?));
            data.extend_from_slice(&uint_word(*amount));
        }
        ContractCall::BurnExpired => {}
        ContractCall::SetLicense { account, limit } => {
            data.extend_from_slice(&address_word(&address_of(account)?));
            data.extend_from_slice(&uint_word(*limit));
        }
    }
    Ok(data)
}

/// Contract reads, broadcast and receipt polling over a [`NodeTransport`].
///
/// Both adapters talk to their node the same way; only payload encoding
/// differs between chains.
pub(crate) struct NodeClient {
    transport: Arc<dyn NodeTransport>,
    contract: Account,
    pub poll_interval: Duration,
}

impl NodeClient {
    pub fn new(transport: Arc<dyn NodeTransport>, contract: Account) -> Self {
        Self {
            transport,
            contract,
            poll_interval: Duration::from_millis(1000),
        }
    }

    pub fn contract(&self) -> &Account {
        &self.contract
    }

    pub async fn query_state(&self, accounts: &[Account]) -> Result<ContractState, AdapterError> {
        let contract = self.contract.as_str();
        let now = self.transport.latest_timestamp().await?;
        let expiration_time = self.transport.read(contract, ContractQuery::ExpirationTime).await?;
        let total_supply = self.transport.read(contract, ContractQuery::TotalSupply).await?;

        let mut state = ContractState {
            now,
            expiration_time: timestamp_from_uint(expiration_time),
            total_supply,
            ..Default::default()
        };
        for account in accounts {
            let balance = self
                .transport
                .read(contract, ContractQuery::BalanceOf(account.clone()))
                .await?;
            state.balances.insert(account.clone(), balance);
            state.limits.insert(account.clone(), self.read_limit(account).await?);
        }
        Ok(state)
    }

    pub async fn read_limit(&self, account: &Account) -> Result<u128, AdapterError> {
        self.transport
            .read(self.contract.as_str(), ContractQuery::LicensedLimits(account.clone()))
            .await
    }

    pub async fn submit(&self, signed: &SignedPayload) -> Result<TxHandle, AdapterError> {
        self.transport.broadcast(signed).await?;
        Ok(signed.handle())
    }

    pub async fn await_confirmation(
        &self,
        handle: &TxHandle,
        timeout: Duration,
    ) -> Result<Confirmation, AdapterError> {
        poll_receipt(self.transport.as_ref(), handle, timeout, self.poll_interval).await
    }

    pub async fn next_nonce(&self, account: &Account) -> Result<u64, AdapterError> {
        self.transport.account_sequence(account).await
    }
}

/// Narrow a uint256 timestamp read from the contract.
///
/// Values beyond `u64::MAX` saturate: such an expiration lies in the far
/// future, never in the past.
pub(crate) fn timestamp_from_uint(value: u128) -> u64 {
    u64::try_from(value).unwrap_or(u64::MAX)
}

/// Poll `transport` for a receipt until `timeout` elapses.
pub(crate) async fn poll_receipt(
    transport: &dyn NodeTransport,
    handle: &TxHandle,
    timeout: Duration,
    poll_interval: Duration,
) -> Result<Confirmation, AdapterError> {
    match tokio::time::timeout(timeout, wait_for_receipt(transport, handle, poll_interval)).await {
        Ok(result) => result,
        Err(_) => Ok(Confirmation::TimedOut),
    }
}

async fn wait_for_receipt(
    transport: &dyn NodeTransport,
    handle: &TxHandle,
    poll_interval: Duration,
) -> Result<Confirmation, AdapterError> {
    loop {
        if let Some(receipt) = transport.receipt(&handle.hash).await? {
            debug!(tx = %handle.hash, block = receipt.block, "receipt available");
            return Ok(match receipt.status {
                ReceiptStatus::Success => Confirmation::Confirmed { block: receipt.block },
                ReceiptStatus::Reverted(reason) => Confirmation::RevertedWith(reason),
            });
        }
        tokio::time::sleep(poll_interval).await;
    }
}
