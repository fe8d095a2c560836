//! Chain-A adapter (account/nonce, EVM-style).
//!
//! Addresses are `0x`-prefixed 20-byte hex, normalized to lowercase.
//! Transactions are an envelope of `nonce || gas_limit || to || calldata`
//! with ABI-packed calldata, signed over its keccak256 digest.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sha3::{Digest, Keccak256};
use tracing::{debug, info};

use crate::adapters::{
    encode_call, uint_word, ChainAdapter, Confirmation, ContractCall, NodeClient, NodeTransport,
    SignedPayload, UnsignedPayload,
};
use crate::error::AdapterError;
use crate::keys::OperatorKey;
use crate::types::{Account, ContractState, Deployment, Network, TxHandle, TxHash};

/// Gas limit attached to every token call.
pub const DEFAULT_GAS_LIMIT: u64 = 200_000;

/// Adapter for the EVM-style backend.
pub struct ChainAAdapter {
    node: NodeClient,
    contract_bytes: [u8; 20],
}

impl ChainAAdapter {
    /// Bind to a deployed contract.
    pub fn new(
        deployment: &Deployment,
        transport: Arc<dyn NodeTransport>,
    ) -> Result<Self, AdapterError> {
        if deployment.network != Network::ChainA {
            return Err(AdapterError::InvalidDeployment(format!(
                "deployment targets {}, not chain-a",
                deployment.network
            )));
        }
        deployment
            .validate_interface()
            .map_err(|e| AdapterError::InvalidDeployment(e.to_string()))?;

        let address = deployment.contract_address.as_deref().ok_or_else(|| {
            AdapterError::NotImplemented(
                "chain-a contract is not deployed; deploy it with the external deployment \
                 tooling and set its contract address"
                    .into(),
            )
        })?;
        let contract = normalize_address(address)?;
        let contract_bytes = address_bytes(&contract)?;

        info!(contract = %contract, "chain-a adapter bound");
        Ok(Self {
            node: NodeClient::new(transport, contract),
            contract_bytes,
        })
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.node.poll_interval = interval;
        self
    }

    fn build(&self, from: &Account, nonce: u64, call: ContractCall) -> Result<UnsignedPayload, AdapterError> {
        let calldata = encode_call(&call, address_bytes)?;

        let mut encoded = Vec::with_capacity(64 + 20 + calldata.len());
        encoded.extend_from_slice(&uint_word(nonce as u128));
        encoded.extend_from_slice(&uint_word(DEFAULT_GAS_LIMIT as u128));
        encoded.extend_from_slice(&self.contract_bytes);
        encoded.extend_from_slice(&calldata);

        let digest: [u8; 32] = Keccak256::digest(&encoded).into();
        debug!(call = call.name(), nonce, bytes = encoded.len(), "chain-a payload built");

        Ok(UnsignedPayload {
            network: Network::ChainA,
            contract: self.node.contract().to_string(),
            from: from.clone(),
            nonce,
            call,
            encoded,
            digest,
        })
    }
}

/// Normalize a `0x`-prefixed hex address to lowercase.
pub fn normalize_address(raw: &str) -> Result<Account, AdapterError> {
    let trimmed = raw.trim();
    let body = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .ok_or_else(|| AdapterError::InvalidAddress(format!("{} lacks 0x prefix", raw)))?;
    if body.len() != 40 || !body.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(AdapterError::InvalidAddress(format!(
            "{} is not a 20-byte hex address",
            raw
        )));
    }
    Ok(Account::from_normalized(format!("0x{}", body.to_ascii_lowercase())))
}

fn address_bytes(account: &Account) -> Result<[u8; 20], AdapterError> {
    let body = account.as_str().trim_start_matches("0x");
    let decoded = hex::decode(body).map_err(|e| AdapterError::InvalidAddress(e.to_string()))?;
    decoded
        .try_into()
        .map_err(|_| AdapterError::InvalidAddress(account.to_string()))
}

#[async_trait]
impl ChainAdapter for ChainAAdapter {
    fn network(&self) -> Network {
        Network::ChainA
    }

    fn contract(&self) -> &str {
        self.node.contract().as_str()
    }

    fn normalize(&self, raw: &str) -> Result<Account, AdapterError> {
        normalize_address(raw)
    }

    fn account_of(&self, key: &OperatorKey) -> Account {
        Account::from_normalized(format!("0x{}", hex::encode(key.address_bytes())))
    }

    async fn query_state(&self, accounts: &[Account]) -> Result<ContractState, AdapterError> {
        self.node.query_state(accounts).await
    }

    async fn read_limit(&self, account: &Account) -> Result<u128, AdapterError> {
        self.node.read_limit(account).await
    }

    fn build_transfer(
        &self,
        from: &Account,
        to: &Account,
        amount: u128,
        nonce: u64,
    ) -> Result<UnsignedPayload, AdapterError> {
        self.build(from, nonce, ContractCall::Transfer { to: to.clone(), amount })
    }

    fn build_burn(&self, from: &Account, nonce: u64) -> Result<UnsignedPayload, AdapterError> {
        self.build(from, nonce, ContractCall::BurnExpired)
    }

    fn build_set_license(
        &self,
        from: &Account,
        account: &Account,
        limit: u128,
        nonce: u64,
    ) -> Result<UnsignedPayload, AdapterError> {
        self.build(from, nonce, ContractCall::SetLicense { account: account.clone(), limit })
    }

    fn sign(&self, payload: UnsignedPayload, key: &OperatorKey) -> Result<SignedPayload, AdapterError> {
        if self.account_of(key) != payload.from {
            return Err(AdapterError::Signing(format!(
                "key does not control {}",
                payload.from
            )));
        }
        let signature = key.sign_digest(&payload.digest)?;

        let mut hasher = Keccak256::new();
        hasher.update(&payload.encoded);
        hasher.update(signature);
        let tx_hash = TxHash(format!("0x{}", hex::encode(hasher.finalize())));

        Ok(SignedPayload {
            unsigned: payload,
            signature: signature.to_vec(),
            tx_hash,
        })
    }

    async fn submit(&self, signed: &SignedPayload) -> Result<TxHandle, AdapterError> {
        self.node.submit(signed).await
    }

    async fn await_confirmation(
        &self,
        handle: &TxHandle,
        timeout: Duration,
    ) -> Result<Confirmation, AdapterError> {
        self.node.await_confirmation(handle, timeout).await
    }

    async fn next_nonce(&self, account: &Account) -> Result<u64, AdapterError> {
        self.node.next_nonce(account).await
    }
}
