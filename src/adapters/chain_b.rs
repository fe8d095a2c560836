//! Chain-B adapter (base58check addresses, JSON `raw_data` transactions).
//!
//! Addresses carry a `0x41` version byte and a double-sha256 checksum; their
//! canonical text form is base58 (leading `T`). A transaction is the JSON
//! serialization of its `raw_data`; the transaction id is sha256 over those
//! bytes and is what the operator key signs.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::adapters::{
    encode_call, ChainAdapter, Confirmation, ContractCall, NodeClient, NodeTransport,
    SignedPayload, UnsignedPayload,
};
use crate::error::AdapterError;
use crate::keys::OperatorKey;
use crate::types::{Account, ContractState, Deployment, Network, TxHandle, TxHash};

/// Address version byte.
pub const ADDRESS_PREFIX: u8 = 0x41;

/// Fee ceiling attached to every contract trigger (smallest native unit).
pub const DEFAULT_FEE_LIMIT: u64 = 100_000_000;

#[derive(Serialize)]
struct RawData<'a> {
    contract_address: String,
    owner_address: String,
    function_selector: &'a str,
    parameter: String,
    sequence: u64,
    fee_limit: u64,
}

/// Adapter for the base58check backend.
pub struct ChainBAdapter {
    node: NodeClient,
}

impl ChainBAdapter {
    /// Bind to a deployed contract.
    ///
    /// Chain-B contracts cannot be deployed by this tool. A deployment with
    /// no address is reported as [`AdapterError::NotImplemented`] with
    /// guidance for the operator.
    pub fn new(
        deployment: &Deployment,
        transport: Arc<dyn NodeTransport>,
    ) -> Result<Self, AdapterError> {
        if deployment.network != Network::ChainB {
            return Err(AdapterError::InvalidDeployment(format!(
                "deployment targets {}, not chain-b",
                deployment.network
            )));
        }
        let address = deployment.contract_address.as_deref().ok_or_else(|| {
            AdapterError::NotImplemented(
                "chain-b deployment requires an external tool; deploy the contract manually \
                 and configure its contract address"
                    .into(),
            )
        })?;
        deployment
            .validate_interface()
            .map_err(|e| AdapterError::InvalidDeployment(e.to_string()))?;
        let contract = normalize_address(address)?;

        info!(contract = %contract, "chain-b adapter bound");
        Ok(Self {
            node: NodeClient::new(transport, contract),
        })
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.node.poll_interval = interval;
        self
    }

    fn build(&self, from: &Account, nonce: u64, call: ContractCall) -> Result<UnsignedPayload, AdapterError> {
        let calldata = encode_call(&call, address_body)?;
        let raw = RawData {
            contract_address: hex::encode(versioned_bytes(self.node.contract())?),
            owner_address: hex::encode(versioned_bytes(from)?),
            function_selector: call.signature(),
            parameter: hex::encode(&calldata[4..]),
            sequence: nonce,
            fee_limit: DEFAULT_FEE_LIMIT,
        };
        let encoded = serde_json::to_vec(&raw)
            .map_err(|e| AdapterError::Decode(format!("raw_data encoding failed: {}", e)))?;
        let digest: [u8; 32] = Sha256::digest(&encoded).into();
        debug!(call = call.name(), nonce, bytes = encoded.len(), "chain-b payload built");

        Ok(UnsignedPayload {
            network: Network::ChainB,
            contract: self.node.contract().to_string(),
            from: from.clone(),
            nonce,
            call,
            encoded,
            digest,
        })
    }
}

/// Encode a 20-byte account body as a base58check address.
pub fn encode_address(body: &[u8; 20]) -> Account {
    Account::from_normalized(
        bs58::encode(body)
            .with_check_version(ADDRESS_PREFIX)
            .into_string(),
    )
}

/// Accept base58check (`T...`) or 21-byte hex (`41...`) and normalize to
/// base58check.
pub fn normalize_address(raw: &str) -> Result<Account, AdapterError> {
    let trimmed = raw.trim();

    if trimmed.len() == 42 && trimmed.to_ascii_lowercase().starts_with("41") {
        let bytes = hex::decode(trimmed)
            .map_err(|e| AdapterError::InvalidAddress(format!("{}: {}", raw, e)))?;
        let mut body = [0u8; 20];
        body.copy_from_slice(&bytes[1..]);
        return Ok(encode_address(&body));
    }

    let versioned = versioned_bytes(&Account::from_normalized(trimmed.to_string()))
        .map_err(|e| AdapterError::InvalidAddress(format!("{}: {}", raw, e)))?;
    let mut body = [0u8; 20];
    body.copy_from_slice(&versioned[1..]);
    Ok(encode_address(&body))
}

/// Version byte and body of a base58check address, checksum verified.
fn versioned_bytes(account: &Account) -> Result<[u8; 21], AdapterError> {
    let bytes = bs58::decode(account.as_str())
        .with_check(Some(ADDRESS_PREFIX))
        .into_vec()
        .map_err(|e| AdapterError::InvalidAddress(e.to_string()))?;
    bytes
        .try_into()
        .map_err(|_| AdapterError::InvalidAddress(format!("{} is not a 21-byte address", account)))
}

fn address_body(account: &Account) -> Result<[u8; 20], AdapterError> {
    let versioned = versioned_bytes(account)?;
    let mut body = [0u8; 20];
    body.copy_from_slice(&versioned[1..]);
    Ok(body)
}

#[async_trait]
impl ChainAdapter for ChainBAdapter {
    fn network(&self) -> Network {
        Network::ChainB
    }

    fn contract(&self) -> &str {
        self.node.contract().as_str()
    }

    fn normalize(&self, raw: &str) -> Result<Account, AdapterError> {
        normalize_address(raw)
    }

    fn account_of(&self, key: &OperatorKey) -> Account {
        encode_address(&key.address_bytes())
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
        // The transaction id covers raw_data only.
        let tx_hash = TxHash(hex::encode(payload.digest));
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
