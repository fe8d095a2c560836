//! Core types for the licensed token lifecycle.
//!
//! Accounts, amounts, requests, contract snapshots and deployment artifacts.
//! Nothing here performs I/O.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, Result};

/// Default token precision (smallest unit = 10^-6).
pub const DEFAULT_DECIMALS: u8 = 6;

/// Contract functions every deployment descriptor must declare.
pub const REQUIRED_FUNCTIONS: [&str; 6] = [
    "transfer",
    "burnExpired",
    "setLicense",
    "expirationTime",
    "balanceOf",
    "licensedLimits",
];

/// Supported chain backends.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Network {
    /// Account/nonce EVM-style backend.
    ChainA,
    /// Base58check-addressed backend with sha256 transaction ids.
    ChainB,
}

impl Network {
    pub const ALL: [Network; 2] = [Network::ChainA, Network::ChainB];

    pub fn as_str(&self) -> &'static str {
        match self {
            Network::ChainA => "chain-a",
            Network::ChainB => "chain-b",
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Network {
    type Err = ErrorKind;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "chain-a" | "a" => Ok(Network::ChainA),
            "chain-b" | "b" => Ok(Network::ChainB),
            other => Err(ErrorKind::UnsupportedNetwork(other.to_string())),
        }
    }
}

/// A chain address in its normalized textual form.
///
/// Only adapters create accounts, so two accounts compare equal exactly when
/// they denote the same on-chain identity.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Account(String);

impl Account {
    pub(crate) fn from_normalized(text: String) -> Self {
        Self(text)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Token quantity in smallest units (`amount × 10^decimals`).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TokenAmount(u128);

impl TokenAmount {
    pub const ZERO: TokenAmount = TokenAmount(0);

    pub fn from_base_units(units: u128) -> Self {
        Self(units)
    }

    pub fn base_units(&self) -> u128 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Parse a decimal string such as `"12.5"` into base units.
    ///
    /// Parsing is exact: more fractional digits than `decimals` is an error
    /// rather than a silent truncation.
    pub fn parse(text: &str, decimals: u8) -> Result<Self> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ErrorKind::Validation("amount is empty".into()));
        }
        if text.starts_with('-') {
            return Err(ErrorKind::Validation(format!("amount {} is negative", text)));
        }

        let (whole, frac) = match text.split_once('.') {
            Some((w, f)) => (w, f),
            None => (text, ""),
        };
        if whole.is_empty() && frac.is_empty() {
            return Err(ErrorKind::Validation(format!("amount {} is not a number", text)));
        }
        let all_digits = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
        if !all_digits(whole) || !all_digits(frac) {
            return Err(ErrorKind::Validation(format!("amount {} is not a number", text)));
        }
        if frac.len() > decimals as usize {
            return Err(ErrorKind::Validation(format!(
                "amount {} has more than {} fractional digits",
                text, decimals
            )));
        }

        let overflow = || ErrorKind::Validation(format!("amount {} is too large", text));
        let scale = 10u128.checked_pow(decimals as u32).ok_or_else(overflow)?;
        let whole_units = if whole.is_empty() {
            0
        } else {
            whole.parse::<u128>().map_err(|_| overflow())?
        };
        let frac_units = if frac.is_empty() {
            0
        } else {
            let padded = format!("{:0<width$}", frac, width = decimals as usize);
            padded.parse::<u128>().map_err(|_| overflow())?
        };

        whole_units
            .checked_mul(scale)
            .and_then(|v| v.checked_add(frac_units))
            .map(TokenAmount)
            .ok_or_else(overflow)
    }

    /// Render base units back into decimal text.
    pub fn display(&self, decimals: u8) -> String {
        if decimals == 0 {
            return self.0.to_string();
        }
        let scale = 10u128.pow(decimals as u32);
        let frac = format!("{:0width$}", self.0 % scale, width = decimals as usize);
        let frac = frac.trim_end_matches('0');
        if frac.is_empty() {
            format!("{}", self.0 / scale)
        } else {
            format!("{}.{}", self.0 / scale, frac)
        }
    }
}

impl fmt::Display for TokenAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Derived token lifecycle state; never stored.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenState {
    Active,
    Expired,
    Burned,
}

/// Point-in-time view of the token contract returned by `query_state`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ContractState {
    /// Chain-reported current time (seconds).
    pub now: u64,
    pub expiration_time: u64,
    pub total_supply: u128,
    pub balances: BTreeMap<Account, u128>,
    pub limits: BTreeMap<Account, u128>,
}

impl ContractState {
    pub fn balance_of(&self, account: &Account) -> u128 {
        self.balances.get(account).copied().unwrap_or(0)
    }

    pub fn limit_of(&self, account: &Account) -> u128 {
        self.limits.get(account).copied().unwrap_or(0)
    }

    pub fn token_state(&self) -> TokenState {
        if self.total_supply == 0 {
            TokenState::Burned
        } else if self.now >= self.expiration_time {
            TokenState::Expired
        } else {
            TokenState::Active
        }
    }
}

/// Transaction hash as reported by (or computed for) the target chain.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TxHash(pub String);

impl fmt::Display for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Handle for a submitted transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TxHandle {
    pub network: Network,
    pub hash: TxHash,
    pub from: Account,
    pub nonce: u64,
}

/// Send `amount` from the operator account to `wallet`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GenerateRequest {
    pub wallet: String,
    pub amount: TokenAmount,
    pub network: Network,
}

/// Set the license limit of `wallet`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SetLicenseRequest {
    pub wallet: String,
    pub limit: TokenAmount,
    pub network: Network,
}

/// Orchestrator request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Request {
    Generate(GenerateRequest),
    SetLicense(SetLicenseRequest),
}

impl Request {
    pub fn network(&self) -> Network {
        match self {
            Request::Generate(r) => r.network,
            Request::SetLicense(r) => r.network,
        }
    }

    pub fn wallet(&self) -> &str {
        match self {
            Request::Generate(r) => &r.wallet,
            Request::SetLicense(r) => &r.wallet,
        }
    }
}

impl From<GenerateRequest> for Request {
    fn from(r: GenerateRequest) -> Self {
        Request::Generate(r)
    }
}

impl From<SetLicenseRequest> for Request {
    fn from(r: SetLicenseRequest) -> Self {
        Request::SetLicense(r)
    }
}

/// Deployed contract artifact, supplied by the deployment collaborator.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Deployment {
    pub network: Network,
    /// `None` when the contract was never deployed on this chain.
    pub contract_address: Option<String>,
    /// Owner address, if the artifact records it.
    #[serde(default)]
    pub owner: Option<String>,
    /// Contract interface (ABI-style JSON array).
    pub interface: serde_json::Value,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ArtifactFile {
    #[serde(default)]
    contract_address: Option<String>,
    #[serde(default)]
    owner: Option<String>,
    #[serde(alias = "abi")]
    interface: serde_json::Value,
}

impl Deployment {
    /// Load a deployment from its JSON artifact
    /// (`{"contractAddress": ..., "abi": [...]}`).
    pub fn from_artifact(network: Network, json: &str) -> Result<Self> {
        let file: ArtifactFile = serde_json::from_str(json).map_err(|e| {
            ErrorKind::Validation(format!("malformed {} deployment artifact: {}", network, e))
        })?;
        let deployment = Self {
            network,
            contract_address: file.contract_address.filter(|a| !a.trim().is_empty()),
            owner: file.owner.filter(|a| !a.trim().is_empty()),
            interface: file.interface,
        };
        deployment.validate_interface()?;
        Ok(deployment)
    }

    /// Check that the interface declares every function the core calls.
    pub fn validate_interface(&self) -> Result<()> {
        let entries = self.interface.as_array().ok_or_else(|| {
            ErrorKind::Validation("interface descriptor must be a JSON array".into())
        })?;

        let declared: Vec<&str> = entries
            .iter()
            .filter(|e| e.get("type").and_then(|t| t.as_str()).unwrap_or("function") == "function")
            .filter_map(|e| e.get("name").and_then(|n| n.as_str()))
            .collect();

        let missing: Vec<&str> = REQUIRED_FUNCTIONS
            .iter()
            .copied()
            .filter(|f| !declared.contains(f))
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(ErrorKind::Validation(format!(
                "interface descriptor for {} is missing: {}",
                self.network,
                missing.join(", ")
            )))
        }
    }
}

/// Minimal interface descriptor declaring the token contract functions.
pub fn standard_interface() -> serde_json::Value {
    let functions: Vec<serde_json::Value> = REQUIRED_FUNCTIONS
        .iter()
        .chain(["totalSupply", "owner"].iter())
        .map(|name| serde_json::json!({ "type": "function", "name": name }))
        .collect();
    serde_json::Value::Array(functions)
}
