//! Orchestrator configuration.
//!
//! Endpoints, contract addresses and signing keys are consumed as opaque
//! strings. Configuration can be loaded from JSON and overlaid with
//! `LTOKEN_*` environment variables.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::types::{Network, DEFAULT_DECIMALS};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("malformed configuration: {0}")]
    Malformed(String),
    #[error("invalid value for {name}: {reason}")]
    InvalidValue { name: String, reason: String },
}

/// Secret string zeroized on drop and redacted from Debug output.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(transparent)]
pub struct SecretString(String);

impl SecretString {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretString(<redacted>)")
    }
}

/// Bounded exponential backoff for transient failures.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Attempt ceiling per phase (submission, confirmation).
    pub max_attempts: u32,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Per-attempt confirmation wait.
    pub confirmation_timeout_secs: u64,
    pub poll_interval_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_backoff_ms: 500,
            max_backoff_ms: 8_000,
            confirmation_timeout_secs: 30,
            poll_interval_ms: 1_000,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (0-based): `base × 2^attempt`,
    /// capped at `max_backoff_ms`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        let delay = self.base_backoff_ms.saturating_mul(factor).min(self.max_backoff_ms);
        Duration::from_millis(delay)
    }

    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_secs(self.confirmation_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Per-chain connection settings.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainSettings {
    pub rpc_url: String,
    pub contract_address: Option<String>,
    pub owner: Option<String>,
    pub signing_key: SecretString,
}

/// Top-level configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub decimals: u8,
    pub retry: RetryPolicy,
    pub chains: BTreeMap<Network, ChainSettings>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            decimals: DEFAULT_DECIMALS,
            retry: RetryPolicy::default(),
            chains: BTreeMap::new(),
        }
    }
}

impl OrchestratorConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| ConfigError::Malformed(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overlaid with process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.overlay(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    /// Overlay values from `lookup` (usually the environment).
    ///
    /// Recognized names: `LTOKEN_DECIMALS`, `LTOKEN_MAX_ATTEMPTS`,
    /// `LTOKEN_CONFIRMATION_TIMEOUT_SECS`, and per chain
    /// `LTOKEN_CHAIN_{A,B}_{RPC_URL,CONTRACT,OWNER,KEY}`.
    pub fn overlay<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("LTOKEN_DECIMALS") {
            self.decimals = parse_number("LTOKEN_DECIMALS", &value)?;
        }
        if let Some(value) = lookup("LTOKEN_MAX_ATTEMPTS") {
            self.retry.max_attempts = parse_number("LTOKEN_MAX_ATTEMPTS", &value)?;
        }
        if let Some(value) = lookup("LTOKEN_CONFIRMATION_TIMEOUT_SECS") {
            self.retry.confirmation_timeout_secs =
                parse_number("LTOKEN_CONFIRMATION_TIMEOUT_SECS", &value)?;
        }

        for network in Network::ALL {
            let prefix = match network {
                Network::ChainA => "LTOKEN_CHAIN_A",
                Network::ChainB => "LTOKEN_CHAIN_B",
            };
            let rpc_url = lookup(&format!("{}_RPC_URL", prefix));
            let contract = lookup(&format!("{}_CONTRACT", prefix));
            let owner = lookup(&format!("{}_OWNER", prefix));
            let key = lookup(&format!("{}_KEY", prefix));
            if rpc_url.is_none() && contract.is_none() && owner.is_none() && key.is_none() {
                continue;
            }

            let settings = self.chains.entry(network).or_default();
            if let Some(url) = rpc_url {
                settings.rpc_url = url;
            }
            if let Some(address) = contract {
                settings.contract_address = Some(address).filter(|a| !a.trim().is_empty());
            }
            if let Some(owner) = owner {
                settings.owner = Some(owner).filter(|o| !o.trim().is_empty());
            }
            if let Some(key) = key {
                settings.signing_key = SecretString::new(key);
            }
        }
        self.validate()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.decimals > 30 {
            return Err(ConfigError::InvalidValue {
                name: "decimals".into(),
                reason: "must be at most 30".into(),
            });
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                name: "retry.max_attempts".into(),
                reason: "must be at least 1".into(),
            });
        }
        if self.retry.max_backoff_ms < self.retry.base_backoff_ms {
            return Err(ConfigError::InvalidValue {
                name: "retry.max_backoff_ms".into(),
                reason: "must not be below base_backoff_ms".into(),
            });
        }
        Ok(())
    }
}

fn parse_number<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        name: name.to_string(),
        reason: format!("{:?} is not a number", value),
    })
}
