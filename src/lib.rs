//! # Licensed Token
//!
//! Time-bounded, license-gated token lifecycle across two chain backends.
//!
//! A token contract has a fixed expiration time and a per-account license
//! limit. This crate issues transfers, burns the supply once it has expired
//! and manages license limits, with the same semantics on both chains.
//!
//! ## Features
//!
//! - **Lifecycle enforcement**: expired supply is burned before any transfer
//! - **License gating**: owner-only limit updates, checked locally first
//! - **Nonce lanes**: submissions serialized per (chain, account)
//! - **Bounded retries**: exponential backoff, distinct partial-failure error
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use licensed_token::{
//!     standard_interface, Deployment, GenerateRequest, Network, OperatorKey,
//!     OrchestratorContext, RetryPolicy, SimulatedNode, TokenAmount, TransactionOrchestrator,
//! };
//!
//! # async fn run() -> licensed_token::Result<()> {
//! let node = Arc::new(SimulatedNode::new(1_700_000_000, 1_800_000_000));
//! let deployment = Deployment {
//!     network: Network::ChainA,
//!     contract_address: Some("0x00000000000000000000000000000000000000aa".into()),
//!     owner: None,
//!     interface: standard_interface(),
//! };
//! let key = OperatorKey::from_hex(
//!     "0x0000000000000000000000000000000000000000000000000000000000000001",
//! )?;
//!
//! let mut context = OrchestratorContext::new();
//! context.bind_deployment(&deployment, node, key, &RetryPolicy::default())?;
//! let orchestrator = TransactionOrchestrator::new(context, RetryPolicy::default());
//!
//! let tx = orchestrator
//!     .execute(GenerateRequest {
//!         wallet: "0x00000000000000000000000000000000000000bb".into(),
//!         amount: TokenAmount::parse("200", 6)?,
//!         network: Network::ChainA,
//!     })
//!     .await?;
//! println!("confirmed {}", tx);
//! # Ok(())
//! # }
//! ```

pub mod adapters;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod keys;
pub mod license;
pub mod lifecycle;
pub mod runtime;
pub mod types;

pub use adapters::{ChainAAdapter, ChainAdapter, ChainBAdapter, NodeTransport, SimulatedNode};
pub use config::{ChainSettings, ConfigError, OrchestratorConfig, RetryPolicy, SecretString};
pub use dispatch::{dispatch, Command, DispatchError};
pub use error::{AdapterError, ContractReason, ErrorKind, Result};
pub use keys::OperatorKey;
pub use license::LicenseRegistry;
pub use lifecycle::{Decision, LifecycleEnforcer, LifecycleSnapshot};
pub use runtime::{AbortHandle, AbortSignal, OrchestratorContext, TransactionOrchestrator};
pub use types::{
    standard_interface, Account, ContractState, Deployment, GenerateRequest, Network, Request,
    SetLicenseRequest, TokenAmount, TokenState, TxHash,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
