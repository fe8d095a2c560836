//! Error types for licensed-token operations.
//!
//! Every failure the orchestrator can report is an [`ErrorKind`]. Adapters
//! speak [`AdapterError`] and are translated at the orchestrator boundary, so
//! callers never see chain-specific SDK errors.

use thiserror::Error;

/// Contract-level revert reasons.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContractReason {
    #[error("insufficient balance")]
    InsufficientBalance,
    #[error("exceeds license limit")]
    ExceedsLicense,
    #[error("tokens expired")]
    TokensExpired,
    #[error("only owner can call this")]
    OnlyOwner,
    #[error("supply already burned")]
    AlreadyBurned,
    #[error("tokens not yet expired")]
    NotYetExpired,
    #[error("contract reverted: {0}")]
    Other(String),
}

impl ContractReason {
    /// Translate a raw revert string emitted by the token contract.
    pub fn from_revert(message: &str) -> Self {
        let trimmed = message.trim();
        // Nodes commonly prefix the require() message.
        let reason = trimmed
            .strip_prefix("execution reverted:")
            .or_else(|| trimmed.strip_prefix("REVERT opcode executed:"))
            .unwrap_or(trimmed)
            .trim();

        match reason {
            "Insufficient balance" => Self::InsufficientBalance,
            "Exceeds license limit" => Self::ExceedsLicense,
            "Tokens expired" => Self::TokensExpired,
            "Only owner can call this" => Self::OnlyOwner,
            "Tokens not yet expired" => Self::NotYetExpired,
            other => Self::Other(other.to_string()),
        }
    }
}

/// Unified failure taxonomy returned by the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ErrorKind {
    /// Malformed request; no chain call was made.
    #[error("validation error: {0}")]
    Validation(String),

    /// Non-owner attempted an owner-only operation.
    #[error("unauthorized: {caller} is not the contract owner {owner}")]
    Unauthorized { caller: String, owner: String },

    /// Confirmed revert, or a lifecycle rejection that mirrors one.
    #[error("contract logic: {0}")]
    ContractLogic(ContractReason),

    /// Transient failures exhausted the retry budget before anything landed.
    #[error("backend unavailable after {attempts} attempts: {last_error}")]
    Unavailable { attempts: u32, last_error: String },

    /// The caller aborted before anything was broadcast.
    #[error("cancelled before submission; nothing was sent")]
    Cancelled,

    /// A transaction was, or may have been, submitted but its outcome is
    /// unknown.
    #[error("transaction {tx_hash} submitted but outcome is indeterminate")]
    Indeterminate { tx_hash: String },

    /// Node refused the transaction before execution.
    #[error("rejected by node: {0}")]
    RejectedByNode(String),

    /// Unsupported deployment path; carries operator guidance.
    #[error("not implemented: {0}")]
    NotImplemented(String),

    #[error("unsupported network: {0}")]
    UnsupportedNetwork(String),

    /// Key material could not be loaded or used.
    #[error("signing error: {0}")]
    Signing(String),

    /// Burn confirmed, then the dependent transfer failed. The operator
    /// balance is legitimately empty at this point.
    #[error("burn {burn_tx} confirmed but transfer failed: {cause}")]
    PartiallyApplied {
        burn_tx: String,
        cause: Box<ErrorKind>,
    },
}

impl ErrorKind {
    /// The innermost cause, looking through `PartiallyApplied`.
    pub fn root_cause(&self) -> &ErrorKind {
        match self {
            Self::PartiallyApplied { cause, .. } => cause.root_cause(),
            other => other,
        }
    }
}

/// Errors raised by chain adapters and node transports.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdapterError {
    /// Transport failure; the request may or may not have reached the node.
    #[error("network error: {0}")]
    Network(String),

    #[error("rejected by node: {0}")]
    RejectedByNode(String),

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("invalid deployment: {0}")]
    InvalidDeployment(String),

    #[error("not implemented: {0}")]
    NotImplemented(String),

    #[error("signing failed: {0}")]
    Signing(String),

    #[error("decode error: {0}")]
    Decode(String),
}

impl From<AdapterError> for ErrorKind {
    fn from(err: AdapterError) -> Self {
        match err {
            AdapterError::Network(reason) => ErrorKind::Unavailable {
                attempts: 1,
                last_error: reason,
            },
            AdapterError::RejectedByNode(reason) => ErrorKind::RejectedByNode(reason),
            AdapterError::InvalidAddress(reason) => ErrorKind::Validation(reason),
            AdapterError::InvalidDeployment(reason) => ErrorKind::NotImplemented(reason),
            AdapterError::NotImplemented(reason) => ErrorKind::NotImplemented(reason),
            AdapterError::Signing(reason) => ErrorKind::Signing(reason),
            AdapterError::Decode(reason) => ErrorKind::Unavailable {
                attempts: 1,
                last_error: format!("undecodable node response: {}", reason),
            },
        }
    }
}

/// Result type alias for orchestrator operations.
pub type Result<T> = core::result::Result<T, ErrorKind>;
