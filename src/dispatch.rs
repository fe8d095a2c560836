//! Command dispatcher.
//!
//! Turns operator commands (decimal amounts, network names, raw wallet
//! text) into typed requests and renders the outcome as a single line.

use thiserror::Error;
use tracing::debug;

use crate::error::ErrorKind;
use crate::runtime::TransactionOrchestrator;
use crate::types::{GenerateRequest, Network, Request, SetLicenseRequest, TokenAmount};

/// An operator command as typed by the user.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// Transfer `amount` to `wallet`.
    Generate { wallet: String, amount: String, network: String },
    /// Set the license limit of `wallet`.
    SetLicense { wallet: String, limit: String, network: String },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("invalid {field}: {source}")]
    InvalidArgument {
        field: &'static str,
        #[source]
        source: ErrorKind,
    },
    #[error(transparent)]
    Failed(#[from] ErrorKind),
}

impl Command {
    /// Parse into a typed request, scaling amounts by `10^decimals`.
    pub fn into_request(self, decimals: u8) -> Result<Request, DispatchError> {
        let parse_network = |raw: &str| {
            raw.parse::<Network>()
                .map_err(|source| DispatchError::InvalidArgument { field: "network", source })
        };
        match self {
            Command::Generate { wallet, amount, network } => {
                let network = parse_network(&network)?;
                let amount = TokenAmount::parse(&amount, decimals)
                    .map_err(|source| DispatchError::InvalidArgument { field: "amount", source })?;
                Ok(GenerateRequest { wallet, amount, network }.into())
            }
            Command::SetLicense { wallet, limit, network } => {
                let network = parse_network(&network)?;
                let limit = TokenAmount::parse(&limit, decimals)
                    .map_err(|source| DispatchError::InvalidArgument { field: "limit", source })?;
                Ok(SetLicenseRequest { wallet, limit, network }.into())
            }
        }
    }
}

/// Execute `command` and describe the confirmed transaction.
pub async fn dispatch(
    orchestrator: &TransactionOrchestrator,
    command: Command,
    decimals: u8,
) -> Result<String, DispatchError> {
    let request = command.into_request(decimals)?;
    debug!(?request, "dispatching");

    let summary = match &request {
        Request::Generate(r) => format!(
            "transferred {} to {} on {}",
            r.amount.display(decimals),
            r.wallet,
            r.network
        ),
        Request::SetLicense(r) => format!(
            "license for {} set to {} on {}",
            r.wallet,
            r.limit.display(decimals),
            r.network
        ),
    };
    let tx_hash = orchestrator.execute(request).await?;
    Ok(format!("{} (tx {})", summary, tx_hash))
}

/// One-line operator message for a failed command.
pub fn describe_error(error: &DispatchError) -> String {
    match error {
        DispatchError::Failed(ErrorKind::PartiallyApplied { burn_tx, cause }) => format!(
            "expired supply burned in {}, but the transfer did not happen: {}",
            burn_tx, cause
        ),
        DispatchError::Failed(ErrorKind::Indeterminate { tx_hash }) => format!(
            "transaction {} was submitted but not confirmed; check it before retrying",
            tx_hash
        ),
        DispatchError::Failed(ErrorKind::Cancelled) => {
            "cancelled before submission; nothing was sent, safe to retry".to_string()
        }
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_scales_amount() {
        let request = Command::Generate {
            wallet: "0xabc".into(),
            amount: "200".into(),
            network: "chain-a".into(),
        }
        .into_request(6)
        .unwrap();
        match request {
            Request::Generate(r) => {
                assert_eq!(r.amount.base_units(), 200_000_000);
                assert_eq!(r.network, Network::ChainA);
            }
            other => panic!("unexpected request {:?}", other),
        }
    }

    #[test]
    fn test_bad_arguments_are_named() {
        let err = Command::SetLicense {
            wallet: "T...".into(),
            limit: "-5".into(),
            network: "b".into(),
        }
        .into_request(6)
        .unwrap_err();
        assert!(matches!(err, DispatchError::InvalidArgument { field: "limit", .. }));

        let err = Command::Generate {
            wallet: "0xabc".into(),
            amount: "1".into(),
            network: "chain-z".into(),
        }
        .into_request(6)
        .unwrap_err();
        assert_eq!(
            err,
            DispatchError::InvalidArgument {
                field: "network",
                source: ErrorKind::UnsupportedNetwork("chain-z".into()),
            }
        );
    }

    #[test]
    fn test_partial_failure_message() {
        let err = DispatchError::Failed(ErrorKind::PartiallyApplied {
            burn_tx: "0xburn".into(),
            cause: Box::new(ErrorKind::ContractLogic(crate::error::ContractReason::InsufficientBalance)),
        });
        let message = describe_error(&err);
        assert!(message.contains("0xburn"));
        assert!(message.contains("did not happen"));
    }

    #[test]
    fn test_cancelled_is_not_an_outage() {
        let message = describe_error(&DispatchError::Failed(ErrorKind::Cancelled));
        assert!(message.contains("nothing was sent"));
        assert!(!message.contains("unavailable"));
    }
}
