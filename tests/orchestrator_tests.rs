use std::sync::Arc;
use std::time::Duration;

use licensed_token::adapters::chain_b::encode_address;
use licensed_token::{
    standard_interface, AbortHandle, Account, ContractReason, Deployment, ErrorKind,
    GenerateRequest, Network, OperatorKey, OrchestratorContext, RetryPolicy, SetLicenseRequest,
    SimulatedNode, TokenAmount, TransactionOrchestrator,
};

const NOW: u64 = 1_700_000_000;
const EXPIRY: u64 = NOW + 86_400;

struct Sandbox {
    node: Arc<SimulatedNode>,
    orchestrator: Arc<TransactionOrchestrator>,
    operator: Account,
}

fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        base_backoff_ms: 1,
        max_backoff_ms: 4,
        confirmation_timeout_secs: 1,
        poll_interval_ms: 1,
    }
}

fn tokens(whole: &str) -> TokenAmount {
    TokenAmount::parse(whole, 6).unwrap()
}

fn contract_address(network: Network) -> String {
    match network {
        Network::ChainA => format!("0x{}", hex::encode([0xAA; 20])),
        Network::ChainB => encode_address(&[0xAA; 20]).to_string(),
    }
}

fn wallet(network: Network, byte: u8) -> String {
    match network {
        Network::ChainA => format!("0x{}", hex::encode([byte; 20])),
        Network::ChainB => encode_address(&[byte; 20]).to_string(),
    }
}

fn deployment(network: Network, owner: Option<String>) -> Deployment {
    Deployment {
        network,
        contract_address: Some(contract_address(network)),
        owner,
        interface: standard_interface(),
    }
}

/// Operator owns the contract, holds 1000 tokens and a 500 token license.
fn setup_sandbox(network: Network) -> Sandbox {
    setup_with_owner(network, None)
}

fn setup_with_owner(network: Network, owner: Option<String>) -> Sandbox {
    let node = Arc::new(SimulatedNode::new(NOW, EXPIRY));
    let key = OperatorKey::from_bytes(&[0x11; 32]).unwrap();

    let mut context = OrchestratorContext::new();
    context
        .bind_deployment(&deployment(network, owner), node.clone(), key, &fast_retry())
        .unwrap();
    let binding = context.binding(network).unwrap();
    let operator = binding.operator.clone();

    node.mint(binding.registry.owner(), tokens("1000").base_units());
    node.seed_limit(&operator, tokens("500").base_units());

    Sandbox {
        node,
        orchestrator: Arc::new(TransactionOrchestrator::new(context, fast_retry())),
        operator,
    }
}

fn normalized(sandbox: &Sandbox, network: Network, byte: u8) -> Account {
    let binding = sandbox.orchestrator.context().binding(network).unwrap();
    binding.adapter.normalize(&wallet(network, byte)).unwrap()
}

fn generate(network: Network, to: u8, amount: &str) -> GenerateRequest {
    GenerateRequest {
        wallet: wallet(network, to),
        amount: tokens(amount),
        network,
    }
}

#[tokio::test]
async fn test_transfer_within_license_on_both_chains() {
    for network in Network::ALL {
        let sandbox = setup_sandbox(network);
        let supply = sandbox.node.total_supply();

        let tx = sandbox
            .orchestrator
            .execute(generate(network, 0xBB, "200"))
            .await
            .unwrap();

        let recipient = normalized(&sandbox, network, 0xBB);
        assert_eq!(sandbox.node.balance_of(&sandbox.operator), tokens("800").base_units());
        assert_eq!(sandbox.node.limit_of(&sandbox.operator), tokens("300").base_units());
        assert_eq!(sandbox.node.balance_of(&recipient), tokens("200").base_units());
        assert_eq!(sandbox.node.sum_of_balances(), supply);
        assert_eq!(sandbox.node.accepted()[0].tx_hash, tx);
    }
}

#[tokio::test]
async fn test_exceeding_license_submits_nothing() {
    let sandbox = setup_sandbox(Network::ChainA);

    let err = sandbox
        .orchestrator
        .execute(generate(Network::ChainA, 0xBB, "600"))
        .await
        .unwrap_err();

    assert_eq!(err, ErrorKind::ContractLogic(ContractReason::ExceedsLicense));
    assert!(sandbox.node.accepted().is_empty());
    assert_eq!(sandbox.node.balance_of(&sandbox.operator), tokens("1000").base_units());
}

#[tokio::test]
async fn test_insufficient_balance_submits_nothing() {
    let sandbox = setup_sandbox(Network::ChainB);
    sandbox.node.seed_limit(&sandbox.operator, tokens("5000").base_units());

    let err = sandbox
        .orchestrator
        .execute(generate(Network::ChainB, 0xBB, "1000.000001"))
        .await
        .unwrap_err();

    assert_eq!(err, ErrorKind::ContractLogic(ContractReason::InsufficientBalance));
    assert!(sandbox.node.accepted().is_empty());
}

#[tokio::test]
async fn test_expired_supply_burns_before_transfer() {
    let sandbox = setup_sandbox(Network::ChainA);
    sandbox.node.set_time(EXPIRY);

    let err = sandbox
        .orchestrator
        .execute(generate(Network::ChainA, 0xBB, "200"))
        .await
        .unwrap_err();

    let burn_hash = sandbox.node.accepted()[0].tx_hash.to_string();
    match &err {
        ErrorKind::PartiallyApplied { burn_tx, cause } => {
            assert_eq!(burn_tx, &burn_hash);
            assert_eq!(
                **cause,
                ErrorKind::ContractLogic(ContractReason::InsufficientBalance)
            );
        }
        other => panic!("expected partial failure, got {:?}", other),
    }
    assert_eq!(
        err.root_cause(),
        &ErrorKind::ContractLogic(ContractReason::InsufficientBalance)
    );
    assert_eq!(sandbox.node.accepted_calls(), vec!["burnExpired"]);
    assert_eq!(sandbox.node.balance_of(&sandbox.operator), 0);
    assert_eq!(sandbox.node.total_supply(), 0);

    // A burned supply is not burned twice.
    let err = sandbox
        .orchestrator
        .execute(generate(Network::ChainA, 0xBB, "1"))
        .await
        .unwrap_err();
    assert_eq!(err, ErrorKind::ContractLogic(ContractReason::AlreadyBurned));
    assert_eq!(sandbox.node.accepted().len(), 1);
}

#[tokio::test]
async fn test_expired_without_ownership_is_refused_locally() {
    let owner = wallet(Network::ChainA, 0xCC);
    let sandbox = setup_with_owner(Network::ChainA, Some(owner));
    sandbox.node.set_time(EXPIRY + 1);

    let err = sandbox
        .orchestrator
        .execute(generate(Network::ChainA, 0xBB, "1"))
        .await
        .unwrap_err();

    assert_eq!(err, ErrorKind::ContractLogic(ContractReason::OnlyOwner));
    assert!(sandbox.node.accepted().is_empty());
}

#[tokio::test]
async fn test_owner_sets_license() {
    for network in Network::ALL {
        let sandbox = setup_sandbox(network);
        sandbox
            .orchestrator
            .execute(SetLicenseRequest {
                wallet: wallet(network, 0xDD),
                limit: tokens("750"),
                network,
            })
            .await
            .unwrap();

        let account = normalized(&sandbox, network, 0xDD);
        assert_eq!(sandbox.node.limit_of(&account), tokens("750").base_units());
        assert_eq!(sandbox.node.accepted_calls(), vec!["setLicense"]);
    }
}

#[tokio::test]
async fn test_non_owner_license_update_is_unauthorized() {
    let owner = wallet(Network::ChainB, 0xCC);
    let sandbox = setup_with_owner(Network::ChainB, Some(owner));

    let err = sandbox
        .orchestrator
        .execute(SetLicenseRequest {
            wallet: wallet(Network::ChainB, 0xDD),
            limit: tokens("10"),
            network: Network::ChainB,
        })
        .await
        .unwrap_err();

    assert!(matches!(err, ErrorKind::Unauthorized { .. }));
    assert!(sandbox.node.accepted().is_empty());
}

#[tokio::test]
async fn test_concurrent_requests_get_sequential_nonces() {
    let sandbox = setup_sandbox(Network::ChainA);

    let first = tokio::spawn({
        let orchestrator = sandbox.orchestrator.clone();
        async move { orchestrator.execute(generate(Network::ChainA, 0xB1, "10")).await }
    });
    let second = tokio::spawn({
        let orchestrator = sandbox.orchestrator.clone();
        async move { orchestrator.execute(generate(Network::ChainA, 0xB2, "20")).await }
    });

    first.await.unwrap().unwrap();
    second.await.unwrap().unwrap();

    assert_eq!(sandbox.node.accepted_nonces(&sandbox.operator), vec![0, 1]);
    assert_eq!(
        sandbox
            .orchestrator
            .issued_nonces(Network::ChainA, &sandbox.operator)
            .await,
        vec![0, 1]
    );
    assert_eq!(sandbox.node.balance_of(&sandbox.operator), tokens("970").base_units());
}

#[tokio::test]
async fn test_lost_broadcasts_are_retried() {
    let sandbox = setup_sandbox(Network::ChainA);
    sandbox.node.fail_next_broadcasts(2);

    sandbox
        .orchestrator
        .execute(generate(Network::ChainA, 0xBB, "1"))
        .await
        .unwrap();

    assert_eq!(sandbox.node.accepted().len(), 1);
}

#[tokio::test]
async fn test_broadcast_exhaustion_parks_the_nonce() {
    let sandbox = setup_sandbox(Network::ChainB);
    sandbox.node.fail_next_broadcasts(3);

    let err = sandbox
        .orchestrator
        .execute(generate(Network::ChainB, 0xBB, "1"))
        .await
        .unwrap_err();
    assert!(matches!(err, ErrorKind::Indeterminate { .. }));
    assert!(sandbox.node.accepted().is_empty());

    // The next request resends the parked payload instead of signing a new
    // one at the same nonce.
    let second = sandbox
        .orchestrator
        .execute(generate(Network::ChainB, 0xBC, "1"))
        .await
        .unwrap_err();
    assert_eq!(second, err);
    let accepted = sandbox.node.accepted();
    assert_eq!(accepted.len(), 1);
    assert_eq!(err, ErrorKind::Indeterminate { tx_hash: accepted[0].tx_hash.to_string() });

    sandbox
        .orchestrator
        .execute(generate(Network::ChainB, 0xBC, "1"))
        .await
        .unwrap();
    assert_eq!(sandbox.node.accepted_nonces(&sandbox.operator), vec![0, 1]);
    assert_eq!(sandbox.node.balance_of(&sandbox.operator), tokens("998").base_units());
}

#[tokio::test]
async fn test_pending_broadcast_is_never_replaced() {
    let sandbox = setup_sandbox(Network::ChainA);
    sandbox.node.hold_next_broadcasts(1);

    let err = sandbox
        .orchestrator
        .execute(generate(Network::ChainA, 0xBB, "1"))
        .await
        .unwrap_err();
    let pending = sandbox.node.broadcasts()[0].tx_hash.clone();
    assert_eq!(err, ErrorKind::Indeterminate { tx_hash: pending.to_string() });

    // Still pending: a new request must not sign another payload at nonce 0.
    let err = sandbox
        .orchestrator
        .execute(generate(Network::ChainA, 0xBC, "2"))
        .await
        .unwrap_err();
    assert_eq!(err, ErrorKind::Indeterminate { tx_hash: pending.to_string() });
    assert!(sandbox.node.accepted().is_empty());
    assert!(sandbox
        .node
        .broadcasts()
        .iter()
        .all(|tx| tx.tx_hash == pending));

    sandbox.node.mine_pending();
    sandbox
        .orchestrator
        .execute(generate(Network::ChainA, 0xBC, "2"))
        .await
        .unwrap();

    assert_eq!(sandbox.node.accepted_nonces(&sandbox.operator), vec![0, 1]);
    assert_eq!(sandbox.node.accepted()[0].tx_hash, pending);
    let at_nonce_zero: Vec<_> = sandbox
        .node
        .broadcasts()
        .into_iter()
        .filter(|tx| tx.unsigned.nonce == 0)
        .map(|tx| tx.tx_hash)
        .collect();
    assert!(at_nonce_zero.iter().all(|hash| *hash == pending));
    assert_eq!(sandbox.node.balance_of(&sandbox.operator), tokens("997").base_units());
}

#[tokio::test]
async fn test_node_rejection_is_not_retried() {
    let sandbox = setup_sandbox(Network::ChainA);
    sandbox.node.refuse_next_broadcasts(1);

    let err = sandbox
        .orchestrator
        .execute(generate(Network::ChainA, 0xBB, "1"))
        .await
        .unwrap_err();

    assert_eq!(err, ErrorKind::RejectedByNode("fee below node minimum".into()));
    assert_eq!(sandbox.node.broadcasts().len(), 1);
    assert!(sandbox.node.accepted().is_empty());

    // Nothing is pending, so the lane reuses nonce 0.
    sandbox
        .orchestrator
        .execute(generate(Network::ChainA, 0xBB, "1"))
        .await
        .unwrap();
    assert_eq!(sandbox.node.accepted_nonces(&sandbox.operator), vec![0]);
}

#[tokio::test]
async fn test_burn_survives_transient_failures() {
    let sandbox = setup_sandbox(Network::ChainB);
    sandbox.node.set_time(EXPIRY);
    sandbox.node.fail_next_broadcasts(1);
    sandbox.node.fail_next_receipt_polls(1);
    // A lagging replica keeps reporting pre-burn balances, so the transfer
    // is admitted and submitted after the burn.
    sandbox.node.serve_stale_balances(4);

    let err = sandbox
        .orchestrator
        .execute(generate(Network::ChainB, 0xBB, "200"))
        .await
        .unwrap_err();

    let accepted = sandbox.node.accepted();
    assert_eq!(sandbox.node.accepted_calls(), vec!["burnExpired", "transfer"]);
    assert_eq!(sandbox.node.accepted_nonces(&sandbox.operator), vec![0, 1]);
    match err {
        ErrorKind::PartiallyApplied { burn_tx, .. } => {
            assert_eq!(burn_tx, accepted[0].tx_hash.to_string())
        }
        other => panic!("expected partial failure, got {:?}", other),
    }
}

#[tokio::test]
async fn test_transfer_revert_after_burn_is_partial() {
    let sandbox = setup_sandbox(Network::ChainA);
    sandbox.node.set_time(EXPIRY);
    sandbox.node.serve_stale_balances(4);

    let err = sandbox
        .orchestrator
        .execute(generate(Network::ChainA, 0xBB, "200"))
        .await
        .unwrap_err();

    assert_eq!(
        err,
        ErrorKind::PartiallyApplied {
            burn_tx: sandbox.node.accepted()[0].tx_hash.to_string(),
            cause: Box::new(ErrorKind::ContractLogic(ContractReason::TokensExpired)),
        }
    );
    assert_eq!(sandbox.node.total_supply(), 0);
}

#[tokio::test]
async fn test_burn_revert_is_fatal_not_partial() {
    let sandbox = setup_sandbox(Network::ChainA);
    // Locally the operator is assumed to own the contract; on chain it does not.
    let stranger = normalized(&sandbox, Network::ChainA, 0xCC);
    sandbox.node.mint(&stranger, tokens("1000").base_units());
    sandbox.node.set_time(EXPIRY);

    let err = sandbox
        .orchestrator
        .execute(generate(Network::ChainA, 0xBB, "1"))
        .await
        .unwrap_err();

    assert_eq!(err, ErrorKind::ContractLogic(ContractReason::OnlyOwner));
    assert_eq!(sandbox.node.accepted_calls(), vec!["burnExpired"]);
    assert_eq!(sandbox.node.total_supply(), tokens("1000").base_units());
}

#[tokio::test]
async fn test_lost_ack_confirms_on_local_hash() {
    let sandbox = setup_sandbox(Network::ChainA);
    sandbox.node.lose_next_acks(1);

    let tx = sandbox
        .orchestrator
        .execute(generate(Network::ChainA, 0xBB, "1"))
        .await
        .unwrap();

    let accepted = sandbox.node.accepted();
    assert_eq!(accepted.len(), 1);
    assert_eq!(accepted[0].tx_hash, tx);
}

#[tokio::test]
async fn test_flaky_receipt_polls_still_confirm() {
    let sandbox = setup_sandbox(Network::ChainB);
    sandbox.node.fail_next_receipt_polls(2);
    sandbox.node.delay_receipts(3);

    sandbox
        .orchestrator
        .execute(generate(Network::ChainB, 0xBB, "5"))
        .await
        .unwrap();

    assert_eq!(sandbox.node.balance_of(&sandbox.operator), tokens("995").base_units());
}

#[tokio::test]
async fn test_withheld_receipt_is_indeterminate() {
    let sandbox = setup_sandbox(Network::ChainA);
    sandbox.node.withhold_next_receipts(1);

    let err = sandbox
        .orchestrator
        .execute(generate(Network::ChainA, 0xBB, "1"))
        .await
        .unwrap_err();

    let submitted = sandbox.node.accepted()[0].tx_hash.to_string();
    assert_eq!(err, ErrorKind::Indeterminate { tx_hash: submitted });

    // The node advanced the nonce, so the lane moves on.
    sandbox
        .orchestrator
        .execute(generate(Network::ChainA, 0xBB, "1"))
        .await
        .unwrap();
    assert_eq!(sandbox.node.accepted_nonces(&sandbox.operator), vec![0, 1]);
}

#[tokio::test]
async fn test_abort_after_submission_is_indeterminate() {
    let sandbox = setup_sandbox(Network::ChainA);
    sandbox.node.delay_receipts(1_000_000);
    let (handle, signal) = AbortHandle::new();

    let task = tokio::spawn({
        let orchestrator = sandbox.orchestrator.clone();
        async move {
            orchestrator
                .execute_with_abort(generate(Network::ChainA, 0xBB, "1"), &signal)
                .await
        }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    handle.abort();

    let err = task.await.unwrap().unwrap_err();
    assert!(matches!(err, ErrorKind::Indeterminate { .. }));
    assert_eq!(sandbox.node.accepted().len(), 1);
}

#[tokio::test]
async fn test_abort_before_submission_is_cancelled() {
    let sandbox = setup_sandbox(Network::ChainA);
    let (handle, signal) = AbortHandle::new();
    handle.abort();

    let err = sandbox
        .orchestrator
        .execute_with_abort(generate(Network::ChainA, 0xBB, "1"), &signal)
        .await
        .unwrap_err();

    assert_eq!(err, ErrorKind::Cancelled);
    assert!(sandbox.node.broadcasts().is_empty());

    // Nothing was parked.
    sandbox
        .orchestrator
        .execute(generate(Network::ChainA, 0xBB, "1"))
        .await
        .unwrap();
    assert_eq!(sandbox.node.accepted_nonces(&sandbox.operator), vec![0]);
}

#[tokio::test]
async fn test_invalid_requests_make_no_chain_call() {
    let sandbox = setup_sandbox(Network::ChainA);

    let err = sandbox
        .orchestrator
        .execute(GenerateRequest {
            wallet: "0xnot-an-address".into(),
            amount: tokens("1"),
            network: Network::ChainA,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, ErrorKind::Validation(_)));

    let err = sandbox
        .orchestrator
        .execute(GenerateRequest {
            wallet: wallet(Network::ChainA, 0xBB),
            amount: TokenAmount::ZERO,
            network: Network::ChainA,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, ErrorKind::Validation(_)));

    assert!(sandbox.node.accepted().is_empty());
}

#[tokio::test]
async fn test_unbound_and_undeployed_chains() {
    let sandbox = setup_sandbox(Network::ChainA);
    let err = sandbox
        .orchestrator
        .execute(generate(Network::ChainB, 0xBB, "1"))
        .await
        .unwrap_err();
    assert_eq!(err, ErrorKind::UnsupportedNetwork("chain-b".into()));

    let node = Arc::new(SimulatedNode::new(NOW, EXPIRY));
    let mut context = OrchestratorContext::new();
    let undeployed = Deployment {
        network: Network::ChainB,
        contract_address: None,
        owner: None,
        interface: standard_interface(),
    };
    context
        .bind_deployment(
            &undeployed,
            node.clone(),
            OperatorKey::from_bytes(&[0x11; 32]).unwrap(),
            &fast_retry(),
        )
        .unwrap();
    let orchestrator = TransactionOrchestrator::new(context, fast_retry());

    let err = orchestrator
        .execute(generate(Network::ChainB, 0xBB, "1"))
        .await
        .unwrap_err();
    match err {
        ErrorKind::NotImplemented(guidance) => assert!(guidance.contains("contract address")),
        other => panic!("expected NotImplemented, got {:?}", other),
    }
    assert!(node.accepted().is_empty());
}
