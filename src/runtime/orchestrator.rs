//! Transaction orchestrator.
//!
//! Drives a request through lifecycle evaluation, signing, submission and
//! confirmation. Each (chain, operator account) pair is a lane: the burn
//! and its dependent transfer run inside one lane acquisition, so no other
//! request can interleave a transaction between them.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::adapters::{ChainAdapter, Confirmation, SignedPayload, UnsignedPayload};
use crate::config::RetryPolicy;
use crate::error::{AdapterError, ContractReason, ErrorKind, Result};
use crate::lifecycle::{Decision, LifecycleEnforcer, LifecycleSnapshot};
use crate::runtime::abort::AbortSignal;
use crate::runtime::context::{ChainBinding, OrchestratorContext};
use crate::runtime::lanes::{LaneState, NonceLanes};
use crate::types::{
    Account, ContractState, GenerateRequest, Network, Request, SetLicenseRequest, TxHandle,
    TxHash,
};

/// Progress of a single request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Received,
    Evaluating,
    Burning,
    Transferring,
    Licensing,
    Confirmed,
    Failed,
}

/// A signed transaction owned by the lane that issued it.
#[derive(Debug)]
pub(crate) struct PendingTransaction {
    pub network: Network,
    pub from: Account,
    pub nonce: u64,
    pub signed: SignedPayload,
    pub submitted_at: Option<Instant>,
}

impl PendingTransaction {
    fn new(signed: SignedPayload) -> Self {
        Self {
            network: signed.unsigned.network,
            from: signed.unsigned.from.clone(),
            nonce: signed.unsigned.nonce,
            signed,
            submitted_at: None,
        }
    }

    fn tx_hash(&self) -> &TxHash {
        &self.signed.tx_hash
    }

    fn indeterminate(&self) -> ErrorKind {
        ErrorKind::Indeterminate {
            tx_hash: self.tx_hash().to_string(),
        }
    }
}

type Lane = OwnedMutexGuard<LaneState>;

fn enter(state: RequestState) {
    debug!(?state, "state transition");
}

/// Executes generate and setLicense requests against the bound chains.
pub struct TransactionOrchestrator {
    context: Arc<OrchestratorContext>,
    retry: RetryPolicy,
    enforcer: LifecycleEnforcer,
    lanes: NonceLanes,
    next_request: AtomicU64,
}

impl TransactionOrchestrator {
    pub fn new(context: OrchestratorContext, retry: RetryPolicy) -> Self {
        Self::with_shared_context(Arc::new(context), retry)
    }

    pub fn with_shared_context(context: Arc<OrchestratorContext>, retry: RetryPolicy) -> Self {
        Self {
            context,
            retry,
            enforcer: LifecycleEnforcer::new(),
            lanes: NonceLanes::new(),
            next_request: AtomicU64::new(0),
        }
    }

    pub fn context(&self) -> &OrchestratorContext {
        &self.context
    }

    /// Execute `request` to confirmation.
    pub async fn execute(&self, request: impl Into<Request>) -> Result<TxHash> {
        self.execute_with_abort(request, &AbortSignal::never()).await
    }

    /// Execute `request`, giving up on confirmation waits once `abort`
    /// fires. A transaction already submitted at that point is reported as
    /// [`ErrorKind::Indeterminate`]; before submission as
    /// [`ErrorKind::Cancelled`].
    pub async fn execute_with_abort(
        &self,
        request: impl Into<Request>,
        abort: &AbortSignal,
    ) -> Result<TxHash> {
        let request = request.into();
        let id = self.next_request.fetch_add(1, Ordering::Relaxed);
        let span = info_span!("request", id, network = %request.network());

        async {
            enter(RequestState::Received);
            let outcome = match &request {
                Request::Generate(generate) => self.generate(generate, abort).await,
                Request::SetLicense(license) => self.set_license(license, abort).await,
            };
            match &outcome {
                Ok(tx_hash) => {
                    enter(RequestState::Confirmed);
                    info!(tx = %tx_hash, wallet = request.wallet(), "request confirmed");
                }
                Err(error) => {
                    enter(RequestState::Failed);
                    warn!(%error, wallet = request.wallet(), "request failed");
                }
            }
            outcome
        }
        .instrument(span)
        .await
    }

    /// Nonces this orchestrator has had accepted for `account` on
    /// `network`, in issue order.
    pub async fn issued_nonces(&self, network: Network, account: &Account) -> Vec<u64> {
        self.lanes.history(network, account).await
    }

    async fn generate(&self, request: &GenerateRequest, abort: &AbortSignal) -> Result<TxHash> {
        if request.amount.is_zero() {
            return Err(ErrorKind::Validation("amount must be greater than zero".into()));
        }
        let binding = self.context.binding(request.network)?;
        let adapter = binding.adapter.as_ref();
        let recipient = adapter.normalize(&request.wallet)?;
        let operator = &binding.operator;
        let amount = request.amount.base_units();

        let watched = [operator.clone(), recipient.clone()];

        let mut lane = self.lanes.acquire(request.network, operator).await;

        enter(RequestState::Evaluating);
        let state = self.read_state(adapter, &watched).await?;
        let snapshot = LifecycleSnapshot::from_state(&state, operator, amount);
        let decision = self.enforcer.decide(&snapshot);
        debug!(?decision, ?snapshot, "lifecycle decision");

        let transfer = |nonce: u64| {
            adapter
                .build_transfer(operator, &recipient, amount, nonce)
                .map_err(ErrorKind::from)
        };

        match decision {
            Decision::TransferOnly => {
                enter(RequestState::Transferring);
                self.run_transaction(&mut lane, binding, abort, transfer).await
            }
            Decision::Reject(reason) => Err(ErrorKind::ContractLogic(reason)),
            Decision::NoAction => Err(ErrorKind::Validation("nothing to transfer".into())),
            Decision::BurnThenTransfer => {
                if operator != binding.registry.owner() {
                    return Err(ErrorKind::ContractLogic(ContractReason::OnlyOwner));
                }
                info!(
                    now = snapshot.now,
                    expiration_time = snapshot.expiration_time,
                    "tokens expired, burning before transfer"
                );

                enter(RequestState::Burning);
                let burn = |nonce: u64| adapter.build_burn(operator, nonce).map_err(ErrorKind::from);
                let burn_tx = self.run_transaction(&mut lane, binding, abort, burn).await?;

                let partial = |cause: ErrorKind| ErrorKind::PartiallyApplied {
                    burn_tx: burn_tx.to_string(),
                    cause: Box::new(cause),
                };

                let state = self.read_state(adapter, &watched).await.map_err(partial)?;
                let snapshot = LifecycleSnapshot::from_state(&state, operator, amount);
                match self.enforcer.decide_after_burn(&snapshot) {
                    Decision::TransferOnly => {
                        enter(RequestState::Transferring);
                        self.run_transaction(&mut lane, binding, abort, transfer)
                            .await
                            .map_err(partial)
                    }
                    Decision::Reject(reason) => Err(partial(ErrorKind::ContractLogic(reason))),
                    Decision::NoAction | Decision::BurnThenTransfer => Err(partial(
                        ErrorKind::Validation("nothing to transfer after burn".into()),
                    )),
                }
            }
        }
    }

    async fn set_license(&self, request: &SetLicenseRequest, abort: &AbortSignal) -> Result<TxHash> {
        let binding = self.context.binding(request.network)?;
        let adapter = binding.adapter.as_ref();
        let account = adapter.normalize(&request.wallet)?;
        let operator = &binding.operator;
        let limit = request.limit.base_units();

        binding.registry.authorize(operator)?;

        let mut lane = self.lanes.acquire(request.network, operator).await;
        enter(RequestState::Licensing);
        self.run_transaction(&mut lane, binding, abort, |nonce| {
            binding.registry.set_limit(adapter, operator, &account, limit, nonce)
        })
        .await
    }

    /// Snapshot the contract for `accounts`, retrying transient failures.
    async fn read_state(&self, adapter: &dyn ChainAdapter, accounts: &[Account]) -> Result<ContractState> {
        self.with_retry("query state", || adapter.query_state(accounts)).await
    }

    /// Build, sign, submit and confirm one transaction on the held lane.
    async fn run_transaction<F>(
        &self,
        lane: &mut Lane,
        binding: &ChainBinding,
        abort: &AbortSignal,
        build: F,
    ) -> Result<TxHash>
    where
        F: Fn(u64) -> Result<UnsignedPayload>,
    {
        let adapter = binding.adapter.as_ref();
        let operator = &binding.operator;

        let chain_nonce = self
            .with_retry("next nonce", || adapter.next_nonce(operator))
            .await?;
        let nonce = match lane.check(chain_nonce) {
            Ok(nonce) => nonce,
            Err(error) => {
                if let Some(parked) = lane.unresolved() {
                    self.rebroadcast(adapter, parked).await;
                }
                return Err(error);
            }
        };

        let unsigned = build(nonce)?;
        debug!(call = unsigned.call.name(), nonce, contract = %unsigned.contract, "payload built");
        let signed = adapter.sign(unsigned, &binding.key)?;
        let mut pending = PendingTransaction::new(signed);

        if abort.is_aborted() {
            return Err(ErrorKind::Cancelled);
        }

        let handle = match self.submit(adapter, &mut pending).await {
            Ok(handle) => handle,
            Err(error) => {
                if let ErrorKind::Indeterminate { .. } = error {
                    lane.park(pending.signed.clone());
                }
                return Err(error);
            }
        };
        lane.record_accepted(pending.nonce);
        info!(
            network = %pending.network,
            tx = %handle.hash,
            nonce = pending.nonce,
            from = %pending.from,
            "transaction submitted"
        );

        match self.confirm(adapter, &handle, abort).await {
            Ok(block) => {
                let elapsed = pending.submitted_at.map(|t| t.elapsed().as_millis()).unwrap_or(0);
                info!(tx = %handle.hash, block, elapsed_ms = elapsed as u64, "transaction confirmed");
                Ok(handle.hash)
            }
            Err(error) => {
                if let ErrorKind::Indeterminate { .. } = error {
                    lane.park(pending.signed);
                }
                Err(error)
            }
        }
    }

    /// Submit with retry. The same signed payload is resent, so its nonce
    /// is never reused by another payload.
    ///
    /// Once a broadcast has failed in transit the payload may be sitting in
    /// the node's mempool. From then on, any outcome that does not show the
    /// nonce consumed is reported as [`ErrorKind::Indeterminate`].
    async fn submit(&self, adapter: &dyn ChainAdapter, pending: &mut PendingTransaction) -> Result<TxHandle> {
        let max_attempts = self.retry.max_attempts;
        let mut last_error = String::new();
        let mut had_network_error = false;

        for attempt in 0..max_attempts {
            match adapter.submit(&pending.signed).await {
                Ok(handle) => {
                    pending.submitted_at = Some(Instant::now());
                    return Ok(handle);
                }
                Err(AdapterError::Network(reason)) => {
                    warn!(
                        tx = %pending.tx_hash(),
                        attempt = attempt + 1,
                        %reason,
                        "submission failed"
                    );
                    had_network_error = true;
                    if self.landed(adapter, pending).await {
                        pending.submitted_at = Some(Instant::now());
                        return Ok(pending.signed.handle());
                    }
                    last_error = reason;
                    if attempt + 1 < max_attempts {
                        tokio::time::sleep(self.retry.backoff(attempt)).await;
                    }
                }
                Err(AdapterError::RejectedByNode(reason)) if had_network_error => {
                    // A resend may be refused because the first copy landed
                    // or is still pending.
                    if self.landed(adapter, pending).await {
                        pending.submitted_at = Some(Instant::now());
                        return Ok(pending.signed.handle());
                    }
                    warn!(tx = %pending.tx_hash(), %reason, "resend refused, earlier broadcast unresolved");
                    return Err(pending.indeterminate());
                }
                Err(other) => return Err(other.into()),
            }
        }

        warn!(tx = %pending.tx_hash(), attempts = max_attempts, %last_error, "broadcast outcome unknown");
        Err(pending.indeterminate())
    }

    /// Resend a parked transaction so it can resolve; the outcome is only
    /// logged.
    async fn rebroadcast(&self, adapter: &dyn ChainAdapter, parked: &SignedPayload) {
        match adapter.submit(parked).await {
            Ok(_) => info!(tx = %parked.tx_hash, nonce = parked.unsigned.nonce, "parked transaction rebroadcast"),
            Err(error) => debug!(tx = %parked.tx_hash, %error, "parked transaction still unresolved"),
        }
    }

    /// Whether the account nonce has moved past the pending payload's.
    async fn landed(&self, adapter: &dyn ChainAdapter, pending: &PendingTransaction) -> bool {
        match adapter.next_nonce(&pending.from).await {
            Ok(next) if next > pending.nonce => {
                info!(tx = %pending.tx_hash(), nonce = pending.nonce, "broadcast landed despite error");
                true
            }
            Ok(_) => false,
            Err(error) => {
                debug!(%error, "nonce re-query failed");
                false
            }
        }
    }

    /// Await confirmation with retry. Returns the confirming block.
    async fn confirm(
        &self,
        adapter: &dyn ChainAdapter,
        handle: &TxHandle,
        abort: &AbortSignal,
    ) -> Result<u64> {
        let indeterminate = || ErrorKind::Indeterminate {
            tx_hash: handle.hash.to_string(),
        };
        let timeout = self.retry.confirmation_timeout();

        for attempt in 0..self.retry.max_attempts {
            let outcome = tokio::select! {
                outcome = adapter.await_confirmation(handle, timeout) => outcome,
                _ = abort.aborted() => {
                    warn!(tx = %handle.hash, "confirmation wait aborted");
                    return Err(indeterminate());
                }
            };

            let reason = match outcome {
                Ok(Confirmation::Confirmed { block }) => return Ok(block),
                Ok(Confirmation::RevertedWith(message)) => {
                    warn!(tx = %handle.hash, %message, "transaction reverted");
                    return Err(ErrorKind::ContractLogic(ContractReason::from_revert(&message)));
                }
                Ok(Confirmation::TimedOut) => "confirmation timed out".to_string(),
                Err(AdapterError::Network(reason)) => reason,
                Err(other) => return Err(other.into()),
            };
            warn!(tx = %handle.hash, attempt = attempt + 1, %reason, "confirmation pending");

            if attempt + 1 < self.retry.max_attempts {
                tokio::select! {
                    _ = tokio::time::sleep(self.retry.backoff(attempt)) => {}
                    _ = abort.aborted() => {
                        warn!(tx = %handle.hash, "confirmation wait aborted");
                        return Err(indeterminate());
                    }
                }
            }
        }

        Err(indeterminate())
    }

    /// Run a read with retry on transient transport failures.
    async fn with_retry<T, F, Fut>(&self, operation: &'static str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, AdapterError>>,
    {
        let max_attempts = self.retry.max_attempts;
        let mut last_error = String::new();

        for attempt in 0..max_attempts {
            match op().await {
                Ok(value) => return Ok(value),
                Err(AdapterError::Network(reason)) => {
                    warn!(operation, attempt = attempt + 1, %reason, "transient failure");
                    last_error = reason;
                    if attempt + 1 < max_attempts {
                        tokio::time::sleep(self.retry.backoff(attempt)).await;
                    }
                }
                Err(other) => return Err(other.into()),
            }
        }

        Err(ErrorKind::Unavailable {
            attempts: max_attempts,
            last_error,
        })
    }
}
