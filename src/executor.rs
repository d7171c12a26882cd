//! # Execution State Machine
//!
//! Drives one call plan to a terminal state, reconciling two incompatible
//! wallet execution models behind one contract: an atomic multi-call batch
//! (all calls apply or none do) or a sequential queue submitted one call at
//! a time. Each submission is an explicit `await` on the wallet returning a
//! [`CallOutcome`]; there are no push callbacks, so the transition table is
//! directly testable without a live wallet.
//!
//! The machine exclusively owns mutable execution state for the lifetime of
//! one swap attempt. A new attempt always starts from a fresh machine and a
//! fresh plan; stale cursors never survive across attempts.

use crate::errors::ExecutionError;
use crate::types::{CallPlan, CallRequest, SwapFailure, SwapFailureKind, WalletCapabilities};
use async_trait::async_trait;
use ethers::types::{Address, H256};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Terminal status of one submitted call (or of one whole atomic batch).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallOutcome {
    /// Applied on chain.
    Confirmed { tx_hash: H256 },
    /// Reached the chain and reverted; `reason` is the wallet/node-reported
    /// revert text, fed to the stale-quote classifier.
    Reverted { reason: String },
    /// The user declined in the wallet. Cancels only this call.
    Rejected,
}

/// The wallet connection used for capability queries and submission.
/// Implementations wrap a wallet provider session (EIP-5792-style for the
/// batch path); tests script outcomes directly.
#[async_trait]
pub trait WalletClient: std::fmt::Debug + Send + Sync {
    /// EIP-5792-style capability query scoped to one chain.
    async fn supports_atomic_batch(
        &self,
        address: Address,
        chain_id: u64,
    ) -> Result<bool, ExecutionError>;

    /// Submits every call as one atomic batch (`atomicRequired` semantics)
    /// and waits for the single batch status. Must never report partial
    /// success.
    async fn send_batch(&self, calls: &[CallRequest]) -> Result<CallOutcome, ExecutionError>;

    /// Submits one call and waits for its status.
    async fn send_call(&self, call: &CallRequest) -> Result<CallOutcome, ExecutionError>;
}

/// Lifecycle of one execution attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionState {
    Idle,
    Planning,
    BatchSubmitted,
    SequentialRunning { cursor: usize },
    Succeeded,
    Failed,
}

/// How the terminal state was reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionMode {
    AtomicBatch,
    Sequential,
}

/// Terminal result of `run`.
#[derive(Debug, Clone)]
pub enum ExecutionVerdict {
    /// For the sequential path, `tx_hash` is the final call's hash; for the
    /// batch path it is the batch transaction hash.
    Succeeded { tx_hash: H256, mode: SubmissionMode },
    Failed(SwapFailure),
}

#[derive(Debug)]
pub struct ExecutionStateMachine {
    wallet: std::sync::Arc<dyn WalletClient>,
    /// Pause between sequential submissions so wallet/UI state settles
    /// before the next call.
    settle_delay: Duration,
    state: ExecutionState,
}

impl ExecutionStateMachine {
    pub fn new(wallet: std::sync::Arc<dyn WalletClient>, settle_delay: Duration) -> Self {
        Self { wallet, settle_delay, state: ExecutionState::Idle }
    }

    pub fn state(&self) -> &ExecutionState {
        &self.state
    }

    /// Runs `plan` to a terminal state. Exactly one of the batch or
    /// sequential paths is taken: the atomic batch requires both wallet
    /// support and more than one call (a single-call plan gains nothing
    /// from batching).
    ///
    /// `Err` is reserved for programming and transport faults; every
    /// protocol-level outcome, including reverts and user rejection, is a
    /// classified `ExecutionVerdict::Failed`.
    #[instrument(skip(self, plan), fields(calls = plan.len(), approvals = plan.approval_count))]
    pub async fn run(
        &mut self,
        plan: &CallPlan,
        capabilities: WalletCapabilities,
    ) -> Result<ExecutionVerdict, ExecutionError> {
        if self.state != ExecutionState::Idle {
            return Err(ExecutionError::AlreadyRunning);
        }
        if plan.is_empty() {
            return Err(ExecutionError::EmptyPlan);
        }
        self.state = ExecutionState::Planning;

        let verdict = if capabilities.atomic_batch_supported && plan.len() > 1 {
            self.run_batch(plan).await
        } else {
            self.run_sequential(plan).await
        };

        match &verdict {
            Ok(ExecutionVerdict::Succeeded { .. }) => self.state = ExecutionState::Succeeded,
            _ => self.state = ExecutionState::Failed,
        }
        verdict
    }

    async fn run_batch(&mut self, plan: &CallPlan) -> Result<ExecutionVerdict, ExecutionError> {
        self.state = ExecutionState::BatchSubmitted;
        info!(target: "executor", calls = plan.len(), "submitting atomic batch");
        match self.wallet.send_batch(&plan.calls).await? {
            CallOutcome::Confirmed { tx_hash } => {
                info!(target: "executor", %tx_hash, "batch confirmed");
                Ok(ExecutionVerdict::Succeeded { tx_hash, mode: SubmissionMode::AtomicBatch })
            }
            CallOutcome::Reverted { reason } => {
                // Atomicity is required: any error status means nothing
                // applied. No partial-success interpretation.
                warn!(target: "executor", reason = %reason, "batch failed");
                Ok(ExecutionVerdict::Failed(classify_revert(&reason)))
            }
            CallOutcome::Rejected => {
                info!(target: "executor", "batch rejected by user");
                Ok(ExecutionVerdict::Failed(SwapFailure::new(
                    SwapFailureKind::UserRejected,
                    "batch rejected in wallet",
                )))
            }
        }
    }

    async fn run_sequential(&mut self, plan: &CallPlan) -> Result<ExecutionVerdict, ExecutionError> {
        let last = plan.len() - 1;
        let mut last_hash = H256::zero();
        for (cursor, call) in plan.calls.iter().enumerate() {
            self.state = ExecutionState::SequentialRunning { cursor };
            debug!(target: "executor", cursor, to = %call.to, "submitting sequential call");
            match self.wallet.send_call(call).await? {
                CallOutcome::Confirmed { tx_hash } => {
                    last_hash = tx_hash;
                    if cursor < last {
                        // Auto-advance: the next call is driven by this
                        // outcome, not by any UI action.
                        tokio::time::sleep(self.settle_delay).await;
                    }
                }
                CallOutcome::Reverted { reason } => {
                    // Remaining queue is discarded. Already-confirmed calls
                    // (e.g. approvals) stay valid on chain and will be
                    // found by the next attempt's approval resolution.
                    warn!(target: "executor", cursor, reason = %reason, "sequential call reverted, aborting queue");
                    return Ok(ExecutionVerdict::Failed(classify_revert(&reason)));
                }
                CallOutcome::Rejected => {
                    info!(target: "executor", cursor, "call rejected by user, aborting queue");
                    return Ok(ExecutionVerdict::Failed(SwapFailure::new(
                        SwapFailureKind::UserRejected,
                        format!("call {} rejected in wallet", cursor),
                    )));
                }
            }
        }
        info!(target: "executor", tx_hash = %last_hash, "sequential plan completed");
        Ok(ExecutionVerdict::Succeeded { tx_hash: last_hash, mode: SubmissionMode::Sequential })
    }
}

/// Revert substrings that indicate the quoted route is no longer valid on
/// chain (price moved or the quote's TTL lapsed), as opposed to a generic
/// failure. Matching is case-insensitive on the whole revert text.
///
/// Revert text is the only signal most wallet providers expose for this, so
/// the heuristic lives in exactly one place; anything unmatched is reported
/// as a generic execution failure, never as stale.
const STALE_QUOTE_MARKERS: &[&str] = &[
    "expired",
    "deadline",
    "insufficient output",
    "insufficientoutputamount",
    "min return",
    "minreturn",
    "too little received",
    "underbought",
    "slippage",
];

/// Classifies a revert reason into `StaleQuote` or generic `ExecutionFailed`.
pub fn classify_revert(reason: &str) -> SwapFailure {
    let lowered = reason.to_lowercase();
    if STALE_QUOTE_MARKERS.iter().any(|marker| lowered.contains(marker)) {
        SwapFailure::new(SwapFailureKind::StaleQuote, reason)
    } else {
        SwapFailure::new(SwapFailureKind::ExecutionFailed, reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AccountKind, CallPlan};
    use ethers::types::{Bytes, U256};
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    /// Wallet that replays scripted outcomes and records what was submitted.
    #[derive(Debug, Default)]
    struct ScriptedWallet {
        batch_supported: bool,
        call_outcomes: Mutex<VecDeque<CallOutcome>>,
        batch_outcome: Mutex<Option<CallOutcome>>,
        submitted_calls: Mutex<Vec<Address>>,
        batch_submissions: Mutex<usize>,
    }

    impl ScriptedWallet {
        fn sequential(outcomes: Vec<CallOutcome>) -> Self {
            Self {
                batch_supported: false,
                call_outcomes: Mutex::new(outcomes.into()),
                ..Default::default()
            }
        }

        fn batch(outcome: CallOutcome) -> Self {
            Self {
                batch_supported: true,
                batch_outcome: Mutex::new(Some(outcome)),
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl WalletClient for ScriptedWallet {
        async fn supports_atomic_batch(&self, _: Address, _: u64) -> Result<bool, ExecutionError> {
            Ok(self.batch_supported)
        }

        async fn send_batch(&self, _calls: &[CallRequest]) -> Result<CallOutcome, ExecutionError> {
            *self.batch_submissions.lock().unwrap() += 1;
            Ok(self.batch_outcome.lock().unwrap().take().expect("no batch outcome scripted"))
        }

        async fn send_call(&self, call: &CallRequest) -> Result<CallOutcome, ExecutionError> {
            self.submitted_calls.lock().unwrap().push(call.to);
            Ok(self
                .call_outcomes
                .lock()
                .unwrap()
                .pop_front()
                .expect("no call outcome scripted"))
        }
    }

    fn plan_of(n: usize) -> CallPlan {
        CallPlan {
            calls: (0..n)
                .map(|i| CallRequest {
                    to: Address::repeat_byte(i as u8 + 1),
                    data: Bytes::from(vec![i as u8]),
                    value: U256::zero(),
                })
                .collect(),
            approval_count: n.saturating_sub(1),
        }
    }

    fn caps(atomic: bool) -> WalletCapabilities {
        WalletCapabilities { atomic_batch_supported: atomic, account_kind: AccountKind::Contract }
    }

    fn confirmed(byte: u8) -> CallOutcome {
        CallOutcome::Confirmed { tx_hash: H256::repeat_byte(byte) }
    }

    #[tokio::test]
    async fn batch_path_taken_when_supported_and_multicall() {
        let wallet = Arc::new(ScriptedWallet::batch(confirmed(0xab)));
        let mut machine = ExecutionStateMachine::new(wallet.clone(), Duration::ZERO);
        let verdict = machine.run(&plan_of(2), caps(true)).await.unwrap();

        match verdict {
            ExecutionVerdict::Succeeded { tx_hash, mode } => {
                assert_eq!(tx_hash, H256::repeat_byte(0xab));
                assert_eq!(mode, SubmissionMode::AtomicBatch);
            }
            other => panic!("unexpected verdict: {:?}", other),
        }
        // Exactly one of the two paths: one batch, zero individual calls.
        assert_eq!(*wallet.batch_submissions.lock().unwrap(), 1);
        assert!(wallet.submitted_calls.lock().unwrap().is_empty());
        assert_eq!(*machine.state(), ExecutionState::Succeeded);
    }

    #[tokio::test]
    async fn single_call_plan_runs_sequentially_even_with_batch_support() {
        let wallet = Arc::new(ScriptedWallet {
            batch_supported: true,
            call_outcomes: Mutex::new(vec![confirmed(0x01)].into()),
            ..Default::default()
        });
        let mut machine = ExecutionStateMachine::new(wallet.clone(), Duration::ZERO);
        let verdict = machine.run(&plan_of(1), caps(true)).await.unwrap();

        assert!(matches!(
            verdict,
            ExecutionVerdict::Succeeded { mode: SubmissionMode::Sequential, .. }
        ));
        assert_eq!(*wallet.batch_submissions.lock().unwrap(), 0);
        assert_eq!(wallet.submitted_calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn sequential_auto_advances_in_plan_order() {
        let wallet = Arc::new(ScriptedWallet::sequential(vec![
            confirmed(0x01),
            confirmed(0x02),
            confirmed(0x03),
        ]));
        let mut machine = ExecutionStateMachine::new(wallet.clone(), Duration::ZERO);
        let verdict = machine.run(&plan_of(3), caps(false)).await.unwrap();

        match verdict {
            ExecutionVerdict::Succeeded { tx_hash, mode } => {
                // Final hash is the last call's hash.
                assert_eq!(tx_hash, H256::repeat_byte(0x03));
                assert_eq!(mode, SubmissionMode::Sequential);
            }
            other => panic!("unexpected verdict: {:?}", other),
        }
        // Calls went out strictly in plan order, one submission each.
        assert_eq!(
            *wallet.submitted_calls.lock().unwrap(),
            vec![
                Address::repeat_byte(0x01),
                Address::repeat_byte(0x02),
                Address::repeat_byte(0x03)
            ]
        );
    }

    #[tokio::test]
    async fn revert_mid_sequence_discards_remaining_queue() {
        let wallet = Arc::new(ScriptedWallet::sequential(vec![
            confirmed(0x01),
            CallOutcome::Reverted { reason: "execution reverted: out of gas".into() },
        ]));
        let mut machine = ExecutionStateMachine::new(wallet.clone(), Duration::ZERO);
        let verdict = machine.run(&plan_of(3), caps(false)).await.unwrap();

        match verdict {
            ExecutionVerdict::Failed(failure) => {
                assert_eq!(failure.kind, SwapFailureKind::ExecutionFailed);
            }
            other => panic!("unexpected verdict: {:?}", other),
        }
        // Third call never submitted.
        assert_eq!(wallet.submitted_calls.lock().unwrap().len(), 2);
        assert_eq!(*machine.state(), ExecutionState::Failed);
    }

    #[tokio::test]
    async fn stale_revert_is_distinguished_from_generic_failure() {
        let wallet = Arc::new(ScriptedWallet::sequential(vec![CallOutcome::Reverted {
            reason: "execution reverted: Too little received".into(),
        }]));
        let mut machine = ExecutionStateMachine::new(wallet, Duration::ZERO);
        let verdict = machine.run(&plan_of(1), caps(false)).await.unwrap();

        match verdict {
            ExecutionVerdict::Failed(failure) => {
                assert_eq!(failure.kind, SwapFailureKind::StaleQuote);
                assert!(failure.is_retryable());
            }
            other => panic!("unexpected verdict: {:?}", other),
        }
    }

    #[tokio::test]
    async fn user_rejection_is_terminal_and_retryable() {
        let wallet = Arc::new(ScriptedWallet::sequential(vec![CallOutcome::Rejected]));
        let mut machine = ExecutionStateMachine::new(wallet, Duration::ZERO);
        let verdict = machine.run(&plan_of(2), caps(false)).await.unwrap();

        match verdict {
            ExecutionVerdict::Failed(failure) => {
                assert_eq!(failure.kind, SwapFailureKind::UserRejected);
                assert!(failure.is_retryable());
            }
            other => panic!("unexpected verdict: {:?}", other),
        }
    }

    #[tokio::test]
    async fn rerun_on_terminal_machine_is_an_error() {
        let wallet = Arc::new(ScriptedWallet::sequential(vec![confirmed(0x01)]));
        let mut machine = ExecutionStateMachine::new(wallet, Duration::ZERO);
        machine.run(&plan_of(1), caps(false)).await.unwrap();
        let err = machine.run(&plan_of(1), caps(false)).await.unwrap_err();
        assert!(matches!(err, ExecutionError::AlreadyRunning));
    }

    #[tokio::test]
    async fn empty_plan_is_an_error() {
        let wallet = Arc::new(ScriptedWallet::sequential(vec![]));
        let mut machine = ExecutionStateMachine::new(wallet, Duration::ZERO);
        let err = machine
            .run(&CallPlan::default(), caps(false))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutionError::EmptyPlan));
    }

    #[test]
    fn revert_classifier_table() {
        assert_eq!(classify_revert("Order expired").kind, SwapFailureKind::StaleQuote);
        assert_eq!(classify_revert("Transaction deadline passed").kind, SwapFailureKind::StaleQuote);
        assert_eq!(
            classify_revert("UniswapV3: INSUFFICIENT OUTPUT amount").kind,
            SwapFailureKind::StaleQuote
        );
        assert_eq!(classify_revert("slippage tolerance exceeded").kind, SwapFailureKind::StaleQuote);
        assert_eq!(classify_revert("out of gas").kind, SwapFailureKind::ExecutionFailed);
        assert_eq!(
            classify_revert("ERC20: transfer amount exceeds balance").kind,
            SwapFailureKind::ExecutionFailed
        );
        assert_eq!(classify_revert("").kind, SwapFailureKind::ExecutionFailed);
    }
}
