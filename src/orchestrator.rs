//! # Swap Session Orchestrator
//!
//! The single entry point over the whole pipeline: quote acquisition →
//! approval resolution → capability detection → call-plan assembly →
//! execution. Each step depends on the previous step's result, so the
//! pipeline is sequential by necessity; the only internal fan-out is the
//! approval resolver's concurrent allowance reads.
//!
//! A `SwapSession` is scoped to one (owner, chain) pair. It owns the only
//! mutable shared state in the system — the capability cache and the
//! per-attempt execution machine — and resets both wholesale rather than
//! repairing them incrementally.

use crate::approval::ApprovalResolver;
use crate::capability::CapabilityDetector;
use crate::chain::ChainReader;
use crate::config::ApprovalPolicy;
use crate::executor::{ExecutionStateMachine, ExecutionVerdict, WalletClient};
use crate::external::{HistoryStore, NotificationPayload, Notifier};
use crate::plan::build_call_plan;
use crate::quote::QuoteClient;
use crate::types::{
    InputLeg, Quote, SwapFailure, SwapFailureKind, SwapRecord, SwapResult, SwapSuccess,
};
use ethers::types::{Address, U256};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

/// The consolidation target, with the display metadata the session needs
/// for notifications and history bookkeeping. The output token is assumed
/// USD-denominated (the product consolidates into a stablecoin), so history
/// amounts convert by decimals alone.
#[derive(Debug, Clone)]
pub struct OutputToken {
    pub address: Address,
    pub symbol: String,
    pub decimals: u8,
}

#[derive(Debug)]
pub struct SwapSession {
    owner: Address,
    quotes: QuoteClient,
    approvals: ApprovalResolver,
    capabilities: CapabilityDetector,
    wallet: Arc<dyn WalletClient>,
    history: Option<Arc<dyn HistoryStore>>,
    notifier: Option<Arc<dyn Notifier>>,
    approval_policy: ApprovalPolicy,
    settle_delay: Duration,
    /// Only one attempt may be in flight per session.
    in_flight: AtomicBool,
}

/// Clears the session's in-flight flag when the attempt ends, whether it
/// ran to a terminal state or its future was dropped mid-await.
struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl SwapSession {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        owner: Address,
        chain: Arc<dyn ChainReader>,
        quotes: QuoteClient,
        wallet: Arc<dyn WalletClient>,
        approval_policy: ApprovalPolicy,
        settle_delay: Duration,
        history: Option<Arc<dyn HistoryStore>>,
        notifier: Option<Arc<dyn Notifier>>,
    ) -> Self {
        Self {
            owner,
            approvals: ApprovalResolver::new(chain.clone()),
            capabilities: CapabilityDetector::new(chain, wallet.clone()),
            quotes,
            wallet,
            history,
            notifier,
            approval_policy,
            settle_delay,
            in_flight: AtomicBool::new(false),
        }
    }

    /// Discards session caches. Call on wallet address or chain change; the
    /// next attempt re-detects everything.
    pub fn reset(&self) {
        self.capabilities.invalidate();
    }

    /// Runs one complete consolidation attempt. Every attempt starts from a
    /// fresh quote, a fresh call plan and a fresh execution machine — stale
    /// path ids and cursors never carry over. `StaleQuote` and
    /// `UserRejected` failures are retryable by calling this again.
    #[instrument(skip(self, legs, output), fields(owner = %self.owner, legs = legs.len(), output = %output.address))]
    pub async fn run_swap(
        &self,
        legs: &[InputLeg],
        output: &OutputToken,
        slippage_bps: u32,
    ) -> SwapResult {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            return Err(SwapFailure::new(
                SwapFailureKind::ExecutionFailed,
                "another swap attempt is already in flight for this session",
            ));
        }
        // Released on drop, so an attempt whose future is cancelled mid-await
        // (UI navigation aborting the task) cannot wedge the session.
        let _guard = InFlightGuard(&self.in_flight);
        self.run_swap_inner(legs, output, slippage_bps).await
    }

    async fn run_swap_inner(
        &self,
        legs: &[InputLeg],
        output: &OutputToken,
        slippage_bps: u32,
    ) -> SwapResult {
        let quote = self
            .quotes
            .get_quote(legs, output.address, self.owner, slippage_bps)
            .await
            .map_err(|e| SwapFailure::new(SwapFailureKind::QuoteFailed, e.to_string()))?;

        let approvals = self
            .approvals
            .resolve(&quote, self.owner)
            .await
            .map_err(|e| SwapFailure::new(SwapFailureKind::ApprovalCheckFailed, e.to_string()))?;

        let capabilities = self.capabilities.detect(self.owner).await;
        let plan = build_call_plan(&quote, &approvals, self.approval_policy);

        if quote.is_probably_stale() {
            // Approval reads took longer than the quote's validity window;
            // submitting now would almost certainly revert.
            return Err(SwapFailure::new(
                SwapFailureKind::StaleQuote,
                format!("quote {} exceeded its validity window before submission", quote.path_id),
            ));
        }

        let mut machine = ExecutionStateMachine::new(self.wallet.clone(), self.settle_delay);
        let verdict = machine
            .run(&plan, capabilities)
            .await
            .map_err(|e| SwapFailure::new(SwapFailureKind::ExecutionFailed, e.to_string()))?;

        match verdict {
            ExecutionVerdict::Succeeded { tx_hash, mode } => {
                info!(target: "orchestrator", %tx_hash, ?mode, path_id = %quote.path_id, "swap succeeded");
                self.report_success(legs, output, &quote, tx_hash).await;
                Ok(SwapSuccess { tx_hash, path_id: quote.path_id })
            }
            ExecutionVerdict::Failed(mut failure) => {
                if failure.kind == SwapFailureKind::StaleQuote {
                    // Name the dead quote so callers can tell a refetched
                    // retry from a replay of the same route.
                    failure.detail = format!("quote {}: {}", quote.path_id, failure.detail);
                }
                warn!(target: "orchestrator", kind = ?failure.kind, detail = %failure.detail, "swap failed");
                self.report_failure(&failure).await;
                Err(failure)
            }
        }
    }

    /// Exactly one history write and one notification per success. Neither
    /// can undo the confirmed swap, so both failures degrade to warnings.
    async fn report_success(
        &self,
        legs: &[InputLeg],
        output: &OutputToken,
        quote: &Quote,
        tx_hash: ethers::types::H256,
    ) {
        if let Some(history) = &self.history {
            let record = SwapRecord {
                user_address: self.owner,
                total_amount_usd: to_display_units(sum(&quote.out_amounts), output.decimals),
                fees_usd: to_display_units(quote.fee_amount, output.decimals),
                input_tokens: quote.in_tokens.clone(),
                output_token: output.address,
                amounts: quote.in_amounts.clone(),
                tx_hash,
                timestamp: chrono::Utc::now(),
            };
            if let Err(e) = history.record_swap(&record).await {
                warn!(target: "orchestrator", error = %e, "history write failed after confirmed swap; continuing");
            }
        }
        self.dispatch(NotificationPayload::swap_success(legs.len(), &output.symbol))
            .await;
    }

    /// One notification per on-chain failure. Pre-execution failures and
    /// user rejections stay silent: the user is watching the wallet at that
    /// point and a push would be noise.
    async fn report_failure(&self, failure: &SwapFailure) {
        if matches!(
            failure.kind,
            SwapFailureKind::StaleQuote | SwapFailureKind::ExecutionFailed
        ) {
            self.dispatch(NotificationPayload::swap_failed()).await;
        }
    }

    async fn dispatch(&self, payload: NotificationPayload) {
        if let Some(notifier) = &self.notifier {
            let user_id = format!("{:#x}", self.owner);
            if let Err(e) = notifier.notify(&user_id, &payload).await {
                // Drops are tolerated by contract.
                warn!(target: "orchestrator", error = %e, "notification dropped");
            }
        }
    }
}

fn sum(amounts: &[U256]) -> U256 {
    amounts.iter().fold(U256::zero(), |acc, a| acc.saturating_add(*a))
}

fn to_display_units(amount: U256, decimals: u8) -> f64 {
    // Sufficient for bookkeeping: history stores a display value, the
    // on-chain amounts stay exact in `amounts`.
    let clamped = if amount > U256::from(u128::MAX) { u128::MAX } else { amount.as_u128() };
    let divisor = 10f64.powi(decimals as i32);
    clamped as f64 / divisor
}
