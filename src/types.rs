//! # Core Data Model
//!
//! Owned value types flowing through the swap pipeline: input legs, combined
//! quotes, approval state, wallet capabilities, call plans and terminal
//! results. Mutable execution state lives in `executor.rs`; everything here
//! is data.

use chrono::{DateTime, Utc};
use ethers::types::{Address, Bytes, H256, U256};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Native-coin sentinel used by 0x-style aggregators for the chain's gas
/// token. A leg with this address never needs an ERC-20 approval.
pub const NATIVE_TOKEN_SENTINEL: Address = Address::repeat_byte(0xee);

/// External validity window of an aggregator quote. Past this window the
/// embedded transactions plausibly no longer match on-chain reality.
pub const QUOTE_TTL: Duration = Duration::from_secs(60);

/// One (token, amount) input line of a multi-token consolidation swap.
///
/// Invariants (enforced by `QuoteClient::get_quote`): `amount > 0`, at most
/// one leg per token address, `token` never equals the output token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputLeg {
    pub token: Address,
    /// Amount in the token's smallest unit.
    pub amount: U256,
    /// Display symbol carried through for logs and history records.
    pub symbol: String,
}

impl InputLeg {
    pub fn new(token: Address, amount: U256, symbol: impl Into<String>) -> Self {
        Self { token, amount, symbol: symbol.into() }
    }

    pub fn is_native(&self) -> bool {
        self.token == NATIVE_TOKEN_SENTINEL
    }
}

/// A raw transaction payload taken verbatim from an aggregator sub-quote.
/// Call data from the aggregator must never be mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawTransaction {
    pub to: Address,
    pub data: Bytes,
    pub value: U256,
}

/// A combined, time-bounded quote converting N input legs into one output
/// token. Produced by merging one upstream sub-quote per leg; the `path_id`
/// is a client-local aggregate id and is *not* valid against the upstream
/// provider — only `raw_transactions` are provider-valid.
#[derive(Debug, Clone)]
pub struct Quote {
    pub path_id: String,
    pub in_tokens: Vec<Address>,
    pub in_amounts: Vec<U256>,
    pub out_tokens: Vec<Address>,
    pub out_amounts: Vec<U256>,
    /// The contract that must hold ERC-20 allowances for every input leg.
    pub spender: Address,
    /// Summed gas estimate across sub-quotes.
    pub gas_estimate: U256,
    /// Summed integrator fee across sub-quotes, denominated in the output token.
    pub fee_amount: U256,
    /// One entry per upstream sub-quote, in leg order.
    pub raw_transactions: Vec<RawTransaction>,
    /// Total upstream retries that were needed to assemble this quote.
    /// Diagnostic only; a nonzero value is not an error.
    pub retry_count: u32,
    pub issued_at: Instant,
}

impl Quote {
    /// Whether the external TTL window has plausibly lapsed. A stale quote
    /// is not rejected up front — submission will surface `StaleQuote` —
    /// but callers should refresh rather than execute one knowingly.
    pub fn is_probably_stale(&self) -> bool {
        self.issued_at.elapsed() > QUOTE_TTL
    }
}

/// Per-token approval state for a specific quote's spender, recomputed
/// whenever a new quote arrives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovalStatus {
    pub token: Address,
    pub current_allowance: U256,
    /// The exact amount this swap requires, not an unlimited sentinel.
    pub required_amount: U256,
    pub needs_approval: bool,
}

/// Account classification derived from deployed bytecode presence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountKind {
    Contract,
    Plain,
    Unknown,
}

/// Detected wallet capabilities, cached per (address, chain) for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalletCapabilities {
    pub atomic_batch_supported: bool,
    pub account_kind: AccountKind,
}

impl WalletCapabilities {
    /// Conservative default: assuming batch support when absent would
    /// silently drop transactions, so unknown resolves to unsupported.
    pub fn conservative() -> Self {
        Self { atomic_batch_supported: false, account_kind: AccountKind::Unknown }
    }
}

/// One on-chain call to be submitted by the wallet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRequest {
    pub to: Address,
    pub data: Bytes,
    pub value: U256,
}

/// Ordered call sequence for one execution attempt: zero or more ERC-20
/// approve calls followed by the quote's swap transactions, in order.
/// Created fresh per attempt and discarded after a terminal state.
#[derive(Debug, Clone, Default)]
pub struct CallPlan {
    pub calls: Vec<CallRequest>,
    /// Number of leading approve calls in `calls`.
    pub approval_count: usize,
}

impl CallPlan {
    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }
}

/// Terminal success of one `run_swap` attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapSuccess {
    /// Hash of the batch transaction, or of the final sequential call.
    pub tx_hash: H256,
    pub path_id: String,
}

/// Classified terminal failure of one `run_swap` attempt. Maps 1:1 onto the
/// user-facing failure taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapFailureKind {
    QuoteFailed,
    ApprovalCheckFailed,
    /// The quoted route is no longer valid on chain. Retryable: re-run
    /// `run_swap` to fetch a fresh quote.
    StaleQuote,
    /// The user declined at the wallet level. Retryable as-is.
    UserRejected,
    ExecutionFailed,
}

#[derive(Debug, Clone)]
pub struct SwapFailure {
    pub kind: SwapFailureKind,
    pub detail: String,
}

impl SwapFailure {
    pub fn new(kind: SwapFailureKind, detail: impl Into<String>) -> Self {
        Self { kind, detail: detail.into() }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self.kind, SwapFailureKind::StaleQuote | SwapFailureKind::UserRejected)
    }

    /// Human-readable reason shown to the user, distinguishing "you
    /// cancelled", "route expired" and "something went wrong".
    pub fn user_message(&self) -> &'static str {
        match self.kind {
            SwapFailureKind::QuoteFailed => "Could not get a price for your tokens. Please try again.",
            SwapFailureKind::ApprovalCheckFailed => "Could not verify token approvals. Please try again.",
            SwapFailureKind::StaleQuote => "Your quote expired. Fetch a new price and try again.",
            SwapFailureKind::UserRejected => "You cancelled the transaction in your wallet.",
            SwapFailureKind::ExecutionFailed => "Something went wrong. Check your balance and gas, then try again.",
        }
    }
}

impl std::fmt::Display for SwapFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.detail)
    }
}

/// Result surface of the orchestrator's single entry point.
pub type SwapResult = Result<SwapSuccess, SwapFailure>;

/// The record handed to the external history store after a confirmed swap.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwapRecord {
    pub user_address: Address,
    pub total_amount_usd: f64,
    pub fees_usd: f64,
    pub input_tokens: Vec<Address>,
    pub output_token: Address,
    pub amounts: Vec<U256>,
    pub tx_hash: H256,
    pub timestamp: DateTime<Utc>,
}
