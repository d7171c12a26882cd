//! # Centralized Error Handling
//!
//! Hierarchical, typed errors for the whole orchestrator. Each subsystem owns
//! its own enum; `SwapError` is the umbrella used at the process boundary.
//! Terminal swap failures are *not* errors in this hierarchy — they are the
//! `SwapFailure` value returned by the orchestrator (see `types.rs`), because
//! a user rejection or a stale route is an expected outcome, not a fault.

use ethers::types::Address;
use thiserror::Error;

/// The top-level error type for infrastructure-level failures.
#[derive(Error, Debug)]
pub enum SwapError {
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Quote error: {0}")]
    Quote(#[from] QuoteError),
    #[error("Chain read error: {0}")]
    Chain(#[from] ChainError),
    #[error("Approval resolution error: {0}")]
    Approval(#[from] ApprovalError),
    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),
    #[error("Other error: {0}")]
    Other(String),
}

/// Failures while obtaining a combined quote from the aggregator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QuoteError {
    /// Caller bug: empty legs, a leg equal to the output token, a zero
    /// amount, or duplicate legs for one token. Fails fast, no network call.
    #[error("Invalid quote input: {0}")]
    InvalidInput(String),
    /// The aggregator reported that no route exists for a leg.
    #[error("No liquidity for {token:?} (amount {amount})")]
    NoLiquidity { token: Address, amount: String },
    /// The aggregator is unreachable, returned a hard 4xx, violated its own
    /// response contract, or exhausted the retry budget.
    #[error("Aggregator unavailable: {0}")]
    ProviderUnavailable(String),
}

/// Errors from the read-only blockchain accessor.
#[derive(Error, Debug, Clone)]
pub enum ChainError {
    #[error("RPC provider error: {0}")]
    Provider(String),
    #[error("Failed to decode chain response: {0}")]
    Decode(String),
    #[error("Retry budget exhausted after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },
}

/// Errors from approval-state resolution.
#[derive(Error, Debug, Clone)]
pub enum ApprovalError {
    /// Any per-token allowance read failed; approval status must be treated
    /// as unknown by the caller, never assumed approved.
    #[error("Approval check failed for {token:?}: {reason}")]
    CheckFailed { token: Address, reason: String },
}

/// Programming or wallet-transport errors inside the execution state machine.
/// Terminal outcomes (revert, rejection, stale quote) are reported through
/// `SwapFailure`, not through this enum.
#[derive(Error, Debug, Clone)]
pub enum ExecutionError {
    /// `run()` was invoked while a previous attempt was still in flight.
    #[error("Execution already in progress; run() requires an idle machine")]
    AlreadyRunning,
    #[error("Cannot execute an empty call plan")]
    EmptyPlan,
    #[error("Wallet transport error: {0}")]
    Wallet(String),
}

/// Errors from the external history-store collaborator. A write failure is
/// surfaced as a warning by the orchestrator and never rolls back a swap.
#[derive(Error, Debug, Clone)]
pub enum StoreError {
    #[error("History store write failed: {0}")]
    WriteFailed(String),
}

/// Errors from the external notifier collaborator. Silent drops are
/// tolerated; the orchestrator logs and moves on.
#[derive(Error, Debug, Clone)]
pub enum NotifyError {
    #[error("Notification payload invalid: {0}")]
    InvalidPayload(String),
    #[error("Notification delivery failed: {0}")]
    DeliveryFailed(String),
}
