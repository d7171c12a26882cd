//! # dustsweep
//!
//! Multi-token consolidation swap orchestrator: takes a set of ERC-20 (plus
//! native coin) balances on one chain, obtains a combined aggregator quote
//! converting all of them into a single output token, resolves the on-chain
//! approvals the quote requires, detects whether the wallet can execute an
//! atomic multi-call batch or must run sequentially, and drives a
//! recoverable execution state machine to a classified terminal state.
//!
//! Entry point: [`orchestrator::SwapSession::run_swap`].

pub mod approval;
pub mod capability;
pub mod chain;
pub mod config;
pub mod errors;
pub mod executor;
pub mod external;
pub mod orchestrator;
pub mod plan;
pub mod quote;
pub mod types;

pub use errors::{ApprovalError, ChainError, ExecutionError, QuoteError, SwapError};
pub use orchestrator::{OutputToken, SwapSession};
pub use types::{
    InputLeg, Quote, SwapFailure, SwapFailureKind, SwapRecord, SwapResult, SwapSuccess,
};
