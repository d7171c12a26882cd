//! # Call Plan Builder
//!
//! Assembles the ordered on-chain call list implied by a quote and the
//! resolved approval state: first one `approve` per token that needs it, in
//! `quote.in_tokens` iteration order, then every aggregator transaction
//! verbatim. Pure with respect to chain state; submission is the state
//! machine's job.

use crate::config::ApprovalPolicy;
use crate::types::{ApprovalStatus, CallPlan, CallRequest, Quote};
use ethers::abi::Token;
use ethers::types::{Address, Bytes, U256};
use lazy_static::lazy_static;
use std::collections::{HashMap, HashSet};
use tracing::debug;

lazy_static! {
    /// `approve(address,uint256)` selector.
    static ref APPROVE_SELECTOR: Vec<u8> = ethers::utils::id("approve(address,uint256)").to_vec();
}

/// Builds the call plan for one execution attempt.
///
/// Approvals use the allowance dictated by `policy`. The default unlimited
/// policy grants `U256::MAX` so later swaps through the same spender skip
/// the approve step entirely; the cost is a standing allowance that outlives
/// this swap, which is why the policy is configurable rather than baked in.
pub fn build_call_plan(
    quote: &Quote,
    approvals: &HashMap<Address, ApprovalStatus>,
    policy: ApprovalPolicy,
) -> CallPlan {
    let mut calls = Vec::with_capacity(quote.raw_transactions.len() + approvals.len());
    let mut seen: HashSet<Address> = HashSet::new();

    for token in &quote.in_tokens {
        if !seen.insert(*token) {
            continue;
        }
        let Some(status) = approvals.get(token) else { continue };
        if !status.needs_approval {
            continue;
        }
        let allowance = policy.allowance_for(status.required_amount);
        calls.push(CallRequest {
            to: *token,
            data: encode_approve(quote.spender, allowance),
            value: U256::zero(),
        });
    }
    let approval_count = calls.len();

    // Aggregator call data must never be mutated; append verbatim, in the
    // order the quote returned it.
    for tx in &quote.raw_transactions {
        calls.push(CallRequest { to: tx.to, data: tx.data.clone(), value: tx.value });
    }

    debug!(
        target: "plan",
        approvals = approval_count,
        swaps = quote.raw_transactions.len(),
        path_id = %quote.path_id,
        "call plan built"
    );
    CallPlan { calls, approval_count }
}

fn encode_approve(spender: Address, amount: U256) -> Bytes {
    let mut data = APPROVE_SELECTOR.clone();
    data.extend_from_slice(&ethers::abi::encode(&[
        Token::Address(spender),
        Token::Uint(amount),
    ]));
    Bytes::from(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RawTransaction;
    use std::time::Instant;

    fn quote_with(tokens: &[Address], spender: Address, swaps: usize) -> Quote {
        Quote {
            path_id: "zx-batch-test".into(),
            in_tokens: tokens.to_vec(),
            in_amounts: tokens.iter().map(|_| U256::from(1_000u64)).collect(),
            out_tokens: tokens.iter().map(|_| Address::repeat_byte(0xaa)).collect(),
            out_amounts: tokens.iter().map(|_| U256::from(900u64)).collect(),
            spender,
            gas_estimate: U256::from(100_000u64),
            fee_amount: U256::zero(),
            raw_transactions: (0..swaps)
                .map(|i| RawTransaction {
                    to: Address::repeat_byte(0x99),
                    data: Bytes::from(vec![i as u8, 0xde, 0xad]),
                    value: U256::zero(),
                })
                .collect(),
            retry_count: 0,
            issued_at: Instant::now(),
        }
    }

    fn status(token: Address, needs: bool) -> ApprovalStatus {
        ApprovalStatus {
            token,
            current_allowance: if needs { U256::zero() } else { U256::MAX },
            required_amount: U256::from(1_000u64),
            needs_approval: needs,
        }
    }

    #[test]
    fn approvals_precede_swaps_in_token_order() {
        let t1 = Address::repeat_byte(0x01);
        let t2 = Address::repeat_byte(0x02);
        let t3 = Address::repeat_byte(0x03);
        let spender = Address::repeat_byte(0x55);
        let quote = quote_with(&[t1, t2, t3], spender, 3);
        let approvals = HashMap::from([
            (t1, status(t1, true)),
            (t2, status(t2, false)),
            (t3, status(t3, true)),
        ]);

        let plan = build_call_plan(&quote, &approvals, ApprovalPolicy::Unlimited);
        assert_eq!(plan.approval_count, 2);
        assert_eq!(plan.len(), 5);
        // Approvals keep quote iteration order: t1 then t3.
        assert_eq!(plan.calls[0].to, t1);
        assert_eq!(plan.calls[1].to, t3);
        for call in &plan.calls[..2] {
            assert_eq!(&call.data[..4], &APPROVE_SELECTOR[..]);
        }
        // Swap payloads are untouched.
        for (i, call) in plan.calls[2..].iter().enumerate() {
            assert_eq!(call.data, Bytes::from(vec![i as u8, 0xde, 0xad]));
        }
    }

    #[test]
    fn duplicate_in_tokens_emit_one_approve() {
        let t1 = Address::repeat_byte(0x01);
        let spender = Address::repeat_byte(0x55);
        let quote = quote_with(&[t1, t1], spender, 2);
        let approvals = HashMap::from([(t1, status(t1, true))]);
        let plan = build_call_plan(&quote, &approvals, ApprovalPolicy::Unlimited);
        assert_eq!(plan.approval_count, 1);
        assert_eq!(plan.len(), 3);
    }

    #[test]
    fn unlimited_policy_encodes_max_allowance() {
        let t1 = Address::repeat_byte(0x01);
        let spender = Address::repeat_byte(0x55);
        let quote = quote_with(&[t1], spender, 1);
        let approvals = HashMap::from([(t1, status(t1, true))]);

        let unlimited = build_call_plan(&quote, &approvals, ApprovalPolicy::Unlimited);
        let amount_word = &unlimited.calls[0].data[4 + 32..4 + 64];
        assert!(amount_word.iter().all(|b| *b == 0xff));

        let exact = build_call_plan(&quote, &approvals, ApprovalPolicy::Exact);
        let amount = U256::from_big_endian(&exact.calls[0].data[4 + 32..4 + 64]);
        assert_eq!(amount, U256::from(1_000u64));
        // Spender word is right-aligned in the first argument slot.
        let spender_word = &exact.calls[0].data[4..4 + 32];
        assert_eq!(&spender_word[12..], spender.as_bytes());
    }

    #[test]
    fn fully_approved_plan_is_swaps_only() {
        let t1 = Address::repeat_byte(0x01);
        let quote = quote_with(&[t1], Address::repeat_byte(0x55), 1);
        let approvals = HashMap::from([(t1, status(t1, false))]);
        let plan = build_call_plan(&quote, &approvals, ApprovalPolicy::Unlimited);
        assert_eq!(plan.approval_count, 0);
        assert_eq!(plan.len(), 1);
    }
}
