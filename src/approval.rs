//! # Approval Resolver
//!
//! Compares each ERC-20 input leg's required amount against the live
//! allowance granted to the quote's spender. Statuses are recomputed from
//! chain state on every new quote — required amounts change between quotes,
//! and a completed approve from a failed earlier attempt must be picked up
//! here rather than remembered.

use crate::chain::ChainReader;
use crate::errors::ApprovalError;
use crate::types::{ApprovalStatus, Quote, NATIVE_TOKEN_SENTINEL};
use ethers::types::Address;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, instrument};

#[derive(Debug, Clone)]
pub struct ApprovalResolver {
    chain: Arc<dyn ChainReader>,
}

impl ApprovalResolver {
    pub fn new(chain: Arc<dyn ChainReader>) -> Self {
        Self { chain }
    }

    /// Resolves the approval status of every distinct input token against
    /// `quote.spender`. All allowance reads fan out concurrently; if any
    /// read fails the whole resolution fails and the caller must treat
    /// approval state as unknown.
    ///
    /// Comparison is against the leg's exact required amount, so a prior
    /// unlimited approval yields `needs_approval = false` without any
    /// special-casing.
    #[instrument(skip(self, quote), fields(spender = %quote.spender, legs = quote.in_tokens.len()))]
    pub async fn resolve(
        &self,
        quote: &Quote,
        owner: Address,
    ) -> Result<HashMap<Address, ApprovalStatus>, ApprovalError> {
        let mut required: HashMap<Address, ethers::types::U256> = HashMap::new();
        for (token, amount) in quote.in_tokens.iter().zip(quote.in_amounts.iter()) {
            // Merged upstream legs share a token only if the caller violated
            // the one-leg-per-token invariant; summing keeps us safe anyway.
            let entry = required.entry(*token).or_default();
            *entry = entry.saturating_add(*amount);
        }

        let checks = required.iter().map(|(token, amount)| {
            let chain = self.chain.clone();
            let token = *token;
            let amount = *amount;
            let spender = quote.spender;
            async move {
                if token == NATIVE_TOKEN_SENTINEL {
                    // The native coin carries no allowance concept.
                    return Ok(ApprovalStatus {
                        token,
                        current_allowance: ethers::types::U256::MAX,
                        required_amount: amount,
                        needs_approval: false,
                    });
                }
                let current_allowance = chain
                    .get_allowance(token, owner, spender)
                    .await
                    .map_err(|e| ApprovalError::CheckFailed { token, reason: e.to_string() })?;
                Ok(ApprovalStatus {
                    token,
                    current_allowance,
                    required_amount: amount,
                    needs_approval: current_allowance < amount,
                })
            }
        });

        let statuses = futures::future::try_join_all(checks).await?;
        let map: HashMap<Address, ApprovalStatus> =
            statuses.into_iter().map(|s| (s.token, s)).collect();
        debug!(
            target: "approval",
            pending = map.values().filter(|s| s.needs_approval).count(),
            total = map.len(),
            "approval statuses resolved"
        );
        Ok(map)
    }
}
