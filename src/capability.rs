//! # Wallet Capability Detection
//!
//! Determines whether the connected account can execute atomic batched
//! calls (EIP-5792-style capability query) and whether it is a contract or
//! a plain key-pair account (bytecode presence). Detection never fails:
//! every unknown resolves to the conservative default, because assuming
//! batch support when absent would silently drop transactions.

use crate::chain::ChainReader;
use crate::executor::WalletClient;
use crate::types::{AccountKind, WalletCapabilities};
use ethers::types::Address;
use moka::future::Cache;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Session-scoped detector with a per-(address, chain) cache. Constructed
/// once per user session and invalidated wholesale on address or chain
/// change; no ambient global state.
#[derive(Debug, Clone)]
pub struct CapabilityDetector {
    chain: Arc<dyn ChainReader>,
    wallet: Arc<dyn WalletClient>,
    cache: Cache<(Address, u64), WalletCapabilities>,
}

impl CapabilityDetector {
    pub fn new(chain: Arc<dyn ChainReader>, wallet: Arc<dyn WalletClient>) -> Self {
        Self {
            chain,
            wallet,
            cache: Cache::builder().max_capacity(64).build(),
        }
    }

    /// Detects capabilities for `address` on the reader's chain. Cached for
    /// the session; infallible by contract.
    #[instrument(skip(self), fields(address = %address))]
    pub async fn detect(&self, address: Address) -> WalletCapabilities {
        let key = (address, self.chain.chain_id());
        if let Some(cached) = self.cache.get(&key).await {
            return cached;
        }

        let atomic_batch_supported = match self
            .wallet
            .supports_atomic_batch(address, self.chain.chain_id())
            .await
        {
            Ok(supported) => supported,
            Err(e) => {
                warn!(target: "capability", error = %e, "capability query failed, assuming no batch support");
                false
            }
        };

        let account_kind = match self.chain.get_code(address).await {
            Ok(code) if code.is_empty() => AccountKind::Plain,
            Ok(_) => AccountKind::Contract,
            Err(e) => {
                warn!(target: "capability", error = %e, "bytecode read failed, account kind unknown");
                AccountKind::Unknown
            }
        };

        let capabilities = WalletCapabilities { atomic_batch_supported, account_kind };
        debug!(
            target: "capability",
            atomic = capabilities.atomic_batch_supported,
            kind = ?capabilities.account_kind,
            "wallet capabilities detected"
        );
        self.cache.insert(key, capabilities).await;
        capabilities
    }

    /// Drops every cached entry. Called on address or chain change; the
    /// session repairs nothing incrementally.
    pub fn invalidate(&self) {
        self.cache.invalidate_all();
    }
}
