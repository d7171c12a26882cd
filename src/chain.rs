//! # Chain Reader
//!
//! A read-only, retrying interface to an EVM-compatible chain. This module's
//! sole responsibility is a clean abstraction over the JSON-RPC reads the
//! orchestrator needs: balances, ERC-20 allowance/decimals, bytecode
//! presence and transaction receipts. It never signs or submits anything —
//! submission belongs to the wallet behind `executor::WalletClient`.

use crate::errors::ChainError;
use async_trait::async_trait;
use ethers::{
    abi::Token,
    providers::{Http, Middleware, Provider},
    types::{Address, Bytes, TransactionReceipt, TransactionRequest, H256, U256},
};
use lazy_static::lazy_static;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

lazy_static! {
    /// `allowance(address,address)` selector.
    static ref ALLOWANCE_SELECTOR: Vec<u8> = ethers::utils::id("allowance(address,address)").to_vec();
    /// `decimals()` selector.
    static ref DECIMALS_SELECTOR: Vec<u8> = ethers::utils::id("decimals()").to_vec();
}

/// Retry configuration for transient RPC failures.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(200),
            jitter_factor: 0.1,
        }
    }
}

/// Read-only blockchain accessor used by approval resolution and capability
/// detection.
#[async_trait]
pub trait ChainReader: std::fmt::Debug + Send + Sync {
    fn chain_id(&self) -> u64;

    async fn get_balance(&self, address: Address) -> Result<U256, ChainError>;
    async fn get_code(&self, address: Address) -> Result<Bytes, ChainError>;
    async fn get_allowance(
        &self,
        token: Address,
        owner: Address,
        spender: Address,
    ) -> Result<U256, ChainError>;
    async fn get_token_decimals(&self, token: Address) -> Result<u8, ChainError>;
    async fn get_transaction_receipt(
        &self,
        tx_hash: H256,
    ) -> Result<Option<TransactionReceipt>, ChainError>;
}

/// `ChainReader` backed by an ethers HTTP provider.
#[derive(Debug, Clone)]
pub struct EthersChainReader {
    provider: Arc<Provider<Http>>,
    chain_id: u64,
    retry: RetryConfig,
}

impl EthersChainReader {
    pub fn new(provider: Arc<Provider<Http>>, chain_id: u64) -> Self {
        Self { provider, chain_id, retry: RetryConfig::default() }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn from_url(rpc_url: &str, chain_id: u64) -> Result<Self, ChainError> {
        let provider = Provider::<Http>::try_from(rpc_url)
            .map_err(|e| ChainError::Provider(format!("invalid RPC URL {}: {}", rpc_url, e)))?;
        Ok(Self::new(Arc::new(provider), chain_id))
    }

    /// Runs `op` with bounded exponential backoff and jitter. Only transport
    /// failures are retried; a well-formed response that fails to decode is
    /// returned immediately.
    async fn with_retries<T, F, Fut>(&self, label: &str, op: F) -> Result<T, ChainError>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T, ChainError>>,
    {
        let mut last_error = ChainError::Provider("no attempts made".to_string());
        for attempt in 0..=self.retry.max_retries {
            if attempt > 0 {
                let base = self.retry.initial_delay * 2u32.saturating_pow(attempt - 1);
                let jitter = rand::thread_rng().gen_range(0.0..self.retry.jitter_factor);
                let delay = base.mul_f64(1.0 + jitter);
                debug!(target: "chain", label, attempt, delay_ms = delay.as_millis() as u64, "retrying RPC call");
                tokio::time::sleep(delay).await;
            }
            match op().await {
                Ok(value) => return Ok(value),
                Err(e @ ChainError::Decode(_)) => return Err(e),
                Err(e) => {
                    warn!(target: "chain", label, attempt, error = %e, "RPC call failed");
                    last_error = e;
                }
            }
        }
        Err(ChainError::RetriesExhausted {
            attempts: self.retry.max_retries + 1,
            last_error: last_error.to_string(),
        })
    }

    async fn eth_call(&self, to: Address, data: Vec<u8>) -> Result<Bytes, ChainError> {
        let tx = TransactionRequest::new().to(to).data(Bytes::from(data));
        self.provider
            .call(&tx.into(), None)
            .await
            .map_err(|e| ChainError::Provider(e.to_string()))
    }
}

#[async_trait]
impl ChainReader for EthersChainReader {
    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    async fn get_balance(&self, address: Address) -> Result<U256, ChainError> {
        self.with_retries("get_balance", || async {
            self.provider
                .get_balance(address, None)
                .await
                .map_err(|e| ChainError::Provider(e.to_string()))
        })
        .await
    }

    async fn get_code(&self, address: Address) -> Result<Bytes, ChainError> {
        self.with_retries("get_code", || async {
            self.provider
                .get_code(address, None)
                .await
                .map_err(|e| ChainError::Provider(e.to_string()))
        })
        .await
    }

    async fn get_allowance(
        &self,
        token: Address,
        owner: Address,
        spender: Address,
    ) -> Result<U256, ChainError> {
        let mut data = ALLOWANCE_SELECTOR.clone();
        data.extend_from_slice(&ethers::abi::encode(&[
            Token::Address(owner),
            Token::Address(spender),
        ]));
        let raw = self
            .with_retries("get_allowance", || self.eth_call(token, data.clone()))
            .await?;
        decode_u256(&raw).ok_or_else(|| {
            ChainError::Decode(format!(
                "allowance({:?}) returned {} bytes, expected 32",
                token,
                raw.len()
            ))
        })
    }

    async fn get_token_decimals(&self, token: Address) -> Result<u8, ChainError> {
        let raw = self
            .with_retries("get_token_decimals", || {
                self.eth_call(token, DECIMALS_SELECTOR.clone())
            })
            .await?;
        let value = decode_u256(&raw).ok_or_else(|| {
            ChainError::Decode(format!("decimals({:?}) returned {} bytes", token, raw.len()))
        })?;
        if value > U256::from(u8::MAX) {
            return Err(ChainError::Decode(format!(
                "decimals({:?}) out of range: {}",
                token, value
            )));
        }
        Ok(value.as_u64() as u8)
    }

    async fn get_transaction_receipt(
        &self,
        tx_hash: H256,
    ) -> Result<Option<TransactionReceipt>, ChainError> {
        self.with_retries("get_transaction_receipt", || async {
            self.provider
                .get_transaction_receipt(tx_hash)
                .await
                .map_err(|e| ChainError::Provider(e.to_string()))
        })
        .await
    }
}

fn decode_u256(raw: &Bytes) -> Option<U256> {
    if raw.len() < 32 {
        return None;
    }
    Some(U256::from_big_endian(&raw[..32]))
}
