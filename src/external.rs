//! # External Collaborators
//!
//! Narrow contracts for the services around the orchestrator: swap-history
//! persistence, user notifications and the balance/price feed consumed by
//! display layers. These are deliberately thin — the orchestrator calls the
//! history store and notifier exactly once per terminal state and tolerates
//! their failure; it never depends on their internals.

use crate::errors::{NotifyError, StoreError};
use crate::types::SwapRecord;
use async_trait::async_trait;
use ethers::types::{Address, U256};
use reqwest::Client;
use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, warn};
use url::Url;

/// Notification payload limits (platform guidelines): title ≤32 chars,
/// body ≤128 chars, target URL ≤1024 chars and same-origin.
const MAX_TITLE_LEN: usize = 32;
const MAX_BODY_LEN: usize = 128;
const MAX_TARGET_URL_LEN: usize = 1024;

/// Persists confirmed swaps. A write failure must never roll back the
/// already-confirmed on-chain swap; callers log it and move on.
#[async_trait]
pub trait HistoryStore: std::fmt::Debug + Send + Sync {
    async fn record_swap(&self, record: &SwapRecord) -> Result<(), StoreError>;
}

/// Delivers user notifications. Rate limiting is enforced externally
/// (≤1 per 30 s, ≤100/day per user); callers tolerate silent drops.
#[async_trait]
pub trait Notifier: std::fmt::Debug + Send + Sync {
    async fn notify(&self, user_id: &str, payload: &NotificationPayload) -> Result<(), NotifyError>;
}

/// Read side of balance and price display. A missing price means "unknown",
/// never zero — display layers must not value a token at nothing just
/// because the feed has no quote for it.
#[async_trait]
pub trait BalanceFeed: std::fmt::Debug + Send + Sync {
    async fn get_balances(&self, address: Address) -> Result<HashMap<Address, U256>, StoreError>;
    async fn get_prices(
        &self,
        tokens: &[Address],
    ) -> Result<HashMap<Address, Option<f64>>, StoreError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationPayload {
    pub title: String,
    pub body: String,
    #[serde(rename = "targetURL")]
    pub target_url: String,
}

impl NotificationPayload {
    pub fn new(
        title: impl Into<String>,
        body: impl Into<String>,
        target_url: impl Into<String>,
    ) -> Self {
        Self { title: title.into(), body: body.into(), target_url: target_url.into() }
    }

    /// Checks the platform limits and, when `base_origin` is given, that the
    /// target URL shares its origin.
    pub fn validate(&self, base_origin: Option<&str>) -> Result<(), NotifyError> {
        if self.title.chars().count() > MAX_TITLE_LEN {
            return Err(NotifyError::InvalidPayload(format!(
                "title exceeds {} characters",
                MAX_TITLE_LEN
            )));
        }
        if self.body.chars().count() > MAX_BODY_LEN {
            return Err(NotifyError::InvalidPayload(format!(
                "body exceeds {} characters",
                MAX_BODY_LEN
            )));
        }
        if self.target_url.len() > MAX_TARGET_URL_LEN {
            return Err(NotifyError::InvalidPayload(format!(
                "target URL exceeds {} characters",
                MAX_TARGET_URL_LEN
            )));
        }
        if let Some(origin) = base_origin {
            let base = Url::parse(origin)
                .map_err(|e| NotifyError::InvalidPayload(format!("bad base origin: {}", e)))?;
            // Relative target URLs are same-origin by construction.
            if let Ok(target) = Url::parse(&self.target_url) {
                if target.origin() != base.origin() {
                    return Err(NotifyError::InvalidPayload(format!(
                        "target URL {} is not on origin {}",
                        self.target_url, origin
                    )));
                }
            }
        }
        Ok(())
    }

    /// "Swap Completed" template.
    pub fn swap_success(token_count: usize, output_symbol: &str) -> Self {
        let plural = if token_count == 1 { "" } else { "s" };
        Self::new(
            "Swap Completed",
            format!("Successfully swapped {} token{} to {}", token_count, plural, output_symbol),
            "/",
        )
    }

    /// "Swap Failed" template.
    pub fn swap_failed() -> Self {
        Self::new("Swap Failed", "Your swap transaction failed. Tap to try again.", "/")
    }

    /// Reminder that dust balances are waiting to be consolidated.
    pub fn dust_reminder(count: usize) -> Self {
        let plural = if count == 1 { "" } else { "s" };
        Self::new(
            "Clean Up Dust Tokens",
            format!("You have {} dust token{}. Consolidate them now to save on gas fees.", count, plural),
            "/",
        )
    }
}

/// History store that posts swap records as JSON to an HTTP endpoint.
#[derive(Debug, Clone)]
pub struct HttpHistoryStore {
    client: Client,
    endpoint: String,
}

impl HttpHistoryStore {
    pub fn new(client: Client, endpoint: impl Into<String>) -> Self {
        Self { client, endpoint: endpoint.into() }
    }
}

#[async_trait]
impl HistoryStore for HttpHistoryStore {
    async fn record_swap(&self, record: &SwapRecord) -> Result<(), StoreError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(record)
            .send()
            .await
            .map_err(|e| StoreError::WriteFailed(e.to_string()))?;
        if !response.status().is_success() {
            return Err(StoreError::WriteFailed(format!(
                "history endpoint returned {}",
                response.status()
            )));
        }
        debug!(target: "external", tx_hash = %record.tx_hash, "swap recorded");
        Ok(())
    }
}

/// Notifier that posts payloads to an HTTP webhook, validating limits and
/// origin before sending.
#[derive(Debug, Clone)]
pub struct HttpNotifier {
    client: Client,
    endpoint: String,
    base_origin: String,
}

impl HttpNotifier {
    pub fn new(client: Client, endpoint: impl Into<String>, base_origin: impl Into<String>) -> Self {
        Self { client, endpoint: endpoint.into(), base_origin: base_origin.into() }
    }
}

#[derive(Debug, Serialize)]
struct NotifyRequest<'a> {
    #[serde(rename = "fid")]
    user_id: &'a str,
    #[serde(flatten)]
    payload: &'a NotificationPayload,
}

#[async_trait]
impl Notifier for HttpNotifier {
    async fn notify(&self, user_id: &str, payload: &NotificationPayload) -> Result<(), NotifyError> {
        payload.validate(Some(&self.base_origin))?;
        let response = self
            .client
            .post(&self.endpoint)
            .json(&NotifyRequest { user_id, payload })
            .send()
            .await
            .map_err(|e| NotifyError::DeliveryFailed(e.to_string()))?;
        if !response.status().is_success() {
            // Externally rate-limited; a drop here is tolerated upstream.
            warn!(target: "external", status = %response.status(), "notification not delivered");
            return Err(NotifyError::DeliveryFailed(format!(
                "notifier endpoint returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}

/// Balance feed backed by the companion HTTP API: one batched POST per
/// balances request, one per prices request.
#[derive(Debug, Clone)]
pub struct HttpBalanceFeed {
    client: Client,
    balances_endpoint: String,
    prices_endpoint: String,
    /// The curated token universe the feed reports on.
    tokens: Vec<Address>,
}

impl HttpBalanceFeed {
    pub fn new(
        client: Client,
        balances_endpoint: impl Into<String>,
        prices_endpoint: impl Into<String>,
        tokens: Vec<Address>,
    ) -> Self {
        Self {
            client,
            balances_endpoint: balances_endpoint.into(),
            prices_endpoint: prices_endpoint.into(),
            tokens,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BalancesRequest<'a> {
    address: Address,
    token_addresses: &'a [Address],
}

#[derive(Debug, serde::Deserialize)]
struct BalancesReply {
    /// Token address to amount in smallest units, as decimal strings.
    #[serde(default)]
    balances: HashMap<Address, String>,
}

#[derive(Debug, serde::Deserialize)]
struct PricesReply {
    /// Token address to USD price; `null` means the feed has no quote.
    #[serde(default)]
    prices: HashMap<Address, Option<f64>>,
}

#[async_trait]
impl BalanceFeed for HttpBalanceFeed {
    async fn get_balances(&self, address: Address) -> Result<HashMap<Address, U256>, StoreError> {
        let reply: BalancesReply = self
            .client
            .post(&self.balances_endpoint)
            .json(&BalancesRequest { address, token_addresses: &self.tokens })
            .send()
            .await
            .map_err(|e| StoreError::WriteFailed(e.to_string()))?
            .json()
            .await
            .map_err(|e| StoreError::WriteFailed(e.to_string()))?;
        let mut balances = HashMap::with_capacity(reply.balances.len());
        for (token, raw) in reply.balances {
            let amount = U256::from_dec_str(&raw)
                .map_err(|e| StoreError::WriteFailed(format!("bad balance for {:?}: {}", token, e)))?;
            balances.insert(token, amount);
        }
        Ok(balances)
    }

    async fn get_prices(
        &self,
        tokens: &[Address],
    ) -> Result<HashMap<Address, Option<f64>>, StoreError> {
        let reply: PricesReply = self
            .client
            .post(&self.prices_endpoint)
            .json(&serde_json::json!({ "tokens": tokens }))
            .send()
            .await
            .map_err(|e| StoreError::WriteFailed(e.to_string()))?
            .json()
            .await
            .map_err(|e| StoreError::WriteFailed(e.to_string()))?;
        Ok(reply.prices)
    }
}
