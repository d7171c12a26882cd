//! # Aggregator Quote Client
//!
//! Fetches and merges swap quotes from an external aggregation API. The
//! aggregator has no native multi-input endpoint, so `QuoteClient` issues
//! one upstream request per input leg with bounded retry, then merges the
//! sub-quotes into a single combined [`Quote`]. No partial quotes: if any
//! leg exhausts its retry budget, the whole request fails.

use crate::config::RetrySettings;
use crate::errors::QuoteError;
use crate::types::{InputLeg, Quote, RawTransaction};
use async_trait::async_trait;
use ethers::types::{Address, Bytes, U256};
use rand::Rng;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

/// Timeout for HTTP requests to the aggregator API.
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// One upstream sub-quote, already decoded into chain types.
#[derive(Debug, Clone)]
pub struct LegQuote {
    pub sell_token: Address,
    pub buy_token: Address,
    pub sell_amount: U256,
    pub buy_amount: U256,
    pub gas_estimate: U256,
    pub integrator_fee: U256,
    /// The contract that must be granted allowance for this leg's sell token.
    pub allowance_target: Address,
    pub transaction: RawTransaction,
}

/// Transport-level failure of a single upstream request. `QuoteClient`
/// classifies these into retryable and terminal.
#[derive(Debug, Clone)]
pub enum AggregatorError {
    /// Non-success HTTP status from the aggregator.
    Http { status: u16, body: String },
    /// Connection, timeout or DNS failure before any status was received.
    Transport(String),
    /// A 200 response that violated the aggregator's own schema.
    Decode(String),
    /// The aggregator reported no route for this leg.
    NoLiquidity,
}

impl fmt::Display for AggregatorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AggregatorError::Http { status, body } => write!(f, "HTTP {}: {}", status, body),
            AggregatorError::Transport(msg) => write!(f, "transport error: {}", msg),
            AggregatorError::Decode(msg) => write!(f, "decode error: {}", msg),
            AggregatorError::NoLiquidity => write!(f, "no liquidity"),
        }
    }
}

impl AggregatorError {
    /// 429 and 5xx are worth retrying; other 4xx statuses are a terminal
    /// answer from the provider. Transport failures are retryable.
    fn is_retryable(&self) -> bool {
        match self {
            AggregatorError::Http { status, .. } => {
                *status == 429 || (500..600).contains(&(*status as i32))
            }
            AggregatorError::Transport(_) => true,
            AggregatorError::Decode(_) | AggregatorError::NoLiquidity => false,
        }
    }
}

/// A standardized interface for any single-leg aggregator API.
#[async_trait]
pub trait AggregatorApi: Send + Sync + fmt::Debug {
    /// Fetches one firm sub-quote: sell the leg's full amount for
    /// `output_token`, with embedded transaction data.
    async fn fetch_leg_quote(
        &self,
        leg: &InputLeg,
        output_token: Address,
        taker: Address,
        slippage_bps: u32,
    ) -> Result<LegQuote, AggregatorError>;

    fn name(&self) -> &'static str;
}

//================================================================================================//
//                                    0x API IMPLEMENTATION                                       //
//================================================================================================//

/// First decode stage. The no-route reply is a bare
/// `{"liquidityAvailable": false}` without any quote fields, so liquidity
/// must be probed before the full quote shape is required.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ZeroExLiquidityProbe {
    #[serde(default = "default_liquidity")]
    liquidity_available: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ZeroExQuoteReply {
    sell_token: Address,
    buy_token: Address,
    sell_amount: String,
    buy_amount: String,
    gas: Option<String>,
    #[serde(default)]
    fees: ZeroExFees,
    allowance_target: Address,
    transaction: ZeroExTransaction,
}

fn default_liquidity() -> bool {
    true
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ZeroExFees {
    integrator_fee: Option<ZeroExFee>,
}

#[derive(Debug, Clone, Deserialize)]
struct ZeroExFee {
    amount: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ZeroExTransaction {
    to: Address,
    data: Bytes,
    value: String,
}

/// Firm-quote client for the 0x allowance-holder v2 endpoint.
#[derive(Debug, Clone)]
pub struct ZeroExClient {
    client: Client,
    base_url: String,
    api_key: String,
    chain_id: u64,
    swap_fee_bps: u32,
    fee_recipient: Option<Address>,
}

impl ZeroExClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        chain_id: u64,
        swap_fee_bps: u32,
        fee_recipient: Option<Address>,
    ) -> Result<Self, AggregatorError> {
        let client = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .user_agent("dustsweep/0.3")
            .build()
            .map_err(|e| AggregatorError::Transport(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            api_key: api_key.into(),
            chain_id,
            swap_fee_bps,
            fee_recipient,
        })
    }
}

#[async_trait]
impl AggregatorApi for ZeroExClient {
    fn name(&self) -> &'static str {
        "0x"
    }

    #[instrument(skip(self), fields(token = %leg.token, amount = %leg.amount))]
    async fn fetch_leg_quote(
        &self,
        leg: &InputLeg,
        output_token: Address,
        taker: Address,
        slippage_bps: u32,
    ) -> Result<LegQuote, AggregatorError> {
        let mut params = vec![
            ("chainId", self.chain_id.to_string()),
            ("sellToken", format!("{:#x}", leg.token)),
            ("buyToken", format!("{:#x}", output_token)),
            ("sellAmount", leg.amount.to_string()),
            ("taker", format!("{:#x}", taker)),
            ("slippageBps", slippage_bps.to_string()),
        ];
        if let Some(recipient) = self.fee_recipient {
            params.push(("swapFeeBps", self.swap_fee_bps.to_string()));
            params.push(("swapFeeRecipient", format!("{:#x}", recipient)));
            // Collect the fee in the output token.
            params.push(("swapFeeToken", format!("{:#x}", output_token)));
        }

        let url = format!("{}/swap/allowance-holder/quote", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&params)
            .header("0x-api-key", &self.api_key)
            .header("0x-version", "v2")
            .send()
            .await
            .map_err(|e| AggregatorError::Transport(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| AggregatorError::Transport(format!("failed to read body: {}", e)))?;

        if !status.is_success() {
            if status == StatusCode::BAD_REQUEST && text.contains("insufficient liquidity") {
                return Err(AggregatorError::NoLiquidity);
            }
            return Err(AggregatorError::Http { status: status.as_u16(), body: text });
        }

        decode_leg_reply(&text)
    }
}

/// Decodes one 200 body from the allowance-holder quote endpoint. Probes
/// liquidity first: a no-route reply carries no quote fields and must
/// classify as `NoLiquidity`, not as a schema violation.
fn decode_leg_reply(text: &str) -> Result<LegQuote, AggregatorError> {
    let probe: ZeroExLiquidityProbe = serde_json::from_str(text)
        .map_err(|e| AggregatorError::Decode(format!("{} - response: {}", e, text)))?;
    if !probe.liquidity_available {
        return Err(AggregatorError::NoLiquidity);
    }

    let reply: ZeroExQuoteReply = serde_json::from_str(text)
        .map_err(|e| AggregatorError::Decode(format!("{} - response: {}", e, text)))?;

    let sell_amount = parse_dec_u256(&reply.sell_amount, "sellAmount")?;
    let buy_amount = parse_dec_u256(&reply.buy_amount, "buyAmount")?;
    let gas_estimate = match &reply.gas {
        Some(gas) => parse_dec_u256(gas, "gas")?,
        None => U256::from(200_000u64),
    };
    let integrator_fee = match &reply.fees.integrator_fee {
        Some(fee) => parse_dec_u256(&fee.amount, "integratorFee")?,
        None => U256::zero(),
    };
    let value = parse_dec_u256(&reply.transaction.value, "transaction.value")?;

    Ok(LegQuote {
        sell_token: reply.sell_token,
        buy_token: reply.buy_token,
        sell_amount,
        buy_amount,
        gas_estimate,
        integrator_fee,
        allowance_target: reply.allowance_target,
        transaction: RawTransaction {
            to: reply.transaction.to,
            data: reply.transaction.data,
            value,
        },
    })
}

fn parse_dec_u256(raw: &str, field: &str) -> Result<U256, AggregatorError> {
    U256::from_dec_str(raw)
        .map_err(|e| AggregatorError::Decode(format!("invalid {} {:?}: {}", field, raw, e)))
}

//================================================================================================//
//                                        QUOTE CLIENT                                            //
//================================================================================================//

/// Merges per-leg aggregator sub-quotes into one combined quote, with
/// bounded per-leg retry. Pure with respect to the rest of the pipeline: it
/// mutates nothing outside its own network calls.
#[derive(Debug, Clone)]
pub struct QuoteClient {
    api: Arc<dyn AggregatorApi>,
    retry: RetrySettings,
}

impl QuoteClient {
    pub fn new(api: Arc<dyn AggregatorApi>, retry: RetrySettings) -> Self {
        Self { api, retry }
    }

    /// Obtains a combined quote converting every leg into `output_token`.
    ///
    /// Guarantees `quote.in_tokens.len() == legs.len()` on success — a leg
    /// is never silently dropped. Input violations (empty legs, zero
    /// amounts, duplicates, output-token collision) fail fast with
    /// `InvalidInput` before any network call is made.
    #[instrument(skip(self, legs), fields(source = self.api.name(), legs = legs.len(), output = %output_token))]
    pub async fn get_quote(
        &self,
        legs: &[InputLeg],
        output_token: Address,
        owner: Address,
        slippage_bps: u32,
    ) -> Result<Quote, QuoteError> {
        validate_legs(legs, output_token)?;

        let mut leg_quotes = Vec::with_capacity(legs.len());
        let mut total_retries = 0u32;
        for leg in legs {
            let (leg_quote, retries) = self
                .fetch_leg_with_retry(leg, output_token, owner, slippage_bps)
                .await?;
            total_retries += retries;
            leg_quotes.push(leg_quote);
        }

        let quote = merge_leg_quotes(leg_quotes, total_retries)?;
        info!(
            target: "quote",
            path_id = %quote.path_id,
            legs = quote.in_tokens.len(),
            retries = total_retries,
            fee = %quote.fee_amount,
            "combined quote assembled"
        );
        Ok(quote)
    }

    /// Fetches one leg with up to `max_attempts` tries. Returns the
    /// sub-quote and how many retries it cost (for diagnostics).
    async fn fetch_leg_with_retry(
        &self,
        leg: &InputLeg,
        output_token: Address,
        owner: Address,
        slippage_bps: u32,
    ) -> Result<(LegQuote, u32), QuoteError> {
        let mut last_error: Option<AggregatorError> = None;
        for attempt in 0..self.retry.max_attempts {
            if attempt > 0 {
                // Backoff scales with the attempt index, plus jitter so
                // concurrent sessions don't hammer the API in lockstep.
                let base = self.retry.base_delay() * attempt;
                let jitter = rand::thread_rng().gen_range(0..=base.as_millis().max(1) as u64 / 4);
                let delay = base + Duration::from_millis(jitter);
                debug!(target: "quote", token = %leg.token, attempt, delay_ms = delay.as_millis() as u64, "retrying leg quote");
                tokio::time::sleep(delay).await;
            }
            match self
                .api
                .fetch_leg_quote(leg, output_token, owner, slippage_bps)
                .await
            {
                Ok(leg_quote) => return Ok((leg_quote, attempt)),
                Err(AggregatorError::NoLiquidity) => {
                    return Err(QuoteError::NoLiquidity {
                        token: leg.token,
                        amount: leg.amount.to_string(),
                    });
                }
                Err(e) if e.is_retryable() => {
                    warn!(target: "quote", token = %leg.token, attempt, error = %e, "leg quote failed, will retry");
                    last_error = Some(e);
                }
                Err(e) => {
                    return Err(QuoteError::ProviderUnavailable(format!(
                        "leg {:?}: {}",
                        leg.token, e
                    )));
                }
            }
        }
        let detail = last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "no attempts made".to_string());
        Err(QuoteError::ProviderUnavailable(format!(
            "leg {:?} exhausted {} attempts: {}",
            leg.token, self.retry.max_attempts, detail
        )))
    }
}

fn validate_legs(legs: &[InputLeg], output_token: Address) -> Result<(), QuoteError> {
    if legs.is_empty() {
        return Err(QuoteError::InvalidInput("no input legs".to_string()));
    }
    let mut seen = HashSet::with_capacity(legs.len());
    for leg in legs {
        if leg.amount.is_zero() {
            return Err(QuoteError::InvalidInput(format!(
                "zero amount for {:?}",
                leg.token
            )));
        }
        if leg.token == output_token {
            return Err(QuoteError::InvalidInput(format!(
                "leg {:?} equals the output token; filter it before quoting",
                leg.token
            )));
        }
        if !seen.insert(leg.token) {
            return Err(QuoteError::InvalidInput(format!(
                "duplicate leg for {:?}; merge legs per token before quoting",
                leg.token
            )));
        }
    }
    Ok(())
}

/// Concatenates per-leg sub-quotes into one combined quote and synthesizes
/// a client-local aggregate path id.
fn merge_leg_quotes(leg_quotes: Vec<LegQuote>, retry_count: u32) -> Result<Quote, QuoteError> {
    debug_assert!(!leg_quotes.is_empty());
    let spender = leg_quotes[0].allowance_target;
    if let Some(odd) = leg_quotes.iter().find(|q| q.allowance_target != spender) {
        // Every allowance-holder quote on one chain shares a spender; a
        // mismatch means the provider broke its contract mid-request.
        return Err(QuoteError::ProviderUnavailable(format!(
            "inconsistent allowance targets across legs: {:?} vs {:?}",
            spender, odd.allowance_target
        )));
    }

    let mut quote = Quote {
        path_id: synthesize_path_id(),
        in_tokens: Vec::with_capacity(leg_quotes.len()),
        in_amounts: Vec::with_capacity(leg_quotes.len()),
        out_tokens: Vec::with_capacity(leg_quotes.len()),
        out_amounts: Vec::with_capacity(leg_quotes.len()),
        spender,
        gas_estimate: U256::zero(),
        fee_amount: U256::zero(),
        raw_transactions: Vec::with_capacity(leg_quotes.len()),
        retry_count,
        issued_at: Instant::now(),
    };
    for leg in leg_quotes {
        quote.in_tokens.push(leg.sell_token);
        quote.in_amounts.push(leg.sell_amount);
        quote.out_tokens.push(leg.buy_token);
        quote.out_amounts.push(leg.buy_amount);
        quote.gas_estimate = quote.gas_estimate.saturating_add(leg.gas_estimate);
        quote.fee_amount = quote.fee_amount.saturating_add(leg.integrator_fee);
        quote.raw_transactions.push(leg.transaction);
    }
    Ok(quote)
}

fn synthesize_path_id() -> String {
    let nonce: u64 = rand::thread_rng().gen();
    format!(
        "zx-batch-{}-{:08x}",
        chrono::Utc::now().timestamp_millis(),
        nonce as u32
    )
}
