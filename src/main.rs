//! Dry-run planner binary: loads the config file, fetches a live combined
//! quote for the configured legs, resolves approvals against live chain
//! state and prints the resulting call plan — without connecting a wallet
//! or submitting anything. Useful for verifying aggregator credentials and
//! inspecting what a session would execute.
//!
//! Usage: `dustsweep-plan [config.json]` (default path `config.json`).

use dustsweep::approval::ApprovalResolver;
use dustsweep::chain::EthersChainReader;
use dustsweep::config::Config;
use dustsweep::plan::build_call_plan;
use dustsweep::quote::{QuoteClient, ZeroExClient};
use dustsweep::types::InputLeg;
use ethers::types::U256;
use eyre::{Context, Result};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args().nth(1).unwrap_or_else(|| "config.json".to_string());
    let config = Config::load(&config_path)?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("dustsweep={}", config.log_level)));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let dry_run = config
        .dry_run
        .as_ref()
        .ok_or_else(|| eyre::eyre!("config has no dry_run section; nothing to plan"))?;

    let legs: Vec<InputLeg> = dry_run
        .legs
        .iter()
        .map(|leg| {
            let amount = U256::from_dec_str(&leg.amount)
                .wrap_err_with(|| format!("invalid amount {:?} for {:?}", leg.amount, leg.token))?;
            Ok(InputLeg::new(leg.token, amount, leg.symbol.clone()))
        })
        .collect::<Result<_>>()?;

    let chain = Arc::new(EthersChainReader::from_url(
        &config.chain.rpc_url,
        config.chain.chain_id,
    )?);
    let api = ZeroExClient::new(
        config.aggregator.base_url.clone(),
        config.aggregator.api_key.clone(),
        config.chain.chain_id,
        config.aggregator.swap_fee_bps,
        config.aggregator.fee_recipient,
    )
    .map_err(|e| eyre::eyre!("failed to build aggregator client: {}", e))?;
    let quotes = QuoteClient::new(Arc::new(api), config.aggregator.retry.clone());

    let slippage_bps = dry_run
        .slippage_bps
        .unwrap_or(config.aggregator.default_slippage_bps);
    let quote = quotes
        .get_quote(&legs, dry_run.output_token, dry_run.owner, slippage_bps)
        .await?;
    info!(
        path_id = %quote.path_id,
        legs = quote.in_tokens.len(),
        gas_estimate = %quote.gas_estimate,
        fee = %quote.fee_amount,
        retries = quote.retry_count,
        "combined quote"
    );

    let resolver = ApprovalResolver::new(chain);
    let approvals = resolver.resolve(&quote, dry_run.owner).await?;
    for status in approvals.values() {
        info!(
            token = %status.token,
            allowance = %status.current_allowance,
            required = %status.required_amount,
            needs_approval = status.needs_approval,
            "approval status"
        );
    }

    let plan = build_call_plan(&quote, &approvals, config.approval_policy);
    info!(
        calls = plan.len(),
        approvals = plan.approval_count,
        swaps = plan.len() - plan.approval_count,
        "call plan (dry run, nothing submitted)"
    );
    for (i, call) in plan.calls.iter().enumerate() {
        let kind = if i < plan.approval_count { "approve" } else { "swap" };
        info!(index = i, kind, to = %call.to, value = %call.value, data_len = call.data.len(), "call");
    }
    Ok(())
}
