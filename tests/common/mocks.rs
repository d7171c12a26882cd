//! Shared mock collaborators for pipeline tests: a programmable chain
//! reader, a scripted aggregator API, a scripted wallet, and recording
//! history/notifier sinks.

use async_trait::async_trait;
use ethers::types::{Address, Bytes, TransactionReceipt, H256, U256};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use dustsweep::chain::ChainReader;
use dustsweep::errors::{ChainError, ExecutionError, NotifyError, StoreError};
use dustsweep::executor::{CallOutcome, WalletClient};
use dustsweep::external::{HistoryStore, NotificationPayload, Notifier};
use dustsweep::quote::{AggregatorApi, AggregatorError, LegQuote};
use dustsweep::types::{CallRequest, InputLeg, RawTransaction, SwapRecord};

// === Mock chain reader ===

#[derive(Debug, Default)]
pub struct MockChainReader {
    pub chain_id: u64,
    /// (token, owner, spender) -> allowance. Missing entries read as zero.
    pub allowances: Mutex<HashMap<(Address, Address, Address), U256>>,
    /// Addresses with deployed bytecode.
    pub contracts: Mutex<HashMap<Address, Bytes>>,
    pub allowance_reads: AtomicU32,
    pub fail_allowance_reads: Mutex<bool>,
}

impl MockChainReader {
    pub fn new(chain_id: u64) -> Self {
        Self { chain_id, ..Default::default() }
    }

    pub fn set_allowance(&self, token: Address, owner: Address, spender: Address, value: U256) {
        self.allowances.lock().unwrap().insert((token, owner, spender), value);
    }

    pub fn set_contract_code(&self, address: Address, code: Bytes) {
        self.contracts.lock().unwrap().insert(address, code);
    }

    pub fn set_fail_allowance_reads(&self, fail: bool) {
        *self.fail_allowance_reads.lock().unwrap() = fail;
    }
}

#[async_trait]
impl ChainReader for MockChainReader {
    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    async fn get_balance(&self, _address: Address) -> Result<U256, ChainError> {
        Ok(U256::zero())
    }

    async fn get_code(&self, address: Address) -> Result<Bytes, ChainError> {
        Ok(self
            .contracts
            .lock()
            .unwrap()
            .get(&address)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_allowance(
        &self,
        token: Address,
        owner: Address,
        spender: Address,
    ) -> Result<U256, ChainError> {
        self.allowance_reads.fetch_add(1, Ordering::SeqCst);
        if *self.fail_allowance_reads.lock().unwrap() {
            return Err(ChainError::Provider("simulated RPC outage".to_string()));
        }
        Ok(self
            .allowances
            .lock()
            .unwrap()
            .get(&(token, owner, spender))
            .copied()
            .unwrap_or_default())
    }

    async fn get_token_decimals(&self, _token: Address) -> Result<u8, ChainError> {
        Ok(18)
    }

    async fn get_transaction_receipt(
        &self,
        _tx_hash: H256,
    ) -> Result<Option<TransactionReceipt>, ChainError> {
        Ok(None)
    }
}

// === Mock aggregator ===

/// Replays scripted per-request responses in order and counts upstream
/// calls, so tests can assert both retry behavior and "no network call"
/// guarantees.
#[derive(Debug, Default)]
pub struct MockAggregator {
    pub responses: Mutex<VecDeque<Result<LegQuote, AggregatorError>>>,
    pub calls: AtomicU32,
}

impl MockAggregator {
    pub fn scripted(responses: Vec<Result<LegQuote, AggregatorError>>) -> Self {
        Self { responses: Mutex::new(responses.into()), calls: AtomicU32::new(0) }
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn push(&self, response: Result<LegQuote, AggregatorError>) {
        self.responses.lock().unwrap().push_back(response);
    }
}

#[async_trait]
impl AggregatorApi for MockAggregator {
    async fn fetch_leg_quote(
        &self,
        _leg: &InputLeg,
        _output_token: Address,
        _taker: Address,
        _slippage_bps: u32,
    ) -> Result<LegQuote, AggregatorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .expect("mock aggregator ran out of scripted responses")
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

/// A plausible sub-quote: sell `amount` of `token` for `buy_amount` of
/// `output`, spender fixed per test.
pub fn leg_quote(token: Address, amount: u64, output: Address, buy_amount: u64, spender: Address) -> LegQuote {
    LegQuote {
        sell_token: token,
        buy_token: output,
        sell_amount: U256::from(amount),
        buy_amount: U256::from(buy_amount),
        gas_estimate: U256::from(150_000u64),
        integrator_fee: U256::from(buy_amount / 100),
        allowance_target: spender,
        transaction: RawTransaction {
            to: Address::repeat_byte(0x99),
            data: Bytes::from(vec![0xca, 0x11, token.as_bytes()[0]]),
            value: U256::zero(),
        },
    }
}

pub fn http_error(status: u16) -> AggregatorError {
    AggregatorError::Http { status, body: format!("status {}", status) }
}

// === Mock wallet ===

#[derive(Debug, Default)]
pub struct MockWallet {
    pub batch_supported: bool,
    pub call_outcomes: Mutex<VecDeque<CallOutcome>>,
    pub batch_outcomes: Mutex<VecDeque<CallOutcome>>,
    pub submitted_calls: Mutex<Vec<CallRequest>>,
    pub submitted_batches: Mutex<Vec<Vec<CallRequest>>>,
    /// Artificial confirmation latency, for tests that need an attempt to
    /// stay in flight while something else happens.
    pub confirm_delay: Mutex<std::time::Duration>,
}

impl MockWallet {
    pub fn new(batch_supported: bool) -> Self {
        Self { batch_supported, ..Default::default() }
    }

    pub fn set_confirm_delay(&self, delay: std::time::Duration) {
        *self.confirm_delay.lock().unwrap() = delay;
    }

    async fn settle(&self) {
        let delay = *self.confirm_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    pub fn script_call(&self, outcome: CallOutcome) {
        self.call_outcomes.lock().unwrap().push_back(outcome);
    }

    pub fn script_batch(&self, outcome: CallOutcome) {
        self.batch_outcomes.lock().unwrap().push_back(outcome);
    }

    pub fn confirmed(byte: u8) -> CallOutcome {
        CallOutcome::Confirmed { tx_hash: H256::repeat_byte(byte) }
    }
}

#[async_trait]
impl WalletClient for MockWallet {
    async fn supports_atomic_batch(
        &self,
        _address: Address,
        _chain_id: u64,
    ) -> Result<bool, ExecutionError> {
        Ok(self.batch_supported)
    }

    async fn send_batch(&self, calls: &[CallRequest]) -> Result<CallOutcome, ExecutionError> {
        self.submitted_batches.lock().unwrap().push(calls.to_vec());
        self.settle().await;
        Ok(self
            .batch_outcomes
            .lock()
            .unwrap()
            .pop_front()
            .expect("mock wallet ran out of scripted batch outcomes"))
    }

    async fn send_call(&self, call: &CallRequest) -> Result<CallOutcome, ExecutionError> {
        self.submitted_calls.lock().unwrap().push(call.clone());
        self.settle().await;
        Ok(self
            .call_outcomes
            .lock()
            .unwrap()
            .pop_front()
            .expect("mock wallet ran out of scripted call outcomes"))
    }
}

// === Recording collaborator sinks ===

#[derive(Debug, Default)]
pub struct RecordingHistoryStore {
    pub records: Mutex<Vec<SwapRecord>>,
    pub fail_writes: Mutex<bool>,
}

#[async_trait]
impl HistoryStore for RecordingHistoryStore {
    async fn record_swap(&self, record: &SwapRecord) -> Result<(), StoreError> {
        if *self.fail_writes.lock().unwrap() {
            return Err(StoreError::WriteFailed("simulated store outage".to_string()));
        }
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<(String, NotificationPayload)>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, user_id: &str, payload: &NotificationPayload) -> Result<(), NotifyError> {
        payload.validate(None)?;
        self.sent.lock().unwrap().push((user_id.to_string(), payload.clone()));
        Ok(())
    }
}
