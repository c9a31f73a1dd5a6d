//! In-process doubles of the daemons and test fixtures.
//!
//! [`MockDaemon`] answers JSON-RPC calls from scripted one-shot responses or
//! per-method defaults and records every call, so tests can assert on the
//! exact parameters sent. [`MockLogSource`] serves a scripted chain history
//! and a queue of subscription sessions, each of which may end with an
//! injected transport failure. [`FaultyLedger`] wraps a real ledger and
//! fails chosen operations a given number of times.
//!
//! Fixture functions build orders and contract logs in the payload format
//! the contract emits.

use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex},
};

use alloy_primitives::{Address, B256, Bytes, U256, address};
use dashmap::DashMap;
use futures::{StreamExt, stream};
use serde_json::{Value, json};

use crate::{
    error::{DaemonError, LedgerError},
    gateway::Daemon,
    ledger::{AccountRecord, Ledger, OrderRecord, OrderState, SyncCursor, TradeRecord},
    stream::{LogFilter, LogSource, LogStream},
    types::{BlockNumber, EventKind, LogEvent, Nonce, Order, OrderHash, SignedOrder},
};

pub const CONTRACT: Address = address!("0x00000000000000000000000000000000000000cc");
pub const MAKER: Address = address!("0xa73810e519e1075010678d706533486d8ecc8000");
pub const TAKER: Address = address!("0x00000000000000000000000000000000000000bb");
pub const TOKEN_GET: Address = address!("0x0000000000000000000000000000000000000011");
pub const TOKEN_GIVE: Address = address!("0x0000000000000000000000000000000000000022");

/// Raw transaction returned by [`MockDaemon::wallet`] for every signing call.
pub const SIGNED_RAW_TX: &str = "0xf86b";

/// Hash returned by [`MockDaemon::chain`] for every broadcast.
pub const TX_HASH: B256 = B256::with_last_byte(0x77);

/// One call received by [`MockDaemon`].
#[derive(Clone, Debug, PartialEq)]
pub struct RecordedCall {
    pub method: String,
    pub params: Value,
}

#[derive(Debug, Default)]
struct MockDaemonInner {
    scripted: Mutex<HashMap<String, VecDeque<Result<Value, DaemonError>>>>,
    defaults: DashMap<String, Result<Value, DaemonError>>,
    calls: Mutex<Vec<RecordedCall>>,
}

/// Scripted [`Daemon`]. Clones share scripts and the call record.
///
/// A call is answered by the next one-shot response queued for its method,
/// then by the method's default. Unknown methods fail with a `-32601`
/// [`DaemonError::Rpc`].
#[derive(Clone, Debug, Default)]
pub struct MockDaemon {
    inner: Arc<MockDaemonInner>,
}

impl MockDaemon {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wallet daemon with fixed gas estimate and transaction count.
    pub fn wallet(transaction_count: u64) -> Self {
        let daemon = Self::new();
        daemon.respond("ltk_estimateGas", Ok(json!("0x5208")));
        daemon.respond(
            "ltk_getTransactionCount",
            Ok(json!(format!("{transaction_count:#x}"))),
        );
        daemon.respond(
            "ltk_signTransaction",
            Ok(json!({"raw": SIGNED_RAW_TX, "tx": {}})),
        );
        daemon.respond("ltk_signHash", Ok(json!(Bytes::from(signature()))));
        daemon
    }

    /// Chain daemon accepting every broadcast.
    pub fn chain(genesis: BlockNumber) -> Self {
        let daemon = Self::new();
        daemon.respond("eth_genesisBlockNumber", Ok(json!(format!("{genesis:#x}"))));
        daemon.respond("eth_sendRawTx", Ok(json!(TX_HASH)));
        daemon
    }

    /// Queues a response used by exactly one call of `method`.
    pub fn push(&self, method: &str, response: Result<Value, DaemonError>) -> &Self {
        self.inner
            .scripted
            .lock()
            .unwrap()
            .entry(method.to_string())
            .or_default()
            .push_back(response);
        self
    }

    /// Sets the response of every call of `method` without a queued one.
    pub fn respond(&self, method: &str, response: Result<Value, DaemonError>) -> &Self {
        self.inner.defaults.insert(method.to_string(), response);
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.inner.calls.lock().unwrap().clone()
    }

    /// Parameters of every call of `method`, oldest first.
    pub fn params_of(&self, method: &str) -> Vec<Value> {
        self.calls()
            .into_iter()
            .filter(|call| call.method == method)
            .map(|call| call.params)
            .collect()
    }

    /// Nonces of all signed transactions, oldest first.
    pub fn signed_nonces(&self) -> Vec<u64> {
        self.params_of("ltk_signTransaction")
            .iter()
            .filter_map(|params| params[0]["nonce"].as_str())
            .filter_map(|nonce| u64::from_str_radix(nonce.trim_start_matches("0x"), 16).ok())
            .collect()
    }
}

impl Daemon for MockDaemon {
    async fn call(&self, method: &str, params: Value) -> Result<Value, DaemonError> {
        self.inner.calls.lock().unwrap().push(RecordedCall {
            method: method.to_string(),
            params,
        });

        let scripted = self
            .inner
            .scripted
            .lock()
            .unwrap()
            .get_mut(method)
            .and_then(VecDeque::pop_front);
        if let Some(response) = scripted {
            return response;
        }
        match self.inner.defaults.get(method) {
            Some(response) => response.clone(),
            None => Err(DaemonError::Rpc {
                code: -32601,
                message: format!("method not found: {method}"),
            }),
        }
    }
}

#[derive(Debug, Default)]
struct MockLogSourceState {
    history: Vec<LogEvent>,
    sessions: VecDeque<Vec<Result<LogEvent, DaemonError>>>,
    get_logs_failures: VecDeque<DaemonError>,
    get_logs_filters: Vec<LogFilter>,
    subscribe_filters: Vec<LogFilter>,
}

/// Scripted [`LogSource`]. Clones share the script.
///
/// `get_logs` serves the history at or after the filter's block. Each
/// `subscribe` takes the next queued session; its logs join the history,
/// like logs mined while subscribed. Once sessions run out, subscriptions
/// stay open without delivering anything.
#[derive(Clone, Debug, Default)]
pub struct MockLogSource {
    state: Arc<Mutex<MockLogSourceState>>,
}

impl MockLogSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_history(&self, logs: impl IntoIterator<Item = LogEvent>) -> &Self {
        self.state.lock().unwrap().history.extend(logs);
        self
    }

    pub fn push_session(&self, items: Vec<Result<LogEvent, DaemonError>>) -> &Self {
        self.state.lock().unwrap().sessions.push_back(items);
        self
    }

    pub fn fail_next_get_logs(&self, error: DaemonError) -> &Self {
        self.state.lock().unwrap().get_logs_failures.push_back(error);
        self
    }

    pub fn get_logs_filters(&self) -> Vec<LogFilter> {
        self.state.lock().unwrap().get_logs_filters.clone()
    }

    pub fn subscribe_filters(&self) -> Vec<LogFilter> {
        self.state.lock().unwrap().subscribe_filters.clone()
    }
}

impl LogSource for MockLogSource {
    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<LogEvent>, DaemonError> {
        let mut state = self.state.lock().unwrap();
        state.get_logs_filters.push(filter.clone());
        if let Some(error) = state.get_logs_failures.pop_front() {
            return Err(error);
        }
        Ok(state
            .history
            .iter()
            .filter(|log| log.block_number >= filter.from_block)
            .cloned()
            .collect())
    }

    async fn subscribe(&self, filter: &LogFilter) -> Result<LogStream, DaemonError> {
        let mut state = self.state.lock().unwrap();
        state.subscribe_filters.push(filter.clone());
        match state.sessions.pop_front() {
            Some(items) => {
                let delivered = items.iter().filter_map(|item| item.as_ref().ok().cloned());
                state.history.extend(delivered.collect::<Vec<_>>());
                Ok(stream::iter(items).boxed())
            }
            None => Ok(stream::pending().boxed()),
        }
    }
}

/// [`Ledger`] that fails selected operations before reaching `inner`.
///
/// Operations are named after their [`Ledger`] method, e.g.
/// `"create_order"`. Failures surface as [`LedgerError::Database`].
#[derive(Debug)]
pub struct FaultyLedger<L> {
    inner: L,
    faults: Mutex<HashMap<&'static str, usize>>,
}

impl<L: Ledger> FaultyLedger<L> {
    pub fn new(inner: L) -> Self {
        Self {
            inner,
            faults: Mutex::default(),
        }
    }

    pub fn inner(&self) -> &L {
        &self.inner
    }

    /// Fails the next `times` calls of `operation`.
    pub fn fail_next(&self, operation: &'static str, times: usize) -> &Self {
        *self.faults.lock().unwrap().entry(operation).or_default() += times;
        self
    }

    fn check(&self, operation: &'static str) -> Result<(), LedgerError> {
        let mut faults = self.faults.lock().unwrap();
        match faults.get_mut(operation) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                Err(LedgerError::Database(format!("injected {operation} failure")))
            }
            _ => Ok(()),
        }
    }
}

impl<L: Ledger> Ledger for FaultyLedger<L> {
    async fn create_order(
        &self,
        signed: &SignedOrder,
        state: OrderState,
    ) -> Result<bool, LedgerError> {
        self.check("create_order")?;
        self.inner.create_order(signed, state).await
    }

    async fn read_order(&self, hash: OrderHash) -> Result<Option<OrderRecord>, LedgerError> {
        self.check("read_order")?;
        self.inner.read_order(hash).await
    }

    async fn update_order_state(
        &self,
        hash: OrderHash,
        state: OrderState,
    ) -> Result<bool, LedgerError> {
        self.check("update_order_state")?;
        self.inner.update_order_state(hash, state).await
    }

    async fn update_filled_amount(
        &self,
        hash: OrderHash,
        filled: U256,
    ) -> Result<bool, LedgerError> {
        self.check("update_filled_amount")?;
        self.inner.update_filled_amount(hash, filled).await
    }

    async fn delete_order(&self, hash: OrderHash) -> Result<bool, LedgerError> {
        self.check("delete_order")?;
        self.inner.delete_order(hash).await
    }

    async fn create_trade(&self, trade: &TradeRecord) -> Result<bool, LedgerError> {
        self.check("create_trade")?;
        self.inner.create_trade(trade).await
    }

    async fn read_trades(&self, hash: OrderHash) -> Result<Vec<TradeRecord>, LedgerError> {
        self.check("read_trades")?;
        self.inner.read_trades(hash).await
    }

    async fn query_orders_by_pair(
        &self,
        token_get: Address,
        token_give: Address,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<SignedOrder>, LedgerError> {
        self.check("query_orders_by_pair")?;
        self.inner
            .query_orders_by_pair(token_get, token_give, offset, limit)
            .await
    }

    async fn create_account(&self, address: Address) -> Result<bool, LedgerError> {
        self.check("create_account")?;
        self.inner.create_account(address).await
    }

    async fn read_account(&self, address: Address) -> Result<Option<AccountRecord>, LedgerError> {
        self.check("read_account")?;
        self.inner.read_account(address).await
    }

    async fn update_account_balance(
        &self,
        address: Address,
        token: Address,
        amount: U256,
    ) -> Result<(), LedgerError> {
        self.check("update_account_balance")?;
        self.inner.update_account_balance(address, token, amount).await
    }

    async fn delete_account(&self, address: Address) -> Result<bool, LedgerError> {
        self.check("delete_account")?;
        self.inner.delete_account(address).await
    }

    async fn update_account_nonce(
        &self,
        address: Address,
        nonce: Nonce,
    ) -> Result<(), LedgerError> {
        self.check("update_account_nonce")?;
        self.inner.update_account_nonce(address, nonce).await
    }

    async fn read_account_nonce(&self, address: Address) -> Result<Option<Nonce>, LedgerError> {
        self.check("read_account_nonce")?;
        self.inner.read_account_nonce(address).await
    }

    async fn init_sync_cursor(&self, genesis: BlockNumber) -> Result<SyncCursor, LedgerError> {
        self.check("init_sync_cursor")?;
        self.inner.init_sync_cursor(genesis).await
    }

    async fn read_sync_cursor(&self) -> Result<Option<SyncCursor>, LedgerError> {
        self.check("read_sync_cursor")?;
        self.inner.read_sync_cursor().await
    }

    async fn update_sync_cursor(&self, cursor: SyncCursor) -> Result<(), LedgerError> {
        self.check("update_sync_cursor")?;
        self.inner.update_sync_cursor(cursor).await
    }
}

/// 65-byte signature with recovery id 0.
pub fn signature() -> Vec<u8> {
    let mut signature = vec![0u8; 65];
    signature[31] = 0x01;
    signature[63] = 0x02;
    signature
}

/// Order of 1000 [`TOKEN_GET`] for 500 [`TOKEN_GIVE`] by [`MAKER`].
pub fn order(nonce: u64) -> Order {
    Order {
        token_get: TOKEN_GET,
        amount_get: U256::from(1000),
        token_give: TOKEN_GIVE,
        amount_give: U256::from(500),
        expires: 100_000,
        nonce,
        maker: MAKER,
    }
}

pub fn signed_order(nonce: u64) -> SignedOrder {
    SignedOrder {
        order: order(nonce),
        v: U256::from(27),
        s: U256::from(2),
        r: U256::from(1),
    }
}

/// Contract log of `kind` carrying a raw payload.
pub fn log(kind: EventKind, payload: &str, block_number: BlockNumber) -> LogEvent {
    LogEvent {
        address: CONTRACT,
        topics: vec![kind.topic()],
        data: Bytes::copy_from_slice(payload.as_bytes()),
        block_number,
        log_index: 0,
        tx_hash: B256::left_padding_from(&block_number.to_be_bytes()),
    }
}

pub fn order_log(signed: &SignedOrder, block_number: BlockNumber) -> LogEvent {
    let order = &signed.order;
    let payload = json!({
        "order": {
            "tokenGet": order.token_get,
            "amountGet": order.amount_get.to_string(),
            "tokenGive": order.token_give,
            "amountGive": order.amount_give.to_string(),
            "expires": order.expires,
            "nonce": order.nonce,
            "maker": order.maker,
        },
        "R": signed.r.to_string(),
        "S": signed.s.to_string(),
        "V": signed.v.to_string(),
    });
    log(EventKind::Order, &payload.to_string(), block_number)
}

pub fn trade_log(hash: OrderHash, filled: u64, deal: u64, block_number: BlockNumber) -> LogEvent {
    let payload = json!({
        "filled": filled.to_string(),
        "deal": deal.to_string(),
        "taker": TAKER,
        "hash": hash,
    });
    log(EventKind::Trade, &payload.to_string(), block_number)
}

pub fn cancel_log(hash: OrderHash, block_number: BlockNumber) -> LogEvent {
    log(EventKind::Cancel, &hash.to_string(), block_number)
}
