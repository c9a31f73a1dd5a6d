use std::collections::HashMap;

use alloy_primitives::{Address, U256};
use tokio::sync::Mutex;

use super::{
    AccountRecord, Ledger, OrderRecord, OrderState, SyncCursor, TradeRecord, is_advancing,
    page_by_price,
};
use crate::{
    error::LedgerError,
    types::{BlockNumber, Nonce, OrderHash, SignedOrder},
};

#[derive(Debug, Default)]
struct Tables {
    orders: HashMap<OrderHash, OrderRecord>,
    trades: HashMap<OrderHash, Vec<TradeRecord>>,
    accounts: HashMap<Address, AccountRecord>,
    cursor: Option<SyncCursor>,
}

/// In-process [`Ledger`], all tables behind a single lock.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    tables: Mutex<Tables>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Ledger for MemoryLedger {
    async fn create_order(
        &self,
        signed: &SignedOrder,
        state: OrderState,
    ) -> Result<bool, LedgerError> {
        let record = OrderRecord::new(*signed, state);
        let mut tables = self.tables.lock().await;
        if tables.orders.contains_key(&record.hash) {
            return Ok(false);
        }
        tables.orders.insert(record.hash, record);
        Ok(true)
    }

    async fn read_order(&self, hash: OrderHash) -> Result<Option<OrderRecord>, LedgerError> {
        Ok(self.tables.lock().await.orders.get(&hash).cloned())
    }

    async fn update_order_state(
        &self,
        hash: OrderHash,
        state: OrderState,
    ) -> Result<bool, LedgerError> {
        Ok(self
            .tables
            .lock()
            .await
            .orders
            .get_mut(&hash)
            .map(|record| record.state = state)
            .is_some())
    }

    async fn update_filled_amount(&self, hash: OrderHash, filled: U256) -> Result<bool, LedgerError> {
        Ok(self
            .tables
            .lock()
            .await
            .orders
            .get_mut(&hash)
            .map(|record| record.filled_amount = filled)
            .is_some())
    }

    async fn delete_order(&self, hash: OrderHash) -> Result<bool, LedgerError> {
        Ok(self.tables.lock().await.orders.remove(&hash).is_some())
    }

    async fn create_trade(&self, trade: &TradeRecord) -> Result<bool, LedgerError> {
        let mut tables = self.tables.lock().await;
        let fills = tables.trades.entry(trade.order_hash).or_default();
        if !is_advancing(fills.last(), trade) {
            return Ok(false);
        }
        fills.push(trade.clone());
        Ok(true)
    }

    async fn read_trades(&self, hash: OrderHash) -> Result<Vec<TradeRecord>, LedgerError> {
        Ok(self
            .tables
            .lock()
            .await
            .trades
            .get(&hash)
            .cloned()
            .unwrap_or_default())
    }

    async fn query_orders_by_pair(
        &self,
        token_get: Address,
        token_give: Address,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<SignedOrder>, LedgerError> {
        let records = self
            .tables
            .lock()
            .await
            .orders
            .values()
            .filter(|record| {
                record.signed.order.token_get == token_get
                    && record.signed.order.token_give == token_give
            })
            .cloned()
            .collect();
        Ok(page_by_price(records, offset, limit))
    }

    async fn create_account(&self, address: Address) -> Result<bool, LedgerError> {
        let mut tables = self.tables.lock().await;
        if tables.accounts.contains_key(&address) {
            return Ok(false);
        }
        tables.accounts.insert(
            address,
            AccountRecord {
                address,
                ..Default::default()
            },
        );
        Ok(true)
    }

    async fn read_account(&self, address: Address) -> Result<Option<AccountRecord>, LedgerError> {
        Ok(self.tables.lock().await.accounts.get(&address).cloned())
    }

    async fn update_account_balance(
        &self,
        address: Address,
        token: Address,
        amount: U256,
    ) -> Result<(), LedgerError> {
        let mut tables = self.tables.lock().await;
        let account = tables
            .accounts
            .get_mut(&address)
            .ok_or(LedgerError::AccountNotFound(address))?;
        account.token = Some(token);
        account.amount = Some(amount);
        Ok(())
    }

    async fn delete_account(&self, address: Address) -> Result<bool, LedgerError> {
        Ok(self.tables.lock().await.accounts.remove(&address).is_some())
    }

    async fn update_account_nonce(&self, address: Address, nonce: Nonce) -> Result<(), LedgerError> {
        self.tables
            .lock()
            .await
            .accounts
            .entry(address)
            .or_insert_with(|| AccountRecord {
                address,
                ..Default::default()
            })
            .nonce = Some(nonce);
        Ok(())
    }

    async fn read_account_nonce(&self, address: Address) -> Result<Option<Nonce>, LedgerError> {
        Ok(self
            .tables
            .lock()
            .await
            .accounts
            .get(&address)
            .and_then(|account| account.nonce))
    }

    async fn init_sync_cursor(&self, genesis: BlockNumber) -> Result<SyncCursor, LedgerError> {
        Ok(*self
            .tables
            .lock()
            .await
            .cursor
            .get_or_insert(SyncCursor::new(genesis)))
    }

    async fn read_sync_cursor(&self) -> Result<Option<SyncCursor>, LedgerError> {
        Ok(self.tables.lock().await.cursor)
    }

    async fn update_sync_cursor(&self, cursor: SyncCursor) -> Result<(), LedgerError> {
        let mut tables = self.tables.lock().await;
        let stored = tables.cursor.as_mut().ok_or(LedgerError::CursorMissing)?;
        *stored = cursor;
        Ok(())
    }
}
