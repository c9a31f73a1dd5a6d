//! Local mirror of on-chain order book state.
//!
//! [`Ledger`] is the only way the rest of the crate reads or writes
//! persisted state. It is implemented by [`MemoryLedger`] for in-process use
//! and tests, and by [`SqliteLedger`] for a durable mirror.
//!
//! Two invariants make event replay safe:
//!
//! * [`Ledger::create_order`] is idempotent, creating an order whose hash is
//!   already stored is a no-op.
//! * [`Ledger::create_trade`] only accepts strictly advancing fills, see
//!   [`is_advancing`].

mod memory;
mod sqlite;

use std::future::Future;

use alloy_primitives::{Address, B256, U256};
use itertools::Itertools;

use crate::{
    error::LedgerError,
    num::Price,
    types::{BlockNumber, Nonce, OrderHash, SignedOrder},
};

pub use memory::MemoryLedger;
pub use sqlite::SqliteLedger;

/// Lifecycle of a mirrored order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OrderState {
    /// Submitted by this relayer, not yet seen on chain.
    Sending = 0,
    /// Observed on chain and open.
    Trading = 1,
    /// Cancelled.
    Finished = 2,
}

impl TryFrom<i64> for OrderState {
    type Error = LedgerError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(OrderState::Sending),
            1 => Ok(OrderState::Trading),
            2 => Ok(OrderState::Finished),
            _ => Err(LedgerError::Corrupted(format!("order state {value}"))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OrderRecord {
    pub hash: OrderHash,
    pub signed: SignedOrder,
    pub state: OrderState,
    /// Cumulative filled amount as last reported by the contract.
    pub filled_amount: U256,
}

impl OrderRecord {
    pub fn new(signed: SignedOrder, state: OrderState) -> Self {
        Self {
            hash: signed.hash(),
            signed,
            state,
            filled_amount: U256::ZERO,
        }
    }

    pub fn price(&self) -> Price {
        self.signed.order.price()
    }
}

/// One fill of an order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TradeRecord {
    pub order_hash: OrderHash,
    /// Volume of this fill alone.
    pub deal_amount: U256,
    pub block_number: BlockNumber,
    pub tx_hash: B256,
    pub taker: Address,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AccountRecord {
    pub address: Address,
    pub token: Option<Address>,
    pub amount: Option<U256>,
    /// Next nonce to sign with, as cached by the submission path.
    pub nonce: Option<Nonce>,
}

/// Range of chain history already ingested.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SyncCursor {
    pub begin_block: BlockNumber,
    pub end_block: BlockNumber,
}

impl SyncCursor {
    pub fn new(genesis: BlockNumber) -> Self {
        Self {
            begin_block: genesis,
            end_block: genesis,
        }
    }
}

/// Whether `next` is strictly more progress than `last` for the same order:
/// a later block, or the same block with a larger deal amount.
pub fn is_advancing(last: Option<&TradeRecord>, next: &TradeRecord) -> bool {
    match last {
        None => true,
        Some(last) if next.block_number > last.block_number => true,
        Some(last) if next.block_number == last.block_number => {
            next.deal_amount > last.deal_amount
        }
        Some(_) => false,
    }
}

/// Orders of a pair sorted by ascending price, ties broken by hash, then
/// paginated by `offset`/`limit`.
pub(crate) fn page_by_price(
    records: Vec<OrderRecord>,
    offset: usize,
    limit: usize,
) -> Vec<SignedOrder> {
    records
        .into_iter()
        .sorted_by(|a, b| a.price().cmp(&b.price()).then(a.hash.cmp(&b.hash)))
        .skip(offset)
        .take(limit)
        .map(|record| record.signed)
        .collect()
}

/// Repository of orders, trades, accounts and the sync cursor.
pub trait Ledger: Send + Sync {
    /// Stores a new order, returns `false` if the hash is already stored.
    fn create_order(
        &self,
        signed: &SignedOrder,
        state: OrderState,
    ) -> impl Future<Output = Result<bool, LedgerError>> + Send;

    fn read_order(
        &self,
        hash: OrderHash,
    ) -> impl Future<Output = Result<Option<OrderRecord>, LedgerError>> + Send;

    /// Returns `false` if no such order is stored.
    fn update_order_state(
        &self,
        hash: OrderHash,
        state: OrderState,
    ) -> impl Future<Output = Result<bool, LedgerError>> + Send;

    /// Returns `false` if no such order is stored.
    fn update_filled_amount(
        &self,
        hash: OrderHash,
        filled: U256,
    ) -> impl Future<Output = Result<bool, LedgerError>> + Send;

    fn delete_order(
        &self,
        hash: OrderHash,
    ) -> impl Future<Output = Result<bool, LedgerError>> + Send;

    /// Stores a fill if [`is_advancing`] over the last stored fill of the
    /// same order. Check and insert happen atomically. Returns whether the
    /// fill was stored.
    fn create_trade(
        &self,
        trade: &TradeRecord,
    ) -> impl Future<Output = Result<bool, LedgerError>> + Send;

    /// Fills of an order in insertion order.
    fn read_trades(
        &self,
        hash: OrderHash,
    ) -> impl Future<Output = Result<Vec<TradeRecord>, LedgerError>> + Send;

    /// Order book page of the pair, see [`page_by_price`].
    fn query_orders_by_pair(
        &self,
        token_get: Address,
        token_give: Address,
        offset: usize,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<SignedOrder>, LedgerError>> + Send;

    /// Returns `false` if the account already exists.
    fn create_account(
        &self,
        address: Address,
    ) -> impl Future<Output = Result<bool, LedgerError>> + Send;

    fn read_account(
        &self,
        address: Address,
    ) -> impl Future<Output = Result<Option<AccountRecord>, LedgerError>> + Send;

    /// Fails with [`LedgerError::AccountNotFound`] for unknown accounts.
    fn update_account_balance(
        &self,
        address: Address,
        token: Address,
        amount: U256,
    ) -> impl Future<Output = Result<(), LedgerError>> + Send;

    fn delete_account(
        &self,
        address: Address,
    ) -> impl Future<Output = Result<bool, LedgerError>> + Send;

    /// Caches the next nonce of `address`, creating the account if needed.
    fn update_account_nonce(
        &self,
        address: Address,
        nonce: Nonce,
    ) -> impl Future<Output = Result<(), LedgerError>> + Send;

    fn read_account_nonce(
        &self,
        address: Address,
    ) -> impl Future<Output = Result<Option<Nonce>, LedgerError>> + Send;

    /// Creates the cursor at `genesis` unless one exists, returns the stored
    /// cursor either way.
    fn init_sync_cursor(
        &self,
        genesis: BlockNumber,
    ) -> impl Future<Output = Result<SyncCursor, LedgerError>> + Send;

    fn read_sync_cursor(
        &self,
    ) -> impl Future<Output = Result<Option<SyncCursor>, LedgerError>> + Send;

    /// Fails with [`LedgerError::CursorMissing`] before
    /// [`Ledger::init_sync_cursor`].
    fn update_sync_cursor(
        &self,
        cursor: SyncCursor,
    ) -> impl Future<Output = Result<(), LedgerError>> + Send;
}

/// Behaviour every [`Ledger`] implementation must share.
#[cfg(test)]
pub(crate) mod conformance {
    use alloy_primitives::{Address, B256, U256};

    use super::*;
    use crate::types::Order;

    pub fn signed(nonce: u64, amount_get: u64, amount_give: u64) -> SignedOrder {
        SignedOrder {
            order: Order {
                token_get: Address::with_last_byte(0x11),
                amount_get: U256::from(amount_get),
                token_give: Address::with_last_byte(0x22),
                amount_give: U256::from(amount_give),
                expires: 100_000,
                nonce,
                maker: Address::with_last_byte(0xaa),
            },
            v: U256::from(27),
            s: U256::from(2),
            r: U256::from(1),
        }
    }

    pub fn trade(hash: OrderHash, block_number: u64, deal: u64) -> TradeRecord {
        TradeRecord {
            order_hash: hash,
            deal_amount: U256::from(deal),
            block_number,
            tx_hash: B256::with_last_byte(block_number as u8),
            taker: Address::with_last_byte(0xbb),
        }
    }

    pub async fn orders(ledger: &impl Ledger) {
        let order = signed(1, 1000, 500);
        let hash = order.hash();

        assert!(ledger.create_order(&order, OrderState::Sending).await.unwrap());
        assert!(!ledger.create_order(&order, OrderState::Trading).await.unwrap());

        let record = ledger.read_order(hash).await.unwrap().unwrap();
        assert_eq!(record, OrderRecord::new(order, OrderState::Sending));

        assert!(ledger.update_order_state(hash, OrderState::Trading).await.unwrap());
        assert!(ledger.update_filled_amount(hash, U256::from(150)).await.unwrap());
        let record = ledger.read_order(hash).await.unwrap().unwrap();
        assert_eq!(record.state, OrderState::Trading);
        assert_eq!(record.filled_amount, U256::from(150));

        assert!(!ledger.update_order_state(B256::ZERO, OrderState::Finished).await.unwrap());
        assert!(!ledger.update_filled_amount(B256::ZERO, U256::from(1)).await.unwrap());

        assert!(ledger.delete_order(hash).await.unwrap());
        assert!(!ledger.delete_order(hash).await.unwrap());
        assert_eq!(ledger.read_order(hash).await.unwrap(), None);
    }

    pub async fn trades(ledger: &impl Ledger) {
        let hash = signed(1, 1000, 500).hash();

        assert!(ledger.create_trade(&trade(hash, 10, 100)).await.unwrap());
        // same block, smaller deal
        assert!(!ledger.create_trade(&trade(hash, 10, 50)).await.unwrap());
        // exact replay
        assert!(!ledger.create_trade(&trade(hash, 10, 100)).await.unwrap());
        // older block
        assert!(!ledger.create_trade(&trade(hash, 9, 500)).await.unwrap());
        assert!(ledger.create_trade(&trade(hash, 10, 120)).await.unwrap());
        assert!(ledger.create_trade(&trade(hash, 12, 1)).await.unwrap());

        let stored = ledger.read_trades(hash).await.unwrap();
        assert_eq!(
            stored,
            vec![trade(hash, 10, 100), trade(hash, 10, 120), trade(hash, 12, 1)]
        );

        // unrelated order is tracked independently
        let other = signed(2, 1000, 500).hash();
        assert!(ledger.create_trade(&trade(other, 1, 1)).await.unwrap());
        assert_eq!(ledger.read_trades(other).await.unwrap().len(), 1);
    }

    pub async fn pair_query(ledger: &impl Ledger) {
        let cheap = signed(1, 100, 100);
        let mid = signed(2, 300, 200);
        let expensive = signed(3, 1000, 500);
        for order in [expensive, cheap, mid] {
            ledger.create_order(&order, OrderState::Trading).await.unwrap();
        }

        let mut reversed = signed(4, 100, 100);
        reversed.order.token_get = Address::with_last_byte(0x22);
        reversed.order.token_give = Address::with_last_byte(0x11);
        ledger.create_order(&reversed, OrderState::Trading).await.unwrap();

        let get = Address::with_last_byte(0x11);
        let give = Address::with_last_byte(0x22);
        assert_eq!(
            ledger.query_orders_by_pair(get, give, 0, 10).await.unwrap(),
            vec![cheap, mid, expensive]
        );
        assert_eq!(
            ledger.query_orders_by_pair(get, give, 1, 1).await.unwrap(),
            vec![mid]
        );
        assert!(ledger.query_orders_by_pair(get, give, 3, 10).await.unwrap().is_empty());
        assert_eq!(
            ledger.query_orders_by_pair(give, get, 0, 10).await.unwrap(),
            vec![reversed]
        );
    }

    pub async fn accounts(ledger: &impl Ledger) {
        let address = Address::with_last_byte(0xaa);
        let token = Address::with_last_byte(0x11);

        assert_eq!(ledger.read_account_nonce(address).await.unwrap(), None);
        assert!(matches!(
            ledger.update_account_balance(address, token, U256::from(5)).await,
            Err(LedgerError::AccountNotFound(_))
        ));

        assert!(ledger.create_account(address).await.unwrap());
        assert!(!ledger.create_account(address).await.unwrap());
        ledger
            .update_account_balance(address, token, U256::from(5))
            .await
            .unwrap();
        ledger.update_account_nonce(address, 7).await.unwrap();

        assert_eq!(
            ledger.read_account(address).await.unwrap(),
            Some(AccountRecord {
                address,
                token: Some(token),
                amount: Some(U256::from(5)),
                nonce: Some(7),
            })
        );

        let other = Address::with_last_byte(0xbb);
        ledger.update_account_nonce(other, 3).await.unwrap();
        ledger.update_account_nonce(other, 4).await.unwrap();
        assert_eq!(ledger.read_account_nonce(other).await.unwrap(), Some(4));

        assert!(ledger.delete_account(address).await.unwrap());
        assert_eq!(ledger.read_account(address).await.unwrap(), None);
    }

    pub async fn sync_cursor(ledger: &impl Ledger) {
        assert_eq!(ledger.read_sync_cursor().await.unwrap(), None);
        assert!(matches!(
            ledger.update_sync_cursor(SyncCursor::new(1)).await,
            Err(LedgerError::CursorMissing)
        ));

        assert_eq!(ledger.init_sync_cursor(100).await.unwrap(), SyncCursor::new(100));
        ledger
            .update_sync_cursor(SyncCursor {
                begin_block: 100,
                end_block: 250,
            })
            .await
            .unwrap();

        // genesis is only applied once
        let cursor = ledger.init_sync_cursor(5).await.unwrap();
        assert_eq!(
            cursor,
            SyncCursor {
                begin_block: 100,
                end_block: 250
            }
        );
        assert_eq!(ledger.read_sync_cursor().await.unwrap(), Some(cursor));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trade(block_number: u64, deal: u64) -> TradeRecord {
        TradeRecord {
            order_hash: B256::ZERO,
            deal_amount: U256::from(deal),
            block_number,
            tx_hash: B256::ZERO,
            taker: Address::ZERO,
        }
    }

    #[test]
    fn test_is_advancing() {
        assert!(is_advancing(None, &trade(10, 100)));
        assert!(is_advancing(Some(&trade(10, 100)), &trade(11, 1)));
        assert!(is_advancing(Some(&trade(10, 100)), &trade(10, 101)));
        assert!(!is_advancing(Some(&trade(10, 100)), &trade(10, 100)));
        assert!(!is_advancing(Some(&trade(10, 100)), &trade(10, 50)));
        assert!(!is_advancing(Some(&trade(10, 100)), &trade(9, 1000)));
    }

    #[test]
    fn test_order_state_from_column() {
        assert_eq!(OrderState::try_from(0).unwrap(), OrderState::Sending);
        assert_eq!(OrderState::try_from(2).unwrap(), OrderState::Finished);
        assert!(OrderState::try_from(3).is_err());
    }
}
