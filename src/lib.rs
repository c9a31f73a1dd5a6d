//! Off-chain relayer and indexer for the order-book DEX contract.
//!
//! # Overview
//!
//! Two independent flows share a [`ledger::Ledger`] and the daemon
//! [`gateway`]:
//!
//! * [`submit::Submitter`] turns user intents (deposit, withdraw, post order,
//!   trade, cancel) into signed transactions, keeping per-address nonces
//!   fresh and collision-free.
//! * [`sync::SyncEngine`] replays historical contract logs from the persisted
//!   [`ledger::SyncCursor`] and then follows the live log subscription,
//!   mirroring order, trade and cancel events into the ledger.
//!
//! Use [`ledger::SqliteLedger`] for a persistent mirror or
//! [`ledger::MemoryLedger`] for an in-process one.
//!
//! # Limitations/follow-ups
//!
//! * `Withdraw` and `Deposit` events are observed but not reconciled into
//!   account balances.
//!
//! * Pair queries paginate by offset, pages are stable only while no orders
//!   are inserted or removed in between.
//!
//! # Testing
//!
//! [`testing`] module provides scripted daemon and log source doubles so the
//! whole pipeline can be exercised without a node.

pub mod error;
pub mod gateway;
pub mod ledger;
pub mod num;
pub mod stream;
pub mod submit;
pub mod sync;
pub mod testing;
pub mod types;

use alloy_primitives::{Address, U256};

/// Default gas price attached to every transaction, in the chain's smallest unit.
pub const DEFAULT_GAS_PRICE: u64 = 100_000_000_000;

#[derive(Clone, Debug)]
/// Chain deployment the relayer is operating on.
pub struct Chain {
    contract: Address,
    gas_price: U256,
}

impl Chain {
    pub fn new(contract: Address) -> Self {
        Self {
            contract,
            gas_price: U256::from(DEFAULT_GAS_PRICE),
        }
    }

    pub fn with_gas_price(mut self, gas_price: U256) -> Self {
        self.gas_price = gas_price;
        self
    }

    /// Address of the DEX contract all calls go to and all logs come from.
    pub fn contract(&self) -> Address {
        self.contract
    }

    pub fn gas_price(&self) -> U256 {
        self.gas_price
    }
}
