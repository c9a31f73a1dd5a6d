//! Turns user intents into broadcast transactions.
//!
//! Every transaction goes through [`Submitter::post_tx`]:
//!
//! 1. estimate gas with the wallet daemon,
//! 2. resolve the sender's nonce, from the ledger cache or, when the address
//!    is marked fresh, from the wallet daemon,
//! 3. sign with the wallet daemon,
//! 4. persist `nonce + 1`, before or after broadcasting depending on
//!    [`NonceAdvance`],
//! 5. broadcast through the chain daemon.
//!
//! Submissions of one address are serialized across all five steps, so two
//! back-to-back submissions never sign the same nonce. Any failing step
//! aborts the submission, nothing is retried.
//!
//! An address is marked fresh the first time it is seen and then once every
//! [`SubmitConfig::fresh_interval`], which bounds how long a drifted nonce
//! cache can survive.

mod intent;
mod nonce;

use std::{fmt::Debug, sync::Arc, time::Duration};

use alloy_primitives::{Address, B256};

use crate::{
    Chain,
    error::SubmitError,
    gateway::{ChainApi, Daemon, WalletApi},
    ledger::Ledger,
    types::{Nonce, TxArgs},
};

use nonce::NonceTracker;

/// Default period after which an address' nonce is read from the wallet
/// daemon again.
pub const DEFAULT_FRESH_INTERVAL: Duration = Duration::from_secs(5);

/// When the advanced nonce is written to the ledger.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum NonceAdvance {
    /// After signing, before broadcasting. A failed broadcast leaves a nonce
    /// gap until the next fresh read.
    #[default]
    Optimistic,
    /// Only after the chain daemon accepted the transaction.
    OnAck,
}

#[derive(Clone, Debug)]
pub struct SubmitConfig {
    fresh_interval: Duration,
    nonce_advance: NonceAdvance,
}

impl Default for SubmitConfig {
    fn default() -> Self {
        Self {
            fresh_interval: DEFAULT_FRESH_INTERVAL,
            nonce_advance: NonceAdvance::default(),
        }
    }
}

impl SubmitConfig {
    pub fn with_fresh_interval(mut self, interval: Duration) -> Self {
        self.fresh_interval = interval;
        self
    }

    pub fn with_nonce_advance(mut self, nonce_advance: NonceAdvance) -> Self {
        self.nonce_advance = nonce_advance;
        self
    }

    pub fn fresh_interval(&self) -> Duration {
        self.fresh_interval
    }

    pub fn nonce_advance(&self) -> NonceAdvance {
        self.nonce_advance
    }
}

/// Submission coordinator.
///
/// `C` and `W` are the chain and wallet daemons, `L` the ledger holding the
/// nonce cache and speculative order records.
#[derive(derive_more::Debug)]
pub struct Submitter<C, W, L> {
    chain: Chain,
    #[debug(skip)]
    chain_api: ChainApi<C>,
    #[debug(skip)]
    wallet: WalletApi<W>,
    #[debug(skip)]
    ledger: Arc<L>,
    config: SubmitConfig,
    nonces: NonceTracker,
}

fn log_failure(from: Address, step: &'static str, err: &dyn Debug) {
    tracing::debug!(?err, %from, step, "submission step failed");
}

impl<C: Daemon, W: Daemon, L: Ledger> Submitter<C, W, L> {
    pub fn new(chain: &Chain, chain_daemon: C, wallet_daemon: W, ledger: Arc<L>) -> Self {
        let config = SubmitConfig::default();
        Self {
            chain: chain.clone(),
            chain_api: ChainApi::new(chain_daemon),
            wallet: WalletApi::new(wallet_daemon),
            ledger,
            nonces: NonceTracker::new(config.fresh_interval),
            config,
        }
    }

    /// Replaces the configuration, resetting per-address nonce tracking.
    pub fn with_config(mut self, config: SubmitConfig) -> Self {
        self.nonces = NonceTracker::new(config.fresh_interval);
        self.config = config;
        self
    }

    pub fn chain(&self) -> &Chain {
        &self.chain
    }

    pub fn chain_api(&self) -> &ChainApi<C> {
        &self.chain_api
    }

    pub fn wallet(&self) -> &WalletApi<W> {
        &self.wallet
    }

    pub fn ledger(&self) -> &Arc<L> {
        &self.ledger
    }

    /// Signs and broadcasts `tx` from `tx.from`, returning the transaction
    /// hash. Gas and nonce are filled in, a zero gas price is replaced by the
    /// chain's.
    pub async fn post_tx(&self, tx: TxArgs) -> Result<B256, SubmitError> {
        let from = tx.from;
        let _guard = self.nonces.lock(from).await;

        let mut tx = tx;
        if tx.gas_price.is_zero() {
            tx.gas_price = self.chain.gas_price();
        }

        let gas = self
            .wallet
            .estimate_gas(&tx)
            .await
            .inspect_err(|err| log_failure(from, "estimate_gas", err))?;
        let nonce = self.resolve_nonce(from).await?;
        let tx = tx.with_gas(gas).with_nonce(nonce);

        let raw = self
            .wallet
            .sign_transaction(&tx)
            .await
            .inspect_err(|err| log_failure(from, "sign", err))?;

        if self.config.nonce_advance == NonceAdvance::Optimistic {
            self.advance_nonce(from, nonce).await?;
        }

        let hash = self
            .chain_api
            .send_raw_tx(&raw, tx.tx_type())
            .await
            .inspect_err(|err| log_failure(from, "broadcast", err))?;

        if self.config.nonce_advance == NonceAdvance::OnAck {
            self.advance_nonce(from, nonce).await?;
        }

        tracing::info!(%from, nonce, gas, %hash, "transaction submitted");
        Ok(hash)
    }

    async fn resolve_nonce(&self, from: Address) -> Result<Nonce, SubmitError> {
        let cached = if self.nonces.take_fresh(from).await {
            None
        } else {
            self.ledger
                .read_account_nonce(from)
                .await
                .inspect_err(|err| log_failure(from, "read_nonce", err))?
        };
        if let Some(nonce) = cached {
            return Ok(nonce);
        }

        let nonce = self
            .wallet
            .transaction_count(from)
            .await
            .inspect_err(|err| log_failure(from, "fetch_nonce", err))?;
        tracing::debug!(%from, nonce, "fetched fresh nonce");
        self.ledger
            .update_account_nonce(from, nonce)
            .await
            .inspect_err(|err| log_failure(from, "cache_nonce", err))?;
        Ok(nonce)
    }

    async fn advance_nonce(&self, from: Address, nonce: Nonce) -> Result<(), SubmitError> {
        self.ledger
            .update_account_nonce(from, nonce + 1)
            .await
            .inspect_err(|err| log_failure(from, "advance_nonce", err))?;
        Ok(())
    }
}
