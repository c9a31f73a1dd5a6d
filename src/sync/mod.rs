//! Mirrors contract events into the [`Ledger`].
//!
//! One sync cycle of [`SyncEngine`]:
//!
//! 1. read the persisted [`crate::ledger::SyncCursor`],
//! 2. replay historical logs from `end_block` to the latest block, in block
//!    order,
//! 3. follow the live subscription from the last replayed block until it
//!    ends or fails.
//!
//! [`SyncEngine::run`] repeats cycles until shutdown, so a failed
//! subscription always resumes from the persisted cursor. Events at or
//! after the cursor may be applied more than once, the ledger's idempotent
//! order creation and advancing trade check make this harmless.
//!
//! Events are applied strictly one at a time. A malformed event is dropped
//! and a ledger failure skips the event, neither stops ingestion. The cursor
//! never moves past the block of an event skipped in the current cycle, so
//! the next cycle replays it.

use std::{sync::Arc, time::Duration};

use futures::StreamExt;
use tokio::{
    sync::{broadcast, watch},
    task::JoinHandle,
};

use crate::{
    Chain,
    error::{LedgerError, SyncError},
    ledger::{Ledger, OrderState, SyncCursor, TradeRecord},
    stream::{LogFilter, LogSource},
    types::{ContractEvent, EventKind, LogEvent},
};

/// Pause between a failed or ended subscription and the next cycle.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(3);

#[derive(Clone, Debug)]
pub struct SyncConfig {
    reconnect_delay: Duration,
    kinds: Option<Vec<EventKind>>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            kinds: None,
        }
    }
}

impl SyncConfig {
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Restricts the subscription to the given event kinds, all kinds by
    /// default.
    pub fn with_kinds(mut self, kinds: impl IntoIterator<Item = EventKind>) -> Self {
        self.kinds = Some(kinds.into_iter().collect());
        self
    }

    pub fn reconnect_delay(&self) -> Duration {
        self.reconnect_delay
    }
}

/// Connection state of the engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncState {
    /// Replaying history or opening the subscription.
    Connecting,
    /// Following the live subscription.
    Streaming,
    /// Last cycle failed, waiting to reconnect.
    Failed,
}

/// What happened to a single log.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Ledger was updated, or already reflected the event.
    Applied,
    /// Recognized but not mirrored.
    Observed,
    /// Not a known contract event.
    Ignored,
    /// Payload could not be decoded.
    Dropped,
    /// Ledger write failed.
    Skipped,
}

#[derive(derive_more::Debug)]
pub struct SyncEngine<L, S> {
    chain: Chain,
    #[debug(skip)]
    ledger: Arc<L>,
    #[debug(skip)]
    source: S,
    config: SyncConfig,
    #[debug("{:?}", *state.borrow())]
    state: watch::Sender<SyncState>,
}

impl<L: Ledger, S: LogSource> SyncEngine<L, S> {
    pub fn new(chain: &Chain, ledger: Arc<L>, source: S) -> Self {
        Self {
            chain: chain.clone(),
            ledger,
            source,
            config: SyncConfig::default(),
            state: watch::Sender::new(SyncState::Connecting),
        }
    }

    pub fn with_config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    pub fn state(&self) -> watch::Receiver<SyncState> {
        self.state.subscribe()
    }

    pub fn ledger(&self) -> &Arc<L> {
        &self.ledger
    }

    fn set_state(&self, state: SyncState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            tracing::info!(?previous, current = ?state, "sync state changed");
        }
    }

    fn filter(&self, from_block: u64) -> LogFilter {
        let filter = LogFilter::new(self.chain.contract()).from_block(from_block);
        match &self.config.kinds {
            Some(kinds) => filter.with_kinds(kinds.iter().copied()),
            None => filter,
        }
    }

    /// Runs sync cycles until `shutdown` fires.
    ///
    /// Returns an error only if the sync cursor was never initialized.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) -> Result<(), SyncError> {
        loop {
            let result = tokio::select! {
                _ = shutdown.recv() => break,
                result = self.run_once() => result,
            };

            match result {
                Ok(()) => tracing::warn!("log subscription ended"),
                Err(SyncError::Ledger(LedgerError::CursorMissing)) => {
                    self.set_state(SyncState::Failed);
                    return Err(SyncError::Ledger(LedgerError::CursorMissing));
                }
                Err(err) => tracing::error!(?err, "sync cycle failed"),
            }
            self.set_state(SyncState::Failed);

            tokio::select! {
                _ = shutdown.recv() => break,
                _ = tokio::time::sleep(self.config.reconnect_delay) => {},
            }
        }
        tracing::info!("sync engine stopped");
        Ok(())
    }

    /// One replay-then-subscribe cycle. Returns `Ok` when the subscription
    /// ends cleanly.
    pub async fn run_once(&self) -> Result<(), SyncError> {
        self.set_state(SyncState::Connecting);

        let mut cursor = self
            .ledger
            .read_sync_cursor()
            .await?
            .ok_or(LedgerError::CursorMissing)?;

        let mut logs = self.source.get_logs(&self.filter(cursor.end_block)).await?;
        logs.sort_by_key(|log| (log.block_number, log.log_index));
        tracing::info!(
            from_block = cursor.end_block,
            count = logs.len(),
            "replaying historical logs"
        );
        let mut hold = None;
        for log in &logs {
            self.ingest(log, &mut cursor, &mut hold).await;
        }

        let mut stream = self.source.subscribe(&self.filter(cursor.end_block)).await?;
        self.set_state(SyncState::Streaming);

        while let Some(log) = stream.next().await {
            let log = log?;
            self.ingest(&log, &mut cursor, &mut hold).await;
        }
        Ok(())
    }

    /// Applies `log` and advances the cursor to its block, capped at `hold`,
    /// the earliest block with an event skipped this cycle.
    async fn ingest(&self, log: &LogEvent, cursor: &mut SyncCursor, hold: &mut Option<u64>) {
        let block = log.block_number;
        if self.apply(log).await == ApplyOutcome::Skipped {
            let held = hold.map_or(block, |held| held.min(block));
            tracing::warn!(block, held, "holding sync cursor until the next cycle");
            *hold = Some(held);
        }
        let target = hold.map_or(block, |held| block.min(held));
        self.advance(cursor, target).await;
    }

    async fn advance(&self, cursor: &mut SyncCursor, block: u64) {
        if block <= cursor.end_block {
            return;
        }
        let next = SyncCursor {
            begin_block: cursor.begin_block,
            end_block: block,
        };
        match self.ledger.update_sync_cursor(next).await {
            Ok(()) => *cursor = next,
            Err(err) => tracing::error!(?err, block, "failed to persist sync cursor"),
        }
    }

    /// Applies one log to the ledger. Never fails, see [`ApplyOutcome`].
    pub async fn apply(&self, log: &LogEvent) -> ApplyOutcome {
        let event = match ContractEvent::decode(log) {
            Ok(Some(event)) => event,
            Ok(None) => {
                tracing::debug!(block = log.block_number, tx = %log.tx_hash, "ignoring unknown log");
                return ApplyOutcome::Ignored;
            }
            Err(err) => {
                tracing::warn!(
                    ?err,
                    kind = ?log.kind(),
                    block = log.block_number,
                    tx = %log.tx_hash,
                    "dropping malformed event"
                );
                return ApplyOutcome::Dropped;
            }
        };

        let kind = event.kind();
        match self.handle(event, log).await {
            Ok(outcome) => outcome,
            Err(err) => {
                tracing::error!(
                    ?err,
                    ?kind,
                    block = log.block_number,
                    tx = %log.tx_hash,
                    "skipping event, ledger update failed"
                );
                ApplyOutcome::Skipped
            }
        }
    }

    async fn handle(&self, event: ContractEvent, log: &LogEvent) -> Result<ApplyOutcome, LedgerError> {
        let kind = event.kind();
        match event {
            ContractEvent::Order(signed) => {
                let hash = signed.hash();
                if self.ledger.create_order(&signed, OrderState::Trading).await? {
                    tracing::debug!(%hash, "order created");
                    return Ok(ApplyOutcome::Applied);
                }
                // promote a locally submitted order, never reopen a cancelled one
                let pending = self
                    .ledger
                    .read_order(hash)
                    .await?
                    .is_some_and(|record| record.state == OrderState::Sending);
                if pending {
                    self.ledger
                        .update_order_state(hash, OrderState::Trading)
                        .await?;
                    tracing::debug!(%hash, "order confirmed on chain");
                }
                Ok(ApplyOutcome::Applied)
            }
            ContractEvent::Trade(fill) => {
                if !self
                    .ledger
                    .update_filled_amount(fill.order_hash, fill.filled)
                    .await?
                {
                    tracing::debug!(hash = %fill.order_hash, "trade for unknown order");
                }
                let trade = TradeRecord {
                    order_hash: fill.order_hash,
                    deal_amount: fill.deal,
                    block_number: log.block_number,
                    tx_hash: log.tx_hash,
                    taker: fill.taker,
                };
                if !self.ledger.create_trade(&trade).await? {
                    tracing::debug!(
                        hash = %fill.order_hash,
                        block = log.block_number,
                        deal = %fill.deal,
                        "ignoring non-advancing fill"
                    );
                }
                Ok(ApplyOutcome::Applied)
            }
            ContractEvent::Cancel(hash) => {
                if !self
                    .ledger
                    .update_order_state(hash, OrderState::Finished)
                    .await?
                {
                    tracing::debug!(%hash, "cancel for unknown order");
                }
                Ok(ApplyOutcome::Applied)
            }
            ContractEvent::Withdraw(payload) | ContractEvent::Deposit(payload) => {
                tracing::debug!(?kind, %payload, "balance event observed");
                Ok(ApplyOutcome::Observed)
            }
        }
    }
}

impl<L, S> SyncEngine<L, S>
where
    L: Ledger + 'static,
    S: LogSource + 'static,
{
    /// Runs the engine on a background task.
    pub fn spawn(self, shutdown: broadcast::Receiver<()>) -> JoinHandle<Result<(), SyncError>> {
        tokio::spawn(async move { self.run(shutdown).await })
    }
}
