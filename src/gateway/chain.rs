use alloy_primitives::{B256, Bytes, U64};
use serde_json::json;

use super::{Daemon, decode_result};
use crate::{
    error::DaemonError,
    types::{BlockNumber, TxArgs, TxType},
};

/// Typed calls of the chain daemon.
#[derive(Clone, Debug)]
pub struct ChainApi<D> {
    daemon: D,
}

impl<D: Daemon> ChainApi<D> {
    pub fn new(daemon: D) -> Self {
        Self { daemon }
    }

    pub fn daemon(&self) -> &D {
        &self.daemon
    }

    /// Height of the block the chain history starts at.
    pub async fn genesis_block_number(&self) -> Result<BlockNumber, DaemonError> {
        let result = self.daemon.call("eth_genesisBlockNumber", json!([])).await?;
        Ok(decode_result::<U64>(result)?.to())
    }

    /// Executes a read-only contract call against the latest block.
    pub async fn call(&self, tx: &TxArgs) -> Result<Bytes, DaemonError> {
        let result = self
            .daemon
            .call("eth_call", json!([tx.to_json(), "latest"]))
            .await?;
        decode_result(result)
    }

    /// Broadcasts a signed transaction and returns its hash.
    pub async fn send_raw_tx(&self, raw: &Bytes, tx_type: TxType) -> Result<B256, DaemonError> {
        let result = self
            .daemon
            .call("eth_sendRawTx", json!([raw, tx_type.as_str()]))
            .await?;
        decode_result(result)
    }
}
