use alloy_primitives::{Address, B256, Bytes, U64};
use serde::Deserialize;
use serde_json::json;

use super::{Daemon, decode_result};
use crate::{
    error::DaemonError,
    types::{Nonce, TxArgs},
};

#[derive(Deserialize)]
struct SignedTransaction {
    raw: Bytes,
}

/// Typed calls of the wallet daemon, which holds the signing keys.
#[derive(Clone, Debug)]
pub struct WalletApi<D> {
    daemon: D,
}

impl<D: Daemon> WalletApi<D> {
    pub fn new(daemon: D) -> Self {
        Self { daemon }
    }

    pub fn daemon(&self) -> &D {
        &self.daemon
    }

    pub async fn estimate_gas(&self, tx: &TxArgs) -> Result<u64, DaemonError> {
        let result = self
            .daemon
            .call("ltk_estimateGas", json!([tx.to_json()]))
            .await?;
        Ok(decode_result::<U64>(result)?.to())
    }

    /// Authoritative transaction count of `address` at the latest block.
    pub async fn transaction_count(&self, address: Address) -> Result<Nonce, DaemonError> {
        let result = self
            .daemon
            .call("ltk_getTransactionCount", json!([address, "latest"]))
            .await?;
        Ok(decode_result::<U64>(result)?.to())
    }

    /// Signs `tx` with the key of `tx.from` and returns the raw encoding.
    pub async fn sign_transaction(&self, tx: &TxArgs) -> Result<Bytes, DaemonError> {
        let result = self
            .daemon
            .call("ltk_signTransaction", json!([tx.to_json()]))
            .await?;
        Ok(decode_result::<SignedTransaction>(result)?.raw)
    }

    /// Signs a 32-byte hash, returns the 65-byte `r || s || v` signature.
    pub async fn sign_hash(&self, address: Address, hash: B256) -> Result<Bytes, DaemonError> {
        let result = self
            .daemon
            .call("ltk_signHash", json!([address, hash]))
            .await?;
        decode_result(result)
    }

    pub async fn send_raw_transaction(&self, raw: &Bytes) -> Result<B256, DaemonError> {
        let result = self
            .daemon
            .call("ltk_sendRawTransaction", json!([raw]))
            .await?;
        decode_result(result)
    }
}
