//! Error types for the relayer.

use dex_relayer::error::{DaemonError, LedgerError, SubmitError, SyncError};

use crate::config::ConfigError;

/// Main error type for the relayer.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Environment configuration error: {0}")]
    EnvConfig(#[from] envy::Error),

    #[error("Invalid RPC URL: {0}")]
    InvalidRpcUrl(#[from] url::ParseError),

    #[error("Invalid address: {0}")]
    InvalidAddress(#[from] alloy_primitives::hex::FromHexError),

    #[error("Daemon error: {0}")]
    Daemon(#[from] DaemonError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Submission failed: {0}")]
    Submit(#[from] SubmitError),

    #[error("Sync failed: {0}")]
    Sync(#[from] SyncError),

    #[error("Sync task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, Error>;
