use alloy_primitives::Address;

/// Failure of a single JSON-RPC call to a chain or wallet daemon.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum DaemonError {
    #[error("no connection to daemon: {0}")]
    Unreachable(String),

    #[error("unexpected http status: {0}")]
    Status(u16),

    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("malformed daemon response: {0}")]
    Decode(String),
}

impl DaemonError {
    /// Daemon could not be reached or answered outside of the JSON-RPC envelope.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Unreachable(_) | Self::Status(_))
    }

    /// Daemon answered with a non-zero JSON-RPC error code.
    pub fn is_protocol(&self) -> bool {
        matches!(self, Self::Rpc { .. })
    }
}

impl From<reqwest::Error> for DaemonError {
    fn from(value: reqwest::Error) -> Self {
        if value.is_decode() {
            Self::Decode(value.to_string())
        } else if let Some(status) = value.status() {
            Self::Status(status.as_u16())
        } else {
            Self::Unreachable(value.to_string())
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for DaemonError {
    fn from(value: tokio_tungstenite::tungstenite::Error) -> Self {
        match value {
            tokio_tungstenite::tungstenite::Error::Http(ref resp) => {
                Self::Status(resp.status().as_u16())
            }
            _ => Self::Unreachable(value.to_string()),
        }
    }
}

impl From<serde_json::Error> for DaemonError {
    fn from(value: serde_json::Error) -> Self {
        Self::Decode(value.to_string())
    }
}

/// Intent rejected before any network round-trip.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("order is not known to the ledger")]
    MissingOrder,

    #[error("{0} must be greater than zero")]
    NonPositiveAmount(&'static str),

    #[error("token to get and token to give are the same")]
    SameToken,

    #[error("signature must be 65 bytes, got {0}")]
    InvalidSignature(usize),
}

/// Malformed contract log payload.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("payload is not valid UTF-8")]
    Utf8,

    #[error("invalid {field}: {value}")]
    Field { field: &'static str, value: String },
}

/// Ledger read or write failure.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("database error: {0}")]
    Database(String),

    #[error("corrupted record: {0}")]
    Corrupted(String),

    #[error("account not found: {0}")]
    AccountNotFound(Address),

    #[error("sync cursor is not initialized")]
    CursorMissing,
}

impl From<sqlx::Error> for LedgerError {
    fn from(value: sqlx::Error) -> Self {
        Self::Database(value.to_string())
    }
}

/// Submission failure as seen by the caller of [`crate::submit::Submitter`].
///
/// Variants separate failures worth retrying later (daemon unreachable)
/// from those that need a different request (invalid input, rejected).
#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("invalid input: {0}")]
    InvalidInput(#[from] ValidationError),

    #[error("could not reach daemon: {0}")]
    Unreachable(DaemonError),

    #[error("rejected by daemon: {0}")]
    Rejected(DaemonError),

    #[error("malformed daemon response: {0}")]
    Malformed(DaemonError),

    #[error("ledger error: {0}")]
    Persistence(#[from] LedgerError),
}

impl From<DaemonError> for SubmitError {
    fn from(value: DaemonError) -> Self {
        if value.is_transport() {
            Self::Unreachable(value)
        } else if value.is_protocol() {
            Self::Rejected(value)
        } else {
            Self::Malformed(value)
        }
    }
}

/// Failure that ends one subscription cycle of [`crate::sync::SyncEngine`].
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("log source error: {0}")]
    Source(#[from] DaemonError),

    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),
}
