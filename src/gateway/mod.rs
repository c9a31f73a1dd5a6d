//! JSON-RPC clients of the chain and wallet daemons.
//!
//! [`Daemon`] is the raw transport, one JSON-RPC call in, the decoded
//! `result` out. [`ChainApi`] and [`WalletApi`] put typed method wrappers on
//! top of it. Calls are never retried here.

mod chain;
mod wallet;

use std::{future::Future, sync::Arc, time::Duration};

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use url::Url;

use crate::error::DaemonError;

pub use chain::ChainApi;
pub use wallet::WalletApi;

/// Upper bound of a single daemon call.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(120);

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const TCP_KEEPALIVE: Duration = Duration::from_secs(30);
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(120);
const POOL_MAX_IDLE_PER_HOST: usize = 2;

/// Transport to a JSON-RPC daemon.
pub trait Daemon: Send + Sync {
    /// Performs one call and returns its `result` member.
    fn call(
        &self,
        method: &str,
        params: Value,
    ) -> impl Future<Output = Result<Value, DaemonError>> + Send;
}

impl<D: Daemon> Daemon for Arc<D> {
    fn call(
        &self,
        method: &str,
        params: Value,
    ) -> impl Future<Output = Result<Value, DaemonError>> + Send {
        self.as_ref().call(method, params)
    }
}

#[derive(Serialize)]
struct Request<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: &'a Value,
}

#[derive(Deserialize)]
struct Response {
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<RpcError>,
}

#[derive(Deserialize)]
struct RpcError {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
}

/// Decodes a JSON-RPC response body, a non-zero `error.code` wins over
/// `result`.
pub fn decode_response(body: &[u8]) -> Result<Value, DaemonError> {
    let response: Response = serde_json::from_slice(body)?;
    match response.error {
        Some(error) if error.code != 0 => Err(DaemonError::Rpc {
            code: error.code,
            message: error.message,
        }),
        _ => Ok(response.result),
    }
}

pub(crate) fn decode_result<T: DeserializeOwned>(value: Value) -> Result<T, DaemonError> {
    Ok(serde_json::from_value(value)?)
}

/// How the request URL is derived from the method name.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Routing {
    /// `{base}/{method}` with the 4-character namespace prefix dropped,
    /// e.g. `eth_call` goes to `{base}/call`.
    #[default]
    ByMethod,
    /// Every call goes to `{base}`.
    Plain,
}

/// [`Daemon`] over HTTP POST with a pooled connection set.
#[derive(Clone, Debug)]
pub struct HttpDaemon {
    client: reqwest::Client,
    base: Url,
    routing: Routing,
}

impl HttpDaemon {
    pub fn new(base: Url) -> Result<Self, DaemonError> {
        Self::with_timeout(base, DEFAULT_CALL_TIMEOUT)
    }

    pub fn with_timeout(base: Url, timeout: Duration) -> Result<Self, DaemonError> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .tcp_keepalive(TCP_KEEPALIVE)
            .pool_idle_timeout(POOL_IDLE_TIMEOUT)
            .pool_max_idle_per_host(POOL_MAX_IDLE_PER_HOST)
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            base,
            routing: Routing::default(),
        })
    }

    pub fn with_routing(mut self, routing: Routing) -> Self {
        self.routing = routing;
        self
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    fn url(&self, method: &str) -> String {
        let base = self.base.as_str().trim_end_matches('/');
        match self.routing {
            Routing::ByMethod => format!("{base}/{}", method.get(4..).unwrap_or_default()),
            Routing::Plain => base.to_string(),
        }
    }
}

impl Daemon for HttpDaemon {
    async fn call(&self, method: &str, params: Value) -> Result<Value, DaemonError> {
        let url = self.url(method);
        tracing::debug!(%method, %url, "daemon call");

        let request = Request {
            jsonrpc: "2.0",
            id: 1,
            method,
            params: &params,
        };
        let response = self.client.post(&url).json(&request).send().await?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            tracing::debug!(%method, status = status.as_u16(), "daemon call failed");
            return Err(DaemonError::Status(status.as_u16()));
        }

        let body = response.bytes().await?;
        decode_response(&body)
    }
}
