use std::future::Future;

use alloy_primitives::{Address, B256};
use futures::{SinkExt, StreamExt, stream, stream::BoxStream};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use url::Url;

use crate::{
    error::DaemonError,
    gateway::decode_response,
    types::{BlockNumber, EventKind, LogEvent},
};

/// Live contract logs, ends when the subscription closes.
pub type LogStream = BoxStream<'static, Result<LogEvent, DaemonError>>;

/// Selects contract logs by emitting address, topic and starting block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogFilter {
    pub addrs: Vec<Address>,
    /// `None` matches every topic.
    pub topics: Option<Vec<B256>>,
    pub from_block: BlockNumber,
}

impl LogFilter {
    pub fn new(contract: Address) -> Self {
        Self {
            addrs: vec![contract],
            topics: None,
            from_block: 0,
        }
    }

    pub fn with_kinds(mut self, kinds: impl IntoIterator<Item = EventKind>) -> Self {
        self.topics = Some(kinds.into_iter().map(|kind| kind.topic()).collect());
        self
    }

    pub fn from_block(mut self, block: BlockNumber) -> Self {
        self.from_block = block;
        self
    }

    /// Parameter of a one-shot `lk_getLogs` query up to the latest block.
    pub fn to_query(&self) -> Value {
        let mut query = json!({
            "fromBlock": format!("{:#x}", self.from_block),
            "toBlock": "latest",
            "address": self.addrs,
        });
        if let Some(topics) = &self.topics {
            query["topics"] = json!([topics]);
        }
        query
    }

    /// Parameter of a `logsSubscribe` subscription.
    pub fn to_subscription(&self) -> Value {
        json!({
            "addrs": self.addrs,
            "topics": self.topics.as_ref().map(|topics| json!([topics])),
            "fromBlock": format!("{:#x}", self.from_block),
        })
    }
}

/// Source of historical and live contract logs.
pub trait LogSource: Send + Sync {
    /// All logs matching `filter` from `filter.from_block` to the latest block.
    fn get_logs(
        &self,
        filter: &LogFilter,
    ) -> impl Future<Output = Result<Vec<LogEvent>, DaemonError>> + Send;

    /// Opens a live subscription for logs matching `filter`.
    fn subscribe(
        &self,
        filter: &LogFilter,
    ) -> impl Future<Output = Result<LogStream, DaemonError>> + Send;
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Deserialize)]
struct Notification {
    params: NotificationParams,
}

#[derive(Deserialize)]
struct NotificationParams {
    subscription: Value,
    result: LogEvent,
}

/// [`LogSource`] over the chain daemon's WebSocket endpoint.
///
/// Every call opens its own connection, a subscription owns its connection
/// until the returned stream is dropped.
#[derive(Clone, Debug)]
pub struct WsLogSource {
    url: Url,
}

impl WsLogSource {
    pub fn new(url: Url) -> Self {
        Self { url }
    }

    async fn connect(&self) -> Result<WsStream, DaemonError> {
        tracing::debug!(url = %self.url, "connecting log source");
        let (ws, _) = connect_async(self.url.as_str()).await?;
        Ok(ws)
    }
}

/// Sends one request and waits for the response carrying its id.
async fn request(ws: &mut WsStream, method: &str, params: Value) -> Result<Value, DaemonError> {
    tracing::debug!(%method, "log source call");
    let request = json!({"jsonrpc": "2.0", "id": 1, "method": method, "params": params});
    ws.send(Message::Text(request.to_string())).await?;

    while let Some(message) = ws.next().await {
        match message? {
            Message::Text(text) => {
                let value: Value = serde_json::from_str(&text)?;
                if value.get("id") == Some(&json!(1)) {
                    return decode_response(text.as_bytes());
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }
    Err(DaemonError::Unreachable(format!(
        "connection closed before {method} response"
    )))
}

impl LogSource for WsLogSource {
    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<LogEvent>, DaemonError> {
        let mut ws = self.connect().await?;
        let result = request(&mut ws, "lk_getLogs", json!([filter.to_query()])).await;
        if let Err(err) = ws.close(None).await {
            tracing::debug!(?err, "failed to close log source connection");
        }
        Ok(serde_json::from_value(result?)?)
    }

    async fn subscribe(&self, filter: &LogFilter) -> Result<LogStream, DaemonError> {
        let mut ws = self.connect().await?;
        let id = request(
            &mut ws,
            "lk_subscribe",
            json!(["logsSubscribe", filter.to_subscription()]),
        )
        .await?;
        tracing::debug!(%id, "log subscription opened");

        Ok(notifications(ws, id).boxed())
    }
}

/// Logs pushed on subscription `id`. Ends after the connection closes or
/// fails, the failure being the last item.
fn notifications(
    ws: WsStream,
    id: Value,
) -> impl futures::Stream<Item = Result<LogEvent, DaemonError>> + Send + 'static {
    stream::unfold(Some(ws), move |state| {
        let id = id.clone();
        async move {
            let mut ws = state?;
            loop {
                let message = match ws.next().await {
                    Some(Ok(message)) => message,
                    Some(Err(err)) => return Some((Err(DaemonError::from(err)), None)),
                    None => return None,
                };
                match message {
                    Message::Text(text) => match serde_json::from_str::<Notification>(&text) {
                        Ok(notification) if notification.params.subscription == id => {
                            return Some((Ok(notification.params.result), Some(ws)));
                        }
                        Ok(_) => continue,
                        Err(err) => {
                            tracing::warn!(?err, %text, "unexpected subscription message");
                            continue;
                        }
                    },
                    Message::Close(frame) => {
                        tracing::debug!(?frame, "log subscription closed");
                        return None;
                    }
                    _ => continue,
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use alloy_primitives::Bytes;
    use tokio::net::TcpListener;

    use super::*;

    fn log(block_number: u64) -> LogEvent {
        LogEvent {
            address: Address::with_last_byte(0xcc),
            topics: vec![EventKind::Cancel.topic()],
            data: Bytes::from_static(b"0x01"),
            block_number,
            log_index: 0,
            tx_hash: B256::with_last_byte(1),
        }
    }

    #[test]
    fn test_filter_params() {
        let filter = LogFilter::new(Address::with_last_byte(0xcc))
            .with_kinds([EventKind::Order])
            .from_block(16);

        let subscription = filter.to_subscription();
        assert_eq!(subscription["fromBlock"], "0x10");
        assert_eq!(subscription["addrs"].as_array().unwrap().len(), 1);
        assert_eq!(
            subscription["topics"],
            json!([[EventKind::Order.topic()]])
        );

        let query = LogFilter::new(Address::with_last_byte(0xcc)).to_query();
        assert_eq!(query["fromBlock"], "0x0");
        assert_eq!(query["toBlock"], "latest");
        assert!(query.get("topics").is_none());
    }

    async fn serve_once<F, Fut>(handler: F) -> Url
    where
        F: FnOnce(WebSocketStream<TcpStream>) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = Url::parse(&format!("ws://{}", listener.local_addr().unwrap())).unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            handler(ws).await;
        });
        url
    }

    async fn expect_request(ws: &mut WebSocketStream<TcpStream>, method: &str) -> Value {
        let message = ws.next().await.unwrap().unwrap();
        let request: Value = serde_json::from_str(message.to_text().unwrap()).unwrap();
        assert_eq!(request["method"], method);
        request
    }

    #[tokio::test]
    async fn test_ws_subscription() {
        let url = serve_once(|mut ws| async move {
            let request = expect_request(&mut ws, "lk_subscribe").await;
            assert_eq!(request["params"][0], "logsSubscribe");
            assert_eq!(request["params"][1]["fromBlock"], "0x5");

            let reply = json!({"jsonrpc": "2.0", "id": 1, "result": "0xab"});
            ws.send(Message::Text(reply.to_string())).await.unwrap();

            for (subscription, block) in [("0xff", 6), ("0xab", 7)] {
                let notification = json!({
                    "jsonrpc": "2.0",
                    "method": "lk_subscription",
                    "params": {"subscription": subscription, "result": log(block)},
                });
                ws.send(Message::Text(notification.to_string())).await.unwrap();
            }
            ws.close(None).await.unwrap();
        })
        .await;

        let source = WsLogSource::new(url);
        let filter = LogFilter::new(Address::with_last_byte(0xcc)).from_block(5);
        let logs = source
            .subscribe(&filter)
            .await
            .unwrap()
            .collect::<Vec<_>>()
            .await;

        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].as_ref().unwrap(), &log(7));
    }

    #[tokio::test]
    async fn test_ws_get_logs() {
        let url = serve_once(|mut ws| async move {
            let request = expect_request(&mut ws, "lk_getLogs").await;
            assert_eq!(request["params"][0]["fromBlock"], "0x2");

            let reply = json!({"jsonrpc": "2.0", "id": 1, "result": [log(2), log(3)]});
            ws.send(Message::Text(reply.to_string())).await.unwrap();
            let _ = ws.next().await;
        })
        .await;

        let source = WsLogSource::new(url);
        let logs = source
            .get_logs(&LogFilter::new(Address::with_last_byte(0xcc)).from_block(2))
            .await
            .unwrap();
        assert_eq!(logs, vec![log(2), log(3)]);
    }

    #[tokio::test]
    async fn test_ws_rpc_error() {
        let url = serve_once(|mut ws| async move {
            expect_request(&mut ws, "lk_subscribe").await;
            let reply = json!({"jsonrpc": "2.0", "id": 1, "error": {"code": -32601, "message": "no such method"}});
            ws.send(Message::Text(reply.to_string())).await.unwrap();
        })
        .await;

        let source = WsLogSource::new(url);
        let result = source
            .subscribe(&LogFilter::new(Address::with_last_byte(0xcc)))
            .await;
        assert!(matches!(result, Err(DaemonError::Rpc { code: -32601, .. })));
    }
}
