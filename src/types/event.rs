use std::{collections::HashMap, sync::LazyLock};

use alloy_primitives::{Address, B256, Bytes, U256};
use serde::{Deserialize, Serialize};

use super::{BlockNumber, Order, OrderHash, SignedOrder, parse_hash_lenient, parse_u256};
use crate::error::DecodeError;

/// Raw contract log as delivered by the chain daemon.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEvent {
    #[serde(default)]
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
    #[serde(with = "crate::types::quantity")]
    pub block_number: BlockNumber,
    #[serde(default, with = "crate::types::quantity")]
    pub log_index: u64,
    #[serde(rename = "transactionHash", alias = "txHash")]
    pub tx_hash: B256,
}

impl LogEvent {
    pub fn kind(&self) -> Option<EventKind> {
        self.topics.first().and_then(EventKind::from_topic)
    }
}

/// Kind of a contract event, identified by the first log topic.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    Order,
    Trade,
    Cancel,
    Withdraw,
    Deposit,
}

static TOPICS: LazyLock<HashMap<B256, EventKind>> = LazyLock::new(|| {
    EventKind::ALL
        .into_iter()
        .map(|kind| (kind.topic(), kind))
        .collect()
});

impl EventKind {
    pub const ALL: [EventKind; 5] = [
        EventKind::Order,
        EventKind::Trade,
        EventKind::Cancel,
        EventKind::Withdraw,
        EventKind::Deposit,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            EventKind::Order => "Order",
            EventKind::Trade => "Trade",
            EventKind::Cancel => "Cancel",
            EventKind::Withdraw => "Withdraw",
            EventKind::Deposit => "Deposit",
        }
    }

    /// Topic the contract emits: ASCII event name left-padded to 32 bytes.
    pub fn topic(&self) -> B256 {
        B256::left_padding_from(self.name().as_bytes())
    }

    pub fn from_topic(topic: &B256) -> Option<Self> {
        TOPICS.get(topic).copied()
    }
}

/// Cumulative and incremental fill of an order reported by a `Trade` event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TradeFill {
    /// Total amount filled so far, including this fill.
    pub filled: U256,
    /// Amount filled by this trade alone.
    pub deal: U256,
    pub taker: Address,
    pub order_hash: OrderHash,
}

/// Decoded contract event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ContractEvent {
    Order(SignedOrder),
    Trade(TradeFill),
    Cancel(OrderHash),
    /// Raw payload, not interpreted yet.
    Withdraw(String),
    /// Raw payload, not interpreted yet.
    Deposit(String),
}

impl ContractEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            ContractEvent::Order(_) => EventKind::Order,
            ContractEvent::Trade(_) => EventKind::Trade,
            ContractEvent::Cancel(_) => EventKind::Cancel,
            ContractEvent::Withdraw(_) => EventKind::Withdraw,
            ContractEvent::Deposit(_) => EventKind::Deposit,
        }
    }

    /// Decodes the log payload, `Ok(None)` for logs of unknown kind.
    pub fn decode(log: &LogEvent) -> Result<Option<Self>, DecodeError> {
        let Some(kind) = log.kind() else {
            return Ok(None);
        };
        let payload = std::str::from_utf8(&log.data).map_err(|_| DecodeError::Utf8)?;

        let event = match kind {
            EventKind::Order => {
                let raw: SignedOrderPayload = serde_json::from_str(payload)?;
                ContractEvent::Order(raw.try_into()?)
            }
            EventKind::Trade => {
                let raw: TradePayload = serde_json::from_str(payload)?;
                ContractEvent::Trade(TradeFill {
                    filled: amount("filled", &raw.filled)?,
                    deal: amount("deal", &raw.deal)?,
                    taker: raw.taker,
                    order_hash: raw.hash,
                })
            }
            EventKind::Cancel => ContractEvent::Cancel(parse_hash_lenient(payload).ok_or_else(
                || DecodeError::Field {
                    field: "hash",
                    value: payload.to_string(),
                },
            )?),
            EventKind::Withdraw => ContractEvent::Withdraw(payload.to_string()),
            EventKind::Deposit => ContractEvent::Deposit(payload.to_string()),
        };
        Ok(Some(event))
    }
}

fn amount(field: &'static str, value: &str) -> Result<U256, DecodeError> {
    parse_u256(value).ok_or_else(|| DecodeError::Field {
        field,
        value: value.to_string(),
    })
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderPayload {
    token_get: Address,
    amount_get: String,
    token_give: Address,
    amount_give: String,
    #[serde(with = "crate::types::quantity")]
    expires: u64,
    #[serde(with = "crate::types::quantity")]
    nonce: u64,
    maker: Address,
}

#[derive(Deserialize)]
struct SignedOrderPayload {
    order: OrderPayload,
    #[serde(rename = "R")]
    r: String,
    #[serde(rename = "S")]
    s: String,
    #[serde(rename = "V")]
    v: String,
}

impl TryFrom<SignedOrderPayload> for SignedOrder {
    type Error = DecodeError;

    fn try_from(raw: SignedOrderPayload) -> Result<Self, Self::Error> {
        let order = Order {
            token_get: raw.order.token_get,
            amount_get: amount("amountGet", &raw.order.amount_get)?,
            token_give: raw.order.token_give,
            amount_give: amount("amountGive", &raw.order.amount_give)?,
            expires: raw.order.expires,
            nonce: raw.order.nonce,
            maker: raw.order.maker,
        };
        Ok(SignedOrder {
            order,
            v: amount("V", &raw.v)?,
            s: amount("S", &raw.s)?,
            r: amount("R", &raw.r)?,
        })
    }
}

#[derive(Deserialize)]
struct TradePayload {
    filled: String,
    deal: String,
    taker: Address,
    hash: B256,
}

#[cfg(test)]
mod tests {
    use alloy_primitives::{address, b256};

    use super::*;

    fn log(kind: EventKind, payload: &str) -> LogEvent {
        LogEvent {
            address: Address::ZERO,
            topics: vec![kind.topic()],
            data: Bytes::copy_from_slice(payload.as_bytes()),
            block_number: 7,
            log_index: 0,
            tx_hash: B256::with_last_byte(7),
        }
    }

    #[test]
    fn test_event_topics() {
        let mut expected = [0u8; 32];
        expected[27..].copy_from_slice(b"Order");
        assert_eq!(EventKind::Order.topic(), B256::from(expected));

        for kind in EventKind::ALL {
            assert_eq!(EventKind::from_topic(&kind.topic()), Some(kind));
        }
        assert_eq!(EventKind::from_topic(&B256::ZERO), None);
    }

    #[test]
    fn test_decode_order_event() {
        let payload = r#"{"order":{"tokenGet":"0x0000000000000000000000000000000000000011","amountGet":"1000","tokenGive":"0x0000000000000000000000000000000000000022","amountGive":"0x1f4","expires":100000,"nonce":1,"maker":"0xa73810e519e1075010678d706533486d8ecc8000"},"R":"0x0a","S":"11","V":"27"}"#;

        let Some(ContractEvent::Order(signed)) =
            ContractEvent::decode(&log(EventKind::Order, payload)).unwrap()
        else {
            panic!("expected order event");
        };
        assert_eq!(signed.order.amount_get, U256::from(1000));
        assert_eq!(signed.order.amount_give, U256::from(500));
        assert_eq!(
            signed.order.maker,
            address!("0xa73810e519e1075010678d706533486d8ecc8000")
        );
        assert_eq!(signed.r, U256::from(10));
        assert_eq!(signed.s, U256::from(11));
        assert_eq!(signed.v, U256::from(27));
        assert_eq!(
            signed.hash(),
            b256!("0xd1b17bc46db78f8f0d371563dd5ba26cb1fecbab8806c3704a0036f664451ffb")
        );
    }

    #[test]
    fn test_decode_trade_event() {
        let payload = r#"{"filled":"150","deal":"50","taker":"0x00000000000000000000000000000000000000aa","hash":"0xd1b17bc46db78f8f0d371563dd5ba26cb1fecbab8806c3704a0036f664451ffb"}"#;

        assert_eq!(
            ContractEvent::decode(&log(EventKind::Trade, payload)).unwrap(),
            Some(ContractEvent::Trade(TradeFill {
                filled: U256::from(150),
                deal: U256::from(50),
                taker: Address::with_last_byte(0xaa),
                order_hash: b256!(
                    "0xd1b17bc46db78f8f0d371563dd5ba26cb1fecbab8806c3704a0036f664451ffb"
                ),
            }))
        );
    }

    #[test]
    fn test_decode_cancel_event() {
        let hash = b256!("0xd1b17bc46db78f8f0d371563dd5ba26cb1fecbab8806c3704a0036f664451ffb");
        for payload in [
            "0xd1b17bc46db78f8f0d371563dd5ba26cb1fecbab8806c3704a0036f664451ffb",
            "\"0xd1b17bc46db78f8f0d371563dd5ba26cb1fecbab8806c3704a0036f664451ffb\"",
        ] {
            assert_eq!(
                ContractEvent::decode(&log(EventKind::Cancel, payload)).unwrap(),
                Some(ContractEvent::Cancel(hash))
            );
        }
    }

    #[test]
    fn test_decode_malformed_and_unknown() {
        assert!(ContractEvent::decode(&log(EventKind::Order, "{not json")).is_err());
        assert!(matches!(
            ContractEvent::decode(&log(
                EventKind::Trade,
                r#"{"filled":"abc","deal":"1","taker":"0x00000000000000000000000000000000000000aa","hash":"0x00"}"#
            )),
            Err(_)
        ));
        assert!(ContractEvent::decode(&log(EventKind::Cancel, "")).is_err());

        let mut unknown = log(EventKind::Order, "{}");
        unknown.topics = vec![B256::with_last_byte(1)];
        assert_eq!(ContractEvent::decode(&unknown).unwrap(), None);

        unknown.topics.clear();
        assert_eq!(ContractEvent::decode(&unknown).unwrap(), None);
    }

    #[test]
    fn test_log_event_wire_format() {
        let raw = serde_json::json!({
            "address": "0x00000000000000000000000000000000000000cc",
            "topics": [EventKind::Deposit.topic()],
            "data": "0x7b7d",
            "blockNumber": "0x1a",
            "logIndex": "0x2",
            "transactionHash": B256::with_last_byte(9),
        });
        let log: LogEvent = serde_json::from_value(raw).unwrap();
        assert_eq!(log.block_number, 26);
        assert_eq!(log.log_index, 2);
        assert_eq!(log.kind(), Some(EventKind::Deposit));
        assert_eq!(
            ContractEvent::decode(&log).unwrap(),
            Some(ContractEvent::Deposit("{}".to_string()))
        );
    }
}
