use alloy_primitives::{Address, Bytes, U64, U256};
use serde::Serialize;

/// Contract call payload, `method|{"0":arg0,"1":arg1,...}`.
///
/// Arguments are keyed by their position and JSON encoded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CallData {
    method: &'static str,
    args: Vec<serde_json::Value>,
}

impl CallData {
    pub fn new(method: &'static str) -> Self {
        Self {
            method,
            args: Vec::new(),
        }
    }

    pub fn arg<T: Serialize + ?Sized>(mut self, value: &T) -> Result<Self, serde_json::Error> {
        self.args.push(serde_json::to_value(value)?);
        Ok(self)
    }

    pub fn method(&self) -> &'static str {
        self.method
    }

    pub fn encode(&self) -> String {
        let args = self
            .args
            .iter()
            .enumerate()
            .map(|(i, arg)| format!(r#""{i}":{arg}"#))
            .collect::<Vec<_>>()
            .join(",");
        format!("{}|{{{args}}}", self.method)
    }

    pub fn to_bytes(&self) -> Bytes {
        Bytes::from(self.encode().into_bytes())
    }
}

/// Transaction kind expected by `eth_sendRawTx`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TxType {
    /// Native coin transfer or plain contract call.
    Native,
    /// Transaction carrying a token.
    Token,
}

impl TxType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxType::Native => "tx",
            TxType::Token => "txt",
        }
    }
}

/// Transaction argument object understood by both daemons.
///
/// Unset `gas` goes out as `0x0`, unset `gas_price` as
/// [`crate::DEFAULT_GAS_PRICE`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TxArgs {
    pub from: Address,
    pub token_address: Address,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<Address>,
    pub gas: U64,
    pub gas_price: U256,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<U256>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Bytes>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nonce: Option<U64>,
}

impl TxArgs {
    pub fn new(from: Address, to: Address) -> Self {
        Self {
            from,
            to: Some(to),
            ..Default::default()
        }
    }

    pub fn with_token(mut self, token: Address, value: U256) -> Self {
        self.token_address = token;
        self.value = Some(value);
        self
    }

    pub fn with_call(mut self, call: &CallData) -> Self {
        self.data = Some(call.to_bytes());
        self
    }

    pub fn with_gas_price(mut self, gas_price: U256) -> Self {
        self.gas_price = gas_price;
        self
    }

    pub fn with_gas(mut self, gas: u64) -> Self {
        self.gas = U64::from(gas);
        self
    }

    pub fn with_nonce(mut self, nonce: u64) -> Self {
        self.nonce = Some(U64::from(nonce));
        self
    }

    pub fn tx_type(&self) -> TxType {
        if self.token_address.is_zero() {
            TxType::Native
        } else {
            TxType::Token
        }
    }

    /// JSON object sent as the transaction parameter.
    pub fn to_json(&self) -> serde_json::Value {
        let mut args = self.clone();
        if args.gas_price.is_zero() {
            args.gas_price = U256::from(crate::DEFAULT_GAS_PRICE);
        }
        if args.data.as_ref().is_some_and(|data| data.is_empty()) {
            args.data = None;
        }
        serde_json::to_value(&args).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use alloy_primitives::B256;
    use serde_json::json;

    use super::*;

    #[test]
    fn test_call_data_encoding() {
        assert_eq!(CallData::new("deposit").encode(), "deposit|{}");
        assert_eq!(
            CallData::new("usedVolumeByHash")
                .arg(&B256::with_last_byte(1))
                .unwrap()
                .encode(),
            r#"usedVolumeByHash|{"0":"0x0000000000000000000000000000000000000000000000000000000000000001"}"#
        );
        assert_eq!(
            CallData::new("withdraw")
                .arg("0xabc")
                .unwrap()
                .arg(&U256::from(255))
                .unwrap()
                .encode(),
            r#"withdraw|{"0":"0xabc","1":"0xff"}"#
        );
    }

    #[test]
    fn test_tx_args_json() {
        let from = Address::with_last_byte(1);
        let contract = Address::with_last_byte(2);
        let tx = TxArgs::new(from, contract)
            .with_call(&CallData::new("deposit"))
            .with_nonce(5);

        let value = tx.to_json();
        assert_eq!(value["gas"], json!("0x0"));
        assert_eq!(value["gasPrice"], json!("0x174876e800"));
        assert_eq!(value["nonce"], json!("0x5"));
        assert_eq!(value["data"], json!("0x6465706f7369747c7b7d"));
        assert!(value.get("value").is_none());
        assert_eq!(tx.tx_type(), TxType::Native);

        let token = tx
            .with_token(Address::with_last_byte(3), U256::from(10))
            .with_gas(21_000)
            .with_gas_price(U256::from(1));
        let value = token.to_json();
        assert_eq!(value["gas"], json!("0x5208"));
        assert_eq!(value["value"], json!("0xa"));
        assert_eq!(value["gasPrice"], json!("0x1"));
        assert_eq!(token.tx_type(), TxType::Token);
        assert_eq!(token.tx_type().as_str(), "txt");
    }
}
