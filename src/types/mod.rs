mod event;
mod order;
mod request;

use alloy_primitives::{B256, U256, hex};

pub use event::*;
pub use order::*;
pub use request::*;

/// Chain block height.
pub type BlockNumber = u64;

/// Transaction counter of an account.
pub type Nonce = u64;

/// Parses an unsigned big integer from `0x`-prefixed hex or decimal text.
pub fn parse_u256(value: &str) -> Option<U256> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    value.parse().ok()
}

/// Parses a 32-byte hash from hex text, left-padding short values and keeping
/// the trailing 32 bytes of long ones.
pub fn parse_hash_lenient(value: &str) -> Option<B256> {
    let value = value.trim().trim_matches('"');
    let digits = value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .unwrap_or(value);
    if digits.is_empty() {
        return None;
    }
    let padded;
    let digits = if digits.len() % 2 == 1 {
        padded = format!("0{digits}");
        padded.as_str()
    } else {
        digits
    };
    let bytes = hex::decode(digits).ok()?;
    let tail = &bytes[bytes.len().saturating_sub(32)..];
    Some(B256::left_padding_from(tail))
}

/// Serde helpers for `u64` quantities encoded as `0x`-prefixed hex strings.
///
/// Deserialization also accepts JSON numbers and decimal strings as emitted
/// by contract event payloads.
pub(crate) mod quantity {
    use serde::{Deserialize, Deserializer, Serializer, de};

    pub fn serialize<S: Serializer>(value: &u64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("{value:#x}"))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(u64),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Number(n) => Ok(n),
            Raw::Text(s) => parse(&s).ok_or_else(|| de::Error::custom(format!("invalid quantity: {s}"))),
        }
    }

    pub fn parse(value: &str) -> Option<u64> {
        let value = value.trim();
        match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
            Some(digits) => u64::from_str_radix(digits, 16).ok(),
            None => value.parse().ok(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::b256;

    #[test]
    fn test_parse_u256_prefixes() {
        assert_eq!(parse_u256("1000"), Some(U256::from(1000)));
        assert_eq!(parse_u256("0x3e8"), Some(U256::from(1000)));
        assert_eq!(parse_u256(""), None);
        assert_eq!(parse_u256("12abc"), None);
    }

    #[test]
    fn test_parse_hash_lenient() {
        let hash = b256!("0x6c554f11cc33de44e2687e6539c27d9fad08db76803f92008d7cfcea55ad597a");
        assert_eq!(
            parse_hash_lenient("0x6c554f11cc33de44e2687e6539c27d9fad08db76803f92008d7cfcea55ad597a"),
            Some(hash)
        );
        assert_eq!(
            parse_hash_lenient("\"0x6c554f11cc33de44e2687e6539c27d9fad08db76803f92008d7cfcea55ad597a\""),
            Some(hash)
        );
        assert_eq!(parse_hash_lenient("0x1"), Some(B256::with_last_byte(1)));
        assert_eq!(parse_hash_lenient("zz"), None);
        assert_eq!(parse_hash_lenient(""), None);
    }

    #[test]
    fn test_quantity_parse() {
        assert_eq!(quantity::parse("0x10"), Some(16));
        assert_eq!(quantity::parse("16"), Some(16));
        assert_eq!(quantity::parse("0x"), None);
    }
}
