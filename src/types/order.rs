use alloy_primitives::{Address, B256, U256, keccak256};
use serde::{Deserialize, Serialize};

use crate::{error::ValidationError, num::Price};

/// Content address of an [`Order`], see [`Order::hash`].
pub type OrderHash = B256;

/// Offer to exchange `amount_give` of `token_give` for `amount_get` of
/// `token_get`, valid until block `expires`.
///
/// Identity is derived from the field values, two orders with the same fields
/// are the same order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub token_get: Address,
    pub amount_get: U256,
    pub token_give: Address,
    pub amount_give: U256,
    #[serde(with = "crate::types::quantity")]
    pub expires: u64,
    #[serde(with = "crate::types::quantity")]
    pub nonce: u64,
    pub maker: Address,
}

impl Order {
    /// String the contract hashes to identify the order.
    ///
    /// Key order, quoting and address casing are part of the contract's
    /// hashing scheme and must stay byte-for-byte identical.
    pub fn canonical_json(&self) -> String {
        format!(
            r#"{{"amountGet":"{}","amountGive":"{}","expires":"{}","nonce":{},"tokenGet":"{}","tokenGive":"{}","maker":"{}"}}"#,
            self.amount_get,
            self.amount_give,
            self.expires,
            self.nonce,
            self.token_get.to_checksum(None),
            self.token_give.to_checksum(None),
            self.maker.to_checksum(None),
        )
    }

    /// Keccak-256 of [`Order::canonical_json`].
    pub fn hash(&self) -> OrderHash {
        keccak256(self.canonical_json().as_bytes())
    }

    pub fn price(&self) -> Price {
        Price::new(self.amount_get, self.amount_give)
    }

    /// Checks every submission path runs before touching the network.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.amount_get.is_zero() {
            return Err(ValidationError::NonPositiveAmount("amountGet"));
        }
        if self.amount_give.is_zero() {
            return Err(ValidationError::NonPositiveAmount("amountGive"));
        }
        if self.token_get == self.token_give {
            return Err(ValidationError::SameToken);
        }
        Ok(())
    }
}

/// [`Order`] with the maker's signature. The signature is verified by the
/// contract only.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SignedOrder {
    pub order: Order,
    pub v: U256,
    pub s: U256,
    pub r: U256,
}

impl SignedOrder {
    /// Splits a 65-byte `r || s || v` signature as returned by the wallet
    /// daemon, shifting the recovery id into the `27/28` range.
    pub fn from_signature(order: Order, signature: &[u8]) -> Result<Self, ValidationError> {
        if signature.len() != 65 {
            return Err(ValidationError::InvalidSignature(signature.len()));
        }
        Ok(Self {
            order,
            r: U256::from_be_slice(&signature[..32]),
            s: U256::from_be_slice(&signature[32..64]),
            v: U256::from(signature[64].wrapping_add(27)),
        })
    }

    pub fn hash(&self) -> OrderHash {
        self.order.hash()
    }
}

#[cfg(test)]
mod tests {
    use alloy_primitives::{address, b256};

    use super::*;

    fn order() -> Order {
        Order {
            token_get: Address::with_last_byte(0x11),
            amount_get: U256::from(1000),
            token_give: Address::with_last_byte(0x22),
            amount_give: U256::from(500),
            expires: 100_000,
            nonce: 1,
            maker: address!("0xa73810e519e1075010678d706533486d8ecc8000"),
        }
    }

    #[test]
    fn test_canonical_json_layout() {
        assert_eq!(
            order().canonical_json(),
            r#"{"amountGet":"1000","amountGive":"500","expires":"100000","nonce":1,"tokenGet":"0x0000000000000000000000000000000000000011","tokenGive":"0x0000000000000000000000000000000000000022","maker":"0xA73810e519e1075010678D706533486D8EcC8000"}"#
        );
    }

    #[test]
    fn test_order_hash() {
        assert_eq!(
            order().hash(),
            b256!("0xd1b17bc46db78f8f0d371563dd5ba26cb1fecbab8806c3704a0036f664451ffb")
        );

        let mut next = order();
        next.nonce = 2;
        assert_eq!(
            next.hash(),
            b256!("0x2294787bd412e13b0d899623f288dda04d39cdf7c908b12a3ac621b5599eea8a")
        );
    }

    #[test]
    fn test_order_hash_sensitive_to_every_field() {
        let base = order().hash();
        let variants = [
            Order { amount_get: U256::from(1001), ..order() },
            Order { amount_give: U256::from(501), ..order() },
            Order { expires: 100_001, ..order() },
            Order { token_get: Address::with_last_byte(0x12), ..order() },
            Order { token_give: Address::with_last_byte(0x23), ..order() },
            Order { maker: Address::with_last_byte(0x01), ..order() },
        ];
        for variant in variants {
            assert_ne!(variant.hash(), base);
        }
    }

    #[test]
    fn test_order_validate() {
        assert_eq!(order().validate(), Ok(()));
        assert_eq!(
            Order { amount_get: U256::ZERO, ..order() }.validate(),
            Err(ValidationError::NonPositiveAmount("amountGet"))
        );
        assert_eq!(
            Order { amount_give: U256::ZERO, ..order() }.validate(),
            Err(ValidationError::NonPositiveAmount("amountGive"))
        );
        assert_eq!(
            Order { token_give: Address::with_last_byte(0x11), ..order() }.validate(),
            Err(ValidationError::SameToken)
        );
    }

    #[test]
    fn test_signed_order_from_signature() {
        let mut signature = [0u8; 65];
        signature[31] = 0x0a;
        signature[63] = 0x0b;
        signature[64] = 1;

        let signed = SignedOrder::from_signature(order(), &signature).unwrap();
        assert_eq!(signed.r, U256::from(0x0a));
        assert_eq!(signed.s, U256::from(0x0b));
        assert_eq!(signed.v, U256::from(28));
        assert_eq!(signed.hash(), order().hash());

        assert_eq!(
            SignedOrder::from_signature(order(), &signature[..64]),
            Err(ValidationError::InvalidSignature(64))
        );
    }

    #[test]
    fn test_signed_order_wire_shape() {
        let signed = SignedOrder::from_signature(order(), &[0u8; 65]).unwrap();
        let value = serde_json::to_value(signed).unwrap();
        assert_eq!(value["v"], "0x1b");
        assert_eq!(value["order"]["amountGet"], "0x3e8");
        assert_eq!(value["order"]["expires"], "0x186a0");
        assert_eq!(value["order"]["nonce"], "0x1");

        let decoded: SignedOrder = serde_json::from_value(value).unwrap();
        assert_eq!(decoded, signed);
    }
}
