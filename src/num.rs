use std::cmp::Ordering;

use alloy_primitives::{U256, U512, hex};
use fastnum::{
    UD256, bint,
    decimal::{Context, RoundingMode},
};

/// Exact order price, `amountGet / amountGive`.
///
/// Kept as a rational so book ordering never depends on float rounding.
/// Comparison cross-multiplies into 512 bits, so it is exact for the whole
/// `U256` range. A zero denominator orders above every finite price.
#[derive(Clone, Copy, Debug)]
pub struct Price {
    numerator: U256,
    denominator: U256,
}

impl Price {
    pub fn new(numerator: U256, denominator: U256) -> Self {
        Self {
            numerator,
            denominator,
        }
    }

    pub fn numerator(&self) -> U256 {
        self.numerator
    }

    pub fn denominator(&self) -> U256 {
        self.denominator
    }

    /// Decimal approximation for display, `None` for a zero denominator.
    pub fn to_decimal(&self) -> Option<UD256> {
        if self.denominator.is_zero() {
            return None;
        }
        Some(to_unsigned_decimal(self.numerator)? / to_unsigned_decimal(self.denominator)?)
    }

    /// Fixed-point key, `floor(price * 2^64)` as 128 hex digits, so keys
    /// compare as text in price order. Prices closer than `2^-64` may share a
    /// key. A zero denominator gets the largest key.
    pub fn sort_key(&self) -> String {
        if self.denominator.is_zero() {
            return "f".repeat(128);
        }
        let scaled: U512 = self.numerator.widening_mul(U256::from(1u128 << 64));
        let key = scaled / U512::from_limbs_slice(self.denominator.as_limbs());
        hex::encode(key.to_be_bytes::<64>())
    }

    fn cross(&self, other: &Self) -> (U512, U512) {
        let lhs: U512 = self.numerator.widening_mul(other.denominator);
        let rhs: U512 = other.numerator.widening_mul(self.denominator);
        (lhs, rhs)
    }
}

impl PartialEq for Price {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Price {}

impl PartialOrd for Price {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Price {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.denominator.is_zero(), other.denominator.is_zero()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Greater,
            (false, true) => Ordering::Less,
            (false, false) => {
                let (lhs, rhs) = self.cross(other);
                lhs.cmp(&rhs)
            }
        }
    }
}

impl std::fmt::Display for Price {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.to_decimal() {
            Some(value) => write!(f, "{value}"),
            None => write!(f, "{}/{}", self.numerator, self.denominator),
        }
    }
}

fn to_unsigned_decimal(value: U256) -> Option<UD256> {
    let unscaled = bint::UInt::<4>::from_le_slice(value.as_le_slice())?;
    Some(UD256::from_parts(
        unscaled,
        0,
        Context::default().with_rounding_mode(RoundingMode::Floor),
    ))
}

#[cfg(test)]
mod tests {
    use fastnum::udec256;

    use super::*;

    fn price(num: u64, den: u64) -> Price {
        Price::new(U256::from(num), U256::from(den))
    }

    #[test]
    fn test_price_equivalent_fractions() {
        assert_eq!(price(1000, 500), price(2, 1));
        assert_eq!(price(3, 9), price(1, 3));
        assert_ne!(price(1, 3), price(1, 4));
    }

    #[test]
    fn test_price_ordering() {
        assert!(price(1, 3) < price(1, 2));
        assert!(price(2, 1) > price(199, 100));
        assert!(price(1, 0) > price(u64::MAX, 1));

        let big = Price::new(U256::MAX, U256::MAX - U256::from(1));
        assert!(big > price(1, 1));
    }

    #[test]
    fn test_sort_key_follows_price() {
        let prices = [
            price(0, 1),
            price(1, 4),
            price(1, 3),
            price(1, 1),
            price(2, 1),
            price(u64::MAX, 1),
            price(1, 0),
        ];
        for pair in prices.windows(2) {
            assert!(pair[0].sort_key() < pair[1].sort_key());
        }
        assert_eq!(price(1000, 500).sort_key(), price(2, 1).sort_key());
        assert_eq!(price(1, 1).sort_key().len(), 128);
        assert!(price(1, 1).sort_key().ends_with("10000000000000000"));

        let scale = U256::from(10).pow(U256::from(30));
        let almost_one = Price::new(scale + U256::from(1), scale);
        assert!(almost_one > price(1, 1));
        assert_eq!(almost_one.sort_key(), price(1, 1).sort_key());
    }

    #[test]
    fn test_price_to_decimal() {
        assert_eq!(price(1000, 500).to_decimal(), Some(udec256!(2)));
        assert_eq!(price(1, 4).to_decimal(), Some(udec256!(0.25)));
        assert_eq!(price(1, 0).to_decimal(), None);
        assert_eq!(price(1, 0).to_string(), "1/0");
    }
}
