use ethers::types::U256;
use rust_decimal::Decimal;
use std::str::FromStr;

/// TRC20 tokens that report `decimals = 0` are treated as 6-decimal (USDT).
pub const DEFAULT_TOKEN_DECIMALS: u32 = 6;

// rust_decimal carries at most 28 fractional digits
const MAX_SCALE: u32 = 28;

/// Scales a raw on-chain integer (base-10 string) down by `10^decimals`.
///
/// Exact: the integer becomes the mantissa and `decimals` the scale, so
/// large balances never pass through floating point.
pub fn raw_to_decimal(raw: &str, decimals: u32) -> Result<Decimal, AmountError> {
    let digits = raw.trim();
    let digits = if digits.is_empty() { "0" } else { digits };
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(AmountError::InvalidInteger(raw.to_string()));
    }
    if decimals > MAX_SCALE {
        return Err(AmountError::Overflow);
    }

    let mut value = Decimal::from_str(digits).map_err(|_| AmountError::Overflow)?;
    value
        .set_scale(decimals)
        .map_err(|_| AmountError::Overflow)?;
    Ok(value.normalize())
}

/// Same as [`raw_to_decimal`] for a big-endian hex word (ABI return values).
pub fn hex_to_decimal(hex_word: &str, decimals: u32) -> Result<Decimal, AmountError> {
    let digits = hex_word.trim().trim_start_matches("0x");
    if digits.is_empty() {
        return Ok(Decimal::ZERO);
    }
    let value = U256::from_str_radix(digits, 16)
        .map_err(|_| AmountError::InvalidInteger(hex_word.to_string()))?;
    raw_to_decimal(&value.to_string(), decimals)
}

/// `0` decimals from the API means "unknown", not "indivisible".
pub fn effective_decimals(reported: u32) -> u32 {
    if reported == 0 {
        DEFAULT_TOKEN_DECIMALS
    } else {
        reported
    }
}

/// Sun (1e-6 TRX) to TRX.
pub fn sun_to_trx(sun: i64) -> Decimal {
    Decimal::new(sun, 6).normalize()
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AmountError {
    #[error("Invalid integer amount: {0}")]
    InvalidInteger(String),
    #[error("Overflow in conversion")]
    Overflow,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::prelude::*;

    #[test]
    fn six_decimal_balance() {
        let value = raw_to_decimal("1500000", 6).unwrap();
        assert_eq!(value, Decimal::from_str("1.5").unwrap());
        assert_eq!(value.to_string(), "1.5");
    }

    #[test]
    fn large_balance_keeps_precision() {
        let value = raw_to_decimal("123456789012345678901234", 6).unwrap();
        assert_eq!(value.to_string(), "123456789012345678.901234");
    }

    #[test]
    fn empty_and_invalid_values() {
        assert_eq!(raw_to_decimal("", 6).unwrap(), Decimal::ZERO);
        assert_eq!(
            raw_to_decimal("12a", 6),
            Err(AmountError::InvalidInteger("12a".to_string()))
        );
        assert_eq!(
            raw_to_decimal("1".repeat(40).as_str(), 6),
            Err(AmountError::Overflow)
        );
    }

    #[test]
    fn hex_word_decoding() {
        let word = format!("{:0>64}", "16e360");
        assert_eq!(hex_to_decimal(&word, 6).unwrap(), Decimal::from_str("1.5").unwrap());
        assert_eq!(hex_to_decimal("", 6).unwrap(), Decimal::ZERO);
        assert!(hex_to_decimal("xyz", 6).is_err());
    }

    #[test]
    fn zero_decimals_defaults_to_six() {
        assert_eq!(effective_decimals(0), 6);
        assert_eq!(effective_decimals(18), 18);
        assert_eq!(sun_to_trx(1_100_000), Decimal::from_str("1.1").unwrap());
    }
}
