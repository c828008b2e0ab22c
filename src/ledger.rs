//! Scaled-integer ledger arithmetic
//!
//! Every money computation in the engine runs through this module. Amounts
//! are integers carrying 18 implied decimal places (value × 10^18), stored
//! in Postgres `NUMERIC` columns and surfaced as `BigDecimal`. The actual
//! arithmetic happens on arbitrary-precision `BigInt`s so products like
//! `collateral_amount * bid_price` cannot overflow and no floating point is
//! ever involved. Divisions truncate toward zero.

use bigdecimal::BigDecimal;
use num_bigint::BigInt;

use crate::error::{EngineError, EngineResult};

/// Implied decimal places in every scaled amount
pub const AMOUNT_SCALE: u32 = 18;

/// The fixed-point scale unit, 10^18
pub fn scale_unit() -> BigDecimal {
    BigDecimal::from(scale_unit_int())
}

fn scale_unit_int() -> BigInt {
    num_traits::pow(BigInt::from(10), AMOUNT_SCALE as usize)
}

/// Truncate a decimal to its integer part
///
/// Scaled amounts are integers by construction; a fractional input here
/// means an upstream computation skipped the ledger, so the fraction is
/// dropped rather than rounded.
fn to_bigint(value: &BigDecimal) -> BigInt {
    let (mantissa, exponent) = value.as_bigint_and_exponent();
    if exponent <= 0 {
        mantissa * num_traits::pow(BigInt::from(10), (-exponent) as usize)
    } else {
        mantissa / num_traits::pow(BigInt::from(10), exponent as usize)
    }
}

/// Exact `a * b / denom` with truncating division
pub fn mul_div(a: &BigDecimal, b: &BigDecimal, denom: &BigDecimal) -> EngineResult<BigDecimal> {
    let denom = to_bigint(denom);
    if denom == BigInt::from(0) {
        return Err(EngineError::Validation(
            "Division by zero in ledger arithmetic".to_string(),
        ));
    }
    let product = to_bigint(a) * to_bigint(b);
    Ok(BigDecimal::from(product / denom))
}

/// Collateral valuation in principal units: `collateral * bid_price / 10^18`
pub fn collateral_valuation(
    collateral_amount: &BigDecimal,
    bid_price: &BigDecimal,
) -> EngineResult<BigDecimal> {
    mul_div(collateral_amount, bid_price, &scale_unit())
}

/// LTV as an integer percentage: `outstanding * 100 / valuation`
pub fn ltv_percent(
    outstanding_amount: &BigDecimal,
    valuation_amount: &BigDecimal,
) -> EngineResult<BigDecimal> {
    if to_bigint(valuation_amount) == BigInt::from(0) {
        return Err(EngineError::Validation(
            "Collateral valuation is zero, cannot compute LTV".to_string(),
        ));
    }
    mul_div(outstanding_amount, &BigDecimal::from(100), valuation_amount)
}

/// Portion of an amount at a percentage rate: `amount * rate / 100`
pub fn rate_portion(amount: &BigDecimal, rate_percent: &BigDecimal) -> EngineResult<BigDecimal> {
    mul_div(amount, rate_percent, &BigDecimal::from(100))
}

/// Reject zero or negative amounts
pub fn ensure_positive(name: &str, value: &BigDecimal) -> EngineResult<()> {
    if to_bigint(value) <= BigInt::from(0) {
        return Err(EngineError::Validation(format!(
            "{} must be positive",
            name
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    #[test]
    fn test_scale_unit() {
        assert_eq!(scale_unit(), dec("1000000000000000000"));
    }

    #[test]
    fn test_collateral_valuation_one_unit() {
        // 1.0 collateral at a bid of 3000 (both in 18-decimal scale)
        let collateral = dec("1000000000000000000");
        let bid = dec("3000000000000000000000");

        let valuation = collateral_valuation(&collateral, &bid).unwrap();
        assert_eq!(valuation, dec("3000000000000000000000"));
    }

    #[test]
    fn test_ltv_percent_half() {
        let outstanding = dec("1500000000000000000000");
        let valuation = dec("3000000000000000000000");

        let ltv = ltv_percent(&outstanding, &valuation).unwrap();
        assert_eq!(ltv, dec("50"));
    }

    #[test]
    fn test_ltv_percent_truncates() {
        let ltv = ltv_percent(&dec("1000"), &dec("3000")).unwrap();
        assert_eq!(ltv, dec("33"));
    }

    #[test]
    fn test_ltv_zero_valuation_rejected() {
        let err = ltv_percent(&dec("1000"), &dec("0")).unwrap_err();
        assert_eq!(err.error_code(), "VALIDATION_FAILURE");
    }

    #[test]
    fn test_rate_portion() {
        // 12% of 1000 units
        let principal = dec("1000000000000000000000");
        let portion = rate_portion(&principal, &dec("12")).unwrap();
        assert_eq!(portion, dec("120000000000000000000"));
    }

    #[test]
    fn test_mul_div_no_overflow_at_wei_scale() {
        // Products at 18-decimal scale exceed both i128 and 96-bit decimals
        let a = dec("123456789000000000000000000");
        let b = dec("987654321000000000000000000");
        let result = mul_div(&a, &b, &scale_unit()).unwrap();
        assert_eq!(result, dec("121932631112635269000000000000000000"));
    }

    #[test]
    fn test_division_by_zero_rejected() {
        let err = mul_div(&dec("1"), &dec("1"), &dec("0")).unwrap_err();
        assert_eq!(err.error_code(), "VALIDATION_FAILURE");
    }

    #[test]
    fn test_ensure_positive() {
        assert!(ensure_positive("amount", &dec("1")).is_ok());
        assert!(ensure_positive("amount", &dec("0")).is_err());
        assert!(ensure_positive("amount", &dec("-5")).is_err());
    }
}
