//! Price transformer
//!
//! `value = trunc(price * (1 + bps / 10000) * scale)`, computed in exact
//! decimal arithmetic.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::error::InvalidQuoteError;
use crate::types::{Quote, ReportValue};

/// Basis points per unit
pub const BPS_DENOMINATOR: Decimal = dec!(10000);

/// Apply the upward adjustment and fixed-point scaling to a quote.
///
/// Truncates toward zero. Fails for non-positive prices and for products
/// outside the decimal range.
pub fn transform(
    quote: &Quote,
    adjustment_bps: u32,
    scale_factor: u64,
) -> Result<ReportValue, InvalidQuoteError> {
    let price = quote.price;
    if price <= Decimal::ZERO {
        return Err(InvalidQuoteError::NonPositive(price));
    }

    let factor = Decimal::ONE + Decimal::from(adjustment_bps) / BPS_DENOMINATOR;
    let scaled = price
        .checked_mul(factor)
        .and_then(|v| v.checked_mul(Decimal::from(scale_factor)))
        .ok_or(InvalidQuoteError::Overflow(price))?;

    let value = scaled
        .trunc()
        .to_u128()
        .ok_or(InvalidQuoteError::Overflow(price))?;

    Ok(ReportValue::new(
        value,
        scale_factor,
        adjustment_bps,
        quote.clone(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn quote(price: Decimal) -> Quote {
        Quote {
            asset: "ethereum".to_string(),
            currency: "usd".to_string(),
            price,
            observed_at: Utc::now(),
            source: "test".to_string(),
        }
    }

    #[test]
    fn reference_example_is_exact() {
        let value = transform(&quote(dec!(3000.00)), 20, 1_000_000).unwrap();
        assert_eq!(value.value(), 3_006_000_000);
        assert_eq!(value.scale_factor(), 1_000_000);
        assert_eq!(value.adjustment_bps(), 20);
        assert_eq!(value.quote().price, dec!(3000));
    }

    #[test]
    fn truncates_instead_of_rounding() {
        // 1.0000019 * 1e6 = 1000001.9
        let value = transform(&quote(dec!(1.0000019)), 0, 1_000_000).unwrap();
        assert_eq!(value.value(), 1_000_001);

        let value = transform(&quote(dec!(2999.999)), 0, 1).unwrap();
        assert_eq!(value.value(), 2999);
    }

    #[test]
    fn matches_floor_formula_on_known_cases() {
        // (price, bps, scale, floor(price * (1 + bps/10000) * scale))
        let cases: [(Decimal, u32, u64, u128); 6] = [
            (dec!(1), 0, 1, 1),
            (dec!(1), 10_000, 1, 2),
            (dec!(1234.5678), 20, 1_000_000, 1_237_036_935),
            (dec!(0.5), 50, 100, 50),
            (dec!(0.123456), 1, 1_000_000_000_000_000_000, 123_468_345_600_000_000),
            (dec!(64123.45), 15, 100, 6_421_963),
        ];

        for (price, bps, scale, expected) in cases {
            let value = transform(&quote(price), bps, scale).unwrap();
            assert_eq!(value.value(), expected, "price={price} bps={bps} scale={scale}");
        }
    }

    #[test]
    fn is_deterministic() {
        let q = quote(dec!(1850.37));
        let a = transform(&q, 20, 1_000_000).unwrap();
        let b = transform(&q, 20, 1_000_000).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn rejects_non_positive_prices() {
        assert_eq!(
            transform(&quote(Decimal::ZERO), 20, 1_000_000),
            Err(InvalidQuoteError::NonPositive(Decimal::ZERO))
        );
        assert_eq!(
            transform(&quote(dec!(-3000)), 20, 1_000_000),
            Err(InvalidQuoteError::NonPositive(dec!(-3000)))
        );
    }

    #[test]
    fn reports_overflow_instead_of_panicking() {
        assert!(matches!(
            transform(&quote(Decimal::MAX), 20, 1_000_000),
            Err(InvalidQuoteError::Overflow(_))
        ));
        assert!(matches!(
            transform(&quote(dec!(100000000000000000000)), 20, u64::MAX),
            Err(InvalidQuoteError::Overflow(_))
        ));
    }
}
