// src/utils/precision.rs
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};

/// Digits assumed when a filter gives no usable step.
pub const DEFAULT_TICK_DIGITS: u32 = 8;

/// Number of significant decimal places allowed by `step_size` for an asset
/// with nominal precision `precision`.
///
/// `floor(step * 10^precision)` keeps the step as an integer; every trailing
/// zero of that integer is one digit fewer than the nominal precision.
/// Example: step=0.001, precision=8 -> 100000 -> 8 - 5 = 3.
pub fn tick_digits(step_size: Decimal, precision: u32) -> u32 {
    let precision = precision.min(18);
    let scaled = (step_size * Decimal::from(10u64.pow(precision))).floor();
    let tsize = match scaled.to_u128() {
        Some(v) if v > 0 => v,
        _ => return DEFAULT_TICK_DIGITS,
    };
    let digits = tsize.to_string();
    let significant = digits.trim_end_matches('0');
    let trailing = (digits.len() - significant.len()) as u32;
    precision.saturating_sub(trailing)
}

/// Rounds a price to `digits` places and pins the scale, so `Display`
/// renders exactly that many fixed-point digits.
pub fn price_amount(price: Decimal, digits: u32) -> Decimal {
    let mut v = price.round_dp_with_strategy(digits, RoundingStrategy::MidpointNearestEven);
    v.rescale(digits);
    v
}

/// Truncates a quantity to `digits` places. Quantities never round up,
/// otherwise we could try to sell more than we hold.
pub fn qty_amount(qty: Decimal, digits: u32) -> Decimal {
    let mut v = qty.round_dp_with_strategy(digits, RoundingStrategy::ToZero);
    v.rescale(digits);
    v
}

/// Rounds a quantity DOWN to the nearest multiple of step_size.
/// Example: amount=10.999, step=1.0 -> 10.0
pub fn normalize_quantity(amount: Decimal, step_size: Decimal) -> Decimal {
    if step_size.is_zero() {
        return amount;
    }
    (amount / step_size).floor() * step_size
}

/// Rounds a price to the NEAREST multiple of tick_size.
/// Example: price=100.16, tick=0.1 -> 100.2
pub fn normalize_price(price: Decimal, tick_size: Decimal) -> Decimal {
    if tick_size.is_zero() {
        return price;
    }
    (price / tick_size).round() * tick_size
}

/// Percentage change of `price` relative to `reference`.
pub fn percent_change(price: Decimal, reference: Decimal) -> Decimal {
    if reference.is_zero() {
        return Decimal::ZERO;
    }
    (price / reference - Decimal::ONE) * Decimal::ONE_HUNDRED
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn tick_digits_strips_trailing_zeros_of_scaled_step() {
        assert_eq!(tick_digits(dec!(0.00100000), 8), 3);
        assert_eq!(tick_digits(dec!(0.00000001), 8), 8);
        assert_eq!(tick_digits(dec!(1.00000000), 8), 0);
        assert_eq!(tick_digits(dec!(0.01), 2), 2);
        assert_eq!(tick_digits(dec!(0.05), 8), 2);
    }

    #[test]
    fn tick_digits_is_deterministic() {
        let first = tick_digits(dec!(0.00010000), 8);
        assert_eq!(first, tick_digits(dec!(0.00010000), 8));
        assert_eq!(first, tick_digits(dec!(0.0001), 8));
    }

    #[test]
    fn zero_step_keeps_the_default() {
        assert_eq!(tick_digits(dec!(0), 8), DEFAULT_TICK_DIGITS);
        // Smaller than the nominal precision can express.
        assert_eq!(tick_digits(dec!(0.000000001), 8), DEFAULT_TICK_DIGITS);
    }

    #[test]
    fn amounts_render_with_exact_digits() {
        assert_eq!(price_amount(dec!(1.5), 5).to_string(), "1.50000");
        assert_eq!(price_amount(dec!(0.123456789), 6).to_string(), "0.123457");
        assert_eq!(qty_amount(dec!(2.99999), 2).to_string(), "2.99");
        assert_eq!(qty_amount(dec!(7), 0).to_string(), "7");
        assert_eq!(qty_amount(dec!(0.00000001), 8).to_string(), "0.00000001");
    }

    #[test]
    fn normalizes_to_step_multiples() {
        assert_eq!(normalize_quantity(dec!(10.999), dec!(1.0)), dec!(10));
        assert_eq!(normalize_price(dec!(100.16), dec!(0.1)), dec!(100.2));
        assert_eq!(normalize_price(dec!(5), dec!(0)), dec!(5));
    }

    #[test]
    fn percent_change_against_reference() {
        assert_eq!(percent_change(dec!(55), dec!(50)), dec!(10));
        assert_eq!(percent_change(dec!(40), dec!(50)), dec!(-20));
        assert_eq!(percent_change(dec!(40), dec!(0)), dec!(0));
    }
}
