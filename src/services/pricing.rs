use rust_decimal::{Decimal, RoundingStrategy};

/// Whole-line amounts derived from the catalog snapshot at mutation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineAmounts {
    pub line_price: Decimal,
    pub line_price_after_discount: Decimal,
}

/// Cart-level totals produced by [`compute_totals`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CartTotals {
    pub total_price: Decimal,
    pub total_price_after_discount: Decimal,
}

/// Round to cents, half away from zero.
pub fn round2(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Derive both line amounts from the catalog price, catalog discount percent
/// and the line's new quantity. Every cart mutation goes through this full
/// derivation; line fields are never built by adding to a previously rounded
/// amount, so incremental updates and a from-scratch recompute always agree.
pub fn derive_line(unit_price: Decimal, discount_percent: Decimal, quantity: i32) -> LineAmounts {
    let qty = Decimal::from(quantity);
    let discount_rate = discount_percent / Decimal::from(100);

    LineAmounts {
        line_price: round2(unit_price * qty),
        line_price_after_discount: round2(unit_price * (Decimal::ONE - discount_rate) * qty),
    }
}

/// Cart totals from already-derived line amounts. The undiscounted total is
/// the plain sum of line prices; the discounted total additionally scales by
/// the coupon percentage when one is applied. Rounding happens once at the
/// end of each composition, not per intermediate term.
pub fn compute_totals(
    lines: &[LineAmounts],
    coupon_discount_percent: Option<Decimal>,
) -> CartTotals {
    let total_price: Decimal = lines.iter().map(|l| l.line_price).sum();
    let discounted_sum: Decimal = lines.iter().map(|l| l.line_price_after_discount).sum();

    let total_price_after_discount = match coupon_discount_percent {
        Some(pct) => discounted_sum * (Decimal::ONE - pct / Decimal::from(100)),
        None => discounted_sum,
    };

    CartTotals {
        total_price: round2(total_price),
        total_price_after_discount: round2(total_price_after_discount),
    }
}

/// Discounted unit price in minor currency units, as the payment gateway
/// expects it. Matches the storefront's per-unit computation: apply the
/// catalog discount, scale to cents, round half away from zero.
pub fn discounted_unit_minor(unit_price: Decimal, discount_percent: Decimal) -> i64 {
    use rust_decimal::prelude::ToPrimitive;

    let discount_rate = discount_percent / Decimal::from(100);
    let minor = unit_price * (Decimal::ONE - discount_rate) * Decimal::from(100);

    minor
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
        .unwrap_or(0)
        .max(0)
}
