//! Cost roll-up arithmetic shared by the consumption engine and the cost resolver

use rust_decimal::Decimal;

use crate::models::{IngredientConsumptionRecord, OperationTag};

/// Decimal places kept on stored unit prices
pub const PRICE_SCALE: u32 = 6;

/// Round a derived unit price to the stored scale
pub fn round_price(price: Decimal) -> Decimal {
    price.round_dp(PRICE_SCALE)
}

/// Cost of a movement against a batch: `|quantity| × unit_price`
pub fn consumption_cost(quantity: Decimal, unit_price: Decimal) -> Result<Decimal, &'static str> {
    quantity
        .abs()
        .checked_mul(unit_price)
        .ok_or("Cost exceeds the representable range")
}

/// Ingredient quantity a recipe line needs for `expected_output` units,
/// rounded to the stored scale
pub fn line_requirement(
    quantity_per_unit: Decimal,
    expected_output: Decimal,
) -> Result<Decimal, &'static str> {
    quantity_per_unit
        .checked_mul(expected_output)
        .map(|required| required.round_dp(PRICE_SCALE))
        .ok_or("Required quantity exceeds the representable range")
}

/// Yield ratio of a run: actual / expected (0 when nothing was expected)
pub fn yield_ratio(actual_output: Decimal, expected_output: Decimal) -> Decimal {
    if expected_output.is_zero() {
        return Decimal::ZERO;
    }
    actual_output / expected_output
}

/// Weighted average price over `(quantity, cost)` pairs.
/// Quantities are taken by magnitude. `None` when the total quantity is zero.
pub fn weighted_average_price<I>(parts: I) -> Option<Decimal>
where
    I: IntoIterator<Item = (Decimal, Decimal)>,
{
    let (quantity, cost) = parts
        .into_iter()
        .fold((Decimal::ZERO, Decimal::ZERO), |(q, c), (pq, pc)| {
            (q + pq.abs(), c + pc)
        });
    if quantity.is_zero() {
        None
    } else {
        Some(cost / quantity)
    }
}

/// Signed contribution of an ingredient record to the cost of its production run.
///
/// Withdrawals add their cost; returns made when the run is voided subtract it.
/// Receipt-side tags never reference a run and contribute nothing.
pub fn production_cost_contribution(record: &IngredientConsumptionRecord, cost: Decimal) -> Decimal {
    match record.operation {
        OperationTag::ProductionConsumption => cost,
        OperationTag::VoidReversal => -cost,
        _ => Decimal::ZERO,
    }
}

/// Share of a run's cost borne by `consumed` units out of `actual_output`
pub fn output_share(production_cost: Decimal, consumed: Decimal, actual_output: Decimal) -> Decimal {
    if actual_output <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    // consumed never exceeds actual_output, so the share is at most 1
    production_cost * (consumed.abs() / actual_output)
}

/// Cost per unit of finished output, if any output exists
pub fn unit_cost(total_cost: Decimal, output: Decimal) -> Option<Decimal> {
    if output <= Decimal::ZERO {
        None
    } else {
        Some(total_cost / output)
    }
}
