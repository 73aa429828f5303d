//! Validation utilities for ledger inputs

use rust_decimal::Decimal;

use crate::models::RecipeLine;

/// Longest accepted unit-of-measure code
pub const MAX_UNIT_CODE_LEN: usize = 16;

/// Most decimal places a stored quantity or price may carry
pub const MAX_SCALE: u32 = 6;

/// Exclusive upper bound on a stored quantity or price (NUMERIC(18, 6))
pub const MAX_AMOUNT: i64 = 1_000_000_000_000;

// ============================================================================
// Quantity Validations
// ============================================================================

/// Validate that an amount fits the stored range and scale, whatever its sign
pub fn validate_amount(amount: Decimal) -> Result<(), &'static str> {
    if amount.abs() >= Decimal::from(MAX_AMOUNT) {
        return Err("Amount must be below 1,000,000,000,000");
    }
    if amount.normalize().scale() > MAX_SCALE {
        return Err("Amount cannot have more than 6 decimal places");
    }
    Ok(())
}

/// Validate a quantity that must be strictly positive
pub fn validate_positive_quantity(quantity: Decimal) -> Result<(), &'static str> {
    if quantity <= Decimal::ZERO {
        return Err("Quantity must be positive");
    }
    validate_amount(quantity)
}

/// Validate a quantity that may be zero but not negative
pub fn validate_non_negative_quantity(quantity: Decimal) -> Result<(), &'static str> {
    if quantity < Decimal::ZERO {
        return Err("Quantity cannot be negative");
    }
    validate_amount(quantity)
}

/// Validate a batch unit price
pub fn validate_unit_price(price: Decimal) -> Result<(), &'static str> {
    if price < Decimal::ZERO {
        return Err("Unit price cannot be negative");
    }
    validate_amount(price)
}

/// Validate a reversal delta against a batch.
/// The resulting balance must stay within `0..=received`.
pub fn validate_reversal(
    balance: Decimal,
    received: Decimal,
    delta: Decimal,
) -> Result<Decimal, &'static str> {
    if delta.is_zero() {
        return Err("Reversal quantity cannot be zero");
    }
    validate_amount(delta)?;
    let result = balance - delta;
    if result < Decimal::ZERO {
        return Err("Reversal would drive the batch balance below zero");
    }
    if result > received {
        return Err("Reversal would raise the batch balance above the received quantity");
    }
    Ok(result)
}

// ============================================================================
// Reference Data Validations
// ============================================================================

/// Validate a unit-of-measure code (e.g. "kg", "L", "pcs")
pub fn validate_unit_code(unit: &str) -> Result<(), &'static str> {
    if unit.is_empty() {
        return Err("Unit code is required");
    }
    if unit.len() > MAX_UNIT_CODE_LEN {
        return Err("Unit code must be at most 16 characters");
    }
    if unit.chars().any(char::is_whitespace) {
        return Err("Unit code cannot contain whitespace");
    }
    Ok(())
}

/// Validate a bill of materials before it drives a production run
pub fn validate_recipe_lines(lines: &[RecipeLine]) -> Result<(), &'static str> {
    if lines.is_empty() {
        return Err("Recipe has no ingredient lines");
    }
    for line in lines {
        validate_positive_quantity(line.quantity_per_unit)
            .map_err(|_| "Recipe line quantity must be positive and within the stored range")?;
        validate_unit_code(&line.unit)?;
    }
    Ok(())
}

/// Validate a depletion page size
pub fn validate_page_size(page_size: u32) -> Result<(), &'static str> {
    if page_size == 0 {
        return Err("Page size must be at least 1");
    }
    if page_size > 1000 {
        return Err("Page size must be at most 1000");
    }
    Ok(())
}
