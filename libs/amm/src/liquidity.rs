//! Liquidity ↔ token-amount conversions for a tick range.

use ethers::types::{U256, U512};

use crate::tick_math::sqrt_ratio_at_tick;
use crate::AmmError;

fn q96() -> U256 {
    U256::one() << 96
}

/// Full-precision `a * b / denominator`, truncating.
pub fn mul_div(a: U256, b: U256, denominator: U256) -> Result<U256, AmmError> {
    if denominator.is_zero() {
        return Err(AmmError::DivisionByZero("mul_div"));
    }
    let product: U512 = a.full_mul(b);
    let quotient = product / U512::from(denominator);
    U256::try_from(quotient).map_err(|_| AmmError::Overflow("mul_div"))
}

fn sorted_ratios(tick_lower: i32, tick_upper: i32) -> Result<(U256, U256), AmmError> {
    if tick_lower >= tick_upper {
        return Err(AmmError::InvalidRange(tick_lower, tick_upper));
    }
    let lower = sqrt_ratio_at_tick(tick_lower)?;
    let upper = sqrt_ratio_at_tick(tick_upper)?;
    Ok((lower, upper))
}

/// Liquidity purchasable with `amount0` of token0 across `[lower, upper]`.
fn liquidity_for_amount0(
    sqrt_lower: U256,
    sqrt_upper: U256,
    amount0: U256,
) -> Result<U256, AmmError> {
    let intermediate = mul_div(sqrt_lower, sqrt_upper, q96())?;
    mul_div(amount0, intermediate, sqrt_upper - sqrt_lower)
}

/// Liquidity purchasable with `amount1` of token1 across `[lower, upper]`.
fn liquidity_for_amount1(
    sqrt_lower: U256,
    sqrt_upper: U256,
    amount1: U256,
) -> Result<U256, AmmError> {
    mul_div(amount1, q96(), sqrt_upper - sqrt_lower)
}

/// Maximum liquidity mintable from `(amount0, amount1)` at the current
/// price, the standard concentrated-liquidity formula.
pub fn liquidity_for_amounts(
    amount0: U256,
    amount1: U256,
    tick_lower: i32,
    tick_upper: i32,
    current_tick: i32,
) -> Result<u128, AmmError> {
    let (sqrt_lower, sqrt_upper) = sorted_ratios(tick_lower, tick_upper)?;
    let sqrt_current = sqrt_ratio_at_tick(current_tick)?;

    let liquidity = if sqrt_current <= sqrt_lower {
        liquidity_for_amount0(sqrt_lower, sqrt_upper, amount0)?
    } else if sqrt_current < sqrt_upper {
        let from0 = liquidity_for_amount0(sqrt_current, sqrt_upper, amount0)?;
        let from1 = liquidity_for_amount1(sqrt_lower, sqrt_current, amount1)?;
        from0.min(from1)
    } else {
        liquidity_for_amount1(sqrt_lower, sqrt_upper, amount1)?
    };

    if liquidity > U256::from(u128::MAX) {
        return Err(AmmError::Overflow("liquidity_for_amounts"));
    }
    Ok(liquidity.as_u128())
}

fn amount0_for_liquidity(
    sqrt_lower: U256,
    sqrt_upper: U256,
    liquidity: u128,
) -> Result<U256, AmmError> {
    let shifted = U256::from(liquidity) << 96;
    let numerator = mul_div(shifted, sqrt_upper - sqrt_lower, sqrt_upper)?;
    Ok(numerator / sqrt_lower)
}

fn amount1_for_liquidity(
    sqrt_lower: U256,
    sqrt_upper: U256,
    liquidity: u128,
) -> Result<U256, AmmError> {
    mul_div(U256::from(liquidity), sqrt_upper - sqrt_lower, q96())
}

/// Token amounts represented by `liquidity` across `[lower, upper]` at the
/// current price.
pub fn amounts_for_liquidity(
    liquidity: u128,
    tick_lower: i32,
    tick_upper: i32,
    current_tick: i32,
) -> Result<(U256, U256), AmmError> {
    let (sqrt_lower, sqrt_upper) = sorted_ratios(tick_lower, tick_upper)?;
    let sqrt_current = sqrt_ratio_at_tick(current_tick)?;

    if sqrt_current <= sqrt_lower {
        Ok((
            amount0_for_liquidity(sqrt_lower, sqrt_upper, liquidity)?,
            U256::zero(),
        ))
    } else if sqrt_current < sqrt_upper {
        Ok((
            amount0_for_liquidity(sqrt_current, sqrt_upper, liquidity)?,
            amount1_for_liquidity(sqrt_lower, sqrt_current, liquidity)?,
        ))
    } else {
        Ok((
            U256::zero(),
            amount1_for_liquidity(sqrt_lower, sqrt_upper, liquidity)?,
        ))
    }
}
