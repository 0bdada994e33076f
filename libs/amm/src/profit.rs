//! Fast JIT profitability math.
//!
//! This is the pre-simulation decision path: it must produce an answer well
//! under a block time from cached state alone. Fee revenue is computed in
//! `U256`; the USD conversion at the end is the first step allowed to leave
//! integer math. Fork replay remains the authoritative check before
//! bundling.

use ethers::types::U256;
use jitflow_types::pool::{MAX_TICK, MIN_TICK};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use crate::tick_math::{ceil_align, floor_align};
use crate::AmmError;

/// Default position half-width, in tick spacings.
pub const DEFAULT_RANGE_WIDTH_SPACINGS: i32 = 10;

/// Scale used for the intermediate LP-share fixed point.
const SHARE_SCALE: u128 = 1_000_000_000_000_000_000;

/// Symmetric tick range of `width` spacings around the current tick,
/// aligned outward to the spacing grid and clamped to the valid interval.
pub fn optimal_range(
    current_tick: i32,
    tick_spacing: i32,
    width_in_spacings: i32,
) -> Result<(i32, i32), AmmError> {
    if tick_spacing <= 0 || width_in_spacings <= 0 {
        return Err(AmmError::InvalidRange(tick_spacing, width_in_spacings));
    }

    let half_width = width_in_spacings * tick_spacing;
    let mut lower = floor_align(current_tick.saturating_sub(half_width), tick_spacing);
    let mut upper = ceil_align(current_tick.saturating_add(half_width), tick_spacing);

    let min_aligned = ceil_align(MIN_TICK, tick_spacing);
    let max_aligned = floor_align(MAX_TICK, tick_spacing);
    lower = lower.max(min_aligned);
    upper = upper.min(max_aligned);

    if lower >= upper {
        return Err(AmmError::InvalidRange(lower, upper));
    }
    Ok((lower, upper))
}

/// Share of in-range fees our position earns once minted: `our / (total + our)`.
pub fn lp_share(our_liquidity: u128, total_in_range: u128) -> Decimal {
    if our_liquidity == 0 {
        return Decimal::ZERO;
    }
    let ours = U256::from(our_liquidity);
    let combined = ours + U256::from(total_in_range);
    let scaled = ours * U256::from(SHARE_SCALE) / combined;
    // scaled <= 1e18, always representable.
    Decimal::new(scaled.as_u64() as i64, 18)
}

/// Result of the fast profitability estimate.
#[derive(Debug, Clone)]
pub struct ProfitEstimate {
    pub net_profit_usd: Decimal,
    pub gross_fees_usd: Decimal,
    pub gas_cost_usd: Decimal,
    pub profitable: bool,
    /// Set when not profitable: which leg sank the estimate.
    pub reason: Option<&'static str>,
}

/// Convert a raw token amount to USD given the token's decimals and unit
/// price. Saturates instead of overflowing on absurd inputs; the evaluator
/// treats a saturated value like any other (it will fail fork validation).
fn raw_to_usd(raw: U256, decimals: u8, unit_price_usd: Decimal) -> Decimal {
    // Largest mantissa a Decimal can carry (2^96 - 1).
    const MAX_MANTISSA: u128 = 79_228_162_514_264_337_593_543_950_335;
    let raw = if raw > U256::from(MAX_MANTISSA) {
        MAX_MANTISSA
    } else {
        raw.as_u128()
    };
    let scale = decimals.min(28) as u32;
    let tokens = Decimal::from_i128_with_scale(raw as i128, scale);
    tokens * unit_price_usd
}

/// Fast fee-revenue estimate for a JIT position against a single victim
/// swap.
///
/// Revenue model: the victim pays `amount_in · fee_ppm / 1e6` in fees on the
/// input token; our position earns `lp_share` of that. Net profit subtracts
/// gas and the configured risk buffer. The caller compares `net_profit_usd`
/// against `max(global_floor, pool_floor)`.
#[allow(clippy::too_many_arguments)]
pub fn fast_profit(
    swap_amount_in: U256,
    fee_ppm: u32,
    lp_share: Decimal,
    token_in_decimals: u8,
    token_in_price_usd: Decimal,
    gas_cost_usd: Decimal,
    risk_buffer_usd: Decimal,
    profit_floor_usd: Decimal,
) -> ProfitEstimate {
    let fee_raw = swap_amount_in * U256::from(fee_ppm) / U256::from(1_000_000u64);

    // lp_share re-enters integer math at the same 1e18 scale it was
    // produced at, keeping the fee split exact.
    let share_scaled = (lp_share * Decimal::from(SHARE_SCALE as u64))
        .trunc()
        .to_u128()
        .unwrap_or(0)
        .min(SHARE_SCALE);
    let our_fee_raw = fee_raw * U256::from(share_scaled) / U256::from(SHARE_SCALE);

    let gross_fees_usd = raw_to_usd(our_fee_raw, token_in_decimals, token_in_price_usd)
        .round_dp(8);
    let net_profit_usd = (gross_fees_usd - gas_cost_usd - risk_buffer_usd).round_dp(8);

    let (profitable, reason) = if net_profit_usd >= profit_floor_usd {
        (true, None)
    } else if gross_fees_usd <= gas_cost_usd {
        (false, Some("gas_exceeds_fees"))
    } else {
        (false, Some("below_floor"))
    };

    ProfitEstimate {
        net_profit_usd,
        gross_fees_usd,
        gas_cost_usd,
        profitable,
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    #[test]
    fn optimal_range_defaults_to_ten_spacings_each_side() {
        let (lower, upper) = optimal_range(204_150, 10, DEFAULT_RANGE_WIDTH_SPACINGS).unwrap();
        assert_eq!(lower, 204_050);
        assert_eq!(upper, 204_250);
    }

    #[test]
    fn optimal_range_aligns_unaligned_current_tick() {
        let (lower, upper) = optimal_range(204_157, 60, 2).unwrap();
        assert_eq!(lower % 60, 0);
        assert_eq!(upper % 60, 0);
        assert!(lower < 204_157 && 204_157 < upper);
    }

    #[test]
    fn optimal_range_clamps_at_tick_bounds() {
        let (lower, upper) = optimal_range(MAX_TICK - 5, 60, 10).unwrap();
        assert!(upper <= MAX_TICK);
        assert_eq!(upper % 60, 0);
        assert!(lower < upper);
    }

    #[test]
    fn lp_share_is_fraction_of_combined_liquidity() {
        assert_eq!(lp_share(0, 1_000), Decimal::ZERO);
        assert_eq!(lp_share(1_000, 0), dec!(1));
        let half = lp_share(5_000, 5_000);
        assert!(half > dec!(0.499) && half < dec!(0.501));
    }

    #[test]
    fn fast_profit_nets_out_gas_and_buffer() {
        // 1000 USDC swap at 0.05%, owning 50% of range: fees = $0.25.
        let estimate = fast_profit(
            U256::from(1_000_000_000u64),
            500,
            dec!(0.5),
            6,
            dec!(1),
            dec!(0.05),
            dec!(0.01),
            dec!(0.10),
        );
        assert_eq!(estimate.gross_fees_usd, dec!(0.25));
        assert_eq!(estimate.net_profit_usd, dec!(0.19));
        assert!(estimate.profitable);
    }

    #[test]
    fn fast_profit_flags_gas_dominated_candidates() {
        let estimate = fast_profit(
            U256::from(1_000_000u64),
            500,
            dec!(0.5),
            6,
            dec!(1),
            dec!(5),
            dec!(0),
            dec!(1),
        );
        assert!(!estimate.profitable);
        assert_eq!(estimate.reason, Some("gas_exceeds_fees"));
    }

    proptest! {
        #[test]
        fn optimal_range_endpoints_always_aligned_and_ordered(
            current in MIN_TICK..MAX_TICK,
            spacing in prop::sample::select(vec![1i32, 10, 60, 200]),
            width in 1i32..64,
        ) {
            let (lower, upper) = optimal_range(current, spacing, width).unwrap();
            prop_assert_eq!(lower.rem_euclid(spacing), 0);
            prop_assert_eq!(upper.rem_euclid(spacing), 0);
            prop_assert!(lower < upper);
            prop_assert!(lower >= MIN_TICK && upper <= MAX_TICK);
        }

        #[test]
        fn lp_share_stays_in_unit_interval(
            ours in 0u128..u64::MAX as u128,
            total in 0u128..u64::MAX as u128,
        ) {
            let share = lp_share(ours, total);
            prop_assert!(share >= Decimal::ZERO);
            prop_assert!(share <= Decimal::ONE);
        }
    }
}
