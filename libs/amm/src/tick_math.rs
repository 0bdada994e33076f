//! Exact Q64.96 sqrt-price math over the valid tick interval.

use ethers::types::U256;
use jitflow_types::pool::{MAX_TICK, MIN_TICK};

use crate::AmmError;

/// sqrt-price at MIN_TICK, Q64.96.
pub fn min_sqrt_ratio() -> U256 {
    U256::from(4_295_128_739u64)
}

/// sqrt-price at MAX_TICK, Q64.96.
pub fn max_sqrt_ratio() -> U256 {
    U256::from_dec_str("1461446703485210103287273052203988822378723970342")
        .expect("constant parses")
}

/// Multiplier ladder for `sqrt(1.0001)^(-2^i)` in Q128.128, one entry per
/// bit of the tick magnitude.
const RATIO_LADDER: [&str; 19] = [
    "fff97272373d413259a46990580e213a",
    "fff2e50f5f656932ef12357cf3c7fdcc",
    "ffe5caca7e10e4e61c3624eaa0941cd0",
    "ffcb9843d60f6159c9db58835c926644",
    "ff973b41fa98c081472e6896dfb254c0",
    "ff2ea16466c96a3843ec78b326b52861",
    "fe5dee046a99a2a811c461f1969c3053",
    "fcbe86c7900a88aedcffc83b479aa3a4",
    "f987a7253ac413176f2b074cf7815e54",
    "f3392b0822b70005940c7a398e4b70f3",
    "e7159475a2c29b7443b29c7fa6e889d9",
    "d097f3bdfd2022b8845ad8f792aa5825",
    "a9f746462d870fdf8a65dc1f90e061e5",
    "70d869a156d2a1b890bb3df62baf32f7",
    "31be135f97d08fd981231505542fcfa6",
    "9aa508b5b7a84e1c677de54f3e99bc9",
    "5d6af8dedb81196699c329225ee604",
    "2216e584f5fa1ea926041bedfe98",
    "48a170391f7dc42444e8fa2",
];

/// sqrt(1.0001^tick) * 2^96, exact to the reference fixed-point algorithm.
pub fn sqrt_ratio_at_tick(tick: i32) -> Result<U256, AmmError> {
    if !(MIN_TICK..=MAX_TICK).contains(&tick) {
        return Err(AmmError::TickOutOfRange(tick));
    }

    let abs_tick = tick.unsigned_abs();

    let mut ratio = if abs_tick & 1 != 0 {
        U256::from_str_radix("fffcb933bd6fad37aa2d162d1a594001", 16).expect("constant parses")
    } else {
        U256::one() << 128
    };

    for (bit, entry) in RATIO_LADDER.iter().enumerate() {
        if abs_tick & (1 << (bit + 1)) != 0 {
            let multiplier = U256::from_str_radix(entry, 16).expect("constant parses");
            // Both operands stay below 2^128, so the product fits 256 bits.
            ratio = (ratio * multiplier) >> 128;
        }
    }

    if tick > 0 {
        ratio = U256::MAX / ratio;
    }

    // Q128.128 -> Q64.96, rounding up so the price round-trips the
    // reference tick<->ratio conversion.
    let remainder_mask = (U256::one() << 32) - U256::one();
    let rounded = (ratio >> 32)
        + if (ratio & remainder_mask).is_zero() {
            U256::zero()
        } else {
            U256::one()
        };

    Ok(rounded)
}

/// Largest multiple of `spacing` at or below `tick`.
pub fn floor_align(tick: i32, spacing: i32) -> i32 {
    debug_assert!(spacing > 0);
    tick.div_euclid(spacing) * spacing
}

/// Smallest multiple of `spacing` at or above `tick`.
pub fn ceil_align(tick: i32, spacing: i32) -> i32 {
    debug_assert!(spacing > 0);
    let floored = tick.div_euclid(spacing) * spacing;
    if floored == tick {
        tick
    } else {
        floored + spacing
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boundary_ticks_match_reference_constants() {
        assert_eq!(sqrt_ratio_at_tick(MIN_TICK).unwrap(), min_sqrt_ratio());
        assert_eq!(sqrt_ratio_at_tick(MAX_TICK).unwrap(), max_sqrt_ratio());
    }

    #[test]
    fn tick_zero_is_unit_price() {
        assert_eq!(sqrt_ratio_at_tick(0).unwrap(), U256::one() << 96);
    }

    #[test]
    fn ratio_is_monotonic_over_sampled_ticks() {
        let mut prev = sqrt_ratio_at_tick(-500_000).unwrap();
        for tick in (-499_000..=500_000).step_by(9973) {
            let ratio = sqrt_ratio_at_tick(tick).unwrap();
            assert!(ratio > prev, "ratio not increasing at tick {tick}");
            prev = ratio;
        }
    }

    #[test]
    fn out_of_range_tick_is_rejected() {
        assert!(sqrt_ratio_at_tick(MAX_TICK + 1).is_err());
        assert!(sqrt_ratio_at_tick(MIN_TICK - 1).is_err());
    }

    #[test]
    fn alignment_rounds_toward_the_correct_side() {
        assert_eq!(floor_align(95, 10), 90);
        assert_eq!(ceil_align(95, 10), 100);
        assert_eq!(floor_align(-95, 10), -100);
        assert_eq!(ceil_align(-95, 10), -90);
        assert_eq!(floor_align(60, 60), 60);
        assert_eq!(ceil_align(60, 60), 60);
    }
}
