//! Fixed per-phase gas estimates for a JIT round trip.

use ethers::types::U256;
use rust_decimal::Decimal;

/// Gas spent in each phase of `[flash-acquire, mint] … [burn, collect,
/// repay]`, plus calldata/dispatch overhead.
///
/// `total` must equal the sum of the components; the invariant is covered
/// by a test because the table is hand-maintained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JitGasEstimates {
    pub flash_acquisition: u64,
    pub mint: u64,
    pub burn: u64,
    pub collect: u64,
    pub repay: u64,
    pub overhead: u64,
    pub total: u64,
}

impl JitGasEstimates {
    pub fn components_total(&self) -> u64 {
        self.flash_acquisition + self.mint + self.burn + self.collect + self.repay + self.overhead
    }
}

pub const JIT_GAS: JitGasEstimates = JitGasEstimates {
    flash_acquisition: 90_000,
    mint: 350_000,
    burn: 180_000,
    collect: 70_000,
    repay: 60_000,
    overhead: 50_000,
    total: 800_000,
};

/// USD cost of `gas_units` at `gas_price_wei`, given the native asset's USD
/// price.
pub fn gas_cost_usd(gas_units: u64, gas_price_wei: U256, native_price_usd: Decimal) -> Decimal {
    // Largest mantissa a Decimal can carry (2^96 - 1); any sane fee is far
    // below this.
    const MAX_MANTISSA: u128 = 79_228_162_514_264_337_593_543_950_335;
    let wei = gas_price_wei.saturating_mul(U256::from(gas_units));
    let wei = if wei > U256::from(MAX_MANTISSA) {
        MAX_MANTISSA
    } else {
        wei.as_u128()
    };
    let native = Decimal::from_i128_with_scale(wei as i128, 18);
    (native * native_price_usd).round_dp(8)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn gas_table_total_is_the_component_sum() {
        assert_eq!(JIT_GAS.total, JIT_GAS.components_total());
    }

    #[test]
    fn gas_cost_usd_scales_wei_to_native() {
        // 800k gas at 50 gwei = 0.04 native; at $2500 that's $100.
        let cost = gas_cost_usd(800_000, U256::from(50_000_000_000u64), dec!(2500));
        assert_eq!(cost, dec!(100));
    }

    #[test]
    fn zero_gas_price_costs_nothing() {
        assert_eq!(gas_cost_usd(800_000, U256::zero(), dec!(2500)), Decimal::ZERO);
    }
}
