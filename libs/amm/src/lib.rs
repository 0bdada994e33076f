//! # JitFlow AMM Math
//!
//! Concentrated-liquidity math for JIT position sizing: exact Q64.96 tick
//! math, liquidity↔amount conversions, and the fast USD profitability
//! estimate used ahead of fork-replay validation.
//!
//! Every intermediate that can exceed 128 bits runs through `U256`/`U512`;
//! the conversion to USD (`rust_decimal`, 8 dp quotes) is the first step
//! that leaves big-integer arithmetic.

pub mod liquidity;
pub mod profit;
pub mod tick_math;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AmmError {
    #[error("tick {0} outside [{min}, {max}]", min = jitflow_types::pool::MIN_TICK, max = jitflow_types::pool::MAX_TICK)]
    TickOutOfRange(i32),

    #[error("invalid tick range [{0}, {1}]")]
    InvalidRange(i32, i32),

    #[error("arithmetic overflow in {0}")]
    Overflow(&'static str),

    #[error("division by zero in {0}")]
    DivisionByZero(&'static str),
}

pub use liquidity::{amounts_for_liquidity, liquidity_for_amounts, mul_div};
pub use profit::{fast_profit, lp_share, optimal_range, ProfitEstimate, DEFAULT_RANGE_WIDTH_SPACINGS};
pub use tick_math::{ceil_align, floor_align, sqrt_ratio_at_tick};
