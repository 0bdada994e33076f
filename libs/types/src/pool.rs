//! Pool descriptors and state snapshots.

use std::time::{Duration, Instant};

use ethers::types::{Address, U256};
use serde::{Deserialize, Serialize};

use crate::error::JitError;

/// Valid tick interval for a concentrated-liquidity pool.
pub const MIN_TICK: i32 = -887_272;
pub const MAX_TICK: i32 = 887_272;

/// Swap fee tier, carried as the on-chain fee value in hundredths of a bip
/// (500 = 0.05%, 3000 = 0.3%, 10000 = 1%).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum FeeTier {
    /// 0.01%
    Lowest,
    /// 0.05%
    Low,
    /// 0.3%
    Medium,
    /// 1%
    High,
}

impl FeeTier {
    pub fn from_raw(fee: u32) -> Result<Self, JitError> {
        match fee {
            100 => Ok(FeeTier::Lowest),
            500 => Ok(FeeTier::Low),
            3_000 => Ok(FeeTier::Medium),
            10_000 => Ok(FeeTier::High),
            other => Err(JitError::Config(format!("unknown fee tier: {other}"))),
        }
    }

    /// On-chain fee value in hundredths of a bip.
    pub fn as_raw(&self) -> u32 {
        match self {
            FeeTier::Lowest => 100,
            FeeTier::Low => 500,
            FeeTier::Medium => 3_000,
            FeeTier::High => 10_000,
        }
    }

    /// Tick spacing is fixed per fee tier by the pool factory.
    pub fn tick_spacing(&self) -> i32 {
        match self {
            FeeTier::Lowest => 1,
            FeeTier::Low => 10,
            FeeTier::Medium => 60,
            FeeTier::High => 200,
        }
    }
}

impl TryFrom<u32> for FeeTier {
    type Error = JitError;

    fn try_from(fee: u32) -> Result<Self, JitError> {
        FeeTier::from_raw(fee)
    }
}

impl From<FeeTier> for u32 {
    fn from(tier: FeeTier) -> u32 {
        tier.as_raw()
    }
}

/// Direction of a swap relative to the pool's token ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SwapDirection {
    Token0ToToken1,
    Token1ToToken0,
}

impl SwapDirection {
    pub fn zero_for_one(&self) -> bool {
        matches!(self, SwapDirection::Token0ToToken1)
    }
}

/// Static description of a monitored pool, loaded from the descriptor file.
///
/// Invariant: `token0 < token1` by byte ordering, matching the factory's
/// canonical token ordering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolDescriptor {
    pub pool_id: String,
    pub address: Address,
    pub token0: Address,
    pub token1: Address,
    pub fee_tier: FeeTier,
    pub tick_spacing: i32,
    pub symbol0: String,
    pub symbol1: String,
    pub decimals0: u8,
    pub decimals1: u8,
}

impl PoolDescriptor {
    pub fn symbol_pair(&self) -> String {
        format!("{}/{}", self.symbol0, self.symbol1)
    }

    /// Direction of a swap entering with `token_in`, if the token belongs to
    /// this pool at all.
    pub fn direction_for(&self, token_in: Address) -> Option<SwapDirection> {
        if token_in == self.token0 {
            Some(SwapDirection::Token0ToToken1)
        } else if token_in == self.token1 {
            Some(SwapDirection::Token1ToToken0)
        } else {
            None
        }
    }

    pub fn decimals_for(&self, token: Address) -> Option<u8> {
        if token == self.token0 {
            Some(self.decimals0)
        } else if token == self.token1 {
            Some(self.decimals1)
        } else {
            None
        }
    }
}

/// Point-in-time snapshot of a pool's dynamic state.
///
/// A snapshot older than the cache TTL must not be used for a decision;
/// `is_fresh` is the gate.
#[derive(Debug, Clone)]
pub struct PoolState {
    /// Square root of the price, Q64.96 fixed point.
    pub sqrt_price_x96: U256,
    /// Current tick, in `[MIN_TICK, MAX_TICK]`.
    pub tick: i32,
    /// Total in-range liquidity.
    pub liquidity: u128,
    pub fee_growth_global0_x128: U256,
    pub fee_growth_global1_x128: U256,
    pub fetched_at: Instant,
}

impl PoolState {
    pub fn is_fresh(&self, ttl: Duration) -> bool {
        self.fetched_at.elapsed() <= ttl
    }

    pub fn age(&self) -> Duration {
        self.fetched_at.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fee_tier_round_trips_raw_values() {
        for raw in [100u32, 500, 3_000, 10_000] {
            let tier = FeeTier::from_raw(raw).unwrap();
            assert_eq!(tier.as_raw(), raw);
        }
        assert!(FeeTier::from_raw(2_500).is_err());
    }

    #[test]
    fn tick_spacing_matches_fee_tier() {
        assert_eq!(FeeTier::Lowest.tick_spacing(), 1);
        assert_eq!(FeeTier::Low.tick_spacing(), 10);
        assert_eq!(FeeTier::Medium.tick_spacing(), 60);
        assert_eq!(FeeTier::High.tick_spacing(), 200);
    }

    #[test]
    fn direction_follows_token_ordering() {
        let descriptor = PoolDescriptor {
            pool_id: "usdc-weth-500".to_string(),
            address: Address::repeat_byte(0x11),
            token0: Address::repeat_byte(0x01),
            token1: Address::repeat_byte(0x02),
            fee_tier: FeeTier::Low,
            tick_spacing: 10,
            symbol0: "USDC".to_string(),
            symbol1: "WETH".to_string(),
            decimals0: 6,
            decimals1: 18,
        };

        assert_eq!(
            descriptor.direction_for(descriptor.token0),
            Some(SwapDirection::Token0ToToken1)
        );
        assert_eq!(
            descriptor.direction_for(descriptor.token1),
            Some(SwapDirection::Token1ToToken0)
        );
        assert_eq!(descriptor.direction_for(Address::repeat_byte(0x99)), None);
    }

    #[test]
    fn pool_state_freshness_uses_ttl() {
        let state = PoolState {
            sqrt_price_x96: U256::one() << 96,
            tick: 0,
            liquidity: 1_000,
            fee_growth_global0_x128: U256::zero(),
            fee_growth_global1_x128: U256::zero(),
            fetched_at: Instant::now(),
        };
        assert!(state.is_fresh(Duration::from_secs(1)));

        let stale = PoolState {
            fetched_at: Instant::now() - Duration::from_secs(2),
            ..state
        };
        assert!(!stale.is_fresh(Duration::from_secs(1)));
    }
}
