//! Candidate evaluation: threshold gates, fast simulation, fork-replay
//! validation.
//!
//! Gates run in order and the first failure short-circuits. The fast math
//! decides well under a block time from cached state; fork replay is the
//! authoritative check and its unavailability only downgrades confidence.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use ethers::providers::{Http, Provider};
use ethers::types::{Address, H256, U256};
use ethers::utils::keccak256;
use jitflow_amm::{amounts_for_liquidity, fast_profit, lp_share, mul_div, optimal_range};
use jitflow_config::JitConfig;
use jitflow_oracle::{gas_cost_usd, GasOracle, PriceOracle, JIT_GAS};
use jitflow_state::{PoolStateCache, StateError};
use jitflow_types::{
    Confidence, DropReason, JitOpportunity, OpportunityStage, PendingSwap, PoolState, Reason,
    SwapDirection,
};
use metrics::counter;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::{debug, warn};

use crate::coordinator::PoolEnabledView;
use crate::decoder::PoolIndex;
use crate::metrics as telemetry;
use crate::replay::{ReplayClient, ReplayError};

/// Optimistic LP-share bound used by the no-RPC pre-screen.
const PRESCREEN_SHARE: Decimal = dec!(0.9);

/// Our mint targets liquidity equal to the pool's current in-range
/// liquidity, i.e. a 50% fee share against the victim.
const TARGET_LIQUIDITY_RATIO: u128 = 1;

/// Evaluation failure surfaced to the coordinator.
#[derive(Debug)]
pub struct EvalFailure {
    pub pool: Address,
    pub reason: Reason,
    pub pool_isolable: bool,
}

impl EvalFailure {
    fn new(pool: Address, code: DropReason, detail: impl Into<String>) -> Self {
        Self {
            pool,
            reason: Reason::new(code, detail),
            pool_isolable: false,
        }
    }

    fn isolable(pool: Address, code: DropReason, detail: impl Into<String>) -> Self {
        Self {
            pool_isolable: true,
            ..Self::new(pool, code, detail)
        }
    }
}

pub struct CandidateEvaluator {
    config: Arc<JitConfig>,
    index: Arc<PoolIndex>,
    enabled: PoolEnabledView,
    cache: Arc<PoolStateCache<Provider<Http>>>,
    gas_oracle: Arc<GasOracle<Provider<Http>>>,
    price_oracle: Arc<PriceOracle<Provider<Http>>>,
    replay: Option<Arc<ReplayClient>>,
    replaced: Arc<DashMap<H256, Instant>>,
    current_block: Arc<AtomicU64>,
}

impl CandidateEvaluator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<JitConfig>,
        index: Arc<PoolIndex>,
        enabled: PoolEnabledView,
        cache: Arc<PoolStateCache<Provider<Http>>>,
        gas_oracle: Arc<GasOracle<Provider<Http>>>,
        price_oracle: Arc<PriceOracle<Provider<Http>>>,
        replay: Option<Arc<ReplayClient>>,
        replaced: Arc<DashMap<H256, Instant>>,
        current_block: Arc<AtomicU64>,
    ) -> Self {
        Self {
            config,
            index,
            enabled,
            cache,
            gas_oracle,
            price_oracle,
            replay,
            replaced,
            current_block,
        }
    }

    /// Evaluate a candidate under the soft per-candidate deadline.
    pub async fn evaluate(&self, swap: PendingSwap) -> Result<JitOpportunity, EvalFailure> {
        let pool = swap.pool;
        let budget =
            Duration::from_millis(self.config.target_block_time_ms.saturating_sub(500).max(100));
        match tokio::time::timeout(budget, self.evaluate_inner(swap)).await {
            Ok(result) => result,
            Err(_) => Err(EvalFailure::new(
                pool,
                DropReason::DeadlineMiss,
                format!("no validated opportunity within {budget:?}"),
            )),
        }
    }

    async fn evaluate_inner(&self, swap: PendingSwap) -> Result<JitOpportunity, EvalFailure> {
        let pool = swap.pool;

        if self.replaced.contains_key(&swap.tx_hash) {
            return Err(EvalFailure::new(pool, DropReason::Replaced, "victim replaced"));
        }
        if !self.enabled.is_enabled(pool) {
            return Err(EvalFailure::new(pool, DropReason::PoolDisabled, "pool disabled"));
        }
        let descriptor = self
            .index
            .pool(pool)
            .ok_or_else(|| EvalFailure::new(pool, DropReason::PoolNotMonitored, "no descriptor"))?
            .clone();

        let floor = self.config.profit_floor(&descriptor.pool_id);
        let fee_fraction = Decimal::from(swap.fee_tier.as_raw()) / dec!(1_000_000);

        // Gate 1: optimistic fee bound from cached state and data already
        // in hand. No RPC: a stale or missing snapshot falls back to the
        // optimistic share bound.
        let prescreen_share = match self.cache.peek(pool) {
            Some(state) if state.liquidity > 0 => lp_share(
                state.liquidity.saturating_mul(TARGET_LIQUIDITY_RATIO),
                state.liquidity,
            ),
            _ => PRESCREEN_SHARE,
        };
        let optimistic_fees = swap.estimated_usd * fee_fraction * prescreen_share;
        if swap.estimated_usd > Decimal::ZERO && optimistic_fees < floor {
            return Err(EvalFailure::new(
                pool,
                DropReason::BelowProfitFloor,
                format!("optimistic fees {optimistic_fees:.2} below floor {floor}"),
            ));
        }

        // Gate 2: current gas price must fit under the cap.
        let gas = self
            .gas_oracle
            .current_gas_price()
            .await
            .map_err(|e| EvalFailure::new(pool, DropReason::RpcUnavailable, e.to_string()))?;
        if gas.capped {
            return Err(EvalFailure::new(
                pool,
                DropReason::GasCapExceeded,
                format!("network gas above {} gwei cap", self.config.max_gas_gwei),
            ));
        }

        // Gate 3: full fast simulation on fresh state.
        let state = self.cache.get(pool).await.map_err(|e| match e {
            StateError::NotAPool(_) => {
                EvalFailure::isolable(pool, DropReason::RpcUnavailable, e.to_string())
            }
            StateError::Rpc { .. } => {
                EvalFailure::isolable(pool, DropReason::RpcUnavailable, e.to_string())
            }
        })?;

        if state.liquidity == 0 {
            return Err(EvalFailure::new(
                pool,
                DropReason::ZeroLiquidity,
                "no in-range liquidity",
            ));
        }

        let (tick_lower, tick_upper) = optimal_range(
            state.tick,
            descriptor.tick_spacing,
            self.config.range_width_spacings,
        )
        .map_err(|e| EvalFailure::new(pool, DropReason::BelowProfitFloor, e.to_string()))?;

        let our_liquidity = state.liquidity.saturating_mul(TARGET_LIQUIDITY_RATIO);
        let (amount0, amount1) =
            amounts_for_liquidity(our_liquidity, tick_lower, tick_upper, state.tick)
                .map_err(|e| EvalFailure::new(pool, DropReason::BelowProfitFloor, e.to_string()))?;
        let share = lp_share(our_liquidity, state.liquidity);

        let decimals_in = descriptor.decimals_for(swap.token_in).unwrap_or(18);
        let price_in = self
            .price_oracle
            .price_usd(swap.token_in)
            .await
            .map_err(|e| EvalFailure::new(pool, DropReason::RpcUnavailable, e.to_string()))?;
        let native_price = self
            .price_oracle
            .price_usd(self.config.chain.wrapped_native())
            .await
            .map_err(|e| EvalFailure::new(pool, DropReason::RpcUnavailable, e.to_string()))?;

        let gas_cost = gas_cost_usd(JIT_GAS.total, gas.max_fee, native_price.value);

        let estimate = fast_profit(
            swap.amount_in,
            swap.fee_tier.as_raw(),
            share,
            decimals_in,
            price_in.value,
            gas_cost,
            self.config.risk_buffer_usd,
            floor,
        );
        if !estimate.profitable {
            return Err(EvalFailure::new(
                pool,
                DropReason::BelowProfitFloor,
                estimate.reason.unwrap_or("unprofitable"),
            ));
        }

        // Victim price impact must stay inside our tolerance, or the
        // position drifts out of range mid-block.
        let impact_bps = price_impact_bps(&state, swap.amount_in, swap.direction);
        if impact_bps > self.config.slippage_tolerance_bps {
            return Err(EvalFailure::new(
                pool,
                DropReason::SlippageExceeded,
                format!(
                    "estimated impact {impact_bps} bps over {} bps tolerance",
                    self.config.slippage_tolerance_bps
                ),
            ));
        }

        // Gate 4: fork replay of the victim leg. The assembled bundle is
        // replayed again in full by the submitter's pre-flight.
        let confidence = self.fork_validate(&swap).await?;

        let trace_id = H256::from(keccak256(
            [swap.candidate_id.as_bytes(), swap.tx_hash.as_bytes()].concat(),
        ));
        let target_block = swap.target_block();

        telemetry::set_simulated_profit(estimate.net_profit_usd.to_f64().unwrap_or(0.0));
        debug!(
            pool = %descriptor.pool_id,
            net_profit = %estimate.net_profit_usd,
            range = ?(tick_lower, tick_upper),
            liquidity = our_liquidity,
            ?confidence,
            "candidate validated"
        );

        Ok(JitOpportunity {
            trace_id,
            candidate_id: swap.candidate_id,
            victim_tx_hash: swap.tx_hash,
            victim_raw_tx: swap.raw_tx,
            pool,
            target_block,
            estimated_profit_usd: estimate.net_profit_usd,
            gross_fees_usd: estimate.gross_fees_usd,
            gas_cost_usd: estimate.gas_cost_usd,
            tick_lower,
            tick_upper,
            liquidity: our_liquidity,
            amount0,
            amount1,
            gas_price_wei: gas.max_fee,
            stage: OpportunityStage::Validated,
            profitable: true,
            confidence,
            reason: None,
        })
    }

    /// Replay the victim's raw bytes on forked state anchored at the block
    /// it was seen in. Unavailability downgrades to fast-only.
    async fn fork_validate(&self, swap: &PendingSwap) -> Result<Confidence, EvalFailure> {
        let Some(replay) = &self.replay else {
            counter!(telemetry::FORK_VALIDATIONS_SKIPPED).increment(1);
            return Ok(Confidence::Medium);
        };
        if !swap.has_raw_tx() {
            counter!(telemetry::FORK_VALIDATIONS_SKIPPED).increment(1);
            warn!(tx = ?swap.tx_hash, "no raw bytes, fork validation skipped");
            return Ok(Confidence::Medium);
        }

        let state_block = self.current_block.load(Ordering::Relaxed);
        match replay
            .call_bundle(
                std::slice::from_ref(&swap.raw_tx),
                swap.target_block(),
                state_block,
            )
            .await
        {
            Ok(simulation) if simulation.success => Ok(Confidence::High),
            Ok(simulation) => {
                let detail = simulation
                    .tx_outcomes
                    .iter()
                    .find_map(|tx| tx.error.clone())
                    .unwrap_or_else(|| "victim reverted on fork".to_string());
                Err(EvalFailure::new(swap.pool, DropReason::ForkRevert, detail))
            }
            Err(ReplayError::Unavailable(e)) => {
                counter!(telemetry::FORK_VALIDATIONS_SKIPPED).increment(1);
                warn!(error = %e, "fork replay unavailable, downgrading to fast-only");
                Ok(Confidence::Medium)
            }
        }
    }
}

/// Estimated price impact of the victim swap in basis points, from the
/// single-tick sqrt-price step. Token1-in pushes the sqrt price up by
/// `Δ = amount·Q96/L`; token0-in pulls it down by the harmonic step.
fn price_impact_bps(state: &PoolState, amount_in: U256, direction: SwapDirection) -> u32 {
    let liquidity = U256::from(state.liquidity);
    if liquidity.is_zero() || state.sqrt_price_x96.is_zero() {
        return u32::MAX;
    }

    let sqrt = state.sqrt_price_x96;
    let new_sqrt = match direction {
        SwapDirection::Token1ToToken0 => {
            if amount_in > U256::MAX >> 96 {
                return u32::MAX;
            }
            let delta = (amount_in << 96) / liquidity;
            sqrt.saturating_add(delta)
        }
        SwapDirection::Token0ToToken1 => {
            let shifted = liquidity << 96;
            let denominator = shifted.saturating_add(amount_in.saturating_mul(sqrt));
            match mul_div(shifted, sqrt, denominator) {
                Ok(value) => value,
                Err(_) => return u32::MAX,
            }
        }
    };

    let diff = if new_sqrt > sqrt {
        new_sqrt - sqrt
    } else {
        sqrt - new_sqrt
    };
    // Price moves twice as fast as its square root, to first order.
    let bps = diff.saturating_mul(U256::from(20_000u64)) / sqrt;
    bps.min(U256::from(u32::MAX)).as_u32()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn state(liquidity: u128) -> PoolState {
        PoolState {
            sqrt_price_x96: U256::one() << 96,
            tick: 0,
            liquidity,
            fee_growth_global0_x128: U256::zero(),
            fee_growth_global1_x128: U256::zero(),
            fetched_at: Instant::now(),
        }
    }

    #[test]
    fn small_swap_has_negligible_impact() {
        // 1e12 against 1e24 liquidity: parts-per-trillion move.
        let impact = price_impact_bps(
            &state(10u128.pow(24)),
            U256::from(10u64.pow(12)),
            SwapDirection::Token1ToToken0,
        );
        assert_eq!(impact, 0);
    }

    #[test]
    fn large_swap_trips_the_tolerance() {
        // 5% of liquidity moves the sqrt price ~5%, i.e. ~1000 bps.
        let impact = price_impact_bps(
            &state(10u128.pow(20)),
            U256::from(5u64) * U256::from(10u64.pow(18)),
            SwapDirection::Token1ToToken0,
        );
        assert!(impact > 500, "impact {impact}");
    }

    #[test]
    fn token0_and_token1_impacts_are_symmetric_at_unit_price() {
        let pool_state = state(10u128.pow(20));
        let amount = U256::from(10u64.pow(18));
        let up = price_impact_bps(&pool_state, amount, SwapDirection::Token1ToToken0);
        let down = price_impact_bps(&pool_state, amount, SwapDirection::Token0ToToken1);
        let diff = up.abs_diff(down);
        assert!(diff <= up / 10 + 1, "up {up} down {down}");
    }

    #[test]
    fn zero_liquidity_is_infinite_impact() {
        let impact = price_impact_bps(
            &state(0),
            U256::from(1u64),
            SwapDirection::Token1ToToken0,
        );
        assert_eq!(impact, u32::MAX);
    }
}
