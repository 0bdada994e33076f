//! Evaluated opportunities and per-pool health.

use std::time::{Duration, Instant};

use ethers::types::{Address, Bytes, H256, U256};
use rust_decimal::Decimal;

use crate::error::Reason;

/// Lifecycle stage of an opportunity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpportunityStage {
    Detected,
    Simulated,
    Validated,
    Failed,
}

/// Validation confidence. `Medium` marks fast-only results produced while
/// the fork-replay validator was unavailable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confidence {
    High,
    Medium,
}

/// Output of the candidate evaluator, handed to the coordinator.
#[derive(Debug, Clone)]
pub struct JitOpportunity {
    pub trace_id: H256,
    pub candidate_id: H256,
    pub victim_tx_hash: H256,
    pub victim_raw_tx: Bytes,
    pub pool: Address,
    pub target_block: u64,
    pub estimated_profit_usd: Decimal,
    pub gross_fees_usd: Decimal,
    pub gas_cost_usd: Decimal,
    /// Proposed position, aligned to the pool's tick spacing.
    pub tick_lower: i32,
    pub tick_upper: i32,
    pub liquidity: u128,
    /// Token amounts backing `liquidity` at the evaluated price.
    pub amount0: U256,
    pub amount1: U256,
    /// Proposed gas price for the position transactions, wei.
    pub gas_price_wei: U256,
    pub stage: OpportunityStage,
    pub profitable: bool,
    pub confidence: Confidence,
    pub reason: Option<Reason>,
}

impl JitOpportunity {
    pub fn is_validated(&self) -> bool {
        self.stage == OpportunityStage::Validated && self.profitable
    }
}

/// Mutable per-pool health, owned exclusively by the coordinator.
///
/// `enabled == false` always carries a scheduled wakeup at
/// `last_failure + cooldown`.
#[derive(Debug, Clone)]
pub struct PoolHealth {
    pub enabled: bool,
    pub consecutive_failures: u32,
    pub last_failure: Option<Instant>,
    pub cooldown_ends_at: Option<Instant>,
    /// Pool-specific USD profit floor override.
    pub min_profit_usd_override: Option<Decimal>,
}

impl PoolHealth {
    pub fn new(min_profit_usd_override: Option<Decimal>) -> Self {
        Self {
            enabled: true,
            consecutive_failures: 0,
            last_failure: None,
            cooldown_ends_at: None,
            min_profit_usd_override,
        }
    }

    /// Record a pool-isolable failure. Returns true when the pool crossed
    /// the failure threshold and was disabled.
    pub fn record_failure(&mut self, max_failures: u32, cooldown: Duration) -> bool {
        let now = Instant::now();
        self.consecutive_failures += 1;
        self.last_failure = Some(now);
        if self.enabled && self.consecutive_failures >= max_failures {
            self.enabled = false;
            self.cooldown_ends_at = Some(now + cooldown);
            return true;
        }
        false
    }

    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
    }

    /// Re-enable the pool if its cooldown has elapsed. Returns true if the
    /// pool transitioned back to enabled.
    pub fn maybe_reenable(&mut self) -> bool {
        match self.cooldown_ends_at {
            Some(ends_at) if !self.enabled && Instant::now() >= ends_at => {
                self.enabled = true;
                self.consecutive_failures = 0;
                self.cooldown_ends_at = None;
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_disables_after_max_failures_and_recovers() {
        let mut health = PoolHealth::new(None);
        let cooldown = Duration::from_millis(10);

        assert!(!health.record_failure(3, cooldown));
        assert!(!health.record_failure(3, cooldown));
        assert!(health.record_failure(3, cooldown));
        assert!(!health.enabled);
        assert!(health.cooldown_ends_at.is_some());

        // Still cooling down.
        assert!(!health.maybe_reenable() || health.enabled);

        std::thread::sleep(Duration::from_millis(15));
        assert!(health.maybe_reenable());
        assert!(health.enabled);
        assert_eq!(health.consecutive_failures, 0);
    }

    #[test]
    fn success_resets_failure_count() {
        let mut health = PoolHealth::new(None);
        health.record_failure(5, Duration::from_secs(1));
        health.record_failure(5, Duration::from_secs(1));
        health.record_success();
        assert_eq!(health.consecutive_failures, 0);
        assert!(health.enabled);
    }
}
