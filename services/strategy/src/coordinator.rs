//! Per-target-block opportunity coordination.
//!
//! A single task owns the block buffer and all pool health, which keeps
//! the one-winner-per-block policy and health transitions serialized
//! without locks. Everyone else sees pool health through the read-only
//! enabled view.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use ethers::types::Address;
use jitflow_config::JitConfig;
use jitflow_types::{JitOpportunity, PoolDescriptor, PoolHealth, Reason};
use metrics::counter;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::metrics as telemetry;

/// Buffered opportunities survive at most this many blocks.
const BUFFER_RETENTION_BLOCKS: u64 = 3;

/// Read-only pool-enabled view shared with the watcher and evaluator.
/// Only the coordinator writes.
#[derive(Clone, Default)]
pub struct PoolEnabledView(Arc<DashMap<Address, bool>>);

impl PoolEnabledView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_enabled(&self, pool: Address) -> bool {
        self.0.get(&pool).map(|entry| *entry).unwrap_or(true)
    }

    fn set(&self, pool: Address, enabled: bool) {
        self.0.insert(pool, enabled);
    }
}

/// Everything the coordinator reacts to.
#[derive(Debug)]
pub enum CoordinatorEvent {
    NewBlock(u64),
    Opportunity(JitOpportunity),
    Failure {
        pool: Address,
        reason: Reason,
        pool_isolable: bool,
    },
    SubmissionOutcome {
        pool: Address,
        success: bool,
    },
    /// Cooldown timer for a disabled pool fired.
    HealthWakeup(Address),
}

pub struct OpportunityCoordinator {
    config: Arc<JitConfig>,
    pool_ids: HashMap<Address, String>,
    buffer: BTreeMap<u64, Vec<JitOpportunity>>,
    health: HashMap<Address, PoolHealth>,
    enabled_view: PoolEnabledView,
    winners: mpsc::Sender<JitOpportunity>,
    /// Loopback for scheduled health wakeups.
    self_events: mpsc::Sender<CoordinatorEvent>,
    current_block: u64,
}

impl OpportunityCoordinator {
    pub fn new(
        config: Arc<JitConfig>,
        descriptors: &[Arc<PoolDescriptor>],
        enabled_view: PoolEnabledView,
        winners: mpsc::Sender<JitOpportunity>,
        self_events: mpsc::Sender<CoordinatorEvent>,
    ) -> Self {
        let mut health = HashMap::new();
        let mut pool_ids = HashMap::new();
        for descriptor in descriptors {
            let override_floor = config
                .pool_min_profit_usd
                .get(&descriptor.pool_id.to_ascii_lowercase())
                .copied();
            health.insert(descriptor.address, PoolHealth::new(override_floor));
            pool_ids.insert(descriptor.address, descriptor.pool_id.clone());
        }

        Self {
            config,
            pool_ids,
            buffer: BTreeMap::new(),
            health,
            enabled_view,
            winners,
            self_events,
            current_block: 0,
        }
    }

    /// Consume events until the channel closes or shutdown fires.
    pub async fn run(
        mut self,
        mut events: mpsc::Receiver<CoordinatorEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                maybe_event = events.recv() => {
                    let Some(event) = maybe_event else { break };
                    self.handle(event).await;
                }
                _ = shutdown.changed() => break,
            }
        }
        info!("opportunity coordinator stopped");
    }

    async fn handle(&mut self, event: CoordinatorEvent) {
        match event {
            CoordinatorEvent::NewBlock(block) => {
                let winners = self.on_new_block(block);
                for winner in winners {
                    let pool_id = self.pool_label(winner.pool);
                    telemetry::record_attempt(&pool_id);
                    if self.winners.send(winner).await.is_err() {
                        warn!("bundle channel closed, winner dropped");
                    }
                }
            }
            CoordinatorEvent::Opportunity(opportunity) => self.insert_opportunity(opportunity),
            CoordinatorEvent::Failure {
                pool,
                reason,
                pool_isolable,
            } => self.on_failure(pool, reason, pool_isolable),
            CoordinatorEvent::SubmissionOutcome { pool, success } => {
                self.on_submission(pool, success)
            }
            CoordinatorEvent::HealthWakeup(pool) => self.reenable_if_due(pool),
        }
    }

    /// Advance to `block`: run due health wakeups, pick winners for the
    /// next block, and garbage-collect the buffer.
    fn on_new_block(&mut self, block: u64) -> Vec<JitOpportunity> {
        self.current_block = block;

        let pools: Vec<Address> = self.health.keys().copied().collect();
        for pool in pools {
            self.reenable_if_due(pool);
        }

        self.gc(block);

        let target = block + 1;
        let mut candidates = self.buffer.remove(&target).unwrap_or_default();
        rank(&mut candidates);

        let winners: Vec<JitOpportunity> = candidates
            .into_iter()
            .filter(|opportunity| self.enabled_view.is_enabled(opportunity.pool))
            .take(self.config.max_bundles_per_block)
            .collect();

        if !winners.is_empty() {
            debug!(
                block,
                target,
                count = winners.len(),
                top_profit = %winners[0].estimated_profit_usd,
                "selected block winners"
            );
        }
        winners
    }

    fn insert_opportunity(&mut self, opportunity: JitOpportunity) {
        if !self.enabled_view.is_enabled(opportunity.pool) {
            telemetry::record_rejection(jitflow_types::DropReason::PoolDisabled);
            return;
        }
        // Retention is enforced before every insertion.
        self.gc(self.current_block);

        if opportunity.target_block <= self.current_block {
            debug!(
                target = opportunity.target_block,
                current = self.current_block,
                "opportunity arrived for a past block"
            );
            return;
        }

        self.buffer
            .entry(opportunity.target_block)
            .or_default()
            .push(opportunity);
    }

    fn gc(&mut self, block: u64) {
        let cutoff = block.saturating_sub(BUFFER_RETENTION_BLOCKS);
        self.buffer.retain(|target, _| *target >= cutoff);
    }

    fn on_failure(&mut self, pool: Address, reason: Reason, pool_isolable: bool) {
        let pool_id = self.pool_label(pool);
        telemetry::record_failure(&pool_id);
        debug!(pool = %pool_id, %reason, pool_isolable, "candidate failure recorded");

        if !pool_isolable {
            return;
        }

        let cooldown = Duration::from_millis(self.config.pool_cooldown_ms);
        let Some(health) = self.health.get_mut(&pool) else {
            return;
        };
        if health.record_failure(self.config.pool_max_failures, cooldown) {
            self.enabled_view.set(pool, false);
            counter!(telemetry::POOLS_DISABLED).increment(1);
            warn!(
                pool = %pool_id,
                failures = health.consecutive_failures,
                cooldown_ms = self.config.pool_cooldown_ms,
                "pool disabled after repeated failures"
            );

            let wakeup = self.self_events.clone();
            tokio::spawn(async move {
                tokio::time::sleep(cooldown).await;
                let _ = wakeup.send(CoordinatorEvent::HealthWakeup(pool)).await;
            });
        }
    }

    fn on_submission(&mut self, pool: Address, success: bool) {
        let pool_id = self.pool_label(pool);
        if success {
            telemetry::record_success(&pool_id);
            if let Some(health) = self.health.get_mut(&pool) {
                health.record_success();
            }
        } else {
            telemetry::record_failure(&pool_id);
        }
    }

    fn reenable_if_due(&mut self, pool: Address) {
        if let Some(health) = self.health.get_mut(&pool) {
            if health.maybe_reenable() {
                self.enabled_view.set(pool, true);
                info!(pool = %self.pool_ids.get(&pool).cloned().unwrap_or_default(), "pool re-enabled after cooldown");
            }
        }
    }

    fn pool_label(&self, pool: Address) -> String {
        self.pool_ids
            .get(&pool)
            .cloned()
            .unwrap_or_else(|| format!("{pool:?}"))
    }
}

/// Deterministic ranking: profit descending, then pool address ascending,
/// then victim tx hash ascending.
fn rank(opportunities: &mut [JitOpportunity]) {
    opportunities.sort_by(|a, b| {
        b.estimated_profit_usd
            .cmp(&a.estimated_profit_usd)
            .then_with(|| a.pool.cmp(&b.pool))
            .then_with(|| a.victim_tx_hash.cmp(&b.victim_tx_hash))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::types::{Bytes, H256, U256};
    use jitflow_types::{Confidence, OpportunityStage};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn opportunity(pool: Address, tx: H256, profit: Decimal, target_block: u64) -> JitOpportunity {
        JitOpportunity {
            trace_id: H256::random(),
            candidate_id: H256::random(),
            victim_tx_hash: tx,
            victim_raw_tx: Bytes::from(vec![0x02]),
            pool,
            target_block,
            estimated_profit_usd: profit,
            gross_fees_usd: profit,
            gas_cost_usd: dec!(1),
            tick_lower: -100,
            tick_upper: 100,
            liquidity: 1_000,
            amount0: U256::one(),
            amount1: U256::one(),
            gas_price_wei: U256::from(30_000_000_000u64),
            stage: OpportunityStage::Validated,
            profitable: true,
            confidence: Confidence::High,
            reason: None,
        }
    }

    fn coordinator() -> (OpportunityCoordinator, mpsc::Receiver<JitOpportunity>) {
        let config = Arc::new(JitConfig::default());
        let descriptors: Vec<Arc<PoolDescriptor>> = Vec::new();
        let (winners_tx, winners_rx) = mpsc::channel(1);
        let (self_tx, _self_rx) = mpsc::channel(8);
        (
            OpportunityCoordinator::new(
                config,
                &descriptors,
                PoolEnabledView::new(),
                winners_tx,
                self_tx,
            ),
            winners_rx,
        )
    }

    #[tokio::test]
    async fn highest_profit_wins_with_deterministic_tiebreaks() {
        let (mut coordinator, _rx) = coordinator();
        coordinator.current_block = 99;

        let pool_a = Address::repeat_byte(0x0a);
        let pool_b = Address::repeat_byte(0x0b);

        coordinator.insert_opportunity(opportunity(pool_a, H256::repeat_byte(1), dec!(120), 101));
        coordinator.insert_opportunity(opportunity(pool_b, H256::repeat_byte(2), dec!(120), 101));
        coordinator.insert_opportunity(opportunity(pool_a, H256::repeat_byte(3), dec!(150), 101));

        let winners = coordinator.on_new_block(100);
        assert_eq!(winners.len(), 1);
        assert_eq!(winners[0].estimated_profit_usd, dec!(150));
        assert_eq!(winners[0].pool, pool_a);
    }

    #[test]
    fn tied_profit_breaks_on_pool_then_tx_hash() {
        let pool_a = Address::repeat_byte(0x0a);
        let pool_b = Address::repeat_byte(0x0b);
        let mut opportunities = vec![
            opportunity(pool_b, H256::repeat_byte(1), dec!(120), 101),
            opportunity(pool_a, H256::repeat_byte(9), dec!(120), 101),
            opportunity(pool_a, H256::repeat_byte(2), dec!(120), 101),
        ];
        rank(&mut opportunities);

        assert_eq!(opportunities[0].pool, pool_a);
        assert_eq!(opportunities[0].victim_tx_hash, H256::repeat_byte(2));
        assert_eq!(opportunities[1].pool, pool_a);
        assert_eq!(opportunities[2].pool, pool_b);
    }

    #[tokio::test]
    async fn buffer_drops_entries_older_than_three_blocks() {
        let (mut coordinator, _rx) = coordinator();
        coordinator.current_block = 99;

        coordinator.insert_opportunity(opportunity(
            Address::repeat_byte(0x0a),
            H256::repeat_byte(1),
            dec!(50),
            100,
        ));
        assert_eq!(coordinator.buffer.len(), 1);

        // Four blocks later the entry is past retention.
        let winners = coordinator.on_new_block(104);
        assert!(winners.is_empty());
        assert!(coordinator.buffer.is_empty());
    }

    #[tokio::test]
    async fn winners_limited_to_configured_cap() {
        let (mut coordinator, _rx) = coordinator();
        coordinator.current_block = 99;

        for i in 0..5u8 {
            coordinator.insert_opportunity(opportunity(
                Address::repeat_byte(i + 1),
                H256::repeat_byte(i + 1),
                Decimal::from(100 + i as u32),
                101,
            ));
        }

        let winners = coordinator.on_new_block(100);
        assert_eq!(winners.len(), 1); // max_bundles_per_block default
        assert_eq!(winners[0].estimated_profit_usd, dec!(104));
    }

    #[tokio::test]
    async fn disabled_pool_opportunities_are_refused() {
        let (mut coordinator, _rx) = coordinator();
        coordinator.current_block = 99;
        let pool = Address::repeat_byte(0x0a);
        coordinator.enabled_view.set(pool, false);

        coordinator.insert_opportunity(opportunity(pool, H256::repeat_byte(1), dec!(50), 101));
        assert!(coordinator.buffer.is_empty());
    }
}
