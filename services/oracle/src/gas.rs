//! Capped gas-price oracle with a short TTL cache.

use std::sync::Arc;
use std::time::{Duration, Instant};

use ethers::providers::Middleware;
use ethers::types::U256;
use rust_decimal::Decimal;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::OracleError;

/// How long a gas read stays usable.
const GAS_TTL: Duration = Duration::from_secs(5);

const WEI_PER_GWEI: u64 = 1_000_000_000;

/// One gas-price observation, after the cap was applied.
#[derive(Debug, Clone)]
pub struct GasEstimate {
    /// Legacy gas price, wei.
    pub wei: U256,
    pub gwei: Decimal,
    pub max_fee: U256,
    pub max_priority_fee: U256,
    /// Whether the node served EIP-1559 fee components.
    pub is_1559: bool,
    /// Whether any component was clamped by `max_gas_gwei`.
    pub capped: bool,
}

impl GasEstimate {
    /// Clamp all components to `max_gas_gwei`, recording whether clamping
    /// occurred.
    fn apply_cap(mut self, max_gas_gwei: u64) -> Self {
        let cap = U256::from(max_gas_gwei) * U256::from(WEI_PER_GWEI);
        let mut capped = false;
        for component in [&mut self.wei, &mut self.max_fee, &mut self.max_priority_fee] {
            if *component > cap {
                *component = cap;
                capped = true;
            }
        }
        if capped {
            self.gwei = Decimal::from(max_gas_gwei);
        }
        self.capped = capped;
        self
    }
}

/// Gas oracle over an RPC provider. A 5 s cache absorbs candidate bursts;
/// the `MAX_GAS_GWEI` cap is applied after every read.
pub struct GasOracle<M> {
    provider: Arc<M>,
    max_gas_gwei: u64,
    cache: RwLock<Option<(GasEstimate, Instant)>>,
}

impl<M: Middleware> GasOracle<M> {
    pub fn new(provider: Arc<M>, max_gas_gwei: u64) -> Self {
        Self {
            provider,
            max_gas_gwei,
            cache: RwLock::new(None),
        }
    }

    pub fn max_gas_wei(&self) -> U256 {
        U256::from(self.max_gas_gwei) * U256::from(WEI_PER_GWEI)
    }

    /// Current gas price, cached for 5 s and clamped to the configured cap.
    pub async fn current_gas_price(&self) -> Result<GasEstimate, OracleError> {
        {
            let cache = self.cache.read().await;
            if let Some((estimate, fetched_at)) = cache.as_ref() {
                if fetched_at.elapsed() <= GAS_TTL {
                    return Ok(estimate.clone());
                }
            }
        }

        let estimate = self.fetch().await?;
        if estimate.capped {
            warn!(
                cap_gwei = self.max_gas_gwei,
                "gas price exceeded cap, clamped"
            );
        }

        let mut cache = self.cache.write().await;
        *cache = Some((estimate.clone(), Instant::now()));
        Ok(estimate)
    }

    async fn fetch(&self) -> Result<GasEstimate, OracleError> {
        let gas_price = self
            .provider
            .get_gas_price()
            .await
            .map_err(|e| OracleError::Rpc(format!("gas_price: {e}")))?;

        // EIP-1559 components when the node supports them; legacy otherwise.
        let (max_fee, max_priority_fee, is_1559) =
            match self.provider.estimate_eip1559_fees(None).await {
                Ok((max_fee, max_priority_fee)) => (max_fee, max_priority_fee, true),
                Err(e) => {
                    debug!(error = %e, "eip1559 fee estimate unavailable, using legacy price");
                    (gas_price, U256::zero(), false)
                }
            };

        let gwei = Decimal::from_i128_with_scale(
            gas_price.min(U256::from(u64::MAX)).as_u128() as i128,
            9,
        );

        Ok(GasEstimate {
            wei: gas_price,
            gwei,
            max_fee,
            max_priority_fee,
            is_1559,
            capped: false,
        }
        .apply_cap(self.max_gas_gwei))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn estimate(wei_gwei: u64, max_fee_gwei: u64, priority_gwei: u64) -> GasEstimate {
        GasEstimate {
            wei: U256::from(wei_gwei) * U256::from(WEI_PER_GWEI),
            gwei: Decimal::from(wei_gwei),
            max_fee: U256::from(max_fee_gwei) * U256::from(WEI_PER_GWEI),
            max_priority_fee: U256::from(priority_gwei) * U256::from(WEI_PER_GWEI),
            is_1559: true,
            capped: false,
        }
    }

    #[test]
    fn cap_leaves_compliant_reads_untouched() {
        let capped = estimate(40, 55, 2).apply_cap(100);
        assert!(!capped.capped);
        assert_eq!(capped.gwei, dec!(40));
    }

    #[test]
    fn cap_clamps_every_component() {
        let capped = estimate(250, 320, 150).apply_cap(100);
        assert!(capped.capped);
        let cap_wei = U256::from(100u64) * U256::from(WEI_PER_GWEI);
        assert_eq!(capped.wei, cap_wei);
        assert_eq!(capped.max_fee, cap_wei);
        assert_eq!(capped.max_priority_fee, cap_wei);
        assert_eq!(capped.gwei, dec!(100));
    }
}
