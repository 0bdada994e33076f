//! Bundle replay against forked chain state.
//!
//! Wraps the node's `eth_callBundle` endpoint. Used twice: by the evaluator
//! for fork validation of the victim leg and by the submitter as the
//! pre-flight check on the fully assembled `[mint, victim, burn/collect]`
//! ordering.

use std::sync::Arc;

use ethers::providers::{Http, JsonRpcClient, Provider};
use ethers::types::{Bytes, H256};
use jitflow_types::{BundleSimulation, TxSimOutcome};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum ReplayError {
    /// The endpoint is down or does not support bundle replay; callers
    /// degrade to fast-only validation.
    #[error("replay endpoint unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawBundleResult {
    #[serde(default)]
    total_gas_used: u64,
    #[serde(default)]
    results: Vec<RawTxResult>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTxResult {
    #[serde(default)]
    tx_hash: Option<H256>,
    #[serde(default)]
    gas_used: u64,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    revert: Option<String>,
}

/// `eth_callBundle` client over the HTTP provider.
pub struct ReplayClient<C = Http> {
    provider: Arc<Provider<C>>,
}

impl<C: JsonRpcClient> ReplayClient<C> {
    pub fn new(provider: Arc<Provider<C>>) -> Self {
        Self { provider }
    }

    /// Replay `raw_txs` in order on state anchored at `state_block`,
    /// simulating inclusion in `target_block`.
    pub async fn call_bundle(
        &self,
        raw_txs: &[Bytes],
        target_block: u64,
        state_block: u64,
    ) -> Result<BundleSimulation, ReplayError> {
        let txs: Vec<String> = raw_txs
            .iter()
            .map(|raw| format!("0x{}", hex::encode(raw)))
            .collect();
        let params = json!([{
            "txs": txs,
            "blockNumber": format!("0x{target_block:x}"),
            "stateBlockNumber": format!("0x{state_block:x}"),
        }]);

        let raw: RawBundleResult = self
            .provider
            .request("eth_callBundle", params)
            .await
            .map_err(|e| ReplayError::Unavailable(e.to_string()))?;

        let simulation = into_simulation(raw);
        debug!(
            target_block,
            gas_used = simulation.gas_used,
            success = simulation.success,
            "bundle replay complete"
        );
        Ok(simulation)
    }
}

fn into_simulation(raw: RawBundleResult) -> BundleSimulation {
    let tx_outcomes: Vec<TxSimOutcome> = raw
        .results
        .into_iter()
        .map(|result| {
            let failure = result.error.or(result.revert);
            TxSimOutcome {
                tx_hash: result.tx_hash.unwrap_or_default(),
                success: failure.is_none(),
                gas_used: result.gas_used,
                error: failure,
            }
        })
        .collect();

    BundleSimulation {
        success: !tx_outcomes.is_empty() && tx_outcomes.iter().all(|tx| tx.success),
        gas_used: raw.total_gas_used,
        tx_outcomes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_successful_txs_mean_bundle_success() {
        let raw: RawBundleResult = serde_json::from_value(json!({
            "totalGasUsed": 1_250_000,
            "results": [
                {"txHash": "0x1111111111111111111111111111111111111111111111111111111111111111", "gasUsed": 800_000},
                {"txHash": "0x2222222222222222222222222222222222222222222222222222222222222222", "gasUsed": 450_000},
            ]
        }))
        .unwrap();

        let simulation = into_simulation(raw);
        assert!(simulation.success);
        assert_eq!(simulation.gas_used, 1_250_000);
        assert_eq!(simulation.tx_outcomes.len(), 2);
    }

    #[test]
    fn any_revert_fails_the_bundle() {
        let raw: RawBundleResult = serde_json::from_value(json!({
            "totalGasUsed": 900_000,
            "results": [
                {"gasUsed": 800_000},
                {"gasUsed": 100_000, "revert": "0x08c379a0"},
            ]
        }))
        .unwrap();

        let simulation = into_simulation(raw);
        assert!(!simulation.success);
        assert!(!simulation.tx_outcomes[1].success);
        assert!(simulation.tx_outcomes[1].error.is_some());
    }

    #[test]
    fn empty_result_set_is_not_a_success() {
        let raw: RawBundleResult = serde_json::from_value(json!({})).unwrap();
        assert!(!into_simulation(raw).success);
    }
}
