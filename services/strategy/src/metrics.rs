//! Prometheus telemetry for the pipeline.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use anyhow::{Context, Result};
use metrics::{counter, describe_counter, describe_gauge, gauge};

pub const MEMPOOL_TXS_SEEN: &str = "jit_mempool_txs_seen_total";
pub const SWAPS_DECODED: &str = "jit_swaps_decoded_total";
pub const SWAPS_MATCHED: &str = "jit_swaps_matched_total";
pub const SWAPS_REJECTED: &str = "jit_swaps_rejected_total";
pub const VICTIM_REPLACEMENTS: &str = "jit_victim_replacements_total";
pub const CANDIDATES_DROPPED_BACKPRESSURE: &str = "jit_candidates_dropped_backpressure_total";
pub const ATTEMPTS: &str = "jit_attempts_total";
pub const SUCCESSES: &str = "jit_successes_total";
pub const FAILURES: &str = "jit_failures_total";
pub const POOLS_DISABLED: &str = "jit_pools_disabled_total";
pub const RELAY_SUBMISSIONS: &str = "jit_relay_submissions_total";
pub const FORK_VALIDATIONS_SKIPPED: &str = "jit_fork_validations_skipped_total";
pub const SIMULATED_PROFIT_USD: &str = "jit_simulated_profit_usd";
pub const LAST_BUNDLE_BLOCK: &str = "jit_last_bundle_block";
pub const WALLET_BALANCE_ETH: &str = "jit_wallet_balance_eth";

/// Install the Prometheus exporter and register metric help text.
pub fn init(port: u16) -> Result<()> {
    let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port);
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("prometheus exporter install")?;

    describe_counter!(MEMPOOL_TXS_SEEN, "Pending transaction hashes received");
    describe_counter!(SWAPS_DECODED, "Pending transactions that decoded as swaps");
    describe_counter!(SWAPS_MATCHED, "Decoded swaps that matched a monitored pool");
    describe_counter!(SWAPS_REJECTED, "Candidates dropped, labeled by reason");
    describe_counter!(VICTIM_REPLACEMENTS, "Victim transactions replaced by nonce");
    describe_counter!(
        CANDIDATES_DROPPED_BACKPRESSURE,
        "Candidates dropped because the evaluator lagged"
    );
    describe_counter!(ATTEMPTS, "JIT attempts per pool");
    describe_counter!(SUCCESSES, "Successful JIT submissions per pool");
    describe_counter!(FAILURES, "Failed JIT attempts per pool");
    describe_counter!(POOLS_DISABLED, "Pool isolation trips");
    describe_counter!(RELAY_SUBMISSIONS, "Relay submissions by relay and outcome");
    describe_counter!(
        FORK_VALIDATIONS_SKIPPED,
        "Evaluations downgraded to fast-only because fork replay was unavailable"
    );
    describe_gauge!(SIMULATED_PROFIT_USD, "Most recent simulated net profit");
    describe_gauge!(LAST_BUNDLE_BLOCK, "Target block of the last assembled bundle");
    describe_gauge!(WALLET_BALANCE_ETH, "Signer wallet balance");

    Ok(())
}

pub fn record_rejection(reason: jitflow_types::DropReason) {
    counter!(SWAPS_REJECTED, "reason" => reason.as_str()).increment(1);
}

pub fn record_attempt(pool_id: &str) {
    counter!(ATTEMPTS, "pool" => pool_id.to_string()).increment(1);
}

pub fn record_success(pool_id: &str) {
    counter!(SUCCESSES, "pool" => pool_id.to_string()).increment(1);
}

pub fn record_failure(pool_id: &str) {
    counter!(FAILURES, "pool" => pool_id.to_string()).increment(1);
}

pub fn record_relay_outcome(relay: &str, accepted: bool) {
    let outcome = if accepted { "success" } else { "failure" };
    counter!(RELAY_SUBMISSIONS, "relay" => relay.to_string(), "outcome" => outcome).increment(1);
}

pub fn set_simulated_profit(profit_usd: f64) {
    gauge!(SIMULATED_PROFIT_USD).set(profit_usd);
}

pub fn set_last_bundle_block(block: u64) {
    gauge!(LAST_BUNDLE_BLOCK).set(block as f64);
}

pub fn set_wallet_balance(balance_eth: f64) {
    gauge!(WALLET_BALANCE_ETH).set(balance_eth);
}
