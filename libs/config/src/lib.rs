//! # JitFlow Configuration
//!
//! Environment-driven runtime configuration plus the JSON pool-descriptor
//! file. Everything is validated once at startup; live mode is gated behind
//! an explicit risk acknowledgment.

pub mod chain;
pub mod pools;

use std::collections::HashMap;
use std::env;

use ethers::types::Address;
use jitflow_types::JitError;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

pub use chain::Chain;
pub use pools::{canonical_address, load_pool_descriptors};

/// Runtime configuration, resolved from the environment.
#[derive(Debug, Clone)]
pub struct JitConfig {
    /// Master safety switch. True suppresses all outbound signing and relay
    /// calls while the rest of the pipeline runs normally.
    pub dry_run: bool,
    /// Required (with a signer key) to leave dry-run.
    pub live_risk_acknowledged: bool,
    pub chain: Chain,
    pub rpc_url_http: String,
    pub rpc_url_ws: String,
    /// Fallback HTTP node for raw-transaction retrieval.
    pub rpc_url_http_fallback: Option<String>,
    /// Hard cap applied to gas reads and bundle fees.
    pub max_gas_gwei: u64,
    pub global_min_profit_usd: Decimal,
    /// Per-pool floor overrides, keyed by pool id.
    pub pool_min_profit_usd: HashMap<String, Decimal>,
    /// Detection thresholds; a candidate passes if it clears either.
    pub min_swap_eth: Decimal,
    pub min_swap_usd: Decimal,
    /// Monitored subset of the pool file; empty means all.
    pub pool_ids: Vec<String>,
    pub pools_file: String,
    pub allow_reconstruct_raw_tx: bool,
    pub max_bundles_per_block: usize,
    pub pool_max_failures: u32,
    pub pool_cooldown_ms: u64,
    /// Liquidity-source ordering for the mint call encoding.
    pub flashloan_provider_priority: Vec<String>,
    pub relay_url: String,
    pub additional_relay_urls: Vec<String>,
    /// Signs relay authentication headers.
    pub relay_signing_key: Option<String>,
    /// Signs the bundle's mint and burn/collect transactions.
    pub signer_key: Option<String>,
    /// On-chain JIT executor contract receiving the mint/burn calls.
    pub executor_address: Address,
    pub max_in_flight_decodes: usize,
    pub target_block_time_ms: u64,
    pub risk_buffer_usd: Decimal,
    pub slippage_tolerance_bps: u32,
    pub range_width_spacings: i32,
    pub max_priority_fee_gwei: u64,
    pub metrics_port: u16,
}

impl Default for JitConfig {
    fn default() -> Self {
        Self {
            dry_run: true,
            live_risk_acknowledged: false,
            chain: Chain::Ethereum,
            rpc_url_http: "http://127.0.0.1:8545".to_string(),
            rpc_url_ws: "ws://127.0.0.1:8546".to_string(),
            rpc_url_http_fallback: None,
            max_gas_gwei: 300,
            global_min_profit_usd: dec!(25),
            pool_min_profit_usd: HashMap::new(),
            min_swap_eth: dec!(5),
            min_swap_usd: dec!(10000),
            pool_ids: Vec::new(),
            pools_file: "pools.json".to_string(),
            allow_reconstruct_raw_tx: false,
            max_bundles_per_block: 1,
            pool_max_failures: 3,
            pool_cooldown_ms: 300_000,
            flashloan_provider_priority: vec!["balancer".to_string(), "aave".to_string()],
            relay_url: Chain::Ethereum.default_relay_url().to_string(),
            additional_relay_urls: Vec::new(),
            relay_signing_key: None,
            signer_key: None,
            executor_address: Address::zero(),
            max_in_flight_decodes: 64,
            target_block_time_ms: 12_000,
            risk_buffer_usd: dec!(5),
            slippage_tolerance_bps: 100,
            range_width_spacings: 10,
            max_priority_fee_gwei: 3,
            metrics_port: 9187,
        }
    }
}

fn env_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Result<Option<T>, JitError> {
    match env_var(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| JitError::Config(format!("cannot parse {key}={raw}"))),
        None => Ok(None),
    }
}

fn parse_csv(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

impl JitConfig {
    /// Resolve configuration from the process environment over defaults.
    pub fn from_env() -> Result<Self, JitError> {
        let mut config = Self::default();

        if let Some(v) = parse_env::<bool>("DRY_RUN")? {
            config.dry_run = v;
        }
        if let Some(v) = parse_env::<bool>("LIVE_RISK_ACKNOWLEDGED")? {
            config.live_risk_acknowledged = v;
        }
        if let Some(name) = env_var("CHAIN") {
            config.chain = Chain::from_name(&name)?;
            config.relay_url = config.chain.default_relay_url().to_string();
        }
        if let Some(v) = env_var("RPC_URL_HTTP") {
            config.rpc_url_http = v;
        }
        if let Some(v) = env_var("RPC_URL_WS") {
            config.rpc_url_ws = v;
        }
        config.rpc_url_http_fallback = env_var("RPC_URL_HTTP_FALLBACK");
        if let Some(v) = parse_env::<u64>("MAX_GAS_GWEI")? {
            config.max_gas_gwei = v;
        }
        if let Some(v) = parse_env::<Decimal>("GLOBAL_MIN_PROFIT_USD")? {
            config.global_min_profit_usd = v;
        }
        if let Some(v) = parse_env::<Decimal>("MIN_SWAP_ETH")? {
            config.min_swap_eth = v;
        }
        if let Some(v) = parse_env::<Decimal>("MIN_SWAP_USD")? {
            config.min_swap_usd = v;
        }
        if let Some(v) = env_var("POOL_IDS") {
            config.pool_ids = parse_csv(&v);
        }
        if let Some(v) = env_var("POOLS_FILE") {
            config.pools_file = v;
        }
        if let Some(v) = parse_env::<bool>("ALLOW_RECONSTRUCT_RAW_TX")? {
            config.allow_reconstruct_raw_tx = v;
        }
        if let Some(v) = parse_env::<usize>("MAX_BUNDLES_PER_BLOCK")? {
            config.max_bundles_per_block = v;
        }
        if let Some(v) = parse_env::<u32>("POOL_MAX_FAILURES")? {
            config.pool_max_failures = v;
        }
        if let Some(v) = parse_env::<u64>("POOL_COOLDOWN_MS")? {
            config.pool_cooldown_ms = v;
        }
        if let Some(v) = env_var("FLASHLOAN_PROVIDER_PRIORITY") {
            config.flashloan_provider_priority = parse_csv(&v);
        }
        if let Some(v) = env_var("RELAY_URL") {
            config.relay_url = v;
        }
        if let Some(v) = env_var("ADDITIONAL_RELAY_URLS") {
            config.additional_relay_urls = parse_csv(&v);
        }
        config.relay_signing_key = env_var("RELAY_SIGNING_KEY");
        config.signer_key = env_var("SIGNER_KEY");
        if let Some(v) = env_var("EXECUTOR_ADDRESS") {
            config.executor_address = canonical_address(&v)?;
        }
        if let Some(v) = parse_env::<usize>("MAX_IN_FLIGHT_DECODES")? {
            config.max_in_flight_decodes = v;
        }
        if let Some(v) = parse_env::<u64>("TARGET_BLOCK_TIME_MS")? {
            config.target_block_time_ms = v;
        }
        if let Some(v) = parse_env::<Decimal>("RISK_BUFFER_USD")? {
            config.risk_buffer_usd = v;
        }
        if let Some(v) = parse_env::<u32>("SLIPPAGE_TOLERANCE_BPS")? {
            config.slippage_tolerance_bps = v;
        }
        if let Some(v) = parse_env::<i32>("RANGE_WIDTH_SPACINGS")? {
            config.range_width_spacings = v;
        }
        if let Some(v) = parse_env::<u64>("MAX_PRIORITY_FEE_GWEI")? {
            config.max_priority_fee_gwei = v;
        }
        if let Some(v) = parse_env::<u16>("METRICS_PORT")? {
            config.metrics_port = v;
        }

        config.pool_min_profit_usd = Self::pool_floor_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Collect `POOL_MIN_PROFIT_USD__<pool_id>` overrides.
    fn pool_floor_overrides() -> Result<HashMap<String, Decimal>, JitError> {
        const PREFIX: &str = "POOL_MIN_PROFIT_USD__";
        let mut overrides = HashMap::new();
        for (key, value) in env::vars() {
            if let Some(pool_id) = key.strip_prefix(PREFIX) {
                let floor = value.trim().parse::<Decimal>().map_err(|_| {
                    JitError::Config(format!("cannot parse {key}={value}"))
                })?;
                overrides.insert(pool_id.to_ascii_lowercase(), floor);
            }
        }
        Ok(overrides)
    }

    /// USD profit floor for a pool: the pool override when present, else the
    /// global floor. Decisions always compare against the max of the two.
    pub fn profit_floor(&self, pool_id: &str) -> Decimal {
        let global = self.global_min_profit_usd;
        match self.pool_min_profit_usd.get(&pool_id.to_ascii_lowercase()) {
            Some(pool_floor) => global.max(*pool_floor),
            None => global,
        }
    }

    /// All relay endpoints, primary first.
    pub fn relay_urls(&self) -> Vec<String> {
        let mut urls = vec![self.relay_url.clone()];
        urls.extend(self.additional_relay_urls.iter().cloned());
        urls
    }

    pub fn validate(&self) -> Result<(), JitError> {
        if self.rpc_url_http.is_empty() || self.rpc_url_ws.is_empty() {
            return Err(JitError::Config("rpc endpoints must be set".to_string()));
        }
        if self.max_gas_gwei == 0 {
            return Err(JitError::Config("max_gas_gwei must be positive".to_string()));
        }
        if self.global_min_profit_usd < Decimal::ZERO {
            return Err(JitError::Config(
                "global_min_profit_usd must be non-negative".to_string(),
            ));
        }
        if self.max_bundles_per_block == 0 {
            return Err(JitError::Config(
                "max_bundles_per_block must be at least 1".to_string(),
            ));
        }
        if self.pool_max_failures == 0 {
            return Err(JitError::Config(
                "pool_max_failures must be at least 1".to_string(),
            ));
        }
        if self.max_in_flight_decodes == 0 {
            return Err(JitError::Config(
                "max_in_flight_decodes must be at least 1".to_string(),
            ));
        }
        if self.range_width_spacings <= 0 {
            return Err(JitError::Config(
                "range_width_spacings must be positive".to_string(),
            ));
        }

        if !self.dry_run {
            if !self.live_risk_acknowledged {
                return Err(JitError::Safety(
                    "live mode requires LIVE_RISK_ACKNOWLEDGED=true".to_string(),
                ));
            }
            let signer = self.signer_key.as_deref().unwrap_or("");
            if signer.is_empty() {
                return Err(JitError::Safety(
                    "live mode requires a non-empty signer key".to_string(),
                ));
            }
            if self.executor_address == Address::zero() {
                return Err(JitError::Config(
                    "live mode requires an executor contract address".to_string(),
                ));
            }
            if let Some(relay_key) = self.relay_signing_key.as_deref() {
                if relay_key == signer {
                    return Err(JitError::Safety(
                        "relay signing key must differ from the transaction signer key"
                            .to_string(),
                    ));
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_dry_run_and_valid() {
        let config = JitConfig::default();
        assert!(config.dry_run);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn live_mode_requires_acknowledgment_and_keys() {
        let mut config = JitConfig {
            dry_run: false,
            ..JitConfig::default()
        };
        assert!(matches!(config.validate(), Err(JitError::Safety(_))));

        config.live_risk_acknowledged = true;
        assert!(matches!(config.validate(), Err(JitError::Safety(_))));

        config.signer_key = Some("aa".repeat(32));
        config.executor_address = Address::repeat_byte(0x42);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn matched_signer_and_relay_keys_are_a_safety_violation() {
        let key = "ab".repeat(32);
        let config = JitConfig {
            dry_run: false,
            live_risk_acknowledged: true,
            signer_key: Some(key.clone()),
            relay_signing_key: Some(key),
            executor_address: Address::repeat_byte(0x42),
            ..JitConfig::default()
        };
        assert!(matches!(config.validate(), Err(JitError::Safety(_))));
    }

    #[test]
    fn profit_floor_takes_the_stricter_of_global_and_override() {
        let mut config = JitConfig::default();
        config.global_min_profit_usd = dec!(25);
        config
            .pool_min_profit_usd
            .insert("usdc-weth-500".to_string(), dec!(40));
        config
            .pool_min_profit_usd
            .insert("wbtc-weth-3000".to_string(), dec!(10));

        assert_eq!(config.profit_floor("usdc-weth-500"), dec!(40));
        // Override below the global floor never weakens the gate.
        assert_eq!(config.profit_floor("wbtc-weth-3000"), dec!(25));
        assert_eq!(config.profit_floor("unknown"), dec!(25));
    }

    #[test]
    fn relay_urls_lists_primary_first() {
        let config = JitConfig {
            additional_relay_urls: vec!["https://relay.example".to_string()],
            ..JitConfig::default()
        };
        let urls = config.relay_urls();
        assert_eq!(urls.len(), 2);
        assert_eq!(urls[0], Chain::Ethereum.default_relay_url());
    }
}
