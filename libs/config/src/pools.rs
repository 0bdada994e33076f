//! Pool descriptor file loading and address canonicalization.

use std::collections::HashMap;
use std::path::Path;

use ethers::types::Address;
use ethers::utils::to_checksum;
use jitflow_types::{FeeTier, JitError, PoolDescriptor};
use once_cell::sync::Lazy;
use serde::Deserialize;
use tracing::warn;

/// Known-bad token address variants seen in descriptor files in the wild,
/// mapped to the canonical deployment. Currently the deprecated bridged
/// USDC addresses.
static CANONICAL_TOKENS: Lazy<HashMap<Address, Address>> = Lazy::new(|| {
    let mut table = HashMap::new();
    // Polygon: bridged USDC.e -> native USDC
    table.insert(
        parse("0x2791Bca1f2de4661ED88A30C99A7a9449Aa84174"),
        parse("0x3c499c542cEF5E3811e1192ce70d8cC03d5c3359"),
    );
    // Ethereum: pre-migration USDC proxy admin alias -> canonical USDC
    table.insert(
        parse("0xB7277a6e95992041568D9391D09d0122023778A2"),
        parse("0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48"),
    );
    table
});

fn parse(s: &str) -> Address {
    s.parse().expect("hard-coded address parses")
}

/// Parse and canonicalize a token address: checksum-normalize and repair
/// known-bad variants.
pub fn canonical_address(raw: &str) -> Result<Address, JitError> {
    let address: Address = raw
        .trim()
        .parse()
        .map_err(|_| JitError::Config(format!("malformed address: {raw}")))?;
    if let Some(canonical) = CANONICAL_TOKENS.get(&address) {
        warn!(
            bad = %to_checksum(&address, None),
            canonical = %to_checksum(canonical, None),
            "repaired known-bad token address"
        );
        return Ok(*canonical);
    }
    Ok(address)
}

/// One entry of the JSON descriptor file.
#[derive(Debug, Deserialize)]
struct RawPoolDescriptor {
    pool_id: String,
    address: String,
    token0: String,
    token1: String,
    fee: u32,
    #[serde(default)]
    tick_spacing: Option<i32>,
    symbol0: String,
    symbol1: String,
    decimals0: u8,
    decimals1: u8,
}

impl RawPoolDescriptor {
    fn into_descriptor(self) -> Result<PoolDescriptor, JitError> {
        let fee_tier = FeeTier::from_raw(self.fee)?;
        let tick_spacing = fee_tier.tick_spacing();
        if let Some(declared) = self.tick_spacing {
            if declared != tick_spacing {
                return Err(JitError::Config(format!(
                    "pool {}: tick spacing {declared} does not match fee tier {} (expected {tick_spacing})",
                    self.pool_id, self.fee
                )));
            }
        }

        let token0 = canonical_address(&self.token0)?;
        let token1 = canonical_address(&self.token1)?;
        if token0.as_bytes() >= token1.as_bytes() {
            return Err(JitError::Config(format!(
                "pool {}: token0 must precede token1 in byte order",
                self.pool_id
            )));
        }

        Ok(PoolDescriptor {
            pool_id: self.pool_id,
            address: canonical_address(&self.address)?,
            token0,
            token1,
            fee_tier,
            tick_spacing,
            symbol0: self.symbol0,
            symbol1: self.symbol1,
            decimals0: self.decimals0,
            decimals1: self.decimals1,
        })
    }
}

/// Load the descriptor file, keeping only `pool_ids` when the filter is
/// non-empty. Every retained descriptor satisfies the token-ordering
/// invariant.
pub fn load_pool_descriptors(
    path: impl AsRef<Path>,
    pool_ids: &[String],
) -> Result<Vec<PoolDescriptor>, JitError> {
    let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
        JitError::Config(format!(
            "cannot read pool file {}: {e}",
            path.as_ref().display()
        ))
    })?;
    let raw: Vec<RawPoolDescriptor> = serde_json::from_str(&content)
        .map_err(|e| JitError::Config(format!("malformed pool file: {e}")))?;

    let mut descriptors = Vec::new();
    for entry in raw {
        if !pool_ids.is_empty() && !pool_ids.contains(&entry.pool_id) {
            continue;
        }
        descriptors.push(entry.into_descriptor()?);
    }

    if descriptors.is_empty() {
        return Err(JitError::Config(
            "no monitored pools after applying pool_ids filter".to_string(),
        ));
    }

    for id in pool_ids {
        if !descriptors.iter().any(|d| &d.pool_id == id) {
            return Err(JitError::Config(format!(
                "pool_ids references unknown pool: {id}"
            )));
        }
    }

    Ok(descriptors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const POOLS_JSON: &str = r#"[
        {
            "pool_id": "usdc-weth-500",
            "address": "0x88e6A0c2dDD26FEEb64F039a2c41296FcB3f5640",
            "token0": "0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48",
            "token1": "0xC02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2",
            "fee": 500,
            "tick_spacing": 10,
            "symbol0": "USDC",
            "symbol1": "WETH",
            "decimals0": 6,
            "decimals1": 18
        },
        {
            "pool_id": "wbtc-weth-3000",
            "address": "0xCBCdF9626bC03E24f779434178A73a0B4bad62eD",
            "token0": "0x2260FAC5E5542a773Aa44fBCfeDf7C193bc2C599",
            "token1": "0xC02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2",
            "fee": 3000,
            "symbol0": "WBTC",
            "symbol1": "WETH",
            "decimals0": 8,
            "decimals1": 18
        }
    ]"#;

    fn write_pools(json: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(json.as_bytes()).unwrap();
        file
    }

    #[test]
    fn loads_and_filters_descriptors() {
        let file = write_pools(POOLS_JSON);
        let all = load_pool_descriptors(file.path(), &[]).unwrap();
        assert_eq!(all.len(), 2);

        let filtered =
            load_pool_descriptors(file.path(), &["usdc-weth-500".to_string()]).unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].symbol_pair(), "USDC/WETH");
        assert_eq!(filtered[0].tick_spacing, 10);
    }

    #[test]
    fn unknown_pool_id_is_a_config_error() {
        let file = write_pools(POOLS_JSON);
        let result = load_pool_descriptors(file.path(), &["nope".to_string()]);
        assert!(result.is_err());
    }

    #[test]
    fn token_ordering_violation_is_rejected() {
        let swapped = POOLS_JSON
            .replace(
                "\"token0\": \"0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48\"",
                "\"token0\": \"0xC02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2\"",
            )
            .replace(
                "\"token1\": \"0xC02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2\"",
                "\"token1\": \"0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48\"",
            );
        let file = write_pools(&swapped);
        assert!(load_pool_descriptors(file.path(), &[]).is_err());
    }

    #[test]
    fn wrong_tick_spacing_is_rejected() {
        let wrong = POOLS_JSON.replace("\"tick_spacing\": 10", "\"tick_spacing\": 60");
        let file = write_pools(&wrong);
        assert!(load_pool_descriptors(file.path(), &[]).is_err());
    }

    #[test]
    fn known_bad_usdc_variant_is_repaired() {
        let repaired = canonical_address("0x2791Bca1f2de4661ED88A30C99A7a9449Aa84174").unwrap();
        assert_eq!(
            repaired,
            "0x3c499c542cEF5E3811e1192ce70d8cC03d5c3359"
                .parse::<Address>()
                .unwrap()
        );

        let untouched = canonical_address("0xC02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2").unwrap();
        assert_eq!(
            untouched,
            "0xC02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2"
                .parse::<Address>()
                .unwrap()
        );
    }
}
