//! Per-chain routing and oracle-feed addresses.

use ethers::types::Address;
use jitflow_types::JitError;

fn addr(s: &str) -> Address {
    s.parse().expect("hard-coded address parses")
}

/// Supported chains. Selecting a chain fixes the router set, the wrapped
/// native token, and the USD price feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Chain {
    Ethereum,
    Polygon,
}

impl Chain {
    pub fn from_name(name: &str) -> Result<Self, JitError> {
        match name.to_ascii_lowercase().as_str() {
            "ethereum" | "mainnet" => Ok(Chain::Ethereum),
            "polygon" => Ok(Chain::Polygon),
            other => Err(JitError::Config(format!("unsupported chain: {other}"))),
        }
    }

    pub fn chain_id(&self) -> u64 {
        match self {
            Chain::Ethereum => 1,
            Chain::Polygon => 137,
        }
    }

    /// Swap routers whose calldata the watcher decodes.
    pub fn routers(&self) -> Vec<Address> {
        match self {
            Chain::Ethereum => vec![
                // SwapRouter and SwapRouter02
                addr("0xE592427A0AEce92De3Edee1F18E0157C05861564"),
                addr("0x68b3465833fb72A70ecDF485E0e4C7bD8665Fc45"),
            ],
            Chain::Polygon => vec![
                addr("0xE592427A0AEce92De3Edee1F18E0157C05861564"),
                addr("0x68b3465833fb72A70ecDF485E0e4C7bD8665Fc45"),
            ],
        }
    }

    pub fn wrapped_native(&self) -> Address {
        match self {
            Chain::Ethereum => addr("0xC02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2"),
            Chain::Polygon => addr("0x0d500B1d8E8eF31E21C99d1Db9A6444d3ADf1270"),
        }
    }

    /// Chainlink native-asset/USD aggregator.
    pub fn native_usd_feed(&self) -> Address {
        match self {
            Chain::Ethereum => addr("0x5f4eC3Df9cbd43714FE2740f5E3616155c5b8419"),
            Chain::Polygon => addr("0xAB594600376Ec9fD91F8e885dADF0CE036862dE0"),
        }
    }

    /// Chainlink ETH/USD aggregator (distinct from the native feed on
    /// non-Ethereum chains).
    pub fn eth_usd_feed(&self) -> Address {
        match self {
            Chain::Ethereum => addr("0x5f4eC3Df9cbd43714FE2740f5E3616155c5b8419"),
            Chain::Polygon => addr("0xF9680D99D6C9589e2a93a78A04A279e509205945"),
        }
    }

    pub fn default_relay_url(&self) -> &'static str {
        match self {
            Chain::Ethereum => "https://relay.flashbots.net",
            Chain::Polygon => "https://api.polygon.flashbots.net",
        }
    }
}
