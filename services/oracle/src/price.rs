//! USD price oracle: Chainlink-style feeds with staleness rejection and a
//! hard-coded fallback table.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use ethers::contract::abigen;
use ethers::providers::Middleware;
use ethers::types::Address;
use futures::future::join_all;
use jitflow_config::Chain;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::OracleError;

abigen!(
    IChainlinkAggregator,
    r#"[
        function latestRoundData() external view returns (uint80 roundId, int256 answer, uint256 startedAt, uint256 updatedAt, uint80 answeredInRound)
        function decimals() external view returns (uint8)
    ]"#
);

/// Quotes are cached this long.
const PRICE_TTL: Duration = Duration::from_secs(60);

/// Feed answers older than this are rejected in favor of the fallback.
const MAX_FEED_AGE: Duration = Duration::from_secs(3_600);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriceSource {
    Feed,
    Fallback,
}

/// A USD quote, 8 decimal places.
#[derive(Debug, Clone)]
pub struct PriceQuote {
    pub value: Decimal,
    pub source: PriceSource,
    pub confidence: f64,
    pub fetched_at: Instant,
}

/// Price oracle over Chainlink-style aggregators.
///
/// Feed values that are non-positive or older than an hour are rejected
/// with a warning and the hard-coded fallback table answers instead.
pub struct PriceOracle<M> {
    provider: Arc<M>,
    feeds: HashMap<Address, Address>,
    fallback: HashMap<Address, Decimal>,
    cache: RwLock<HashMap<Address, PriceQuote>>,
}

impl<M: Middleware + 'static> PriceOracle<M> {
    pub fn new(provider: Arc<M>, chain: Chain) -> Self {
        let mut feeds = HashMap::new();
        let mut fallback = HashMap::new();

        feeds.insert(chain.wrapped_native(), chain.native_usd_feed());

        // Conservative static quotes used only when the feed is rejected.
        match chain {
            Chain::Ethereum => {
                fallback.insert(chain.wrapped_native(), dec!(2500));
                fallback.insert(addr("0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48"), dec!(1)); // USDC
                fallback.insert(addr("0xdAC17F958D2ee523a2206206994597C13D831ec7"), dec!(1)); // USDT
                fallback.insert(addr("0x6B175474E89094C44Da98b954EedeAC495271d0F"), dec!(1)); // DAI
            }
            Chain::Polygon => {
                // Bridged WETH prices off the ETH/USD feed.
                feeds.insert(
                    addr("0x7ceB23fD6bC0adD59E62ac25578270cFf1b9f619"),
                    chain.eth_usd_feed(),
                );
                fallback.insert(chain.wrapped_native(), dec!(0.40));
                fallback.insert(addr("0x3c499c542cEF5E3811e1192ce70d8cC03d5c3359"), dec!(1)); // USDC
                fallback.insert(addr("0xc2132D05D31c914a87C6611C10748AEb04B58e8F"), dec!(1)); // USDT
            }
        }

        Self {
            provider,
            feeds,
            fallback,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Register an extra feed, e.g. from pool descriptors.
    pub fn add_feed(&mut self, token: Address, feed: Address) {
        self.feeds.insert(token, feed);
    }

    /// USD quote for `token`: cache → feed → fallback table.
    pub async fn price_usd(&self, token: Address) -> Result<PriceQuote, OracleError> {
        {
            let cache = self.cache.read().await;
            if let Some(quote) = cache.get(&token) {
                if quote.fetched_at.elapsed() <= PRICE_TTL {
                    return Ok(quote.clone());
                }
            }
        }

        let quote = match self.read_feed(token).await {
            Ok(quote) => quote,
            Err(e) => {
                let fallback = self.fallback.get(&token).ok_or_else(|| {
                    OracleError::NoPriceSource(format!("{token:?} ({e})"))
                })?;
                warn!(token = ?token, error = %e, price = %fallback, "feed rejected, using fallback quote");
                PriceQuote {
                    value: *fallback,
                    source: PriceSource::Fallback,
                    confidence: 0.5,
                    fetched_at: Instant::now(),
                }
            }
        };

        let mut cache = self.cache.write().await;
        cache.insert(token, quote.clone());
        Ok(quote)
    }

    /// Concurrent quotes for a batch; misses are dropped from the map.
    pub async fn prices_usd(&self, tokens: &[Address]) -> HashMap<Address, PriceQuote> {
        let lookups = tokens.iter().map(|token| async move {
            (*token, self.price_usd(*token).await)
        });
        join_all(lookups)
            .await
            .into_iter()
            .filter_map(|(token, result)| match result {
                Ok(quote) => Some((token, quote)),
                Err(e) => {
                    debug!(token = ?token, error = %e, "batch price miss");
                    None
                }
            })
            .collect()
    }

    async fn read_feed(&self, token: Address) -> Result<PriceQuote, OracleError> {
        let feed = self
            .feeds
            .get(&token)
            .ok_or_else(|| OracleError::NoPriceSource(format!("{token:?}")))?;

        let aggregator = IChainlinkAggregator::new(*feed, self.provider.clone());
        let (_, answer, _, updated_at, _) = aggregator
            .latest_round_data()
            .call()
            .await
            .map_err(|e| OracleError::Rpc(format!("latestRoundData: {e}")))?;
        let feed_decimals = aggregator
            .decimals()
            .call()
            .await
            .map_err(|e| OracleError::Rpc(format!("feed decimals: {e}")))?;

        if answer.is_negative() || answer.is_zero() {
            return Err(OracleError::FeedRejected(format!(
                "non-positive answer {answer}"
            )));
        }
        let answer = i128::try_from(answer)
            .map_err(|_| OracleError::FeedRejected(format!("answer out of range: {answer}")))?;

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let age = now.saturating_sub(updated_at.min(u64::MAX.into()).as_u64());
        if age > MAX_FEED_AGE.as_secs() {
            return Err(OracleError::FeedRejected(format!("stale by {age}s")));
        }

        // Largest mantissa a Decimal can carry (2^96 - 1).
        const MAX_MANTISSA: i128 = 79_228_162_514_264_337_593_543_950_335;
        if answer > MAX_MANTISSA {
            return Err(OracleError::FeedRejected(format!(
                "answer out of range: {answer}"
            )));
        }
        let value = Decimal::from_i128_with_scale(answer, (feed_decimals as u32).min(28))
            .round_dp(8);

        Ok(PriceQuote {
            value,
            source: PriceSource::Feed,
            confidence: if age < 60 { 1.0 } else { 0.8 },
            fetched_at: Instant::now(),
        })
    }
}

fn addr(s: &str) -> Address {
    s.parse().expect("hard-coded address parses")
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::providers::{MockProvider, Provider};

    fn oracle() -> PriceOracle<Provider<MockProvider>> {
        let (provider, _mock) = Provider::mocked();
        PriceOracle::new(Arc::new(provider), Chain::Ethereum)
    }

    #[tokio::test]
    async fn unknown_token_without_fallback_errors() {
        let oracle = oracle();
        let result = oracle.price_usd(Address::repeat_byte(0x99)).await;
        assert!(matches!(result, Err(OracleError::NoPriceSource(_))));
    }

    #[tokio::test]
    async fn stablecoin_falls_back_to_unit_price() {
        let oracle = oracle();
        // USDC has no feed configured; the mocked provider cannot answer
        // one either, so the fallback table must serve.
        let usdc: Address = "0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48"
            .parse()
            .unwrap();
        let quote = oracle.price_usd(usdc).await.unwrap();
        assert_eq!(quote.value, dec!(1));
        assert_eq!(quote.source, PriceSource::Fallback);
    }
}
