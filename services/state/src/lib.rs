//! # JitFlow Pool-State Cache
//!
//! Short-TTL snapshots of monitored pools. A 1 s TTL keeps decisions on
//! same-block state with high probability while amortizing the six RPC
//! reads across bursts of candidates arriving in the same block window.
//! Concurrent misses for one pool coalesce into a single fan-out behind a
//! per-pool mutex; there is no background refresh.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use ethers::abi::{parse_abi, Abi};
use ethers::contract::{Contract, ContractError};
use ethers::providers::Middleware;
use ethers::types::{Address, U256};
use jitflow_types::PoolState;
use once_cell::sync::Lazy;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

static POOL_ABI: Lazy<Abi> = Lazy::new(|| {
    parse_abi(&[
        "function slot0() external view returns (uint160, int24, uint16, uint16, uint16, uint8, bool)",
        "function liquidity() external view returns (uint128)",
        "function fee() external view returns (uint24)",
        "function tickSpacing() external view returns (int24)",
        "function feeGrowthGlobal0X128() external view returns (uint256)",
        "function feeGrowthGlobal1X128() external view returns (uint256)",
        "function token0() external view returns (address)",
        "function token1() external view returns (address)",
    ])
    .expect("pool abi parses")
});

static ERC20_ABI: Lazy<Abi> = Lazy::new(|| {
    parse_abi(&["function decimals() external view returns (uint8)"]).expect("erc20 abi parses")
});

/// Snapshot TTL: decisions must not use anything older.
pub const STATE_TTL: Duration = Duration::from_secs(1);

/// Token decimals are immutable; cache them for an hour anyway so a bad
/// read self-heals.
const DECIMALS_TTL: Duration = Duration::from_secs(3_600);

const DEFAULT_DECIMALS: u8 = 18;

#[derive(Error, Debug, Clone)]
pub enum StateError {
    #[error("rpc failure for pool {pool:?}: {message}")]
    Rpc { pool: Address, message: String },

    #[error("address {0:?} does not answer pool calls")]
    NotAPool(Address),
}

#[derive(Debug, Clone)]
struct TokenMeta {
    decimals: u8,
    fetched_at: Instant,
}

/// TTL cache of pool snapshots with per-pool miss coalescing.
pub struct PoolStateCache<M> {
    provider: Arc<M>,
    ttl: Duration,
    states: DashMap<Address, PoolState>,
    refresh_locks: DashMap<Address, Arc<Mutex<()>>>,
    token_meta: DashMap<Address, TokenMeta>,
    /// Pools whose token metadata was already pulled.
    seen_pools: DashMap<Address, ()>,
}

impl<M: Middleware + 'static> PoolStateCache<M> {
    pub fn new(provider: Arc<M>) -> Self {
        Self::with_ttl(provider, STATE_TTL)
    }

    pub fn with_ttl(provider: Arc<M>, ttl: Duration) -> Self {
        Self {
            provider,
            ttl,
            states: DashMap::new(),
            refresh_locks: DashMap::new(),
            token_meta: DashMap::new(),
            seen_pools: DashMap::new(),
        }
    }

    /// A snapshot of `pool` no older than the TTL, refreshing on miss.
    pub async fn get(&self, pool: Address) -> Result<PoolState, StateError> {
        if let Some(state) = self.fresh(pool) {
            return Ok(state);
        }

        let lock = self
            .refresh_locks
            .entry(pool)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        // Whoever held the lock first may have refreshed already.
        if let Some(state) = self.fresh(pool) {
            return Ok(state);
        }

        let state = self.fetch(pool).await?;
        self.states.insert(pool, state.clone());

        if self.seen_pools.insert(pool, ()).is_none() {
            self.prime_token_metadata(pool).await;
        }

        Ok(state)
    }

    /// Concurrent best-effort fan-out; misses carry their reason.
    pub async fn get_many(
        &self,
        pools: &[Address],
    ) -> (HashMap<Address, PoolState>, HashMap<Address, StateError>) {
        let lookups = pools
            .iter()
            .map(|pool| async move { (*pool, self.get(*pool).await) });
        let mut states = HashMap::new();
        let mut misses = HashMap::new();
        for (pool, result) in futures::future::join_all(lookups).await {
            match result {
                Ok(state) => {
                    states.insert(pool, state);
                }
                Err(e) => {
                    misses.insert(pool, e);
                }
            }
        }
        (states, misses)
    }

    /// Force a refresh on next access, for one pool or all of them.
    pub fn invalidate(&self, pool: Option<Address>) {
        match pool {
            Some(pool) => {
                self.states.remove(&pool);
            }
            None => self.states.clear(),
        }
    }

    /// Cached token decimals, defaulting to 18 with a warning when the
    /// token never answered.
    pub async fn token_decimals(&self, token: Address) -> u8 {
        if let Some(meta) = self.token_meta.get(&token) {
            if meta.fetched_at.elapsed() <= DECIMALS_TTL {
                return meta.decimals;
            }
        }

        let contract = Contract::new(token, ERC20_ABI.clone(), self.provider.clone());
        let call = match contract.method::<_, u8>("decimals", ()) {
            Ok(call) => call,
            Err(e) => {
                warn!(token = ?token, error = %e, "decimals call encoding failed, assuming 18");
                return DEFAULT_DECIMALS;
            }
        };
        match call.call().await {
            Ok(decimals) => {
                self.token_meta.insert(
                    token,
                    TokenMeta {
                        decimals,
                        fetched_at: Instant::now(),
                    },
                );
                decimals
            }
            Err(e) => {
                warn!(token = ?token, error = %e, "decimals read failed, assuming 18");
                DEFAULT_DECIMALS
            }
        }
    }

    /// Fresh snapshot if one exists, without touching the RPC. The cheap
    /// pre-screening gate uses this.
    pub fn peek(&self, pool: Address) -> Option<PoolState> {
        self.fresh(pool)
    }

    fn fresh(&self, pool: Address) -> Option<PoolState> {
        self.states
            .get(&pool)
            .filter(|state| state.is_fresh(self.ttl))
            .map(|state| state.clone())
    }

    async fn fetch(&self, pool: Address) -> Result<PoolState, StateError> {
        let contract = Contract::new(pool, POOL_ABI.clone(), self.provider.clone());

        type Slot0 = (U256, i32, u16, u16, u16, u8, bool);
        let call = |name: &str| contract.method::<_, U256>(name, ());

        let slot0_call = contract
            .method::<_, Slot0>("slot0", ())
            .map_err(|e| abi_bug(pool, &e))?;
        let liquidity_call = contract
            .method::<_, u128>("liquidity", ())
            .map_err(|e| abi_bug(pool, &e))?;
        let fee_call = contract
            .method::<_, u32>("fee", ())
            .map_err(|e| abi_bug(pool, &e))?;
        let spacing_call = contract
            .method::<_, i32>("tickSpacing", ())
            .map_err(|e| abi_bug(pool, &e))?;
        let growth0_call = call("feeGrowthGlobal0X128").map_err(|e| abi_bug(pool, &e))?;
        let growth1_call = call("feeGrowthGlobal1X128").map_err(|e| abi_bug(pool, &e))?;

        let (slot0, liquidity, _fee, _spacing, growth0, growth1) = tokio::try_join!(
            slot0_call.call(),
            liquidity_call.call(),
            fee_call.call(),
            spacing_call.call(),
            growth0_call.call(),
            growth1_call.call(),
        )
        .map_err(|e| classify(pool, e))?;

        let (sqrt_price_x96, tick, ..) = slot0;
        debug!(pool = ?pool, tick, "pool state refreshed");

        Ok(PoolState {
            sqrt_price_x96,
            tick,
            liquidity,
            fee_growth_global0_x128: growth0,
            fee_growth_global1_x128: growth1,
            fetched_at: Instant::now(),
        })
    }

    /// First sight of a pool: pull token addresses and their decimals so
    /// later evaluation never blocks on metadata.
    async fn prime_token_metadata(&self, pool: Address) {
        let contract = Contract::new(pool, POOL_ABI.clone(), self.provider.clone());
        let calls = contract
            .method::<_, Address>("token0", ())
            .and_then(|t0| Ok((t0, contract.method::<_, Address>("token1", ())?)));
        let (token0_call, token1_call) = match calls {
            Ok(calls) => calls,
            Err(e) => {
                warn!(pool = ?pool, error = %e, "token metadata call encoding failed");
                return;
            }
        };
        match tokio::try_join!(token0_call.call(), token1_call.call()) {
            Ok((token0, token1)) => {
                self.token_decimals(token0).await;
                self.token_decimals(token1).await;
            }
            Err(e) => {
                warn!(pool = ?pool, error = %e, "token metadata prime failed");
            }
        }
    }

    #[cfg(test)]
    fn insert_for_test(&self, pool: Address, state: PoolState) {
        self.states.insert(pool, state);
    }
}

fn abi_bug(pool: Address, e: &ethers::abi::AbiError) -> StateError {
    // Only reachable if the static ABI and a method name diverge.
    StateError::Rpc {
        pool,
        message: format!("abi: {e}"),
    }
}

fn classify<M: Middleware>(pool: Address, e: ContractError<M>) -> StateError {
    match e {
        ContractError::Revert(_) => StateError::NotAPool(pool),
        other => StateError::Rpc {
            pool,
            message: other.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::providers::{MockProvider, Provider};

    fn cache() -> PoolStateCache<Provider<MockProvider>> {
        let (provider, _mock) = Provider::mocked();
        PoolStateCache::new(Arc::new(provider))
    }

    fn state(age: Duration) -> PoolState {
        PoolState {
            sqrt_price_x96: U256::one() << 96,
            tick: 0,
            liquidity: 10u128.pow(18),
            fee_growth_global0_x128: U256::zero(),
            fee_growth_global1_x128: U256::zero(),
            fetched_at: Instant::now() - age,
        }
    }

    #[tokio::test]
    async fn fresh_entry_served_without_rpc() {
        let cache = cache();
        let pool = Address::repeat_byte(0x11);
        cache.insert_for_test(pool, state(Duration::ZERO));

        // The mocked provider has no queued responses; a fetch would error.
        let fetched = cache.get(pool).await.unwrap();
        assert_eq!(fetched.tick, 0);
    }

    #[tokio::test]
    async fn stale_entry_forces_refresh() {
        let cache = cache();
        let pool = Address::repeat_byte(0x11);
        cache.insert_for_test(pool, state(Duration::from_secs(5)));

        // Refresh hits the mocked provider, which cannot answer.
        assert!(cache.get(pool).await.is_err());
    }

    #[tokio::test]
    async fn invalidate_drops_fresh_entries() {
        let cache = cache();
        let pool = Address::repeat_byte(0x11);
        cache.insert_for_test(pool, state(Duration::ZERO));
        cache.invalidate(Some(pool));
        assert!(cache.get(pool).await.is_err());

        cache.insert_for_test(pool, state(Duration::ZERO));
        cache.invalidate(None);
        assert!(cache.get(pool).await.is_err());
    }

    #[tokio::test]
    async fn get_many_reports_misses_per_pool() {
        let cache = cache();
        let fresh_pool = Address::repeat_byte(0x11);
        let missing_pool = Address::repeat_byte(0x22);
        cache.insert_for_test(fresh_pool, state(Duration::ZERO));

        let (states, misses) = cache.get_many(&[fresh_pool, missing_pool]).await;
        assert!(states.contains_key(&fresh_pool));
        assert!(misses.contains_key(&missing_pool));
    }
}
