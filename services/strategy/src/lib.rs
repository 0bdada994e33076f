//! # JitFlow Strategy Service
//!
//! The JIT liquidity pipeline: mempool watcher → candidate evaluator →
//! per-block opportunity coordinator → bundle assembler → relay submitter.
//! All inter-component communication is channels; the coordinator is the
//! only writer of pool health, and the assembler is the only holder of the
//! signer key. Dry-run (the default) runs the whole pipeline but never
//! signs with a real key or contacts a relay.

pub mod bundle;
pub mod coordinator;
pub mod decoder;
pub mod evaluator;
pub mod metrics;
pub mod relay;
pub mod replay;
pub mod watcher;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use dashmap::DashMap;
use ethers::providers::{Http, Middleware, Provider, Ws};
use ethers::types::H256;
use futures_util::StreamExt;
use jitflow_config::{load_pool_descriptors, JitConfig};
use jitflow_oracle::{GasOracle, PriceOracle};
use jitflow_state::PoolStateCache;
use jitflow_types::{PendingSwap, PoolDescriptor};
use ::metrics::counter;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{error, info, warn};

use crate::bundle::BundleAssembler;
use crate::coordinator::{CoordinatorEvent, OpportunityCoordinator, PoolEnabledView};
use crate::decoder::PoolIndex;
use crate::evaluator::CandidateEvaluator;
use crate::metrics as telemetry;
use crate::relay::RelaySubmitter;
use crate::replay::ReplayClient;
use crate::watcher::MempoolWatcher;

/// Decode→evaluate channel depth; the oldest candidates are dropped (and
/// counted) when the evaluator lags.
const CANDIDATE_CHANNEL_DEPTH: usize = 256;

/// Evaluate→coordinate channel depth; senders block when full.
const EVENT_CHANNEL_DEPTH: usize = 256;

/// Shutdown drain budget for in-flight work.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

pub struct JitEngine {
    config: Arc<JitConfig>,
}

impl JitEngine {
    pub fn new(config: JitConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    /// Run the pipeline until ctrl-c.
    pub async fn run(self) -> Result<()> {
        let config = self.config.clone();
        info!(
            dry_run = config.dry_run,
            chain = ?config.chain,
            "starting jitflow"
        );

        let descriptors: Vec<Arc<PoolDescriptor>> =
            load_pool_descriptors(&config.pools_file, &config.pool_ids)?
                .into_iter()
                .map(Arc::new)
                .collect();
        info!(pools = descriptors.len(), "monitoring pools");

        let index = Arc::new(PoolIndex::new(
            descriptors.iter().map(|d| (**d).clone()).collect(),
            config.chain.routers(),
        ));

        let http = Arc::new(
            Provider::<Http>::try_from(config.rpc_url_http.as_str())
                .context("http provider")?,
        );
        let http_fallback = match config.rpc_url_http_fallback.as_deref() {
            Some(url) => Some(Arc::new(
                Provider::<Http>::try_from(url).context("fallback http provider")?,
            )),
            None => None,
        };

        // Connectivity probe before anything subscribes.
        let chain_id = http.get_chainid().await.context("chain_id probe")?;
        if chain_id.as_u64() != config.chain.chain_id() {
            anyhow::bail!(
                "rpc chain id {} does not match configured chain {:?}",
                chain_id,
                config.chain
            );
        }
        let start_block = http.get_block_number().await.context("block probe")?.as_u64();
        info!(chain_id = chain_id.as_u64(), block = start_block, "rpc connectivity verified");

        let current_block = Arc::new(AtomicU64::new(start_block));

        let gas_oracle = Arc::new(GasOracle::new(http.clone(), config.max_gas_gwei));
        let price_oracle = Arc::new(PriceOracle::new(http.clone(), config.chain));
        let state_cache = Arc::new(PoolStateCache::new(http.clone()));
        let replay = Arc::new(ReplayClient::new(http.clone()));

        let assembler = Arc::new(BundleAssembler::new(&config, http.clone())?);
        report_wallet_balance(&http, &assembler).await;

        let submitter = Arc::new(RelaySubmitter::new(
            &config,
            replay.clone(),
            current_block.clone(),
        )?);

        let enabled_view = PoolEnabledView::new();
        let replaced: Arc<DashMap<H256, Instant>> = Arc::new(DashMap::new());

        let (candidates_tx, candidates_rx) =
            broadcast::channel::<PendingSwap>(CANDIDATE_CHANNEL_DEPTH);
        let (events_tx, events_rx) = mpsc::channel::<CoordinatorEvent>(EVENT_CHANNEL_DEPTH);
        // Single-slot: the assembler works on one winner at a time.
        let (winners_tx, winners_rx) = mpsc::channel(1);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let watcher = Arc::new(MempoolWatcher::new(
            config.clone(),
            index.clone(),
            enabled_view.clone(),
            http.clone(),
            http_fallback,
            price_oracle.clone(),
            current_block.clone(),
            candidates_tx,
            replaced.clone(),
        ));
        let watcher_task = tokio::spawn(watcher.run(shutdown_rx.clone()));

        let evaluator = Arc::new(CandidateEvaluator::new(
            config.clone(),
            index.clone(),
            enabled_view.clone(),
            state_cache,
            gas_oracle,
            price_oracle,
            Some(replay),
            replaced,
            current_block.clone(),
        ));
        let evaluator_task = tokio::spawn(run_evaluator(
            evaluator,
            candidates_rx,
            events_tx.clone(),
            shutdown_rx.clone(),
        ));

        let coordinator = OpportunityCoordinator::new(
            config.clone(),
            &descriptors,
            enabled_view,
            winners_tx,
            events_tx.clone(),
        );
        let coordinator_task = tokio::spawn(coordinator.run(events_rx, shutdown_rx.clone()));

        let block_task = tokio::spawn(run_block_watcher(
            config.clone(),
            current_block,
            events_tx.clone(),
            shutdown_rx.clone(),
        ));

        let submit_task = tokio::spawn(run_submit_pipeline(
            assembler,
            submitter,
            http.clone(),
            winners_rx,
            events_tx,
            shutdown_rx,
        ));

        tokio::signal::ctrl_c().await.context("signal handler")?;
        info!("shutdown requested, draining in-flight work");
        let _ = shutdown_tx.send(true);

        let drain = async {
            let _ = watcher_task.await;
            let _ = evaluator_task.await;
            let _ = coordinator_task.await;
            let _ = block_task.await;
            let _ = submit_task.await;
        };
        if tokio::time::timeout(SHUTDOWN_GRACE, drain).await.is_err() {
            warn!("drain grace period elapsed, exiting with tasks outstanding");
        }

        info!("jitflow stopped");
        Ok(())
    }

    /// One-shot health report for the `status` subcommand.
    pub async fn status(config: JitConfig) -> Result<()> {
        let descriptors = load_pool_descriptors(&config.pools_file, &config.pool_ids)?;

        println!("jitflow status");
        println!("  chain:          {:?}", config.chain);
        println!("  dry_run:        {}", config.dry_run);
        println!("  relays:         {}", config.relay_urls().len());
        println!("  pools ({}):", descriptors.len());
        for descriptor in &descriptors {
            println!(
                "    {} {} fee={} spacing={}",
                descriptor.pool_id,
                descriptor.symbol_pair(),
                descriptor.fee_tier.as_raw(),
                descriptor.tick_spacing
            );
        }

        let http = Provider::<Http>::try_from(config.rpc_url_http.as_str())
            .context("http provider")?;
        let chain_id = http.get_chainid().await.context("chain_id probe")?;
        let block = http.get_block_number().await.context("block probe")?;
        println!("  rpc:            chain_id={chain_id} block={block}");

        Ok(())
    }
}

/// Consume the candidate stream, evaluating with bounded lag: broadcast
/// semantics drop the oldest entries when the evaluator falls behind.
async fn run_evaluator(
    evaluator: Arc<CandidateEvaluator>,
    mut candidates: broadcast::Receiver<PendingSwap>,
    events: mpsc::Sender<CoordinatorEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            received = candidates.recv() => match received {
                Ok(swap) => {
                    let evaluator = evaluator.clone();
                    let events = events.clone();
                    tokio::spawn(async move {
                        match evaluator.evaluate(swap).await {
                            Ok(opportunity) => {
                                let _ = events
                                    .send(CoordinatorEvent::Opportunity(opportunity))
                                    .await;
                            }
                            Err(failure) => {
                                telemetry::record_rejection(failure.reason.code);
                                let _ = events
                                    .send(CoordinatorEvent::Failure {
                                        pool: failure.pool,
                                        reason: failure.reason,
                                        pool_isolable: failure.pool_isolable,
                                    })
                                    .await;
                            }
                        }
                    });
                }
                Err(broadcast::error::RecvError::Lagged(dropped)) => {
                    counter!(telemetry::CANDIDATES_DROPPED_BACKPRESSURE).increment(dropped);
                    warn!(dropped, "evaluator lagged, oldest candidates dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            _ = shutdown.changed() => break,
        }
    }
    info!("evaluator stopped");
}

/// Track new blocks over the streaming endpoint and feed the coordinator.
async fn run_block_watcher(
    config: Arc<JitConfig>,
    current_block: Arc<AtomicU64>,
    events: mpsc::Sender<CoordinatorEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        if *shutdown.borrow() {
            break;
        }

        let ws = match Provider::<Ws>::connect(&config.rpc_url_ws).await {
            Ok(ws) => ws,
            Err(e) => {
                warn!(error = %e, "block subscription connect failed, retrying");
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_secs(2)) => continue,
                    _ = shutdown.changed() => break,
                }
            }
        };
        let mut stream = match ws.subscribe_blocks().await {
            Ok(stream) => stream,
            Err(e) => {
                warn!(error = %e, "block subscribe failed, retrying");
                continue;
            }
        };

        loop {
            tokio::select! {
                maybe_block = stream.next() => {
                    let Some(block) = maybe_block else { break };
                    let Some(number) = block.number else { continue };
                    let number = number.as_u64();
                    current_block.store(number, Ordering::Relaxed);
                    if events.send(CoordinatorEvent::NewBlock(number)).await.is_err() {
                        return;
                    }
                }
                _ = shutdown.changed() => return,
            }
        }
        warn!("block stream ended, reconnecting");
    }
}

/// Assemble each winner into a bundle and hand it to the submitter.
async fn run_submit_pipeline(
    assembler: Arc<BundleAssembler>,
    submitter: Arc<RelaySubmitter>,
    http: Arc<Provider<Http>>,
    mut winners: mpsc::Receiver<jitflow_types::JitOpportunity>,
    events: mpsc::Sender<CoordinatorEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let opportunity = tokio::select! {
            maybe_winner = winners.recv() => match maybe_winner {
                Some(winner) => winner,
                None => break,
            },
            _ = shutdown.changed() => break,
        };

        let pool = opportunity.pool;
        let bundle = match assembler.assemble(&opportunity).await {
            Ok(bundle) => bundle,
            Err(e) => {
                error!(error = %e, pool = ?pool, "bundle assembly failed");
                let _ = events
                    .send(CoordinatorEvent::SubmissionOutcome {
                        pool,
                        success: false,
                    })
                    .await;
                continue;
            }
        };

        let result = submitter.submit(&bundle).await;
        info!(
            bundle = ?result.bundle_id,
            target_block = result.target_block,
            dry_run = result.dry_run,
            accepted = result.primary.is_some(),
            "submission round complete"
        );

        let _ = events
            .send(CoordinatorEvent::SubmissionOutcome {
                pool,
                success: result.succeeded(),
            })
            .await;
        report_wallet_balance(&http, &assembler).await;
    }
    info!("submit pipeline stopped");
}

async fn report_wallet_balance(http: &Arc<Provider<Http>>, assembler: &Arc<BundleAssembler>) {
    match http.get_balance(assembler.signer_address(), None).await {
        Ok(balance) => {
            let eth = ethers::utils::format_units(balance, "ether")
                .ok()
                .and_then(|formatted| formatted.parse::<f64>().ok())
                .unwrap_or(0.0);
            telemetry::set_wallet_balance(eth);
        }
        Err(e) => warn!(error = %e, "wallet balance read failed"),
    }
}
