use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::stream::{self, StreamExt};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::analysis::ImbalanceAnalyzer;
use crate::client::{RateLimitedClient, RateLimiter, ReqwestTransport, RetryPolicy, Transport};
use crate::config::Config;
use crate::db::ScanStore;
use crate::error::{AppError, Result};
use crate::sources::{HolderSource, MarketHolders, MarketSource, PnlCache, PnlResolver, WarningLog};
use crate::types::{
    HolderPosition, Market, MarketSkip, MarketStage, RunId, RunStatus, RunSummary, ScanParams,
    WalletPnl,
};

/// Connection settings for the upstream sources. Clients and limiters are
/// built from these at the start of every run; the holder and PNL sources
/// share a host but each gets its own token bucket.
#[derive(Clone)]
pub struct Upstreams {
    pub gamma_url: String,
    pub data_url: String,
    pub gamma_transport: Arc<dyn Transport>,
    pub data_transport: Arc<dyn Transport>,
    pub gamma_rps: f64,
    pub data_rps: f64,
    pub pnl_rps: f64,
    pub retry: RetryPolicy,
    pub timeout: Duration,
}

impl Upstreams {
    pub fn from_config(cfg: &Config) -> Result<Self> {
        let transport: Arc<dyn Transport> = Arc::new(ReqwestTransport::new(cfg.http_timeout)?);
        Ok(Self {
            gamma_url: cfg.gamma_api_url.clone(),
            data_url: cfg.data_api_url.clone(),
            gamma_transport: transport.clone(),
            data_transport: transport,
            gamma_rps: cfg.gamma_rps,
            data_rps: cfg.data_rps,
            pnl_rps: cfg.pnl_rps,
            retry: cfg.retry.clone(),
            timeout: cfg.http_timeout,
        })
    }

    fn client(&self, source: &str, base_url: &str, transport: &Arc<dyn Transport>, rps: f64) -> Arc<RateLimitedClient> {
        let burst = rps.ceil().max(1.0) as u32;
        Arc::new(RateLimitedClient::new(
            source,
            base_url,
            transport.clone(),
            RateLimiter::new(source, rps, burst),
            self.retry.clone(),
            self.timeout,
        ))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Initializing,
    FetchingMarkets,
    ProcessingMarkets,
    Completed,
    Aborted,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    pub run_id: RunId,
    pub status: RunStatus,
    pub summary: RunSummary,
}

impl RunOutcome {
    pub fn succeeded(&self) -> bool {
        self.status == RunStatus::Completed
    }
}

enum MarketOutcome {
    Analyzed { market_id: String, flagged: bool },
    Skipped(MarketSkip),
    Cancelled,
    /// Persisting the market failed; the run cannot continue.
    StoreFailed(AppError),
}

/// Everything one run owns. Built fresh per run so no cache or token budget
/// leaks between runs.
struct RunContext {
    run_id: RunId,
    params: ScanParams,
    store: ScanStore,
    markets: MarketSource,
    holders: HolderSource,
    pnl: PnlResolver,
    analyzer: ImbalanceAnalyzer,
    warnings: Arc<WarningLog>,
}

/// Drives one scan: markets, holders, PNL, verdicts, persistence.
pub struct ScanOrchestrator {
    params: ScanParams,
    store: ScanStore,
    upstreams: Upstreams,
    page_size: Option<usize>,
}

impl ScanOrchestrator {
    pub fn new(params: ScanParams, store: ScanStore, upstreams: Upstreams) -> Self {
        Self {
            params,
            store,
            upstreams,
            page_size: None,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = Some(page_size);
        self
    }

    /// Run one scan to completion or abort.
    ///
    /// Only a failure to start the run record is returned as `Err`. Everything
    /// after that ends in a persisted `Completed` or `Aborted` run.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<RunOutcome> {
        let started = Instant::now();
        let mut state = RunState::Initializing;
        self.params.validate()?;
        let ctx = self.context(self.store.begin_run(&self.params).await?);
        let run_id = ctx.run_id;
        info!(
            run_id,
            min_liquidity = self.params.min_liquidity,
            max_concurrency = self.params.max_concurrency,
            basis = %self.params.pnl_basis,
            "[RUN] started"
        );

        transition(run_id, &mut state, RunState::FetchingMarkets);
        let mut summary = RunSummary::default();
        let mut fatal: Option<String> = None;
        let mut cancelled = false;

        {
            let checkpoint = shutdown.clone();
            let ctx_ref = &ctx;
            let checkpoint_ref = &checkpoint;
            let limit = self.params.max_markets.unwrap_or(usize::MAX);

            let mut results = std::pin::pin!(ctx
                .markets
                .list_active_markets(self.params.min_liquidity)
                .take(limit)
                .map(move |item| async move {
                    match item {
                        Ok(market) => Ok(ctx_ref.process_market(market, checkpoint_ref).await),
                        Err(e) => Err(e),
                    }
                })
                .buffer_unordered(self.params.max_concurrency.max(1)));

            loop {
                let next = tokio::select! {
                    biased;
                    _ = wait_for_cancel(&mut shutdown) => {
                        cancelled = true;
                        break;
                    }
                    next = results.next() => next,
                };
                let Some(result) = next else { break };

                if state == RunState::FetchingMarkets {
                    transition(run_id, &mut state, RunState::ProcessingMarkets);
                }

                match result {
                    Err(e) => {
                        error!(run_id, "[RUN] market list unavailable: {e}");
                        fatal = Some(format!("market list fetch failed: {e}"));
                        break;
                    }
                    Ok(MarketOutcome::Analyzed { market_id, flagged }) => {
                        summary.markets_attempted += 1;
                        summary.markets_analyzed += 1;
                        if flagged {
                            summary.markets_flagged += 1;
                        }
                        debug!(run_id, market_id = %market_id, flagged, "[RUN] market done");
                    }
                    Ok(MarketOutcome::Skipped(skip)) => {
                        summary.markets_attempted += 1;
                        summary.markets_skipped += 1;
                        summary.skips.push(skip);
                    }
                    Ok(MarketOutcome::Cancelled) => {
                        cancelled = true;
                        break;
                    }
                    Ok(MarketOutcome::StoreFailed(e)) => {
                        summary.markets_attempted += 1;
                        error!(run_id, "[RUN] store write failed: {e}");
                        fatal = Some(format!("store write failed: {e}"));
                        break;
                    }
                }
            }
        }

        let pnl_stats = ctx.pnl.stats();
        summary.unresolved_wallets = pnl_stats.unresolved as u32;
        summary.warnings = ctx.warnings.snapshot();
        info!(
            run_id,
            lookups = pnl_stats.lookups,
            upstream_calls = pnl_stats.upstream_calls,
            cache_hits = pnl_stats.cache_hits,
            unresolved = pnl_stats.unresolved,
            "[PNL] cache stats"
        );

        if fatal.is_none() {
            if let Err(e) = ctx.store.record_warnings(run_id, &summary.warnings).await {
                fatal = Some(format!("failed to record warnings: {e}"));
            }
        }

        let abort_reason = match (fatal, cancelled) {
            (Some(reason), _) => Some(reason),
            (None, true) => Some(AppError::Cancelled.to_string()),
            (None, false) => None,
        };

        let status = match abort_reason {
            Some(reason) => {
                warn!(run_id, "[RUN] aborting: {reason}");
                ctx.store.abort_run(run_id, &summary, &reason).await?;
                transition(run_id, &mut state, RunState::Aborted);
                RunStatus::Aborted
            }
            None => {
                ctx.store.complete_run(run_id, &summary).await?;
                transition(run_id, &mut state, RunState::Completed);
                RunStatus::Completed
            }
        };

        info!(
            run_id,
            status = %status,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "[RUN] finished: attempted={} analyzed={} skipped={} flagged={} unresolved_wallets={} warnings={}",
            summary.markets_attempted,
            summary.markets_analyzed,
            summary.markets_skipped,
            summary.markets_flagged,
            summary.unresolved_wallets,
            summary.warnings.len(),
        );

        Ok(RunOutcome {
            run_id,
            status,
            summary,
        })
    }

    fn context(&self, run_id: RunId) -> RunContext {
        let up = &self.upstreams;
        let gamma = up.client("gamma", &up.gamma_url, &up.gamma_transport, up.gamma_rps);
        let holders = up.client("data-api", &up.data_url, &up.data_transport, up.data_rps);
        let pnl = up.client("pnl", &up.data_url, &up.data_transport, up.pnl_rps);
        let warnings = Arc::new(WarningLog::new());

        let mut markets = MarketSource::new(gamma, warnings.clone());
        if let Some(page_size) = self.page_size {
            markets = markets.with_page_size(page_size);
        }

        RunContext {
            run_id,
            params: self.params.clone(),
            store: self.store.clone(),
            markets,
            holders: HolderSource::new(holders, warnings.clone()),
            pnl: PnlResolver::new(pnl, Arc::new(PnlCache::new()), self.params.pnl_basis)
                .with_warnings(warnings.clone()),
            analyzer: ImbalanceAnalyzer::from_params(&self.params),
            warnings,
        }
    }
}

impl RunContext {
    async fn process_market(&self, market: Market, shutdown: &watch::Receiver<bool>) -> MarketOutcome {
        if *shutdown.borrow() {
            return MarketOutcome::Cancelled;
        }
        self.enter(&market.id, MarketStage::FetchingHolders);
        let holders = match self
            .holders
            .market_holders(&market, self.params.top_holder_limit)
            .await
        {
            Ok(h) => h,
            Err(e) => return self.skip(&market.id, MarketStage::FetchingHolders, e).await,
        };

        if *shutdown.borrow() {
            return MarketOutcome::Cancelled;
        }
        self.enter(&market.id, MarketStage::ResolvingPnl);
        let resolved = self.resolve_wallets(&holders).await;

        if *shutdown.borrow() {
            return MarketOutcome::Cancelled;
        }
        self.enter(&market.id, MarketStage::Analyzing);
        let pick = |positions: &[HolderPosition]| -> Vec<WalletPnl> {
            positions
                .iter()
                .filter_map(|p| {
                    resolved.get(&p.wallet).map(|&pnl| WalletPnl {
                        wallet: p.wallet.clone(),
                        pnl,
                    })
                })
                .collect()
        };
        let verdict = self.analyzer.evaluate(
            &market.id,
            &holders.yes,
            &pick(&holders.yes),
            &holders.no,
            &pick(&holders.no),
        );

        self.enter(&market.id, MarketStage::Persisting);
        let all_holders: Vec<_> = holders.yes.iter().chain(&holders.no).cloned().collect();
        if let Err(e) = self
            .store
            .record_analyzed_market(self.run_id, &market, &all_holders, &resolved, &verdict)
            .await
        {
            return MarketOutcome::StoreFailed(e);
        }

        if verdict.is_flagged {
            info!(
                run_id = self.run_id,
                market_id = %market.id,
                side = ?verdict.flagged_side,
                score = verdict.imbalance_score,
                "[FLAG] {}",
                market.question
            );
        }
        MarketOutcome::Analyzed {
            market_id: market.id,
            flagged: verdict.is_flagged,
        }
    }

    fn enter(&self, market_id: &str, stage: MarketStage) {
        debug!(run_id = self.run_id, market_id, stage = %stage, "[MARKET] stage");
    }

    /// Record a per-market failure from inside the market task.
    async fn skip(&self, market_id: &str, stage: MarketStage, e: AppError) -> MarketOutcome {
        warn!(run_id = self.run_id, market_id, stage = %stage, "[MARKET] skipped: {e}");
        let skip = MarketSkip {
            market_id: market_id.to_string(),
            stage,
            reason: format!("{}: {e}", e.kind()),
        };
        match self.store.record_skip(self.run_id, &skip).await {
            Ok(()) => MarketOutcome::Skipped(skip),
            Err(e) => MarketOutcome::StoreFailed(e),
        }
    }

    /// Resolve every distinct wallet of the market. Failed lookups are left
    /// out of the returned map and count as unresolved.
    async fn resolve_wallets(&self, holders: &MarketHolders) -> HashMap<String, f64> {
        let wallets: HashSet<&str> = holders
            .yes
            .iter()
            .chain(&holders.no)
            .map(|h| h.wallet.as_str())
            .collect();

        stream::iter(wallets)
            .map(|wallet| self.pnl.resolve(wallet))
            .buffer_unordered(self.params.max_concurrency.max(1))
            .filter_map(|r| async move { r.ok() })
            .map(|p| (p.wallet, p.pnl))
            .collect()
            .await
    }
}

fn transition(run_id: RunId, state: &mut RunState, next: RunState) {
    info!(run_id, from = ?*state, to = ?next, "[RUN] state change");
    *state = next;
}

/// Resolves once the shutdown flag is set. A dropped sender never cancels.
async fn wait_for_cancel(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow() {
            return;
        }
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
