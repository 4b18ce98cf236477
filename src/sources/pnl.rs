use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use serde::Deserialize;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use super::{lenient_f64, WarningLog};
use crate::client::RateLimitedClient;
use crate::config::{POSITIONS_MAX_PAGES, POSITIONS_PAGE_LIMIT};
use crate::error::{AppError, Result};
use crate::types::{PnlBasis, WalletPnl};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPosition {
    #[serde(default, deserialize_with = "lenient_f64")]
    realized_pnl: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    cash_pnl: Option<f64>,
}

/// Cached outcome of one wallet lookup. Failures are cached too, so a wallet
/// that failed once in a run is not retried by a later market.
type Slot = Arc<OnceCell<std::result::Result<f64, CachedFailure>>>;

/// A failed lookup, kept with enough detail to rebuild its error class.
#[derive(Debug, Clone)]
struct CachedFailure {
    /// HTTP status of a rejected request; `None` for transient failures.
    status: Option<u16>,
    message: String,
}

impl CachedFailure {
    fn from_error(e: &AppError) -> Self {
        match e {
            AppError::Permanent { status, message, .. } => Self {
                status: Some(*status),
                message: message.clone(),
            },
            AppError::Transient { message, .. } => Self {
                status: None,
                message: message.clone(),
            },
            other => Self {
                status: None,
                message: other.to_string(),
            },
        }
    }

    fn to_error(&self, upstream: &str) -> AppError {
        match self.status {
            Some(status) => AppError::permanent(upstream, status, self.message.clone()),
            None => AppError::transient(upstream, self.message.clone()),
        }
    }
}

/// Per-run, read-through PNL cache with single-flight population.
///
/// Concurrent first lookups for the same wallet share one `OnceCell`: the
/// first caller runs the fetch, the rest await its result.
#[derive(Default)]
pub struct PnlCache {
    slots: DashMap<String, Slot>,
    lookups: AtomicU64,
    upstream_calls: AtomicU64,
}

impl PnlCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a wallet's PNL so the next lookup is a cache hit.
    pub fn warm(&self, wallet: &str, pnl: f64) {
        self.slots.insert(
            normalize(wallet),
            Arc::new(OnceCell::new_with(Some(Ok(pnl)))),
        );
    }

    pub fn get(&self, wallet: &str) -> Option<f64> {
        self.slots
            .get(&normalize(wallet))
            .and_then(|slot| slot.get().and_then(|r| r.as_ref().ok().copied()))
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Wallets whose lookup finished with an error.
    pub fn unresolved_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|e| matches!(e.value().get(), Some(Err(_))))
            .count()
    }

    fn slot(&self, key: &str) -> Slot {
        // Clone the Arc out so the shard lock is not held across the fetch.
        self.slots.entry(key.to_string()).or_default().clone()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PnlStats {
    pub lookups: u64,
    pub upstream_calls: u64,
    pub cache_hits: u64,
    pub cached_wallets: usize,
    pub unresolved: usize,
}

/// Resolves a wallet's PNL from the Data API `/positions` endpoint.
pub struct PnlResolver {
    client: Arc<RateLimitedClient>,
    cache: Arc<PnlCache>,
    basis: PnlBasis,
    warnings: Option<Arc<WarningLog>>,
    page_limit: usize,
    max_pages: usize,
}

impl PnlResolver {
    pub fn new(client: Arc<RateLimitedClient>, cache: Arc<PnlCache>, basis: PnlBasis) -> Self {
        Self {
            client,
            cache,
            basis,
            warnings: None,
            page_limit: POSITIONS_PAGE_LIMIT,
            max_pages: POSITIONS_MAX_PAGES,
        }
    }

    /// Report truncated position histories to the run's warning log.
    pub fn with_warnings(mut self, warnings: Arc<WarningLog>) -> Self {
        self.warnings = Some(warnings);
        self
    }

    pub fn with_paging(mut self, page_limit: usize, max_pages: usize) -> Self {
        self.page_limit = page_limit.max(1);
        self.max_pages = max_pages.max(1);
        self
    }

    pub fn cache(&self) -> &Arc<PnlCache> {
        &self.cache
    }

    /// A wallet with no positions resolves to 0. Upstream failures are cached
    /// for the rest of the run and come back with their original class:
    /// [`AppError::Permanent`] for a rejected request, otherwise
    /// [`AppError::Transient`].
    pub async fn resolve(&self, wallet: &str) -> Result<WalletPnl> {
        let key = normalize(wallet);
        self.cache.lookups.fetch_add(1, Ordering::Relaxed);

        let slot = self.cache.slot(&key);
        let outcome = slot
            .get_or_init(|| async {
                self.cache.upstream_calls.fetch_add(1, Ordering::Relaxed);
                self.fetch(&key).await.map_err(|e| {
                    warn!(wallet = %key, "[PNL] lookup failed: {e}");
                    CachedFailure::from_error(&e)
                })
            })
            .await;

        match outcome {
            Ok(pnl) => Ok(WalletPnl { wallet: key, pnl: *pnl }),
            Err(failure) => Err(failure.to_error(self.client.source())),
        }
    }

    pub fn stats(&self) -> PnlStats {
        let lookups = self.cache.lookups.load(Ordering::Relaxed);
        let upstream_calls = self.cache.upstream_calls.load(Ordering::Relaxed);
        PnlStats {
            lookups,
            upstream_calls,
            cache_hits: lookups.saturating_sub(upstream_calls),
            cached_wallets: self.cache.len(),
            unresolved: self.cache.unresolved_count(),
        }
    }

    /// Sum the wallet's positions page by page until a short page.
    async fn fetch(&self, wallet: &str) -> Result<f64> {
        let mut total = 0.0;
        let mut counted = 0usize;

        for page in 0..self.max_pages {
            let params = [
                ("user", wallet.to_string()),
                ("limit", self.page_limit.to_string()),
                ("offset", (page * self.page_limit).to_string()),
            ];
            let raw: Vec<serde_json::Value> = self.client.get_json("positions", &params).await?;
            let received = raw.len();

            for value in raw {
                let Ok(position) = serde_json::from_value::<RawPosition>(value) else {
                    continue;
                };
                let pnl = match self.basis {
                    PnlBasis::Realized => position.realized_pnl,
                    PnlBasis::Cash => position.cash_pnl,
                };
                if let Some(pnl) = pnl {
                    total += pnl;
                    counted += 1;
                }
            }

            if received < self.page_limit {
                debug!(wallet, positions = counted, basis = %self.basis, pnl = total, "[PNL] resolved");
                return Ok(total);
            }
        }

        let cap = self.max_pages * self.page_limit;
        let message = format!("wallet {wallet} has more than {cap} positions, PNL summed over the first {cap}");
        match &self.warnings {
            Some(warnings) => warnings.push(None, message),
            None => warn!("[PNL] {message}"),
        }
        Ok(total)
    }
}

fn normalize(wallet: &str) -> String {
    wallet.trim().to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::client::fake::FakeTransport;
    use crate::client::{HttpResponse, RateLimiter, RetryPolicy};

    fn resolver(transport: Arc<FakeTransport>, basis: PnlBasis) -> PnlResolver {
        let client = Arc::new(RateLimitedClient::new(
            "data",
            "http://data.test",
            transport,
            RateLimiter::new("data", 1000.0, 1000),
            RetryPolicy { max_attempts: 2, jitter: 0.0, ..RetryPolicy::default() },
            Duration::from_secs(5),
        ));
        PnlResolver::new(client, Arc::new(PnlCache::new()), basis)
    }

    fn positions() -> Arc<FakeTransport> {
        Arc::new(FakeTransport::new().route("/positions", |req| {
            let body = match req.param("user") {
                Some("0xwinner") => json!([
                    {"realizedPnl": 120.5, "cashPnl": "10"},
                    {"realizedPnl": "-20.5", "cashPnl": 5, "extra": [1, 2]}
                ]),
                _ => json!([]),
            };
            Ok(HttpResponse::json(200, body))
        }))
    }

    #[tokio::test]
    async fn sums_realized_pnl_over_positions() {
        let r = resolver(positions(), PnlBasis::Realized);
        let pnl = r.resolve("0xWINNER").await.unwrap();
        assert_eq!(pnl.wallet, "0xwinner");
        assert!((pnl.pnl - 100.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn cash_basis_uses_cash_pnl() {
        let r = resolver(positions(), PnlBasis::Cash);
        let pnl = r.resolve("0xwinner").await.unwrap();
        assert!((pnl.pnl - 15.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn wallet_without_history_is_zero() {
        let r = resolver(positions(), PnlBasis::Realized);
        assert_eq!(r.resolve("0xnobody").await.unwrap().pnl, 0.0);
    }

    #[tokio::test]
    async fn repeat_lookup_hits_cache() {
        let transport = positions();
        let r = resolver(transport.clone(), PnlBasis::Realized);

        let first = r.resolve("0xwinner").await.unwrap();
        let second = r.resolve("0xWinner").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(transport.calls_to("/positions"), 1);

        let stats = r.stats();
        assert_eq!(stats.lookups, 2);
        assert_eq!(stats.upstream_calls, 1);
        assert_eq!(stats.cache_hits, 1);
    }

    #[tokio::test]
    async fn concurrent_first_access_is_single_flight() {
        let transport = Arc::new(
            FakeTransport::new()
                .route("/positions", |_| Ok(HttpResponse::json(200, json!([{"realizedPnl": 7}]))))
                .with_delay(Duration::from_millis(50)),
        );
        let r = Arc::new(resolver(transport.clone(), PnlBasis::Realized));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let r = r.clone();
                tokio::spawn(async move { r.resolve("0xshared").await })
            })
            .collect();
        for h in handles {
            assert_eq!(h.await.unwrap().unwrap().pnl, 7.0);
        }
        assert_eq!(transport.calls_to("/positions"), 1);
    }

    #[tokio::test]
    async fn failures_are_cached_for_the_run() {
        let transport = Arc::new(FakeTransport::new().route("/positions", |_| Ok(HttpResponse::status(503))));
        let r = resolver(transport.clone(), PnlBasis::Realized);

        assert!(matches!(r.resolve("0xdown").await, Err(AppError::Transient { .. })));
        assert!(r.resolve("0xdown").await.is_err());
        // two attempts from the retry policy, none from the second lookup
        assert_eq!(transport.calls_to("/positions"), 2);
        assert_eq!(r.stats().unresolved, 1);
    }

    #[tokio::test]
    async fn rejected_lookup_stays_permanent_when_cached() {
        let transport = Arc::new(
            FakeTransport::new().route("/positions", |_| Ok(HttpResponse::json(404, json!({"error": "unknown user"})))),
        );
        let r = resolver(transport.clone(), PnlBasis::Realized);

        for _ in 0..2 {
            match r.resolve("0xgone").await {
                Err(AppError::Permanent { status, .. }) => assert_eq!(status, 404),
                other => panic!("expected a permanent failure, got {other:?}"),
            }
        }
        assert_eq!(transport.calls_to("/positions"), 1);
    }

    #[tokio::test]
    async fn positions_are_summed_across_pages() {
        let transport = Arc::new(FakeTransport::new().route("/positions", |req| {
            let offset: usize = req.param("offset").unwrap_or("0").parse().unwrap();
            let page: Vec<_> = (0..5)
                .skip(offset)
                .take(2)
                .map(|i| json!({"realizedPnl": 10 * (i + 1)}))
                .collect();
            Ok(HttpResponse::json(200, json!(page)))
        }));
        let r = resolver(transport.clone(), PnlBasis::Realized).with_paging(2, 10);

        // 10 + 20 + 30 + 40 + 50
        assert_eq!(r.resolve("0xbusy").await.unwrap().pnl, 150.0);
        assert_eq!(transport.calls_to("/positions"), 3);
    }

    #[tokio::test]
    async fn history_past_the_page_cap_is_reported() {
        let transport = Arc::new(FakeTransport::new().route("/positions", |_| {
            Ok(HttpResponse::json(200, json!([{"realizedPnl": 1}, {"realizedPnl": 1}])))
        }));
        let warnings = Arc::new(WarningLog::new());
        let r = resolver(transport.clone(), PnlBasis::Realized)
            .with_paging(2, 3)
            .with_warnings(warnings.clone());

        assert_eq!(r.resolve("0xwhale").await.unwrap().pnl, 6.0);
        assert_eq!(transport.calls_to("/positions"), 3);
        let logged = warnings.snapshot();
        assert_eq!(logged.len(), 1);
        assert!(logged[0].message.contains("more than 6 positions"));
    }

    #[tokio::test]
    async fn warmed_wallets_skip_upstream() {
        let transport = positions();
        let r = resolver(transport.clone(), PnlBasis::Realized);
        r.cache().warm("0xWARM", 42.0);

        assert_eq!(r.resolve("0xwarm").await.unwrap().pnl, 42.0);
        assert_eq!(transport.calls_to("/positions"), 0);
        assert_eq!(r.cache().get("0xwarm"), Some(42.0));
    }
}
