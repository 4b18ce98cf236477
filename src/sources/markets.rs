use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use futures_util::stream::{self, Stream, TryStreamExt};
use serde::Deserialize;
use tracing::{debug, info};

use super::{lenient_f64, lenient_string_list, parse_iso_to_unix_secs, value_as_f64, WarningLog};
use crate::client::RateLimitedClient;
use crate::config::MARKET_PAGE_SIZE;
use crate::error::{AppError, Result};
use crate::types::Market;

/// Prices default to an even book when the catalog omits them.
const DEFAULT_PRICE: f64 = 0.5;

#[derive(Debug, Default, Clone, PartialEq)]
pub struct FetchStats {
    pub pages: usize,
    pub api_total: usize,
    pub rejected_malformed: usize,
    pub rejected_not_binary: usize,
    pub rejected_inactive: usize,
    pub rejected_expired: usize,
    pub rejected_low_liquidity: usize,
    /// Already yielded from an earlier page of the same listing.
    pub rejected_duplicate: usize,
    pub qualified: usize,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GammaMarket {
    #[serde(default)]
    condition_id: Option<String>,
    #[serde(default)]
    question: Option<String>,
    #[serde(default)]
    slug: Option<String>,
    #[serde(default, deserialize_with = "lenient_string_list")]
    outcomes: Option<Vec<String>>,
    #[serde(default, deserialize_with = "lenient_string_list")]
    outcome_prices: Option<Vec<String>>,
    #[serde(default, deserialize_with = "lenient_string_list")]
    clob_token_ids: Option<Vec<String>>,
    #[serde(default, deserialize_with = "lenient_f64")]
    liquidity_num: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    liquidity: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    volume_num: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    volume: Option<f64>,
    #[serde(default)]
    active: Option<bool>,
    #[serde(default)]
    closed: Option<bool>,
    #[serde(default)]
    end_date: Option<String>,
    #[serde(default)]
    events: Option<Vec<GammaEvent>>,
}

#[derive(Debug, Deserialize)]
struct GammaEvent {
    #[serde(default)]
    slug: Option<String>,
}

enum Rejection {
    Malformed(String),
    NotBinary,
    Inactive,
    Expired,
    LowLiquidity,
}

/// Paginates the Gamma market catalog.
pub struct MarketSource {
    client: Arc<RateLimitedClient>,
    warnings: Arc<WarningLog>,
    page_size: usize,
    stats: Mutex<FetchStats>,
    seen: Mutex<HashSet<String>>,
}

impl MarketSource {
    pub fn new(client: Arc<RateLimitedClient>, warnings: Arc<WarningLog>) -> Self {
        Self {
            client,
            warnings,
            page_size: MARKET_PAGE_SIZE,
            stats: Mutex::new(FetchStats::default()),
            seen: Mutex::new(HashSet::new()),
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn stats(&self) -> FetchStats {
        self.stats.lock().map(|s| s.clone()).unwrap_or_default()
    }

    /// Lazily page through active markets with liquidity >= `min_liquidity`.
    ///
    /// Pages are fetched only as the stream is polled. Pagination ends on an
    /// empty page or a short page. A failed page fetch ends the stream with
    /// that error. Offsets shift when the catalog changes mid-listing, so a
    /// condition id already yielded by this source is dropped on repeat.
    pub fn list_active_markets(
        &self,
        min_liquidity: f64,
    ) -> impl Stream<Item = Result<Market>> + '_ {
        stream::try_unfold(Some(0usize), move |offset| async move {
            let Some(offset) = offset else {
                return Ok::<_, AppError>(None);
            };
            let page = self.fetch_page(offset, min_liquidity).await?;
            if page.is_empty() {
                debug!(offset, "Gamma returned an empty page, catalog exhausted");
                return Ok::<_, AppError>(None);
            }
            let next = if page.len() < self.page_size {
                None
            } else {
                Some(offset + page.len())
            };
            let markets = self.accept_page(page, min_liquidity);
            let items = markets.into_iter().map(Ok::<Market, AppError>);
            Ok(Some((stream::iter(items), next)))
        })
        .try_flatten()
    }

    async fn fetch_page(
        &self,
        offset: usize,
        min_liquidity: f64,
    ) -> Result<Vec<serde_json::Value>> {
        let params = [
            ("active", "true".to_string()),
            ("closed", "false".to_string()),
            ("archived", "false".to_string()),
            ("liquidity_num_min", format!("{min_liquidity}")),
            ("limit", self.page_size.to_string()),
            ("offset", offset.to_string()),
        ];
        self.client.get_json("markets", &params).await
    }

    fn accept_page(&self, items: Vec<serde_json::Value>, min_liquidity: f64) -> Vec<Market> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64();

        let mut stats = FetchStats {
            pages: 1,
            api_total: items.len(),
            ..FetchStats::default()
        };
        let mut markets = Vec::with_capacity(items.len());
        let mut seen = match self.seen.lock() {
            Ok(seen) => seen,
            Err(poisoned) => poisoned.into_inner(),
        };

        for item in items {
            let hint = item
                .get("conditionId")
                .and_then(|v| v.as_str())
                .map(str::to_string);
            let parsed = serde_json::from_value::<GammaMarket>(item)
                .map_err(|e| Rejection::Malformed(format!("undecodable market record: {e}")))
                .and_then(|raw| self.to_market(raw, min_liquidity, now));

            match parsed {
                Ok(market) if seen.insert(market.id.clone()) => markets.push(market),
                Ok(market) => {
                    stats.rejected_duplicate += 1;
                    debug!(market_id = %market.id, "[CATALOG] market repeated across pages, dropped");
                }
                Err(Rejection::Malformed(reason)) => {
                    stats.rejected_malformed += 1;
                    self.warnings
                        .push(hint.as_deref(), format!("skipped market: {reason}"));
                }
                Err(Rejection::NotBinary) => stats.rejected_not_binary += 1,
                Err(Rejection::Inactive) => stats.rejected_inactive += 1,
                Err(Rejection::Expired) => stats.rejected_expired += 1,
                Err(Rejection::LowLiquidity) => stats.rejected_low_liquidity += 1,
            }
        }
        drop(seen);
        stats.qualified = markets.len();

        info!(
            page_total = stats.api_total,
            qualified = stats.qualified,
            "[CATALOG] page: {} qualified / {} received (malformed={} not_binary={} inactive={} expired={} low_liquidity={} duplicate={})",
            stats.qualified,
            stats.api_total,
            stats.rejected_malformed,
            stats.rejected_not_binary,
            stats.rejected_inactive,
            stats.rejected_expired,
            stats.rejected_low_liquidity,
            stats.rejected_duplicate,
        );

        if let Ok(mut total) = self.stats.lock() {
            total.pages += stats.pages;
            total.api_total += stats.api_total;
            total.rejected_malformed += stats.rejected_malformed;
            total.rejected_not_binary += stats.rejected_not_binary;
            total.rejected_inactive += stats.rejected_inactive;
            total.rejected_expired += stats.rejected_expired;
            total.rejected_low_liquidity += stats.rejected_low_liquidity;
            total.rejected_duplicate += stats.rejected_duplicate;
            total.qualified += stats.qualified;
        }
        markets
    }

    fn to_market(
        &self,
        raw: GammaMarket,
        min_liquidity: f64,
        now_secs: f64,
    ) -> std::result::Result<Market, Rejection> {
        let id = raw
            .condition_id
            .filter(|s| !s.is_empty())
            .ok_or_else(|| Rejection::Malformed("missing conditionId".to_string()))?;

        if !raw.active.unwrap_or(true) || raw.closed.unwrap_or(false) {
            return Err(Rejection::Inactive);
        }

        let token_ids = raw.clob_token_ids.unwrap_or_default();
        let outcomes = raw.outcomes.unwrap_or_default();
        if token_ids.len() < 2 || outcomes.len() < 2 {
            return Err(Rejection::Malformed(format!(
                "{id}: expected two outcome tokens, got {} tokens / {} outcomes",
                token_ids.len(),
                outcomes.len()
            )));
        }

        let yes_idx = outcomes
            .iter()
            .position(|o| o.eq_ignore_ascii_case("Yes") || o.eq_ignore_ascii_case("Up"));
        let no_idx = outcomes
            .iter()
            .position(|o| o.eq_ignore_ascii_case("No") || o.eq_ignore_ascii_case("Down"));
        let (yes_idx, no_idx) = match (yes_idx, no_idx) {
            (Some(y), Some(n)) => (y, n),
            _ if outcomes.len() == 2 => (0, 1),
            _ => return Err(Rejection::NotBinary),
        };
        let (Some(yes_token_id), Some(no_token_id)) = (token_ids.get(yes_idx), token_ids.get(no_idx))
        else {
            return Err(Rejection::NotBinary);
        };

        let liquidity = raw.liquidity_num.or(raw.liquidity).unwrap_or(0.0);
        if liquidity < min_liquidity {
            return Err(Rejection::LowLiquidity);
        }

        let close_time_iso = match raw.end_date {
            Some(end) => match parse_iso_to_unix_secs(&end) {
                Some(end_secs) if end_secs < now_secs => return Err(Rejection::Expired),
                Some(_) => Some(end),
                None => {
                    self.warnings
                        .push(Some(&id), format!("unparsable endDate {end:?}, close time unknown"));
                    None
                }
            },
            None => None,
        };

        let volume = match raw.volume_num.or(raw.volume) {
            Some(v) => v,
            None => {
                self.warnings.push(Some(&id), "volume missing, defaulted to 0");
                0.0
            }
        };

        let prices = raw.outcome_prices.unwrap_or_default();
        let price_at = |idx: usize| {
            prices
                .get(idx)
                .and_then(|p| value_as_f64(&serde_json::Value::String(p.clone())))
        };
        let (yes_price, no_price) = match (price_at(yes_idx), price_at(no_idx)) {
            (Some(y), Some(n)) => (y, n),
            (y, n) => {
                self.warnings
                    .push(Some(&id), "outcome prices missing, defaulted to 0.5");
                (y.unwrap_or(DEFAULT_PRICE), n.unwrap_or(DEFAULT_PRICE))
            }
        };

        let slug = raw
            .events
            .as_ref()
            .and_then(|e| e.first())
            .and_then(|e| e.slug.clone())
            .filter(|s| !s.is_empty())
            .or(raw.slug)
            .unwrap_or_default();

        Ok(Market {
            question: raw.question.unwrap_or_default(),
            slug,
            yes_label: outcomes[yes_idx].clone(),
            no_label: outcomes[no_idx].clone(),
            yes_token_id: yes_token_id.clone(),
            no_token_id: no_token_id.clone(),
            yes_price,
            no_price,
            liquidity,
            volume,
            active: true,
            close_time_iso,
            id,
        })
    }
}
