use std::collections::HashSet;
use std::sync::Arc;

use serde::Deserialize;
use tracing::debug;

use super::{lenient_f64, WarningLog};
use crate::client::RateLimitedClient;
use crate::config::{EXCLUDED_NAME_FRAGMENTS, EXCLUDED_WALLETS, HOLDER_API_MAX_LIMIT};
use crate::error::Result;
use crate::types::{HolderPosition, Market, OutcomeToken, Side};

/// One token's block in the `/holders` response.
#[derive(Debug, Deserialize)]
struct TokenHolders {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    holders: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawHolder {
    #[serde(default)]
    proxy_wallet: Option<String>,
    #[serde(default)]
    address: Option<String>,
    #[serde(default, deserialize_with = "lenient_f64")]
    amount: Option<f64>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    pseudonym: Option<String>,
}

/// Ranked top holders of both outcome tokens of one market.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MarketHolders {
    pub yes: Vec<HolderPosition>,
    pub no: Vec<HolderPosition>,
}

impl MarketHolders {
    pub fn side(&self, side: Side) -> &[HolderPosition] {
        match side {
            Side::Yes => &self.yes,
            Side::No => &self.no,
        }
    }

    pub fn len(&self) -> usize {
        self.yes.len() + self.no.len()
    }

    pub fn is_empty(&self) -> bool {
        self.yes.is_empty() && self.no.is_empty()
    }
}

pub struct HolderSource {
    client: Arc<RateLimitedClient>,
    warnings: Arc<WarningLog>,
}

impl HolderSource {
    pub fn new(client: Arc<RateLimitedClient>, warnings: Arc<WarningLog>) -> Self {
        Self { client, warnings }
    }

    /// Top `limit` holders of a single outcome token, quantity descending,
    /// ties broken by wallet ascending. Zero holders is an empty vec.
    pub async fn top_holders(&self, token: &OutcomeToken, limit: usize) -> Result<Vec<HolderPosition>> {
        let blocks = self.fetch(&token.market_id, limit).await?;
        Ok(self.rank_token(&blocks, &token.market_id, &token.token_id, token.side, limit))
    }

    /// Both sides of a market from a single upstream request.
    pub async fn market_holders(&self, market: &Market, limit: usize) -> Result<MarketHolders> {
        let blocks = self.fetch(&market.id, limit).await?;
        let holders = MarketHolders {
            yes: self.rank_token(&blocks, &market.id, &market.yes_token_id, Side::Yes, limit),
            no: self.rank_token(&blocks, &market.id, &market.no_token_id, Side::No, limit),
        };
        debug!(
            market_id = %market.id,
            yes = holders.yes.len(),
            no = holders.no.len(),
            "[HOLDERS] fetched"
        );
        Ok(holders)
    }

    async fn fetch(&self, market_id: &str, limit: usize) -> Result<Vec<TokenHolders>> {
        let limit = limit.clamp(1, HOLDER_API_MAX_LIMIT);
        let params = [("market", market_id.to_string()), ("limit", limit.to_string())];
        let raw: Vec<serde_json::Value> = self.client.get_json("holders", &params).await?;

        let mut blocks = Vec::with_capacity(raw.len());
        for value in raw {
            match serde_json::from_value::<TokenHolders>(value) {
                Ok(block) => blocks.push(block),
                Err(e) => self
                    .warnings
                    .push(Some(market_id), format!("undecodable holder block: {e}")),
            }
        }
        Ok(blocks)
    }

    fn rank_token(
        &self,
        blocks: &[TokenHolders],
        market_id: &str,
        token_id: &str,
        side: Side,
        limit: usize,
    ) -> Vec<HolderPosition> {
        let Some(block) = blocks
            .iter()
            .find(|b| b.token.as_deref() == Some(token_id))
        else {
            return Vec::new();
        };

        let mut seen = HashSet::new();
        let mut positions = Vec::with_capacity(block.holders.len());
        for value in &block.holders {
            let raw = match serde_json::from_value::<RawHolder>(value.clone()) {
                Ok(r) => r,
                Err(e) => {
                    self.warnings
                        .push(Some(market_id), format!("undecodable holder row: {e}"));
                    continue;
                }
            };
            let Some(wallet) = raw
                .proxy_wallet
                .or(raw.address)
                .map(|w| w.trim().to_ascii_lowercase())
                .filter(|w| !w.is_empty())
            else {
                self.warnings
                    .push(Some(market_id), format!("{side} holder row without wallet dropped"));
                continue;
            };

            let display_name = raw.name.or(raw.pseudonym).filter(|n| !n.is_empty());
            if is_excluded(&wallet, display_name.as_deref()) {
                continue;
            }
            let quantity = raw.amount.unwrap_or(0.0);
            if quantity <= 0.0 {
                continue;
            }
            if !seen.insert(wallet.clone()) {
                continue;
            }
            positions.push(HolderPosition {
                wallet,
                side,
                quantity,
                rank: 0,
                display_name,
            });
        }

        positions.sort_by(|a, b| {
            b.quantity
                .total_cmp(&a.quantity)
                .then_with(|| a.wallet.cmp(&b.wallet))
        });
        positions.truncate(limit);
        for (i, p) in positions.iter_mut().enumerate() {
            p.rank = i as u32 + 1;
        }
        positions
    }
}

fn is_excluded(wallet: &str, display_name: Option<&str>) -> bool {
    if EXCLUDED_WALLETS.contains(&wallet) {
        return true;
    }
    display_name.is_some_and(|name| {
        let name = name.to_ascii_lowercase();
        EXCLUDED_NAME_FRAGMENTS.iter().any(|f| name.contains(f))
    })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::client::fake::FakeTransport;
    use crate::client::{HttpResponse, RateLimiter, RetryPolicy};
    use crate::error::AppError;

    fn market() -> Market {
        Market {
            id: "0xcond".into(),
            question: "Q?".into(),
            slug: "q".into(),
            yes_label: "Yes".into(),
            no_label: "No".into(),
            yes_token_id: "tok-yes".into(),
            no_token_id: "tok-no".into(),
            yes_price: 0.5,
            no_price: 0.5,
            liquidity: 5000.0,
            volume: 100.0,
            active: true,
            close_time_iso: None,
        }
    }

    fn holder_source(transport: Arc<FakeTransport>) -> (HolderSource, Arc<WarningLog>) {
        let client = Arc::new(RateLimitedClient::new(
            "data",
            "http://data.test",
            transport,
            RateLimiter::new("data", 100.0, 100),
            RetryPolicy { max_attempts: 2, jitter: 0.0, ..RetryPolicy::default() },
            Duration::from_secs(5),
        ));
        let warnings = Arc::new(WarningLog::new());
        (HolderSource::new(client, warnings.clone()), warnings)
    }

    fn respond(body: serde_json::Value) -> Arc<FakeTransport> {
        Arc::new(FakeTransport::new().route("/holders", move |_| Ok(HttpResponse::json(200, body.clone()))))
    }

    #[tokio::test]
    async fn ranks_by_quantity_then_wallet() {
        let transport = respond(json!([
            {"token": "tok-yes", "holders": [
                {"proxyWallet": "0xBBB", "amount": 50, "name": "bob"},
                {"proxyWallet": "0xaaa", "amount": "50"},
                {"proxyWallet": "0xccc", "amount": 900.5},
                {"proxyWallet": "0xddd", "amount": 10}
            ]},
            {"token": "tok-no", "holders": []}
        ]));
        let (source, _) = holder_source(transport.clone());

        let holders = source.market_holders(&market(), 3).await.unwrap();
        let wallets: Vec<_> = holders.yes.iter().map(|h| h.wallet.as_str()).collect();
        assert_eq!(wallets, vec!["0xccc", "0xaaa", "0xbbb"]);
        let ranks: Vec<_> = holders.yes.iter().map(|h| h.rank).collect();
        assert_eq!(ranks, vec![1, 2, 3]);
        assert!(holders.no.is_empty());
        assert_eq!(transport.calls_to("/holders"), 1);

        let req = &transport.requests()[0];
        assert_eq!(req.param("market"), Some("0xcond"));
        assert_eq!(req.param("limit"), Some("3"));
    }

    #[tokio::test]
    async fn drops_exchange_wallets_and_empty_rows() {
        let transport = respond(json!([
            {"token": "tok-no", "holders": [
                {"proxyWallet": "0x8bd6c3d7a57d650a1870dd338234f90051fe9918", "amount": 1e6},
                {"proxyWallet": "0x1111", "amount": 5, "pseudonym": "Polymarket-AMM"},
                {"proxyWallet": "0x2222", "amount": 0},
                {"amount": 40},
                {"address": "0x3333", "amount": 7},
                {"proxyWallet": "0x3333", "amount": 7}
            ]}
        ]));
        let (source, warnings) = holder_source(transport);

        let token = market().token(Side::No);
        let holders = source.top_holders(&token, 20).await.unwrap();
        assert_eq!(holders.len(), 1);
        assert_eq!(holders[0].wallet, "0x3333");
        assert_eq!(holders[0].side, Side::No);
        assert_eq!(warnings.len(), 1);
    }

    #[tokio::test]
    async fn token_missing_from_response_is_empty_not_error() {
        let (source, _) = holder_source(respond(json!([])));
        let holders = source.market_holders(&market(), 20).await.unwrap();
        assert!(holders.is_empty());
    }

    #[tokio::test]
    async fn limit_is_capped_at_upstream_maximum() {
        let transport = respond(json!([]));
        let (source, _) = holder_source(transport.clone());
        source.market_holders(&market(), 100).await.unwrap();
        assert_eq!(transport.requests()[0].param("limit"), Some("20"));
    }

    #[tokio::test]
    async fn upstream_failure_is_transient() {
        let transport = Arc::new(FakeTransport::new().route("/holders", |_| Ok(HttpResponse::status(500))));
        let (source, _) = holder_source(transport);
        let err = source.market_holders(&market(), 20).await.unwrap_err();
        assert!(matches!(err, AppError::Transient { .. }));
    }
}
