//! Database row types matching `migrations/0001_init.sql`.
//! Decoded with `sqlx::FromRow`, then converted into the domain types.
use serde::Serialize;

use crate::error::Result;
use crate::types::{
    DataWarning, ImbalanceVerdict, Market, MarketSkip, PnlBasis, RunId, RunRecord, RunStatus,
    ScanParams, Side, SideMetrics,
};

#[derive(Debug, sqlx::FromRow)]
pub struct RunRow {
    pub id: i64,
    pub started_at: i64,
    pub completed_at: Option<i64>,
    pub status: String,
    pub abort_reason: Option<String>,
    pub min_liquidity: f64,
    pub min_holders_per_side: i64,
    pub profitable_fraction_threshold: f64,
    pub max_concurrency: i64,
    pub top_holder_limit: i64,
    pub max_markets: Option<i64>,
    pub pnl_basis: String,
    pub markets_attempted: i64,
    pub markets_analyzed: i64,
    pub markets_skipped: i64,
    pub markets_flagged: i64,
    pub unresolved_wallets: i64,
}

impl RunRow {
    pub fn into_record(self) -> Result<RunRecord> {
        Ok(RunRecord {
            id: self.id,
            started_at: self.started_at,
            completed_at: self.completed_at,
            status: self.status.parse()?,
            params: ScanParams {
                min_liquidity: self.min_liquidity,
                min_holders_per_side: self.min_holders_per_side as usize,
                profitable_fraction_threshold: self.profitable_fraction_threshold,
                max_concurrency: self.max_concurrency as usize,
                top_holder_limit: self.top_holder_limit as usize,
                max_markets: self.max_markets.map(|m| m as usize),
                pnl_basis: self.pnl_basis.parse::<PnlBasis>()?,
            },
            markets_attempted: self.markets_attempted as u32,
            markets_analyzed: self.markets_analyzed as u32,
            markets_skipped: self.markets_skipped as u32,
            markets_flagged: self.markets_flagged as u32,
            unresolved_wallets: self.unresolved_wallets as u32,
            abort_reason: self.abort_reason,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct MarketRow {
    pub market_id: String,
    pub question: String,
    pub slug: String,
    pub yes_label: String,
    pub no_label: String,
    pub yes_token_id: String,
    pub no_token_id: String,
    pub yes_price: f64,
    pub no_price: f64,
    pub liquidity: f64,
    pub volume: f64,
    pub active: bool,
    pub close_time_iso: Option<String>,
}

impl From<MarketRow> for Market {
    fn from(r: MarketRow) -> Self {
        Market {
            id: r.market_id,
            question: r.question,
            slug: r.slug,
            yes_label: r.yes_label,
            no_label: r.no_label,
            yes_token_id: r.yes_token_id,
            no_token_id: r.no_token_id,
            yes_price: r.yes_price,
            no_price: r.no_price,
            liquidity: r.liquidity,
            volume: r.volume,
            active: r.active,
            close_time_iso: r.close_time_iso,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct VerdictRow {
    pub market_id: String,
    pub is_flagged: bool,
    pub flagged_side: Option<String>,
    pub imbalance_score: f64,
    pub yes_holder_count: i64,
    pub yes_resolved_count: i64,
    pub yes_profitable_count: i64,
    pub yes_profitable_fraction: f64,
    pub yes_avg_pnl: f64,
    pub yes_total_quantity: f64,
    pub yes_top_half_count: i64,
    pub yes_data_quality: f64,
    pub yes_eligible: bool,
    pub no_holder_count: i64,
    pub no_resolved_count: i64,
    pub no_profitable_count: i64,
    pub no_profitable_fraction: f64,
    pub no_avg_pnl: f64,
    pub no_total_quantity: f64,
    pub no_top_half_count: i64,
    pub no_data_quality: f64,
    pub no_eligible: bool,
}

impl VerdictRow {
    pub fn into_verdict(self) -> Result<ImbalanceVerdict> {
        let flagged_side = self.flagged_side.as_deref().map(str::parse::<Side>).transpose()?;
        let yes = SideMetrics {
            side: Side::Yes,
            holder_count: self.yes_holder_count as u32,
            resolved_count: self.yes_resolved_count as u32,
            unresolved_count: (self.yes_holder_count - self.yes_resolved_count).max(0) as u32,
            profitable_count: self.yes_profitable_count as u32,
            profitable_fraction: self.yes_profitable_fraction,
            avg_pnl: self.yes_avg_pnl,
            total_quantity: self.yes_total_quantity,
            top_half_count: self.yes_top_half_count as u32,
            data_quality_score: self.yes_data_quality,
            eligible: self.yes_eligible,
        };
        let no = SideMetrics {
            side: Side::No,
            holder_count: self.no_holder_count as u32,
            resolved_count: self.no_resolved_count as u32,
            unresolved_count: (self.no_holder_count - self.no_resolved_count).max(0) as u32,
            profitable_count: self.no_profitable_count as u32,
            profitable_fraction: self.no_profitable_fraction,
            avg_pnl: self.no_avg_pnl,
            total_quantity: self.no_total_quantity,
            top_half_count: self.no_top_half_count as u32,
            data_quality_score: self.no_data_quality,
            eligible: self.no_eligible,
        };
        Ok(ImbalanceVerdict {
            market_id: self.market_id,
            flagged_side,
            is_flagged: self.is_flagged,
            yes,
            no,
            imbalance_score: self.imbalance_score,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct HolderSnapshotRow {
    pub side: String,
    pub rank: i64,
    pub wallet: String,
    pub quantity: f64,
    pub display_name: Option<String>,
    /// NULL when the wallet's PNL could not be resolved in this run.
    pub pnl: Option<f64>,
}

#[derive(Debug, sqlx::FromRow)]
pub struct SkipRow {
    pub market_id: String,
    pub stage: String,
    pub reason: String,
}

impl SkipRow {
    pub fn into_skip(self) -> Result<MarketSkip> {
        Ok(MarketSkip {
            market_id: self.market_id,
            stage: self.stage.parse()?,
            reason: self.reason,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct WarningRow {
    pub market_id: Option<String>,
    pub message: String,
}

impl From<WarningRow> for DataWarning {
    fn from(r: WarningRow) -> Self {
        DataWarning {
            market_id: r.market_id,
            message: r.message,
        }
    }
}

/// A verdict joined with the market snapshot it was computed on.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarketVerdict {
    pub market: Market,
    pub verdict: ImbalanceVerdict,
}

#[derive(Debug, sqlx::FromRow)]
pub struct HistoryRow {
    pub run_id: i64,
    pub started_at: i64,
    pub status: String,
    pub yes_price: f64,
    pub no_price: f64,
    #[sqlx(flatten)]
    pub verdict: VerdictRow,
}

impl HistoryRow {
    pub fn into_entry(self) -> Result<MarketHistoryEntry> {
        Ok(MarketHistoryEntry {
            run_id: self.run_id,
            started_at: self.started_at,
            run_status: self.status.parse()?,
            yes_price: self.yes_price,
            no_price: self.no_price,
            verdict: self.verdict.into_verdict()?,
        })
    }
}

/// One market's verdict in one run, for following a market across runs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarketHistoryEntry {
    pub run_id: RunId,
    pub started_at: i64,
    pub run_status: RunStatus,
    pub yes_price: f64,
    pub no_price: f64,
    pub verdict: ImbalanceVerdict,
}
