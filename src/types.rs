use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

pub type RunId = i64;

// ---------------------------------------------------------------------------
// Market
// ---------------------------------------------------------------------------

/// Snapshot of one binary market as seen by the catalog at scan time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Market {
    /// Condition id (0x-prefixed). Also the key the holder source is queried by.
    pub id: String,
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

impl Market {
    pub fn token(&self, side: Side) -> OutcomeToken {
        let token_id = match side {
            Side::Yes => self.yes_token_id.clone(),
            Side::No => self.no_token_id.clone(),
        };
        OutcomeToken {
            market_id: self.id.clone(),
            side,
            token_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeToken {
    pub market_id: String,
    pub side: Side,
    pub token_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Yes,
    No,
}

impl Side {
    pub fn opposite(self) -> Side {
        match self {
            Side::Yes => Side::No,
            Side::No => Side::Yes,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Yes => write!(f, "YES"),
            Side::No => write!(f, "NO"),
        }
    }
}

impl std::str::FromStr for Side {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "YES" => Ok(Side::Yes),
            "NO" => Ok(Side::No),
            other => Err(AppError::Config(format!("unknown side {other:?}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Holders and PNL
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HolderPosition {
    pub wallet: String,
    pub side: Side,
    pub quantity: f64,
    /// 1-based rank within the side, by quantity descending.
    pub rank: u32,
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalletPnl {
    /// Lower-cased wallet address.
    pub wallet: String,
    pub pnl: f64,
}

/// Which PNL figure the resolver sums over a wallet's positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PnlBasis {
    /// All-time realized PNL from closed trades.
    Realized,
    /// Cash PNL, which also marks open positions to market.
    Cash,
}

impl std::fmt::Display for PnlBasis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PnlBasis::Realized => write!(f, "realized"),
            PnlBasis::Cash => write!(f, "cash"),
        }
    }
}

impl std::str::FromStr for PnlBasis {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "realized" => Ok(PnlBasis::Realized),
            "cash" => Ok(PnlBasis::Cash),
            other => Err(AppError::Config(format!(
                "PNL_BASIS must be 'realized' or 'cash', got {other:?}"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Verdicts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SideMetrics {
    pub side: Side,
    pub holder_count: u32,
    pub resolved_count: u32,
    pub unresolved_count: u32,
    pub profitable_count: u32,
    /// profitable / resolved, 0 when nothing resolved. Always within [0, 1].
    pub profitable_fraction: f64,
    /// Mean PNL over resolved wallets, 0 when nothing resolved.
    pub avg_pnl: f64,
    pub total_quantity: f64,
    /// Fewest top holders that together hold at least half the side's quantity.
    pub top_half_count: u32,
    /// 0-100 confidence in the side's numbers: PNL coverage and sample size.
    pub data_quality_score: f64,
    /// Enough resolved holders to be considered for a flag at all.
    pub eligible: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImbalanceVerdict {
    pub market_id: String,
    pub flagged_side: Option<Side>,
    pub is_flagged: bool,
    pub yes: SideMetrics,
    pub no: SideMetrics,
    /// 0–100 strength of the flag; 0 when not flagged.
    pub imbalance_score: f64,
}

impl ImbalanceVerdict {
    pub fn metrics(&self, side: Side) -> &SideMetrics {
        match side {
            Side::Yes => &self.yes,
            Side::No => &self.no,
        }
    }
}

// ---------------------------------------------------------------------------
// Runs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanParams {
    pub min_liquidity: f64,
    pub min_holders_per_side: usize,
    pub profitable_fraction_threshold: f64,
    pub max_concurrency: usize,
    pub top_holder_limit: usize,
    pub max_markets: Option<usize>,
    pub pnl_basis: PnlBasis,
}

impl Default for ScanParams {
    fn default() -> Self {
        use crate::config::defaults;
        Self {
            min_liquidity: defaults::MIN_LIQUIDITY,
            min_holders_per_side: defaults::MIN_HOLDERS_PER_SIDE,
            profitable_fraction_threshold: defaults::PROFITABLE_FRACTION_THRESHOLD,
            max_concurrency: defaults::MAX_CONCURRENCY,
            top_holder_limit: defaults::TOP_HOLDER_LIMIT,
            max_markets: None,
            pnl_basis: PnlBasis::Realized,
        }
    }
}

impl ScanParams {
    pub fn validate(&self) -> Result<()> {
        if self.min_liquidity.is_nan() || self.min_liquidity < 0.0 {
            return Err(AppError::Config("MIN_LIQUIDITY must be >= 0".to_string()));
        }
        if self.min_holders_per_side < 1 {
            return Err(AppError::Config("MIN_HOLDERS_PER_SIDE must be >= 1".to_string()));
        }
        let f = self.profitable_fraction_threshold;
        if !(f > 0.0 && f <= 1.0) {
            return Err(AppError::Config(
                "PROFITABLE_FRACTION_THRESHOLD must be in (0, 1]".to_string(),
            ));
        }
        if self.max_concurrency < 1 {
            return Err(AppError::Config("MAX_CONCURRENCY must be >= 1".to_string()));
        }
        if self.top_holder_limit < 1 {
            return Err(AppError::Config("TOP_HOLDER_LIMIT must be >= 1".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Aborted,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Aborted => "aborted",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for RunStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "running" => Ok(RunStatus::Running),
            "completed" => Ok(RunStatus::Completed),
            "aborted" => Ok(RunStatus::Aborted),
            other => Err(AppError::Config(format!("unknown run status {other:?}"))),
        }
    }
}

/// Per-market pipeline stage, recorded with skips so the reason says where it failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketStage {
    FetchingHolders,
    ResolvingPnl,
    Analyzing,
    Persisting,
}

impl std::fmt::Display for MarketStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MarketStage::FetchingHolders => "fetching_holders",
            MarketStage::ResolvingPnl => "resolving_pnl",
            MarketStage::Analyzing => "analyzing",
            MarketStage::Persisting => "persisting",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for MarketStage {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "fetching_holders" => Ok(MarketStage::FetchingHolders),
            "resolving_pnl" => Ok(MarketStage::ResolvingPnl),
            "analyzing" => Ok(MarketStage::Analyzing),
            "persisting" => Ok(MarketStage::Persisting),
            other => Err(AppError::Config(format!("unknown market stage {other:?}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSkip {
    pub market_id: String,
    pub stage: MarketStage,
    pub reason: String,
}

/// A defaulted or dropped upstream field. Never fails the scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataWarning {
    pub market_id: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub markets_attempted: u32,
    pub markets_analyzed: u32,
    pub markets_skipped: u32,
    pub markets_flagged: u32,
    pub unresolved_wallets: u32,
    pub skips: Vec<MarketSkip>,
    pub warnings: Vec<DataWarning>,
}

/// A run as read back from the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: RunId,
    /// Nanosecond UTC epoch.
    pub started_at: i64,
    pub completed_at: Option<i64>,
    pub status: RunStatus,
    pub params: ScanParams,
    pub markets_attempted: u32,
    pub markets_analyzed: u32,
    pub markets_skipped: u32,
    pub markets_flagged: u32,
    pub unresolved_wallets: u32,
    pub abort_reason: Option<String>,
}

impl RunRecord {
    /// Only completed runs may be presented as final results.
    pub fn is_final(&self) -> bool {
        self.status == RunStatus::Completed && self.completed_at.is_some()
    }
}
