use std::time::Duration;

use crate::client::RetryPolicy;
use crate::error::{AppError, Result};
use crate::types::{PnlBasis, ScanParams};

pub const GAMMA_API_URL: &str = "https://gamma-api.polymarket.com";
pub const DATA_API_URL: &str = "https://data-api.polymarket.com";

/// Page size for the Gamma `/markets` catalog.
pub const MARKET_PAGE_SIZE: usize = 100;

/// The Data API `/holders` endpoint never returns more than this many holders per token.
pub const HOLDER_API_MAX_LIMIT: usize = 20;

/// Positions requested per `/positions` page when summing a wallet's PNL.
pub const POSITIONS_PAGE_LIMIT: usize = 500;

/// Pages fetched per wallet before the sum is reported as truncated.
pub const POSITIONS_MAX_PAGES: usize = 20;

/// Exchange / AMM wallets that hold inventory on every market and carry no signal.
pub const EXCLUDED_WALLETS: &[&str] = &[
    "0x8bd6c3d7a57d650a1870dd338234f90051fe9918",
    "0x0000000000000000000000000000000000000000",
];

/// Holder display names containing any of these are treated as exchange wallets.
pub const EXCLUDED_NAME_FRAGMENTS: &[&str] = &["polymarket", "amm"];

/// Default per-source request rates (requests per second).
pub const DEFAULT_GAMMA_RPS: f64 = 10.0;
pub const DEFAULT_DATA_RPS: f64 = 10.0;
pub const DEFAULT_PNL_RPS: f64 = 10.0;

pub mod defaults {
    pub const MIN_LIQUIDITY: f64 = 1000.0;
    pub const MIN_HOLDERS_PER_SIDE: usize = 5;
    pub const PROFITABLE_FRACTION_THRESHOLD: f64 = 0.60;
    pub const MAX_CONCURRENCY: usize = 4;
    pub const TOP_HOLDER_LIMIT: usize = 20;
    pub const HTTP_TIMEOUT_SECS: u64 = 15;
}

#[derive(Debug, Clone)]
pub struct Config {
    pub gamma_api_url: String,
    pub data_api_url: String,
    pub log_level: String,
    pub db_path: String,
    pub api_port: u16,
    pub scan: ScanParams,
    /// Per-request timeout; exceeding it counts as a transient failure (HTTP_TIMEOUT_SECS)
    pub http_timeout: Duration,
    /// Gamma catalog rate limit, requests per second (GAMMA_RPS)
    pub gamma_rps: f64,
    /// Holder ranking rate limit, requests per second (DATA_RPS)
    pub data_rps: f64,
    /// Wallet PNL lookup rate limit, requests per second (PNL_RPS)
    pub pnl_rps: f64,
    pub retry: RetryPolicy,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let default_retry = RetryPolicy::default();
        let retry = RetryPolicy {
            max_attempts: parse_env("RETRY_MAX_ATTEMPTS", default_retry.max_attempts)?,
            base_delay: Duration::from_millis(parse_env(
                "RETRY_BASE_DELAY_MS",
                default_retry.base_delay.as_millis() as u64,
            )?),
            ..default_retry
        };

        let pnl_basis = match std::env::var("PNL_BASIS") {
            Ok(v) => v.parse::<PnlBasis>()?,
            Err(_) => PnlBasis::Realized,
        };

        let scan = ScanParams {
            min_liquidity: parse_env("MIN_LIQUIDITY", defaults::MIN_LIQUIDITY)?,
            min_holders_per_side: parse_env("MIN_HOLDERS_PER_SIDE", defaults::MIN_HOLDERS_PER_SIDE)?,
            profitable_fraction_threshold: parse_env(
                "PROFITABLE_FRACTION_THRESHOLD",
                defaults::PROFITABLE_FRACTION_THRESHOLD,
            )?,
            max_concurrency: parse_env("MAX_CONCURRENCY", defaults::MAX_CONCURRENCY)?,
            top_holder_limit: parse_env("TOP_HOLDER_LIMIT", defaults::TOP_HOLDER_LIMIT)?
                .min(HOLDER_API_MAX_LIMIT),
            max_markets: match std::env::var("MAX_MARKETS") {
                Ok(v) => Some(v.parse::<usize>().map_err(|_| {
                    AppError::Config("MAX_MARKETS must be a positive integer".to_string())
                })?),
                Err(_) => None,
            },
            pnl_basis,
        };
        scan.validate()?;

        Ok(Self {
            gamma_api_url: std::env::var("GAMMA_API_URL")
                .unwrap_or_else(|_| GAMMA_API_URL.to_string()),
            data_api_url: std::env::var("DATA_API_URL")
                .unwrap_or_else(|_| DATA_API_URL.to_string()),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            db_path: std::env::var("DB_PATH").unwrap_or_else(|_| "scanner.db".to_string()),
            api_port: parse_env("API_PORT", 3000u16)?,
            scan,
            http_timeout: Duration::from_secs(parse_env(
                "HTTP_TIMEOUT_SECS",
                defaults::HTTP_TIMEOUT_SECS,
            )?),
            gamma_rps: parse_env("GAMMA_RPS", DEFAULT_GAMMA_RPS)?,
            data_rps: parse_env("DATA_RPS", DEFAULT_DATA_RPS)?,
            pnl_rps: parse_env("PNL_RPS", DEFAULT_PNL_RPS)?,
            retry,
        })
    }
}

/// Read `key` from the environment, falling back to `default` when unset.
/// A value that is set but does not parse is a configuration error.
fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> Result<T> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| AppError::Config(format!("{key} has an invalid value: {raw:?}"))),
        Err(_) => Ok(default),
    }
}
