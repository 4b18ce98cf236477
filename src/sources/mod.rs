//! Upstream ingestion boundary.
//!
//! Gamma and the Data API are loose about types: numbers arrive as strings,
//! list fields arrive as JSON-encoded strings, and fields come and go. Every
//! payload is decoded here into typed structs with defaulted optionals, one
//! record at a time, so a single bad record never fails a page.

pub mod holders;
pub mod markets;
pub mod pnl;

use std::sync::Mutex;

use serde::{Deserialize, Deserializer};
use tracing::warn;

use crate::types::DataWarning;

pub use holders::{HolderSource, MarketHolders};
pub use markets::{FetchStats, MarketSource};
pub use pnl::{PnlCache, PnlResolver};

/// Collects data-quality warnings for the current run.
#[derive(Default)]
pub struct WarningLog {
    entries: Mutex<Vec<DataWarning>>,
}

impl WarningLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, market_id: Option<&str>, message: impl Into<String>) {
        let message = message.into();
        warn!(market_id = market_id.unwrap_or("-"), "[DATA] {message}");
        if let Ok(mut entries) = self.entries.lock() {
            entries.push(DataWarning {
                market_id: market_id.map(str::to_string),
                message,
            });
        }
    }

    pub fn snapshot(&self) -> Vec<DataWarning> {
        self.entries.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }
}

/// Accepts a JSON number, a numeric string, or null/absent.
pub(crate) fn lenient_f64<'de, D>(d: D) -> std::result::Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Option::<serde_json::Value>::deserialize(d)?;
    Ok(v.as_ref().and_then(value_as_f64))
}

/// Accepts a JSON array, or a string holding a JSON-encoded array.
/// Elements may be strings or numbers; both are returned as strings.
pub(crate) fn lenient_string_list<'de, D>(d: D) -> std::result::Result<Option<Vec<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Option::<serde_json::Value>::deserialize(d)?;
    Ok(v.and_then(value_as_string_list))
}

pub(crate) fn value_as_f64(v: &serde_json::Value) -> Option<f64> {
    v.as_f64()
        .or_else(|| v.as_str().and_then(|s| s.trim().parse().ok()))
        .filter(|x: &f64| x.is_finite())
}

fn value_as_string_list(v: serde_json::Value) -> Option<Vec<String>> {
    let arr = match v {
        serde_json::Value::Array(a) => a,
        serde_json::Value::String(s) => serde_json::from_str::<Vec<serde_json::Value>>(&s).ok()?,
        _ => return None,
    };
    arr.into_iter()
        .map(|e| match e {
            serde_json::Value::String(s) => Some(s),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
        .collect()
}

/// Parse an RFC 3339 / ISO 8601 UTC timestamp string to Unix seconds.
pub fn parse_iso_to_unix_secs(s: &str) -> Option<f64> {
    let s = s.trim();
    if !s.is_ascii() {
        return None;
    }
    let s = s.strip_suffix('Z').unwrap_or(s);
    let s = if let Some(dot) = s.find('.') { &s[..dot] } else { s };
    let s = if s.len() > 19 {
        let b = s.as_bytes()[19];
        if b == b'+' || b == b'-' { &s[..19] } else { s }
    } else {
        s
    };
    let b = s.as_bytes();
    if b.len() < 10 || b[4] != b'-' || b[7] != b'-' {
        return None;
    }
    if b.len() >= 19 && (!matches!(b[10], b'T' | b' ') || b[13] != b':' || b[16] != b':') {
        return None;
    }
    let (year, month, day, hour, minute, second): (i64, i64, i64, i64, i64, i64) =
        if s.len() == 10 {
            (s[0..4].parse().ok()?, s[5..7].parse().ok()?, s[8..10].parse().ok()?, 0, 0, 0)
        } else if s.len() >= 19 {
            (s[0..4].parse().ok()?, s[5..7].parse().ok()?, s[8..10].parse().ok()?,
             s[11..13].parse().ok()?, s[14..16].parse().ok()?, s[17..19].parse().ok()?)
        } else {
            return None;
        };

    let a = (14 - month) / 12;
    let y = year + 4800 - a;
    let m = month + 12 * a - 3;
    let jdn = day + (153 * m + 2) / 5 + 365 * y + y / 4 - y / 100 + y / 400 - 32045;
    let unix_days = jdn - 2_440_588;
    Some((unix_days * 86400 + hour * 3600 + minute * 60 + second) as f64)
}
