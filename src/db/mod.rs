pub mod models;
pub mod store;

use std::time::{SystemTime, UNIX_EPOCH};

pub use models::{HolderSnapshotRow, MarketHistoryEntry, MarketVerdict};
pub use store::ScanStore;

/// Current time as nanoseconds since the Unix epoch, the unit every stored timestamp uses.
pub fn now_ns() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}
