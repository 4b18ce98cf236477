use std::collections::HashMap;

use crate::types::{HolderPosition, ImbalanceVerdict, ScanParams, Side, SideMetrics, WalletPnl};

/// Average PNL above which a flagged side earns the small score bonus.
const PNL_BONUS_SMALL_AT: f64 = 10_000.0;
/// Average PNL above which a flagged side earns the large score bonus.
const PNL_BONUS_LARGE_AT: f64 = 50_000.0;
/// Share of a side's quantity covered by `top_half_count`.
const TOP_HOLDER_SHARE: f64 = 0.5;
/// Holder count at which a side earns the full sample-size credit.
const FULL_SAMPLE: f64 = 20.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImbalanceAnalyzer {
    pub profitable_fraction_threshold: f64,
    pub min_holders_per_side: usize,
}

impl ImbalanceAnalyzer {
    pub fn new(profitable_fraction_threshold: f64, min_holders_per_side: usize) -> Self {
        Self {
            profitable_fraction_threshold,
            min_holders_per_side,
        }
    }

    pub fn from_params(params: &ScanParams) -> Self {
        Self::new(params.profitable_fraction_threshold, params.min_holders_per_side)
    }

    /// Compare the two sides of one market.
    ///
    /// Wallets without an entry in the side's PNL list are unresolved and do
    /// not count toward that side's sample. A side is flagged only when it is
    /// eligible, its profitable fraction reaches the threshold, its average
    /// PNL is positive and strictly above the other side's. Equal averages
    /// flag nothing. Output depends only on the inputs, in input order.
    pub fn evaluate(
        &self,
        market_id: &str,
        yes_positions: &[HolderPosition],
        yes_pnl: &[WalletPnl],
        no_positions: &[HolderPosition],
        no_pnl: &[WalletPnl],
    ) -> ImbalanceVerdict {
        let yes = self.side_metrics(Side::Yes, yes_positions, yes_pnl);
        let no = self.side_metrics(Side::No, no_positions, no_pnl);

        let flagged_side = if self.flags(&yes, &no) {
            Some(Side::Yes)
        } else if self.flags(&no, &yes) {
            Some(Side::No)
        } else {
            None
        };

        let imbalance_score = match flagged_side {
            Some(Side::Yes) => score(&yes, &no),
            Some(Side::No) => score(&no, &yes),
            None => 0.0,
        };

        ImbalanceVerdict {
            market_id: market_id.to_string(),
            flagged_side,
            is_flagged: flagged_side.is_some(),
            yes,
            no,
            imbalance_score,
        }
    }

    fn flags(&self, side: &SideMetrics, other: &SideMetrics) -> bool {
        side.eligible
            && side.profitable_fraction >= self.profitable_fraction_threshold
            && side.avg_pnl > other.avg_pnl
            && side.avg_pnl > 0.0
    }

    fn side_metrics(
        &self,
        side: Side,
        positions: &[HolderPosition],
        pnl: &[WalletPnl],
    ) -> SideMetrics {
        let by_wallet: HashMap<String, f64> = pnl
            .iter()
            .map(|p| (p.wallet.to_ascii_lowercase(), p.pnl))
            .collect();

        let mut resolved = 0u32;
        let mut profitable = 0u32;
        let mut pnl_sum = 0.0;
        let mut total_quantity = 0.0;
        for position in positions {
            total_quantity += position.quantity;
            if let Some(&value) = by_wallet.get(&position.wallet.to_ascii_lowercase()) {
                resolved += 1;
                pnl_sum += value;
                if value > 0.0 {
                    profitable += 1;
                }
            }
        }

        let holder_count = positions.len() as u32;
        let mut quantities: Vec<f64> = positions.iter().map(|p| p.quantity).collect();
        quantities.sort_by(|a, b| b.total_cmp(a));
        let (profitable_fraction, avg_pnl) = if resolved == 0 {
            (0.0, 0.0)
        } else {
            (profitable as f64 / resolved as f64, pnl_sum / resolved as f64)
        };

        SideMetrics {
            side,
            holder_count,
            resolved_count: resolved,
            unresolved_count: holder_count - resolved,
            profitable_count: profitable,
            profitable_fraction,
            avg_pnl,
            total_quantity,
            top_half_count: top_half_count(&quantities, total_quantity),
            data_quality_score: data_quality(holder_count, resolved),
            eligible: resolved as usize >= self.min_holders_per_side,
        }
    }
}

/// `quantities` must be sorted descending.
fn top_half_count(quantities: &[f64], total: f64) -> u32 {
    if total <= 0.0 {
        return 0;
    }
    let mut cumulative = 0.0;
    let mut count = 0;
    for q in quantities {
        cumulative += q;
        count += 1;
        if cumulative >= total * TOP_HOLDER_SHARE {
            break;
        }
    }
    count
}

/// Up to 50 points for PNL coverage, 30 for sample size, and 10 when any
/// wallet resolved. A single PNL basis is fetched, so the cross-basis
/// agreement credit never exceeds the single-basis share.
fn data_quality(holder_count: u32, resolved: u32) -> f64 {
    if holder_count == 0 {
        return 0.0;
    }
    let coverage = f64::from(resolved) / f64::from(holder_count) * 50.0;
    let sample = (f64::from(holder_count) / FULL_SAMPLE).min(1.0) * 30.0;
    let basis = if resolved > 0 { 10.0 } else { 0.0 };
    (coverage + sample + basis).min(100.0)
}

/// 0-100 strength of a flag: the winning fraction, plus half the fraction gap,
/// plus a bonus for large average PNL.
fn score(winner: &SideMetrics, loser: &SideMetrics) -> f64 {
    let base = winner.profitable_fraction * 100.0;
    let gap_bonus = (winner.profitable_fraction - loser.profitable_fraction) * 50.0;
    let pnl_bonus = if winner.avg_pnl > PNL_BONUS_LARGE_AT {
        10.0
    } else if winner.avg_pnl > PNL_BONUS_SMALL_AT {
        5.0
    } else {
        0.0
    };
    (base + gap_bonus + pnl_bonus).clamp(0.0, 100.0)
}
