use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::db::{HolderSnapshotRow, MarketHistoryEntry, MarketVerdict, ScanStore};
use crate::error::AppError;
use crate::types::{DataWarning, MarketSkip, RunId, RunRecord, Side};

/// Read-only view over the run store. No handler writes.
#[derive(Clone)]
pub struct ApiState {
    pub store: ScanStore,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/runs/latest", get(get_latest_run))
        .route("/runs/:id", get(get_run))
        .route("/runs/:id/verdicts", get(get_run_verdicts))
        .route("/runs/:id/markets/:market_id/holders", get(get_market_holders))
        .route("/markets/:market_id/history", get(get_market_history))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Query param structs
// ---------------------------------------------------------------------------

#[derive(Deserialize, Default)]
pub struct LatestRunQuery {
    /// Also return a run that is still running or was aborted.
    pub include_incomplete: Option<bool>,
}

#[derive(Deserialize, Default)]
pub struct VerdictsQuery {
    pub flagged_only: Option<bool>,
}

#[derive(Deserialize, Default)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

const DEFAULT_HISTORY_LIMIT: usize = 20;
const MAX_HISTORY_LIMIT: usize = 200;

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct RunResponse {
    #[serde(flatten)]
    pub run: RunRecord,
    /// Only true for completed runs; anything else is partial data.
    pub is_final: bool,
    pub skips: Vec<MarketSkip>,
    pub warnings: Vec<DataWarning>,
}

#[derive(Serialize)]
pub struct HoldersResponse {
    pub run_id: RunId,
    pub market_id: String,
    pub yes: Vec<HolderSnapshotRow>,
    pub no: Vec<HolderSnapshotRow>,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn get_latest_run(
    State(state): State<ApiState>,
    Query(params): Query<LatestRunQuery>,
) -> Result<Json<RunResponse>, AppError> {
    let run = if params.include_incomplete.unwrap_or(false) {
        state.store.latest_run().await?
    } else {
        state.store.latest_completed_run().await?
    };
    let run = run.ok_or_else(|| AppError::NotFound("no scan runs recorded".to_string()))?;
    Ok(Json(run_response(&state.store, run).await?))
}

async fn get_run(
    State(state): State<ApiState>,
    Path(run_id): Path<RunId>,
) -> Result<Json<RunResponse>, AppError> {
    let run = require_run(&state.store, run_id).await?;
    Ok(Json(run_response(&state.store, run).await?))
}

async fn get_run_verdicts(
    State(state): State<ApiState>,
    Path(run_id): Path<RunId>,
    Query(params): Query<VerdictsQuery>,
) -> Result<Json<Vec<MarketVerdict>>, AppError> {
    require_run(&state.store, run_id).await?;
    let verdicts = if params.flagged_only.unwrap_or(false) {
        state.store.flagged_for_run(run_id).await?
    } else {
        state.store.market_verdicts_for_run(run_id).await?
    };
    Ok(Json(verdicts))
}

async fn get_market_holders(
    State(state): State<ApiState>,
    Path((run_id, market_id)): Path<(RunId, String)>,
) -> Result<Json<HoldersResponse>, AppError> {
    require_run(&state.store, run_id).await?;
    let rows = state.store.holders_for_market(run_id, &market_id).await?;
    if rows.is_empty() {
        return Err(AppError::NotFound(format!(
            "no holders recorded for market {market_id} in run {run_id}"
        )));
    }

    let yes_label = Side::Yes.to_string();
    let (yes, no): (Vec<_>, Vec<_>) = rows.into_iter().partition(|r| r.side == yes_label);
    Ok(Json(HoldersResponse {
        run_id,
        market_id,
        yes,
        no,
    }))
}

async fn get_market_history(
    State(state): State<ApiState>,
    Path(market_id): Path<String>,
    Query(params): Query<HistoryQuery>,
) -> Result<Json<Vec<MarketHistoryEntry>>, AppError> {
    let limit = params
        .limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .clamp(1, MAX_HISTORY_LIMIT);
    let history = state.store.market_history(&market_id, limit).await?;
    if history.is_empty() {
        return Err(AppError::NotFound(format!("no verdicts recorded for market {market_id}")));
    }
    Ok(Json(history))
}

async fn require_run(store: &ScanStore, run_id: RunId) -> Result<RunRecord, AppError> {
    store
        .run(run_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("run {run_id} not found")))
}

async fn run_response(store: &ScanStore, run: RunRecord) -> Result<RunResponse, AppError> {
    let skips = store.skips_for_run(run.id).await?;
    let warnings = store.warnings_for_run(run.id).await?;
    Ok(RunResponse {
        is_final: run.is_final(),
        run,
        skips,
        warnings,
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::analysis::ImbalanceAnalyzer;
    use crate::types::{HolderPosition, Market, RunStatus, RunSummary, ScanParams, WalletPnl};

    fn market() -> Market {
        Market {
            id: "0xm".into(),
            question: "Will it?".into(),
            slug: "will-it".into(),
            yes_label: "Yes".into(),
            no_label: "No".into(),
            yes_token_id: "y".into(),
            no_token_id: "n".into(),
            yes_price: 0.4,
            no_price: 0.6,
            liquidity: 3000.0,
            volume: 9000.0,
            active: true,
            close_time_iso: None,
        }
    }

    async fn seeded() -> (ApiState, RunId) {
        let store = ScanStore::in_memory().await.unwrap();
        let run_id = store.begin_run(&ScanParams::default()).await.unwrap();

        let holder = |side, wallet: &str, rank| HolderPosition {
            wallet: wallet.to_string(),
            side,
            quantity: 10.0,
            rank,
            display_name: None,
        };
        let yes = vec![holder(Side::Yes, "0xa", 1)];
        let no = vec![holder(Side::No, "0xb", 1)];
        let yes_pnl = vec![WalletPnl { wallet: "0xa".into(), pnl: 5.0 }];
        let verdict = ImbalanceAnalyzer::new(0.6, 1).evaluate("0xm", &yes, &yes_pnl, &no, &[]);
        let pnl: HashMap<_, _> = [("0xa".to_string(), 5.0)].into_iter().collect();
        let all: Vec<_> = yes.into_iter().chain(no).collect();
        store
            .record_analyzed_market(run_id, &market(), &all, &pnl, &verdict)
            .await
            .unwrap();
        (ApiState { store }, run_id)
    }

    #[tokio::test]
    async fn latest_hides_incomplete_runs_unless_asked() {
        let (state, run_id) = seeded().await;

        let err = get_latest_run(State(state.clone()), Query(LatestRunQuery::default()))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, AppError::NotFound(_)));

        let Json(resp) = get_latest_run(
            State(state.clone()),
            Query(LatestRunQuery { include_incomplete: Some(true) }),
        )
        .await
        .unwrap();
        assert_eq!(resp.run.id, run_id);
        assert_eq!(resp.run.status, RunStatus::Running);
        assert!(!resp.is_final);

        state.store.complete_run(run_id, &RunSummary::default()).await.unwrap();
        let Json(resp) = get_latest_run(State(state), Query(LatestRunQuery::default()))
            .await
            .unwrap();
        assert!(resp.is_final);
    }

    #[tokio::test]
    async fn verdicts_can_be_filtered_to_flagged() {
        let (state, run_id) = seeded().await;

        let Json(all) = get_run_verdicts(State(state.clone()), Path(run_id), Query(VerdictsQuery::default()))
            .await
            .unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].market.question, "Will it?");

        let Json(flagged) = get_run_verdicts(
            State(state),
            Path(run_id),
            Query(VerdictsQuery { flagged_only: Some(true) }),
        )
        .await
        .unwrap();
        assert_eq!(flagged.len(), 1);
        assert_eq!(flagged[0].verdict.flagged_side, Some(Side::Yes));
    }

    #[tokio::test]
    async fn holders_are_split_by_side() {
        let (state, run_id) = seeded().await;

        let Json(resp) = get_market_holders(State(state.clone()), Path((run_id, "0xm".to_string())))
            .await
            .unwrap();
        assert_eq!(resp.yes.len(), 1);
        assert_eq!(resp.yes[0].pnl, Some(5.0));
        assert_eq!(resp.no[0].pnl, None);

        let err = get_market_holders(State(state), Path((run_id, "0xnope".to_string())))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn market_history_lists_each_run() {
        let (state, run_id) = seeded().await;

        let Json(history) = get_market_history(
            State(state.clone()),
            Path("0xm".to_string()),
            Query(HistoryQuery::default()),
        )
        .await
        .unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].run_id, run_id);
        assert_eq!(history[0].run_status, RunStatus::Running);

        let err = get_market_history(State(state), Path("0xnope".to_string()), Query(HistoryQuery::default()))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn unknown_run_is_not_found() {
        let (state, _) = seeded().await;
        let err = get_run(State(state), Path(999)).await.err().unwrap();
        assert!(matches!(err, AppError::NotFound(_)));
    }
}
