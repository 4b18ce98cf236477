use std::collections::HashMap;
use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::info;

use super::models::{
    HistoryRow, HolderSnapshotRow, MarketHistoryEntry, MarketRow, MarketVerdict, RunRow, SkipRow,
    VerdictRow, WarningRow,
};
use super::now_ns;
use crate::error::{AppError, Result};
use crate::types::{
    DataWarning, HolderPosition, ImbalanceVerdict, Market, MarketSkip, RunId, RunRecord,
    RunStatus, RunSummary, ScanParams,
};

const RUN_COLUMNS: &str = "id, started_at, completed_at, status, abort_reason, min_liquidity, \
    min_holders_per_side, profitable_fraction_threshold, max_concurrency, top_holder_limit, \
    max_markets, pnl_basis, markets_attempted, markets_analyzed, markets_skipped, \
    markets_flagged, unresolved_wallets";

const VERDICT_COLUMNS: &str = "market_id, is_flagged, flagged_side, imbalance_score, \
    yes_holder_count, yes_resolved_count, yes_profitable_count, yes_profitable_fraction, \
    yes_avg_pnl, yes_total_quantity, yes_top_half_count, yes_data_quality, yes_eligible, \
    no_holder_count, no_resolved_count, no_profitable_count, no_profitable_fraction, \
    no_avg_pnl, no_total_quantity, no_top_half_count, no_data_quality, no_eligible";

const MARKET_COLUMNS: &str = "market_id, question, slug, yes_label, no_label, yes_token_id, \
    no_token_id, yes_price, no_price, liquidity, volume, active, close_time_iso";

/// Append-only run store over SQLite.
///
/// A run row starts as `running` and is closed exactly once, either as
/// `completed` or `aborted`. Readers use the status and `completed_at` to tell
/// final results from an interrupted run.
#[derive(Clone)]
pub struct ScanStore {
    pool: SqlitePool,
}

impl ScanStore {
    pub async fn open(db_path: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(&format!("sqlite:{db_path}"))?
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        info!("Database ready at {db_path}");
        Ok(Self { pool })
    }

    /// Fresh private database, used by tests.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub async fn begin_run(&self, params: &ScanParams) -> Result<RunId> {
        let max_markets = params.max_markets.map(|m| m as i64);
        let result = sqlx::query(
            r#"
            INSERT INTO scan_runs (
                started_at, status, min_liquidity, min_holders_per_side,
                profitable_fraction_threshold, max_concurrency, top_holder_limit,
                max_markets, pnl_basis
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(now_ns())
        .bind(RunStatus::Running.to_string())
        .bind(params.min_liquidity)
        .bind(params.min_holders_per_side as i64)
        .bind(params.profitable_fraction_threshold)
        .bind(params.max_concurrency as i64)
        .bind(params.top_holder_limit as i64)
        .bind(max_markets)
        .bind(params.pnl_basis.to_string())
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn record_market(&self, run_id: RunId, market: &Market) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        insert_market(&mut conn, run_id, market).await
    }

    pub async fn record_verdict(&self, run_id: RunId, verdict: &ImbalanceVerdict) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        insert_verdict(&mut conn, run_id, verdict).await
    }

    /// Market snapshot, holders and verdict for one market, in one transaction.
    ///
    /// `pnl` maps lower-cased wallet to resolved PNL; holders missing from it
    /// are stored with NULL PNL.
    pub async fn record_analyzed_market(
        &self,
        run_id: RunId,
        market: &Market,
        holders: &[HolderPosition],
        pnl: &HashMap<String, f64>,
        verdict: &ImbalanceVerdict,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        insert_market(&mut tx, run_id, market).await?;
        insert_holders(&mut tx, run_id, &market.id, holders, pnl).await?;
        insert_verdict(&mut tx, run_id, verdict).await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn record_skip(&self, run_id: RunId, skip: &MarketSkip) -> Result<()> {
        sqlx::query(
            "INSERT INTO market_skips (run_id, market_id, stage, reason, recorded_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(run_id)
        .bind(&skip.market_id)
        .bind(skip.stage.to_string())
        .bind(&skip.reason)
        .bind(now_ns())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn record_warnings(&self, run_id: RunId, warnings: &[DataWarning]) -> Result<()> {
        if warnings.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        for w in warnings {
            sqlx::query("INSERT INTO run_warnings (run_id, market_id, message) VALUES (?, ?, ?)")
                .bind(run_id)
                .bind(&w.market_id)
                .bind(&w.message)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn complete_run(&self, run_id: RunId, summary: &RunSummary) -> Result<()> {
        self.close_run(run_id, RunStatus::Completed, summary, None).await
    }

    pub async fn abort_run(&self, run_id: RunId, summary: &RunSummary, reason: &str) -> Result<()> {
        self.close_run(run_id, RunStatus::Aborted, summary, Some(reason)).await
    }

    async fn close_run(
        &self,
        run_id: RunId,
        status: RunStatus,
        summary: &RunSummary,
        reason: Option<&str>,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE scan_runs SET
                status = ?, completed_at = ?, abort_reason = ?,
                markets_attempted = ?, markets_analyzed = ?, markets_skipped = ?,
                markets_flagged = ?, unresolved_wallets = ?
            WHERE id = ? AND status = 'running'
            "#,
        )
        .bind(status.to_string())
        .bind(now_ns())
        .bind(reason)
        .bind(summary.markets_attempted as i64)
        .bind(summary.markets_analyzed as i64)
        .bind(summary.markets_skipped as i64)
        .bind(summary.markets_flagged as i64)
        .bind(summary.unresolved_wallets as i64)
        .bind(run_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("no running scan run with id {run_id}")));
        }
        Ok(())
    }

    /// Most recent run, whatever its status.
    pub async fn latest_run(&self) -> Result<Option<RunRecord>> {
        let sql = format!("SELECT {RUN_COLUMNS} FROM scan_runs ORDER BY id DESC LIMIT 1");
        let row: Option<RunRow> = sqlx::query_as(&sql).fetch_optional(&self.pool).await?;
        row.map(RunRow::into_record).transpose()
    }

    pub async fn latest_completed_run(&self) -> Result<Option<RunRecord>> {
        let sql = format!(
            "SELECT {RUN_COLUMNS} FROM scan_runs \
             WHERE status = 'completed' AND completed_at IS NOT NULL \
             ORDER BY id DESC LIMIT 1"
        );
        let row: Option<RunRow> = sqlx::query_as(&sql).fetch_optional(&self.pool).await?;
        row.map(RunRow::into_record).transpose()
    }

    pub async fn run(&self, run_id: RunId) -> Result<Option<RunRecord>> {
        let sql = format!("SELECT {RUN_COLUMNS} FROM scan_runs WHERE id = ?");
        let row: Option<RunRow> = sqlx::query_as(&sql)
            .bind(run_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(RunRow::into_record).transpose()
    }

    /// Verdicts in the order they were recorded.
    pub async fn verdicts_for_run(&self, run_id: RunId) -> Result<Vec<ImbalanceVerdict>> {
        let sql = format!("SELECT {VERDICT_COLUMNS} FROM verdicts WHERE run_id = ? ORDER BY id");
        let rows: Vec<VerdictRow> = sqlx::query_as(&sql)
            .bind(run_id)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(VerdictRow::into_verdict).collect()
    }

    /// Flagged verdicts with their market snapshot, strongest first.
    pub async fn flagged_for_run(&self, run_id: RunId) -> Result<Vec<MarketVerdict>> {
        self.market_verdicts(run_id, true).await
    }

    /// Every verdict of the run with its market snapshot, strongest first.
    pub async fn market_verdicts_for_run(&self, run_id: RunId) -> Result<Vec<MarketVerdict>> {
        self.market_verdicts(run_id, false).await
    }

    async fn market_verdicts(&self, run_id: RunId, flagged_only: bool) -> Result<Vec<MarketVerdict>> {
        let filter = if flagged_only { "AND is_flagged = 1" } else { "" };
        let sql = format!(
            "SELECT {VERDICT_COLUMNS} FROM verdicts WHERE run_id = ? {filter} \
             ORDER BY imbalance_score DESC, market_id"
        );
        let verdicts: Vec<VerdictRow> = sqlx::query_as(&sql)
            .bind(run_id)
            .fetch_all(&self.pool)
            .await?;

        let mut markets: HashMap<String, Market> = self
            .markets_for_run(run_id)
            .await?
            .into_iter()
            .map(|m| (m.id.clone(), m))
            .collect();

        let mut out = Vec::with_capacity(verdicts.len());
        for row in verdicts {
            let verdict = row.into_verdict()?;
            let market = markets.remove(&verdict.market_id).ok_or_else(|| {
                AppError::NotFound(format!("market {} missing from run {run_id}", verdict.market_id))
            })?;
            out.push(MarketVerdict { market, verdict });
        }
        Ok(out)
    }

    /// The market's verdicts across runs, newest run first. Runs of any status
    /// are included; `run_status` tells final results from partial ones.
    pub async fn market_history(&self, market_id: &str, limit: usize) -> Result<Vec<MarketHistoryEntry>> {
        let verdict_columns = VERDICT_COLUMNS
            .split(',')
            .map(|c| format!("v.{}", c.trim()))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT v.run_id AS run_id, r.started_at AS started_at, r.status AS status, \
                    m.yes_price AS yes_price, m.no_price AS no_price, {verdict_columns} \
             FROM verdicts v \
             JOIN scan_runs r ON r.id = v.run_id \
             JOIN markets m ON m.run_id = v.run_id AND m.market_id = v.market_id \
             WHERE v.market_id = ? \
             ORDER BY v.run_id DESC LIMIT ?"
        );
        let rows: Vec<HistoryRow> = sqlx::query_as(&sql)
            .bind(market_id)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(HistoryRow::into_entry).collect()
    }

    pub async fn markets_for_run(&self, run_id: RunId) -> Result<Vec<Market>> {
        let sql = format!("SELECT {MARKET_COLUMNS} FROM markets WHERE run_id = ? ORDER BY market_id");
        let rows: Vec<MarketRow> = sqlx::query_as(&sql)
            .bind(run_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(Market::from).collect())
    }

    pub async fn skips_for_run(&self, run_id: RunId) -> Result<Vec<MarketSkip>> {
        let rows: Vec<SkipRow> = sqlx::query_as(
            "SELECT market_id, stage, reason FROM market_skips WHERE run_id = ? ORDER BY id",
        )
        .bind(run_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(SkipRow::into_skip).collect()
    }

    pub async fn warnings_for_run(&self, run_id: RunId) -> Result<Vec<DataWarning>> {
        let rows: Vec<WarningRow> = sqlx::query_as(
            "SELECT market_id, message FROM run_warnings WHERE run_id = ? ORDER BY id",
        )
        .bind(run_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(DataWarning::from).collect())
    }

    pub async fn holders_for_market(
        &self,
        run_id: RunId,
        market_id: &str,
    ) -> Result<Vec<HolderSnapshotRow>> {
        let rows = sqlx::query_as(
            r#"
            SELECT side, rank, wallet, quantity, display_name, pnl
            FROM holder_snapshots
            WHERE run_id = ? AND market_id = ?
            ORDER BY side DESC, rank
            "#,
        )
        .bind(run_id)
        .bind(market_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

async fn insert_market(conn: &mut SqliteConnection, run_id: RunId, m: &Market) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO markets (
            run_id, market_id, question, slug, yes_label, no_label, yes_token_id, no_token_id,
            yes_price, no_price, liquidity, volume, active, close_time_iso, recorded_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(run_id)
    .bind(&m.id)
    .bind(&m.question)
    .bind(&m.slug)
    .bind(&m.yes_label)
    .bind(&m.no_label)
    .bind(&m.yes_token_id)
    .bind(&m.no_token_id)
    .bind(m.yes_price)
    .bind(m.no_price)
    .bind(m.liquidity)
    .bind(m.volume)
    .bind(m.active)
    .bind(&m.close_time_iso)
    .bind(now_ns())
    .execute(conn)
    .await?;
    Ok(())
}

async fn insert_holders(
    conn: &mut SqliteConnection,
    run_id: RunId,
    market_id: &str,
    holders: &[HolderPosition],
    pnl: &HashMap<String, f64>,
) -> Result<()> {
    for h in holders {
        sqlx::query(
            r#"
            INSERT INTO holder_snapshots (run_id, market_id, side, rank, wallet, quantity, display_name, pnl)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(run_id)
        .bind(market_id)
        .bind(h.side.to_string())
        .bind(h.rank as i64)
        .bind(&h.wallet)
        .bind(h.quantity)
        .bind(&h.display_name)
        .bind(pnl.get(&h.wallet.to_ascii_lowercase()).copied())
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

async fn insert_verdict(
    conn: &mut SqliteConnection,
    run_id: RunId,
    v: &ImbalanceVerdict,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO verdicts (
            run_id, market_id, is_flagged, flagged_side, imbalance_score,
            yes_holder_count, yes_resolved_count, yes_profitable_count, yes_profitable_fraction,
            yes_avg_pnl, yes_total_quantity, yes_top_half_count, yes_data_quality, yes_eligible,
            no_holder_count, no_resolved_count, no_profitable_count, no_profitable_fraction,
            no_avg_pnl, no_total_quantity, no_top_half_count, no_data_quality, no_eligible,
            recorded_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(run_id)
    .bind(&v.market_id)
    .bind(v.is_flagged)
    .bind(v.flagged_side.map(|s| s.to_string()))
    .bind(v.imbalance_score)
    .bind(v.yes.holder_count as i64)
    .bind(v.yes.resolved_count as i64)
    .bind(v.yes.profitable_count as i64)
    .bind(v.yes.profitable_fraction)
    .bind(v.yes.avg_pnl)
    .bind(v.yes.total_quantity)
    .bind(v.yes.top_half_count as i64)
    .bind(v.yes.data_quality_score)
    .bind(v.yes.eligible)
    .bind(v.no.holder_count as i64)
    .bind(v.no.resolved_count as i64)
    .bind(v.no.profitable_count as i64)
    .bind(v.no.profitable_fraction)
    .bind(v.no.avg_pnl)
    .bind(v.no.total_quantity)
    .bind(v.no.top_half_count as i64)
    .bind(v.no.data_quality_score)
    .bind(v.no.eligible)
    .bind(now_ns())
    .execute(conn)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::ImbalanceAnalyzer;
    use crate::types::{MarketStage, Side, WalletPnl};

    fn market(id: &str) -> Market {
        Market {
            id: id.to_string(),
            question: format!("{id}?"),
            slug: id.to_string(),
            yes_label: "Yes".into(),
            no_label: "No".into(),
            yes_token_id: format!("{id}-y"),
            no_token_id: format!("{id}-n"),
            yes_price: 0.7,
            no_price: 0.3,
            liquidity: 12_000.0,
            volume: 55_000.0,
            active: true,
            close_time_iso: Some("2099-01-01T00:00:00Z".into()),
        }
    }

    fn holders(side: Side, n: usize) -> Vec<HolderPosition> {
        (0..n)
            .map(|i| HolderPosition {
                wallet: format!("0x{side}{i}").to_ascii_lowercase(),
                side,
                quantity: 1000.0 - i as f64,
                rank: i as u32 + 1,
                display_name: None,
            })
            .collect()
    }

    fn flagged_verdict(market_id: &str) -> (Vec<HolderPosition>, HashMap<String, f64>, ImbalanceVerdict) {
        let yes = holders(Side::Yes, 5);
        let no = holders(Side::No, 5);
        let yes_pnl: Vec<_> = yes.iter().map(|h| WalletPnl { wallet: h.wallet.clone(), pnl: 100.0 }).collect();
        // last NO wallet stays unresolved
        let no_pnl: Vec<_> = no[..4].iter().map(|h| WalletPnl { wallet: h.wallet.clone(), pnl: -5.0 }).collect();
        let verdict = ImbalanceAnalyzer::new(0.6, 3).evaluate(market_id, &yes, &yes_pnl, &no, &no_pnl);

        let pnl = yes_pnl.iter().chain(&no_pnl).map(|p| (p.wallet.clone(), p.pnl)).collect();
        let all = yes.into_iter().chain(no).collect();
        (all, pnl, verdict)
    }

    #[tokio::test]
    async fn run_lifecycle_and_verdict_round_trip() {
        let store = ScanStore::in_memory().await.unwrap();
        let params = ScanParams { max_markets: Some(10), ..ScanParams::default() };
        let run_id = store.begin_run(&params).await.unwrap();

        let running = store.latest_run().await.unwrap().unwrap();
        assert_eq!(running.status, RunStatus::Running);
        assert!(!running.is_final());
        assert!(store.latest_completed_run().await.unwrap().is_none());

        let (all, pnl, verdict) = flagged_verdict("0xm1");
        store
            .record_analyzed_market(run_id, &market("0xm1"), &all, &pnl, &verdict)
            .await
            .unwrap();

        let summary = RunSummary {
            markets_attempted: 1,
            markets_analyzed: 1,
            markets_flagged: 1,
            unresolved_wallets: 1,
            ..RunSummary::default()
        };
        store.complete_run(run_id, &summary).await.unwrap();

        let done = store.latest_completed_run().await.unwrap().unwrap();
        assert_eq!(done.id, run_id);
        assert!(done.is_final());
        assert_eq!(done.params, params);
        assert_eq!(done.markets_flagged, 1);

        let stored = store.verdicts_for_run(run_id).await.unwrap();
        assert_eq!(stored, vec![verdict.clone()]);

        let flagged = store.flagged_for_run(run_id).await.unwrap();
        assert_eq!(flagged.len(), 1);
        assert_eq!(flagged[0].market, market("0xm1"));
        assert_eq!(flagged[0].verdict.flagged_side, Some(Side::Yes));

        let snapshot = store.holders_for_market(run_id, "0xm1").await.unwrap();
        assert_eq!(snapshot.len(), 10);
        assert_eq!(snapshot[0].side, "YES");
        assert_eq!(snapshot[0].rank, 1);
        assert_eq!(snapshot.iter().filter(|h| h.pnl.is_none()).count(), 1);
    }

    #[tokio::test]
    async fn closed_runs_cannot_be_closed_again() {
        let store = ScanStore::in_memory().await.unwrap();
        let run_id = store.begin_run(&ScanParams::default()).await.unwrap();
        store
            .abort_run(run_id, &RunSummary::default(), "market list unavailable")
            .await
            .unwrap();

        let err = store.complete_run(run_id, &RunSummary::default()).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));

        let run = store.run(run_id).await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Aborted);
        assert_eq!(run.abort_reason.as_deref(), Some("market list unavailable"));
        assert!(!run.is_final());
        assert!(store.latest_completed_run().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn interrupted_run_is_not_reported_as_completed() {
        let store = ScanStore::in_memory().await.unwrap();
        let first = store.begin_run(&ScanParams::default()).await.unwrap();
        store.complete_run(first, &RunSummary::default()).await.unwrap();
        let second = store.begin_run(&ScanParams::default()).await.unwrap();

        assert_eq!(store.latest_run().await.unwrap().unwrap().id, second);
        assert_eq!(store.latest_completed_run().await.unwrap().unwrap().id, first);
    }

    #[tokio::test]
    async fn skips_and_warnings_are_kept_per_run() {
        let store = ScanStore::in_memory().await.unwrap();
        let run_id = store.begin_run(&ScanParams::default()).await.unwrap();

        let skip = MarketSkip {
            market_id: "0xbad".into(),
            stage: MarketStage::FetchingHolders,
            reason: "data-api: HTTP 503".into(),
        };
        store.record_skip(run_id, &skip).await.unwrap();
        store
            .record_warnings(
                run_id,
                &[DataWarning { market_id: Some("0xm".into()), message: "volume missing".into() }],
            )
            .await
            .unwrap();

        assert_eq!(store.skips_for_run(run_id).await.unwrap(), vec![skip]);
        assert_eq!(store.warnings_for_run(run_id).await.unwrap().len(), 1);
        assert!(store.skips_for_run(run_id + 1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn market_history_spans_runs_newest_first() {
        let store = ScanStore::in_memory().await.unwrap();
        let (all, pnl, verdict) = flagged_verdict("0xm1");

        let first = store.begin_run(&ScanParams::default()).await.unwrap();
        store
            .record_analyzed_market(first, &market("0xm1"), &all, &pnl, &verdict)
            .await
            .unwrap();
        store.complete_run(first, &RunSummary::default()).await.unwrap();

        let second = store.begin_run(&ScanParams::default()).await.unwrap();
        let mut repriced = market("0xm1");
        repriced.yes_price = 0.9;
        store
            .record_analyzed_market(second, &repriced, &all, &pnl, &verdict)
            .await
            .unwrap();
        let (other_holders, other_pnl, other) = flagged_verdict("0xm2");
        store
            .record_analyzed_market(second, &market("0xm2"), &other_holders, &other_pnl, &other)
            .await
            .unwrap();

        let history = store.market_history("0xm1", 10).await.unwrap();
        let runs: Vec<_> = history.iter().map(|h| h.run_id).collect();
        assert_eq!(runs, vec![second, first]);
        assert_eq!(history[0].run_status, RunStatus::Running);
        assert_eq!(history[0].yes_price, 0.9);
        assert_eq!(history[1].run_status, RunStatus::Completed);
        assert_eq!(history[1].verdict, verdict);

        assert_eq!(store.market_history("0xm1", 1).await.unwrap().len(), 1);
        assert!(store.market_history("0xnone", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn verdict_needs_its_market_snapshot() {
        let store = ScanStore::in_memory().await.unwrap();
        let run_id = store.begin_run(&ScanParams::default()).await.unwrap();
        let (_, _, verdict) = flagged_verdict("0xorphan");

        assert!(store.record_verdict(run_id, &verdict).await.is_err());

        store.record_market(run_id, &market("0xorphan")).await.unwrap();
        store.record_verdict(run_id, &verdict).await.unwrap();
        // one immutable verdict per market per run
        assert!(store.record_verdict(run_id, &verdict).await.is_err());
    }
}
