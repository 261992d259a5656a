use sqlx::{Acquire, Executor, Sqlite};

use crate::db::ScanDb;
use crate::error::{Result, StoreError};
use crate::models::*;
use wheel_core::OwnerId;

const RESULT_ORDER: &str = "ORDER BY passed DESC, composite_score IS NULL, composite_score DESC, ticker ASC";

/// Append-only scan history, one row per (owner, ticker, scan_date).
#[derive(Clone)]
pub struct ScanResultStore {
    db: ScanDb,
}

impl ScanResultStore {
    pub fn new(db: ScanDb) -> Self {
        Self { db }
    }

    /// Insert one ticker's outcome. A second row for the same key is rejected by the schema.
    pub async fn insert_result(&self, row: &ScanResultRow) -> Result<i64> {
        insert_row(self.db.pool(), row).await
    }

    /// Write a run's rows and its run record in one transaction.
    ///
    /// Each row goes through its own savepoint, so a rejected row is skipped and
    /// listed in the stored run's `failed_tickers`. When rows were given but none
    /// could be written, nothing is committed and `NothingPersisted` is returned.
    /// Readers never see a partial run: `latest_results` only changes on commit.
    pub async fn save_run(&self, rows: &[ScanResultRow], run: ScanRun) -> Result<ScanRun> {
        let mut tx = self.db.pool().begin().await?;
        let mut persisted = 0usize;
        let mut failed = Vec::new();

        for row in rows {
            let mut savepoint = tx.begin().await?;
            match insert_row(&mut *savepoint, row).await {
                Ok(_) => {
                    savepoint.commit().await?;
                    persisted += 1;
                }
                Err(e) => {
                    tracing::warn!("Failed to persist scan result for {}: {}", row.ticker, e);
                    savepoint.rollback().await?;
                    failed.push(row.ticker.clone());
                }
            }
        }

        if persisted == 0 && !rows.is_empty() {
            tx.rollback().await?;
            return Err(StoreError::NothingPersisted { attempted: rows.len() });
        }

        let mut run = ScanRun {
            persisted_count: persisted as i64,
            failed_tickers: failed.join(","),
            ..run
        };
        run.id = Some(insert_run(&mut *tx, &run).await?);
        tx.commit().await?;

        Ok(run)
    }

    pub async fn latest_scan_date(&self, owner: &OwnerId) -> Result<Option<String>> {
        let latest: Option<(Option<String>,)> =
            sqlx::query_as("SELECT MAX(scan_date) FROM scan_results WHERE owner = ?")
                .bind(owner.as_str())
                .fetch_optional(self.db.pool())
                .await?;

        Ok(latest.and_then(|(d,)| d))
    }

    /// All rows of the owner's most recent run, best candidates first
    pub async fn latest_results(&self, owner: &OwnerId) -> Result<Vec<ScanResultRow>> {
        match self.latest_scan_date(owner).await? {
            Some(scan_date) => self.results_for(owner, &scan_date).await,
            None => Ok(Vec::new()),
        }
    }

    pub async fn results_for(&self, owner: &OwnerId, scan_date: &str) -> Result<Vec<ScanResultRow>> {
        let query = format!(
            "SELECT * FROM scan_results WHERE owner = ? AND scan_date = ? {}",
            RESULT_ORDER
        );

        let rows = sqlx::query_as::<_, ScanResultRow>(&query)
            .bind(owner.as_str())
            .bind(scan_date)
            .fetch_all(self.db.pool())
            .await?;

        Ok(rows)
    }

    pub async fn phase_counts(&self, owner: &OwnerId, scan_date: &str) -> Result<PhaseCounts> {
        let counts = sqlx::query_as::<_, PhaseCounts>(
            r#"
            SELECT
                COUNT(*) AS total,
                COALESCE(SUM(CASE WHEN phase1_passed = 1 THEN 1 ELSE 0 END), 0) AS phase1_passed,
                COALESCE(SUM(CASE WHEN phase2_passed = 1 THEN 1 ELSE 0 END), 0) AS phase2_passed,
                COALESCE(SUM(CASE WHEN phase3_passed = 1 THEN 1 ELSE 0 END), 0) AS phase3_passed,
                COALESCE(SUM(CASE WHEN composite_score IS NOT NULL THEN 1 ELSE 0 END), 0) AS scored,
                COALESCE(SUM(CASE WHEN passed = 1 THEN 1 ELSE 0 END), 0) AS passed,
                AVG(composite_score) AS avg_composite
            FROM scan_results
            WHERE owner = ? AND scan_date = ?
            "#,
        )
        .bind(owner.as_str())
        .bind(scan_date)
        .fetch_one(self.db.pool())
        .await?;

        Ok(counts)
    }

    /// Funnel summary of the latest run; `None` when the owner has never scanned
    pub async fn scan_metadata(&self, owner: &OwnerId) -> Result<Option<ScanMetadata>> {
        let Some(scan_date) = self.latest_scan_date(owner).await? else {
            return Ok(None);
        };

        let counts = self.phase_counts(owner, &scan_date).await?;
        let run = self.run_for(owner, &scan_date).await?;

        Ok(Some(ScanMetadata {
            owner: owner.to_string(),
            scan_date,
            counts,
            run,
        }))
    }

    /// Prior runs, newest first
    pub async fn scan_history(&self, owner: &OwnerId, limit: i64) -> Result<Vec<ScanHistoryEntry>> {
        let history = sqlx::query_as::<_, ScanHistoryEntry>(
            r#"
            SELECT
                scan_date,
                COUNT(*) AS total,
                COALESCE(SUM(CASE WHEN passed = 1 THEN 1 ELSE 0 END), 0) AS passed,
                MAX(composite_score) AS best_composite
            FROM scan_results
            WHERE owner = ?
            GROUP BY scan_date
            ORDER BY scan_date DESC
            LIMIT ?
            "#,
        )
        .bind(owner.as_str())
        .bind(limit.max(1))
        .fetch_all(self.db.pool())
        .await?;

        Ok(history)
    }

    pub async fn record_run(&self, run: &ScanRun) -> Result<i64> {
        insert_run(self.db.pool(), run).await
    }

    pub async fn run_for(&self, owner: &OwnerId, scan_date: &str) -> Result<Option<ScanRun>> {
        let run = sqlx::query_as::<_, ScanRun>("SELECT * FROM scan_runs WHERE owner = ? AND scan_date = ?")
            .bind(owner.as_str())
            .bind(scan_date)
            .fetch_optional(self.db.pool())
            .await?;

        Ok(run)
    }
}

async fn insert_row<'e, E>(executor: E, row: &ScanResultRow) -> Result<i64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        r#"
        INSERT INTO scan_results (
            owner, ticker, scan_date, stage,
            price, avg_volume, sma_50, sma_200, sma_200_prior, phase1_passed, phase1_reason,
            current_iv, iv_rank, phase2_passed, phase2_reason,
            contract, strike, expiration, dte, delta, theta, bid, option_volume, open_interest,
            annualized_yield, phase3_passed, phase3_reason,
            yield_score, iv_rank_score, delta_score, liquidity_score, trend_score, composite_score,
            has_open_position, position_note, passed, data_error
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&row.owner)
    .bind(&row.ticker)
    .bind(&row.scan_date)
    .bind(&row.stage)
    .bind(row.price)
    .bind(row.avg_volume)
    .bind(row.sma_50)
    .bind(row.sma_200)
    .bind(row.sma_200_prior)
    .bind(row.phase1_passed)
    .bind(&row.phase1_reason)
    .bind(row.current_iv)
    .bind(row.iv_rank)
    .bind(row.phase2_passed)
    .bind(&row.phase2_reason)
    .bind(&row.contract)
    .bind(row.strike)
    .bind(&row.expiration)
    .bind(row.dte)
    .bind(row.delta)
    .bind(row.theta)
    .bind(row.bid)
    .bind(row.option_volume)
    .bind(row.open_interest)
    .bind(row.annualized_yield)
    .bind(row.phase3_passed)
    .bind(&row.phase3_reason)
    .bind(row.yield_score)
    .bind(row.iv_rank_score)
    .bind(row.delta_score)
    .bind(row.liquidity_score)
    .bind(row.trend_score)
    .bind(row.composite_score)
    .bind(row.has_open_position)
    .bind(&row.position_note)
    .bind(row.passed)
    .bind(&row.data_error)
    .execute(executor)
    .await?;

    Ok(result.last_insert_rowid())
}

async fn insert_run<'e, E>(executor: E, run: &ScanRun) -> Result<i64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        r#"
        INSERT INTO scan_runs (owner, scan_date, trigger_kind, ticker_count, persisted_count,
                               failed_tickers, started_at, finished_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&run.owner)
    .bind(&run.scan_date)
    .bind(&run.trigger_kind)
    .bind(run.ticker_count)
    .bind(run.persisted_count)
    .bind(&run.failed_tickers)
    .bind(&run.started_at)
    .bind(&run.finished_at)
    .execute(executor)
    .await?;

    Ok(result.last_insert_rowid())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup() -> ScanResultStore {
        ScanResultStore::new(ScanDb::new("sqlite::memory:").await.unwrap())
    }

    fn row(owner: &str, ticker: &str, scan_date: &str, passed: bool, composite: Option<f64>) -> ScanResultRow {
        ScanResultRow {
            owner: owner.to_string(),
            ticker: ticker.to_string(),
            scan_date: scan_date.to_string(),
            stage: if passed { "qualified" } else { "phase1_failed" }.to_string(),
            price: Some(100.0),
            phase1_passed: passed,
            phase2_passed: passed.then_some(true),
            phase3_passed: passed.then_some(true),
            composite_score: composite,
            passed,
            ..Default::default()
        }
    }

    const D1: &str = "2024-07-09T20:15:00.000000Z";
    const D2: &str = "2024-07-10T20:15:00.000000Z";

    #[tokio::test]
    async fn test_insert_and_read_back() {
        let store = setup().await;
        let owner = OwnerId::new("u1");

        let mut r = row("u1", "AAPL", D1, true, Some(71.5));
        r.contract = Some("O:AAPL240809P00140000".to_string());
        r.dte = Some(30);
        let id = store.insert_result(&r).await.unwrap();
        assert!(id > 0);

        let rows = store.results_for(&owner, D1).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].contract.as_deref(), Some("O:AAPL240809P00140000"));
        assert_eq!(rows[0].dte, Some(30));
        assert!(rows[0].iv_rank.is_none());
        assert_eq!(rows[0].phase2_passed, Some(true));
    }

    #[tokio::test]
    async fn test_duplicate_key_is_rejected() {
        let store = setup().await;
        store.insert_result(&row("u1", "AAPL", D1, true, Some(50.0))).await.unwrap();

        let err = store
            .insert_result(&row("u1", "AAPL", D1, false, None))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Database(_)));

        // Original row untouched
        let rows = store.results_for(&OwnerId::new("u1"), D1).await.unwrap();
        assert!(rows[0].passed);
    }

    #[tokio::test]
    async fn test_latest_results_use_max_scan_date_and_order() {
        let store = setup().await;
        let owner = OwnerId::new("u1");

        store.insert_result(&row("u1", "OLD", D1, true, Some(99.0))).await.unwrap();
        store.insert_result(&row("u1", "ZZZ", D2, false, None)).await.unwrap();
        store.insert_result(&row("u1", "BBB", D2, true, Some(60.0))).await.unwrap();
        store.insert_result(&row("u1", "AAA", D2, true, Some(60.0))).await.unwrap();
        store.insert_result(&row("u1", "CCC", D2, true, Some(80.0))).await.unwrap();
        store.insert_result(&row("u2", "XXX", "2024-07-11T20:15:00.000000Z", true, Some(1.0))).await.unwrap();

        assert_eq!(store.latest_scan_date(&owner).await.unwrap().as_deref(), Some(D2));

        let latest = store.latest_results(&owner).await.unwrap();
        let tickers: Vec<&str> = latest.iter().map(|r| r.ticker.as_str()).collect();
        assert_eq!(tickers, vec!["CCC", "AAA", "BBB", "ZZZ"]);
    }

    #[tokio::test]
    async fn test_no_scans_yet() {
        let store = setup().await;
        let owner = OwnerId::new("nobody");
        assert!(store.latest_scan_date(&owner).await.unwrap().is_none());
        assert!(store.latest_results(&owner).await.unwrap().is_empty());
        assert!(store.scan_metadata(&owner).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_metadata_counts_phases() {
        let store = setup().await;
        let owner = OwnerId::new("u1");

        store.insert_result(&row("u1", "AAA", D2, true, Some(70.0))).await.unwrap();
        store.insert_result(&row("u1", "BBB", D2, true, Some(50.0))).await.unwrap();
        store.insert_result(&row("u1", "CCC", D2, false, None)).await.unwrap();

        let mut p2_fail = row("u1", "DDD", D2, false, None);
        p2_fail.phase1_passed = true;
        p2_fail.phase2_passed = Some(false);
        p2_fail.stage = "phase2_failed".to_string();
        store.insert_result(&p2_fail).await.unwrap();

        store
            .record_run(&ScanRun {
                id: None,
                owner: "u1".to_string(),
                scan_date: D2.to_string(),
                trigger_kind: "scheduled".to_string(),
                ticker_count: 4,
                persisted_count: 4,
                failed_tickers: String::new(),
                started_at: "2024-07-10T20:15:00.000000Z".to_string(),
                finished_at: "2024-07-10T20:16:00.000000Z".to_string(),
            })
            .await
            .unwrap();

        let meta = store.scan_metadata(&owner).await.unwrap().unwrap();
        assert_eq!(meta.scan_date, D2);
        assert_eq!(meta.counts.total, 4);
        assert_eq!(meta.counts.phase1_passed, 3);
        assert_eq!(meta.counts.phase2_passed, 2);
        assert_eq!(meta.counts.phase3_passed, 2);
        assert_eq!(meta.counts.scored, 2);
        assert_eq!(meta.counts.passed, 2);
        assert!((meta.counts.avg_composite.unwrap() - 60.0).abs() < 1e-9);
        assert_eq!(meta.run.unwrap().trigger_kind, "scheduled");
    }

    #[tokio::test]
    async fn test_history_newest_first() {
        let store = setup().await;
        let owner = OwnerId::new("u1");

        store.insert_result(&row("u1", "AAA", D1, true, Some(40.0))).await.unwrap();
        store.insert_result(&row("u1", "AAA", D2, true, Some(65.0))).await.unwrap();
        store.insert_result(&row("u1", "BBB", D2, false, None)).await.unwrap();

        let history = store.scan_history(&owner, 10).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].scan_date, D2);
        assert_eq!(history[0].total, 2);
        assert_eq!(history[0].passed, 1);
        assert_eq!(history[0].best_composite, Some(65.0));

        let limited = store.scan_history(&owner, 1).await.unwrap();
        assert_eq!(limited.len(), 1);
    }

    fn run(owner: &str, scan_date: &str, ticker_count: i64) -> ScanRun {
        ScanRun {
            id: None,
            owner: owner.to_string(),
            scan_date: scan_date.to_string(),
            trigger_kind: "manual".to_string(),
            ticker_count,
            persisted_count: 0,
            failed_tickers: String::new(),
            started_at: D2.to_string(),
            finished_at: D2.to_string(),
        }
    }

    #[tokio::test]
    async fn test_save_run_skips_rejected_rows() {
        let store = setup().await;
        let owner = OwnerId::new("u1");
        let rows = vec![
            row("u1", "AAA", D2, true, Some(70.0)),
            row("u1", "AAA", D2, false, None),
            row("u1", "BBB", D2, false, None),
        ];

        let saved = store.save_run(&rows, run("u1", D2, 3)).await.unwrap();
        assert!(saved.id.is_some());
        assert_eq!(saved.persisted_count, 2);
        assert_eq!(saved.failed_ticker_list(), vec!["AAA".to_string()]);

        let stored = store.results_for(&owner, D2).await.unwrap();
        assert_eq!(stored.len(), 2);
        assert!(stored[0].passed);

        let recorded = store.run_for(&owner, D2).await.unwrap().unwrap();
        assert_eq!(recorded, saved);
    }

    #[tokio::test]
    async fn test_save_run_with_nothing_written_commits_nothing() {
        let store = setup().await;
        let owner = OwnerId::new("u1");
        store.save_run(&[row("u1", "OLD", D1, true, Some(50.0))], run("u1", D1, 1)).await.unwrap();

        // Every insert now fails while the connection itself stays healthy
        sqlx::query("DROP TABLE scan_results").execute(store.db.pool()).await.unwrap();
        sqlx::query("CREATE TABLE scan_results (owner TEXT NOT NULL)").execute(store.db.pool()).await.unwrap();
        store.db.ping().await.unwrap();

        let rows = vec![row("u1", "AAA", D2, true, Some(70.0)), row("u1", "BBB", D2, false, None)];
        let err = store.save_run(&rows, run("u1", D2, 2)).await.unwrap_err();
        assert!(matches!(err, StoreError::NothingPersisted { attempted: 2 }));

        assert!(store.run_for(&owner, D2).await.unwrap().is_none());
        assert!(store.run_for(&owner, D1).await.unwrap().is_some());
    }
}
