use chrono::{DateTime, Utc};
use wheel_core::{normalize_symbol, OwnerId, WatchlistTicker};

use crate::db::ScanDb;
use crate::error::{Result, StoreError};
use crate::models::{format_timestamp, parse_timestamp, WatchlistRow};

pub const DEFAULT_WATCHLIST_MAX: usize = 50;

#[derive(Clone)]
pub struct WatchlistStore {
    db: ScanDb,
    max_tickers: usize,
}

impl WatchlistStore {
    pub fn new(db: ScanDb, max_tickers: usize) -> Self {
        Self { db, max_tickers }
    }

    pub fn max_tickers(&self) -> usize {
        self.max_tickers
    }

    /// Add a ticker; adding one that is already present returns the existing entry.
    pub async fn add_ticker(&self, owner: &OwnerId, raw_symbol: &str, now: DateTime<Utc>) -> Result<WatchlistTicker> {
        let symbol = normalize_symbol(raw_symbol).ok_or_else(|| StoreError::InvalidSymbol(raw_symbol.to_string()))?;

        if let Some(existing) = self.get(owner, &symbol).await? {
            return Ok(existing);
        }

        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM watchlist WHERE owner = ?")
            .bind(owner.as_str())
            .fetch_one(self.db.pool())
            .await?;
        if count as usize >= self.max_tickers {
            return Err(StoreError::WatchlistFull {
                limit: self.max_tickers,
            });
        }

        // A concurrent add of the same symbol loses quietly
        sqlx::query("INSERT OR IGNORE INTO watchlist (owner, symbol, added_at) VALUES (?, ?, ?)")
            .bind(owner.as_str())
            .bind(&symbol)
            .bind(format_timestamp(now))
            .execute(self.db.pool())
            .await?;

        tracing::info!("Added {} to watchlist of {}", symbol, owner);

        self.get(owner, &symbol)
            .await?
            .ok_or_else(|| StoreError::Corrupt(format!("watchlist entry {} vanished after insert", symbol)))
    }

    /// Returns whether a row was removed
    pub async fn remove_ticker(&self, owner: &OwnerId, raw_symbol: &str) -> Result<bool> {
        let symbol = normalize_symbol(raw_symbol).ok_or_else(|| StoreError::InvalidSymbol(raw_symbol.to_string()))?;

        let result = sqlx::query("DELETE FROM watchlist WHERE owner = ? AND symbol = ?")
            .bind(owner.as_str())
            .bind(&symbol)
            .execute(self.db.pool())
            .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn list_tickers(&self, owner: &OwnerId) -> Result<Vec<WatchlistTicker>> {
        let rows = sqlx::query_as::<_, WatchlistRow>(
            "SELECT owner, symbol, added_at FROM watchlist WHERE owner = ? ORDER BY symbol",
        )
        .bind(owner.as_str())
        .fetch_all(self.db.pool())
        .await?;

        rows.into_iter().map(into_ticker).collect()
    }

    pub async fn symbols(&self, owner: &OwnerId) -> Result<Vec<String>> {
        Ok(self
            .list_tickers(owner)
            .await?
            .into_iter()
            .map(|t| t.symbol)
            .collect())
    }

    /// Owners with at least one ticker, for the scheduled run
    pub async fn owners_with_watchlist(&self) -> Result<Vec<OwnerId>> {
        let owners: Vec<(String,)> = sqlx::query_as("SELECT DISTINCT owner FROM watchlist ORDER BY owner")
            .fetch_all(self.db.pool())
            .await?;

        Ok(owners.into_iter().map(|(o,)| OwnerId::new(o)).collect())
    }

    async fn get(&self, owner: &OwnerId, symbol: &str) -> Result<Option<WatchlistTicker>> {
        let row = sqlx::query_as::<_, WatchlistRow>(
            "SELECT owner, symbol, added_at FROM watchlist WHERE owner = ? AND symbol = ?",
        )
        .bind(owner.as_str())
        .bind(symbol)
        .fetch_optional(self.db.pool())
        .await?;

        row.map(into_ticker).transpose()
    }
}

fn into_ticker(row: WatchlistRow) -> Result<WatchlistTicker> {
    Ok(WatchlistTicker {
        owner: OwnerId::new(row.owner),
        symbol: row.symbol,
        added_at: parse_timestamp(&row.added_at)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    async fn setup(max: usize) -> WatchlistStore {
        WatchlistStore::new(ScanDb::new("sqlite::memory:").await.unwrap(), max)
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 7, 10, 15, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_add_normalizes_and_is_idempotent() {
        let store = setup(DEFAULT_WATCHLIST_MAX).await;
        let owner = OwnerId::new("u1");

        let added = store.add_ticker(&owner, " aapl ", now()).await.unwrap();
        assert_eq!(added.symbol, "AAPL");
        assert_eq!(added.added_at, now());

        let again = store
            .add_ticker(&owner, "AAPL", now() + chrono::Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(again.added_at, now());
        assert_eq!(store.list_tickers(&owner).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_symbol_rejected() {
        let store = setup(DEFAULT_WATCHLIST_MAX).await;
        let err = store.add_ticker(&OwnerId::new("u1"), "not a ticker", now()).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidSymbol(_)));
    }

    #[tokio::test]
    async fn test_soft_cap_per_owner() {
        let store = setup(2).await;
        let owner = OwnerId::new("u1");

        store.add_ticker(&owner, "AAPL", now()).await.unwrap();
        store.add_ticker(&owner, "MSFT", now()).await.unwrap();
        let err = store.add_ticker(&owner, "KO", now()).await.unwrap_err();
        assert!(matches!(err, StoreError::WatchlistFull { limit: 2 }));

        // Re-adding an existing ticker at the cap is still fine
        assert!(store.add_ticker(&owner, "MSFT", now()).await.is_ok());
        // Other owners have their own cap
        assert!(store.add_ticker(&OwnerId::new("u2"), "KO", now()).await.is_ok());
    }

    #[tokio::test]
    async fn test_remove_and_owners() {
        let store = setup(DEFAULT_WATCHLIST_MAX).await;
        let u1 = OwnerId::new("u1");
        let u2 = OwnerId::new("u2");

        store.add_ticker(&u1, "MSFT", now()).await.unwrap();
        store.add_ticker(&u1, "AAPL", now()).await.unwrap();
        store.add_ticker(&u2, "KO", now()).await.unwrap();

        assert_eq!(store.symbols(&u1).await.unwrap(), vec!["AAPL", "MSFT"]);
        assert_eq!(store.owners_with_watchlist().await.unwrap(), vec![u1.clone(), u2.clone()]);

        assert!(store.remove_ticker(&u2, "ko").await.unwrap());
        assert!(!store.remove_ticker(&u2, "KO").await.unwrap());
        assert_eq!(store.owners_with_watchlist().await.unwrap(), vec![u1]);
    }
}
