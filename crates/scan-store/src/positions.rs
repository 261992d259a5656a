use async_trait::async_trait;
use chrono::NaiveDate;
use wheel_core::{DataError, OwnerId, PortfolioExposure, PositionBook};

use crate::db::ScanDb;
use crate::models::PositionRow;

/// Read-only view over `wheel_positions`. Open puts are reported ahead of assigned shares.
#[derive(Clone)]
pub struct PositionLookup {
    db: ScanDb,
}

impl PositionLookup {
    pub fn new(db: ScanDb) -> Self {
        Self { db }
    }
}

#[async_trait]
impl PositionBook for PositionLookup {
    async fn exposure(&self, owner: &OwnerId, ticker: &str) -> Result<Option<PortfolioExposure>, DataError> {
        let row = sqlx::query_as::<_, PositionRow>(
            r#"
            SELECT kind, contracts, strike, expiration, shares
            FROM wheel_positions
            WHERE owner = ? AND ticker = ? AND status = 'open'
            ORDER BY CASE kind WHEN 'cash_secured_put' THEN 0 ELSE 1 END, opened_at DESC
            LIMIT 1
            "#,
        )
        .bind(owner.as_str())
        .bind(ticker)
        .fetch_optional(self.db.pool())
        .await
        .map_err(|e| DataError::Api(format!("position lookup failed: {}", e)))?;

        row.map(into_exposure).transpose()
    }
}

fn into_exposure(row: PositionRow) -> Result<PortfolioExposure, DataError> {
    match row.kind.as_str() {
        "cash_secured_put" => {
            let expiration = row
                .expiration
                .as_deref()
                .map(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d"))
                .transpose()
                .map_err(|e| DataError::InvalidData(format!("position expiration: {}", e)))?
                .ok_or_else(|| DataError::InvalidData("open put without expiration".to_string()))?;

            Ok(PortfolioExposure::CashSecuredPut {
                contracts: row.contracts.unwrap_or(1),
                strike: row.strike.unwrap_or(0.0),
                expiration,
            })
        }
        "assigned_shares" => Ok(PortfolioExposure::AssignedShares {
            shares: row.shares.unwrap_or(0.0),
        }),
        other => Err(DataError::InvalidData(format!("unknown position kind '{}'", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup() -> (ScanDb, PositionLookup) {
        let db = ScanDb::new("sqlite::memory:").await.unwrap();
        (db.clone(), PositionLookup::new(db))
    }

    async fn insert(db: &ScanDb, owner: &str, ticker: &str, kind: &str, status: &str, opened_at: &str) {
        sqlx::query(
            r#"
            INSERT INTO wheel_positions (owner, ticker, kind, contracts, strike, expiration, shares, status, opened_at)
            VALUES (?, ?, ?, 2, 140.0, '2024-08-09', 200.0, ?, ?)
            "#,
        )
        .bind(owner)
        .bind(ticker)
        .bind(kind)
        .bind(status)
        .bind(opened_at)
        .execute(db.pool())
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_no_position() {
        let (_db, book) = setup().await;
        assert!(book.exposure(&OwnerId::new("u1"), "AAPL").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_open_put_preferred_over_shares() {
        let (db, book) = setup().await;
        insert(&db, "u1", "AAPL", "assigned_shares", "open", "2024-07-01").await;
        insert(&db, "u1", "AAPL", "cash_secured_put", "open", "2024-06-01").await;

        let exposure = book.exposure(&OwnerId::new("u1"), "AAPL").await.unwrap().unwrap();
        assert_eq!(
            exposure,
            PortfolioExposure::CashSecuredPut {
                contracts: 2,
                strike: 140.0,
                expiration: NaiveDate::from_ymd_opt(2024, 8, 9).unwrap(),
            }
        );
    }

    #[tokio::test]
    async fn test_closed_and_foreign_positions_ignored() {
        let (db, book) = setup().await;
        insert(&db, "u1", "AAPL", "cash_secured_put", "closed", "2024-06-01").await;
        insert(&db, "u2", "AAPL", "cash_secured_put", "open", "2024-06-01").await;
        insert(&db, "u1", "AAPL", "assigned_shares", "open", "2024-07-01").await;

        let exposure = book.exposure(&OwnerId::new("u1"), "AAPL").await.unwrap().unwrap();
        assert_eq!(exposure, PortfolioExposure::AssignedShares { shares: 200.0 });
        assert_eq!(exposure.advisory(), "Holding 200 assigned shares");
    }
}
