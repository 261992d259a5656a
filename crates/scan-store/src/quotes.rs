use std::collections::HashMap;

use chrono::{DateTime, Utc};
use wheel_core::Quote;

use crate::db::ScanDb;
use crate::error::Result;
use crate::models::{format_timestamp, parse_timestamp, QuoteRow};

/// Persisted quote cache. One row per (ticker, UTC quote date); the newest
/// row's `updated_at` is the ticker's last-updated time.
#[derive(Clone)]
pub struct QuoteCache {
    db: ScanDb,
}

impl QuoteCache {
    pub fn new(db: ScanDb) -> Self {
        Self { db }
    }

    pub async fn save_quote(&self, quote: &Quote) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO quotes (ticker, quote_date, price, source, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(ticker, quote_date) DO UPDATE SET
                price = excluded.price,
                source = excluded.source,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&quote.ticker)
        .bind(quote.timestamp.date_naive().to_string())
        .bind(quote.price)
        .bind(&quote.source)
        .bind(format_timestamp(quote.timestamp))
        .execute(self.db.pool())
        .await?;

        Ok(())
    }

    pub async fn latest_quote(&self, ticker: &str) -> Result<Option<Quote>> {
        let row = sqlx::query_as::<_, QuoteRow>(
            "SELECT ticker, price, source, updated_at FROM quotes WHERE ticker = ? ORDER BY updated_at DESC LIMIT 1",
        )
        .bind(ticker)
        .fetch_optional(self.db.pool())
        .await?;

        row.map(|r| {
            Ok(Quote {
                timestamp: parse_timestamp(&r.updated_at)?,
                ticker: r.ticker,
                price: r.price,
                source: r.source,
            })
        })
        .transpose()
    }

    /// Latest cached quote per ticker; tickers never quoted are absent
    pub async fn latest_quotes(&self, tickers: &[String]) -> Result<HashMap<String, Quote>> {
        let mut quotes = HashMap::with_capacity(tickers.len());
        for ticker in tickers {
            if let Some(q) = self.latest_quote(ticker).await? {
                quotes.insert(ticker.clone(), q);
            }
        }
        Ok(quotes)
    }

    /// (ticker, last_updated) pairs in input order, ready for the freshness check
    pub async fn last_updated_many(&self, tickers: &[String]) -> Result<Vec<(String, Option<DateTime<Utc>>)>> {
        let quotes = self.latest_quotes(tickers).await?;
        Ok(tickers
            .iter()
            .map(|t| (t.clone(), quotes.get(t).map(|q| q.timestamp)))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn quote(ticker: &str, price: f64, ts: DateTime<Utc>) -> Quote {
        Quote {
            ticker: ticker.to_string(),
            price,
            timestamp: ts,
            source: "mock".to_string(),
        }
    }

    #[tokio::test]
    async fn test_same_day_last_writer_wins() {
        let cache = QuoteCache::new(ScanDb::new("sqlite::memory:").await.unwrap());
        let morning = Utc.with_ymd_and_hms(2024, 7, 10, 14, 0, 0).unwrap();
        let afternoon = Utc.with_ymd_and_hms(2024, 7, 10, 19, 0, 0).unwrap();

        cache.save_quote(&quote("AAPL", 150.0, morning)).await.unwrap();
        cache.save_quote(&quote("AAPL", 152.5, afternoon)).await.unwrap();

        let latest = cache.latest_quote("AAPL").await.unwrap().unwrap();
        assert_eq!(latest.price, 152.5);
        assert_eq!(latest.timestamp, afternoon);

        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM quotes WHERE ticker = 'AAPL'")
            .fetch_one(cache.db.pool())
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_newest_day_is_latest() {
        let cache = QuoteCache::new(ScanDb::new("sqlite::memory:").await.unwrap());
        let monday = Utc.with_ymd_and_hms(2024, 7, 8, 20, 30, 0).unwrap();
        let tuesday = Utc.with_ymd_and_hms(2024, 7, 9, 20, 30, 0).unwrap();

        cache.save_quote(&quote("MSFT", 450.0, tuesday)).await.unwrap();
        cache.save_quote(&quote("MSFT", 440.0, monday)).await.unwrap();

        assert_eq!(cache.latest_quote("MSFT").await.unwrap().unwrap().price, 450.0);
    }

    #[tokio::test]
    async fn test_last_updated_many_keeps_order_and_gaps() {
        let cache = QuoteCache::new(ScanDb::new("sqlite::memory:").await.unwrap());
        let ts = Utc.with_ymd_and_hms(2024, 7, 10, 14, 0, 0).unwrap();
        cache.save_quote(&quote("KO", 62.0, ts)).await.unwrap();

        let tickers = vec!["AAPL".to_string(), "KO".to_string()];
        let pairs = cache.last_updated_many(&tickers).await.unwrap();
        assert_eq!(pairs, vec![("AAPL".to_string(), None), ("KO".to_string(), Some(ts))]);
    }
}
