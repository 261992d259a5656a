use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;

use crate::error::Result;

#[derive(Clone)]
pub struct ScanDb {
    pool: SqlitePool,
}

impl ScanDb {
    /// Open (creating if needed) the database and apply the schema
    pub async fn new(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);

        // Each in-memory connection is its own database, so pin to one
        let in_memory = database_url.contains(":memory:");
        let pool = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await?
        } else {
            SqlitePoolOptions::new()
                .max_connections(5)
                .connect_with(options)
                .await?
        };

        let db = Self { pool };
        db.init_schema().await?;

        Ok(db)
    }

    async fn init_schema(&self) -> Result<()> {
        let schema = include_str!("../../../schema.sql");

        for statement in schema_statements(schema) {
            sqlx::query(&statement).execute(&self.pool).await?;
        }

        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Cheap reachability check used before a scan starts
    pub async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// Split a schema file into single statements (sqlx runs one per query).
/// `--` comment lines are dropped first so punctuation in them is harmless.
fn schema_statements(schema: &str) -> Vec<String> {
    let code: String = schema
        .lines()
        .filter(|line| !line.trim_start().starts_with("--"))
        .map(|line| format!("{}\n", line))
        .collect();

    code.split(';')
        .map(str::trim)
        .filter(|stmt| !stmt.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_db_creation() {
        let db = ScanDb::new("sqlite::memory:").await.unwrap();
        assert!(db.ping().await.is_ok());
    }

    #[tokio::test]
    async fn test_schema_is_reentrant() {
        let db = ScanDb::new("sqlite::memory:").await.unwrap();
        db.init_schema().await.unwrap();

        let tables: Vec<(String,)> =
            sqlx::query_as("SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name")
                .fetch_all(db.pool())
                .await
                .unwrap();
        let names: Vec<&str> = tables.iter().map(|t| t.0.as_str()).collect();
        assert_eq!(names, vec!["quotes", "scan_results", "scan_runs", "watchlist", "wheel_positions"]);
    }

    #[test]
    fn test_comment_punctuation_does_not_split_statements() {
        let schema = "-- keyed by date; last writer wins\nCREATE TABLE a (x INTEGER);\n\n-- b; c\nCREATE TABLE b (y TEXT);\n";
        let statements = schema_statements(schema);
        assert_eq!(statements.len(), 2);
        assert!(statements[0].starts_with("CREATE TABLE a"));
        assert!(statements[1].starts_with("CREATE TABLE b"));
    }

    #[test]
    fn test_shipped_schema_has_no_stray_fragments() {
        let statements = schema_statements(include_str!("../../../schema.sql"));
        assert!(statements
            .iter()
            .all(|s| s.starts_with("CREATE TABLE") || s.starts_with("CREATE INDEX")));
    }

    #[tokio::test]
    async fn test_shipped_schema_tables_accept_rows() {
        let db = ScanDb::new("sqlite::memory:").await.unwrap();
        sqlx::query("INSERT INTO watchlist (owner, symbol, added_at) VALUES ('u1', 'AAPL', 't')")
            .execute(db.pool())
            .await
            .unwrap();
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM watchlist")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(count, 1);
    }
}
