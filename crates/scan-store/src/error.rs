use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("watchlist is full ({limit} tickers)")]
    WatchlistFull { limit: usize },

    #[error("invalid ticker symbol: {0}")]
    InvalidSymbol(String),

    #[error("corrupt stored value: {0}")]
    Corrupt(String),

    #[error("none of {attempted} scan results could be saved")]
    NothingPersisted { attempted: usize },
}

pub type Result<T> = std::result::Result<T, StoreError>;
