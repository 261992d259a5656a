pub mod db;
pub mod error;
pub mod models;
pub mod positions;
pub mod quotes;
pub mod results;
pub mod watchlist;

pub use db::ScanDb;
pub use error::StoreError;
pub use models::*;
pub use positions::PositionLookup;
pub use quotes::QuoteCache;
pub use results::ScanResultStore;
pub use watchlist::{WatchlistStore, DEFAULT_WATCHLIST_MAX};
