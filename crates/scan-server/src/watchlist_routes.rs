use axum::{
    extract::{Path, State},
    routing::{delete, get},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use wheel_core::WatchlistTicker;

use crate::error::{ApiResponse, AppError, Result};
use crate::owner::Owner;
use crate::AppState;

#[derive(Deserialize)]
pub struct AddTickerRequest {
    pub symbol: String,
}

#[derive(Serialize)]
pub struct RemovedTicker {
    pub symbol: String,
    pub removed: bool,
}

pub fn watchlist_routes() -> Router<AppState> {
    Router::new()
        .route("/api/watchlist", get(list_watchlist).post(add_ticker))
        .route("/api/watchlist/:symbol", delete(remove_ticker))
}

async fn list_watchlist(
    State(state): State<AppState>,
    Owner(owner): Owner,
) -> Result<Json<ApiResponse<Vec<WatchlistTicker>>>> {
    let tickers = state.orchestrator.watchlist().list_tickers(&owner).await?;
    Ok(Json(ApiResponse::success(tickers)))
}

async fn add_ticker(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Json(req): Json<AddTickerRequest>,
) -> Result<Json<ApiResponse<WatchlistTicker>>> {
    let ticker = state
        .orchestrator
        .watchlist()
        .add_ticker(&owner, &req.symbol, (state.clock)())
        .await?;
    Ok(Json(ApiResponse::success(ticker)))
}

async fn remove_ticker(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Path(symbol): Path<String>,
) -> Result<Json<ApiResponse<RemovedTicker>>> {
    let removed = state.orchestrator.watchlist().remove_ticker(&owner, &symbol).await?;
    if !removed {
        return Err(AppError::NotFound(format!("{} is not on the watchlist", symbol)));
    }
    tracing::info!("{} removed {} from watchlist", owner, symbol);
    Ok(Json(ApiResponse::success(RemovedTicker { symbol, removed })))
}
