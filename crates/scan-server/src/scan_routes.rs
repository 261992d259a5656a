use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use scan_store::{ScanHistoryEntry, ScanMetadata, ScanResultRow};
use serde::{Deserialize, Serialize};
use wheel_core::OwnerId;
use wheel_scanner::{ScanError, ScanTrigger};

use crate::error::{ApiResponse, AppError, Result};
use crate::owner::Owner;
use crate::AppState;

#[derive(Deserialize)]
pub struct RunScanQuery {
    /// Block until the scan finishes and return its summary
    #[serde(default)]
    pub wait: bool,
}

#[derive(Deserialize)]
pub struct HistoryQuery {
    #[serde(default = "default_history_limit")]
    pub limit: i64,
}

fn default_history_limit() -> i64 {
    20
}

#[derive(Serialize)]
pub struct ScanAccepted {
    pub owner: OwnerId,
    pub trigger: ScanTrigger,
    pub requested_at: DateTime<Utc>,
}

pub fn scan_routes() -> Router<AppState> {
    Router::new()
        .route("/api/scan/run", post(run_scan))
        .route("/api/scan/latest", get(latest_results))
        .route("/api/scan/metadata", get(scan_metadata))
        .route("/api/scan/history", get(scan_history))
}

async fn run_scan(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Query(query): Query<RunScanQuery>,
) -> Result<Response> {
    let orchestrator = state.orchestrator.clone();
    let now = (state.clock)();

    if query.wait {
        let summary = orchestrator.run_scan(&owner, ScanTrigger::Manual, now).await?;
        return Ok(Json(ApiResponse::success(summary)).into_response());
    }

    // Reject up front so the caller sees the conflict; the run itself re-checks
    if orchestrator.is_running(&owner) {
        return Err(ScanError::AlreadyRunning(owner).into());
    }
    if orchestrator.watchlist().symbols(&owner).await?.is_empty() {
        return Err(ScanError::EmptyWatchlist(owner).into());
    }

    let accepted = ScanAccepted {
        owner: owner.clone(),
        trigger: ScanTrigger::Manual,
        requested_at: now,
    };
    tokio::spawn(async move {
        if let Err(e) = orchestrator.run_scan(&owner, ScanTrigger::Manual, now).await {
            tracing::error!("Manual scan for {} failed: {}", owner, e);
        }
    });

    Ok((StatusCode::ACCEPTED, Json(ApiResponse::success(accepted))).into_response())
}

async fn latest_results(
    State(state): State<AppState>,
    Owner(owner): Owner,
) -> Result<Json<ApiResponse<Vec<ScanResultRow>>>> {
    let rows = state.orchestrator.results().latest_results(&owner).await?;
    Ok(Json(ApiResponse::success(rows)))
}

async fn scan_metadata(
    State(state): State<AppState>,
    Owner(owner): Owner,
) -> Result<Json<ApiResponse<ScanMetadata>>> {
    let metadata = state
        .orchestrator
        .results()
        .scan_metadata(&owner)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("no scans recorded for {}", owner)))?;
    Ok(Json(ApiResponse::success(metadata)))
}

async fn scan_history(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<ApiResponse<Vec<ScanHistoryEntry>>>> {
    if !(1..=365).contains(&query.limit) {
        return Err(AppError::BadRequest("limit must be between 1 and 365".to_string()));
    }
    let history = state.orchestrator.results().scan_history(&owner, query.limit).await?;
    Ok(Json(ApiResponse::success(history)))
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use serde_json::json;

    use crate::test_support::{send, test_state};

    async fn seeded_app(symbols: &[&str]) -> axum::Router {
        let app = crate::build_router(test_state().await);
        for symbol in symbols {
            let (status, _) = send(&app, "POST", "/api/watchlist", Some("alice"), Some(json!({ "symbol": symbol }))).await;
            assert_eq!(status, StatusCode::OK);
        }
        app
    }

    #[tokio::test]
    async fn test_run_and_read_back() {
        let app = seeded_app(&["AAPL", "MSFT", "KO"]).await;

        let (status, body) = send(&app, "POST", "/api/scan/run?wait=true", Some("alice"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["trigger"], "manual");
        assert_eq!(body["data"]["results"].as_array().unwrap().len(), 3);
        assert_eq!(body["data"]["persisted"], 3);

        let (status, body) = send(&app, "GET", "/api/scan/latest", Some("alice"), None).await;
        assert_eq!(status, StatusCode::OK);
        let rows = body["data"].as_array().unwrap();
        assert_eq!(rows.len(), 3);
        for row in rows {
            assert_eq!(row["owner"], "alice");
        }

        let (status, body) = send(&app, "GET", "/api/scan/metadata", Some("alice"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["total"], 3);
        assert_eq!(body["data"]["run"]["trigger_kind"], "manual");

        let (status, body) = send(&app, "GET", "/api/scan/history?limit=5", Some("alice"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_watchlist_rejected() {
        let app = seeded_app(&[]).await;

        let (status, body) = send(&app, "POST", "/api/scan/run", Some("alice"), None).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body["error"].as_str().unwrap().contains("empty"));

        let (status, _) = send(&app, "POST", "/api/scan/run?wait=true", Some("alice"), None).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_no_scans_yet() {
        let app = seeded_app(&["AAPL"]).await;

        let (status, _) = send(&app, "GET", "/api/scan/metadata", Some("alice"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = send(&app, "GET", "/api/scan/latest", Some("alice"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["data"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_history_limit_validated() {
        let app = seeded_app(&[]).await;
        let (status, _) = send(&app, "GET", "/api/scan/history?limit=0", Some("alice"), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
