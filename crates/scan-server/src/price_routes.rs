use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use market_calendar::RefreshEligibility;
use wheel_scanner::RefreshOutcome;

use crate::error::{ApiResponse, Result};
use crate::owner::Owner;
use crate::AppState;

pub fn price_routes() -> Router<AppState> {
    Router::new()
        .route("/api/prices/eligibility", get(price_eligibility))
        .route("/api/prices/refresh", post(refresh_prices))
}

async fn price_eligibility(
    State(state): State<AppState>,
    Owner(owner): Owner,
) -> Result<Json<ApiResponse<Vec<RefreshEligibility>>>> {
    let eligibility = state.orchestrator.price_eligibility(&owner, (state.clock)()).await?;
    Ok(Json(ApiResponse::success(eligibility)))
}

async fn refresh_prices(
    State(state): State<AppState>,
    Owner(owner): Owner,
) -> Result<Json<ApiResponse<Vec<RefreshOutcome>>>> {
    let outcomes = state.orchestrator.refresh_prices(&owner, (state.clock)()).await?;
    let refreshed = outcomes.iter().filter(|o| o.refreshed).count();
    tracing::info!("Refreshed {} of {} quotes for {}", refreshed, outcomes.len(), owner);
    Ok(Json(ApiResponse::success(outcomes)))
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use serde_json::json;

    use crate::test_support::{send, test_state};

    #[tokio::test]
    async fn test_refresh_then_cooldown() {
        let app = crate::build_router(test_state().await);
        for symbol in ["AAPL", "MSFT"] {
            send(&app, "POST", "/api/watchlist", Some("alice"), Some(json!({ "symbol": symbol }))).await;
        }

        let (status, body) = send(&app, "GET", "/api/prices/eligibility", Some("alice"), None).await;
        assert_eq!(status, StatusCode::OK);
        let rows = body["data"].as_array().unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r["can_refresh"] == true));

        let (status, body) = send(&app, "POST", "/api/prices/refresh", Some("alice"), None).await;
        assert_eq!(status, StatusCode::OK);
        let outcomes = body["data"].as_array().unwrap();
        assert!(outcomes.iter().all(|o| o["refreshed"] == true));
        assert!(outcomes.iter().all(|o| o["price"].as_f64().unwrap() > 0.0));

        // Same clock, already settled for this session
        let (_, body) = send(&app, "GET", "/api/prices/eligibility", Some("alice"), None).await;
        let rows = body["data"].as_array().unwrap();
        assert!(rows.iter().all(|r| r["can_refresh"] == false));
    }
}
