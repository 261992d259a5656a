use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use scan_store::StoreError;
use serde::Serialize;
use thiserror::Error;
use wheel_scanner::ScanError;

/// JSON envelope shared by every route.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Scan(#[from] ScanError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("missing X-Owner-Id header")]
    MissingOwner,

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("not found: {0}")]
    NotFound(String),
}

pub type Result<T> = std::result::Result<T, AppError>;

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Scan(e) => match e {
                ScanError::AlreadyRunning(_) => StatusCode::CONFLICT,
                ScanError::EmptyWatchlist(_) => StatusCode::UNPROCESSABLE_ENTITY,
                ScanError::ProviderUnavailable(_) | ScanError::StoreUnavailable(_) => {
                    StatusCode::SERVICE_UNAVAILABLE
                }
                ScanError::TimedOut(_) => StatusCode::GATEWAY_TIMEOUT,
            },
            AppError::Store(e) => match e {
                StoreError::InvalidSymbol(_) => StatusCode::BAD_REQUEST,
                StoreError::WatchlistFull { .. } => StatusCode::CONFLICT,
                StoreError::Database(_) | StoreError::Corrupt(_) | StoreError::NothingPersisted { .. } => {
                    StatusCode::SERVICE_UNAVAILABLE
                }
            },
            AppError::MissingOwner => StatusCode::UNAUTHORIZED,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("Request failed ({}): {}", status, self);
        } else {
            tracing::debug!("Request rejected ({}): {}", status, self);
        }
        (status, Json(ApiResponse::<()>::error(self.to_string()))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wheel_core::OwnerId;

    #[test]
    fn test_scan_error_status() {
        let owner = OwnerId::new("alice");
        assert_eq!(
            AppError::from(ScanError::AlreadyRunning(owner.clone())).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            AppError::from(ScanError::EmptyWatchlist(owner)).status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            AppError::from(ScanError::ProviderUnavailable("down".into())).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            AppError::from(ScanError::TimedOut(Duration::from_secs(1))).status(),
            StatusCode::GATEWAY_TIMEOUT
        );
    }

    #[test]
    fn test_store_error_status() {
        assert_eq!(
            AppError::from(StoreError::InvalidSymbol("!!".into())).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::from(StoreError::WatchlistFull { limit: 50 }).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(AppError::MissingOwner.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_envelope_shape() {
        let body = serde_json::to_value(ApiResponse::<()>::error("nope")).unwrap();
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], "nope");
        assert!(body["data"].is_null());

        let body = serde_json::to_value(ApiResponse::success(vec![1, 2])).unwrap();
        assert_eq!(body["success"], true);
        assert_eq!(body["data"][1], 2);
    }
}
