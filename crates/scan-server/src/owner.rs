use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use wheel_core::OwnerId;

use crate::error::AppError;

pub const OWNER_HEADER: &str = "x-owner-id";

/// Watchlist owner named by the `X-Owner-Id` header.
#[derive(Debug, Clone)]
pub struct Owner(pub OwnerId);

#[async_trait]
impl<S> FromRequestParts<S> for Owner
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let id = parts
            .headers
            .get(OWNER_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or(AppError::MissingOwner)?;

        if id.len() > 128 {
            return Err(AppError::BadRequest("owner id too long".to_string()));
        }
        Ok(Owner(OwnerId::new(id)))
    }
}
