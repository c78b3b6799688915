use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;
use tracing::error;

use wisp_db::StoreError;

/// Surface-agnostic error kinds; `IntoResponse` maps them to status codes.
/// Store errors bubble up unwrapped and convert at the handler boundary.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),
    #[error("authentication required")]
    Unauthorized,
    #[error("forbidden")]
    Forbidden,
    #[error("not found")]
    NotFound,
    #[error("rate limit exceeded")]
    RateLimited { limit: i64, remaining: i64 },
    #[error("{0}")]
    Conflict(String),
    #[error("internal error")]
    Dependency(#[from] anyhow::Error),
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::DuplicateEmail => ApiError::Conflict("email already registered".into()),
            StoreError::NotFound => ApiError::NotFound,
            StoreError::SelfFollow => ApiError::Validation("cannot follow yourself".into()),
            StoreError::Sqlite(e) => ApiError::Dependency(e.into()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let ApiError::Dependency(e) = &self {
            error!("request failed: {e:#}");
        }

        let status = match &self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Dependency(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(serde_json::json!({ "error": self.to_string() }));
        let mut response = (status, body).into_response();

        if let ApiError::RateLimited { limit, remaining } = self {
            rate_limit_headers(response.headers_mut(), limit, remaining);
        }
        response
    }
}

/// Shared by the deny path above and the middleware's allow path.
pub(crate) fn rate_limit_headers(headers: &mut HeaderMap, limit: i64, remaining: i64) {
    if let Ok(v) = HeaderValue::from_str(&limit.to_string()) {
        headers.insert("X-RateLimit-Limit", v);
    }
    if let Ok(v) = HeaderValue::from_str(&remaining.to_string()) {
        headers.insert("X-RateLimit-Remaining", v);
    }
    headers.insert("X-RateLimit-Reset", HeaderValue::from_static("60"));
}
