use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;

use wisp_cache::TokenBucket;

use crate::error::{rate_limit_headers, ApiError};
use crate::middleware::Claims;
use crate::AppState;

/// Wraps POST /stories.
pub async fn limit_stories(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    limit(&state.stories_limiter, "stories", req, next).await
}

/// Wraps POST /stories/{id}/reactions.
pub async fn limit_reactions(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    limit(&state.reactions_limiter, "reactions", req, next).await
}

/// Consumes one token for the authenticated caller. Both outcomes expose the
/// X-RateLimit-* headers; an empty bucket short-circuits with 429.
async fn limit(
    bucket: &TokenBucket,
    action: &str,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    // Runs inside require_auth, so the claims are already attached.
    let claims = req
        .extensions()
        .get::<Claims>()
        .cloned()
        .ok_or(ApiError::Unauthorized)?;

    let decision = bucket.allow(&claims.sub, action, chrono::Utc::now().timestamp());
    if !decision.allowed {
        return Err(ApiError::RateLimited {
            limit: decision.limit,
            remaining: decision.remaining,
        });
    }

    let mut response = next.run(req).await;
    rate_limit_headers(response.headers_mut(), decision.limit, decision.remaining);
    Ok(response)
}
