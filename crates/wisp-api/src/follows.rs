use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Extension;

use wisp_db::Store;

use crate::error::ApiError;
use crate::middleware::Claims;
use crate::{run_blocking, AppState};

pub async fn follow(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    run_blocking(move || Ok(state.store.follow(&claims.sub, &user_id)?)).await?;
    Ok(StatusCode::OK)
}

pub async fn unfollow(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    run_blocking(move || Ok(state.store.unfollow(&claims.sub, &user_id)?)).await?;
    Ok(StatusCode::OK)
}
