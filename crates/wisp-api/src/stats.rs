use axum::extract::State;
use axum::{Extension, Json};

use wisp_db::Store;
use wisp_types::models::UserStats;

use crate::error::ApiError;
use crate::middleware::Claims;
use crate::{run_blocking, AppState};

/// GET /me/stats: the caller's posting/view/reaction activity over the
/// trailing 7 days.
pub async fn me_stats(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<UserStats>, ApiError> {
    let stats = run_blocking(move || Ok(state.store.get_user_stats(&claims.sub)?)).await?;
    Ok(Json(stats))
}
