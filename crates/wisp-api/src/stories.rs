use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::{Extension, Json};
use tracing::info;

use wisp_db::Store;
use wisp_types::api::{PostStoryRequest, ReactionRequest, StoryCreatedResponse};
use wisp_types::models::{Reaction, Story, Visibility};

use crate::error::ApiError;
use crate::middleware::Claims;
use crate::{run_blocking, AppState};

const MAX_TEXT_LEN: usize = 2048;

pub async fn post_story(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<PostStoryRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let visibility = Visibility::parse(&req.visibility).ok_or_else(|| {
        ApiError::Validation("visibility must be one of PUBLIC, FRIENDS, PRIVATE".into())
    })?;

    if req.text.as_deref().is_none_or(str::is_empty) && req.media_key.is_none() {
        return Err(ApiError::Validation(
            "story needs text or a media attachment".into(),
        ));
    }
    if req.text.as_deref().is_some_and(|t| t.len() > MAX_TEXT_LEN) {
        return Err(ApiError::Validation("story text too long".into()));
    }

    let story_id = run_blocking(move || {
        Ok(state.store.create_story(
            &claims.sub,
            req.text.as_deref(),
            req.media_key.as_deref(),
            visibility,
            &req.audience_user_ids,
        )?)
    })
    .await?;

    info!(%story_id, "story created");
    Ok((
        StatusCode::CREATED,
        Json(StoryCreatedResponse { id: story_id }),
    ))
}

pub async fn get_story(
    State(state): State<AppState>,
    Path(story_id): Path<String>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Story>, ApiError> {
    let story = run_blocking(move || {
        let story = state.store.get_story(&story_id)?;
        if !state.store.can_view(&story_id, &claims.sub)? {
            return Err(ApiError::Forbidden);
        }
        Ok(story)
    })
    .await?;

    Ok(Json(story))
}

pub async fn feed(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<Story>>, ApiError> {
    let stories =
        run_blocking(move || Ok(state.store.get_stories_for_viewer(&claims.sub)?)).await?;
    Ok(Json(stories))
}

pub async fn feed_optimized(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let stories = run_blocking(move || Ok(state.store.get_feed_with_meta(&claims.sub)?)).await?;
    Ok(Json(stories))
}

pub async fn view_story(
    State(state): State<AppState>,
    Path(story_id): Path<String>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let viewer = claims.sub.clone();

    let blocking_state = state.clone();
    let blocking_story = story_id.clone();
    let blocking_viewer = viewer.clone();
    let (story, first_view) = run_blocking(move || {
        let story = blocking_state.store.get_story(&blocking_story)?;
        // Viewing is reading: the visibility predicate gates it.
        if !blocking_state
            .store
            .can_view(&blocking_story, &blocking_viewer)?
        {
            return Err(ApiError::Forbidden);
        }
        let first_view = blocking_state
            .store
            .record_view(&blocking_story, &blocking_viewer)?;
        Ok((story, first_view))
    })
    .await?;

    // Repeat views stay silent; the unique key made them no-ops.
    if first_view {
        state
            .publisher
            .story_viewed(&story_id, &viewer, &story.author_id);
    }

    Ok(StatusCode::OK)
}

pub async fn react(
    State(state): State<AppState>,
    Path(story_id): Path<String>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<ReactionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let emoji = Reaction::parse(&req.emoji)
        .ok_or_else(|| ApiError::Validation(format!("unknown emoji {:?}", req.emoji)))?;

    let user = claims.sub.clone();

    let blocking_state = state.clone();
    let blocking_story = story_id.clone();
    let blocking_user = user.clone();
    let story = run_blocking(move || {
        let story = blocking_state.store.get_story(&blocking_story)?;
        if !blocking_state
            .store
            .can_view(&blocking_story, &blocking_user)?
        {
            return Err(ApiError::Forbidden);
        }
        blocking_state
            .store
            .upsert_reaction(&blocking_story, &blocking_user, emoji)?;
        Ok(story)
    })
    .await?;

    // Every overwrite notifies again; the latest event carries the emoji
    // that won.
    state
        .publisher
        .story_reacted(&story_id, &user, &story.author_id, emoji);

    Ok(StatusCode::OK)
}
