use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::{Extension, Json};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use wisp_db::Store;
use wisp_types::api::{MediaInfoResponse, UploadUrlRequest, UploadUrlResponse};

use crate::error::ApiError;
use crate::middleware::Claims;
use crate::{run_blocking, AppState};

/// Mints time-bounded upload/download URLs against the external object
/// store. A pure function of (user, content type): no state here beyond
/// configuration. The minted key is recorded in the media ledger by the
/// handler, and the object store itself verifies the URL token.
#[derive(Clone)]
pub struct MediaSigner {
    endpoint: String,
    bucket: String,
    secret: String,
    url_ttl: Duration,
    max_file_size: i64,
    allowed_types: Vec<String>,
}

/// Scope carried by a presigned URL token.
#[derive(Debug, Serialize, Deserialize)]
struct UrlClaims {
    sub: String,
    key: String,
    op: String,
    exp: usize,
}

impl MediaSigner {
    pub fn new(
        endpoint: String,
        bucket: String,
        secret: String,
        url_ttl: Duration,
        max_file_size: i64,
        allowed_types: Vec<String>,
    ) -> Self {
        Self {
            endpoint,
            bucket,
            secret,
            url_ttl,
            max_file_size,
            allowed_types,
        }
    }

    pub fn allows(&self, content_type: &str) -> bool {
        self.allowed_types.iter().any(|t| t == content_type)
    }

    pub fn max_file_size(&self) -> i64 {
        self.max_file_size
    }

    /// `users/{uid}/media/{uuid}{.ext}`, the only prefix a user may touch.
    pub fn object_key(&self, user_id: &str, content_type: &str) -> String {
        let ext = extension_for(content_type);
        format!("users/{user_id}/media/{}{ext}", Uuid::new_v4())
    }

    pub fn user_prefix(user_id: &str) -> String {
        format!("users/{user_id}/media/")
    }

    pub fn upload_url(&self, user_id: &str, object_key: &str) -> Result<(String, i64), ApiError> {
        self.signed_url(user_id, object_key, "put")
    }

    pub fn download_url(&self, user_id: &str, object_key: &str) -> Result<(String, i64), ApiError> {
        self.signed_url(user_id, object_key, "get")
    }

    fn signed_url(
        &self,
        user_id: &str,
        object_key: &str,
        op: &str,
    ) -> Result<(String, i64), ApiError> {
        let expires_at = (chrono::Utc::now() + self.url_ttl).timestamp();
        let claims = UrlClaims {
            sub: user_id.to_string(),
            key: object_key.to_string(),
            op: op.to_string(),
            exp: expires_at as usize,
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .map_err(|e| anyhow::anyhow!("url signing failed: {e}"))?;

        let url = format!("{}/{}/{}?token={}", self.endpoint, self.bucket, object_key, token);
        Ok((url, expires_at))
    }
}

fn extension_for(content_type: &str) -> &'static str {
    match content_type {
        "image/jpeg" => ".jpg",
        "image/png" => ".png",
        "image/gif" => ".gif",
        "video/mp4" => ".mp4",
        "video/mpeg" => ".mpeg",
        _ => "",
    }
}

pub async fn upload_url(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<UploadUrlRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if !state.media.allows(&req.content_type) {
        return Err(ApiError::Validation(format!(
            "content type {:?} is not allowed",
            req.content_type
        )));
    }

    let content_type = req.content_type;
    let object_key = state.media.object_key(&claims.sub, &content_type);
    let (url, expires_at) = state.media.upload_url(&claims.sub, &object_key)?;

    let ledger_key = object_key.clone();
    let ledger_type = content_type.clone();
    let ledger_state = state.clone();
    run_blocking(move || {
        Ok(ledger_state
            .store
            .record_media_upload(&claims.sub, &ledger_key, &ledger_type)?)
    })
    .await?;

    Ok(Json(UploadUrlResponse {
        object_key,
        upload_url: url,
        expires_at,
        max_file_size: state.media.max_file_size(),
        content_type,
    }))
}

pub async fn list_media(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = claims.sub.clone();
    let blocking_state = state.clone();
    let uploads = run_blocking(move || Ok(blocking_state.store.list_media(&claims.sub)?)).await?;

    let media: Vec<MediaInfoResponse> = uploads
        .into_iter()
        .map(|u| {
            let (media_url, _) = state.media.download_url(&user_id, &u.object_key)?;
            Ok(MediaInfoResponse {
                object_key: u.object_key,
                content_type: u.content_type,
                uploaded_at: u.uploaded_at,
                media_url,
            })
        })
        .collect::<Result<_, ApiError>>()?;

    Ok(Json(media))
}

pub async fn delete_media(
    State(state): State<AppState>,
    Path(object_key): Path<String>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    // Users may only delete under their own media prefix.
    if !object_key.starts_with(&MediaSigner::user_prefix(&claims.sub)) {
        return Err(ApiError::Forbidden);
    }

    run_blocking(move || Ok(state.store.delete_media(&claims.sub, &object_key)?)).await?;
    Ok(StatusCode::OK)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signer() -> MediaSigner {
        MediaSigner::new(
            "http://objects.local".into(),
            "wisp-media".into(),
            "media-secret".into(),
            Duration::from_secs(3600),
            10 * 1024 * 1024,
            vec!["image/jpeg".into(), "video/mp4".into()],
        )
    }

    #[test]
    fn object_keys_are_user_scoped_with_extension() {
        let s = signer();
        let key = s.object_key("u1", "image/jpeg");
        assert!(key.starts_with("users/u1/media/"));
        assert!(key.ends_with(".jpg"));

        let key = s.object_key("u1", "application/octet-stream");
        assert!(!key.contains('.'));
    }

    #[test]
    fn mime_allow_list_is_exact() {
        let s = signer();
        assert!(s.allows("image/jpeg"));
        assert!(!s.allows("image/svg+xml"));
        assert!(!s.allows("IMAGE/JPEG"));
    }

    #[test]
    fn upload_url_embeds_bucket_key_and_token() {
        let s = signer();
        let (url, expires_at) = s.upload_url("u1", "users/u1/media/x.jpg").unwrap();
        assert!(url.starts_with("http://objects.local/wisp-media/users/u1/media/x.jpg?token="));
        assert!(expires_at > chrono::Utc::now().timestamp());
    }
}
