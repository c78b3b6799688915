use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// -- Auth --

#[derive(Debug, Deserialize)]
pub struct SignupRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct SignupResponse {
    pub id: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub user_id: String,
    pub token: String,
}

// -- Stories --

/// Visibility and emoji arrive as raw strings and are validated into the
/// closed enums before anything touches the store.
#[derive(Debug, Deserialize)]
pub struct PostStoryRequest {
    pub text: Option<String>,
    pub media_key: Option<String>,
    pub visibility: String,
    #[serde(default)]
    pub audience_user_ids: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct StoryCreatedResponse {
    pub id: String,
}

#[derive(Debug, Deserialize)]
pub struct ReactionRequest {
    pub emoji: String,
}

// -- Media --

#[derive(Debug, Deserialize)]
pub struct UploadUrlRequest {
    pub content_type: String,
}

#[derive(Debug, Serialize)]
pub struct UploadUrlResponse {
    pub object_key: String,
    pub upload_url: String,
    pub expires_at: i64,
    pub max_file_size: i64,
    pub content_type: String,
}

#[derive(Debug, Serialize)]
pub struct MediaInfoResponse {
    pub object_key: String,
    pub content_type: String,
    pub uploaded_at: DateTime<Utc>,
    pub media_url: String,
}
