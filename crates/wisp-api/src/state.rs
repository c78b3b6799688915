use std::sync::Arc;

use wisp_cache::{CachedStore, TokenBucket};
use wisp_db::Database;
use wisp_gateway::{Hub, Publisher};

use crate::media::MediaSigner;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub store: Arc<CachedStore<Database>>,
    pub jwt_secret: String,
    pub hub: Hub,
    pub publisher: Publisher,
    /// POST /stories: 20 per user per minute.
    pub stories_limiter: TokenBucket,
    /// POST /stories/{id}/reactions: 60 per user per minute.
    pub reactions_limiter: TokenBucket,
    pub media: MediaSigner,
}
