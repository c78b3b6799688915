pub mod auth;
pub mod error;
pub mod follows;
pub mod media;
pub mod middleware;
pub mod ratelimit;
pub mod state;
pub mod stats;
pub mod stories;

pub use error::ApiError;
pub use state::{AppState, AppStateInner};

/// Runs a synchronous store operation on the blocking thread pool.
pub(crate) async fn run_blocking<T, F>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, ApiError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApiError::Dependency(anyhow::anyhow!("blocking task failed: {e}")))?
}
