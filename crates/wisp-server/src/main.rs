mod config;
mod worker;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Query, State, WebSocketUpgrade};
use axum::http::Method;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{middleware, Router};
use serde::Deserialize;
use socket2::{Domain, Protocol, Socket, Type};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use wisp_api::media::MediaSigner;
use wisp_api::middleware::{require_auth, verify_token, JwtSecret};
use wisp_api::{auth, follows, media, ratelimit, stats, stories, ApiError, AppState, AppStateInner};
use wisp_cache::{CachedStore, KvStore, TokenBucket};
use wisp_db::Database;
use wisp_gateway::{connection, Hub, Publisher};

use crate::config::Config;

/// Placeholder values that MUST NOT be used as the JWT secret.
const PLACEHOLDER_SECRETS: &[&str] = &["change-me-to-a-random-string", "dev-secret-change-me"];

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "wisp=debug,tower_http=debug".into()),
        )
        .init();

    let cfg = Config::from_env()?;

    if cfg.jwt_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&cfg.jwt_secret.as_str()) {
        eprintln!("FATAL: WISP_JWT_SECRET is unset or still a placeholder.");
        eprintln!("       Generate a strong random value: openssl rand -base64 48");
        eprintln!("       Set it in your .env file and restart.");
        std::process::exit(1);
    }

    // Durable store, with the read-through cache in front of it.
    let db = Database::open(&PathBuf::from(&cfg.db_path))?;
    let kv = Arc::new(KvStore::new());
    let store = Arc::new(CachedStore::new(db, kv.clone()));

    // Real-time hub and the publisher that feeds it.
    let hub = Hub::new();
    let publisher = Publisher::new(hub.clone());

    let media_signer = MediaSigner::new(
        cfg.media_endpoint.clone(),
        cfg.media_bucket.clone(),
        cfg.jwt_secret.clone(),
        Duration::from_secs(cfg.presigned_url_ttl_secs),
        cfg.max_file_size,
        cfg.allowed_mime_types.clone(),
    );

    let app_state: AppState = Arc::new(AppStateInner {
        store: store.clone(),
        jwt_secret: cfg.jwt_secret.clone(),
        hub: hub.clone(),
        publisher,
        stories_limiter: TokenBucket::new(kv.clone(), 20, 20),
        reactions_limiter: TokenBucket::new(kv.clone(), 60, 60),
        media: media_signer,
    });

    // Expired stories get reaped once at startup, then every tick.
    tokio::spawn(worker::run_expiration_loop(
        store,
        Duration::from_secs(cfg.worker_period_secs),
    ));

    let public_routes = Router::new()
        .route("/signup", post(auth::signup))
        .route("/login", post(auth::login))
        .route("/healthz", get(|| async { "ok" }))
        .with_state(app_state.clone());

    let protected_routes = Router::new()
        .route(
            "/stories",
            post(stories::post_story).route_layer(middleware::from_fn_with_state(
                app_state.clone(),
                ratelimit::limit_stories,
            )),
        )
        .route("/stories/{id}", get(stories::get_story))
        .route("/feed", get(stories::feed))
        .route("/feed/optimized", get(stories::feed_optimized))
        .route("/stories/{id}/view", post(stories::view_story))
        .route(
            "/stories/{id}/reactions",
            post(stories::react).route_layer(middleware::from_fn_with_state(
                app_state.clone(),
                ratelimit::limit_reactions,
            )),
        )
        .route("/follow/{user_id}", post(follows::follow))
        .route("/follow/{user_id}", delete(follows::unfollow))
        .route("/me/stats", get(stats::me_stats))
        .route("/media/upload-url", post(media::upload_url))
        .route("/media", get(media::list_media))
        .route("/media/{*object_key}", delete(media::delete_media))
        .layer(middleware::from_fn(require_auth))
        .with_state(app_state.clone());

    let ws_route = Router::new()
        .route("/ws", get(ws_upgrade))
        .with_state(app_state);

    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::any())
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers(tower_http::cors::Any);

    let app = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .merge(ws_route)
        .layer(axum::Extension(JwtSecret(Arc::from(
            cfg.jwt_secret.as_str(),
        ))))
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = cfg.bind_address().parse()?;
    info!("wisp server listening on {}", addr);

    // socket2 lets us set TCP_NODELAY on the listening socket so accepted
    // connections inherit it; small WebSocket frames shouldn't sit behind
    // Nagle's algorithm.
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_nodelay(true)?;
    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(1024)?;
    socket.set_nonblocking(true)?;
    let listener = tokio::net::TcpListener::from_std(socket.into())?;

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_with_drain_cap())
        .await?;

    info!("wisp server stopped");
    Ok(())
}

#[derive(Deserialize)]
struct WsQuery {
    token: Option<String>,
}

/// WebSocket auth rides the query string: upgrade requests can't reliably
/// carry an Authorization header.
async fn ws_upgrade(
    State(state): State<AppState>,
    Query(params): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let verified = params
        .token
        .as_deref()
        .and_then(|token| verify_token(token, &state.jwt_secret));

    let Some(user_id) = verified else {
        warn!("websocket upgrade without a valid token");
        return ApiError::Unauthorized.into_response();
    };

    ws.on_upgrade(move |socket| connection::serve(socket, state.hub.clone(), user_id))
        .into_response()
}

/// Resolves on SIGINT/SIGTERM. In-flight requests then get up to 5 seconds
/// to drain before the process exits regardless.
async fn shutdown_with_drain_cap() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => info!("received Ctrl+C, shutting down"),
            _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("received Ctrl+C, shutting down");
    }

    tokio::spawn(async {
        tokio::time::sleep(Duration::from_secs(5)).await;
        warn!("drain deadline reached, exiting");
        std::process::exit(0);
    });
}
