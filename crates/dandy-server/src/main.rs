use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Json, Router,
    routing::{delete, get, patch, post},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use dandy_api::{
    AppState, AppStateInner, amplifications, billing, cache::WishCache, messaging, users, water,
    wishes,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dandy=debug,tower_http=debug".into()),
        )
        .init();

    // Config
    let db_path = std::env::var("DANDY_DB_PATH").unwrap_or_else(|_| "dandy.db".into());
    let host = std::env::var("DANDY_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("DANDY_PORT")
        .unwrap_or_else(|_| "3000".into())
        .parse()?;
    let stripe_webhook_secret =
        std::env::var("STRIPE_WEBHOOK_SECRET").unwrap_or_else(|_| "whsec-dev-change-me".into());

    // Init database
    let db = dandy_db::Database::open(&PathBuf::from(&db_path))?;

    // Shared state
    let state: AppState = Arc::new(AppStateInner {
        db,
        cache: WishCache::new(),
        stripe_webhook_secret,
    });

    let app = Router::new()
        .route("/health", get(health))
        .route("/users", post(users::create))
        .route("/users/{user_id}", get(users::get))
        .route("/wishes", post(wishes::create))
        .route("/wishes", get(wishes::list))
        .route("/wishes/{wish_id}", get(wishes::get))
        .route("/wishes/{wish_id}", delete(wishes::delete))
        .route("/wishes/{wish_id}/progress", post(wishes::set_progress))
        .route("/wishes/{wish_id}/milestones", post(wishes::post_milestone))
        .route(
            "/wishes/{wish_id}/milestones/{milestone_id}",
            patch(wishes::patch_milestone),
        )
        .route("/wishes/{wish_id}/amplify", post(amplifications::amplify))
        .route("/amplifications", get(amplifications::list))
        .route(
            "/amplifications/{amplification_id}",
            delete(amplifications::remove),
        )
        .route("/wishes/{wish_id}/messages", post(messaging::send))
        .route(
            "/conversations/{conversation_id}/messages",
            get(messaging::messages),
        )
        .route(
            "/wishes/{wish_id}/conversations",
            get(messaging::conversations),
        )
        .route("/wishes/{wish_id}/pause", post(messaging::set_pause))
        .route("/wishes/{wish_id}/pause", get(messaging::get_pause))
        .route("/wishes/{wish_id}/water", post(water::water))
        .route("/billing/webhook", post(billing::webhook))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Dandy Wishes server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}
