pub mod amplifications;
pub mod authz;
pub mod billing;
pub mod cache;
pub mod error;
pub mod messaging;
pub mod users;
pub mod water;
pub mod wishes;

use std::sync::Arc;

use anyhow::anyhow;

use dandy_db::Database;
use dandy_types::WishError;

use crate::cache::WishCache;
use crate::error::ApiError;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Database,
    pub cache: WishCache,
    pub stripe_webhook_secret: String,
}

/// Run rusqlite work off the async runtime.
pub(crate) async fn run_blocking<T, F>(f: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, WishError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApiError::from(WishError::Upstream(anyhow!("spawn_blocking join error: {}", e))))?
        .map_err(ApiError::from)
}
