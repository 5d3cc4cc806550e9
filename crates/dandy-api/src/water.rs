//! The "water" (support) flow: a one-time-per-user endorsement that bumps
//! the wish's counter and awards XP to both parties. The storage layer
//! runs it as one transaction; this module maps the outcome and clears
//! the feed cache.

use axum::{
    Json,
    extract::{Path, State},
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use uuid::Uuid;

use dandy_db::queries::WaterOutcome;
use dandy_types::api::{WaterRequest, WaterResult};
use dandy_types::{Result, WishError};

use crate::error::ApiResult;
use crate::{AppState, AppStateInner, run_blocking};

pub fn water_wish(
    state: &AppStateInner,
    wish_id: Uuid,
    user_id: Uuid,
    now: DateTime<Utc>,
) -> Result<WaterResult> {
    match state.db.water_wish(user_id, wish_id, now)? {
        WaterOutcome::AlreadySupported => Ok(WaterResult::already_supported()),
        WaterOutcome::NoSuchWish => Err(WishError::NotFound("wish")),
        WaterOutcome::Watered { supporter, owner, wish } => {
            // Coarse on purpose: support counts appear in every feed page.
            state.cache.invalidate_all();
            Ok(WaterResult {
                success: true,
                supporter: Some(supporter),
                owner: Some(owner),
                wish: Some(wish),
            })
        }
    }
}

pub async fn water(
    State(state): State<AppState>,
    Path(wish_id): Path<Uuid>,
    Json(req): Json<WaterRequest>,
) -> ApiResult<impl IntoResponse> {
    let result = run_blocking(move || water_wish(&state, wish_id, req.user_id, Utc::now())).await?;
    Ok(Json(result))
}
