use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use uuid::Uuid;

use dandy_db::Database;
use dandy_types::api::CreateUserRequest;
use dandy_types::models::UserProfile;
use dandy_types::{Result, WishError};

use crate::error::ApiResult;
use crate::{AppState, run_blocking};

pub fn create_profile(db: &Database, req: CreateUserRequest) -> Result<UserProfile> {
    let username = req.username.trim();
    if username.len() < 3 || username.len() > 32 {
        return Err(WishError::Validation(
            "username must be 3..=32 characters".into(),
        ));
    }
    if db.get_user_by_username(username)?.is_some() {
        return Err(WishError::Conflict(format!(
            "username '{}' is taken",
            username
        )));
    }

    let profile = UserProfile {
        id: Uuid::new_v4(),
        username: username.to_string(),
        bio: req.bio,
        avatar_url: req.avatar_url,
        is_premium: false,
        is_public: req.is_public,
        created_at: Utc::now(),
    };
    db.create_user(&profile)?;
    Ok(profile)
}

pub fn fetch_profile(db: &Database, user_id: Uuid) -> Result<UserProfile> {
    db.get_user(user_id)?.ok_or(WishError::NotFound("user"))
}

pub async fn create(
    State(state): State<AppState>,
    Json(req): Json<CreateUserRequest>,
) -> ApiResult<impl IntoResponse> {
    let profile = run_blocking(move || create_profile(&state.db, req)).await?;
    Ok((StatusCode::CREATED, Json(profile)))
}

pub async fn get(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let profile = run_blocking(move || fetch_profile(&state.db, user_id)).await?;
    Ok(Json(profile))
}
