//! Wish CRUD, the cached public feed, progress updates, and the
//! premium-gated milestone editor.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use dandy_db::Database;
use dandy_types::api::{
    AddMilestoneRequest, CreateWishRequest, Paginated, SortOrder, UpdateMilestoneRequest,
    UpdateProgressRequest,
};
use dandy_types::models::{Milestone, Wish};
use dandy_types::{Result, WishError};

use crate::authz::{Action, ensure_can, ensure_premium};
use crate::cache::CacheKey;
use crate::error::ApiResult;
use crate::{AppState, run_blocking};

const MAX_BODY_LEN: usize = 2000;

#[derive(Debug, Deserialize)]
pub struct WishFeedQuery {
    #[serde(default)]
    pub sort: SortOrder,
    pub category: Option<String>,
    pub search: Option<String>,
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_limit")]
    pub limit: u32,
}

pub(crate) fn default_page() -> u32 {
    1
}

pub(crate) fn default_limit() -> u32 {
    20
}

// -- Core rules (sync, unit-testable) --

pub fn create_wish(db: &Database, req: CreateWishRequest) -> Result<Wish> {
    let body = req.body.trim();
    if body.is_empty() {
        return Err(WishError::Validation("wish body must not be empty".into()));
    }
    if body.len() > MAX_BODY_LEN {
        return Err(WishError::Validation(format!(
            "wish body exceeds {} characters",
            MAX_BODY_LEN
        )));
    }
    if req.category.trim().is_empty() {
        return Err(WishError::Validation("category must not be empty".into()));
    }
    if db.get_user(req.user_id)?.is_none() {
        return Err(WishError::NotFound("user"));
    }

    let wish = Wish {
        id: Uuid::new_v4(),
        user_id: req.user_id,
        body: body.to_string(),
        category: req.category.trim().to_string(),
        progress: 0,
        is_private: req.is_private,
        support_count: 0,
        milestones: vec![],
        created_at: Utc::now(),
    };
    db.insert_wish(&wish)?;
    Ok(wish)
}

pub fn fetch_wish(db: &Database, wish_id: Uuid) -> Result<Wish> {
    db.get_wish(wish_id)?.ok_or(WishError::NotFound("wish"))
}

pub fn delete_wish(db: &Database, wish_id: Uuid, user_id: Uuid) -> Result<()> {
    let wish = fetch_wish(db, wish_id)?;
    ensure_can(user_id, Action::DeleteWish, &wish)?;
    db.delete_wish(wish_id)?;
    Ok(())
}

/// Out-of-range progress is rejected outright rather than clamped.
pub fn update_progress(db: &Database, wish_id: Uuid, req: UpdateProgressRequest) -> Result<Wish> {
    if !(0..=100).contains(&req.progress) {
        return Err(WishError::Validation(format!(
            "progress must be within 0..=100, got {}",
            req.progress
        )));
    }
    let wish = fetch_wish(db, wish_id)?;
    ensure_can(req.user_id, Action::UpdateProgress, &wish)?;

    db.update_progress(wish_id, req.progress as u8)?;
    fetch_wish(db, wish_id)
}

pub fn add_milestone(db: &Database, wish_id: Uuid, req: AddMilestoneRequest) -> Result<Milestone> {
    let wish = fetch_wish(db, wish_id)?;
    ensure_can(req.user_id, Action::EditMilestones, &wish)?;
    ensure_premium(&db.effective_subscription(req.user_id)?, "milestones")?;

    let title = req.title.trim();
    if title.is_empty() {
        return Err(WishError::Validation("milestone title must not be empty".into()));
    }

    let milestone = Milestone {
        id: Uuid::new_v4(),
        wish_id,
        title: title.to_string(),
        completed: false,
        created_at: Utc::now(),
    };
    db.insert_milestone(&milestone)?;
    Ok(milestone)
}

pub fn update_milestone(
    db: &Database,
    wish_id: Uuid,
    milestone_id: Uuid,
    req: UpdateMilestoneRequest,
) -> Result<Wish> {
    let wish = fetch_wish(db, wish_id)?;
    ensure_can(req.user_id, Action::EditMilestones, &wish)?;
    ensure_premium(&db.effective_subscription(req.user_id)?, "milestones")?;

    if let Some(title) = &req.title {
        if title.trim().is_empty() {
            return Err(WishError::Validation("milestone title must not be empty".into()));
        }
    }
    if req.title.is_none() && req.completed.is_none() {
        return Err(WishError::Validation("nothing to update".into()));
    }

    let changed = db.update_milestone(
        wish_id,
        milestone_id,
        req.title.as_deref().map(str::trim),
        req.completed,
    )?;
    if !changed {
        return Err(WishError::NotFound("milestone"));
    }
    fetch_wish(db, wish_id)
}

// -- Handlers --

pub async fn create(
    State(state): State<AppState>,
    Json(req): Json<CreateWishRequest>,
) -> ApiResult<impl IntoResponse> {
    let wish = run_blocking(move || create_wish(&state.db, req)).await?;
    Ok((StatusCode::CREATED, Json(wish)))
}

pub async fn get(
    State(state): State<AppState>,
    Path(wish_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let wish = run_blocking(move || fetch_wish(&state.db, wish_id)).await?;
    Ok(Json(wish))
}

#[derive(Debug, Deserialize)]
pub struct DeleteWishQuery {
    pub user_id: Uuid,
}

pub async fn delete(
    State(state): State<AppState>,
    Path(wish_id): Path<Uuid>,
    Query(query): Query<DeleteWishQuery>,
) -> ApiResult<impl IntoResponse> {
    run_blocking(move || delete_wish(&state.db, wish_id, query.user_id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// The public feed, served through the 5-minute cache.
pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<WishFeedQuery>,
) -> ApiResult<Json<Paginated<Wish>>> {
    let page = run_blocking(move || {
        let key = CacheKey {
            sort: query.sort,
            category: query.category.clone(),
            search: query.search.clone(),
        };
        let limit = query.limit.clamp(1, 100);
        state.cache.get_or_fetch(key, query.page, limit, || {
            state
                .db
                .list_public_wishes(query.sort, query.category.as_deref(), query.search.as_deref())
                .map_err(WishError::Upstream)
        })
    })
    .await?;
    Ok(Json(page))
}

pub async fn set_progress(
    State(state): State<AppState>,
    Path(wish_id): Path<Uuid>,
    Json(req): Json<UpdateProgressRequest>,
) -> ApiResult<impl IntoResponse> {
    let wish = run_blocking(move || update_progress(&state.db, wish_id, req)).await?;
    Ok(Json(wish))
}

pub async fn post_milestone(
    State(state): State<AppState>,
    Path(wish_id): Path<Uuid>,
    Json(req): Json<AddMilestoneRequest>,
) -> ApiResult<impl IntoResponse> {
    let milestone = run_blocking(move || add_milestone(&state.db, wish_id, req)).await?;
    Ok((StatusCode::CREATED, Json(milestone)))
}

pub async fn patch_milestone(
    State(state): State<AppState>,
    Path((wish_id, milestone_id)): Path<(Uuid, Uuid)>,
    Json(req): Json<UpdateMilestoneRequest>,
) -> ApiResult<impl IntoResponse> {
    let wish = run_blocking(move || update_milestone(&state.db, wish_id, milestone_id, req)).await?;
    Ok(Json(wish))
}
