//! Quota-gated visibility boosts. The monthly quota counts rows in the
//! trailing 30 days, so capacity frees up as old amplifications age out.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use uuid::Uuid;

use dandy_db::Database;
use dandy_types::api::{AmplifiedWish, AmplifyRequest, Paginated};
use dandy_types::models::Amplification;
use dandy_types::quota::QuotaKind;
use dandy_types::{Result, WishError};

use crate::authz::{Action, ensure_can};
use crate::error::ApiResult;
use crate::wishes::{default_limit, default_page, fetch_wish};
use crate::{AppState, run_blocking};

const AMPLIFY_WINDOW_DAYS: i64 = 30;
const MAX_CONTEXT_LEN: usize = 500;

pub fn amplify_wish(
    db: &Database,
    wish_id: Uuid,
    req: AmplifyRequest,
    now: DateTime<Utc>,
) -> Result<Amplification> {
    let wish = fetch_wish(db, wish_id)?;
    ensure_can(req.user_id, Action::AmplifyWish, &wish)?;

    if let Some(context) = &req.context {
        if context.len() > MAX_CONTEXT_LEN {
            return Err(WishError::Validation(format!(
                "context exceeds {} characters",
                MAX_CONTEXT_LEN
            )));
        }
    }

    let subscription = db.effective_subscription(req.user_id)?;
    let window_start = now - Duration::days(AMPLIFY_WINDOW_DAYS);
    let used = db.count_amplifications_since(req.user_id, window_start)?;
    if !subscription.amplifications_per_month.allows(used) {
        return Err(WishError::QuotaExceeded {
            quota: QuotaKind::AmplificationsPerMonth,
        });
    }

    let amplification = Amplification {
        id: Uuid::new_v4(),
        wish_id,
        user_id: req.user_id,
        objective: req.objective,
        context: req.context,
        amplified_at: now,
        expires_at: now + Duration::days(AMPLIFY_WINDOW_DAYS),
    };
    db.insert_amplification(&amplification)?;
    Ok(amplification)
}

/// Active (non-expired) amplifications, optionally scoped to one user.
pub fn amplified_wishes(
    db: &Database,
    user_id: Option<Uuid>,
    page: u32,
    limit: u32,
    now: DateTime<Utc>,
) -> Result<Paginated<AmplifiedWish>> {
    let page = page.max(1);
    let limit = limit.clamp(1, 100);
    let offset = (page - 1).saturating_mul(limit);

    let (items, total) = db.list_active_amplifications(user_id, now, limit, offset)?;
    Ok(Paginated::new(items, total, page, limit))
}

pub fn remove_amplification(db: &Database, amplification_id: Uuid, user_id: Uuid) -> Result<()> {
    let amp = db
        .get_amplification(amplification_id)?
        .ok_or(WishError::NotFound("amplification"))?;
    if amp.user_id != user_id {
        return Err(WishError::Forbidden(format!(
            "user {} does not own amplification {}",
            user_id, amplification_id
        )));
    }
    db.delete_amplification(amplification_id)?;
    Ok(())
}

// -- Handlers --

pub async fn amplify(
    State(state): State<AppState>,
    Path(wish_id): Path<Uuid>,
    Json(req): Json<AmplifyRequest>,
) -> ApiResult<impl IntoResponse> {
    let amp = run_blocking(move || amplify_wish(&state.db, wish_id, req, Utc::now())).await?;
    Ok((StatusCode::CREATED, Json(amp)))
}

#[derive(Debug, Deserialize)]
pub struct AmplificationQuery {
    pub user_id: Option<Uuid>,
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_limit")]
    pub limit: u32,
}

pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<AmplificationQuery>,
) -> ApiResult<Json<Paginated<AmplifiedWish>>> {
    let page = run_blocking(move || {
        amplified_wishes(&state.db, query.user_id, query.page, query.limit, Utc::now())
    })
    .await?;
    Ok(Json(page))
}

#[derive(Debug, Deserialize)]
pub struct RemoveQuery {
    pub user_id: Uuid,
}

pub async fn remove(
    State(state): State<AppState>,
    Path(amplification_id): Path<Uuid>,
    Query(query): Query<RemoveQuery>,
) -> ApiResult<impl IntoResponse> {
    run_blocking(move || remove_amplification(&state.db, amplification_id, query.user_id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use dandy_types::api::CreateWishRequest;
    use dandy_types::models::{AmplifyObjective, UserProfile};
    use dandy_types::quota::Subscription;

    fn test_db() -> Database {
        Database::open_in_memory().unwrap()
    }

    fn seed_user(db: &Database, username: &str) -> Uuid {
        let id = Uuid::new_v4();
        db.create_user(&UserProfile {
            id,
            username: username.to_string(),
            bio: None,
            avatar_url: None,
            is_premium: false,
            is_public: true,
            created_at: Utc::now(),
        })
        .unwrap();
        id
    }

    fn seed_wish(db: &Database, owner: Uuid) -> Uuid {
        crate::wishes::create_wish(
            db,
            CreateWishRequest {
                user_id: owner,
                body: "start a garden".to_string(),
                category: "home".to_string(),
                is_private: false,
            },
        )
        .unwrap()
        .id
    }

    fn amplify_req(user_id: Uuid) -> AmplifyRequest {
        AmplifyRequest {
            user_id,
            objective: AmplifyObjective::Support,
            context: None,
        }
    }

    #[test]
    fn quota_blocks_after_limit_and_frees_after_expiry() {
        let db = test_db();
        let owner = seed_user(&db, "owner");
        let now = Utc::now();

        // Free tier: 3 per trailing 30 days.
        for _ in 0..3 {
            let wish = seed_wish(&db, owner);
            amplify_wish(&db, wish, amplify_req(owner), now).unwrap();
        }

        let blocked = seed_wish(&db, owner);
        let err = amplify_wish(&db, blocked, amplify_req(owner), now).unwrap_err();
        assert!(matches!(
            err,
            WishError::QuotaExceeded {
                quota: QuotaKind::AmplificationsPerMonth
            }
        ));

        // 31 days later the oldest three have aged out of the window.
        let later = now + Duration::days(31);
        amplify_wish(&db, blocked, amplify_req(owner), later).unwrap();
    }

    #[test]
    fn premium_tier_is_not_quota_limited() {
        let db = test_db();
        let owner = seed_user(&db, "owner");
        db.upsert_subscription(owner, &Subscription::premium(), None, None, None, Utc::now())
            .unwrap();

        let now = Utc::now();
        for _ in 0..10 {
            let wish = seed_wish(&db, owner);
            amplify_wish(&db, wish, amplify_req(owner), now).unwrap();
        }
    }

    #[test]
    fn only_the_owner_may_amplify() {
        let db = test_db();
        let owner = seed_user(&db, "owner");
        let stranger = seed_user(&db, "stranger");
        let wish = seed_wish(&db, owner);

        let err = amplify_wish(&db, wish, amplify_req(stranger), Utc::now()).unwrap_err();
        assert!(matches!(err, WishError::Forbidden(_)));
    }

    #[test]
    fn expiry_is_thirty_days_out() {
        let db = test_db();
        let owner = seed_user(&db, "owner");
        let wish = seed_wish(&db, owner);
        let now = Utc::now();

        let amp = amplify_wish(&db, wish, amplify_req(owner), now).unwrap();
        assert_eq!(amp.expires_at, now + Duration::days(30));
    }

    #[test]
    fn feed_paginates_and_scopes_by_user() {
        let db = test_db();
        let a = seed_user(&db, "a");
        let b = seed_user(&db, "b");
        db.upsert_subscription(a, &Subscription::premium(), None, None, None, Utc::now())
            .unwrap();
        let now = Utc::now();

        for _ in 0..4 {
            let wish = seed_wish(&db, a);
            amplify_wish(&db, wish, amplify_req(a), now).unwrap();
        }
        let wish_b = seed_wish(&db, b);
        amplify_wish(&db, wish_b, amplify_req(b), now).unwrap();

        let all = amplified_wishes(&db, None, 1, 3, now).unwrap();
        assert_eq!(all.total_count, 5);
        assert_eq!(all.items.len(), 3);
        assert_eq!(all.total_pages, 2);

        let just_b = amplified_wishes(&db, Some(b), 1, 10, now).unwrap();
        assert_eq!(just_b.total_count, 1);
        assert_eq!(just_b.items[0].wish.id, wish_b);
    }

    #[test]
    fn removal_is_owner_only() {
        let db = test_db();
        let owner = seed_user(&db, "owner");
        let stranger = seed_user(&db, "stranger");
        let wish = seed_wish(&db, owner);
        let amp = amplify_wish(&db, wish, amplify_req(owner), Utc::now()).unwrap();

        assert!(matches!(
            remove_amplification(&db, amp.id, stranger).unwrap_err(),
            WishError::Forbidden(_)
        ));
        remove_amplification(&db, amp.id, owner).unwrap();
        assert!(matches!(
            remove_amplification(&db, amp.id, owner).unwrap_err(),
            WishError::NotFound("amplification")
        ));
    }
}
