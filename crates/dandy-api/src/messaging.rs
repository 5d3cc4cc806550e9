//! Wish-scoped direct messaging: conversation identity from the canonical
//! participant pair, the per-wish message quota, and the owner's pause
//! switch. Check order is part of the contract — pause is reported before
//! quota so the user sees the real reason.

use std::collections::HashMap;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use dandy_db::Database;
use dandy_types::api::{ConversationView, Paginated, SendMessageRequest, TogglePauseRequest};
use dandy_types::models::Message;
use dandy_types::quota::QuotaKind;
use dandy_types::{Result, WishError};

use crate::authz::{Action, ensure_can};
use crate::error::ApiResult;
use crate::wishes::{default_limit, default_page, fetch_wish};
use crate::{AppState, run_blocking};

const MAX_MESSAGE_LEN: usize = 4000;

pub fn send_message(
    db: &Database,
    wish_id: Uuid,
    req: SendMessageRequest,
    now: DateTime<Utc>,
) -> Result<Message> {
    let body = req.body.trim();
    if body.is_empty() {
        return Err(WishError::Validation("message body must not be empty".into()));
    }
    if body.len() > MAX_MESSAGE_LEN {
        return Err(WishError::Validation(format!(
            "message exceeds {} characters",
            MAX_MESSAGE_LEN
        )));
    }
    if req.sender_id == req.recipient_id {
        return Err(WishError::Validation("cannot message yourself".into()));
    }

    fetch_wish(db, wish_id)?;

    if db.is_messaging_paused(wish_id)? {
        return Err(WishError::MessagingPaused);
    }

    let subscription = db.effective_subscription(req.sender_id)?;
    let sent = db.count_messages_from_sender(wish_id, req.sender_id)?;
    if !subscription.messages_per_wish.allows(sent) {
        return Err(WishError::QuotaExceeded {
            quota: QuotaKind::MessagesPerWish,
        });
    }

    let conversation = db.get_or_create_conversation(wish_id, req.sender_id, req.recipient_id, now)?;

    let message = Message {
        id: Uuid::new_v4(),
        wish_id,
        conversation_id: conversation.id,
        sender_id: req.sender_id,
        recipient_id: req.recipient_id,
        body: body.to_string(),
        created_at: now,
    };
    db.insert_message(&message)?;
    Ok(message)
}

/// Ascending creation order within the conversation.
pub fn conversation_messages(
    db: &Database,
    conversation_id: Uuid,
    page: u32,
    limit: u32,
) -> Result<Paginated<Message>> {
    if db.get_conversation(conversation_id)?.is_none() {
        return Err(WishError::NotFound("conversation"));
    }

    let page = page.max(1);
    let limit = limit.clamp(1, 200);
    let offset = (page - 1).saturating_mul(limit);

    let (messages, total) = db.get_messages(conversation_id, limit, offset)?;
    Ok(Paginated::new(messages, total, page, limit))
}

/// The user's conversations on a wish, annotated with participant
/// snippets. A participant without a profile row annotates as None; a
/// non-public profile annotates anonymized.
pub fn user_conversations(db: &Database, wish_id: Uuid, user_id: Uuid) -> Result<Vec<ConversationView>> {
    fetch_wish(db, wish_id)?;
    let conversations = db.conversations_for_user(wish_id, user_id)?;

    let mut participant_ids: Vec<Uuid> = conversations
        .iter()
        .flat_map(|c| [c.participant1_id, c.participant2_id])
        .collect();
    participant_ids.sort_unstable();
    participant_ids.dedup();

    let snippets: HashMap<Uuid, _> = db
        .get_profiles(&participant_ids)?
        .into_iter()
        .map(|p| (p.id, p.snippet()))
        .collect();

    Ok(conversations
        .into_iter()
        .map(|conversation| ConversationView {
            participant1: snippets.get(&conversation.participant1_id).cloned(),
            participant2: snippets.get(&conversation.participant2_id).cloned(),
            conversation,
        })
        .collect())
}

pub fn toggle_pause(
    db: &Database,
    wish_id: Uuid,
    req: TogglePauseRequest,
    now: DateTime<Utc>,
) -> Result<bool> {
    let wish = fetch_wish(db, wish_id)?;
    ensure_can(req.user_id, Action::TogglePause, &wish)?;

    if req.paused {
        db.pause_messaging(wish_id, req.user_id, now)?;
    } else {
        db.resume_messaging(wish_id)?;
    }
    Ok(req.paused)
}

pub fn pause_status(db: &Database, wish_id: Uuid) -> Result<bool> {
    fetch_wish(db, wish_id)?;
    Ok(db.is_messaging_paused(wish_id)?)
}

// -- Handlers --

pub async fn send(
    State(state): State<AppState>,
    Path(wish_id): Path<Uuid>,
    Json(req): Json<SendMessageRequest>,
) -> ApiResult<impl IntoResponse> {
    let message = run_blocking(move || send_message(&state.db, wish_id, req, Utc::now())).await?;
    Ok((StatusCode::CREATED, Json(message)))
}

#[derive(Debug, Deserialize)]
pub struct MessagePageQuery {
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_limit")]
    pub limit: u32,
}

pub async fn messages(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Query(query): Query<MessagePageQuery>,
) -> ApiResult<Json<Paginated<Message>>> {
    let page = run_blocking(move || {
        conversation_messages(&state.db, conversation_id, query.page, query.limit)
    })
    .await?;
    Ok(Json(page))
}

#[derive(Debug, Deserialize)]
pub struct ConversationsQuery {
    pub user_id: Uuid,
}

pub async fn conversations(
    State(state): State<AppState>,
    Path(wish_id): Path<Uuid>,
    Query(query): Query<ConversationsQuery>,
) -> ApiResult<Json<Vec<ConversationView>>> {
    let views = run_blocking(move || user_conversations(&state.db, wish_id, query.user_id)).await?;
    Ok(Json(views))
}

pub async fn set_pause(
    State(state): State<AppState>,
    Path(wish_id): Path<Uuid>,
    Json(req): Json<TogglePauseRequest>,
) -> ApiResult<impl IntoResponse> {
    let paused = run_blocking(move || toggle_pause(&state.db, wish_id, req, Utc::now())).await?;
    Ok(Json(serde_json::json!({ "paused": paused })))
}

pub async fn get_pause(
    State(state): State<AppState>,
    Path(wish_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let paused = run_blocking(move || pause_status(&state.db, wish_id)).await?;
    Ok(Json(serde_json::json!({ "paused": paused })))
}
