//! Stripe webhook receiver. Verifies the `Stripe-Signature` header
//! against the shared endpoint secret, then upserts subscription state
//! for the three lifecycle events we care about. Everything else is
//! acknowledged and ignored.

use axum::{
    Json,
    extract::State,
    http::HeaderMap,
    response::IntoResponse,
};
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use tracing::{debug, warn};
use uuid::Uuid;

use dandy_db::Database;
use dandy_types::quota::Subscription;
use dandy_types::{Result, WishError};

use crate::error::ApiResult;
use crate::{AppState, run_blocking};

type HmacSha256 = Hmac<Sha256>;

/// Reject events whose signed timestamp drifts more than this from now.
const TOLERANCE_SECS: i64 = 5 * 60;

/// Verify a `Stripe-Signature` header (`t=<unix>,v1=<hex>,...`) over the
/// raw request body: HMAC-SHA256 of `"{t}.{body}"` with the endpoint
/// secret, constant-time compared. Any `v1` candidate may match.
pub fn verify_signature(secret: &str, header: &str, payload: &str, now_unix: i64) -> Result<()> {
    let mut timestamp: Option<i64> = None;
    let mut candidates: Vec<Vec<u8>> = Vec::new();

    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = value.parse().ok(),
            Some(("v1", value)) => {
                if let Ok(bytes) = hex::decode(value) {
                    candidates.push(bytes);
                }
            }
            _ => {}
        }
    }

    let timestamp = timestamp
        .ok_or_else(|| WishError::Unauthorized("malformed Stripe-Signature header".into()))?;
    if (now_unix - timestamp).abs() > TOLERANCE_SECS {
        return Err(WishError::Unauthorized("stale webhook timestamp".into()));
    }
    if candidates.is_empty() {
        return Err(WishError::Unauthorized("no v1 signature present".into()));
    }

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| WishError::Upstream(anyhow::anyhow!("bad webhook secret: {}", e)))?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload.as_bytes());

    for candidate in &candidates {
        if mac.clone().verify_slice(candidate).is_ok() {
            return Ok(());
        }
    }
    Err(WishError::Unauthorized("webhook signature mismatch".into()))
}

#[derive(Debug, Deserialize)]
pub struct StripeEvent {
    #[serde(rename = "type")]
    pub kind: String,
    pub data: StripeEventData,
}

#[derive(Debug, Deserialize)]
pub struct StripeEventData {
    pub object: serde_json::Value,
}

fn str_field<'a>(object: &'a serde_json::Value, key: &str) -> Option<&'a str> {
    object.get(key).and_then(|v| v.as_str())
}

/// Apply one verified event. Upserting subscription state is a single
/// storage call either way; unknown event types are acknowledged.
pub fn handle_event(db: &Database, event: StripeEvent) -> Result<()> {
    let object = &event.data.object;

    match event.kind.as_str() {
        "checkout.session.completed" => {
            let user_id: Uuid = str_field(object, "client_reference_id")
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| {
                    WishError::Validation("checkout session missing client_reference_id".into())
                })?;
            let customer = str_field(object, "customer");
            let subscription_id = str_field(object, "subscription");

            db.upsert_subscription(
                user_id,
                &Subscription::premium(),
                customer,
                subscription_id,
                Some("active"),
                Utc::now(),
            )?;
            db.set_premium_flag(user_id, true)?;
            debug!("checkout completed for user {}", user_id);
        }
        "customer.subscription.updated" => {
            let customer = str_field(object, "customer").ok_or_else(|| {
                WishError::Validation("subscription event missing customer".into())
            })?;
            let status = str_field(object, "status").unwrap_or("unknown");

            let Some(user_id) = db.user_for_stripe_customer(customer)? else {
                warn!("subscription update for unknown customer {}", customer);
                return Ok(());
            };

            let active = matches!(status, "active" | "trialing");
            let subscription = if active {
                Subscription::premium()
            } else {
                Subscription::free()
            };
            db.upsert_subscription(user_id, &subscription, Some(customer), None, Some(status), Utc::now())?;
            db.set_premium_flag(user_id, active)?;
        }
        "customer.subscription.deleted" => {
            let customer = str_field(object, "customer").ok_or_else(|| {
                WishError::Validation("subscription event missing customer".into())
            })?;

            let Some(user_id) = db.user_for_stripe_customer(customer)? else {
                warn!("subscription delete for unknown customer {}", customer);
                return Ok(());
            };

            db.upsert_subscription(
                user_id,
                &Subscription::free(),
                Some(customer),
                None,
                Some("canceled"),
                Utc::now(),
            )?;
            db.set_premium_flag(user_id, false)?;
        }
        other => {
            debug!("ignoring unhandled webhook event type '{}'", other);
        }
    }

    Ok(())
}

pub async fn webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> ApiResult<impl IntoResponse> {
    let signature = headers
        .get("Stripe-Signature")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| WishError::Unauthorized("missing Stripe-Signature header".into()))?;

    verify_signature(
        &state.stripe_webhook_secret,
        signature,
        &body,
        Utc::now().timestamp(),
    )?;

    let event: StripeEvent = serde_json::from_str(&body)
        .map_err(|e| WishError::Validation(format!("malformed webhook payload: {}", e)))?;

    run_blocking(move || handle_event(&state.db, event)).await?;
    Ok(Json(serde_json::json!({ "received": true })))
}
