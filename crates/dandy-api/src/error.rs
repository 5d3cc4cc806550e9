use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracing::error;

use dandy_types::WishError;
use dandy_types::quota::QuotaKind;

/// Wraps the domain error taxonomy for axum. The JSON body always carries
/// a stable `code` so the UI can special-case quota exhaustion (upgrade
/// prompt) without string-matching the human message.
pub struct ApiError(pub WishError);

pub type ApiResult<T> = Result<T, ApiError>;

impl From<WishError> for ApiError {
    fn from(e: WishError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            WishError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            WishError::Forbidden(_) | WishError::PremiumRequired(_) => StatusCode::FORBIDDEN,
            WishError::QuotaExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            WishError::MessagingPaused => StatusCode::FORBIDDEN,
            WishError::NotFound(_) => StatusCode::NOT_FOUND,
            WishError::Conflict(_) => StatusCode::CONFLICT,
            WishError::Validation(_) => StatusCode::BAD_REQUEST,
            WishError::Upstream(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        // Upstream details go to the log, never to the client.
        if let WishError::Upstream(inner) = &self.0 {
            error!("upstream failure: {:#}", inner);
        }

        let quota: Option<QuotaKind> = match &self.0 {
            WishError::QuotaExceeded { quota } => Some(*quota),
            _ => None,
        };

        let mut body = serde_json::json!({
            "error": self.0.to_string(),
            "code": self.0.code(),
        });
        if let Some(kind) = quota {
            body["quota"] = serde_json::to_value(kind).unwrap_or(serde_json::Value::Null);
        }

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quota_error_carries_kind_in_body() {
        let err = ApiError(WishError::QuotaExceeded {
            quota: QuotaKind::MessagesPerWish,
        });
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[test]
    fn upstream_message_is_opaque() {
        let err = ApiError(WishError::Upstream(anyhow::anyhow!("connection refused to 10.0.0.1")));
        assert_eq!(err.0.to_string(), "upstream failure");
    }
}
