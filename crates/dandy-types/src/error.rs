use thiserror::Error;

use crate::quota::QuotaKind;

/// The error taxonomy shared by every business-rule operation. Business
/// failures carry enough structure for the UI to react (notably
/// `QuotaExceeded` on messaging, which drives an upgrade prompt); storage
/// failures are wrapped opaquely as `Upstream`.
#[derive(Error, Debug)]
pub enum WishError {
    /// Missing or invalid caller identity.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Authenticated but not entitled (e.g. not the wish owner).
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Free tier hitting a premium-only feature.
    #[error("premium subscription required: {0}")]
    PremiumRequired(String),

    /// A subscription-derived usage ceiling was reached.
    #[error("{quota} quota exceeded")]
    QuotaExceeded { quota: QuotaKind },

    /// The wish owner has paused messaging.
    #[error("messaging is paused for this wish")]
    MessagingPaused,

    /// Missing wish, conversation, milestone, or user.
    #[error("{0} not found")]
    NotFound(&'static str),

    /// Duplicate resource (e.g. username already taken).
    #[error("conflict: {0}")]
    Conflict(String),

    /// Malformed or out-of-range input.
    #[error("validation error: {0}")]
    Validation(String),

    /// External store failure. The underlying message is preserved for
    /// logging but not shown to the end user.
    #[error("upstream failure")]
    Upstream(#[from] anyhow::Error),
}

impl WishError {
    /// Stable machine-readable code for API error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            WishError::Unauthorized(_) => "unauthorized",
            WishError::Forbidden(_) => "forbidden",
            WishError::PremiumRequired(_) => "premium_required",
            WishError::QuotaExceeded { .. } => "quota_exceeded",
            WishError::MessagingPaused => "messaging_paused",
            WishError::NotFound(_) => "not_found",
            WishError::Conflict(_) => "conflict",
            WishError::Validation(_) => "validation_error",
            WishError::Upstream(_) => "upstream_error",
        }
    }
}

pub type Result<T> = std::result::Result<T, WishError>;
