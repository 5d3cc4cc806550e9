use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Amplification, AmplifyObjective, Conversation, ProfileSnippet, UserStats, Wish};

// -- Pagination --

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Paginated<T> {
    pub items: Vec<T>,
    pub total_count: u64,
    pub current_page: u32,
    pub total_pages: u32,
}

impl<T> Paginated<T> {
    pub fn new(items: Vec<T>, total_count: u64, current_page: u32, page_size: u32) -> Self {
        let total_pages = if page_size == 0 {
            0
        } else {
            total_count.div_ceil(u64::from(page_size)) as u32
        };
        Paginated {
            items,
            total_count,
            current_page,
            total_pages,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    Newest,
    MostSupported,
}

impl Default for SortOrder {
    fn default() -> Self {
        SortOrder::Newest
    }
}

// -- Users --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateUserRequest {
    pub username: String,
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default = "default_true")]
    pub is_public: bool,
}

fn default_true() -> bool {
    true
}

// -- Wishes --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateWishRequest {
    pub user_id: Uuid,
    pub body: String,
    pub category: String,
    #[serde(default)]
    pub is_private: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateProgressRequest {
    pub user_id: Uuid,
    /// Deliberately wide so out-of-range input reaches validation instead
    /// of failing opaquely at deserialization.
    pub progress: i64,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AddMilestoneRequest {
    pub user_id: Uuid,
    pub title: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateMilestoneRequest {
    pub user_id: Uuid,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub completed: Option<bool>,
}

// -- Amplifications --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AmplifyRequest {
    pub user_id: Uuid,
    pub objective: AmplifyObjective,
    #[serde(default)]
    pub context: Option<String>,
}

/// An active amplification together with the wish it boosts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AmplifiedWish {
    pub amplification: Amplification,
    pub wish: Wish,
}

// -- Messaging --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendMessageRequest {
    pub sender_id: Uuid,
    pub recipient_id: Uuid,
    pub body: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TogglePauseRequest {
    pub user_id: Uuid,
    pub paused: bool,
}

/// A conversation annotated with both participants' public snippets
/// (None when the participant has no profile row).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationView {
    #[serde(flatten)]
    pub conversation: Conversation,
    pub participant1: Option<ProfileSnippet>,
    pub participant2: Option<ProfileSnippet>,
}

// -- Water --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WaterRequest {
    pub user_id: Uuid,
}

/// Result of a water attempt. A duplicate attempt is a silent no-op:
/// `success: false` with everything else absent, never an error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaterResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub supporter: Option<UserStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<UserStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wish: Option<Wish>,
}

impl WaterResult {
    pub fn already_supported() -> Self {
        WaterResult {
            success: false,
            supporter: None,
            owner: None,
            wish: None,
        }
    }
}
