use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: Uuid,
    pub username: String,
    pub bio: Option<String>,
    pub avatar_url: Option<String>,
    pub is_premium: bool,
    pub is_public: bool,
    pub created_at: DateTime<Utc>,
}

impl UserProfile {
    /// The snippet shown next to conversations and wishes. Non-public
    /// profiles render as "Anonymous" with no bio or avatar.
    pub fn snippet(&self) -> ProfileSnippet {
        if self.is_public {
            ProfileSnippet {
                id: self.id,
                username: self.username.clone(),
                avatar_url: self.avatar_url.clone(),
            }
        } else {
            ProfileSnippet {
                id: self.id,
                username: "Anonymous".to_string(),
                avatar_url: None,
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileSnippet {
    pub id: Uuid,
    pub username: String,
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Wish {
    pub id: Uuid,
    pub user_id: Uuid,
    pub body: String,
    pub category: String,
    /// Completion percentage, always within 0..=100.
    pub progress: u8,
    pub is_private: bool,
    pub support_count: i64,
    pub milestones: Vec<Milestone>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Milestone {
    pub id: Uuid,
    pub wish_id: Uuid,
    pub title: String,
    pub completed: bool,
    pub created_at: DateTime<Utc>,
}

/// A time-boxed visibility boost on a wish. A wish may be amplified
/// repeatedly over time, each row carrying its own expiry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Amplification {
    pub id: Uuid,
    pub wish_id: Uuid,
    pub user_id: Uuid,
    pub objective: AmplifyObjective,
    pub context: Option<String>,
    pub amplified_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AmplifyObjective {
    Support,
    Help,
    Mentorship,
}

impl AmplifyObjective {
    pub fn as_str(&self) -> &'static str {
        match self {
            AmplifyObjective::Support => "support",
            AmplifyObjective::Help => "help",
            AmplifyObjective::Mentorship => "mentorship",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "support" => Some(AmplifyObjective::Support),
            "help" => Some(AmplifyObjective::Help),
            "mentorship" => Some(AmplifyObjective::Mentorship),
            _ => None,
        }
    }
}

/// The message thread scoped to one wish and one unordered participant
/// pair. `participant1` is always the lexicographically smaller id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    pub wish_id: Uuid,
    pub participant1_id: Uuid,
    pub participant2_id: Uuid,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub wish_id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub recipient_id: Uuid,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserStats {
    pub user_id: Uuid,
    pub xp: i64,
    pub level: i64,
}

/// XP thresholds are flat: every 100 XP is a level.
pub fn level_for_xp(xp: i64) -> i64 {
    xp / 100 + 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn private_profile_snippet_is_anonymous() {
        let profile = UserProfile {
            id: Uuid::new_v4(),
            username: "dandelion".to_string(),
            bio: Some("hi".to_string()),
            avatar_url: Some("https://cdn/avatar.png".to_string()),
            is_premium: false,
            is_public: false,
            created_at: Utc::now(),
        };
        let snippet = profile.snippet();
        assert_eq!(snippet.username, "Anonymous");
        assert!(snippet.avatar_url.is_none());
    }

    #[test]
    fn objective_round_trips_as_lowercase() {
        let json = serde_json::to_string(&AmplifyObjective::Mentorship).unwrap();
        assert_eq!(json, "\"mentorship\"");
        assert_eq!(AmplifyObjective::parse("help"), Some(AmplifyObjective::Help));
        assert_eq!(AmplifyObjective::parse("boost"), None);
    }

    #[test]
    fn level_thresholds() {
        assert_eq!(level_for_xp(0), 1);
        assert_eq!(level_for_xp(3), 1);
        assert_eq!(level_for_xp(99), 1);
        assert_eq!(level_for_xp(100), 2);
        assert_eq!(level_for_xp(250), 3);
    }
}
