//! Database row types — these map directly to SQLite rows.
//! Distinct from the dandy-types API models to keep the DB layer
//! independent; `into_*` converters parse ids and timestamps.

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use uuid::Uuid;

use dandy_types::models::{
    Amplification, AmplifyObjective, Conversation, Message, Milestone, UserProfile, UserStats, Wish,
};
use dandy_types::quota::{Quota, Subscription, Tier};

/// All timestamps are written by this crate as RFC 3339 UTC with a fixed
/// precision, so lexicographic SQL comparisons agree with time order.
pub fn encode_ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("bad timestamp '{}'", s))
}

pub fn parse_id(s: &str) -> Result<Uuid> {
    s.parse().with_context(|| format!("bad uuid '{}'", s))
}

pub struct UserRow {
    pub id: String,
    pub username: String,
    pub bio: Option<String>,
    pub avatar_url: Option<String>,
    pub is_premium: bool,
    pub is_public: bool,
    pub created_at: String,
}

impl UserRow {
    pub fn into_profile(self) -> Result<UserProfile> {
        Ok(UserProfile {
            id: parse_id(&self.id)?,
            username: self.username,
            bio: self.bio,
            avatar_url: self.avatar_url,
            is_premium: self.is_premium,
            is_public: self.is_public,
            created_at: parse_ts(&self.created_at)?,
        })
    }
}

pub struct WishRow {
    pub id: String,
    pub user_id: String,
    pub body: String,
    pub category: String,
    pub progress: i64,
    pub is_private: bool,
    pub support_count: i64,
    pub created_at: String,
}

impl WishRow {
    pub fn into_wish(self, milestones: Vec<Milestone>) -> Result<Wish> {
        Ok(Wish {
            id: parse_id(&self.id)?,
            user_id: parse_id(&self.user_id)?,
            body: self.body,
            category: self.category,
            progress: self.progress.clamp(0, 100) as u8,
            is_private: self.is_private,
            support_count: self.support_count,
            milestones,
            created_at: parse_ts(&self.created_at)?,
        })
    }
}

pub struct MilestoneRow {
    pub id: String,
    pub wish_id: String,
    pub title: String,
    pub completed: bool,
    pub created_at: String,
}

impl MilestoneRow {
    pub fn into_milestone(self) -> Result<Milestone> {
        Ok(Milestone {
            id: parse_id(&self.id)?,
            wish_id: parse_id(&self.wish_id)?,
            title: self.title,
            completed: self.completed,
            created_at: parse_ts(&self.created_at)?,
        })
    }
}

pub struct AmplificationRow {
    pub id: String,
    pub wish_id: String,
    pub user_id: String,
    pub objective: String,
    pub context: Option<String>,
    pub amplified_at: String,
    pub expires_at: String,
}

impl AmplificationRow {
    pub fn into_amplification(self) -> Result<Amplification> {
        let objective = AmplifyObjective::parse(&self.objective)
            .with_context(|| format!("bad objective '{}'", self.objective))?;
        Ok(Amplification {
            id: parse_id(&self.id)?,
            wish_id: parse_id(&self.wish_id)?,
            user_id: parse_id(&self.user_id)?,
            objective,
            context: self.context,
            amplified_at: parse_ts(&self.amplified_at)?,
            expires_at: parse_ts(&self.expires_at)?,
        })
    }
}

pub struct ConversationRow {
    pub id: String,
    pub wish_id: String,
    pub participant1_id: String,
    pub participant2_id: String,
    pub created_at: String,
}

impl ConversationRow {
    pub fn into_conversation(self) -> Result<Conversation> {
        Ok(Conversation {
            id: parse_id(&self.id)?,
            wish_id: parse_id(&self.wish_id)?,
            participant1_id: parse_id(&self.participant1_id)?,
            participant2_id: parse_id(&self.participant2_id)?,
            created_at: parse_ts(&self.created_at)?,
        })
    }
}

pub struct MessageRow {
    pub id: String,
    pub wish_id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub recipient_id: String,
    pub body: String,
    pub created_at: String,
}

impl MessageRow {
    pub fn into_message(self) -> Result<Message> {
        Ok(Message {
            id: parse_id(&self.id)?,
            wish_id: parse_id(&self.wish_id)?,
            conversation_id: parse_id(&self.conversation_id)?,
            sender_id: parse_id(&self.sender_id)?,
            recipient_id: parse_id(&self.recipient_id)?,
            body: self.body,
            created_at: parse_ts(&self.created_at)?,
        })
    }
}

pub struct StatsRow {
    pub user_id: String,
    pub xp: i64,
    pub level: i64,
}

impl StatsRow {
    pub fn into_stats(self) -> Result<UserStats> {
        Ok(UserStats {
            user_id: parse_id(&self.user_id)?,
            xp: self.xp,
            level: self.level,
        })
    }
}

pub struct SubscriptionRow {
    pub tier: String,
    pub amplifications_per_month: Option<i64>,
    pub messages_per_wish: Option<i64>,
}

impl SubscriptionRow {
    pub fn into_subscription(self) -> Subscription {
        // Unknown tier strings fall back to free rather than erroring;
        // the quota columns still apply either way.
        Subscription {
            tier: Tier::parse(&self.tier).unwrap_or(Tier::Free),
            amplifications_per_month: Quota::from_column(self.amplifications_per_month),
            messages_per_wish: Quota::from_column(self.messages_per_wish),
        }
    }
}
