use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use uuid::Uuid;

use dandy_types::api::{AmplifiedWish, SortOrder};
use dandy_types::models::{
    Amplification, Conversation, Message, Milestone, UserProfile, UserStats, Wish, level_for_xp,
};
use dandy_types::quota::Subscription;

use crate::Database;
use crate::models::{
    AmplificationRow, ConversationRow, MessageRow, MilestoneRow, StatsRow, SubscriptionRow,
    UserRow, WishRow, encode_ts,
};

/// Canonical participant ordering for a conversation: the smaller id is
/// always participant1, so (A,B) and (B,A) name the same thread.
pub fn canonical_pair(a: Uuid, b: Uuid) -> (Uuid, Uuid) {
    if a <= b { (a, b) } else { (b, a) }
}

/// Outcome of a water attempt, decided inside one transaction.
pub enum WaterOutcome {
    /// The (user, wish) support row already existed; nothing was written.
    AlreadySupported,
    NoSuchWish,
    Watered {
        supporter: UserStats,
        owner: UserStats,
        wish: Wish,
    },
}

impl Database {
    // -- Users --

    pub fn create_user(&self, profile: &UserProfile) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO users (id, username, bio, avatar_url, is_premium, is_public, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    profile.id.to_string(),
                    profile.username,
                    profile.bio,
                    profile.avatar_url,
                    profile.is_premium,
                    profile.is_public,
                    encode_ts(profile.created_at),
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_user(&self, id: Uuid) -> Result<Option<UserProfile>> {
        self.with_conn(|conn| {
            query_user(conn, "id", &id.to_string())?
                .map(UserRow::into_profile)
                .transpose()
        })
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserProfile>> {
        self.with_conn(|conn| {
            query_user(conn, "username", username)?
                .map(UserRow::into_profile)
                .transpose()
        })
    }

    /// Batch-fetch profiles for a set of user ids (conversation views).
    pub fn get_profiles(&self, ids: &[Uuid]) -> Result<Vec<UserProfile>> {
        if ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let placeholders: Vec<String> = (1..=ids.len()).map(|i| format!("?{}", i)).collect();
            let sql = format!(
                "SELECT id, username, bio, avatar_url, is_premium, is_public, created_at
                 FROM users WHERE id IN ({})",
                placeholders.join(", ")
            );

            let mut stmt = conn.prepare(&sql)?;
            let id_strings: Vec<String> = ids.iter().map(|id| id.to_string()).collect();
            let rows = stmt
                .query_map(rusqlite::params_from_iter(id_strings.iter()), map_user_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            rows.into_iter().map(UserRow::into_profile).collect()
        })
    }

    pub fn set_premium_flag(&self, user_id: Uuid, premium: bool) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "UPDATE users SET is_premium = ?1 WHERE id = ?2",
                rusqlite::params![premium, user_id.to_string()],
            )?;
            Ok(())
        })
    }

    // -- Wishes --

    pub fn insert_wish(&self, wish: &Wish) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO wishes (id, user_id, body, category, progress, is_private, support_count, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                rusqlite::params![
                    wish.id.to_string(),
                    wish.user_id.to_string(),
                    wish.body,
                    wish.category,
                    i64::from(wish.progress),
                    wish.is_private,
                    wish.support_count,
                    encode_ts(wish.created_at),
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_wish(&self, id: Uuid) -> Result<Option<Wish>> {
        self.with_conn(|conn| query_wish(conn, id))
    }

    pub fn delete_wish(&self, id: Uuid) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let changed = conn.execute(
                "DELETE FROM wishes WHERE id = ?1",
                [id.to_string()],
            )?;
            Ok(changed > 0)
        })
    }

    pub fn update_progress(&self, wish_id: Uuid, progress: u8) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let changed = conn.execute(
                "UPDATE wishes SET progress = ?1 WHERE id = ?2",
                rusqlite::params![i64::from(progress), wish_id.to_string()],
            )?;
            Ok(changed > 0)
        })
    }

    /// The full filtered, sorted public feed for one (sort, category,
    /// search) combination. The cache slices pages out of this locally.
    pub fn list_public_wishes(
        &self,
        sort: SortOrder,
        category: Option<&str>,
        search: Option<&str>,
    ) -> Result<Vec<Wish>> {
        self.with_conn(|conn| {
            let mut sql = String::from(
                "SELECT id, user_id, body, category, progress, is_private, support_count, created_at
                 FROM wishes WHERE is_private = 0",
            );
            let mut params: Vec<String> = Vec::new();

            if let Some(cat) = category {
                params.push(cat.to_string());
                sql.push_str(&format!(" AND category = ?{}", params.len()));
            }
            if let Some(term) = search {
                params.push(format!("%{}%", escape_like(term)));
                sql.push_str(&format!(" AND body LIKE ?{} ESCAPE '\\'", params.len()));
            }

            sql.push_str(match sort {
                SortOrder::Newest => " ORDER BY created_at DESC",
                SortOrder::MostSupported => " ORDER BY support_count DESC, created_at DESC",
            });

            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(rusqlite::params_from_iter(params.iter()), map_wish_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            attach_milestones(conn, rows)
        })
    }

    // -- Milestones --

    pub fn insert_milestone(&self, milestone: &Milestone) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO milestones (id, wish_id, title, completed, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![
                    milestone.id.to_string(),
                    milestone.wish_id.to_string(),
                    milestone.title,
                    milestone.completed,
                    encode_ts(milestone.created_at),
                ],
            )?;
            Ok(())
        })
    }

    pub fn update_milestone(
        &self,
        wish_id: Uuid,
        id: Uuid,
        title: Option<&str>,
        completed: Option<bool>,
    ) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let changed = conn.execute(
                "UPDATE milestones
                 SET title = COALESCE(?1, title), completed = COALESCE(?2, completed)
                 WHERE id = ?3 AND wish_id = ?4",
                rusqlite::params![title, completed, id.to_string(), wish_id.to_string()],
            )?;
            Ok(changed > 0)
        })
    }

    // -- Amplifications --

    pub fn insert_amplification(&self, amp: &Amplification) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO amplifications (id, wish_id, user_id, objective, context, amplified_at, expires_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    amp.id.to_string(),
                    amp.wish_id.to_string(),
                    amp.user_id.to_string(),
                    amp.objective.as_str(),
                    amp.context,
                    encode_ts(amp.amplified_at),
                    encode_ts(amp.expires_at),
                ],
            )?;
            Ok(())
        })
    }

    /// Amplifications a user created within the trailing window — this is
    /// what the monthly quota counts, not calendar months.
    pub fn count_amplifications_since(&self, user_id: Uuid, since: DateTime<Utc>) -> Result<u64> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM amplifications WHERE user_id = ?1 AND amplified_at > ?2",
                rusqlite::params![user_id.to_string(), encode_ts(since)],
                |row| row.get(0),
            )?;
            Ok(count as u64)
        })
    }

    pub fn get_amplification(&self, id: Uuid) -> Result<Option<Amplification>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, wish_id, user_id, objective, context, amplified_at, expires_at
                 FROM amplifications WHERE id = ?1",
            )?;
            stmt.query_row([id.to_string()], map_amplification_row)
                .optional()?
                .map(AmplificationRow::into_amplification)
                .transpose()
        })
    }

    pub fn delete_amplification(&self, id: Uuid) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let changed = conn.execute("DELETE FROM amplifications WHERE id = ?1", [id.to_string()])?;
            Ok(changed > 0)
        })
    }

    /// Non-expired amplifications (expiry is passive: a simple comparison
    /// against `now`, no sweep), newest first, joined with their wish.
    pub fn list_active_amplifications(
        &self,
        user_id: Option<Uuid>,
        now: DateTime<Utc>,
        limit: u32,
        offset: u32,
    ) -> Result<(Vec<AmplifiedWish>, u64)> {
        self.with_conn(|conn| {
            let mut filter = String::from("a.expires_at > ?1");
            let now_s = encode_ts(now);
            let mut params: Vec<String> = vec![now_s];
            if let Some(uid) = user_id {
                params.push(uid.to_string());
                filter.push_str(&format!(" AND a.user_id = ?{}", params.len()));
            }

            let total: i64 = conn.query_row(
                &format!("SELECT COUNT(*) FROM amplifications a WHERE {}", filter),
                rusqlite::params_from_iter(params.iter()),
                |row| row.get(0),
            )?;

            let sql = format!(
                "SELECT a.id, a.wish_id, a.user_id, a.objective, a.context, a.amplified_at, a.expires_at,
                        w.id, w.user_id, w.body, w.category, w.progress, w.is_private, w.support_count, w.created_at
                 FROM amplifications a
                 JOIN wishes w ON w.id = a.wish_id
                 WHERE {}
                 ORDER BY a.amplified_at DESC
                 LIMIT {} OFFSET {}",
                filter, limit, offset,
            );

            let mut stmt = conn.prepare(&sql)?;
            let pairs = stmt
                .query_map(rusqlite::params_from_iter(params.iter()), |row| {
                    Ok((
                        AmplificationRow {
                            id: row.get(0)?,
                            wish_id: row.get(1)?,
                            user_id: row.get(2)?,
                            objective: row.get(3)?,
                            context: row.get(4)?,
                            amplified_at: row.get(5)?,
                            expires_at: row.get(6)?,
                        },
                        WishRow {
                            id: row.get(7)?,
                            user_id: row.get(8)?,
                            body: row.get(9)?,
                            category: row.get(10)?,
                            progress: row.get(11)?,
                            is_private: row.get(12)?,
                            support_count: row.get(13)?,
                            created_at: row.get(14)?,
                        },
                    ))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            let mut items = Vec::with_capacity(pairs.len());
            for (amp_row, wish_row) in pairs {
                let milestones = query_milestones(conn, &[wish_row.id.clone()])?;
                items.push(AmplifiedWish {
                    amplification: amp_row.into_amplification()?,
                    wish: wish_row.into_wish(milestones)?,
                });
            }

            Ok((items, total as u64))
        })
    }

    // -- Conversations --

    /// Idempotent get-or-create keyed by the canonical pair. A lost
    /// first-contact race surfaces as a UNIQUE violation, answered by
    /// re-reading the winner's row.
    pub fn get_or_create_conversation(
        &self,
        wish_id: Uuid,
        user_a: Uuid,
        user_b: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Conversation> {
        let (p1, p2) = canonical_pair(user_a, user_b);

        self.with_conn_mut(|conn| {
            if let Some(existing) = query_conversation_by_pair(conn, wish_id, p1, p2)? {
                return existing.into_conversation();
            }

            let id = Uuid::new_v4();
            let insert = conn.execute(
                "INSERT INTO conversations (id, wish_id, participant1_id, participant2_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![
                    id.to_string(),
                    wish_id.to_string(),
                    p1.to_string(),
                    p2.to_string(),
                    encode_ts(now),
                ],
            );

            match insert {
                Ok(_) => Ok(Conversation {
                    id,
                    wish_id,
                    participant1_id: p1,
                    participant2_id: p2,
                    created_at: now,
                }),
                Err(e) if is_unique_violation(&e) => query_conversation_by_pair(conn, wish_id, p1, p2)?
                    .ok_or_else(|| anyhow!("conversation vanished after unique conflict"))?
                    .into_conversation(),
                Err(e) => Err(e.into()),
            }
        })
    }

    pub fn get_conversation(&self, id: Uuid) -> Result<Option<Conversation>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, wish_id, participant1_id, participant2_id, created_at
                 FROM conversations WHERE id = ?1",
            )?;
            stmt.query_row([id.to_string()], map_conversation_row)
                .optional()?
                .map(ConversationRow::into_conversation)
                .transpose()
        })
    }

    /// Conversations on a wish where the user is either participant.
    pub fn conversations_for_user(&self, wish_id: Uuid, user_id: Uuid) -> Result<Vec<Conversation>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, wish_id, participant1_id, participant2_id, created_at
                 FROM conversations
                 WHERE wish_id = ?1 AND (participant1_id = ?2 OR participant2_id = ?2)
                 ORDER BY created_at DESC",
            )?;
            let rows = stmt
                .query_map(
                    rusqlite::params![wish_id.to_string(), user_id.to_string()],
                    map_conversation_row,
                )?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            rows.into_iter().map(ConversationRow::into_conversation).collect()
        })
    }

    // -- Messages --

    pub fn insert_message(&self, message: &Message) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO messages (id, wish_id, conversation_id, sender_id, recipient_id, body, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    message.id.to_string(),
                    message.wish_id.to_string(),
                    message.conversation_id.to_string(),
                    message.sender_id.to_string(),
                    message.recipient_id.to_string(),
                    message.body,
                    encode_ts(message.created_at),
                ],
            )?;
            Ok(())
        })
    }

    /// How many messages a sender has put on a wish, across all of their
    /// conversations there — the per-wish quota counts this.
    pub fn count_messages_from_sender(&self, wish_id: Uuid, sender_id: Uuid) -> Result<u64> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM messages WHERE wish_id = ?1 AND sender_id = ?2",
                rusqlite::params![wish_id.to_string(), sender_id.to_string()],
                |row| row.get(0),
            )?;
            Ok(count as u64)
        })
    }

    /// Messages in ascending creation order, paginated.
    pub fn get_messages(
        &self,
        conversation_id: Uuid,
        limit: u32,
        offset: u32,
    ) -> Result<(Vec<Message>, u64)> {
        self.with_conn(|conn| {
            let total: i64 = conn.query_row(
                "SELECT COUNT(*) FROM messages WHERE conversation_id = ?1",
                [conversation_id.to_string()],
                |row| row.get(0),
            )?;

            let mut stmt = conn.prepare(
                "SELECT id, wish_id, conversation_id, sender_id, recipient_id, body, created_at
                 FROM messages
                 WHERE conversation_id = ?1
                 ORDER BY created_at ASC
                 LIMIT ?2 OFFSET ?3",
            )?;
            let rows = stmt
                .query_map(
                    rusqlite::params![conversation_id.to_string(), limit, offset],
                    |row| {
                        Ok(MessageRow {
                            id: row.get(0)?,
                            wish_id: row.get(1)?,
                            conversation_id: row.get(2)?,
                            sender_id: row.get(3)?,
                            recipient_id: row.get(4)?,
                            body: row.get(5)?,
                            created_at: row.get(6)?,
                        })
                    },
                )?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            let messages = rows
                .into_iter()
                .map(MessageRow::into_message)
                .collect::<Result<Vec<_>>>()?;
            Ok((messages, total as u64))
        })
    }

    // -- Message pauses --

    /// Idempotent: re-pausing an already-paused wish is a no-op.
    pub fn pause_messaging(&self, wish_id: Uuid, paused_by: Uuid, now: DateTime<Utc>) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO message_pauses (wish_id, paused_by, created_at)
                 VALUES (?1, ?2, ?3)",
                rusqlite::params![wish_id.to_string(), paused_by.to_string(), encode_ts(now)],
            )?;
            Ok(())
        })
    }

    pub fn resume_messaging(&self, wish_id: Uuid) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "DELETE FROM message_pauses WHERE wish_id = ?1",
                [wish_id.to_string()],
            )?;
            Ok(())
        })
    }

    pub fn is_messaging_paused(&self, wish_id: Uuid) -> Result<bool> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM message_pauses WHERE wish_id = ?1",
                [wish_id.to_string()],
                |row| row.get(0),
            )?;
            Ok(count > 0)
        })
    }

    // -- Water --

    /// The whole water flow in one transaction: record the support, bump
    /// the counter, award XP to both parties. A duplicate attempt leaves
    /// nothing written and reports `AlreadySupported`.
    pub fn water_wish(&self, user_id: Uuid, wish_id: Uuid, now: DateTime<Utc>) -> Result<WaterOutcome> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            // OR IGNORE silences the duplicate-support conflict but not a
            // foreign key violation, so the wish check comes first.
            let owner_id: Option<String> = tx
                .query_row(
                    "SELECT user_id FROM wishes WHERE id = ?1",
                    [wish_id.to_string()],
                    |row| row.get(0),
                )
                .optional()?;
            let Some(owner_id) = owner_id else {
                return Ok(WaterOutcome::NoSuchWish);
            };

            let inserted = tx.execute(
                "INSERT OR IGNORE INTO supports (user_id, wish_id, created_at) VALUES (?1, ?2, ?3)",
                rusqlite::params![user_id.to_string(), wish_id.to_string(), encode_ts(now)],
            )?;
            if inserted == 0 {
                return Ok(WaterOutcome::AlreadySupported);
            }

            tx.execute(
                "UPDATE wishes SET support_count = support_count + 1 WHERE id = ?1",
                [wish_id.to_string()],
            )?;

            let supporter_id = user_id.to_string();
            let (supporter, owner) = if supporter_id == owner_id {
                // Watering your own wish lands both awards on one row.
                let stats = bump_xp(&tx, &supporter_id, 5 + 3)?;
                (stats.clone(), stats)
            } else {
                let supporter = bump_xp(&tx, &supporter_id, 5)?;
                let owner = bump_xp(&tx, &owner_id, 3)?;
                (supporter, owner)
            };

            let wish = query_wish(&tx, wish_id)?
                .ok_or_else(|| anyhow!("wish {} disappeared mid-water", wish_id))?;

            tx.commit()?;
            Ok(WaterOutcome::Watered { supporter, owner, wish })
        })
    }

    // -- Subscriptions --

    pub fn get_subscription(&self, user_id: Uuid) -> Result<Option<Subscription>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT tier, amplifications_per_month, messages_per_wish
                 FROM subscriptions WHERE user_id = ?1",
            )?;
            let row = stmt
                .query_row([user_id.to_string()], |row| {
                    Ok(SubscriptionRow {
                        tier: row.get(0)?,
                        amplifications_per_month: row.get(1)?,
                        messages_per_wish: row.get(2)?,
                    })
                })
                .optional()?;
            Ok(row.map(SubscriptionRow::into_subscription))
        })
    }

    /// The caller's subscription, defaulting to the free tier when no row
    /// exists. The server is the authority on quotas, not the client.
    pub fn effective_subscription(&self, user_id: Uuid) -> Result<Subscription> {
        Ok(self.get_subscription(user_id)?.unwrap_or_else(Subscription::free))
    }

    pub fn upsert_subscription(
        &self,
        user_id: Uuid,
        subscription: &Subscription,
        stripe_customer_id: Option<&str>,
        stripe_subscription_id: Option<&str>,
        status: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO subscriptions
                    (user_id, tier, amplifications_per_month, messages_per_wish,
                     stripe_customer_id, stripe_subscription_id, status, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(user_id) DO UPDATE SET
                    tier = excluded.tier,
                    amplifications_per_month = excluded.amplifications_per_month,
                    messages_per_wish = excluded.messages_per_wish,
                    stripe_customer_id = COALESCE(excluded.stripe_customer_id, subscriptions.stripe_customer_id),
                    stripe_subscription_id = COALESCE(excluded.stripe_subscription_id, subscriptions.stripe_subscription_id),
                    status = COALESCE(excluded.status, subscriptions.status),
                    updated_at = excluded.updated_at",
                rusqlite::params![
                    user_id.to_string(),
                    subscription.tier.as_str(),
                    subscription.amplifications_per_month.to_column(),
                    subscription.messages_per_wish.to_column(),
                    stripe_customer_id,
                    stripe_subscription_id,
                    status,
                    encode_ts(now),
                ],
            )?;
            Ok(())
        })
    }

    /// Reverse lookup for subscription lifecycle events, which are keyed
    /// by Stripe customer id rather than our user id.
    pub fn user_for_stripe_customer(&self, customer_id: &str) -> Result<Option<Uuid>> {
        self.with_conn(|conn| {
            let id: Option<String> = conn
                .query_row(
                    "SELECT user_id FROM subscriptions WHERE stripe_customer_id = ?1",
                    [customer_id],
                    |row| row.get(0),
                )
                .optional()?;
            id.map(|s| crate::models::parse_id(&s)).transpose()
        })
    }
}

// -- Row mappers & shared helpers --

fn map_user_row(row: &rusqlite::Row) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        username: row.get(1)?,
        bio: row.get(2)?,
        avatar_url: row.get(3)?,
        is_premium: row.get(4)?,
        is_public: row.get(5)?,
        created_at: row.get(6)?,
    })
}

fn map_wish_row(row: &rusqlite::Row) -> rusqlite::Result<WishRow> {
    Ok(WishRow {
        id: row.get(0)?,
        user_id: row.get(1)?,
        body: row.get(2)?,
        category: row.get(3)?,
        progress: row.get(4)?,
        is_private: row.get(5)?,
        support_count: row.get(6)?,
        created_at: row.get(7)?,
    })
}

fn map_amplification_row(row: &rusqlite::Row) -> rusqlite::Result<AmplificationRow> {
    Ok(AmplificationRow {
        id: row.get(0)?,
        wish_id: row.get(1)?,
        user_id: row.get(2)?,
        objective: row.get(3)?,
        context: row.get(4)?,
        amplified_at: row.get(5)?,
        expires_at: row.get(6)?,
    })
}

fn map_conversation_row(row: &rusqlite::Row) -> rusqlite::Result<ConversationRow> {
    Ok(ConversationRow {
        id: row.get(0)?,
        wish_id: row.get(1)?,
        participant1_id: row.get(2)?,
        participant2_id: row.get(3)?,
        created_at: row.get(4)?,
    })
}

fn query_user(conn: &Connection, column: &str, value: &str) -> Result<Option<UserRow>> {
    let sql = format!(
        "SELECT id, username, bio, avatar_url, is_premium, is_public, created_at
         FROM users WHERE {} = ?1",
        column
    );
    let mut stmt = conn.prepare(&sql)?;
    Ok(stmt.query_row([value], map_user_row).optional()?)
}

fn query_wish(conn: &Connection, id: Uuid) -> Result<Option<Wish>> {
    let mut stmt = conn.prepare(
        "SELECT id, user_id, body, category, progress, is_private, support_count, created_at
         FROM wishes WHERE id = ?1",
    )?;
    let row = stmt.query_row([id.to_string()], map_wish_row).optional()?;

    match row {
        Some(wish_row) => {
            let milestones = query_milestones(conn, &[wish_row.id.clone()])?;
            Ok(Some(wish_row.into_wish(milestones)?))
        }
        None => Ok(None),
    }
}

fn query_conversation_by_pair(
    conn: &Connection,
    wish_id: Uuid,
    p1: Uuid,
    p2: Uuid,
) -> Result<Option<ConversationRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, wish_id, participant1_id, participant2_id, created_at
         FROM conversations
         WHERE wish_id = ?1 AND participant1_id = ?2 AND participant2_id = ?3",
    )?;
    Ok(stmt
        .query_row(
            rusqlite::params![wish_id.to_string(), p1.to_string(), p2.to_string()],
            map_conversation_row,
        )
        .optional()?)
}

/// Batch-fetch milestones for a set of wish ids, in creation order.
fn query_milestones(conn: &Connection, wish_ids: &[String]) -> Result<Vec<Milestone>> {
    if wish_ids.is_empty() {
        return Ok(vec![]);
    }

    let placeholders: Vec<String> = (1..=wish_ids.len()).map(|i| format!("?{}", i)).collect();
    let sql = format!(
        "SELECT id, wish_id, title, completed, created_at
         FROM milestones WHERE wish_id IN ({})
         ORDER BY created_at ASC",
        placeholders.join(", ")
    );

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(rusqlite::params_from_iter(wish_ids.iter()), |row| {
            Ok(MilestoneRow {
                id: row.get(0)?,
                wish_id: row.get(1)?,
                title: row.get(2)?,
                completed: row.get(3)?,
                created_at: row.get(4)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    rows.into_iter().map(MilestoneRow::into_milestone).collect()
}

/// Attach milestones to a batch of wish rows with a single IN query.
fn attach_milestones(conn: &Connection, rows: Vec<WishRow>) -> Result<Vec<Wish>> {
    let ids: Vec<String> = rows.iter().map(|r| r.id.clone()).collect();
    let mut by_wish: std::collections::HashMap<Uuid, Vec<Milestone>> = std::collections::HashMap::new();
    for milestone in query_milestones(conn, &ids)? {
        by_wish.entry(milestone.wish_id).or_default().push(milestone);
    }

    rows.into_iter()
        .map(|row| {
            let wish_id = crate::models::parse_id(&row.id)?;
            let milestones = by_wish.remove(&wish_id).unwrap_or_default();
            row.into_wish(milestones)
        })
        .collect()
}

/// Upsert a stats row and recompute the level from total XP. Absent rows
/// start at the awarded amount.
fn bump_xp(conn: &Connection, user_id: &str, amount: i64) -> Result<UserStats> {
    conn.execute(
        "INSERT INTO user_stats (user_id, xp, level) VALUES (?1, ?2, 1)
         ON CONFLICT(user_id) DO UPDATE SET xp = xp + ?2",
        rusqlite::params![user_id, amount],
    )?;

    let xp: i64 = conn.query_row(
        "SELECT xp FROM user_stats WHERE user_id = ?1",
        [user_id],
        |row| row.get(0),
    )?;
    let level = level_for_xp(xp);
    conn.execute(
        "UPDATE user_stats SET level = ?1 WHERE user_id = ?2",
        rusqlite::params![level, user_id],
    )?;

    StatsRow {
        user_id: user_id.to_string(),
        xp,
        level,
    }
    .into_stats()
}

fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

/// Escape LIKE metacharacters in user-supplied search terms.
fn escape_like(term: &str) -> String {
    term.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use dandy_types::models::AmplifyObjective;

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
        let id = Uuid::new_v4();
        db.insert_wish(&Wish {
            id,
            user_id: owner,
            body: "learn the violin".to_string(),
            category: "skills".to_string(),
            progress: 0,
            is_private: false,
            support_count: 0,
            milestones: vec![],
            created_at: Utc::now(),
        })
        .unwrap();
        id
    }

    fn amplify(db: &Database, wish_id: Uuid, user_id: Uuid, at: DateTime<Utc>) {
        db.insert_amplification(&Amplification {
            id: Uuid::new_v4(),
            wish_id,
            user_id,
            objective: AmplifyObjective::Support,
            context: None,
            amplified_at: at,
            expires_at: at + Duration::days(30),
        })
        .unwrap();
    }

    #[test]
    fn canonical_pair_is_order_independent() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        assert_eq!(canonical_pair(a, b), canonical_pair(b, a));
        let (p1, p2) = canonical_pair(a, b);
        assert!(p1 <= p2);
    }

    #[test]
    fn conversation_get_or_create_is_idempotent() {
        let db = test_db();
        let owner = seed_user(&db, "owner");
        let visitor = seed_user(&db, "visitor");
        let wish = seed_wish(&db, owner);
        let now = Utc::now();

        let first = db.get_or_create_conversation(wish, owner, visitor, now).unwrap();
        let second = db.get_or_create_conversation(wish, visitor, owner, now).unwrap();
        let third = db.get_or_create_conversation(wish, owner, visitor, now).unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(first.id, third.id);
        assert!(first.participant1_id <= first.participant2_id);
    }

    #[test]
    fn conversation_unique_conflict_returns_existing_row() {
        let db = test_db();
        let owner = seed_user(&db, "owner");
        let visitor = seed_user(&db, "visitor");
        let wish = seed_wish(&db, owner);
        let now = Utc::now();

        let existing = db.get_or_create_conversation(wish, owner, visitor, now).unwrap();

        // Force the conflict path: a direct insert that duplicates the
        // canonical pair must be rejected by the UNIQUE constraint.
        let (p1, p2) = canonical_pair(owner, visitor);
        let dup = db.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO conversations (id, wish_id, participant1_id, participant2_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![
                    Uuid::new_v4().to_string(),
                    wish.to_string(),
                    p1.to_string(),
                    p2.to_string(),
                    encode_ts(now),
                ],
            )
            .map_err(Into::into)
        });
        assert!(dup.is_err());

        // And get_or_create still resolves to the original.
        let resolved = db.get_or_create_conversation(wish, visitor, owner, now).unwrap();
        assert_eq!(resolved.id, existing.id);
    }

    #[test]
    fn amplification_count_respects_trailing_window() {
        let db = test_db();
        let owner = seed_user(&db, "owner");
        let wish = seed_wish(&db, owner);
        let now = Utc::now();

        amplify(&db, wish, owner, now - Duration::days(40)); // aged out
        amplify(&db, wish, owner, now - Duration::days(10));
        amplify(&db, wish, owner, now - Duration::days(1));

        let count = db
            .count_amplifications_since(owner, now - Duration::days(30))
            .unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn expired_amplifications_are_excluded_from_active_feed() {
        let db = test_db();
        let owner = seed_user(&db, "owner");
        let wish = seed_wish(&db, owner);
        let now = Utc::now();

        amplify(&db, wish, owner, now - Duration::days(40)); // expired
        amplify(&db, wish, owner, now - Duration::days(5));

        let (items, total) = db.list_active_amplifications(None, now, 20, 0).unwrap();
        assert_eq!(total, 1);
        assert_eq!(items.len(), 1);
        assert!(items[0].amplification.expires_at > now);
    }

    #[test]
    fn water_awards_xp_and_rejects_duplicates() {
        let db = test_db();
        let owner = seed_user(&db, "owner");
        let supporter = seed_user(&db, "supporter");
        let wish = seed_wish(&db, owner);
        let now = Utc::now();

        match db.water_wish(supporter, wish, now).unwrap() {
            WaterOutcome::Watered { supporter: s, owner: o, wish: w } => {
                assert_eq!(s.xp, 5);
                assert_eq!(s.level, 1);
                assert_eq!(o.xp, 3);
                assert_eq!(o.level, 1);
                assert_eq!(w.support_count, 1);
            }
            _ => panic!("first water should succeed"),
        }

        match db.water_wish(supporter, wish, now).unwrap() {
            WaterOutcome::AlreadySupported => {}
            _ => panic!("second water should be a no-op"),
        }

        // No double-count and no extra XP on the duplicate attempt.
        let wish_after = db.get_wish(wish).unwrap().unwrap();
        assert_eq!(wish_after.support_count, 1);
    }

    #[test]
    fn self_water_lands_both_awards_on_one_row() {
        let db = test_db();
        let owner = seed_user(&db, "owner");
        let wish = seed_wish(&db, owner);

        match db.water_wish(owner, wish, Utc::now()).unwrap() {
            WaterOutcome::Watered { supporter, owner: owner_stats, .. } => {
                assert_eq!(supporter.xp, 8);
                assert_eq!(owner_stats.xp, 8);
            }
            _ => panic!("self-water should succeed"),
        }
    }

    #[test]
    fn water_on_missing_wish_reports_no_such_wish() {
        let db = test_db();
        let supporter = seed_user(&db, "supporter");

        match db.water_wish(supporter, Uuid::new_v4(), Utc::now()).unwrap() {
            WaterOutcome::NoSuchWish => {}
            _ => panic!("missing wish should be reported"),
        }
    }

    #[test]
    fn message_pause_is_idempotent() {
        let db = test_db();
        let owner = seed_user(&db, "owner");
        let wish = seed_wish(&db, owner);
        let now = Utc::now();

        assert!(!db.is_messaging_paused(wish).unwrap());
        db.pause_messaging(wish, owner, now).unwrap();
        db.pause_messaging(wish, owner, now).unwrap();
        assert!(db.is_messaging_paused(wish).unwrap());

        db.resume_messaging(wish).unwrap();
        assert!(!db.is_messaging_paused(wish).unwrap());
    }

    #[test]
    fn public_feed_filters_and_sorts() {
        let db = test_db();
        let owner = seed_user(&db, "owner");

        let mut popular = Uuid::nil();
        for (i, body) in ["run a marathon", "bake bread", "run a bakery"].iter().enumerate() {
            let id = Uuid::new_v4();
            db.insert_wish(&Wish {
                id,
                user_id: owner,
                body: body.to_string(),
                category: if i == 1 { "food" } else { "fitness" }.to_string(),
                progress: 0,
                is_private: false,
                support_count: i as i64,
                milestones: vec![],
                created_at: Utc::now(),
            })
            .unwrap();
            if i == 2 {
                popular = id;
            }
        }

        // Private wishes never show up.
        db.insert_wish(&Wish {
            id: Uuid::new_v4(),
            user_id: owner,
            body: "secret".to_string(),
            category: "fitness".to_string(),
            progress: 0,
            is_private: true,
            support_count: 100,
            milestones: vec![],
            created_at: Utc::now(),
        })
        .unwrap();

        let all = db.list_public_wishes(SortOrder::MostSupported, None, None).unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].id, popular);

        let food = db.list_public_wishes(SortOrder::Newest, Some("food"), None).unwrap();
        assert_eq!(food.len(), 1);

        let runs = db.list_public_wishes(SortOrder::Newest, None, Some("run")).unwrap();
        assert_eq!(runs.len(), 2);
    }

    #[test]
    fn subscription_defaults_to_free_and_upserts() {
        let db = test_db();
        let user = seed_user(&db, "user");
        let now = Utc::now();

        let sub = db.effective_subscription(user).unwrap();
        assert_eq!(sub, Subscription::free());

        db.upsert_subscription(user, &Subscription::premium(), Some("cus_123"), Some("sub_456"), Some("active"), now)
            .unwrap();
        let sub = db.effective_subscription(user).unwrap();
        assert_eq!(sub, Subscription::premium());

        assert_eq!(db.user_for_stripe_customer("cus_123").unwrap(), Some(user));
        assert_eq!(db.user_for_stripe_customer("cus_999").unwrap(), None);

        // Downgrade keeps the stored Stripe ids via COALESCE.
        db.upsert_subscription(user, &Subscription::free(), None, None, Some("canceled"), now)
            .unwrap();
        assert_eq!(db.user_for_stripe_customer("cus_123").unwrap(), Some(user));
    }
}
