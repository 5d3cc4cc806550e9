use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id          TEXT PRIMARY KEY,
            username    TEXT NOT NULL UNIQUE,
            bio         TEXT,
            avatar_url  TEXT,
            is_premium  INTEGER NOT NULL DEFAULT 0,
            is_public   INTEGER NOT NULL DEFAULT 1,
            created_at  TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS wishes (
            id              TEXT PRIMARY KEY,
            user_id         TEXT NOT NULL REFERENCES users(id),
            body            TEXT NOT NULL,
            category        TEXT NOT NULL,
            progress        INTEGER NOT NULL DEFAULT 0,
            is_private      INTEGER NOT NULL DEFAULT 0,
            support_count   INTEGER NOT NULL DEFAULT 0,
            created_at      TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_wishes_public
            ON wishes(is_private, created_at);

        CREATE TABLE IF NOT EXISTS milestones (
            id          TEXT PRIMARY KEY,
            wish_id     TEXT NOT NULL REFERENCES wishes(id) ON DELETE CASCADE,
            title       TEXT NOT NULL,
            completed   INTEGER NOT NULL DEFAULT 0,
            created_at  TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_milestones_wish
            ON milestones(wish_id, created_at);

        CREATE TABLE IF NOT EXISTS amplifications (
            id              TEXT PRIMARY KEY,
            wish_id         TEXT NOT NULL REFERENCES wishes(id) ON DELETE CASCADE,
            user_id         TEXT NOT NULL REFERENCES users(id),
            objective       TEXT NOT NULL,
            context         TEXT,
            amplified_at    TEXT NOT NULL,
            expires_at      TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_amplifications_user
            ON amplifications(user_id, amplified_at);
        CREATE INDEX IF NOT EXISTS idx_amplifications_active
            ON amplifications(expires_at);

        -- participant1_id is always the lexicographically smaller id; the
        -- UNIQUE constraint is what makes first-contact races safe.
        CREATE TABLE IF NOT EXISTS conversations (
            id              TEXT PRIMARY KEY,
            wish_id         TEXT NOT NULL REFERENCES wishes(id) ON DELETE CASCADE,
            participant1_id TEXT NOT NULL,
            participant2_id TEXT NOT NULL,
            created_at      TEXT NOT NULL,
            UNIQUE(wish_id, participant1_id, participant2_id)
        );

        CREATE TABLE IF NOT EXISTS messages (
            id              TEXT PRIMARY KEY,
            wish_id         TEXT NOT NULL REFERENCES wishes(id) ON DELETE CASCADE,
            conversation_id TEXT NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
            sender_id       TEXT NOT NULL,
            recipient_id    TEXT NOT NULL,
            body            TEXT NOT NULL,
            created_at      TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_messages_conversation
            ON messages(conversation_id, created_at);
        CREATE INDEX IF NOT EXISTS idx_messages_sender_wish
            ON messages(wish_id, sender_id);

        -- wish_id as primary key keeps the pause marker idempotent:
        -- re-pausing an already-paused wish can never create a duplicate.
        CREATE TABLE IF NOT EXISTS message_pauses (
            wish_id     TEXT PRIMARY KEY REFERENCES wishes(id) ON DELETE CASCADE,
            paused_by   TEXT NOT NULL,
            created_at  TEXT NOT NULL
        );

        -- Composite primary key makes a duplicate water attempt an insert
        -- no-op rather than a race on a preceding existence check.
        CREATE TABLE IF NOT EXISTS supports (
            user_id     TEXT NOT NULL,
            wish_id     TEXT NOT NULL REFERENCES wishes(id) ON DELETE CASCADE,
            created_at  TEXT NOT NULL,
            PRIMARY KEY (user_id, wish_id)
        );

        CREATE TABLE IF NOT EXISTS user_stats (
            user_id     TEXT PRIMARY KEY,
            xp          INTEGER NOT NULL DEFAULT 0,
            level       INTEGER NOT NULL DEFAULT 1
        );

        -- NULL quota columns encode 'unlimited'.
        CREATE TABLE IF NOT EXISTS subscriptions (
            user_id                 TEXT PRIMARY KEY,
            tier                    TEXT NOT NULL DEFAULT 'free',
            amplifications_per_month INTEGER,
            messages_per_wish       INTEGER,
            stripe_customer_id      TEXT,
            stripe_subscription_id  TEXT,
            status                  TEXT,
            updated_at              TEXT NOT NULL
        );
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
