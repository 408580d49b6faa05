//! v001 -- Initial schema creation.
//!
//! Creates the five core tables: `users`, `chats`, `chat_participants`,
//! `messages`, `message_receipts`, plus the persistent `outbox` queue.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Users
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS users (
    uid          TEXT PRIMARY KEY NOT NULL,   -- remote-assigned document id
    email        TEXT NOT NULL,
    display_name TEXT NOT NULL,
    created_at   TEXT NOT NULL,               -- ISO-8601 / RFC-3339
    last_seen    TEXT NOT NULL,
    is_online    INTEGER NOT NULL DEFAULT 0,  -- boolean 0/1
    fcm_token    TEXT
);

-- ----------------------------------------------------------------
-- Chats
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS chats (
    id           TEXT PRIMARY KEY NOT NULL,   -- remote-assigned document id
    chat_type    TEXT NOT NULL,               -- 'direct' | 'group'
    name         TEXT,                        -- NULL: display name derived from participants
    created_at   TEXT NOT NULL,
    last_message TEXT                         -- JSON preview of the newest message
);

-- Participant rows carry the per-user unread counter and preserve the
-- remote ordering of participant ids.
CREATE TABLE IF NOT EXISTS chat_participants (
    chat_id      TEXT NOT NULL,
    user_id      TEXT NOT NULL,
    position     INTEGER NOT NULL,
    unread_count INTEGER NOT NULL DEFAULT 0,

    PRIMARY KEY (chat_id, user_id),
    FOREIGN KEY (chat_id) REFERENCES chats(id) ON DELETE CASCADE,
    FOREIGN KEY (user_id) REFERENCES users(uid)
);

CREATE INDEX IF NOT EXISTS idx_participants_user ON chat_participants(user_id);

-- ----------------------------------------------------------------
-- Messages
-- ----------------------------------------------------------------
-- `id` is NULL for optimistic rows that have not been confirmed by the
-- remote store yet; `local_id` is the client correlation key.  At least
-- one of the two is always present.
CREATE TABLE IF NOT EXISTS messages (
    id        TEXT UNIQUE,
    local_id  TEXT UNIQUE,
    chat_id   TEXT NOT NULL,
    sender_id TEXT NOT NULL,
    msg_type  TEXT NOT NULL,                  -- 'text' | 'image'
    content   TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    metadata  TEXT,                           -- JSON image metadata

    CHECK (id IS NOT NULL OR local_id IS NOT NULL),
    FOREIGN KEY (chat_id) REFERENCES chats(id) ON DELETE CASCADE,
    FOREIGN KEY (sender_id) REFERENCES users(uid)
);

CREATE INDEX IF NOT EXISTS idx_messages_chat_ts
    ON messages(chat_id, timestamp DESC);

-- ----------------------------------------------------------------
-- Delivery receipts
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS message_receipts (
    message_id TEXT NOT NULL,
    user_id    TEXT NOT NULL,
    delivered  INTEGER NOT NULL DEFAULT 0,
    read       INTEGER NOT NULL DEFAULT 0,

    PRIMARY KEY (message_id, user_id),
    FOREIGN KEY (message_id) REFERENCES messages(id) ON DELETE CASCADE
);

-- ----------------------------------------------------------------
-- Outbound queue
-- ----------------------------------------------------------------
-- Persisted so messages composed while the app was killed are not lost.
CREATE TABLE IF NOT EXISTS outbox (
    local_id    TEXT PRIMARY KEY NOT NULL,
    payload     TEXT NOT NULL,                -- JSON message
    status      TEXT NOT NULL DEFAULT 'pending',
    attempt     INTEGER NOT NULL DEFAULT 0,
    enqueued_at TEXT NOT NULL,
    last_error  TEXT
);

CREATE INDEX IF NOT EXISTS idx_outbox_enqueued ON outbox(enqueued_at);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
