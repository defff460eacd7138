use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 =
        conn.query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |r| r.get(0))?;

    if version < 1 {
        info!("Running migration v1 (accounts, users, conversations, messages, tasks)");
        conn.execute_batch(
            "
            CREATE TABLE accounts (
                uid         TEXT PRIMARY KEY,
                email       TEXT NOT NULL UNIQUE,
                password    TEXT NOT NULL,
                created_at  TEXT NOT NULL
            );

            CREATE TABLE users (
                uid           TEXT PRIMARY KEY,
                email         TEXT NOT NULL,
                display_name  TEXT NOT NULL DEFAULT '',
                photo_url     TEXT,
                created_at    TEXT NOT NULL,
                last_login    TEXT NOT NULL
            );

            CREATE TABLE conversations (
                id                   TEXT PRIMARY KEY,
                last_message_text    TEXT,
                last_message_sender  TEXT,
                last_message_at      TEXT,
                created_at           TEXT NOT NULL
            );

            CREATE TABLE participants (
                conversation_id  TEXT NOT NULL REFERENCES conversations(id),
                user_id          TEXT NOT NULL,
                member           INTEGER NOT NULL DEFAULT 1,
                unread           INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (conversation_id, user_id)
            );

            CREATE INDEX idx_participants_user
                ON participants(user_id, member);

            CREATE TABLE messages (
                id               TEXT PRIMARY KEY,
                conversation_id  TEXT NOT NULL REFERENCES conversations(id),
                sender_id        TEXT NOT NULL,
                text             TEXT NOT NULL,
                kind             TEXT NOT NULL DEFAULT 'text',
                media_uri        TEXT,
                sent_at          TEXT NOT NULL,
                read             INTEGER NOT NULL DEFAULT 0
            );

            CREATE INDEX idx_messages_conversation
                ON messages(conversation_id, sent_at);

            CREATE TABLE tasks (
                id          TEXT PRIMARY KEY,
                owner_id    TEXT NOT NULL,
                text        TEXT NOT NULL,
                priority    TEXT NOT NULL DEFAULT 'Low',
                completed   INTEGER NOT NULL DEFAULT 0,
                created_at  TEXT NOT NULL,
                updated_at  TEXT NOT NULL
            );

            CREATE INDEX idx_tasks_owner
                ON tasks(owner_id, created_at);

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}
