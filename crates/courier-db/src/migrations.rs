use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id          TEXT PRIMARY KEY,
            email       TEXT NOT NULL UNIQUE,
            name        TEXT NOT NULL,
            password    TEXT NOT NULL,
            created_at  TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS channels (
            id          TEXT PRIMARY KEY,
            name        TEXT NOT NULL UNIQUE,
            owner_id    TEXT REFERENCES users(id),
            created_at  TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS channel_members (
            channel_id  TEXT NOT NULL REFERENCES channels(id),
            user_id     TEXT NOT NULL REFERENCES users(id),
            joined_at   TEXT NOT NULL,
            PRIMARY KEY (channel_id, user_id)
        );

        CREATE INDEX IF NOT EXISTS idx_channel_members_user
            ON channel_members(user_id);

        CREATE TABLE IF NOT EXISTS messages (
            id              TEXT PRIMARY KEY,
            channel_id      TEXT NOT NULL REFERENCES channels(id),
            seq             INTEGER NOT NULL,
            sender_id       TEXT NOT NULL REFERENCES users(id),
            recipient_id    TEXT REFERENCES users(id),
            text            TEXT NOT NULL,
            params          TEXT,
            widget          TEXT,
            created_at      TEXT NOT NULL,
            UNIQUE(channel_id, seq)
        );

        -- Seed the default general channel
        INSERT OR IGNORE INTO channels (id, name, owner_id, created_at)
            VALUES ('00000000-0000-0000-0000-000000000001', 'general', NULL,
                    strftime('%Y-%m-%dT%H:%M:%SZ', 'now'));
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
