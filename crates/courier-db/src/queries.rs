use crate::Database;
use crate::models::{ChannelRow, MessageRow, UserRow};
use anyhow::Result;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Connection;
use uuid::Uuid;

use courier_types::models::MessageDraft;

impl Database {
    // -- Users --

    /// Returns false if the email is already registered.
    pub fn create_user(&self, id: &str, email: &str, name: &str, password_hash: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT INTO users (id, email, name, password, created_at) VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(email) DO NOTHING",
                (id, email, name, password_hash, now_string()),
            )?;
            Ok(inserted > 0)
        })
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            query_user(conn, "SELECT id, email, name, password, created_at FROM users WHERE email = ?1", email)
        })
    }

    pub fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            query_user(conn, "SELECT id, email, name, password, created_at FROM users WHERE id = ?1", id)
        })
    }

    // -- Channels --

    /// Create a channel and its initial membership in one transaction.
    pub fn create_channel(
        &self,
        id: &str,
        name: &str,
        owner_id: Option<&str>,
        member_ids: &[String],
    ) -> Result<ChannelRow> {
        self.with_conn_mut(|conn| {
            let created_at = now_string();
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO channels (id, name, owner_id, created_at) VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![id, name, owner_id, created_at],
            )?;
            for user_id in member_ids {
                tx.execute(
                    "INSERT OR IGNORE INTO channel_members (channel_id, user_id, joined_at) VALUES (?1, ?2, ?3)",
                    rusqlite::params![id, user_id, created_at],
                )?;
            }
            tx.commit()?;

            Ok(ChannelRow {
                id: id.to_string(),
                name: name.to_string(),
                owner_id: owner_id.map(str::to_string),
                created_at,
            })
        })
    }

    pub fn get_channel(&self, id: &str) -> Result<Option<ChannelRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, name, owner_id, created_at FROM channels WHERE id = ?1",
                [id],
                channel_from_row,
            )
            .optional()
        })
    }

    pub fn get_channel_by_name(&self, name: &str) -> Result<Option<ChannelRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, name, owner_id, created_at FROM channels WHERE name = ?1",
                [name],
                channel_from_row,
            )
            .optional()
        })
    }

    /// Returns false if no channel has this id.
    pub fn rename_channel(&self, id: &str, name: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let updated = conn.execute("UPDATE channels SET name = ?2 WHERE id = ?1", [id, name])?;
            Ok(updated > 0)
        })
    }

    pub fn list_channels_for_user(&self, user_id: &str) -> Result<Vec<ChannelRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT c.id, c.name, c.owner_id, c.created_at
                 FROM channels c
                 JOIN channel_members m ON m.channel_id = c.id
                 WHERE m.user_id = ?1
                 ORDER BY c.name",
            )?;
            let rows = stmt
                .query_map([user_id], channel_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn member_ids(&self, channel_id: &str) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT user_id FROM channel_members WHERE channel_id = ?1 ORDER BY joined_at, user_id",
            )?;
            let rows = stmt
                .query_map([channel_id], |row| row.get(0))?
                .collect::<std::result::Result<Vec<String>, _>>()?;
            Ok(rows)
        })
    }

    pub fn is_member(&self, channel_id: &str, user_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let found: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM channel_members WHERE channel_id = ?1 AND user_id = ?2",
                    [channel_id, user_id],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(found.is_some())
        })
    }

    /// Returns true if the user was not a member before.
    pub fn add_member(&self, channel_id: &str, user_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO channel_members (channel_id, user_id, joined_at) VALUES (?1, ?2, ?3)",
                rusqlite::params![channel_id, user_id, now_string()],
            )?;
            Ok(inserted > 0)
        })
    }

    /// Returns true if a membership row was removed.
    pub fn remove_member(&self, channel_id: &str, user_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let removed = conn.execute(
                "DELETE FROM channel_members WHERE channel_id = ?1 AND user_id = ?2",
                [channel_id, user_id],
            )?;
            Ok(removed > 0)
        })
    }

    // -- Messages --

    /// Assign the next sequence number of the draft's channel and insert the
    /// message, atomically. Returns `None` if the channel does not exist.
    ///
    /// Any failure rolls the transaction back, so a failed append never
    /// consumes a sequence number.
    pub fn append_message(
        &self,
        id: Uuid,
        draft: &MessageDraft,
        created_at: DateTime<Utc>,
    ) -> Result<Option<MessageRow>> {
        let channel_id = draft.channel_id.to_string();
        let params = draft.params.as_ref().map(serde_json::to_string).transpose()?;
        let widget = draft.widget.as_ref().map(serde_json::to_string).transpose()?;

        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let exists: Option<i64> = tx
                .query_row("SELECT 1 FROM channels WHERE id = ?1", [&channel_id], |row| row.get(0))
                .optional()?;
            if exists.is_none() {
                return Ok(None);
            }

            let seq: i64 = tx.query_row(
                "SELECT COALESCE(MAX(seq), 0) + 1 FROM messages WHERE channel_id = ?1",
                [&channel_id],
                |row| row.get(0),
            )?;

            let row = MessageRow {
                id: id.to_string(),
                channel_id,
                seq,
                sender_id: draft.sender_id.to_string(),
                recipient_id: draft.recipient_id.map(|r| r.to_string()),
                text: draft.text.clone(),
                params,
                widget,
                created_at: created_at.to_rfc3339_opts(SecondsFormat::Micros, true),
            };

            tx.execute(
                "INSERT INTO messages (id, channel_id, seq, sender_id, recipient_id, text, params, widget, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                rusqlite::params![
                    row.id,
                    row.channel_id,
                    row.seq,
                    row.sender_id,
                    row.recipient_id,
                    row.text,
                    row.params,
                    row.widget,
                    row.created_at,
                ],
            )?;
            tx.commit()?;

            Ok(Some(row))
        })
    }

    /// Messages of a channel with `seq > after_seq`, ascending. `limit = None`
    /// returns everything after the cursor.
    pub fn get_messages(&self, channel_id: &str, after_seq: u64, limit: Option<u32>) -> Result<Vec<MessageRow>> {
        // SQLite treats a negative LIMIT as "no limit"
        let limit = limit.map_or(-1, i64::from);
        let after_seq = i64::try_from(after_seq).unwrap_or(i64::MAX);

        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, channel_id, seq, sender_id, recipient_id, text, params, widget, created_at
                 FROM messages
                 WHERE channel_id = ?1 AND seq > ?2
                 ORDER BY seq ASC
                 LIMIT ?3",
            )?;
            let rows = stmt
                .query_map(rusqlite::params![channel_id, after_seq, limit], message_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn get_message(&self, id: &str) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, channel_id, seq, sender_id, recipient_id, text, params, widget, created_at
                 FROM messages WHERE id = ?1",
                [id],
                message_from_row,
            )
            .optional()
        })
    }

    /// Highest assigned sequence number of a channel, 0 when empty.
    pub fn last_seq(&self, channel_id: &str) -> Result<u64> {
        self.with_conn(|conn| {
            let seq: i64 = conn.query_row(
                "SELECT COALESCE(MAX(seq), 0) FROM messages WHERE channel_id = ?1",
                [channel_id],
                |row| row.get(0),
            )?;
            Ok(u64::try_from(seq).unwrap_or(0))
        })
    }
}

fn now_string() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn query_user(conn: &Connection, sql: &str, key: &str) -> Result<Option<UserRow>> {
    let mut stmt = conn.prepare(sql)?;

    let row = stmt
        .query_row([key], |row| {
            Ok(UserRow {
                id: row.get(0)?,
                email: row.get(1)?,
                name: row.get(2)?,
                password: row.get(3)?,
                created_at: row.get(4)?,
            })
        })
        .optional()?;

    Ok(row)
}

fn channel_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChannelRow> {
    Ok(ChannelRow {
        id: row.get(0)?,
        name: row.get(1)?,
        owner_id: row.get(2)?,
        created_at: row.get(3)?,
    })
}

fn message_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        channel_id: row.get(1)?,
        seq: row.get(2)?,
        sender_id: row.get(3)?,
        recipient_id: row.get(4)?,
        text: row.get(5)?,
        params: row.get(6)?,
        widget: row.get(7)?,
        created_at: row.get(8)?,
    })
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
    use courier_types::models::GENERAL_CHANNEL_ID;

    fn db_with_user() -> (Database, String) {
        let db = Database::open_in_memory().unwrap();
        let user_id = Uuid::new_v4().to_string();
        db.create_user(&user_id, "ada@example.com", "Ada", "hash").unwrap();
        (db, user_id)
    }

    fn draft(channel_id: Uuid, sender: &str, text: &str) -> MessageDraft {
        MessageDraft::text(channel_id, sender.parse().unwrap(), text)
    }

    #[test]
    fn duplicate_email_is_not_inserted() {
        let (db, _) = db_with_user();
        let again = Uuid::new_v4().to_string();
        assert!(!db.create_user(&again, "ada@example.com", "Imposter", "hash").unwrap());
        assert!(db.get_user_by_id(&again).unwrap().is_none());
        assert_eq!(db.get_user_by_email("ada@example.com").unwrap().unwrap().name, "Ada");
    }

    #[test]
    fn rename_channel_updates_lookups() {
        let (db, user) = db_with_user();
        let id = Uuid::new_v4().to_string();
        db.create_channel(&id, "before", Some(user.as_str()), &[user.clone()]).unwrap();

        assert!(db.rename_channel(&id, "after").unwrap());
        assert!(db.get_channel_by_name("before").unwrap().is_none());
        assert_eq!(db.get_channel_by_name("after").unwrap().unwrap().id, id);
        assert!(!db.rename_channel(&Uuid::new_v4().to_string(), "ghost").unwrap());
    }

    #[test]
    fn general_channel_is_seeded() {
        let db = Database::open_in_memory().unwrap();
        let row = db.get_channel(&GENERAL_CHANNEL_ID.to_string()).unwrap().unwrap();
        assert_eq!(row.name, "general");
        assert!(row.owner_id.is_none());
        row.into_channel().unwrap();
    }

    #[test]
    fn sequence_numbers_are_gapless_per_channel() {
        let (db, user) = db_with_user();
        let other = Uuid::new_v4();
        db.create_channel(&other.to_string(), "other", Some(user.as_str()), &[user.clone()]).unwrap();

        let mut seqs = Vec::new();
        for i in 0..5 {
            let row = db
                .append_message(Uuid::new_v4(), &draft(GENERAL_CHANNEL_ID, &user, &format!("m{i}")), Utc::now())
                .unwrap()
                .unwrap();
            seqs.push(row.seq);
        }
        assert_eq!(seqs, vec![1, 2, 3, 4, 5]);

        // Independent counter for another channel
        let row = db
            .append_message(Uuid::new_v4(), &draft(other, &user, "first"), Utc::now())
            .unwrap()
            .unwrap();
        assert_eq!(row.seq, 1);
        assert_eq!(db.last_seq(&GENERAL_CHANNEL_ID.to_string()).unwrap(), 5);
    }

    #[test]
    fn append_to_unknown_channel_returns_none() {
        let (db, user) = db_with_user();
        let missing = Uuid::new_v4();
        let res = db.append_message(Uuid::new_v4(), &draft(missing, &user, "x"), Utc::now()).unwrap();
        assert!(res.is_none());
    }

    #[test]
    fn failed_insert_does_not_consume_a_sequence_number() {
        let (db, user) = db_with_user();
        // Unknown sender violates the users foreign key
        let ghost = Uuid::new_v4().to_string();
        assert!(
            db.append_message(Uuid::new_v4(), &draft(GENERAL_CHANNEL_ID, &ghost, "x"), Utc::now())
                .is_err()
        );

        let row = db
            .append_message(Uuid::new_v4(), &draft(GENERAL_CHANNEL_ID, &user, "ok"), Utc::now())
            .unwrap()
            .unwrap();
        assert_eq!(row.seq, 1);
    }

    #[test]
    fn get_messages_pages_in_ascending_order() {
        let (db, user) = db_with_user();
        for text in ["a", "b", "c", "d"] {
            db.append_message(Uuid::new_v4(), &draft(GENERAL_CHANNEL_ID, &user, text), Utc::now())
                .unwrap();
        }
        let cid = GENERAL_CHANNEL_ID.to_string();

        let all: Vec<String> = db.get_messages(&cid, 0, None).unwrap().into_iter().map(|r| r.text).collect();
        assert_eq!(all, vec!["a", "b", "c", "d"]);

        let page: Vec<i64> = db.get_messages(&cid, 1, Some(2)).unwrap().into_iter().map(|r| r.seq).collect();
        assert_eq!(page, vec![2, 3]);

        assert!(db.get_messages(&cid, 4, Some(10)).unwrap().is_empty());
    }

    #[test]
    fn message_json_fields_round_trip_through_storage() {
        let (db, user) = db_with_user();
        let mut d = draft(GENERAL_CHANNEL_ID, &user, "with widget");
        d.widget = Some(serde_json::json!({ "body": "<b>hi</b>" }));
        d.params = Some(serde_json::json!([1, 2]));

        let id = Uuid::new_v4();
        db.append_message(id, &d, Utc::now()).unwrap();

        let msg = db.get_message(&id.to_string()).unwrap().unwrap().into_message().unwrap();
        assert_eq!(msg.widget, d.widget);
        assert_eq!(msg.params, d.params);
        assert_eq!(msg.seq, 1);
    }

    #[test]
    fn membership_add_remove() {
        let (db, user) = db_with_user();
        let cid = GENERAL_CHANNEL_ID.to_string();

        assert!(!db.is_member(&cid, &user).unwrap());
        assert!(db.add_member(&cid, &user).unwrap());
        assert!(!db.add_member(&cid, &user).unwrap());
        assert!(db.is_member(&cid, &user).unwrap());
        assert_eq!(db.member_ids(&cid).unwrap(), vec![user.clone()]);
        assert_eq!(db.list_channels_for_user(&user).unwrap().len(), 1);

        assert!(db.remove_member(&cid, &user).unwrap());
        assert!(!db.is_member(&cid, &user).unwrap());
        assert!(db.list_channels_for_user(&user).unwrap().is_empty());
    }

    #[test]
    fn duplicate_channel_name_is_rejected() {
        let (db, user) = db_with_user();
        assert!(db.create_channel(&Uuid::new_v4().to_string(), "general", Some(user.as_str()), &[]).is_err());
        assert!(db.get_channel_by_name("general").unwrap().is_some());
    }
}
