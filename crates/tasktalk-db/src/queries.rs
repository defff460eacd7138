use std::collections::BTreeMap;

use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use uuid::Uuid;

use tasktalk_types::models::{Conversation, ConversationId, LastMessage, Message, Task, User};

use crate::Database;
use crate::models::{
    AccountRow, ConversationRow, MessageRow, ParticipantRow, TaskRow, UserRow, format_ts, parse_ts,
};

impl Database {
    // -- Accounts (identity provider) --

    /// Returns false when the email is already registered.
    pub fn create_account(&self, uid: Uuid, email: &str, password_hash: &str, at: DateTime<Utc>) -> Result<bool> {
        self.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO accounts (uid, email, password, created_at) VALUES (?1, ?2, ?3, ?4)",
                (uid.to_string(), email, password_hash, format_ts(at)),
            )?;
            Ok(inserted > 0)
        })
    }

    pub fn get_account_by_email(&self, email: &str) -> Result<Option<AccountRow>> {
        self.with_conn(|conn| query_account(conn, "email", email))
    }

    pub fn get_account(&self, uid: Uuid) -> Result<Option<AccountRow>> {
        self.with_conn(|conn| query_account(conn, "uid", &uid.to_string()))
    }

    pub fn set_password(&self, uid: Uuid, password_hash: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE accounts SET password = ?1 WHERE uid = ?2",
                (password_hash, uid.to_string()),
            )?;
            Ok(changed > 0)
        })
    }

    // -- User mirror --

    /// Whole-document write; replaces any existing mirror.
    pub fn put_user(&self, user: &User) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO users (uid, email, display_name, photo_url, created_at, last_login)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![
                    user.uid.to_string(),
                    user.email,
                    user.display_name,
                    user.photo_url,
                    format_ts(user.created_at),
                    format_ts(user.last_login),
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_user(&self, uid: Uuid) -> Result<Option<User>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT uid, email, display_name, photo_url, created_at, last_login FROM users WHERE uid = ?1",
            )?;
            let row = stmt.query_row([uid.to_string()], map_user_row).optional()?;
            row.map(UserRow::into_user).transpose()
        })
    }

    pub fn list_users(&self) -> Result<Vec<User>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT uid, email, display_name, photo_url, created_at, last_login FROM users ORDER BY email",
            )?;
            let rows = stmt
                .query_map([], map_user_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows.into_iter().map(UserRow::into_user).collect()
        })
    }

    pub fn touch_last_login(&self, uid: Uuid, at: DateTime<Utc>) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE users SET last_login = ?1 WHERE uid = ?2",
                (format_ts(at), uid.to_string()),
            )?;
            Ok(changed > 0)
        })
    }

    /// Partial update; `None` fields are left as they are.
    pub fn update_user_profile(
        &self,
        uid: Uuid,
        display_name: Option<&str>,
        photo_url: Option<&str>,
    ) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE users
                 SET display_name = COALESCE(?1, display_name),
                     photo_url = COALESCE(?2, photo_url)
                 WHERE uid = ?3",
                rusqlite::params![display_name, photo_url, uid.to_string()],
            )?;
            Ok(changed > 0)
        })
    }

    // -- Conversations --

    pub fn get_conversation(&self, id: &ConversationId) -> Result<Option<Conversation>> {
        self.with_conn(|conn| query_conversation(conn, id.as_str()))
    }

    /// Creates the record with every listed participant as a member. A record
    /// that already exists is left untouched.
    pub fn create_conversation(
        &self,
        id: &ConversationId,
        participants: &[Uuid],
        at: DateTime<Utc>,
    ) -> Result<bool> {
        self.with_conn(|conn| {
            let created = conn.execute(
                "INSERT OR IGNORE INTO conversations (id, created_at) VALUES (?1, ?2)",
                (id.as_str(), format_ts(at)),
            )?;
            for user_id in participants {
                conn.execute(
                    "INSERT OR IGNORE INTO participants (conversation_id, user_id, member) VALUES (?1, ?2, 1)",
                    (id.as_str(), user_id.to_string()),
                )?;
            }
            Ok(created > 0)
        })
    }

    pub fn add_participant(&self, id: &ConversationId, user_id: Uuid) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO participants (conversation_id, user_id, member) VALUES (?1, ?2, 1)
                 ON CONFLICT (conversation_id, user_id) DO UPDATE SET member = 1",
                (id.as_str(), user_id.to_string()),
            )?;
            Ok(())
        })
    }

    pub fn conversations_for_user(&self, user_id: Uuid) -> Result<Vec<Conversation>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT conversation_id FROM participants WHERE user_id = ?1 AND member = 1",
            )?;
            let ids = stmt
                .query_map([user_id.to_string()], |row| row.get::<_, String>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            let mut conversations = Vec::with_capacity(ids.len());
            for id in ids {
                if let Some(conversation) = query_conversation(conn, &id)? {
                    conversations.push(conversation);
                }
            }
            Ok(conversations)
        })
    }

    pub fn set_last_message(
        &self,
        id: &ConversationId,
        text: &str,
        sender_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE conversations
                 SET last_message_text = ?1, last_message_sender = ?2, last_message_at = ?3
                 WHERE id = ?4",
                (text, sender_id.to_string(), format_ts(at), id.as_str()),
            )?;
            Ok(changed > 0)
        })
    }

    pub fn increment_unread(&self, id: &ConversationId, user_id: Uuid) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE participants SET unread = unread + 1 WHERE conversation_id = ?1 AND user_id = ?2",
                (id.as_str(), user_id.to_string()),
            )?;
            Ok(changed > 0)
        })
    }

    /// Unconditional overwrite to zero; no check against concurrent increments.
    pub fn reset_unread(&self, id: &ConversationId, user_id: Uuid) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE participants SET unread = 0 WHERE conversation_id = ?1 AND user_id = ?2",
                (id.as_str(), user_id.to_string()),
            )?;
            Ok(changed > 0)
        })
    }

    // -- Messages --

    pub fn insert_message(&self, message: &Message) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (id, conversation_id, sender_id, text, kind, media_uri, sent_at, read)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                rusqlite::params![
                    message.id.to_string(),
                    message.conversation_id.as_str(),
                    message.sender_id.to_string(),
                    message.text,
                    message.kind.as_str(),
                    message.media_uri,
                    format_ts(message.sent_at),
                    message.read,
                ],
            )?;
            Ok(())
        })
    }

    /// The newest `limit` messages, returned oldest first.
    pub fn recent_messages(&self, id: &ConversationId, limit: u32) -> Result<Vec<Message>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, conversation_id, sender_id, text, kind, media_uri, sent_at, read
                 FROM messages
                 WHERE conversation_id = ?1
                 ORDER BY sent_at DESC, rowid DESC
                 LIMIT ?2",
            )?;
            let mut rows = stmt
                .query_map(rusqlite::params![id.as_str(), limit], |row| {
                    Ok(MessageRow {
                        id: row.get(0)?,
                        conversation_id: row.get(1)?,
                        sender_id: row.get(2)?,
                        text: row.get(3)?,
                        kind: row.get(4)?,
                        media_uri: row.get(5)?,
                        sent_at: row.get(6)?,
                        read: row.get(7)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows.reverse();
            rows.into_iter().map(MessageRow::into_message).collect()
        })
    }

    // -- Tasks --

    pub fn list_tasks(&self, owner_id: Uuid) -> Result<Vec<Task>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, owner_id, text, priority, completed, created_at, updated_at
                 FROM tasks WHERE owner_id = ?1
                 ORDER BY created_at, rowid",
            )?;
            let rows = stmt
                .query_map([owner_id.to_string()], |row| {
                    Ok(TaskRow {
                        id: row.get(0)?,
                        owner_id: row.get(1)?,
                        text: row.get(2)?,
                        priority: row.get(3)?,
                        completed: row.get(4)?,
                        created_at: row.get(5)?,
                        updated_at: row.get(6)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows.into_iter().map(TaskRow::into_task).collect()
        })
    }

    pub fn insert_task(&self, task: &Task) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO tasks (id, owner_id, text, priority, completed, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    task.id.to_string(),
                    task.owner_id.to_string(),
                    task.text,
                    task.priority.as_str(),
                    task.completed,
                    format_ts(task.created_at),
                    format_ts(task.updated_at),
                ],
            )?;
            Ok(())
        })
    }

    /// Rewrites text, priority and completion of a task the owner holds.
    pub fn update_task(&self, task: &Task) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE tasks SET text = ?1, priority = ?2, completed = ?3, updated_at = ?4
                 WHERE id = ?5 AND owner_id = ?6",
                rusqlite::params![
                    task.text,
                    task.priority.as_str(),
                    task.completed,
                    format_ts(task.updated_at),
                    task.id.to_string(),
                    task.owner_id.to_string(),
                ],
            )?;
            Ok(changed > 0)
        })
    }

    pub fn delete_task(&self, owner_id: Uuid, id: Uuid) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "DELETE FROM tasks WHERE id = ?1 AND owner_id = ?2",
                (id.to_string(), owner_id.to_string()),
            )?;
            Ok(changed > 0)
        })
    }

    /// Deletes every task of one owner in a single transaction.
    pub fn clear_tasks(&self, owner_id: Uuid) -> Result<usize> {
        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            let ids = {
                let mut stmt = tx.prepare("SELECT id FROM tasks WHERE owner_id = ?1")?;
                stmt.query_map([owner_id.to_string()], |row| row.get::<_, String>(0))?
                    .collect::<std::result::Result<Vec<_>, _>>()?
            };
            for id in &ids {
                tx.execute("DELETE FROM tasks WHERE id = ?1", [id])?;
            }
            tx.commit()?;
            Ok(ids.len())
        })
    }
}

fn query_account(conn: &Connection, column: &str, value: &str) -> Result<Option<AccountRow>> {
    let sql = format!(
        "SELECT uid, email, password, created_at FROM accounts WHERE {} = ?1",
        column
    );
    let mut stmt = conn.prepare(&sql)?;

    let row = stmt
        .query_row([value], |row| {
            Ok(AccountRow {
                uid: row.get(0)?,
                email: row.get(1)?,
                password: row.get(2)?,
                created_at: row.get(3)?,
            })
        })
        .optional()?;

    Ok(row)
}

fn map_user_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        uid: row.get(0)?,
        email: row.get(1)?,
        display_name: row.get(2)?,
        photo_url: row.get(3)?,
        created_at: row.get(4)?,
        last_login: row.get(5)?,
    })
}

fn query_conversation(conn: &Connection, id: &str) -> Result<Option<Conversation>> {
    let row = conn
        .query_row(
            "SELECT id, last_message_text, last_message_sender, last_message_at, created_at
             FROM conversations WHERE id = ?1",
            [id],
            |row| {
                Ok(ConversationRow {
                    id: row.get(0)?,
                    last_message_text: row.get(1)?,
                    last_message_sender: row.get(2)?,
                    last_message_at: row.get(3)?,
                    created_at: row.get(4)?,
                })
            },
        )
        .optional()?;

    let Some(row) = row else {
        return Ok(None);
    };

    let mut stmt =
        conn.prepare("SELECT user_id, member, unread FROM participants WHERE conversation_id = ?1")?;
    let participant_rows = stmt
        .query_map([id], |row| {
            Ok(ParticipantRow {
                user_id: row.get(0)?,
                member: row.get(1)?,
                unread: row.get(2)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut participants = BTreeMap::new();
    let mut unread = BTreeMap::new();
    for p in participant_rows {
        let user_id: Uuid = p.user_id.parse()?;
        participants.insert(user_id, p.member);
        unread.insert(user_id, p.unread);
    }

    let last_message = match (row.last_message_text, row.last_message_at) {
        (Some(text), Some(at)) => Some(LastMessage {
            text,
            sender_id: row.last_message_sender.and_then(|s| s.parse().ok()),
            created_at: parse_ts(&at),
        }),
        _ => None,
    };

    Ok(Some(Conversation {
        id: ConversationId::parse(&row.id)?,
        participants,
        last_message,
        unread,
        created_at: parse_ts(&row.created_at),
    }))
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
    use tasktalk_types::models::Priority;

    fn user(email: &str) -> User {
        User {
            uid: Uuid::new_v4(),
            email: email.to_string(),
            display_name: String::new(),
            photo_url: None,
            created_at: Utc::now(),
            last_login: Utc::now(),
        }
    }

    #[test]
    fn duplicate_account_email_is_ignored() {
        let db = Database::open_in_memory().unwrap();
        let first = Uuid::new_v4();
        assert!(db.create_account(first, "ada@example.com", "h1", Utc::now()).unwrap());
        assert!(!db.create_account(Uuid::new_v4(), "ada@example.com", "h2", Utc::now()).unwrap());

        let stored = db.get_account_by_email("ada@example.com").unwrap().unwrap();
        assert_eq!(stored.password, "h1");
        assert!(db.get_account(first).unwrap().is_some());
    }

    #[test]
    fn user_mirror_partial_update() {
        let db = Database::open_in_memory().unwrap();
        let ada = user("ada@example.com");
        db.put_user(&ada).unwrap();

        assert!(db.update_user_profile(ada.uid, Some("Ada"), None).unwrap());
        assert!(db.update_user_profile(ada.uid, None, Some("http://x/a.png")).unwrap());
        let stored = db.get_user(ada.uid).unwrap().unwrap();
        assert_eq!(stored.display_name, "Ada");
        assert_eq!(stored.photo_url.as_deref(), Some("http://x/a.png"));

        assert!(!db.update_user_profile(Uuid::new_v4(), Some("ghost"), None).unwrap());
    }

    #[test]
    fn conversation_create_is_idempotent_and_counters_work() {
        let db = Database::open_in_memory().unwrap();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let id = ConversationId::for_pair(a, b).unwrap();

        assert!(db.create_conversation(&id, &[a, b], Utc::now()).unwrap());
        assert!(!db.create_conversation(&id, &[a, b], Utc::now()).unwrap());

        db.increment_unread(&id, b).unwrap();
        db.increment_unread(&id, b).unwrap();
        let convo = db.get_conversation(&id).unwrap().unwrap();
        assert_eq!(convo.unread_for(b), 2);
        assert_eq!(convo.unread_for(a), 0);
        assert!(convo.last_message.is_none());

        db.reset_unread(&id, b).unwrap();
        assert_eq!(db.get_conversation(&id).unwrap().unwrap().unread_for(b), 0);

        assert_eq!(db.conversations_for_user(a).unwrap().len(), 1);
        assert!(db.conversations_for_user(Uuid::new_v4()).unwrap().is_empty());
    }

    #[test]
    fn recent_messages_window_is_oldest_first() {
        let db = Database::open_in_memory().unwrap();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let id = ConversationId::for_pair(a, b).unwrap();
        db.create_conversation(&id, &[a, b], Utc::now()).unwrap();

        let base = Utc::now();
        for i in 0..5 {
            let mut msg = Message::text(id.clone(), a, &format!("m{}", i)).unwrap();
            msg.sent_at = base + chrono::Duration::seconds(i);
            db.insert_message(&msg).unwrap();
        }

        let texts: Vec<String> = db
            .recent_messages(&id, 3)
            .unwrap()
            .into_iter()
            .map(|m| m.text)
            .collect();
        assert_eq!(texts, vec!["m2", "m3", "m4"]);
    }

    #[test]
    fn clear_tasks_only_touches_one_owner() {
        let db = Database::open_in_memory().unwrap();
        let mine = Uuid::new_v4();
        let theirs = Uuid::new_v4();
        for i in 0..5 {
            db.insert_task(&Task::new(mine, &format!("t{}", i), Priority::Low).unwrap()).unwrap();
        }
        db.insert_task(&Task::new(theirs, "keep", Priority::High).unwrap()).unwrap();

        assert_eq!(db.clear_tasks(mine).unwrap(), 5);
        assert!(db.list_tasks(mine).unwrap().is_empty());
        assert_eq!(db.list_tasks(theirs).unwrap().len(), 1);
    }

    #[test]
    fn update_task_is_owner_scoped() {
        let db = Database::open_in_memory().unwrap();
        let owner = Uuid::new_v4();
        let mut task = Task::new(owner, "write report", Priority::Medium).unwrap();
        db.insert_task(&task).unwrap();

        task.toggle();
        assert!(db.update_task(&task).unwrap());
        assert!(db.list_tasks(owner).unwrap()[0].completed);

        let mut foreign = task.clone();
        foreign.owner_id = Uuid::new_v4();
        assert!(!db.update_task(&foreign).unwrap());
        assert!(!db.delete_task(foreign.owner_id, task.id).unwrap());
        assert!(db.delete_task(owner, task.id).unwrap());
    }
}
