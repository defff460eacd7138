//! Row types as they come out of SQLite, plus conversions into the
//! tasktalk-types records.

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use tracing::warn;
use uuid::Uuid;

use tasktalk_types::models::{ConversationId, MediaKind, Message, Priority, Task, User};

/// Fixed-width RFC 3339 so lexical order in SQL matches time order.
pub fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_ts(raw: &str) -> DateTime<Utc> {
    raw.parse::<DateTime<Utc>>().unwrap_or_else(|e| {
        warn!("Corrupt timestamp '{}': {}", raw, e);
        DateTime::<Utc>::UNIX_EPOCH
    })
}

fn parse_uuid(raw: &str, what: &str) -> Result<Uuid> {
    raw.parse().with_context(|| format!("corrupt {} '{}'", what, raw))
}

pub struct AccountRow {
    pub uid: String,
    pub email: String,
    pub password: String,
    pub created_at: String,
}

impl AccountRow {
    pub fn uid(&self) -> Result<Uuid> {
        parse_uuid(&self.uid, "account uid")
    }
}

pub struct UserRow {
    pub uid: String,
    pub email: String,
    pub display_name: String,
    pub photo_url: Option<String>,
    pub created_at: String,
    pub last_login: String,
}

impl UserRow {
    pub fn into_user(self) -> Result<User> {
        Ok(User {
            uid: parse_uuid(&self.uid, "user uid")?,
            email: self.email,
            display_name: self.display_name,
            photo_url: self.photo_url,
            created_at: parse_ts(&self.created_at),
            last_login: parse_ts(&self.last_login),
        })
    }
}

pub struct ConversationRow {
    pub id: String,
    pub last_message_text: Option<String>,
    pub last_message_sender: Option<String>,
    pub last_message_at: Option<String>,
    pub created_at: String,
}

pub struct ParticipantRow {
    pub user_id: String,
    pub member: bool,
    pub unread: u32,
}

pub struct MessageRow {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub text: String,
    pub kind: String,
    pub media_uri: Option<String>,
    pub sent_at: String,
    pub read: bool,
}

impl MessageRow {
    pub fn into_message(self) -> Result<Message> {
        Ok(Message {
            id: parse_uuid(&self.id, "message id")?,
            conversation_id: ConversationId::parse(&self.conversation_id)?,
            sender_id: parse_uuid(&self.sender_id, "sender id")?,
            text: self.text,
            kind: MediaKind::parse(&self.kind)?,
            media_uri: self.media_uri,
            sent_at: parse_ts(&self.sent_at),
            read: self.read,
        })
    }
}

pub struct TaskRow {
    pub id: String,
    pub owner_id: String,
    pub text: String,
    pub priority: String,
    pub completed: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl TaskRow {
    pub fn into_task(self) -> Result<Task> {
        Ok(Task {
            id: parse_uuid(&self.id, "task id")?,
            owner_id: parse_uuid(&self.owner_id, "task owner")?,
            text: self.text,
            priority: Priority::parse(&self.priority)?,
            completed: self.completed,
            created_at: parse_ts(&self.created_at),
            updated_at: parse_ts(&self.updated_at),
        })
    }
}
