use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Rejected record construction.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ModelError {
    #[error("Text must not be empty")]
    EmptyText,
    #[error("Media messages need a media reference")]
    MissingMedia,
    #[error("A conversation needs two distinct participants")]
    SelfConversation,
    #[error("Malformed conversation id: {0}")]
    MalformedConversationId(String),
    #[error("Unknown {kind} value: {value}")]
    UnknownVariant { kind: &'static str, value: String },
}

// -- Users --

/// Mirror of an identity-provider account, kept in the `users` store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub uid: Uuid,
    pub email: String,
    pub display_name: String,
    pub photo_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_login: DateTime<Utc>,
}

impl User {
    /// Name shown in lists: the display name, or the email's local part.
    pub fn label(&self) -> &str {
        let name = self.display_name.trim();
        if !name.is_empty() {
            return name;
        }
        self.email.split('@').next().unwrap_or(&self.email)
    }
}

// -- Conversations --

/// Deterministic id of a two-party conversation: both user ids, sorted,
/// joined with `_`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(String);

impl ConversationId {
    pub fn for_pair(a: Uuid, b: Uuid) -> Result<Self, ModelError> {
        if a == b {
            return Err(ModelError::SelfConversation);
        }
        let (lo, hi) = if a < b { (a, b) } else { (b, a) };
        Ok(Self(format!("{}_{}", lo, hi)))
    }

    /// Re-validates an id read back from storage or a client.
    pub fn parse(raw: &str) -> Result<Self, ModelError> {
        let malformed = || ModelError::MalformedConversationId(raw.to_string());
        let (a, b) = raw.split_once('_').ok_or_else(malformed)?;
        let a: Uuid = a.parse().map_err(|_| malformed())?;
        let b: Uuid = b.parse().map_err(|_| malformed())?;
        let id = Self::for_pair(a, b)?;
        if id.0 != raw {
            return Err(malformed());
        }
        Ok(id)
    }

    pub fn participants(&self) -> (Uuid, Uuid) {
        // Construction guarantees two hyphenated uuids around the separator.
        let (a, b) = self.0.split_once('_').unwrap_or_default();
        (a.parse().unwrap_or_default(), b.parse().unwrap_or_default())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastMessage {
    pub text: String,
    pub sender_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl LastMessage {
    /// Short timestamp for list rows: `HH:MM` within a day, `Yesterday`
    /// within two, otherwise `Mon D`.
    pub fn relative_label(&self, now: DateTime<Utc>) -> String {
        let age = now - self.created_at;
        if age < Duration::hours(24) {
            self.created_at.format("%H:%M").to_string()
        } else if age < Duration::hours(48) {
            "Yesterday".to_string()
        } else {
            self.created_at.format("%b %-d").to_string()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    /// Membership flag per participant.
    pub participants: BTreeMap<Uuid, bool>,
    pub last_message: Option<LastMessage>,
    pub unread: BTreeMap<Uuid, u32>,
    pub created_at: DateTime<Utc>,
}

impl Conversation {
    pub fn is_member(&self, user_id: Uuid) -> bool {
        self.participants.get(&user_id).copied().unwrap_or(false)
    }

    /// The non-self member, if the record names one.
    pub fn other_participant(&self, me: Uuid) -> Option<Uuid> {
        self.participants
            .iter()
            .find(|(id, member)| **member && **id != me)
            .map(|(id, _)| *id)
    }

    pub fn unread_for(&self, user_id: Uuid) -> u32 {
        self.unread.get(&user_id).copied().unwrap_or(0)
    }
}

/// One row of the chat list: a peer and the state of the shared conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatListEntry {
    pub peer_id: Uuid,
    pub conversation_id: ConversationId,
    pub unread: u32,
    pub last_message: Option<LastMessage>,
}

impl ChatListEntry {
    pub fn last_activity(&self) -> DateTime<Utc> {
        last_activity(self.last_message.as_ref())
    }

    pub fn unread_badge(&self) -> Option<String> {
        unread_badge(self.unread)
    }
}

/// A directory row: every other user, with chat state when a conversation exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerEntry {
    pub user: User,
    pub conversation_id: ConversationId,
    pub unread: u32,
    pub last_message: Option<LastMessage>,
}

impl PeerEntry {
    pub fn last_activity(&self) -> DateTime<Utc> {
        last_activity(self.last_message.as_ref())
    }

    pub fn unread_badge(&self) -> Option<String> {
        unread_badge(self.unread)
    }
}

fn last_activity(last: Option<&LastMessage>) -> DateTime<Utc> {
    last.map(|m| m.created_at).unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

/// Badge text for an unread counter; `None` when there is nothing unread.
pub fn unread_badge(count: u32) -> Option<String> {
    match count {
        0 => None,
        1..=99 => Some(count.to_string()),
        _ => Some("99+".to_string()),
    }
}

/// Sum of unread counters across the chat list, for the list header.
pub fn total_unread(entries: &[ChatListEntry]) -> u32 {
    entries.iter().fold(0u32, |sum, e| sum.saturating_add(e.unread))
}

// -- Messages --

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    #[default]
    Text,
    Image,
    Audio,
    File,
}

impl MediaKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::Audio => "audio",
            Self::File => "file",
        }
    }

    pub fn parse(value: &str) -> Result<Self, ModelError> {
        match value {
            "text" => Ok(Self::Text),
            "image" => Ok(Self::Image),
            "audio" => Ok(Self::Audio),
            "file" => Ok(Self::File),
            other => Err(ModelError::UnknownVariant {
                kind: "media kind",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: ConversationId,
    pub sender_id: Uuid,
    pub text: String,
    pub kind: MediaKind,
    /// Device-local URI for media messages. Not uploaded anywhere.
    pub media_uri: Option<String>,
    pub sent_at: DateTime<Utc>,
    pub read: bool,
}

impl Message {
    pub fn text(
        conversation_id: ConversationId,
        sender_id: Uuid,
        text: &str,
    ) -> Result<Self, ModelError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ModelError::EmptyText);
        }
        Ok(Self::build(conversation_id, sender_id, text.to_string(), MediaKind::Text, None))
    }

    pub fn media(
        conversation_id: ConversationId,
        sender_id: Uuid,
        kind: MediaKind,
        media_uri: &str,
    ) -> Result<Self, ModelError> {
        let media_uri = media_uri.trim();
        if kind == MediaKind::Text || media_uri.is_empty() {
            return Err(ModelError::MissingMedia);
        }
        Ok(Self::build(
            conversation_id,
            sender_id,
            String::new(),
            kind,
            Some(media_uri.to_string()),
        ))
    }

    fn build(
        conversation_id: ConversationId,
        sender_id: Uuid,
        text: String,
        kind: MediaKind,
        media_uri: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            conversation_id,
            sender_id,
            text,
            kind,
            media_uri,
            sent_at: Utc::now(),
            read: false,
        }
    }

    /// Text used for the conversation's last-message preview.
    pub fn preview(&self) -> String {
        match self.kind {
            MediaKind::Text => self.text.clone(),
            kind => format!("[{}]", kind.as_str()),
        }
    }
}

// -- Tasks --

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Priority {
    #[default]
    Low,
    Medium,
    High,
}

impl Priority {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "Low",
            Self::Medium => "Medium",
            Self::High => "High",
        }
    }

    pub fn parse(value: &str) -> Result<Self, ModelError> {
        match value {
            "Low" => Ok(Self::Low),
            "Medium" => Ok(Self::Medium),
            "High" => Ok(Self::High),
            other => Err(ModelError::UnknownVariant {
                kind: "priority",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub text: String,
    pub priority: Priority,
    pub completed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn new(owner_id: Uuid, text: &str, priority: Priority) -> Result<Self, ModelError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ModelError::EmptyText);
        }
        let now = Utc::now();
        Ok(Self {
            id: Uuid::new_v4(),
            owner_id,
            text: text.to_string(),
            priority,
            completed: false,
            created_at: now,
            updated_at: now,
        })
    }

    /// Changes text and priority, leaving completion alone.
    pub fn edit(&mut self, text: &str, priority: Priority) -> Result<(), ModelError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ModelError::EmptyText);
        }
        self.text = text.to_string();
        self.priority = priority;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn toggle(&mut self) {
        self.completed = !self.completed;
        self.updated_at = Utc::now();
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskFilter {
    #[default]
    All,
    Active,
    Completed,
}

impl TaskFilter {
    pub fn matches(self, task: &Task) -> bool {
        match self {
            Self::All => true,
            Self::Active => !task.completed,
            Self::Completed => task.completed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversation_id_is_order_independent() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let ab = ConversationId::for_pair(a, b).unwrap();
        let ba = ConversationId::for_pair(b, a).unwrap();
        assert_eq!(ab, ba);

        let (lo, hi) = ab.participants();
        assert!(lo < hi);
        assert_eq!(ConversationId::parse(ab.as_str()).unwrap(), ab);
    }

    #[test]
    fn conversation_id_rejects_self_and_garbage() {
        let a = Uuid::new_v4();
        assert_eq!(ConversationId::for_pair(a, a), Err(ModelError::SelfConversation));
        assert!(ConversationId::parse("not-a-chat").is_err());

        // Unsorted pair is not a canonical id.
        let b = Uuid::new_v4();
        let (lo, hi) = if a < b { (a, b) } else { (b, a) };
        assert!(ConversationId::parse(&format!("{}_{}", hi, lo)).is_err());
    }

    #[test]
    fn other_participant_skips_self_and_non_members() {
        let me = Uuid::new_v4();
        let peer = Uuid::new_v4();
        let mut participants = BTreeMap::new();
        participants.insert(me, true);
        participants.insert(peer, false);
        let mut convo = Conversation {
            id: ConversationId::for_pair(me, peer).unwrap(),
            participants,
            last_message: None,
            unread: BTreeMap::new(),
            created_at: Utc::now(),
        };
        assert_eq!(convo.other_participant(me), None);

        convo.participants.insert(peer, true);
        assert_eq!(convo.other_participant(me), Some(peer));
        assert_eq!(convo.unread_for(me), 0);
    }

    #[test]
    fn relative_label_buckets() {
        let now = "2026-03-10T15:00:00Z".parse::<DateTime<Utc>>().unwrap();
        let at = |s: &str| LastMessage {
            text: "x".into(),
            sender_id: None,
            created_at: s.parse().unwrap(),
        };
        assert_eq!(at("2026-03-10T09:05:00Z").relative_label(now), "09:05");
        assert_eq!(at("2026-03-09T09:05:00Z").relative_label(now), "Yesterday");
        assert_eq!(at("2026-03-02T09:05:00Z").relative_label(now), "Mar 2");
    }

    #[test]
    fn badge_caps_at_99() {
        assert_eq!(unread_badge(0), None);
        assert_eq!(unread_badge(7).as_deref(), Some("7"));
        assert_eq!(unread_badge(150).as_deref(), Some("99+"));
    }

    #[test]
    fn total_unread_sums_entries() {
        let me = Uuid::new_v4();
        let entry = |unread| {
            let peer = Uuid::new_v4();
            ChatListEntry {
                peer_id: peer,
                conversation_id: ConversationId::for_pair(me, peer).unwrap(),
                unread,
                last_message: None,
            }
        };
        assert_eq!(total_unread(&[]), 0);
        assert_eq!(total_unread(&[entry(3), entry(0), entry(120)]), 123);
        assert_eq!(total_unread(&[entry(u32::MAX), entry(1)]), u32::MAX);
    }

    #[test]
    fn label_falls_back_to_email_local_part() {
        let mut user = User {
            uid: Uuid::new_v4(),
            email: "ada@example.com".into(),
            display_name: "  ".into(),
            photo_url: None,
            created_at: Utc::now(),
            last_login: Utc::now(),
        };
        assert_eq!(user.label(), "ada");
        user.display_name = "Ada L".into();
        assert_eq!(user.label(), "Ada L");
    }

    #[test]
    fn task_edit_keeps_completion() {
        let mut task = Task::new(Uuid::new_v4(), " buy milk ", Priority::Low).unwrap();
        assert_eq!(task.text, "buy milk");
        task.toggle();
        task.edit("buy oat milk", Priority::High).unwrap();
        assert!(task.completed);
        assert_eq!(task.priority, Priority::High);
        assert_eq!(task.edit("   ", Priority::Low), Err(ModelError::EmptyText));
    }

    #[test]
    fn media_messages_need_a_uri() {
        let id = ConversationId::for_pair(Uuid::new_v4(), Uuid::new_v4()).unwrap();
        let sender = Uuid::new_v4();
        assert!(Message::media(id.clone(), sender, MediaKind::Image, "").is_err());
        assert!(Message::media(id.clone(), sender, MediaKind::Text, "file:///a").is_err());

        let msg = Message::media(id.clone(), sender, MediaKind::Audio, "file:///a.m4a").unwrap();
        assert_eq!(msg.preview(), "[audio]");
        assert_eq!(Message::text(id, sender, "  hi ").unwrap().preview(), "hi");
    }

    #[test]
    fn filter_projection() {
        let owner = Uuid::new_v4();
        let open = Task::new(owner, "a", Priority::Low).unwrap();
        let mut done = Task::new(owner, "b", Priority::Medium).unwrap();
        done.toggle();
        assert!(TaskFilter::All.matches(&open) && TaskFilter::All.matches(&done));
        assert!(TaskFilter::Active.matches(&open) && !TaskFilter::Active.matches(&done));
        assert!(TaskFilter::Completed.matches(&done) && !TaskFilter::Completed.matches(&open));
    }
}
