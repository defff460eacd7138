use std::cmp::Ordering;
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::debug;
use uuid::Uuid;

use tasktalk_gateway::Subscription;
use tasktalk_types::events::ChangeEvent;
use tasktalk_types::models::{ChatListEntry, Conversation, ConversationId, PeerEntry};

use crate::error::Result;
use crate::session::Session;
use crate::{Backend, blocking};

/// Rows that sort like the chat list.
pub trait Ranked {
    fn unread(&self) -> u32;
    fn last_activity(&self) -> DateTime<Utc>;
    fn peer_id(&self) -> Uuid;
}

impl Ranked for ChatListEntry {
    fn unread(&self) -> u32 {
        self.unread
    }
    fn last_activity(&self) -> DateTime<Utc> {
        ChatListEntry::last_activity(self)
    }
    fn peer_id(&self) -> Uuid {
        self.peer_id
    }
}

impl Ranked for PeerEntry {
    fn unread(&self) -> u32 {
        self.unread
    }
    fn last_activity(&self) -> DateTime<Utc> {
        PeerEntry::last_activity(self)
    }
    fn peer_id(&self) -> Uuid {
        self.user.uid
    }
}

/// Unread rows first, newest activity first within each group, then peer id.
pub fn rank<T: Ranked>(rows: &mut [T]) {
    rows.sort_by(compare);
}

fn compare<T: Ranked>(a: &T, b: &T) -> Ordering {
    (b.unread() > 0)
        .cmp(&(a.unread() > 0))
        .then_with(|| b.last_activity().cmp(&a.last_activity()))
        .then_with(|| a.peer_id().cmp(&b.peer_id()))
}

/// Projects `me`'s conversation records into ranked chat-list rows, one per
/// peer. When two records name the same peer the newer last message wins.
pub fn derive_entries(me: Uuid, conversations: Vec<Conversation>) -> Vec<ChatListEntry> {
    let mut by_peer: HashMap<Uuid, ChatListEntry> = HashMap::new();

    for conversation in conversations {
        if !conversation.is_member(me) {
            continue;
        }
        let Some(peer_id) = conversation.other_participant(me) else {
            debug!("Conversation {} has no peer for {}", conversation.id, me);
            continue;
        };
        let entry = ChatListEntry {
            peer_id,
            unread: conversation.unread_for(me),
            conversation_id: conversation.id,
            last_message: conversation.last_message,
        };
        match by_peer.get(&peer_id) {
            Some(existing) if existing.last_activity() >= entry.last_activity() => {}
            _ => {
                by_peer.insert(peer_id, entry);
            }
        }
    }

    let mut entries: Vec<ChatListEntry> = by_peer.into_values().collect();
    rank(&mut entries);
    entries
}

/// The signed-in user's chat list.
#[derive(Clone)]
pub struct ChatListSync {
    backend: Backend,
    me: Uuid,
}

impl ChatListSync {
    pub fn new(backend: Backend, session: &Session) -> Self {
        Self {
            backend,
            me: session.user_id(),
        }
    }

    pub async fn snapshot(&self) -> Result<Vec<ChatListEntry>> {
        let me = self.me;
        let conversations = self
            .backend
            .store(move |db| db.conversations_for_user(me))
            .await?;
        Ok(derive_entries(me, conversations))
    }

    /// Live chat list. The first snapshot arrives immediately.
    pub fn subscribe(&self) -> Subscription<Vec<ChatListEntry>> {
        let me = self.me;
        let db = self.backend.db.clone();
        Subscription::spawn(
            &self.backend.dispatcher,
            move |event| event.touches_conversations_of(me),
            move || {
                let db = db.clone();
                async move {
                    let conversations = blocking(db, move |db| db.conversations_for_user(me)).await?;
                    Ok(derive_entries(me, conversations))
                }
            },
        )
    }

    /// Zeroes the caller's unread counter for `peer`. Missing conversations
    /// are ignored.
    pub async fn mark_read(&self, peer: Uuid) -> Result<()> {
        let me = self.me;
        let id = ConversationId::for_pair(me, peer)?;
        let key = id.clone();
        let found = self.backend.store(move |db| db.reset_unread(&key, me)).await?;
        if found {
            self.backend.dispatcher.publish(ChangeEvent::ConversationUpdated {
                conversation_id: id,
                participants: vec![me, peer],
            });
        }
        Ok(())
    }

    /// Every other user, merged with chat state and filtered on name or
    /// email (case-insensitive). Ranked like the chat list.
    pub async fn directory(&self, query: &str) -> Result<Vec<PeerEntry>> {
        let me = self.me;
        let (users, conversations) = self
            .backend
            .store(move |db| Ok((db.list_users()?, db.conversations_for_user(me)?)))
            .await?;

        let chats: HashMap<Uuid, ChatListEntry> = derive_entries(me, conversations)
            .into_iter()
            .map(|entry| (entry.peer_id, entry))
            .collect();

        let needle = query.trim().to_lowercase();
        let mut rows = Vec::new();
        for user in users {
            if user.uid == me {
                continue;
            }
            if !needle.is_empty()
                && !user.display_name.to_lowercase().contains(&needle)
                && !user.email.to_lowercase().contains(&needle)
            {
                continue;
            }
            let row = match chats.get(&user.uid) {
                Some(chat) => PeerEntry {
                    conversation_id: chat.conversation_id.clone(),
                    unread: chat.unread,
                    last_message: chat.last_message.clone(),
                    user,
                },
                None => PeerEntry {
                    conversation_id: ConversationId::for_pair(me, user.uid)?,
                    unread: 0,
                    last_message: None,
                    user,
                },
            };
            rows.push(row);
        }
        rank(&mut rows);
        Ok(rows)
    }
}
