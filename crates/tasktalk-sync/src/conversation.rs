use chrono::Utc;
use tracing::{debug, info};
use uuid::Uuid;

use tasktalk_gateway::Subscription;
use tasktalk_types::events::ChangeEvent;
use tasktalk_types::models::{Conversation, ConversationId, MediaKind, Message};

use crate::error::{Result, SyncError};
use crate::session::Session;
use crate::{Backend, blocking};

/// Number of most recent messages a conversation feed carries.
pub const MESSAGE_WINDOW: u32 = 100;

/// One open conversation between the signed-in user and a peer.
pub struct ChatConversationSync {
    backend: Backend,
    me: Uuid,
    peer: Uuid,
    id: ConversationId,
}

impl ChatConversationSync {
    /// Opens (creating if needed) the conversation with `peer`.
    pub async fn open(backend: Backend, session: &Session, peer: Uuid) -> Result<Self> {
        let me = session.user_id();
        let id = ConversationId::for_pair(me, peer)?;
        if backend.store(move |db| db.get_user(peer)).await?.is_none() {
            return Err(SyncError::NotFound(format!("user {}", peer)));
        }

        let sync = Self { backend, me, peer, id };
        sync.ensure_conversation().await?;
        Ok(sync)
    }

    pub fn id(&self) -> &ConversationId {
        &self.id
    }

    pub fn peer_id(&self) -> Uuid {
        self.peer
    }

    /// Creates the record with both participants, or re-adds the caller if
    /// their membership was lost. Read-then-write; two concurrent openers
    /// both see "missing" and the second insert is ignored.
    pub async fn ensure_conversation(&self) -> Result<Conversation> {
        let (me, peer) = (self.me, self.peer);
        let id = self.id.clone();
        let (conversation, changed) = self
            .backend
            .store(move |db| {
                let mut changed = false;
                match db.get_conversation(&id)? {
                    None => {
                        changed = db.create_conversation(&id, &[me, peer], Utc::now())?;
                    }
                    Some(existing) if !existing.is_member(me) => {
                        db.add_participant(&id, me)?;
                        changed = true;
                    }
                    Some(_) => {}
                }
                let conversation = db
                    .get_conversation(&id)?
                    .ok_or_else(|| anyhow::anyhow!("conversation {} vanished", id))?;
                Ok((conversation, changed))
            })
            .await?;

        if changed {
            debug!("Conversation {} initialized for {}", self.id, me);
            self.publish_updated();
        }
        Ok(conversation)
    }

    /// The current message window, oldest first.
    pub async fn messages(&self) -> Result<Vec<Message>> {
        let id = self.id.clone();
        self.backend
            .store(move |db| db.recent_messages(&id, MESSAGE_WINDOW))
            .await
    }

    /// Live message window. Replays the whole window on every new message.
    pub fn subscribe(&self) -> Subscription<Vec<Message>> {
        let db = self.backend.db.clone();
        let watched = self.id.clone();
        let id = self.id.clone();
        Subscription::spawn(
            &self.backend.dispatcher,
            move |event| {
                matches!(event, ChangeEvent::MessageCreated { conversation_id, .. } if *conversation_id == watched)
            },
            move || {
                let db = db.clone();
                let id = id.clone();
                async move { blocking(db, move |db| db.recent_messages(&id, MESSAGE_WINDOW)).await }
            },
        )
    }

    pub async fn send_text(&self, text: &str) -> Result<Message> {
        let message = Message::text(self.id.clone(), self.me, text)?;
        self.deliver(message).await
    }

    /// Sends a media message. Only the device-local `uri` is recorded.
    pub async fn send_media(&self, kind: MediaKind, uri: &str) -> Result<Message> {
        let message = Message::media(self.id.clone(), self.me, kind, uri)?;
        self.deliver(message).await
    }

    /// Appends the message, then updates the preview and the peer's unread
    /// counter. The three writes are independent; a failure part way leaves
    /// the earlier ones in place.
    async fn deliver(&self, message: Message) -> Result<Message> {
        let conversation = self.ensure_conversation().await?;
        if !conversation.is_member(message.sender_id) {
            return Err(SyncError::PermissionDenied(format!(
                "{} is not a participant of {}",
                message.sender_id, self.id
            )));
        }

        let record = message.clone();
        self.backend.store(move |db| db.insert_message(&record)).await?;
        self.backend.dispatcher.publish(ChangeEvent::MessageCreated {
            conversation_id: self.id.clone(),
            message_id: message.id,
            sender_id: message.sender_id,
        });

        let (id, peer) = (self.id.clone(), self.peer);
        let (preview, sender, sent_at) = (message.preview(), message.sender_id, message.sent_at);
        self.backend
            .store(move |db| db.set_last_message(&id, &preview, sender, sent_at))
            .await?;
        let id = self.id.clone();
        self.backend
            .store(move |db| db.increment_unread(&id, peer))
            .await?;
        self.publish_updated();

        info!("{} sent {} message in {}", self.me, message.kind.as_str(), self.id);
        Ok(message)
    }

    fn publish_updated(&self) {
        self.backend.dispatcher.publish(ChangeEvent::ConversationUpdated {
            conversation_id: self.id.clone(),
            participants: vec![self.me, self.peer],
        });
    }
}
