use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{ChatListEntry, ConversationId, Message};

/// Change notifications published on every store write. Subscriptions use
/// them only as a trigger to recompute their snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ChangeEvent {
    /// Conversation metadata or membership changed (created, last message,
    /// unread counters).
    ConversationUpdated {
        conversation_id: ConversationId,
        participants: Vec<Uuid>,
    },

    /// A message was appended to a conversation
    MessageCreated {
        conversation_id: ConversationId,
        message_id: Uuid,
        sender_id: Uuid,
    },

    /// A user's task set changed
    TasksChanged { owner_id: Uuid },

    /// A user mirror record was created or edited
    UserUpdated { user_id: Uuid },

    /// A session was opened or closed
    AuthStateChanged { user_id: Uuid, signed_in: bool },

    /// A user's first gateway connection opened or their last one closed
    PresenceChanged { user_id: Uuid, online: bool },
}

impl ChangeEvent {
    /// Whether the event concerns conversations `user_id` takes part in.
    pub fn touches_conversations_of(&self, user_id: Uuid) -> bool {
        match self {
            Self::ConversationUpdated { participants, .. } => participants.contains(&user_id),
            _ => false,
        }
    }

    pub fn conversation_id(&self) -> Option<&ConversationId> {
        match self {
            Self::ConversationUpdated { conversation_id, .. }
            | Self::MessageCreated { conversation_id, .. } => Some(conversation_id),
            _ => None,
        }
    }
}

/// Events pushed FROM server TO a gateway client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayEvent {
    /// Connection authenticated
    Ready { user_id: Uuid },

    /// Full chat list snapshot
    ChatList { entries: Vec<ChatListEntry> },

    /// Full message window of the open conversation
    Messages {
        peer_id: Uuid,
        conversation_id: ConversationId,
        messages: Vec<Message>,
    },

    /// A peer came online or went offline
    PresenceUpdate { user_id: Uuid, online: bool },

    /// A command could not be carried out
    Error { message: String },
}

/// Commands sent FROM client TO server over WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayCommand {
    /// First frame on a new connection: authenticate with a session token
    Identify { token: String },

    /// Start streaming a conversation's messages (replaces any open one)
    OpenConversation { peer_id: Uuid },

    /// Stop streaming the open conversation
    CloseConversation,

    /// Reset own unread counter for a peer
    MarkRead { peer_id: Uuid },
}
