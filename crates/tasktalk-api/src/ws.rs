use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, Stream, StreamExt};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use tasktalk_gateway::Subscription;
use tasktalk_sync::{ChatConversationSync, ChatListSync, Session};
use tasktalk_types::events::{ChangeEvent, GatewayCommand, GatewayEvent};
use tasktalk_types::models;

use crate::state::AppState;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// Two missed Pongs in a row drop the connection.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// How long a new connection has to send Identify.
const IDENTIFY_TIMEOUT: Duration = Duration::from_secs(10);

/// The conversation a connection currently streams.
pub struct OpenChat {
    chat: ChatConversationSync,
    feed: Subscription<Vec<models::Message>>,
}

/// Upgrades unauthenticated; the socket must Identify before anything else.
pub async fn ws_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();

    let Some(session) = wait_for_identify(&state, &mut receiver, IDENTIFY_TIMEOUT).await else {
        warn!("Gateway connection closed without a valid Identify");
        let event = GatewayEvent::Error {
            message: "Invalid or expired session".into(),
        };
        let _ = send_event(&mut sender, &event).await;
        let _ = sender.send(Message::Close(None)).await;
        return;
    };

    handle_connection(sender, receiver, state, session).await;
}

/// Waits for an Identify frame and resumes its session. Other frames sent
/// before it are ignored.
async fn wait_for_identify<S>(state: &AppState, receiver: &mut S, limit: Duration) -> Option<Session>
where
    S: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    let identify = async {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Text(text) = msg {
                if let Ok(GatewayCommand::Identify { token }) = serde_json::from_str::<GatewayCommand>(&text) {
                    return match state.auth.resume(&token).await {
                        Ok(session) => Some(session),
                        Err(e) => {
                            debug!("Identify rejected: {}", e);
                            None
                        }
                    };
                }
            }
        }
        None
    };

    tokio::time::timeout(limit, identify).await.ok().flatten()
}

pub async fn handle_connection(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    state: AppState,
    session: Session,
) {
    let user_id = session.user_id();
    let dispatcher = state.backend.dispatcher.clone();

    info!("{} ({}) connected to gateway", session.user.email, user_id);

    if send_event(&mut sender, &GatewayEvent::Ready { user_id }).await.is_err() {
        return;
    }

    // Tell the client who is already here, then announce ourselves.
    for uid in dispatcher.online_users().await {
        let event = GatewayEvent::PresenceUpdate { user_id: uid, online: true };
        if send_event(&mut sender, &event).await.is_err() {
            return;
        }
    }
    let mut feed = dispatcher.subscribe();
    if dispatcher.user_online(user_id).await {
        dispatcher.publish(ChangeEvent::PresenceChanged { user_id, online: true });
    }

    let chat_list = ChatListSync::new(state.backend.clone(), &session);
    let mut list_feed = chat_list.subscribe();
    let mut open: Option<OpenChat> = None;

    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    heartbeat.tick().await;
    let mut pong_received = true;
    let mut missed_heartbeats: u8 = 0;

    loop {
        tokio::select! {
            Some(entries) = list_feed.next() => {
                if send_event(&mut sender, &GatewayEvent::ChatList { entries }).await.is_err() {
                    break;
                }
            }
            Some(messages) = next_messages(&mut open) => {
                let Some(current) = open.as_ref() else { continue };
                let event = GatewayEvent::Messages {
                    peer_id: current.chat.peer_id(),
                    conversation_id: current.chat.id().clone(),
                    messages,
                };
                if send_event(&mut sender, &event).await.is_err() {
                    break;
                }
            }
            result = feed.recv() => {
                match result {
                    Ok(ChangeEvent::PresenceChanged { user_id: uid, online }) if uid != user_id => {
                        let event = GatewayEvent::PresenceUpdate { user_id: uid, online };
                        if send_event(&mut sender, &event).await.is_err() {
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(n)) => {
                        warn!("Gateway feed lagged by {} events", n);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<GatewayCommand>(&text) {
                            Ok(cmd) => {
                                if let Err(e) = handle_command(&state, &session, &chat_list, &mut open, cmd).await {
                                    let event = GatewayEvent::Error { message: e.to_string() };
                                    if send_event(&mut sender, &event).await.is_err() {
                                        break;
                                    }
                                }
                            }
                            Err(e) => {
                                warn!(
                                    "{} bad command: {} -- raw: {}",
                                    user_id,
                                    e,
                                    text.chars().take(200).collect::<String>()
                                );
                            }
                        }
                    }
                    Some(Ok(Message::Pong(_))) => pong_received = true,
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }
            _ = heartbeat.tick() => {
                if std::mem::replace(&mut pong_received, false) {
                    missed_heartbeats = 0;
                } else {
                    missed_heartbeats += 1;
                    if missed_heartbeats >= 2 {
                        warn!("Heartbeat timeout (missed {} pongs), dropping {}", missed_heartbeats, user_id);
                        break;
                    }
                }
                if sender.send(Message::Ping(Bytes::new())).await.is_err() {
                    break;
                }
            }
        }
    }

    drop(open);
    drop(list_feed);
    if dispatcher.user_offline(user_id).await {
        dispatcher.publish(ChangeEvent::PresenceChanged { user_id, online: false });
    }
    info!("{} ({}) disconnected from gateway", session.user.email, user_id);
}

/// Next window of the open conversation; never resolves while none is open.
async fn next_messages(open: &mut Option<OpenChat>) -> Option<Vec<models::Message>> {
    match open {
        Some(current) => current.feed.next().await,
        None => std::future::pending().await,
    }
}

pub async fn handle_command(
    state: &AppState,
    session: &Session,
    chat_list: &ChatListSync,
    open: &mut Option<OpenChat>,
    cmd: GatewayCommand,
) -> tasktalk_sync::Result<()> {
    match cmd {
        // Already identified.
        GatewayCommand::Identify { .. } => {}
        GatewayCommand::OpenConversation { peer_id } => {
            let chat = ChatConversationSync::open(state.backend.clone(), session, peer_id).await?;
            chat_list.mark_read(peer_id).await?;
            debug!("{} opened conversation {}", session.user_id(), chat.id());
            // Replacing the previous one stops its feed.
            let feed = chat.subscribe();
            *open = Some(OpenChat { chat, feed });
        }
        GatewayCommand::CloseConversation => {
            *open = None;
        }
        GatewayCommand::MarkRead { peer_id } => {
            chat_list.mark_read(peer_id).await?;
        }
    }
    Ok(())
}

async fn send_event(
    sender: &mut SplitSink<WebSocket, Message>,
    event: &GatewayEvent,
) -> Result<(), axum::Error> {
    let text = match serde_json::to_string(event) {
        Ok(text) => text,
        Err(e) => {
            warn!("Failed to encode gateway event: {}", e);
            return Ok(());
        }
    };
    sender.send(Message::Text(text.into())).await
}

#[cfg(test)]
mod tests {
    use futures_util::stream;

    use super::*;
    use crate::testing::{app, signed_in};

    fn frames(commands: &[GatewayCommand]) -> impl Stream<Item = Result<Message, axum::Error>> + Unpin + use<> {
        let frames: Vec<Result<Message, axum::Error>> = commands
            .iter()
            .map(|cmd| Ok(Message::Text(serde_json::to_string(cmd).unwrap().into())))
            .collect();
        stream::iter(frames)
    }

    #[tokio::test]
    async fn identify_resumes_session_after_other_frames() {
        let state = app().await;
        let alice = signed_in(&state, "alice@example.com").await;

        let mut incoming = frames(&[
            GatewayCommand::CloseConversation,
            GatewayCommand::Identify { token: alice.token.clone() },
        ]);
        let session = wait_for_identify(&state, &mut incoming, IDENTIFY_TIMEOUT).await.unwrap();
        assert_eq!(session.user_id(), alice.user_id());
    }

    #[tokio::test]
    async fn identify_fails_on_bad_token_or_closed_stream() {
        let state = app().await;

        let mut bad = frames(&[GatewayCommand::Identify { token: "garbage".into() }]);
        assert!(wait_for_identify(&state, &mut bad, IDENTIFY_TIMEOUT).await.is_none());

        let mut silent = frames(&[GatewayCommand::CloseConversation]);
        assert!(wait_for_identify(&state, &mut silent, IDENTIFY_TIMEOUT).await.is_none());
    }

    #[tokio::test]
    async fn identify_times_out() {
        let state = app().await;
        let mut idle = stream::pending::<Result<Message, axum::Error>>();
        let limit = Duration::from_millis(50);
        assert!(wait_for_identify(&state, &mut idle, limit).await.is_none());
    }

    #[tokio::test]
    async fn open_conversation_clears_unread_and_streams() {
        let state = app().await;
        let alice = signed_in(&state, "alice@example.com").await;
        let bob = signed_in(&state, "bob@example.com").await;

        ChatConversationSync::open(state.backend.clone(), &alice, bob.user_id())
            .await
            .unwrap()
            .send_text("hi")
            .await
            .unwrap();

        let chat_list = ChatListSync::new(state.backend.clone(), &bob);
        assert_eq!(chat_list.snapshot().await.unwrap()[0].unread, 1);

        let mut open = None;
        let cmd = GatewayCommand::OpenConversation { peer_id: alice.user_id() };
        handle_command(&state, &bob, &chat_list, &mut open, cmd).await.unwrap();

        assert_eq!(chat_list.snapshot().await.unwrap()[0].unread, 0);
        let window = next_messages(&mut open).await.unwrap();
        assert_eq!(window.len(), 1);
        assert_eq!(window[0].text, "hi");

        handle_command(&state, &bob, &chat_list, &mut open, GatewayCommand::CloseConversation)
            .await
            .unwrap();
        assert!(open.is_none());
    }

    #[tokio::test]
    async fn opening_a_chat_with_yourself_is_an_error() {
        let state = app().await;
        let alice = signed_in(&state, "alice@example.com").await;
        let chat_list = ChatListSync::new(state.backend.clone(), &alice);

        let mut open = None;
        let cmd = GatewayCommand::OpenConversation { peer_id: alice.user_id() };
        assert!(handle_command(&state, &alice, &chat_list, &mut open, cmd).await.is_err());
        assert!(open.is_none());
    }
}
