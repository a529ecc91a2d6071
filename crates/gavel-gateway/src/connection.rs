use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use tracing::{info, warn};
use uuid::Uuid;

use gavel_db::Database;
use gavel_db::chats::ChatWriteError;
use gavel_types::events::{GatewayCommand, GatewayEvent, RoomKey};
use gavel_types::models::{AuctionStatus, UserPublic};

use crate::dispatcher::{Dispatcher, Member};

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// How long a client has to send Identify before the socket is closed.
const IDENTIFY_TIMEOUT: Duration = Duration::from_secs(10);

const MAX_CHAT_MESSAGE_CHARS: usize = 500;
const MAX_SALE_MESSAGE_CHARS: usize = 1000;

/// Handle a single WebSocket connection. The first frame must be an
/// Identify command carrying a valid JWT for a known user; anything else
/// closes the socket before any event handling.
pub async fn handle_connection(
    socket: WebSocket,
    dispatcher: Dispatcher,
    db: Arc<Database>,
    jwt_secret: String,
) {
    let (mut sender, mut receiver) = socket.split();

    let user = match wait_for_identify(&mut receiver, &db, &jwt_secret).await {
        Some(user) => user,
        None => {
            warn!("WebSocket client failed to identify, closing");
            return;
        }
    };

    info!("{} ({}) connected to gateway", user.username, user.id);

    let ready = GatewayEvent::Ready {
        user_id: user.id,
        username: user.username.clone(),
    };
    if sender
        .send(Message::Text(serde_json::to_string(&ready).unwrap().into()))
        .await
        .is_err()
    {
        return;
    }

    let (conn_id, mut user_rx) = dispatcher.register_user_channel(user.id).await;
    let mut broadcast_rx = dispatcher.subscribe();
    let dispatcher_recv = dispatcher.clone();

    // Per-connection room subscriptions, shared between send and recv tasks.
    let rooms: Arc<std::sync::RwLock<HashSet<RoomKey>>> =
        Arc::new(std::sync::RwLock::new(HashSet::new()));
    let send_rooms = rooms.clone();

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    let viewer = user.id;
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                result = broadcast_rx.recv() => {
                    let event = match result {
                        Ok(event) => event,
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            warn!("Broadcast receiver lagged by {} messages", n);
                            continue;
                        }
                        Err(_) => break,
                    };

                    if let Some(room) = event.room() {
                        let subscribed = send_rooms
                            .read()
                            .expect("room set lock poisoned")
                            .contains(&room);
                        if !subscribed {
                            continue;
                        }
                    }
                    if event.suppressed_for(viewer) {
                        continue;
                    }

                    let text = serde_json::to_string(&event).unwrap();
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                result = user_rx.recv() => {
                    let event = match result {
                        Some(event) => event,
                        None => break,
                    };
                    let text = serde_json::to_string(&event).unwrap();
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    let recv_user = user.clone();
    let recv_rooms = rooms.clone();
    let recv_db = db.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<GatewayCommand>(&text) {
                    Ok(cmd) => {
                        handle_command(&dispatcher_recv, &recv_db, &recv_user, cmd, &recv_rooms)
                            .await;
                    }
                    Err(e) => {
                        warn!(
                            "{} ({}) bad command: {} -- raw: {}",
                            recv_user.username,
                            recv_user.id,
                            e,
                            &text[..text.len().min(200)]
                        );
                    }
                },
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    dispatcher.disconnect(user.id, conn_id).await;
    info!("{} ({}) disconnected from gateway", user.username, user.id);
}

/// First-frame handshake: Identify with a JWT that decodes and names a user
/// that actually exists.
async fn wait_for_identify(
    receiver: &mut futures_util::stream::SplitStream<WebSocket>,
    db: &Arc<Database>,
    jwt_secret: &str,
) -> Option<UserPublic> {
    use gavel_types::api::Claims;
    use jsonwebtoken::{DecodingKey, Validation, decode};

    let identified = tokio::time::timeout(IDENTIFY_TIMEOUT, async {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Text(text) = msg {
                if let Ok(GatewayCommand::Identify { token }) =
                    serde_json::from_str::<GatewayCommand>(&text)
                {
                    let token_data = decode::<Claims>(
                        &token,
                        &DecodingKey::from_secret(jwt_secret.as_bytes()),
                        &Validation::default(),
                    )
                    .ok()?;
                    return Some(token_data.claims.sub);
                }
            }
        }
        None
    });
    let user_id = identified.await.ok().flatten()?;

    let db = Arc::clone(db);
    tokio::task::spawn_blocking(move || db.get_user_public(user_id))
        .await
        .ok()?
        .ok()
        .flatten()
}

async fn handle_command(
    dispatcher: &Dispatcher,
    db: &Arc<Database>,
    user: &UserPublic,
    cmd: GatewayCommand,
    rooms: &Arc<std::sync::RwLock<HashSet<RoomKey>>>,
) {
    match cmd {
        GatewayCommand::Identify { .. } => {} // Already handled

        GatewayCommand::JoinAuction { post_id } => {
            let check_db = Arc::clone(db);
            let check = tokio::task::spawn_blocking(move || -> anyhow::Result<Option<String>> {
                let post = match check_db.get_post(post_id)? {
                    None => return Ok(Some("Auction not found".into())),
                    Some(p) => p,
                };
                if post.status != AuctionStatus::Live {
                    return Ok(Some(format!(
                        "Auction is not live (status: {})",
                        post.status
                    )));
                }
                if !check_db.chat_is_active(post_id)? {
                    return Ok(Some("Chat has been disabled for this auction".into()));
                }
                Ok(None)
            })
            .await;

            match check {
                Ok(Ok(None)) => {}
                Ok(Ok(Some(reason))) => {
                    dispatcher
                        .send_to_user(user.id, GatewayEvent::Error { message: reason })
                        .await;
                    return;
                }
                Ok(Err(e)) => {
                    warn!("join-auction check failed: {e:#}");
                    send_internal_error(dispatcher, user.id).await;
                    return;
                }
                Err(e) => {
                    warn!("join-auction task panicked: {e}");
                    send_internal_error(dispatcher, user.id).await;
                    return;
                }
            }

            let room = RoomKey::Auction(post_id);
            rooms.write().expect("room set lock poisoned").insert(room);
            dispatcher
                .join_room(
                    room,
                    user.id,
                    Member {
                        username: user.username.clone(),
                        avatar_url: user.avatar_url.clone(),
                    },
                )
                .await;

            let participants = dispatcher.room_participants(room).await;
            let typing_users = dispatcher.typing_users(post_id).await;
            dispatcher
                .send_to_user(
                    user.id,
                    GatewayEvent::RoomParticipants {
                        post_id,
                        participants,
                        typing_users,
                    },
                )
                .await;
        }

        GatewayCommand::LeaveAuction { post_id } => {
            let room = RoomKey::Auction(post_id);
            rooms.write().expect("room set lock poisoned").remove(&room);
            dispatcher.leave_room(room, user.id).await;
        }

        GatewayCommand::SendMessage { post_id, message } => {
            if message.chars().count() > MAX_CHAT_MESSAGE_CHARS {
                let message = format!(
                    "Message too long (max {MAX_CHAT_MESSAGE_CHARS} characters)"
                );
                dispatcher
                    .send_to_user(user.id, GatewayEvent::Error { message })
                    .await;
                return;
            }
            if !in_room(rooms, RoomKey::Auction(post_id)) {
                dispatcher
                    .send_to_user(
                        user.id,
                        GatewayEvent::Error {
                            message: "Join the auction chat first".into(),
                        },
                    )
                    .await;
                return;
            }

            let write_db = Arc::clone(db);
            let sender = user.clone();
            let stored = tokio::task::spawn_blocking(move || {
                write_db.append_auction_message(post_id, &sender, &message, Utc::now())
            })
            .await;

            match stored {
                Ok(Ok(msg)) => {
                    // A sent message implicitly ends the typing indicator.
                    dispatcher.stop_typing(post_id, user.id).await;
                    dispatcher.broadcast(GatewayEvent::NewMessage {
                        id: msg.id,
                        post_id: msg.post_id,
                        user_id: msg.user_id,
                        username: msg.username,
                        avatar_url: msg.avatar_url,
                        message: msg.message,
                        timestamp: msg.timestamp,
                    });
                }
                Ok(Err(ChatWriteError::Store(e))) => {
                    warn!("failed to store chat message: {e:#}");
                    send_internal_error(dispatcher, user.id).await;
                }
                Ok(Err(rejection)) => {
                    dispatcher
                        .send_to_user(
                            user.id,
                            GatewayEvent::Error {
                                message: rejection.to_string(),
                            },
                        )
                        .await;
                }
                Err(e) => {
                    warn!("chat write task panicked: {e}");
                    send_internal_error(dispatcher, user.id).await;
                }
            }
        }

        GatewayCommand::TypingStart { post_id } => {
            if in_room(rooms, RoomKey::Auction(post_id)) {
                dispatcher
                    .start_typing(post_id, user.id, user.username.clone())
                    .await;
            }
        }

        GatewayCommand::TypingStop { post_id } => {
            dispatcher.stop_typing(post_id, user.id).await;
        }

        GatewayCommand::JoinSaleChat { chat_id } => {
            let check_db = Arc::clone(db);
            let header = tokio::task::spawn_blocking(move || check_db.sale_chat_header(chat_id))
                .await;
            let reason = match header {
                Ok(Ok(Some(header))) if header.participant(user.id) => None,
                Ok(Ok(Some(_))) => Some("Not authorized for this sale chat".to_string()),
                Ok(Ok(None)) => Some("Sale chat not found".to_string()),
                Ok(Err(e)) => {
                    warn!("sale chat lookup failed: {e:#}");
                    send_internal_error(dispatcher, user.id).await;
                    return;
                }
                Err(e) => {
                    warn!("sale chat lookup task panicked: {e}");
                    send_internal_error(dispatcher, user.id).await;
                    return;
                }
            };
            if let Some(message) = reason {
                dispatcher
                    .send_to_user(user.id, GatewayEvent::Error { message })
                    .await;
                return;
            }

            let room = RoomKey::SaleChat(chat_id);
            rooms.write().expect("room set lock poisoned").insert(room);
            dispatcher
                .join_room(
                    room,
                    user.id,
                    Member {
                        username: user.username.clone(),
                        avatar_url: user.avatar_url.clone(),
                    },
                )
                .await;
        }

        GatewayCommand::LeaveSaleChat { chat_id } => {
            let room = RoomKey::SaleChat(chat_id);
            rooms.write().expect("room set lock poisoned").remove(&room);
            dispatcher.leave_room(room, user.id).await;
        }

        GatewayCommand::SendSaleMessage { chat_id, message } => {
            if message.chars().count() > MAX_SALE_MESSAGE_CHARS {
                let message = format!(
                    "Message too long (max {MAX_SALE_MESSAGE_CHARS} characters)"
                );
                dispatcher
                    .send_to_user(user.id, GatewayEvent::Error { message })
                    .await;
                return;
            }

            let write_db = Arc::clone(db);
            let sender = user.clone();
            let stored = tokio::task::spawn_blocking(move || {
                let msg = write_db.append_sale_message(chat_id, &sender, &message, Utc::now())?;
                // Counterparty gets a stored notification, best-effort.
                if let Ok(Some(header)) = write_db.sale_chat_header(chat_id) {
                    let other = header.other_party(sender.id);
                    let body = format!("New message from {}", sender.username);
                    if let Err(e) = write_db.create_notification(
                        other,
                        &body,
                        Some(header.post_id),
                        Utc::now(),
                    ) {
                        warn!("failed to store sale message notification: {e:#}");
                    }
                }
                Ok(msg)
            })
            .await;

            match stored {
                Ok(Ok(msg)) => {
                    dispatcher.broadcast(GatewayEvent::NewSaleMessage {
                        id: msg.id,
                        chat_id: msg.chat_id,
                        sender_id: msg.sender_id,
                        username: msg.username,
                        avatar_url: msg.avatar_url,
                        message: msg.message,
                        timestamp: msg.timestamp,
                    });
                }
                Ok(Err(ChatWriteError::Store(e))) => {
                    warn!("failed to store sale message: {e:#}");
                    send_internal_error(dispatcher, user.id).await;
                }
                Ok(Err(rejection)) => {
                    dispatcher
                        .send_to_user(
                            user.id,
                            GatewayEvent::Error {
                                message: rejection.to_string(),
                            },
                        )
                        .await;
                }
                Err(e) => {
                    warn!("sale message task panicked: {e}");
                    send_internal_error(dispatcher, user.id).await;
                }
            }
        }
    }
}

fn in_room(rooms: &Arc<std::sync::RwLock<HashSet<RoomKey>>>, room: RoomKey) -> bool {
    rooms.read().expect("room set lock poisoned").contains(&room)
}

async fn send_internal_error(dispatcher: &Dispatcher, user_id: Uuid) {
    dispatcher
        .send_to_user(
            user_id,
            GatewayEvent::Error {
                message: "Internal server error".into(),
            },
        )
        .await;
}
