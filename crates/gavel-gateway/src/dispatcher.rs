use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{RwLock, broadcast, mpsc};
use tokio::task::JoinHandle;
use uuid::Uuid;

use gavel_types::events::{GatewayEvent, RoomKey};

/// How long a typing indicator stays lit without a refresh.
const TYPING_EXPIRY: Duration = Duration::from_secs(3);

/// Room member as the presence layer sees them.
#[derive(Debug, Clone)]
pub struct Member {
    pub username: String,
    pub avatar_url: Option<String>,
}

struct TypingState {
    /// Distinguishes the current timer from stale ones it replaced.
    token: Uuid,
    username: String,
    timer: JoinHandle<()>,
}

/// Manages all connected clients: room membership, typing indicators, and
/// event fan-out. All presence state is process-local and dies with the
/// process.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    /// Every connection receives every broadcast and filters by its own
    /// room subscriptions.
    broadcast_tx: broadcast::Sender<GatewayEvent>,

    /// Per-user targeted send channels: user_id -> (conn_id, sender)
    user_channels: RwLock<HashMap<Uuid, (Uuid, mpsc::UnboundedSender<GatewayEvent>)>>,

    /// Room membership: room -> (user_id -> member)
    rooms: RwLock<HashMap<RoomKey, HashMap<Uuid, Member>>>,

    /// Live typing indicators, keyed by (post, user).
    typing: RwLock<HashMap<(Uuid, Uuid), TypingState>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        let (broadcast_tx, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new(DispatcherInner {
                broadcast_tx,
                user_channels: RwLock::new(HashMap::new()),
                rooms: RwLock::new(HashMap::new()),
                typing: RwLock::new(HashMap::new()),
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.inner.broadcast_tx.subscribe()
    }

    /// Broadcast an event; each connection filters by room and viewer.
    pub fn broadcast(&self, event: GatewayEvent) {
        let _ = self.inner.broadcast_tx.send(event);
    }

    /// Register a per-user targeted channel. Returns (conn_id, receiver).
    pub async fn register_user_channel(
        &self,
        user_id: Uuid,
    ) -> (Uuid, mpsc::UnboundedReceiver<GatewayEvent>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner
            .user_channels
            .write()
            .await
            .insert(user_id, (conn_id, tx));
        (conn_id, rx)
    }

    /// Send a targeted event to a specific user.
    pub async fn send_to_user(&self, user_id: Uuid, event: GatewayEvent) {
        let channels = self.inner.user_channels.read().await;
        if let Some((_, tx)) = channels.get(&user_id) {
            let _ = tx.send(event);
        }
    }

    /// Add a user to a room and broadcast their arrival. Returns the
    /// members already present and, for auction rooms, who is typing.
    pub async fn join_room(
        &self,
        room: RoomKey,
        user_id: Uuid,
        member: Member,
    ) -> (Vec<Uuid>, Vec<Uuid>) {
        let existing: Vec<Uuid> = {
            let mut rooms = self.inner.rooms.write().await;
            let occupants = rooms.entry(room).or_default();
            let existing = occupants.keys().copied().collect();
            occupants.insert(user_id, member.clone());
            existing
        };

        let typing = match room {
            RoomKey::Auction(post_id) => {
                self.broadcast(GatewayEvent::UserJoined {
                    post_id,
                    user_id,
                    username: member.username,
                    avatar_url: member.avatar_url,
                    timestamp: Utc::now(),
                });
                self.typing_users(post_id).await
            }
            RoomKey::SaleChat(chat_id) => {
                self.broadcast(GatewayEvent::UserJoinedSaleChat {
                    chat_id,
                    user_id,
                    username: member.username,
                    timestamp: Utc::now(),
                });
                Vec::new()
            }
        };

        (existing, typing)
    }

    /// Remove a user from a room, cancelling their typing indicator and
    /// broadcasting the departure. No-op if they were not a member.
    pub async fn leave_room(&self, room: RoomKey, user_id: Uuid) {
        let removed = {
            let mut rooms = self.inner.rooms.write().await;
            match rooms.get_mut(&room) {
                Some(occupants) => {
                    let removed = occupants.remove(&user_id);
                    if occupants.is_empty() {
                        rooms.remove(&room);
                    }
                    removed
                }
                None => None,
            }
        };
        let Some(member) = removed else { return };

        match room {
            RoomKey::Auction(post_id) => {
                self.stop_typing(post_id, user_id).await;
                self.broadcast(GatewayEvent::UserLeft {
                    post_id,
                    user_id,
                    username: member.username,
                    timestamp: Utc::now(),
                });
            }
            RoomKey::SaleChat(chat_id) => {
                self.broadcast(GatewayEvent::UserLeftSaleChat {
                    chat_id,
                    user_id,
                    username: member.username,
                    timestamp: Utc::now(),
                });
            }
        }
    }

    pub async fn room_participants(&self, room: RoomKey) -> Vec<Uuid> {
        self.inner
            .rooms
            .read()
            .await
            .get(&room)
            .map(|occupants| occupants.keys().copied().collect())
            .unwrap_or_default()
    }

    pub async fn typing_users(&self, post_id: Uuid) -> Vec<Uuid> {
        self.inner
            .typing
            .read()
            .await
            .keys()
            .filter(|(post, _)| *post == post_id)
            .map(|(_, user)| *user)
            .collect()
    }

    /// Light (or re-arm) a typing indicator. Every start broadcasts
    /// `is_typing: true`; the indicator goes out on its own after
    /// [`TYPING_EXPIRY`] unless refreshed or cancelled.
    pub async fn start_typing(&self, post_id: Uuid, user_id: Uuid, username: String) {
        let token = Uuid::new_v4();
        let dispatcher = self.clone();
        let timer_username = username.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(TYPING_EXPIRY).await;
            dispatcher
                .expire_typing(post_id, user_id, token, timer_username)
                .await;
        });

        let replaced = self.inner.typing.write().await.insert(
            (post_id, user_id),
            TypingState {
                token,
                username: username.clone(),
                timer,
            },
        );
        if let Some(old) = replaced {
            old.timer.abort();
        }
        self.broadcast(GatewayEvent::UserTyping {
            post_id,
            user_id,
            username,
            is_typing: true,
            timestamp: Utc::now(),
        });
    }

    /// Cancel a typing indicator and broadcast `is_typing: false` if it was
    /// lit. Removal under the write lock guarantees the false broadcast
    /// happens at most once per lit indicator.
    pub async fn stop_typing(&self, post_id: Uuid, user_id: Uuid) {
        let removed = self.inner.typing.write().await.remove(&(post_id, user_id));
        if let Some(state) = removed {
            state.timer.abort();
            self.broadcast(GatewayEvent::UserTyping {
                post_id,
                user_id,
                username: state.username,
                is_typing: false,
                timestamp: Utc::now(),
            });
        }
    }

    async fn expire_typing(&self, post_id: Uuid, user_id: Uuid, token: Uuid, username: String) {
        let expired = {
            let mut typing = self.inner.typing.write().await;
            match typing.get(&(post_id, user_id)) {
                Some(state) if state.token == token => {
                    typing.remove(&(post_id, user_id));
                    true
                }
                // A newer timer owns the indicator now.
                _ => false,
            }
        };
        if expired {
            self.broadcast(GatewayEvent::UserTyping {
                post_id,
                user_id,
                username,
                is_typing: false,
                timestamp: Utc::now(),
            });
        }
    }

    /// Tear down everything a closing connection owns: room memberships,
    /// typing indicators, and the targeted channel. Only acts if `conn_id`
    /// still owns the user channel, so a reconnect that already replaced
    /// it is left untouched.
    pub async fn disconnect(&self, user_id: Uuid, conn_id: Uuid) {
        let is_current = {
            let channels = self.inner.user_channels.read().await;
            channels.get(&user_id).is_some_and(|(cid, _)| *cid == conn_id)
        };
        if !is_current {
            return;
        }

        let memberships: Vec<RoomKey> = {
            let rooms = self.inner.rooms.read().await;
            rooms
                .iter()
                .filter(|(_, occupants)| occupants.contains_key(&user_id))
                .map(|(room, _)| *room)
                .collect()
        };
        for room in memberships {
            self.leave_room(room, user_id).await;
        }

        let mut channels = self.inner.user_channels.write().await;
        if channels.get(&user_id).is_some_and(|(cid, _)| *cid == conn_id) {
            channels.remove(&user_id);
        }
    }

    /// The rooms a user currently occupies. Test hook.
    #[cfg(test)]
    async fn rooms_of(&self, user_id: Uuid) -> std::collections::HashSet<RoomKey> {
        self.inner
            .rooms
            .read()
            .await
            .iter()
            .filter(|(_, occupants)| occupants.contains_key(&user_id))
            .map(|(room, _)| *room)
            .collect()
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(name: &str) -> Member {
        Member {
            username: name.into(),
            avatar_url: None,
        }
    }

    async fn next_typing(rx: &mut broadcast::Receiver<GatewayEvent>) -> (Uuid, bool) {
        loop {
            match rx.recv().await.unwrap() {
                GatewayEvent::UserTyping {
                    user_id, is_typing, ..
                } => return (user_id, is_typing),
                _ => continue,
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn typing_indicator_expires_exactly_once() {
        let dispatcher = Dispatcher::new();
        let post = Uuid::new_v4();
        let alice = Uuid::new_v4();
        let mut rx = dispatcher.subscribe();

        dispatcher.start_typing(post, alice, "alice".into()).await;
        assert_eq!(next_typing(&mut rx).await, (alice, true));
        assert_eq!(dispatcher.typing_users(post).await, vec![alice]);

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(next_typing(&mut rx).await, (alice, false));
        assert!(dispatcher.typing_users(post).await.is_empty());

        // A later explicit stop finds nothing and stays silent.
        dispatcher.stop_typing(post, alice).await;
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(matches!(
            rx.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn restart_replaces_the_timer_and_rebroadcasts() {
        let dispatcher = Dispatcher::new();
        let post = Uuid::new_v4();
        let alice = Uuid::new_v4();
        let mut rx = dispatcher.subscribe();

        dispatcher.start_typing(post, alice, "alice".into()).await;
        assert_eq!(next_typing(&mut rx).await, (alice, true));

        // Re-arm at t=2s: a fresh `true` goes out and the indicator must
        // survive past the original 3s.
        tokio::time::sleep(Duration::from_secs(2)).await;
        dispatcher.start_typing(post, alice, "alice".into()).await;
        assert_eq!(next_typing(&mut rx).await, (alice, true));

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(dispatcher.typing_users(post).await, vec![alice]);
        assert!(matches!(
            rx.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));

        // And expire 3s after the restart, not the original start.
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(next_typing(&mut rx).await, (alice, false));
    }

    #[tokio::test(start_paused = true)]
    async fn explicit_stop_cancels_immediately() {
        let dispatcher = Dispatcher::new();
        let post = Uuid::new_v4();
        let alice = Uuid::new_v4();
        let mut rx = dispatcher.subscribe();

        dispatcher.start_typing(post, alice, "alice".into()).await;
        assert_eq!(next_typing(&mut rx).await, (alice, true));

        dispatcher.stop_typing(post, alice).await;
        assert_eq!(next_typing(&mut rx).await, (alice, false));

        // The old timer must not fire a second false later.
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(matches!(
            rx.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }

    #[tokio::test]
    async fn join_returns_existing_members_only() {
        let dispatcher = Dispatcher::new();
        let post = Uuid::new_v4();
        let room = RoomKey::Auction(post);
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();

        let (existing, _) = dispatcher.join_room(room, alice, member("alice")).await;
        assert!(existing.is_empty());

        let (existing, _) = dispatcher.join_room(room, bob, member("bob")).await;
        assert_eq!(existing, vec![alice]);

        let mut all = dispatcher.room_participants(room).await;
        all.sort();
        let mut want = vec![alice, bob];
        want.sort();
        assert_eq!(all, want);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_leaves_every_room_once() {
        let dispatcher = Dispatcher::new();
        let alice = Uuid::new_v4();
        let (conn_id, _rx_user) = dispatcher.register_user_channel(alice).await;

        let post = Uuid::new_v4();
        let sale = Uuid::new_v4();
        dispatcher
            .join_room(RoomKey::Auction(post), alice, member("alice"))
            .await;
        dispatcher
            .join_room(RoomKey::SaleChat(sale), alice, member("alice"))
            .await;
        dispatcher.start_typing(post, alice, "alice".into()).await;

        let mut rx = dispatcher.subscribe();
        dispatcher.disconnect(alice, conn_id).await;

        let mut left_auction = 0;
        let mut left_sale = 0;
        let mut typing_false = 0;
        while let Ok(event) = rx.try_recv() {
            match event {
                GatewayEvent::UserLeft { post_id, .. } => {
                    assert_eq!(post_id, post);
                    left_auction += 1;
                }
                GatewayEvent::UserLeftSaleChat { chat_id, .. } => {
                    assert_eq!(chat_id, sale);
                    left_sale += 1;
                }
                GatewayEvent::UserTyping { is_typing, .. } => {
                    assert!(!is_typing);
                    typing_false += 1;
                }
                other => panic!("unexpected event: {other:?}"),
            }
        }
        assert_eq!((left_auction, left_sale, typing_false), (1, 1, 1));
        assert!(dispatcher.rooms_of(alice).await.is_empty());

        // Disconnect with a stale conn_id is a no-op.
        dispatcher.disconnect(alice, Uuid::new_v4()).await;
    }

    #[tokio::test]
    async fn stale_conn_id_does_not_tear_down_a_reconnect() {
        let dispatcher = Dispatcher::new();
        let alice = Uuid::new_v4();
        let (old_conn, _old_rx) = dispatcher.register_user_channel(alice).await;
        let (_new_conn, _new_rx) = dispatcher.register_user_channel(alice).await;

        let post = Uuid::new_v4();
        dispatcher
            .join_room(RoomKey::Auction(post), alice, member("alice"))
            .await;

        // The old connection's teardown must not evict the new session.
        dispatcher.disconnect(alice, old_conn).await;
        assert_eq!(
            dispatcher.room_participants(RoomKey::Auction(post)).await,
            vec![alice]
        );
    }
}
