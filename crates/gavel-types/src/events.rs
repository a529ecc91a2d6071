use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::AuctionStatus;

/// Identifies the room an event is scoped to. Auction chat rooms are keyed
/// by post id, sale chats by sale-chat id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoomKey {
    Auction(Uuid),
    SaleChat(Uuid),
}

/// Commands sent FROM client TO server over the WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum GatewayCommand {
    /// Authenticate the connection. Must be the first frame.
    Identify { token: String },

    /// Join a live auction's chat room
    JoinAuction { post_id: Uuid },

    /// Leave an auction chat room
    LeaveAuction { post_id: Uuid },

    /// Send a chat message into an auction room (max 500 chars)
    SendMessage { post_id: Uuid, message: String },

    /// Start (or re-arm) the typing indicator in an auction room
    TypingStart { post_id: Uuid },

    /// Explicitly stop the typing indicator
    TypingStop { post_id: Uuid },

    /// Join a post-sale buyer/seller chat
    JoinSaleChat { chat_id: Uuid },

    /// Leave a post-sale chat
    LeaveSaleChat { chat_id: Uuid },

    /// Send a message into a sale chat (max 1000 chars)
    SendSaleMessage { chat_id: Uuid, message: String },
}

/// Payload carried by the `auction-event` broadcast.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum AuctionEventPayload {
    NewBid {
        bidder_id: Uuid,
        amount: i64,
        current_price: i64,
    },
    AuctionEnded {
        status: AuctionStatus,
        winner_id: Option<Uuid>,
        amount: Option<i64>,
        reason: Option<String>,
    },
}

/// Events sent FROM server TO clients over the WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum GatewayEvent {
    /// Server confirms successful authentication
    Ready { user_id: Uuid, username: String },

    /// Sent to a joiner: who is in the room and who is currently typing
    RoomParticipants {
        post_id: Uuid,
        participants: Vec<Uuid>,
        typing_users: Vec<Uuid>,
    },

    UserJoined {
        post_id: Uuid,
        user_id: Uuid,
        username: String,
        avatar_url: Option<String>,
        timestamp: DateTime<Utc>,
    },

    UserLeft {
        post_id: Uuid,
        user_id: Uuid,
        username: String,
        timestamp: DateTime<Utc>,
    },

    NewMessage {
        id: Uuid,
        post_id: Uuid,
        user_id: Uuid,
        username: String,
        avatar_url: Option<String>,
        message: String,
        timestamp: DateTime<Utc>,
    },

    UserTyping {
        post_id: Uuid,
        user_id: Uuid,
        username: String,
        is_typing: bool,
        timestamp: DateTime<Utc>,
    },

    /// Lifecycle broadcast into the auction room (new bid, auction ended)
    AuctionEvent {
        post_id: Uuid,
        event: AuctionEventPayload,
        timestamp: DateTime<Utc>,
    },

    /// Explicit signal that the auction chat no longer accepts messages
    ChatDisabled {
        post_id: Uuid,
        message: String,
        timestamp: DateTime<Utc>,
    },

    UserJoinedSaleChat {
        chat_id: Uuid,
        user_id: Uuid,
        username: String,
        timestamp: DateTime<Utc>,
    },

    UserLeftSaleChat {
        chat_id: Uuid,
        user_id: Uuid,
        username: String,
        timestamp: DateTime<Utc>,
    },

    NewSaleMessage {
        id: Uuid,
        chat_id: Uuid,
        sender_id: Uuid,
        username: String,
        avatar_url: Option<String>,
        message: String,
        timestamp: DateTime<Utc>,
    },

    Error { message: String },
}

impl GatewayEvent {
    /// Returns the room this event is scoped to. Events returning `None`
    /// are targeted (per-user channel) and never broadcast.
    pub fn room(&self) -> Option<RoomKey> {
        match self {
            Self::UserJoined { post_id, .. }
            | Self::UserLeft { post_id, .. }
            | Self::NewMessage { post_id, .. }
            | Self::UserTyping { post_id, .. }
            | Self::AuctionEvent { post_id, .. }
            | Self::ChatDisabled { post_id, .. } => Some(RoomKey::Auction(*post_id)),
            Self::UserJoinedSaleChat { chat_id, .. }
            | Self::UserLeftSaleChat { chat_id, .. }
            | Self::NewSaleMessage { chat_id, .. } => Some(RoomKey::SaleChat(*chat_id)),
            Self::Ready { .. } | Self::RoomParticipants { .. } | Self::Error { .. } => None,
        }
    }

    /// Presence and typing updates are about other people; a client does
    /// not need to hear about its own joins, leaves, or typing state.
    pub fn suppressed_for(&self, viewer: Uuid) -> bool {
        match self {
            Self::UserJoined { user_id, .. }
            | Self::UserLeft { user_id, .. }
            | Self::UserTyping { user_id, .. } => *user_id == viewer,
            Self::UserJoinedSaleChat { user_id, .. }
            | Self::UserLeftSaleChat { user_id, .. } => *user_id == viewer,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_use_kebab_case_wire_names() {
        let cmd: GatewayCommand = serde_json::from_str(
            r#"{"type":"join-auction","data":{"post_id":"00000000-0000-0000-0000-000000000001"}}"#,
        )
        .unwrap();
        assert!(matches!(cmd, GatewayCommand::JoinAuction { .. }));

        let cmd: GatewayCommand = serde_json::from_str(
            r#"{"type":"typing-start","data":{"post_id":"00000000-0000-0000-0000-000000000001"}}"#,
        )
        .unwrap();
        assert!(matches!(cmd, GatewayCommand::TypingStart { .. }));
    }

    #[test]
    fn typing_event_serializes_with_expected_tag() {
        let ev = GatewayEvent::UserTyping {
            post_id: Uuid::nil(),
            user_id: Uuid::nil(),
            username: "alice".into(),
            is_typing: false,
            timestamp: Utc::now(),
        };
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["type"], "user-typing");
        assert_eq!(json["data"]["is_typing"], false);
    }

    #[test]
    fn room_scoping_matches_event_kind() {
        let post = Uuid::new_v4();
        let ev = GatewayEvent::ChatDisabled {
            post_id: post,
            message: "done".into(),
            timestamp: Utc::now(),
        };
        assert_eq!(ev.room(), Some(RoomKey::Auction(post)));

        let err = GatewayEvent::Error { message: "x".into() };
        assert_eq!(err.room(), None);
    }
}
