use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{AuctionStatus, Bid, Post};

// -- JWT Claims --

/// JWT claims shared between the REST middleware and the WebSocket
/// Identify handshake. Canonical definition lives here to avoid
/// duplication between crates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub username: String,
    pub exp: usize,
}

// -- Auth --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub user_id: Uuid,
    pub token: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub user_id: Uuid,
    pub username: String,
    pub token: String,
}

// -- Posts --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreatePostRequest {
    pub title: String,
    pub description: String,
    pub starting_price: i64,
    /// Auction duration in hours; fractional values are allowed.
    pub auction_duration: f64,
    #[serde(default)]
    pub buy_now_price: Option<i64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct UpdatePostRequest {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub buy_now_price: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReactivatePostRequest {
    pub auction_duration: f64,
}

#[derive(Debug, Deserialize, Default)]
pub struct PostListQuery {
    #[serde(default)]
    pub user_id: Option<Uuid>,
    #[serde(default)]
    pub exclude_user_id: Option<Uuid>,
    #[serde(default)]
    pub status: Option<AuctionStatus>,
    #[serde(default)]
    pub live_only: Option<bool>,
}

/// Detail view with derived time-remaining fields.
#[derive(Debug, Serialize)]
pub struct PostDetailResponse {
    #[serde(flatten)]
    pub post: Post,
    pub time_remaining_ms: i64,
    pub is_live: bool,
}

// -- Bids --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlaceBidRequest {
    pub amount: i64,
}

#[derive(Debug, Serialize)]
pub struct PlaceBidResponse {
    pub message: String,
    pub bid: Bid,
    pub current_price: i64,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SellToBidderRequest {
    pub bidder_id: Uuid,
    pub amount: i64,
}

#[derive(Debug, Serialize)]
pub struct SaleResponse {
    pub message: String,
    pub sold_price: i64,
    pub buyer_id: Uuid,
    pub chat_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct EndAuctionResponse {
    pub message: String,
    pub status: AuctionStatus,
    pub sold_price: Option<i64>,
    pub winner_id: Option<Uuid>,
}

// -- Chat --

#[derive(Debug, Deserialize)]
pub struct ChatHistoryQuery {
    #[serde(default = "default_chat_limit")]
    pub limit: u32,
    #[serde(default)]
    pub offset: u32,
}

fn default_chat_limit() -> u32 {
    50
}

#[derive(Debug, Serialize)]
pub struct ChatHistoryResponse {
    pub post_id: Uuid,
    pub messages: Vec<crate::models::ChatMessage>,
    pub total_messages: i64,
    pub is_active: bool,
    pub post_status: AuctionStatus,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendSaleMessageRequest {
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct SendSaleMessageResponse {
    pub message: String,
    pub new_message: crate::models::SaleMessage,
}

// -- Generic bodies --

/// Error/status body used across the HTTP surface.
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiMessage {
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct TimestampedOk {
    pub message: String,
    pub timestamp: DateTime<Utc>,
}
