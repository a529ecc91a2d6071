use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle state of an auction post.
///
/// `live` is the only state that accepts bids and chat. `sold` and
/// `expired` are terminal; `cancelled` can be reactivated back to `live`
/// by the owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuctionStatus {
    Live,
    Sold,
    Expired,
    Cancelled,
}

impl AuctionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Live => "live",
            Self::Sold => "sold",
            Self::Expired => "expired",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parse the TEXT representation stored in SQLite.
    pub fn from_db(s: &str) -> Option<Self> {
        match s {
            "live" => Some(Self::Live),
            "sold" => Some(Self::Sold),
            "expired" => Some(Self::Expired),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

impl std::fmt::Display for AuctionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a sold post was sold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SaleMethod {
    Auction,
    BuyNow,
}

impl SaleMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auction => "auction",
            Self::BuyNow => "buyNow",
        }
    }

    pub fn from_db(s: &str) -> Option<Self> {
        match s {
            "auction" => Some(Self::Auction),
            "buyNow" => Some(Self::BuyNow),
            _ => None,
        }
    }
}

impl std::fmt::Display for SaleMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Public identity attached to chat broadcasts and bid listings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserPublic {
    pub id: Uuid,
    pub username: String,
    pub avatar_url: Option<String>,
}

/// An auction listing. Prices are integer minor units (cents).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Post {
    pub id: Uuid,
    pub user_id: Uuid,
    pub owner_username: String,
    pub title: String,
    pub description: String,
    pub starting_price: i64,
    pub current_price: i64,
    pub buy_now_price: Option<i64>,
    pub auction_end_time: DateTime<Utc>,
    pub status: AuctionStatus,
    pub sold_to: Option<Uuid>,
    pub sold_at: Option<DateTime<Utc>>,
    pub sold_price: Option<i64>,
    pub sold_via: Option<SaleMethod>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bid {
    pub id: Uuid,
    pub post_id: Uuid,
    pub bidder_id: Uuid,
    pub bidder_username: String,
    pub bidder_avatar_url: Option<String>,
    pub amount: i64,
    pub is_winning: bool,
    pub created_at: DateTime<Utc>,
}

/// Per-bidder rollup the owner uses to decide whom to sell to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BidderSummary {
    pub bidder_id: Uuid,
    pub username: String,
    pub avatar_url: Option<String>,
    pub highest_bid: i64,
    pub total_bids: i64,
    pub last_bid_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: Uuid,
    pub post_id: Uuid,
    pub user_id: Uuid,
    pub username: String,
    pub avatar_url: Option<String>,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaleMessage {
    pub id: Uuid,
    pub chat_id: Uuid,
    pub sender_id: Uuid,
    pub username: String,
    pub avatar_url: Option<String>,
    pub message: String,
    pub is_read: bool,
    pub timestamp: DateTime<Utc>,
}

/// Private buyer/seller channel created once per completed sale.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaleChat {
    pub id: Uuid,
    pub post_id: Uuid,
    pub post_title: String,
    pub buyer: UserPublic,
    pub seller: UserPublic,
    pub sale_amount: i64,
    pub sale_date: DateTime<Utc>,
    pub messages: Vec<SaleMessage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub user_id: Uuid,
    pub message: String,
    pub post_id: Option<Uuid>,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_db_text() {
        for s in [
            AuctionStatus::Live,
            AuctionStatus::Sold,
            AuctionStatus::Expired,
            AuctionStatus::Cancelled,
        ] {
            assert_eq!(AuctionStatus::from_db(s.as_str()), Some(s));
        }
        assert_eq!(AuctionStatus::from_db("pending"), None);
    }

    #[test]
    fn sale_method_uses_original_wire_spelling() {
        assert_eq!(SaleMethod::BuyNow.as_str(), "buyNow");
        assert_eq!(
            serde_json::to_string(&SaleMethod::BuyNow).unwrap(),
            "\"buyNow\""
        );
    }
}
