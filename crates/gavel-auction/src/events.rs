use uuid::Uuid;

use gavel_types::models::SaleMethod;

/// State-machine outcomes published on the lifecycle bus. The gateway
/// forwards these into auction rooms and the notifier turns them into
/// stored notifications; the machine itself never talks to either.
#[derive(Debug, Clone)]
pub enum LifecycleEvent {
    NewBid {
        post_id: Uuid,
        post_title: String,
        owner_id: Uuid,
        bidder_id: Uuid,
        amount: i64,
        current_price: i64,
        /// Bidder holding the winning flag before this bid, if any.
        previous_winner: Option<Uuid>,
    },
    Sold {
        post_id: Uuid,
        post_title: String,
        seller_id: Uuid,
        buyer_id: Uuid,
        price: i64,
        via: SaleMethod,
        sale_chat_id: Uuid,
    },
    Expired {
        post_id: Uuid,
        post_title: String,
        owner_id: Uuid,
    },
}

impl LifecycleEvent {
    pub fn post_id(&self) -> Uuid {
        match self {
            Self::NewBid { post_id, .. }
            | Self::Sold { post_id, .. }
            | Self::Expired { post_id, .. } => *post_id,
        }
    }
}
