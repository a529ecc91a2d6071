use std::sync::Arc;

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tracing::{debug, warn};
use uuid::Uuid;

use gavel_db::Database;
use gavel_types::api::UpdatePostRequest;

use crate::events::LifecycleEvent;
use crate::machine::{self, AuctionEnd, BidAccepted, SaleOutcome, TransitionError};

/// Async front door to the state machine. Transitions run on the blocking
/// pool (the store is synchronous rusqlite) and successful ones are
/// published on the lifecycle bus.
pub struct AuctionCore {
    db: Arc<Database>,
    events: broadcast::Sender<LifecycleEvent>,
}

impl AuctionCore {
    pub fn new(db: Arc<Database>) -> Self {
        let (events, _) = broadcast::channel(256);
        Self { db, events }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.events.subscribe()
    }

    pub fn db(&self) -> &Arc<Database> {
        &self.db
    }

    pub async fn place_bid(
        &self,
        post_id: Uuid,
        bidder_id: Uuid,
        amount: i64,
    ) -> Result<BidAccepted, TransitionError> {
        let accepted = self
            .run(move |db| machine::place_bid(&db, post_id, bidder_id, amount, Utc::now()))
            .await?;
        self.publish(LifecycleEvent::NewBid {
            post_id: accepted.post_id,
            post_title: accepted.post_title.clone(),
            owner_id: accepted.owner_id,
            bidder_id: accepted.bidder_id,
            amount: accepted.amount,
            current_price: accepted.current_price,
            previous_winner: accepted.previous_winner,
        });
        Ok(accepted)
    }

    pub async fn sell_to_bidder(
        &self,
        post_id: Uuid,
        owner_id: Uuid,
        bidder_id: Uuid,
        amount: i64,
    ) -> Result<SaleOutcome, TransitionError> {
        let sale = self
            .run(move |db| {
                machine::sell_to_bidder(&db, post_id, owner_id, bidder_id, amount, Utc::now())
            })
            .await?;
        self.publish(sold_event(&sale));
        Ok(sale)
    }

    pub async fn sell_to_highest(
        &self,
        post_id: Uuid,
        owner_id: Uuid,
    ) -> Result<SaleOutcome, TransitionError> {
        let sale = self
            .run(move |db| machine::sell_to_highest(&db, post_id, owner_id, Utc::now()))
            .await?;
        self.publish(sold_event(&sale));
        Ok(sale)
    }

    pub async fn buy_now(
        &self,
        post_id: Uuid,
        buyer_id: Uuid,
    ) -> Result<SaleOutcome, TransitionError> {
        let sale = self
            .run(move |db| machine::buy_now(&db, post_id, buyer_id, Utc::now()))
            .await?;
        self.publish(sold_event(&sale));
        Ok(sale)
    }

    pub async fn end_auction(&self, post_id: Uuid) -> Result<AuctionEnd, TransitionError> {
        let end = self
            .run(move |db| machine::end_auction(&db, post_id, Utc::now()))
            .await?;
        match &end {
            AuctionEnd::Sold(sale) => self.publish(sold_event(sale)),
            AuctionEnd::Expired {
                post_id,
                post_title,
                owner_id,
            } => self.publish(LifecycleEvent::Expired {
                post_id: *post_id,
                post_title: post_title.clone(),
                owner_id: *owner_id,
            }),
        }
        Ok(end)
    }

    pub async fn cancel(&self, post_id: Uuid, owner_id: Uuid) -> Result<(), TransitionError> {
        self.run(move |db| machine::cancel(&db, post_id, owner_id))
            .await
    }

    pub async fn reactivate(
        &self,
        post_id: Uuid,
        owner_id: Uuid,
        duration_hours: f64,
    ) -> Result<DateTime<Utc>, TransitionError> {
        self.run(move |db| machine::reactivate(&db, post_id, owner_id, duration_hours, Utc::now()))
            .await
    }

    pub async fn delete_post(&self, post_id: Uuid, owner_id: Uuid) -> Result<(), TransitionError> {
        self.run(move |db| machine::delete(&db, post_id, owner_id))
            .await
    }

    pub async fn update_post(
        &self,
        post_id: Uuid,
        owner_id: Uuid,
        changes: UpdatePostRequest,
    ) -> Result<(), TransitionError> {
        self.run(move |db| machine::update(&db, post_id, owner_id, &changes))
            .await
    }

    /// One sweeper pass: finalize every live auction whose end time has
    /// passed. Per-post failures are logged and skipped; a post that lost a
    /// race to another finalizer is not an error.
    pub async fn sweep_once(&self) -> anyhow::Result<usize> {
        let db = Arc::clone(&self.db);
        let overdue = tokio::task::spawn_blocking(move || db.expired_live_post_ids(Utc::now()))
            .await
            .map_err(|e| anyhow!("blocking task panicked: {e}"))??;

        let mut finalized = 0;
        for post_id in overdue {
            match self.end_auction(post_id).await {
                Ok(_) => finalized += 1,
                Err(TransitionError::NotLive(_)) | Err(TransitionError::NotFound) => {
                    debug!(%post_id, "auction already finalized, skipping");
                }
                Err(e) => {
                    warn!(%post_id, error = %e, "failed to finalize expired auction");
                }
            }
        }
        Ok(finalized)
    }

    async fn run<T>(
        &self,
        f: impl FnOnce(Arc<Database>) -> Result<T, TransitionError> + Send + 'static,
    ) -> Result<T, TransitionError>
    where
        T: Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || f(db))
            .await
            .map_err(|e| TransitionError::Store(anyhow!("blocking task panicked: {e}")))?
    }

    fn publish(&self, event: LifecycleEvent) {
        // No receivers is fine; the bus is fire-and-forget.
        let _ = self.events.send(event);
    }
}

fn sold_event(sale: &SaleOutcome) -> LifecycleEvent {
    LifecycleEvent::Sold {
        post_id: sale.post_id,
        post_title: sale.post_title.clone(),
        seller_id: sale.seller_id,
        buyer_id: sale.buyer_id,
        price: sale.price,
        via: sale.via,
        sale_chat_id: sale.sale_chat_id,
    }
}
