use chrono::Utc;
use tokio::sync::broadcast;
use tracing::{info, warn};

use gavel_auction::LifecycleEvent;
use gavel_types::events::{AuctionEventPayload, GatewayEvent};
use gavel_types::models::AuctionStatus;

use crate::dispatcher::Dispatcher;

/// Bridges the lifecycle bus into auction rooms. The state machine never
/// talks to the dispatcher directly; everything realtime flows through
/// here.
pub async fn run(dispatcher: Dispatcher, mut rx: broadcast::Receiver<LifecycleEvent>) {
    loop {
        let event = match rx.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!(missed = n, "lifecycle forwarder lagged behind the event bus");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => {
                info!("lifecycle bus closed, forwarder stopping");
                return;
            }
        };

        for gateway_event in translate(&event) {
            dispatcher.broadcast(gateway_event);
        }
    }
}

fn translate(event: &LifecycleEvent) -> Vec<GatewayEvent> {
    let now = Utc::now();
    match event {
        LifecycleEvent::NewBid {
            post_id,
            bidder_id,
            amount,
            current_price,
            ..
        } => vec![GatewayEvent::AuctionEvent {
            post_id: *post_id,
            event: AuctionEventPayload::NewBid {
                bidder_id: *bidder_id,
                amount: *amount,
                current_price: *current_price,
            },
            timestamp: now,
        }],
        LifecycleEvent::Sold {
            post_id,
            buyer_id,
            price,
            ..
        } => vec![
            GatewayEvent::AuctionEvent {
                post_id: *post_id,
                event: AuctionEventPayload::AuctionEnded {
                    status: AuctionStatus::Sold,
                    winner_id: Some(*buyer_id),
                    amount: Some(*price),
                    reason: None,
                },
                timestamp: now,
            },
            GatewayEvent::ChatDisabled {
                post_id: *post_id,
                message: "This auction has ended".into(),
                timestamp: now,
            },
        ],
        LifecycleEvent::Expired { post_id, .. } => vec![
            GatewayEvent::AuctionEvent {
                post_id: *post_id,
                event: AuctionEventPayload::AuctionEnded {
                    status: AuctionStatus::Expired,
                    winner_id: None,
                    amount: None,
                    reason: Some("no-bids".into()),
                },
                timestamp: now,
            },
            GatewayEvent::ChatDisabled {
                post_id: *post_id,
                message: "This auction has ended".into(),
                timestamp: now,
            },
        ],
    }
}
