use std::sync::Arc;

use chrono::Utc;
use tokio::sync::broadcast;
use tracing::{info, warn};

use gavel_db::Database;

use crate::events::LifecycleEvent;

/// Turns lifecycle events into stored notifications. Writes are
/// best-effort: a failure is logged and the event is dropped, never
/// retried, and never affects the transition that produced it.
pub async fn run(db: Arc<Database>, mut rx: broadcast::Receiver<LifecycleEvent>) {
    loop {
        let event = match rx.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!(missed = n, "notification writer lagged behind the event bus");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => {
                info!("lifecycle bus closed, notification writer stopping");
                return;
            }
        };

        let db = Arc::clone(&db);
        let result =
            tokio::task::spawn_blocking(move || write_notifications(&db, &event)).await;
        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "failed to store notification"),
            Err(e) => warn!(error = %e, "notification writer task panicked"),
        }
    }
}

fn write_notifications(db: &Database, event: &LifecycleEvent) -> anyhow::Result<()> {
    let now = Utc::now();
    match event {
        LifecycleEvent::NewBid {
            post_id,
            post_title,
            owner_id,
            amount,
            previous_winner,
            ..
        } => {
            db.create_notification(
                *owner_id,
                &format!("New bid of {} on '{post_title}'", money(*amount)),
                Some(*post_id),
                now,
            )?;
            if let Some(outbid) = previous_winner {
                db.create_notification(
                    *outbid,
                    &format!("You have been outbid on '{post_title}'"),
                    Some(*post_id),
                    now,
                )?;
            }
        }
        LifecycleEvent::Sold {
            post_id,
            post_title,
            seller_id,
            buyer_id,
            price,
            ..
        } => {
            db.create_notification(
                *buyer_id,
                &format!("You won '{post_title}' for {}", money(*price)),
                Some(*post_id),
                now,
            )?;
            db.create_notification(
                *seller_id,
                &format!("Your auction '{post_title}' sold for {}", money(*price)),
                Some(*post_id),
                now,
            )?;
        }
        LifecycleEvent::Expired {
            post_id,
            post_title,
            owner_id,
        } => {
            db.create_notification(
                *owner_id,
                &format!("Your auction '{post_title}' ended without any bids"),
                Some(*post_id),
                now,
            )?;
        }
    }
    Ok(())
}

/// Amounts are stored in minor units.
fn money(amount: i64) -> String {
    format!("${}.{:02}", amount / 100, amount % 100)
}

#[cfg(test)]
mod tests {
    use super::*;
    use gavel_types::models::SaleMethod;
    use uuid::Uuid;

    #[test]
    fn new_bid_notifies_owner_and_outbid_bidder() {
        let db = Database::open_in_memory().unwrap();
        let owner = Uuid::new_v4();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        for (id, name) in [(owner, "owner"), (alice, "alice"), (bob, "bob")] {
            db.create_user(id, name, "h", None, Utc::now()).unwrap();
        }

        write_notifications(
            &db,
            &LifecycleEvent::NewBid {
                post_id: Uuid::new_v4(),
                post_title: "lamp".into(),
                owner_id: owner,
                bidder_id: bob,
                amount: 12_50,
                current_price: 12_50,
                previous_winner: Some(alice),
            },
        )
        .unwrap();

        let for_owner = db.notifications_for_user(owner).unwrap();
        assert_eq!(for_owner.len(), 1);
        assert!(for_owner[0].message.contains("$12.50"));

        let for_alice = db.notifications_for_user(alice).unwrap();
        assert!(for_alice[0].message.contains("outbid"));
        assert!(db.notifications_for_user(bob).unwrap().is_empty());
    }

    #[test]
    fn sale_notifies_both_parties() {
        let db = Database::open_in_memory().unwrap();
        let seller = Uuid::new_v4();
        let buyer = Uuid::new_v4();
        db.create_user(seller, "seller", "h", None, Utc::now())
            .unwrap();
        db.create_user(buyer, "buyer", "h", None, Utc::now())
            .unwrap();

        write_notifications(
            &db,
            &LifecycleEvent::Sold {
                post_id: Uuid::new_v4(),
                post_title: "lamp".into(),
                seller_id: seller,
                buyer_id: buyer,
                price: 50_00,
                via: SaleMethod::BuyNow,
                sale_chat_id: Uuid::new_v4(),
            },
        )
        .unwrap();

        assert_eq!(db.notifications_for_user(seller).unwrap().len(), 1);
        assert_eq!(db.notifications_for_user(buyer).unwrap().len(), 1);
    }
}
