//! End-to-end lifecycle: list, bid, outbid, sell, and verify the side
//! effects (chat disabled, sale chat created, notifications written).

use std::sync::Arc;

use chrono::{Duration, Utc};
use uuid::Uuid;

use gavel_auction::{AuctionCore, LifecycleEvent, TransitionError};
use gavel_db::Database;
use gavel_db::posts::NewPost;
use gavel_types::models::{AuctionStatus, SaleMethod};

fn setup() -> (AuctionCore, Uuid, Uuid, Uuid) {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let seller = Uuid::new_v4();
    let alice = Uuid::new_v4();
    let bob = Uuid::new_v4();
    for (id, name) in [(seller, "seller"), (alice, "alice"), (bob, "bob")] {
        db.create_user(id, name, "h", None, Utc::now()).unwrap();
    }
    (AuctionCore::new(db), seller, alice, bob)
}

fn list(core: &AuctionCore, owner: Uuid, buy_now: Option<i64>) -> Uuid {
    let id = Uuid::new_v4();
    let now = Utc::now();
    core.db()
        .insert_post(&NewPost {
            id,
            user_id: owner,
            title: "vintage lamp",
            description: "works, minor scratches",
            starting_price: 10_00,
            buy_now_price: buy_now,
            auction_end_time: now + Duration::hours(2),
            created_at: now,
        })
        .unwrap();
    id
}

#[tokio::test]
async fn bid_war_then_owner_sells_to_highest() {
    let (core, seller, alice, bob) = setup();
    let post = list(&core, seller, None);
    let mut events = core.subscribe();

    core.place_bid(post, alice, 11_00).await.unwrap();
    let second = core.place_bid(post, bob, 12_00).await.unwrap();
    assert_eq!(second.previous_winner, Some(alice));

    let sale = core.sell_to_highest(post, seller).await.unwrap();
    assert_eq!(sale.buyer_id, bob);
    assert_eq!(sale.price, 12_00);
    assert_eq!(sale.via, SaleMethod::Auction);

    let db = core.db();
    let p = db.get_post(post).unwrap().unwrap();
    assert_eq!(p.status, AuctionStatus::Sold);
    assert_eq!(p.sold_to, Some(bob));
    assert!(!db.chat_is_active(post).unwrap());

    let chat = db.sale_chat(sale.sale_chat_id).unwrap().unwrap();
    assert_eq!(chat.buyer.id, bob);
    assert_eq!(chat.seller.id, seller);
    assert_eq!(chat.sale_amount, 12_00);

    // Two bids and one sale on the bus, in order.
    assert!(matches!(
        events.recv().await.unwrap(),
        LifecycleEvent::NewBid { previous_winner: None, .. }
    ));
    assert!(matches!(
        events.recv().await.unwrap(),
        LifecycleEvent::NewBid { previous_winner: Some(_), .. }
    ));
    assert!(matches!(
        events.recv().await.unwrap(),
        LifecycleEvent::Sold { .. }
    ));

    // The sold auction refuses everything afterwards.
    assert!(matches!(
        core.place_bid(post, alice, 20_00).await,
        Err(TransitionError::NotLive(AuctionStatus::Sold))
    ));
    assert!(matches!(
        core.cancel(post, seller).await,
        Err(TransitionError::NotLive(AuctionStatus::Sold))
    ));
}

#[tokio::test]
async fn buy_now_ends_a_contested_auction() {
    let (core, seller, alice, bob) = setup();
    let post = list(&core, seller, Some(50_00));

    core.place_bid(post, alice, 11_00).await.unwrap();
    let sale = core.buy_now(post, bob).await.unwrap();
    assert_eq!(sale.price, 50_00);
    assert_eq!(sale.via, SaleMethod::BuyNow);

    let p = core.db().get_post(post).unwrap().unwrap();
    assert_eq!(p.sold_via, Some(SaleMethod::BuyNow));
    assert_eq!(p.current_price, 50_00);
}

#[tokio::test]
async fn cancelled_auction_relists_from_scratch() {
    let (core, seller, alice, _) = setup();
    let post = list(&core, seller, None);

    core.place_bid(post, alice, 15_00).await.unwrap();
    core.cancel(post, seller).await.unwrap();

    assert!(matches!(
        core.place_bid(post, alice, 16_00).await,
        Err(TransitionError::NotLive(AuctionStatus::Cancelled))
    ));

    core.reactivate(post, seller, 1.0).await.unwrap();
    let p = core.db().get_post(post).unwrap().unwrap();
    assert_eq!(p.status, AuctionStatus::Live);
    assert_eq!(p.current_price, 10_00);

    // Old high bid no longer sets the floor; any amount above starting wins.
    core.place_bid(post, alice, 10_50).await.unwrap();
}

#[tokio::test]
async fn notifier_writes_rows_for_bus_events() {
    let (core, seller, alice, bob) = setup();
    let post = list(&core, seller, None);

    let db = Arc::clone(core.db());
    let writer = tokio::spawn(gavel_auction::notify::run(db, core.subscribe()));

    core.place_bid(post, alice, 11_00).await.unwrap();
    core.place_bid(post, bob, 12_00).await.unwrap();

    // Wait for the writer to drain the bus.
    let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(5);
    loop {
        let n = core.db().notifications_for_user(seller).unwrap().len();
        if n == 2 {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "notifications never arrived");
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    let outbid = core.db().notifications_for_user(alice).unwrap();
    assert_eq!(outbid.len(), 1);
    assert!(outbid[0].message.contains("outbid"));

    writer.abort();
}
