//! Auction state transitions. Every entry point runs as a single SQLite
//! transaction that re-reads the post row and re-checks its status before
//! writing, so a transition that lost the race observes the new state and
//! rejects cleanly instead of clobbering it.

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Duration, Utc};
use rusqlite::Transaction;
use uuid::Uuid;

use gavel_db::{Database, ts};
use gavel_types::api::UpdatePostRequest;
use gavel_types::models::{AuctionStatus, SaleMethod};

#[derive(Debug, thiserror::Error)]
pub enum TransitionError {
    #[error("Post not found")]
    NotFound,
    #[error("Only the owner can perform this action")]
    NotOwner,
    #[error("Auction is not live (status: {0})")]
    NotLive(AuctionStatus),
    #[error("Auction has ended")]
    Expired,
    #[error("Auction has not ended yet")]
    NotExpiredYet,
    #[error("You cannot bid on your own auction")]
    OwnAuction,
    #[error("You cannot buy your own listing")]
    OwnPurchase,
    #[error("Bid must be at least the starting price ({0})")]
    BelowStarting(i64),
    #[error("Bid must be higher than the current price ({0})")]
    LowBid(i64),
    #[error("Amount must be positive")]
    InvalidAmount,
    #[error("This listing has no buy-now price")]
    NoBuyNow,
    #[error("No bids have been placed on this auction")]
    NoBids,
    #[error("That user has not bid on this auction")]
    BidderHasNoBid,
    #[error("Cannot delete a post that has bids")]
    HasBids,
    #[error("Only cancelled auctions can be reactivated (status: {0})")]
    NotCancelled(AuctionStatus),
    #[error("Auction duration must be positive")]
    InvalidDuration,
    #[error("Buy-now price must be higher than the starting price")]
    BuyNowTooLow,
    #[error("store error: {0}")]
    Store(#[from] anyhow::Error),
}

/// Result of an accepted bid, carrying what the event bus needs.
#[derive(Debug, Clone)]
pub struct BidAccepted {
    pub bid_id: Uuid,
    pub post_id: Uuid,
    pub post_title: String,
    pub owner_id: Uuid,
    pub bidder_id: Uuid,
    pub amount: i64,
    pub current_price: i64,
    pub previous_winner: Option<Uuid>,
}

#[derive(Debug, Clone)]
pub struct SaleOutcome {
    pub post_id: Uuid,
    pub post_title: String,
    pub seller_id: Uuid,
    pub buyer_id: Uuid,
    pub price: i64,
    pub via: SaleMethod,
    pub sale_chat_id: Uuid,
}

/// What a forced or swept end actually did.
#[derive(Debug, Clone)]
pub enum AuctionEnd {
    Sold(SaleOutcome),
    Expired {
        post_id: Uuid,
        post_title: String,
        owner_id: Uuid,
    },
}

struct PostSnapshot {
    owner_id: Uuid,
    title: String,
    starting_price: i64,
    current_price: i64,
    buy_now_price: Option<i64>,
    end_time: DateTime<Utc>,
    status: AuctionStatus,
}

pub fn place_bid(
    db: &Database,
    post_id: Uuid,
    bidder_id: Uuid,
    amount: i64,
    now: DateTime<Utc>,
) -> Result<BidAccepted, TransitionError> {
    run_tx(db, |tx| {
        let post = match load_post(tx, post_id)? {
            None => return Ok(Err(TransitionError::NotFound)),
            Some(p) => p,
        };
        if post.status != AuctionStatus::Live {
            return Ok(Err(TransitionError::NotLive(post.status)));
        }
        if now > post.end_time {
            return Ok(Err(TransitionError::Expired));
        }
        if bidder_id == post.owner_id {
            return Ok(Err(TransitionError::OwnAuction));
        }
        if amount < post.starting_price {
            return Ok(Err(TransitionError::BelowStarting(post.starting_price)));
        }
        if amount <= post.current_price {
            return Ok(Err(TransitionError::LowBid(post.current_price)));
        }

        let previous_winner = winning_bidder(tx, post_id)?;

        tx.execute(
            "UPDATE bids SET is_winning = 0 WHERE post_id = ?1 AND is_winning = 1",
            [post_id.to_string()],
        )?;
        let bid_id = Uuid::new_v4();
        tx.execute(
            "INSERT INTO bids (id, post_id, bidder_id, amount, is_winning, created_at)
             VALUES (?1, ?2, ?3, ?4, 1, ?5)",
            rusqlite::params![
                bid_id.to_string(),
                post_id.to_string(),
                bidder_id.to_string(),
                amount,
                ts(now),
            ],
        )?;
        tx.execute(
            "UPDATE posts SET current_price = ?1 WHERE id = ?2",
            rusqlite::params![amount, post_id.to_string()],
        )?;

        Ok(Ok(BidAccepted {
            bid_id,
            post_id,
            post_title: post.title,
            owner_id: post.owner_id,
            bidder_id,
            amount,
            current_price: amount,
            previous_winner,
        }))
    })
}

/// Owner accepts a specific bidder's offer at an agreed amount, which may
/// differ from that bidder's highest bid.
pub fn sell_to_bidder(
    db: &Database,
    post_id: Uuid,
    owner_id: Uuid,
    bidder_id: Uuid,
    amount: i64,
    now: DateTime<Utc>,
) -> Result<SaleOutcome, TransitionError> {
    run_tx(db, |tx| {
        let post = match load_post(tx, post_id)? {
            None => return Ok(Err(TransitionError::NotFound)),
            Some(p) => p,
        };
        if post.owner_id != owner_id {
            return Ok(Err(TransitionError::NotOwner));
        }
        if post.status != AuctionStatus::Live {
            return Ok(Err(TransitionError::NotLive(post.status)));
        }
        if now > post.end_time {
            return Ok(Err(TransitionError::Expired));
        }
        if amount <= 0 {
            return Ok(Err(TransitionError::InvalidAmount));
        }

        let has_bid: i64 = tx.query_row(
            "SELECT COUNT(*) FROM bids WHERE post_id = ?1 AND bidder_id = ?2",
            rusqlite::params![post_id.to_string(), bidder_id.to_string()],
            |row| row.get(0),
        )?;
        if has_bid == 0 {
            return Ok(Err(TransitionError::BidderHasNoBid));
        }

        let sale_chat_id = finalize_sale(
            tx,
            post_id,
            &post,
            bidder_id,
            amount,
            SaleMethod::Auction,
            None,
            now,
        )?;
        Ok(Ok(sale_outcome(
            post_id,
            &post,
            bidder_id,
            amount,
            SaleMethod::Auction,
            sale_chat_id,
        )))
    })
}

/// Owner sells to whoever holds the winning flag.
pub fn sell_to_highest(
    db: &Database,
    post_id: Uuid,
    owner_id: Uuid,
    now: DateTime<Utc>,
) -> Result<SaleOutcome, TransitionError> {
    run_tx(db, |tx| {
        let post = match load_post(tx, post_id)? {
            None => return Ok(Err(TransitionError::NotFound)),
            Some(p) => p,
        };
        if post.owner_id != owner_id {
            return Ok(Err(TransitionError::NotOwner));
        }
        if post.status != AuctionStatus::Live {
            return Ok(Err(TransitionError::NotLive(post.status)));
        }
        if now > post.end_time {
            return Ok(Err(TransitionError::Expired));
        }

        let winner = match winning_bid(tx, post_id)? {
            None => return Ok(Err(TransitionError::NoBids)),
            Some(w) => w,
        };

        let sale_chat_id = finalize_sale(
            tx,
            post_id,
            &post,
            winner.0,
            winner.1,
            SaleMethod::Auction,
            None,
            now,
        )?;
        Ok(Ok(sale_outcome(
            post_id,
            &post,
            winner.0,
            winner.1,
            SaleMethod::Auction,
            sale_chat_id,
        )))
    })
}

/// Instant purchase at the listed buy-now price, bypassing bidding.
pub fn buy_now(
    db: &Database,
    post_id: Uuid,
    buyer_id: Uuid,
    now: DateTime<Utc>,
) -> Result<SaleOutcome, TransitionError> {
    run_tx(db, |tx| {
        let post = match load_post(tx, post_id)? {
            None => return Ok(Err(TransitionError::NotFound)),
            Some(p) => p,
        };
        if buyer_id == post.owner_id {
            return Ok(Err(TransitionError::OwnPurchase));
        }
        if post.status != AuctionStatus::Live {
            return Ok(Err(TransitionError::NotLive(post.status)));
        }
        if now > post.end_time {
            return Ok(Err(TransitionError::Expired));
        }
        let price = match post.buy_now_price {
            None => return Ok(Err(TransitionError::NoBuyNow)),
            Some(p) => p,
        };

        let sale_chat_id = finalize_sale(
            tx,
            post_id,
            &post,
            buyer_id,
            price,
            SaleMethod::BuyNow,
            Some(price),
            now,
        )?;
        Ok(Ok(sale_outcome(
            post_id,
            &post,
            buyer_id,
            price,
            SaleMethod::BuyNow,
            sale_chat_id,
        )))
    })
}

/// Finalize an auction whose end time has passed: sold to the winning
/// bidder if one exists, otherwise expired. Idempotent in effect — a
/// second call sees the non-live status and rejects without writing.
pub fn end_auction(
    db: &Database,
    post_id: Uuid,
    now: DateTime<Utc>,
) -> Result<AuctionEnd, TransitionError> {
    run_tx(db, |tx| {
        let post = match load_post(tx, post_id)? {
            None => return Ok(Err(TransitionError::NotFound)),
            Some(p) => p,
        };
        if post.status != AuctionStatus::Live {
            return Ok(Err(TransitionError::NotLive(post.status)));
        }
        if now <= post.end_time {
            return Ok(Err(TransitionError::NotExpiredYet));
        }

        match winning_bid(tx, post_id)? {
            Some((winner_id, amount)) => {
                let sale_chat_id = finalize_sale(
                    tx,
                    post_id,
                    &post,
                    winner_id,
                    amount,
                    SaleMethod::Auction,
                    None,
                    now,
                )?;
                Ok(Ok(AuctionEnd::Sold(sale_outcome(
                    post_id,
                    &post,
                    winner_id,
                    amount,
                    SaleMethod::Auction,
                    sale_chat_id,
                ))))
            }
            None => {
                tx.execute(
                    "UPDATE posts SET status = 'expired' WHERE id = ?1",
                    [post_id.to_string()],
                )?;
                deactivate_chat(tx, post_id)?;
                Ok(Ok(AuctionEnd::Expired {
                    post_id,
                    post_title: post.title,
                    owner_id: post.owner_id,
                }))
            }
        }
    })
}

pub fn cancel(
    db: &Database,
    post_id: Uuid,
    owner_id: Uuid,
) -> Result<(), TransitionError> {
    run_tx(db, |tx| {
        let post = match load_post(tx, post_id)? {
            None => return Ok(Err(TransitionError::NotFound)),
            Some(p) => p,
        };
        if post.owner_id != owner_id {
            return Ok(Err(TransitionError::NotOwner));
        }
        if post.status != AuctionStatus::Live {
            return Ok(Err(TransitionError::NotLive(post.status)));
        }
        tx.execute(
            "UPDATE posts SET status = 'cancelled' WHERE id = ?1",
            [post_id.to_string()],
        )?;
        Ok(Ok(()))
    })
}

/// Relist a cancelled auction: price resets to the starting price and the
/// clock starts over from now.
pub fn reactivate(
    db: &Database,
    post_id: Uuid,
    owner_id: Uuid,
    duration_hours: f64,
    now: DateTime<Utc>,
) -> Result<DateTime<Utc>, TransitionError> {
    run_tx(db, |tx| {
        let post = match load_post(tx, post_id)? {
            None => return Ok(Err(TransitionError::NotFound)),
            Some(p) => p,
        };
        if post.owner_id != owner_id {
            return Ok(Err(TransitionError::NotOwner));
        }
        if post.status != AuctionStatus::Cancelled {
            return Ok(Err(TransitionError::NotCancelled(post.status)));
        }
        if !duration_hours.is_finite() || duration_hours <= 0.0 {
            return Ok(Err(TransitionError::InvalidDuration));
        }

        let end = now + Duration::milliseconds((duration_hours * 3_600_000.0) as i64);
        tx.execute(
            "UPDATE posts
             SET status = 'live', current_price = starting_price, auction_end_time = ?1
             WHERE id = ?2",
            rusqlite::params![ts(end), post_id.to_string()],
        )?;
        Ok(Ok(end))
    })
}

/// Remove a live listing nobody has bid on. Bid history is never deleted.
pub fn delete(db: &Database, post_id: Uuid, owner_id: Uuid) -> Result<(), TransitionError> {
    run_tx(db, |tx| {
        let post = match load_post(tx, post_id)? {
            None => return Ok(Err(TransitionError::NotFound)),
            Some(p) => p,
        };
        if post.owner_id != owner_id {
            return Ok(Err(TransitionError::NotOwner));
        }
        if post.status != AuctionStatus::Live {
            return Ok(Err(TransitionError::NotLive(post.status)));
        }
        let bids: i64 = tx.query_row(
            "SELECT COUNT(*) FROM bids WHERE post_id = ?1",
            [post_id.to_string()],
            |row| row.get(0),
        )?;
        if bids > 0 {
            return Ok(Err(TransitionError::HasBids));
        }

        tx.execute(
            "DELETE FROM chat_messages WHERE post_id = ?1",
            [post_id.to_string()],
        )?;
        tx.execute("DELETE FROM chats WHERE post_id = ?1", [post_id.to_string()])?;
        tx.execute("DELETE FROM posts WHERE id = ?1", [post_id.to_string()])?;
        Ok(Ok(()))
    })
}

/// Owner edits to a live listing. Price history is untouched; only the
/// buy-now offer, title and description may change.
pub fn update(
    db: &Database,
    post_id: Uuid,
    owner_id: Uuid,
    changes: &UpdatePostRequest,
) -> Result<(), TransitionError> {
    run_tx(db, |tx| {
        let post = match load_post(tx, post_id)? {
            None => return Ok(Err(TransitionError::NotFound)),
            Some(p) => p,
        };
        if post.owner_id != owner_id {
            return Ok(Err(TransitionError::NotOwner));
        }
        if post.status != AuctionStatus::Live {
            return Ok(Err(TransitionError::NotLive(post.status)));
        }
        if let Some(price) = changes.buy_now_price {
            if price <= post.starting_price {
                return Ok(Err(TransitionError::BuyNowTooLow));
            }
        }

        if let Some(title) = &changes.title {
            tx.execute(
                "UPDATE posts SET title = ?1 WHERE id = ?2",
                rusqlite::params![title, post_id.to_string()],
            )?;
        }
        if let Some(description) = &changes.description {
            tx.execute(
                "UPDATE posts SET description = ?1 WHERE id = ?2",
                rusqlite::params![description, post_id.to_string()],
            )?;
        }
        if let Some(price) = changes.buy_now_price {
            tx.execute(
                "UPDATE posts SET buy_now_price = ?1 WHERE id = ?2",
                rusqlite::params![price, post_id.to_string()],
            )?;
        }
        Ok(Ok(()))
    })
}

// -- internals --

fn run_tx<T>(
    db: &Database,
    f: impl FnOnce(&Transaction<'_>) -> Result<Result<T, TransitionError>>,
) -> Result<T, TransitionError> {
    let res = db.with_conn_mut(|conn| {
        let tx = conn.transaction()?;
        let out = f(&tx)?;
        // Dropping the transaction on a rejection rolls it back.
        if out.is_ok() {
            tx.commit()?;
        }
        Ok(out)
    });
    match res {
        Ok(inner) => inner,
        Err(e) => Err(TransitionError::Store(e)),
    }
}

fn load_post(tx: &Transaction<'_>, post_id: Uuid) -> Result<Option<PostSnapshot>> {
    let row = tx
        .prepare(
            "SELECT user_id, title, starting_price, current_price, buy_now_price,
                    auction_end_time, status
             FROM posts WHERE id = ?1",
        )?
        .query_row([post_id.to_string()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, Option<i64>>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, String>(6)?,
            ))
        });
    let (owner, title, starting, current, buy_now, end, status) = match row {
        Ok(r) => r,
        Err(rusqlite::Error::QueryReturnedNoRows) => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    Ok(Some(PostSnapshot {
        owner_id: Uuid::parse_str(&owner).context("bad owner id in posts row")?,
        title,
        starting_price: starting,
        current_price: current,
        buy_now_price: buy_now,
        end_time: end
            .parse::<DateTime<Utc>>()
            .context("bad auction_end_time in posts row")?,
        status: AuctionStatus::from_db(&status)
            .ok_or_else(|| anyhow!("unknown auction status '{status}'"))?,
    }))
}

fn winning_bid(tx: &Transaction<'_>, post_id: Uuid) -> Result<Option<(Uuid, i64)>> {
    let row = tx
        .prepare("SELECT bidder_id, amount FROM bids WHERE post_id = ?1 AND is_winning = 1")?
        .query_row([post_id.to_string()], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        });
    match row {
        Ok((bidder, amount)) => Ok(Some((
            Uuid::parse_str(&bidder).context("bad bidder id in bids row")?,
            amount,
        ))),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn winning_bidder(tx: &Transaction<'_>, post_id: Uuid) -> Result<Option<Uuid>> {
    Ok(winning_bid(tx, post_id)?.map(|(bidder, _)| bidder))
}

/// Shared tail of every sale path: sold metadata on the post, chat
/// deactivation, and the buyer/seller sale chat, all in the caller's
/// transaction.
#[allow(clippy::too_many_arguments)]
fn finalize_sale(
    tx: &Transaction<'_>,
    post_id: Uuid,
    post: &PostSnapshot,
    buyer_id: Uuid,
    price: i64,
    via: SaleMethod,
    new_current: Option<i64>,
    now: DateTime<Utc>,
) -> Result<Uuid> {
    tx.execute(
        "UPDATE posts
         SET status = 'sold', sold_to = ?1, sold_at = ?2, sold_price = ?3, sold_via = ?4,
             current_price = COALESCE(?5, current_price)
         WHERE id = ?6",
        rusqlite::params![
            buyer_id.to_string(),
            ts(now),
            price,
            via.as_str(),
            new_current,
            post_id.to_string(),
        ],
    )?;
    deactivate_chat(tx, post_id)?;

    let sale_chat_id = Uuid::new_v4();
    tx.execute(
        "INSERT INTO sale_chats (id, post_id, buyer_id, seller_id, sale_amount, sale_date)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        rusqlite::params![
            sale_chat_id.to_string(),
            post_id.to_string(),
            buyer_id.to_string(),
            post.owner_id.to_string(),
            price,
            ts(now),
        ],
    )?;
    Ok(sale_chat_id)
}

fn deactivate_chat(tx: &Transaction<'_>, post_id: Uuid) -> Result<()> {
    tx.execute(
        "INSERT INTO chats (post_id, is_active) VALUES (?1, 0)
         ON CONFLICT(post_id) DO UPDATE SET is_active = 0",
        [post_id.to_string()],
    )?;
    Ok(())
}

fn sale_outcome(
    post_id: Uuid,
    post: &PostSnapshot,
    buyer_id: Uuid,
    price: i64,
    via: SaleMethod,
    sale_chat_id: Uuid,
) -> SaleOutcome {
    SaleOutcome {
        post_id,
        post_title: post.title.clone(),
        seller_id: post.owner_id,
        buyer_id,
        price,
        via,
        sale_chat_id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gavel_db::posts::NewPost;
    use std::sync::Arc;

    fn user(db: &Database, name: &str) -> Uuid {
        let id = Uuid::new_v4();
        db.create_user(id, name, "h", None, Utc::now()).unwrap();
        id
    }

    fn listing(db: &Database, owner: Uuid, buy_now: Option<i64>, ends_in_secs: i64) -> Uuid {
        let id = Uuid::new_v4();
        let now = Utc::now();
        db.insert_post(&NewPost {
            id,
            user_id: owner,
            title: "vintage lamp",
            description: "works",
            starting_price: 1000,
            buy_now_price: buy_now,
            auction_end_time: now + Duration::seconds(ends_in_secs),
            created_at: now,
        })
        .unwrap();
        id
    }

    #[test]
    fn higher_bid_takes_the_winning_flag() {
        let db = Database::open_in_memory().unwrap();
        let owner = user(&db, "seller");
        let alice = user(&db, "alice");
        let bob = user(&db, "bob");
        let post = listing(&db, owner, None, 3600);

        let first = place_bid(&db, post, alice, 1100, Utc::now()).unwrap();
        assert!(first.previous_winner.is_none());

        let second = place_bid(&db, post, bob, 1200, Utc::now()).unwrap();
        assert_eq!(second.previous_winner, Some(alice));
        assert_eq!(second.current_price, 1200);

        // Exactly one winning bid, and it is Bob's.
        let winner = db.winning_bid(post).unwrap().unwrap();
        assert_eq!(winner.bidder_id, bob);
        let all = db.bids_for_post(post).unwrap();
        assert_eq!(all.iter().filter(|b| b.is_winning).count(), 1);
    }

    #[test]
    fn bid_rejections() {
        let db = Database::open_in_memory().unwrap();
        let owner = user(&db, "seller");
        let alice = user(&db, "alice");
        let post = listing(&db, owner, None, 3600);

        assert!(matches!(
            place_bid(&db, post, owner, 1100, Utc::now()),
            Err(TransitionError::OwnAuction)
        ));
        assert!(matches!(
            place_bid(&db, post, alice, 900, Utc::now()),
            Err(TransitionError::BelowStarting(1000))
        ));
        assert!(matches!(
            place_bid(&db, post, alice, 1000, Utc::now()),
            Err(TransitionError::LowBid(1000))
        ));

        place_bid(&db, post, alice, 1500, Utc::now()).unwrap();
        assert!(matches!(
            place_bid(&db, post, alice, 1500, Utc::now()),
            Err(TransitionError::LowBid(1500))
        ));

        let ended = listing(&db, owner, None, -60);
        assert!(matches!(
            place_bid(&db, ended, alice, 1100, Utc::now()),
            Err(TransitionError::Expired)
        ));
    }

    #[test]
    fn equal_concurrent_bids_accept_exactly_one() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let owner = user(&db, "seller");
        let alice = user(&db, "alice");
        let bob = user(&db, "bob");
        let post = listing(&db, owner, None, 3600);

        let handles: Vec<_> = [alice, bob]
            .into_iter()
            .map(|bidder| {
                let db = Arc::clone(&db);
                std::thread::spawn(move || place_bid(&db, post, bidder, 1100, Utc::now()))
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        let accepted = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(accepted, 1);
        assert!(
            results
                .iter()
                .any(|r| matches!(r, Err(TransitionError::LowBid(1100))))
        );
        assert_eq!(db.bids_for_post(post).unwrap().len(), 1);
    }

    #[test]
    fn buy_now_sells_immediately_even_with_lower_bids() {
        let db = Database::open_in_memory().unwrap();
        let owner = user(&db, "seller");
        let alice = user(&db, "alice");
        let bob = user(&db, "bob");
        let post = listing(&db, owner, Some(5000), 3600);

        place_bid(&db, post, alice, 1100, Utc::now()).unwrap();

        let sale = buy_now(&db, post, bob, Utc::now()).unwrap();
        assert_eq!(sale.price, 5000);
        assert_eq!(sale.buyer_id, bob);
        assert_eq!(sale.via, SaleMethod::BuyNow);

        let p = db.get_post(post).unwrap().unwrap();
        assert_eq!(p.status, AuctionStatus::Sold);
        assert_eq!(p.sold_price, Some(5000));
        assert_eq!(p.current_price, 5000);
        assert!(!db.chat_is_active(post).unwrap());
        assert!(db.sale_chat(sale.sale_chat_id).unwrap().is_some());

        // Alice's bid lost the race; further bids are refused.
        assert!(matches!(
            place_bid(&db, post, alice, 6000, Utc::now()),
            Err(TransitionError::NotLive(AuctionStatus::Sold))
        ));
    }

    #[test]
    fn buy_now_guards() {
        let db = Database::open_in_memory().unwrap();
        let owner = user(&db, "seller");
        let alice = user(&db, "alice");
        let no_price = listing(&db, owner, None, 3600);
        let priced = listing(&db, owner, Some(5000), 3600);

        assert!(matches!(
            buy_now(&db, no_price, alice, Utc::now()),
            Err(TransitionError::NoBuyNow)
        ));
        assert!(matches!(
            buy_now(&db, priced, owner, Utc::now()),
            Err(TransitionError::OwnPurchase)
        ));
    }

    #[test]
    fn end_auction_without_bids_expires_once() {
        let db = Database::open_in_memory().unwrap();
        let owner = user(&db, "seller");
        let post = listing(&db, owner, None, -60);

        let end = end_auction(&db, post, Utc::now()).unwrap();
        assert!(matches!(end, AuctionEnd::Expired { .. }));
        assert!(!db.chat_is_active(post).unwrap());

        // Second finalization attempt observes the expired status.
        assert!(matches!(
            end_auction(&db, post, Utc::now()),
            Err(TransitionError::NotLive(AuctionStatus::Expired))
        ));
    }

    #[test]
    fn end_auction_with_winning_bid_sells_to_winner() {
        let db = Database::open_in_memory().unwrap();
        let owner = user(&db, "seller");
        let alice = user(&db, "alice");
        let post = listing(&db, owner, None, 1);

        place_bid(&db, post, alice, 2000, Utc::now()).unwrap();

        let later = Utc::now() + Duration::seconds(5);
        let end = end_auction(&db, post, later).unwrap();
        let AuctionEnd::Sold(sale) = end else {
            panic!("expected sale");
        };
        assert_eq!(sale.buyer_id, alice);
        assert_eq!(sale.price, 2000);

        let p = db.get_post(post).unwrap().unwrap();
        assert_eq!(p.sold_to, Some(alice));
        assert_eq!(p.sold_via, Some(SaleMethod::Auction));
    }

    #[test]
    fn sell_to_highest_requires_a_bid() {
        let db = Database::open_in_memory().unwrap();
        let owner = user(&db, "seller");
        let alice = user(&db, "alice");
        let post = listing(&db, owner, None, 3600);

        assert!(matches!(
            sell_to_highest(&db, post, owner, Utc::now()),
            Err(TransitionError::NoBids)
        ));
        assert!(matches!(
            sell_to_highest(&db, post, alice, Utc::now()),
            Err(TransitionError::NotOwner)
        ));

        place_bid(&db, post, alice, 1500, Utc::now()).unwrap();
        let sale = sell_to_highest(&db, post, owner, Utc::now()).unwrap();
        assert_eq!(sale.buyer_id, alice);
        assert_eq!(sale.price, 1500);
    }

    #[test]
    fn sell_to_bidder_accepts_agreed_amount() {
        let db = Database::open_in_memory().unwrap();
        let owner = user(&db, "seller");
        let alice = user(&db, "alice");
        let bob = user(&db, "bob");
        let post = listing(&db, owner, None, 3600);

        place_bid(&db, post, alice, 1500, Utc::now()).unwrap();

        assert!(matches!(
            sell_to_bidder(&db, post, owner, bob, 1400, Utc::now()),
            Err(TransitionError::BidderHasNoBid)
        ));

        let sale = sell_to_bidder(&db, post, owner, alice, 1400, Utc::now()).unwrap();
        assert_eq!(sale.price, 1400);
        assert_eq!(sale.buyer_id, alice);
    }

    #[test]
    fn explicit_sales_reject_ended_auctions() {
        let db = Database::open_in_memory().unwrap();
        let owner = user(&db, "seller");
        let alice = user(&db, "alice");
        let post = listing(&db, owner, None, 60);

        place_bid(&db, post, alice, 1500, Utc::now()).unwrap();

        // An hour past the end time, both sale paths must refuse.
        let later = Utc::now() + Duration::hours(1);
        assert!(matches!(
            sell_to_highest(&db, post, owner, later),
            Err(TransitionError::Expired)
        ));
        assert!(matches!(
            sell_to_bidder(&db, post, owner, alice, 1500, later),
            Err(TransitionError::Expired)
        ));

        // The rejection wrote nothing.
        let p = db.get_post(post).unwrap().unwrap();
        assert_eq!(p.status, AuctionStatus::Live);
        assert_eq!(p.sold_to, None);
    }

    #[test]
    fn cancel_and_reactivate_reset_the_auction() {
        let db = Database::open_in_memory().unwrap();
        let owner = user(&db, "seller");
        let alice = user(&db, "alice");
        let post = listing(&db, owner, None, 3600);

        place_bid(&db, post, alice, 2000, Utc::now()).unwrap();
        cancel(&db, post, owner).unwrap();

        let p = db.get_post(post).unwrap().unwrap();
        assert_eq!(p.status, AuctionStatus::Cancelled);
        // Cancellation alone does not disable the chat row.
        assert!(db.chat_is_active(post).unwrap());

        assert!(matches!(
            reactivate(&db, post, owner, 0.0, Utc::now()),
            Err(TransitionError::InvalidDuration)
        ));

        let now = Utc::now();
        let end = reactivate(&db, post, owner, 2.0, now).unwrap();
        let p = db.get_post(post).unwrap().unwrap();
        assert_eq!(p.status, AuctionStatus::Live);
        assert_eq!(p.current_price, p.starting_price);
        assert_eq!(p.auction_end_time, end);
        assert!(end > now + Duration::minutes(119));
    }

    #[test]
    fn delete_refuses_posts_with_bids() {
        let db = Database::open_in_memory().unwrap();
        let owner = user(&db, "seller");
        let alice = user(&db, "alice");
        let with_bids = listing(&db, owner, None, 3600);
        let empty = listing(&db, owner, None, 3600);

        place_bid(&db, with_bids, alice, 1100, Utc::now()).unwrap();
        assert!(matches!(
            delete(&db, with_bids, owner),
            Err(TransitionError::HasBids)
        ));

        delete(&db, empty, owner).unwrap();
        assert!(db.get_post(empty).unwrap().is_none());
    }

    #[test]
    fn update_edits_live_listings_only() {
        let db = Database::open_in_memory().unwrap();
        let owner = user(&db, "seller");
        let post = listing(&db, owner, None, 3600);

        update(
            &db,
            post,
            owner,
            &UpdatePostRequest {
                title: Some("brass lamp".into()),
                description: None,
                buy_now_price: Some(4000),
            },
        )
        .unwrap();
        let p = db.get_post(post).unwrap().unwrap();
        assert_eq!(p.title, "brass lamp");
        assert_eq!(p.buy_now_price, Some(4000));

        assert!(matches!(
            update(
                &db,
                post,
                owner,
                &UpdatePostRequest {
                    buy_now_price: Some(500),
                    ..Default::default()
                }
            ),
            Err(TransitionError::BuyNowTooLow)
        ));

        cancel(&db, post, owner).unwrap();
        assert!(matches!(
            update(&db, post, owner, &UpdatePostRequest::default()),
            Err(TransitionError::NotLive(AuctionStatus::Cancelled))
        ));
    }
}
