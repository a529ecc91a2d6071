use anyhow::Result;
use uuid::Uuid;

use gavel_types::models::{Bid, BidderSummary};

use crate::{Database, OptionalExt, ts_col, uuid_col};

const BID_COLUMNS: &str =
    "b.id, b.post_id, b.bidder_id, u.username, u.avatar_url, b.amount, b.is_winning, b.created_at";

impl Database {
    /// Bidding history for an auction: highest first, newest breaking ties.
    pub fn bids_for_post(&self, post_id: Uuid) -> Result<Vec<Bid>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {BID_COLUMNS} FROM bids b
                 JOIN users u ON b.bidder_id = u.id
                 WHERE b.post_id = ?1
                 ORDER BY b.amount DESC, b.created_at DESC"
            ))?;
            let rows = stmt
                .query_map([post_id.to_string()], bid_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// A user's own bids, newest first.
    pub fn bids_for_user(&self, bidder_id: Uuid) -> Result<Vec<Bid>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {BID_COLUMNS} FROM bids b
                 JOIN users u ON b.bidder_id = u.id
                 WHERE b.bidder_id = ?1
                 ORDER BY b.created_at DESC"
            ))?;
            let rows = stmt
                .query_map([bidder_id.to_string()], bid_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn bid_by_id(&self, id: Uuid) -> Result<Option<Bid>> {
        self.with_conn(|conn| {
            conn.prepare(&format!(
                "SELECT {BID_COLUMNS} FROM bids b
                 JOIN users u ON b.bidder_id = u.id
                 WHERE b.id = ?1"
            ))?
            .query_row([id.to_string()], bid_row)
            .optional()
        })
    }

    /// The single winning bid for an auction, if any bids exist.
    pub fn winning_bid(&self, post_id: Uuid) -> Result<Option<Bid>> {
        self.with_conn(|conn| {
            conn.prepare(&format!(
                "SELECT {BID_COLUMNS} FROM bids b
                 JOIN users u ON b.bidder_id = u.id
                 WHERE b.post_id = ?1 AND b.is_winning = 1"
            ))?
            .query_row([post_id.to_string()], bid_row)
            .optional()
        })
    }

    /// Per-bidder rollup for the owner: highest bid, bid count, most
    /// recent bid time, ordered by highest bid descending.
    pub fn bidder_summaries(&self, post_id: Uuid) -> Result<Vec<BidderSummary>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT b.bidder_id, u.username, u.avatar_url,
                        MAX(b.amount), COUNT(*), MAX(b.created_at)
                 FROM bids b
                 JOIN users u ON b.bidder_id = u.id
                 WHERE b.post_id = ?1
                 GROUP BY b.bidder_id
                 ORDER BY MAX(b.amount) DESC",
            )?;
            let rows = stmt
                .query_map([post_id.to_string()], |row| {
                    Ok(BidderSummary {
                        bidder_id: uuid_col(row, 0)?,
                        username: row.get(1)?,
                        avatar_url: row.get(2)?,
                        highest_bid: row.get(3)?,
                        total_bids: row.get(4)?,
                        last_bid_time: ts_col(row, 5)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn has_bids(&self, post_id: Uuid) -> Result<bool> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM bids WHERE post_id = ?1",
                [post_id.to_string()],
                |row| row.get(0),
            )?;
            Ok(count > 0)
        })
    }
}

fn bid_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Bid> {
    Ok(Bid {
        id: uuid_col(row, 0)?,
        post_id: uuid_col(row, 1)?,
        bidder_id: uuid_col(row, 2)?,
        bidder_username: row.get(3)?,
        bidder_avatar_url: row.get(4)?,
        amount: row.get(5)?,
        is_winning: row.get::<_, i64>(6)? != 0,
        created_at: ts_col(row, 7)?,
    })
}
