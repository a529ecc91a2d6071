use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use uuid::Uuid;

use gavel_types::api::PostListQuery;
use gavel_types::models::{AuctionStatus, Post, SaleMethod};

use crate::{Database, OptionalExt, opt_ts_col, opt_uuid_col, ts, ts_col, uuid_col};

/// Column list shared by every post query; keep in sync with [`post_row`].
const POST_COLUMNS: &str = "p.id, p.user_id, u.username, p.title, p.description, \
     p.starting_price, p.current_price, p.buy_now_price, p.auction_end_time, \
     p.status, p.sold_to, p.sold_at, p.sold_price, p.sold_via, p.created_at";

pub struct NewPost<'a> {
    pub id: Uuid,
    pub user_id: Uuid,
    pub title: &'a str,
    pub description: &'a str,
    pub starting_price: i64,
    pub buy_now_price: Option<i64>,
    pub auction_end_time: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Database {
    pub fn insert_post(&self, post: &NewPost<'_>) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO posts (id, user_id, title, description, starting_price,
                     current_price, buy_now_price, auction_end_time, status, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 'live', ?9)",
                rusqlite::params![
                    post.id.to_string(),
                    post.user_id.to_string(),
                    post.title,
                    post.description,
                    post.starting_price,
                    post.starting_price, // currentPrice starts at startingPrice
                    post.buy_now_price,
                    ts(post.auction_end_time),
                    ts(post.created_at),
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_post(&self, id: Uuid) -> Result<Option<Post>> {
        self.with_conn(|conn| {
            conn.prepare(&format!(
                "SELECT {POST_COLUMNS} FROM posts p
                 JOIN users u ON p.user_id = u.id
                 WHERE p.id = ?1"
            ))?
            .query_row([id.to_string()], post_row)
            .optional()
        })
    }

    /// Listing with the original controller's filters: by owner, excluding
    /// an owner, by status, or live-and-not-yet-ended only.
    pub fn list_posts(&self, filter: &PostListQuery, now: DateTime<Utc>) -> Result<Vec<Post>> {
        let mut sql = format!(
            "SELECT {POST_COLUMNS} FROM posts p
             JOIN users u ON p.user_id = u.id
             WHERE 1 = 1"
        );
        let mut params: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

        if let Some(user_id) = filter.user_id {
            sql.push_str(" AND p.user_id = ?");
            params.push(Box::new(user_id.to_string()));
        }
        if let Some(exclude) = filter.exclude_user_id {
            sql.push_str(" AND p.user_id != ?");
            params.push(Box::new(exclude.to_string()));
        }
        if let Some(status) = filter.status {
            sql.push_str(" AND p.status = ?");
            params.push(Box::new(status.as_str()));
        }
        if filter.live_only.unwrap_or(false) {
            sql.push_str(" AND p.status = 'live' AND p.auction_end_time > ?");
            params.push(Box::new(ts(now)));
        }
        sql.push_str(" ORDER BY p.created_at DESC");

        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let refs: Vec<&dyn rusqlite::types::ToSql> =
                params.iter().map(|p| p.as_ref()).collect();
            let rows = stmt
                .query_map(refs.as_slice(), post_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Live auctions that have not ended, soonest-ending first.
    pub fn live_posts(&self, now: DateTime<Utc>) -> Result<Vec<Post>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {POST_COLUMNS} FROM posts p
                 JOIN users u ON p.user_id = u.id
                 WHERE p.status = 'live' AND p.auction_end_time > ?1
                 ORDER BY p.auction_end_time ASC"
            ))?;
            let rows = stmt
                .query_map([ts(now)], post_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Snapshot of live auctions whose end time has passed. The sweeper
    /// finalizes exactly this set and nothing else.
    pub fn expired_live_post_ids(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id FROM posts
                 WHERE status = 'live' AND auction_end_time < ?1",
            )?;
            let ids = stmt
                .query_map([ts(now)], |row| uuid_col(row, 0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(ids)
        })
    }
}

pub(crate) fn status_col(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<AuctionStatus> {
    let s: String = row.get(idx)?;
    AuctionStatus::from_db(&s).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Text,
            format!("unknown auction status '{s}'").into(),
        )
    })
}

fn sale_method_col(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<Option<SaleMethod>> {
    let s: Option<String> = row.get(idx)?;
    s.map(|s| {
        SaleMethod::from_db(&s).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                idx,
                Type::Text,
                format!("unknown sale method '{s}'").into(),
            )
        })
    })
    .transpose()
}

fn post_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Post> {
    Ok(Post {
        id: uuid_col(row, 0)?,
        user_id: uuid_col(row, 1)?,
        owner_username: row.get(2)?,
        title: row.get(3)?,
        description: row.get(4)?,
        starting_price: row.get(5)?,
        current_price: row.get(6)?,
        buy_now_price: row.get(7)?,
        auction_end_time: ts_col(row, 8)?,
        status: status_col(row, 9)?,
        sold_to: opt_uuid_col(row, 10)?,
        sold_at: opt_ts_col(row, 11)?,
        sold_price: row.get(12)?,
        sold_via: sale_method_col(row, 13)?,
        created_at: ts_col(row, 14)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn seed_user(db: &Database, name: &str) -> Uuid {
        let id = Uuid::new_v4();
        db.create_user(id, name, "hash", None, Utc::now()).unwrap();
        id
    }

    fn seed_post(db: &Database, owner: Uuid, ends_in_secs: i64) -> Uuid {
        let id = Uuid::new_v4();
        let now = Utc::now();
        db.insert_post(&NewPost {
            id,
            user_id: owner,
            title: "vintage lamp",
            description: "works",
            starting_price: 1000,
            buy_now_price: None,
            auction_end_time: now + Duration::seconds(ends_in_secs),
            created_at: now,
        })
        .unwrap();
        id
    }

    #[test]
    fn insert_sets_current_price_to_starting_price() {
        let db = Database::open_in_memory().unwrap();
        let owner = seed_user(&db, "alice");
        let id = seed_post(&db, owner, 3600);

        let post = db.get_post(id).unwrap().unwrap();
        assert_eq!(post.current_price, post.starting_price);
        assert_eq!(post.status, AuctionStatus::Live);
        assert_eq!(post.owner_username, "alice");
        assert!(post.sold_to.is_none() && post.sold_at.is_none());
    }

    #[test]
    fn list_filters_by_owner_and_liveness() {
        let db = Database::open_in_memory().unwrap();
        let alice = seed_user(&db, "alice");
        let bob = seed_user(&db, "bob");
        seed_post(&db, alice, 3600);
        seed_post(&db, bob, 3600);
        let ended = seed_post(&db, bob, -60);

        let now = Utc::now();
        let mine = db
            .list_posts(
                &PostListQuery {
                    user_id: Some(alice),
                    ..Default::default()
                },
                now,
            )
            .unwrap();
        assert_eq!(mine.len(), 1);

        let not_mine = db
            .list_posts(
                &PostListQuery {
                    exclude_user_id: Some(alice),
                    ..Default::default()
                },
                now,
            )
            .unwrap();
        assert_eq!(not_mine.len(), 2);

        let live = db
            .list_posts(
                &PostListQuery {
                    live_only: Some(true),
                    ..Default::default()
                },
                now,
            )
            .unwrap();
        assert_eq!(live.len(), 2);
        assert!(live.iter().all(|p| p.id != ended));
    }

    #[test]
    fn sweeper_snapshot_selects_only_overdue_live_posts() {
        let db = Database::open_in_memory().unwrap();
        let owner = seed_user(&db, "alice");
        let overdue = seed_post(&db, owner, -60);
        seed_post(&db, owner, 3600);

        let ids = db.expired_live_post_ids(Utc::now()).unwrap();
        assert_eq!(ids, vec![overdue]);
    }
}
