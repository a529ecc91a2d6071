use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use uuid::Uuid;

use gavel_types::models::{AuctionStatus, ChatMessage, SaleChat, SaleMessage, UserPublic};

use crate::posts::status_col;
use crate::{Database, OptionalExt, ts, ts_col, uuid_col};

/// Why a chat write was refused. Everything except `Store` is a clean
/// rejection with no state change.
#[derive(Debug, thiserror::Error)]
pub enum ChatWriteError {
    #[error("Post not found")]
    PostNotFound,
    #[error("Chat is disabled. Auction status: {0}")]
    NotLive(AuctionStatus),
    #[error("Chat has been disabled for this auction")]
    Inactive,
    #[error("Sale chat not found")]
    ChatNotFound,
    #[error("Not authorized for this sale chat")]
    NotParticipant,
    #[error("store error: {0}")]
    Store(#[from] anyhow::Error),
}

/// Cheap header for membership checks without loading messages.
pub struct SaleChatHeader {
    pub id: Uuid,
    pub post_id: Uuid,
    pub buyer_id: Uuid,
    pub seller_id: Uuid,
}

impl SaleChatHeader {
    pub fn participant(&self, user_id: Uuid) -> bool {
        self.buyer_id == user_id || self.seller_id == user_id
    }

    /// The counterparty of `user_id` in this chat.
    pub fn other_party(&self, user_id: Uuid) -> Uuid {
        if self.buyer_id == user_id {
            self.seller_id
        } else {
            self.buyer_id
        }
    }
}

impl Database {
    /// A missing chat row counts as active; only a sold/expired transition
    /// flips it off.
    pub fn chat_is_active(&self, post_id: Uuid) -> Result<bool> {
        self.with_conn(|conn| {
            let active: Option<i64> = conn
                .query_row(
                    "SELECT is_active FROM chats WHERE post_id = ?1",
                    [post_id.to_string()],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(active.map_or(true, |a| a != 0))
        })
    }

    /// Validate-then-insert for auction chat, atomically under the
    /// connection lock: the post must still be live and the chat active at
    /// the instant the message is stored.
    pub fn append_auction_message(
        &self,
        post_id: Uuid,
        sender: &UserPublic,
        body: &str,
        now: DateTime<Utc>,
    ) -> std::result::Result<ChatMessage, ChatWriteError> {
        let res = self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let status: Option<AuctionStatus> = tx
                .prepare("SELECT status FROM posts WHERE id = ?1")?
                .query_row([post_id.to_string()], |row| status_col(row, 0))
                .optional()?;

            let status = match status {
                None => return Ok(Err(ChatWriteError::PostNotFound)),
                Some(s) => s,
            };
            if status != AuctionStatus::Live {
                return Ok(Err(ChatWriteError::NotLive(status)));
            }

            let active: Option<i64> = tx
                .prepare("SELECT is_active FROM chats WHERE post_id = ?1")?
                .query_row([post_id.to_string()], |row| row.get(0))
                .optional()?;
            if active == Some(0) {
                return Ok(Err(ChatWriteError::Inactive));
            }

            tx.execute(
                "INSERT OR IGNORE INTO chats (post_id, is_active) VALUES (?1, 1)",
                [post_id.to_string()],
            )?;

            let id = Uuid::new_v4();
            tx.execute(
                "INSERT INTO chat_messages (id, post_id, user_id, body, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![
                    id.to_string(),
                    post_id.to_string(),
                    sender.id.to_string(),
                    body,
                    ts(now),
                ],
            )?;
            tx.commit()?;

            Ok(Ok(ChatMessage {
                id,
                post_id,
                user_id: sender.id,
                username: sender.username.clone(),
                avatar_url: sender.avatar_url.clone(),
                message: body.to_string(),
                timestamp: now,
            }))
        });

        match res {
            Ok(inner) => inner,
            Err(e) => Err(ChatWriteError::Store(e)),
        }
    }

    /// Chat history oldest-first, plus the total count.
    pub fn chat_messages(
        &self,
        post_id: Uuid,
        limit: u32,
        offset: u32,
    ) -> Result<(Vec<ChatMessage>, i64)> {
        self.with_conn(|conn| {
            let total: i64 = conn.query_row(
                "SELECT COUNT(*) FROM chat_messages WHERE post_id = ?1",
                [post_id.to_string()],
                |row| row.get(0),
            )?;

            let mut stmt = conn.prepare(
                "SELECT m.id, m.post_id, m.user_id, u.username, u.avatar_url,
                        m.body, m.created_at
                 FROM chat_messages m
                 JOIN users u ON m.user_id = u.id
                 WHERE m.post_id = ?1
                 ORDER BY m.created_at ASC
                 LIMIT ?2 OFFSET ?3",
            )?;
            let rows = stmt
                .query_map(
                    rusqlite::params![post_id.to_string(), limit, offset],
                    |row| {
                        Ok(ChatMessage {
                            id: uuid_col(row, 0)?,
                            post_id: uuid_col(row, 1)?,
                            user_id: uuid_col(row, 2)?,
                            username: row.get(3)?,
                            avatar_url: row.get(4)?,
                            message: row.get(5)?,
                            timestamp: ts_col(row, 6)?,
                        })
                    },
                )?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok((rows, total))
        })
    }

    // -- Sale chats --

    pub fn sale_chat_header(&self, chat_id: Uuid) -> Result<Option<SaleChatHeader>> {
        self.with_conn(|conn| {
            conn.prepare("SELECT id, post_id, buyer_id, seller_id FROM sale_chats WHERE id = ?1")?
                .query_row([chat_id.to_string()], |row| {
                    Ok(SaleChatHeader {
                        id: uuid_col(row, 0)?,
                        post_id: uuid_col(row, 1)?,
                        buyer_id: uuid_col(row, 2)?,
                        seller_id: uuid_col(row, 3)?,
                    })
                })
                .optional()
        })
    }

    pub fn sale_chat(&self, chat_id: Uuid) -> Result<Option<SaleChat>> {
        let header = self.with_conn(|conn| query_sale_chat(conn, "sc.id = ?1", &chat_id))?;
        self.attach_messages(header)
    }

    /// The sale chat created for a given post, if the post has been sold.
    pub fn sale_chat_by_post(&self, post_id: Uuid) -> Result<Option<SaleChat>> {
        let header = self.with_conn(|conn| query_sale_chat(conn, "sc.post_id = ?1", &post_id))?;
        self.attach_messages(header)
    }

    /// Every sale chat the user participates in, newest sale first.
    pub fn sale_chats_for_user(&self, user_id: Uuid) -> Result<Vec<SaleChat>> {
        let ids = self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id FROM sale_chats
                 WHERE buyer_id = ?1 OR seller_id = ?1
                 ORDER BY sale_date DESC",
            )?;
            let ids = stmt
                .query_map([user_id.to_string()], |row| uuid_col(row, 0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(ids)
        })?;

        let mut chats = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(chat) = self.sale_chat(id)? {
                chats.push(chat);
            }
        }
        Ok(chats)
    }

    /// Membership-checked insert into a sale chat.
    pub fn append_sale_message(
        &self,
        chat_id: Uuid,
        sender: &UserPublic,
        body: &str,
        now: DateTime<Utc>,
    ) -> std::result::Result<SaleMessage, ChatWriteError> {
        let res = self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let parties: Option<(String, String)> = tx
                .prepare("SELECT buyer_id, seller_id FROM sale_chats WHERE id = ?1")?
                .query_row([chat_id.to_string()], |row| {
                    Ok((row.get(0)?, row.get(1)?))
                })
                .optional()?;

            let (buyer, seller) = match parties {
                None => return Ok(Err(ChatWriteError::ChatNotFound)),
                Some(p) => p,
            };
            let sender_id = sender.id.to_string();
            if sender_id != buyer && sender_id != seller {
                return Ok(Err(ChatWriteError::NotParticipant));
            }

            let id = Uuid::new_v4();
            tx.execute(
                "INSERT INTO sale_chat_messages (id, chat_id, sender_id, body, is_read, created_at)
                 VALUES (?1, ?2, ?3, ?4, 0, ?5)",
                rusqlite::params![id.to_string(), chat_id.to_string(), sender_id, body, ts(now)],
            )?;
            tx.commit()?;

            Ok(Ok(SaleMessage {
                id,
                chat_id,
                sender_id: sender.id,
                username: sender.username.clone(),
                avatar_url: sender.avatar_url.clone(),
                message: body.to_string(),
                is_read: false,
                timestamp: now,
            }))
        });

        match res {
            Ok(inner) => inner,
            Err(e) => Err(ChatWriteError::Store(e)),
        }
    }

    /// Mark the counterparty's messages read. Returns the number updated.
    pub fn mark_sale_messages_read(&self, chat_id: Uuid, reader_id: Uuid) -> Result<usize> {
        self.with_conn_mut(|conn| {
            let n = conn.execute(
                "UPDATE sale_chat_messages SET is_read = 1
                 WHERE chat_id = ?1 AND sender_id != ?2 AND is_read = 0",
                rusqlite::params![chat_id.to_string(), reader_id.to_string()],
            )?;
            Ok(n)
        })
    }

    fn attach_messages(&self, chat: Option<SaleChat>) -> Result<Option<SaleChat>> {
        let Some(mut chat) = chat else {
            return Ok(None);
        };
        chat.messages = self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT m.id, m.chat_id, m.sender_id, u.username, u.avatar_url,
                        m.body, m.is_read, m.created_at
                 FROM sale_chat_messages m
                 JOIN users u ON m.sender_id = u.id
                 WHERE m.chat_id = ?1
                 ORDER BY m.created_at ASC",
            )?;
            let rows = stmt
                .query_map([chat.id.to_string()], |row| {
                    Ok(SaleMessage {
                        id: uuid_col(row, 0)?,
                        chat_id: uuid_col(row, 1)?,
                        sender_id: uuid_col(row, 2)?,
                        username: row.get(3)?,
                        avatar_url: row.get(4)?,
                        message: row.get(5)?,
                        is_read: row.get::<_, i64>(6)? != 0,
                        timestamp: ts_col(row, 7)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })?;
        Ok(Some(chat))
    }
}

fn query_sale_chat(conn: &Connection, where_clause: &str, key: &Uuid) -> Result<Option<SaleChat>> {
    conn.prepare(&format!(
        "SELECT sc.id, sc.post_id, p.title, sc.sale_amount, sc.sale_date,
                b.id, b.username, b.avatar_url,
                s.id, s.username, s.avatar_url
         FROM sale_chats sc
         JOIN posts p ON sc.post_id = p.id
         JOIN users b ON sc.buyer_id = b.id
         JOIN users s ON sc.seller_id = s.id
         WHERE {where_clause}"
    ))?
    .query_row([key.to_string()], |row| {
        Ok(SaleChat {
            id: uuid_col(row, 0)?,
            post_id: uuid_col(row, 1)?,
            post_title: row.get(2)?,
            sale_amount: row.get(3)?,
            sale_date: ts_col(row, 4)?,
            buyer: UserPublic {
                id: uuid_col(row, 5)?,
                username: row.get(6)?,
                avatar_url: row.get(7)?,
            },
            seller: UserPublic {
                id: uuid_col(row, 8)?,
                username: row.get(9)?,
                avatar_url: row.get(10)?,
            },
            messages: Vec::new(),
        })
    })
    .optional()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::posts::NewPost;
    use chrono::Duration;

    fn seed(db: &Database) -> (Uuid, Uuid, Uuid) {
        let owner = Uuid::new_v4();
        let bidder = Uuid::new_v4();
        db.create_user(owner, "seller", "h", None, Utc::now())
            .unwrap();
        db.create_user(bidder, "buyer", "h", Some("/b.png"), Utc::now())
            .unwrap();
        let post = Uuid::new_v4();
        db.insert_post(&NewPost {
            id: post,
            user_id: owner,
            title: "lamp",
            description: "works",
            starting_price: 1000,
            buy_now_price: None,
            auction_end_time: Utc::now() + Duration::hours(1),
            created_at: Utc::now(),
        })
        .unwrap();
        (owner, bidder, post)
    }

    fn public(id: Uuid, name: &str) -> UserPublic {
        UserPublic {
            id,
            username: name.into(),
            avatar_url: None,
        }
    }

    #[test]
    fn message_append_requires_live_post() {
        let db = Database::open_in_memory().unwrap();
        let (_, bidder, post) = seed(&db);

        let msg = db
            .append_auction_message(post, &public(bidder, "buyer"), "hi", Utc::now())
            .unwrap();
        assert_eq!(msg.message, "hi");

        db.with_conn_mut(|conn| {
            conn.execute(
                "UPDATE posts SET status = 'sold' WHERE id = ?1",
                [post.to_string()],
            )?;
            Ok(())
        })
        .unwrap();

        let err = db
            .append_auction_message(post, &public(bidder, "buyer"), "hello?", Utc::now())
            .unwrap_err();
        assert!(matches!(err, ChatWriteError::NotLive(AuctionStatus::Sold)));
    }

    #[test]
    fn inactive_chat_rejects_messages_even_when_live() {
        let db = Database::open_in_memory().unwrap();
        let (_, bidder, post) = seed(&db);

        db.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO chats (post_id, is_active) VALUES (?1, 0)",
                [post.to_string()],
            )?;
            Ok(())
        })
        .unwrap();

        let err = db
            .append_auction_message(post, &public(bidder, "buyer"), "hi", Utc::now())
            .unwrap_err();
        assert!(matches!(err, ChatWriteError::Inactive));
    }

    #[test]
    fn missing_chat_row_counts_as_active() {
        let db = Database::open_in_memory().unwrap();
        let (_, _, post) = seed(&db);
        assert!(db.chat_is_active(post).unwrap());
    }

    #[test]
    fn sale_chat_membership_is_enforced() {
        let db = Database::open_in_memory().unwrap();
        let (owner, bidder, post) = seed(&db);
        let stranger = Uuid::new_v4();
        db.create_user(stranger, "stranger", "h", None, Utc::now())
            .unwrap();

        let chat_id = Uuid::new_v4();
        db.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO sale_chats (id, post_id, buyer_id, seller_id, sale_amount, sale_date)
                 VALUES (?1, ?2, ?3, ?4, 2000, ?5)",
                rusqlite::params![
                    chat_id.to_string(),
                    post.to_string(),
                    bidder.to_string(),
                    owner.to_string(),
                    ts(Utc::now()),
                ],
            )?;
            Ok(())
        })
        .unwrap();

        let err = db
            .append_sale_message(chat_id, &public(stranger, "stranger"), "let me in", Utc::now())
            .unwrap_err();
        assert!(matches!(err, ChatWriteError::NotParticipant));

        db.append_sale_message(chat_id, &public(bidder, "buyer"), "when can I pick up?", Utc::now())
            .unwrap();
        db.append_sale_message(chat_id, &public(owner, "seller"), "tomorrow", Utc::now())
            .unwrap();

        let chat = db.sale_chat(chat_id).unwrap().unwrap();
        assert_eq!(chat.messages.len(), 2);
        assert_eq!(chat.buyer.username, "buyer");

        // Reader marks the counterparty's messages read, not their own.
        let n = db.mark_sale_messages_read(chat_id, bidder).unwrap();
        assert_eq!(n, 1);
    }
}
