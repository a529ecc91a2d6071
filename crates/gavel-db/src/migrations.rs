use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id          TEXT PRIMARY KEY,
            username    TEXT NOT NULL UNIQUE,
            password    TEXT NOT NULL,
            avatar_url  TEXT,
            created_at  TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS posts (
            id               TEXT PRIMARY KEY,
            user_id          TEXT NOT NULL REFERENCES users(id),
            title            TEXT NOT NULL,
            description      TEXT NOT NULL,
            starting_price   INTEGER NOT NULL CHECK (starting_price > 0),
            current_price    INTEGER NOT NULL CHECK (current_price >= starting_price),
            buy_now_price    INTEGER,
            auction_end_time TEXT NOT NULL,
            status           TEXT NOT NULL DEFAULT 'live',
            sold_to          TEXT REFERENCES users(id),
            sold_at          TEXT,
            sold_price       INTEGER,
            sold_via         TEXT,
            created_at       TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_posts_status_end
            ON posts(status, auction_end_time);

        CREATE TABLE IF NOT EXISTS bids (
            id          TEXT PRIMARY KEY,
            post_id     TEXT NOT NULL REFERENCES posts(id),
            bidder_id   TEXT NOT NULL REFERENCES users(id),
            amount      INTEGER NOT NULL CHECK (amount > 0),
            is_winning  INTEGER NOT NULL DEFAULT 0,
            created_at  TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_bids_post
            ON bids(post_id, amount DESC, created_at DESC);

        CREATE INDEX IF NOT EXISTS idx_bids_bidder
            ON bids(bidder_id, created_at DESC);

        -- One chat row per auction; a missing row counts as active.
        CREATE TABLE IF NOT EXISTS chats (
            post_id    TEXT PRIMARY KEY REFERENCES posts(id),
            is_active  INTEGER NOT NULL DEFAULT 1
        );

        CREATE TABLE IF NOT EXISTS chat_messages (
            id          TEXT PRIMARY KEY,
            post_id     TEXT NOT NULL REFERENCES chats(post_id),
            user_id     TEXT NOT NULL REFERENCES users(id),
            body        TEXT NOT NULL,
            created_at  TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_chat_messages_post
            ON chat_messages(post_id, created_at);

        CREATE TABLE IF NOT EXISTS sale_chats (
            id          TEXT PRIMARY KEY,
            post_id     TEXT NOT NULL REFERENCES posts(id),
            buyer_id    TEXT NOT NULL REFERENCES users(id),
            seller_id   TEXT NOT NULL REFERENCES users(id),
            sale_amount INTEGER NOT NULL,
            sale_date   TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_sale_chats_post ON sale_chats(post_id);
        CREATE INDEX IF NOT EXISTS idx_sale_chats_buyer ON sale_chats(buyer_id);
        CREATE INDEX IF NOT EXISTS idx_sale_chats_seller ON sale_chats(seller_id);

        CREATE TABLE IF NOT EXISTS sale_chat_messages (
            id          TEXT PRIMARY KEY,
            chat_id     TEXT NOT NULL REFERENCES sale_chats(id),
            sender_id   TEXT NOT NULL REFERENCES users(id),
            body        TEXT NOT NULL,
            is_read     INTEGER NOT NULL DEFAULT 0,
            created_at  TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_sale_chat_messages_chat
            ON sale_chat_messages(chat_id, created_at);

        CREATE TABLE IF NOT EXISTS notifications (
            id          TEXT PRIMARY KEY,
            user_id     TEXT NOT NULL REFERENCES users(id),
            body        TEXT NOT NULL,
            post_id     TEXT,
            is_read     INTEGER NOT NULL DEFAULT 0,
            created_at  TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_notifications_user
            ON notifications(user_id, created_at DESC);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
