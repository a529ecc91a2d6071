use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use uuid::Uuid;

use gavel_types::models::UserPublic;

use crate::{Database, OptionalExt, ts, ts_col, uuid_col};

/// Full user row including the password hash. Kept off the wire; the API
/// layer only ever exposes [`UserPublic`].
pub struct UserRow {
    pub id: Uuid,
    pub username: String,
    pub password: String,
    pub avatar_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Database {
    pub fn create_user(
        &self,
        id: Uuid,
        username: &str,
        password_hash: &str,
        avatar_url: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO users (id, username, password, avatar_url, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![id.to_string(), username, password_hash, avatar_url, ts(now)],
            )?;
            Ok(())
        })
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            conn.prepare(
                "SELECT id, username, password, avatar_url, created_at
                 FROM users WHERE username = ?1",
            )?
            .query_row([username], user_row)
            .optional()
        })
    }

    pub fn get_user_by_id(&self, id: Uuid) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user_by_id(conn, id))
    }

    pub fn get_user_public(&self, id: Uuid) -> Result<Option<UserPublic>> {
        Ok(self.get_user_by_id(id)?.map(|row| UserPublic {
            id: row.id,
            username: row.username,
            avatar_url: row.avatar_url,
        }))
    }
}

fn query_user_by_id(conn: &Connection, id: Uuid) -> Result<Option<UserRow>> {
    conn.prepare(
        "SELECT id, username, password, avatar_url, created_at
         FROM users WHERE id = ?1",
    )?
    .query_row([id.to_string()], user_row)
    .optional()
}

fn user_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: uuid_col(row, 0)?,
        username: row.get(1)?,
        password: row.get(2)?,
        avatar_url: row.get(3)?,
        created_at: ts_col(row, 4)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_and_fetch_user() {
        let db = Database::open_in_memory().unwrap();
        let id = Uuid::new_v4();
        db.create_user(id, "alice", "hash", Some("/a.png"), Utc::now())
            .unwrap();

        let by_name = db.get_user_by_username("alice").unwrap().unwrap();
        assert_eq!(by_name.id, id);
        assert_eq!(by_name.password, "hash");

        let public = db.get_user_public(id).unwrap().unwrap();
        assert_eq!(public.username, "alice");
        assert_eq!(public.avatar_url.as_deref(), Some("/a.png"));

        assert!(db.get_user_by_username("bob").unwrap().is_none());
    }

    #[test]
    fn usernames_are_unique() {
        let db = Database::open_in_memory().unwrap();
        db.create_user(Uuid::new_v4(), "alice", "h1", None, Utc::now())
            .unwrap();
        assert!(
            db.create_user(Uuid::new_v4(), "alice", "h2", None, Utc::now())
                .is_err()
        );
    }
}
