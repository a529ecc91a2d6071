use anyhow::Result;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use gavel_types::models::Notification;

use crate::{Database, opt_uuid_col, ts, ts_col, uuid_col};

impl Database {
    pub fn create_notification(
        &self,
        user_id: Uuid,
        message: &str,
        post_id: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Result<Uuid> {
        let id = Uuid::new_v4();
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO notifications (id, user_id, body, post_id, is_read, created_at)
                 VALUES (?1, ?2, ?3, ?4, 0, ?5)",
                rusqlite::params![
                    id.to_string(),
                    user_id.to_string(),
                    message,
                    post_id.map(|p| p.to_string()),
                    ts(now),
                ],
            )?;
            Ok(())
        })?;
        Ok(id)
    }

    /// Newest first.
    pub fn notifications_for_user(&self, user_id: Uuid) -> Result<Vec<Notification>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, user_id, body, post_id, is_read, created_at
                 FROM notifications
                 WHERE user_id = ?1
                 ORDER BY created_at DESC",
            )?;
            let rows = stmt
                .query_map([user_id.to_string()], |row| {
                    Ok(Notification {
                        id: uuid_col(row, 0)?,
                        user_id: uuid_col(row, 1)?,
                        message: row.get(2)?,
                        post_id: opt_uuid_col(row, 3)?,
                        is_read: row.get::<_, i64>(4)? != 0,
                        created_at: ts_col(row, 5)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Scoped to the owner so one user cannot mark another's notification.
    pub fn mark_notification_read(&self, id: Uuid, user_id: Uuid) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let n = conn.execute(
                "UPDATE notifications SET is_read = 1 WHERE id = ?1 AND user_id = ?2",
                rusqlite::params![id.to_string(), user_id.to_string()],
            )?;
            Ok(n > 0)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notifications_are_per_user() {
        let db = Database::open_in_memory().unwrap();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        db.create_user(alice, "alice", "h", None, Utc::now())
            .unwrap();
        db.create_user(bob, "bob", "h", None, Utc::now()).unwrap();

        let id = db
            .create_notification(alice, "New bid on your auction", None, Utc::now())
            .unwrap();

        assert_eq!(db.notifications_for_user(alice).unwrap().len(), 1);
        assert!(db.notifications_for_user(bob).unwrap().is_empty());

        // Bob cannot mark Alice's notification read.
        assert!(!db.mark_notification_read(id, bob).unwrap());
        assert!(db.mark_notification_read(id, alice).unwrap());

        let list = db.notifications_for_user(alice).unwrap();
        assert!(list[0].is_read);
    }
}
