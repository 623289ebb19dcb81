use crate::db::Database;
use crate::error::AppResult;

/// Read-only view over the platform's connections table. Ownership of that
/// table lives elsewhere; relevance scoring only needs the accepted edge.
pub struct ConnectionService<'a> {
    db: &'a Database,
}

impl<'a> ConnectionService<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Whether an accepted connection exists between the two users, in
    /// either direction.
    pub async fn are_connected(&self, user_a: &str, user_b: &str) -> AppResult<bool> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM connection
            WHERE status = 'accepted'
              AND ((requester_id = $1 AND recipient_id = $2)
                OR (requester_id = $2 AND recipient_id = $1))
            "#,
        )
        .bind(user_a)
        .bind(user_b)
        .fetch_one(self.db.pool())
        .await?;
        Ok(count > 0)
    }
}
