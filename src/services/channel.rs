use crate::db::Database;
use crate::error::AppResult;

/// Read-only view over the platform's community channels. Channel CRUD
/// lives elsewhere; topic authorization only needs the membership edge.
pub struct ChannelService<'a> {
    db: &'a Database,
}

impl<'a> ChannelService<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    pub async fn is_member(&self, channel_id: &str, user_id: &str) -> AppResult<bool> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM channel_member WHERE channel_id = $1 AND user_id = $2",
        )
        .bind(channel_id)
        .bind(user_id)
        .fetch_one(self.db.pool())
        .await?;
        Ok(count > 0)
    }
}
