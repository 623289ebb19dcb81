use crate::db::Database;
use crate::error::AppResult;
use crate::models::preferences::{NotificationPreferences, PreferencesRow};
use crate::utils::time::current_timestamp;

pub struct PreferencesService<'a> {
    db: &'a Database,
}

impl<'a> PreferencesService<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Preferences for a user, lazily created with defaults on first
    /// access so later edits and sweeps always find a row.
    pub async fn get(&self, user_id: &str) -> AppResult<NotificationPreferences> {
        let row = sqlx::query_as::<_, PreferencesRow>(
            r#"
            SELECT user_id, CAST(data AS TEXT) as data_str, created_at, updated_at
            FROM notification_preferences WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(self.db.pool())
        .await?;
        match row {
            Some(r) => Ok(r.preferences()),
            None => self.update(user_id, &NotificationPreferences::default()).await,
        }
    }

    pub async fn update(
        &self,
        user_id: &str,
        preferences: &NotificationPreferences,
    ) -> AppResult<NotificationPreferences> {
        let now = current_timestamp();
        sqlx::query(
            r#"
            INSERT INTO notification_preferences (user_id, data, created_at, updated_at)
            VALUES ($1, $2::jsonb, $3, $3)
            ON CONFLICT (user_id) DO UPDATE SET data = EXCLUDED.data, updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(user_id)
        .bind(serde_json::to_string(preferences).unwrap_or_default())
        .bind(now)
        .execute(self.db.pool())
        .await?;
        Ok(preferences.clone())
    }
}
