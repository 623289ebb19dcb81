use std::collections::HashMap;
use uuid::Uuid;

use crate::db::Database;
use crate::error::{AppError, AppResult};
use crate::models::conversation::{Conversation, ConversationForm, CONVERSATION_TYPES};
use crate::utils::time::current_timestamp;

const CONVERSATION_SELECT: &str = r#"
    SELECT id, conversation_type, title,
           CAST(participants AS TEXT) as participants_str,
           last_message_id, last_message_at, message_count,
           CAST(unread_counts AS TEXT) as unread_counts_str,
           connection_strength, is_active, created_at, updated_at
    FROM conversation
"#;

pub struct ConversationService<'a> {
    db: &'a Database,
}

impl<'a> ConversationService<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Create a conversation. The creator is always a participant; direct
    /// conversations between the same two users are deduplicated onto the
    /// existing active record.
    pub async fn create(
        &self,
        creator_id: &str,
        form: &ConversationForm,
    ) -> AppResult<Conversation> {
        let conversation_type = form
            .conversation_type
            .as_deref()
            .unwrap_or("direct")
            .to_string();
        if !CONVERSATION_TYPES.contains(&conversation_type.as_str()) {
            return Err(AppError::Validation(format!(
                "Invalid conversation type: {}",
                conversation_type
            )));
        }

        let mut participants: Vec<String> = form.participants.clone();
        if !participants.iter().any(|p| p == creator_id) {
            participants.push(creator_id.to_string());
        }
        participants.sort();
        participants.dedup();
        if participants.len() < 2 {
            return Err(AppError::Validation(
                "A conversation needs at least two distinct participants".to_string(),
            ));
        }

        if conversation_type == "direct" && participants.len() == 2 {
            if let Some(existing) = self
                .find_direct(&participants[0], &participants[1])
                .await?
            {
                return Ok(existing);
            }
        }

        let now = current_timestamp();
        let id = Uuid::new_v4().to_string();
        let unread: HashMap<String, i64> =
            participants.iter().map(|p| (p.clone(), 0)).collect();

        sqlx::query(
            r#"
            INSERT INTO conversation
                (id, conversation_type, title, participants, unread_counts,
                 message_count, is_active, created_at, updated_at)
            VALUES ($1, $2, $3, $4::jsonb, $5::jsonb, 0, true, $6, $6)
            "#,
        )
        .bind(&id)
        .bind(&conversation_type)
        .bind(&form.title)
        .bind(serde_json::to_string(&participants).unwrap_or_default())
        .bind(serde_json::to_string(&unread).unwrap_or_default())
        .bind(now)
        .execute(self.db.pool())
        .await?;

        tracing::info!("Created {} conversation {}", conversation_type, id);
        self.get_conversation(&id)
            .await?
            .ok_or_else(|| AppError::InternalServerError("Conversation vanished after insert".to_string()))
    }

    async fn find_direct(&self, a: &str, b: &str) -> AppResult<Option<Conversation>> {
        let row = sqlx::query_as::<_, Conversation>(&format!(
            r#"{}
            WHERE conversation_type = 'direct' AND is_active = true
              AND participants @> to_jsonb($1::text) AND participants @> to_jsonb($2::text)
              AND jsonb_array_length(participants) = 2
            LIMIT 1
            "#,
            CONVERSATION_SELECT
        ))
        .bind(a)
        .bind(b)
        .fetch_optional(self.db.pool())
        .await?;
        Ok(row.map(Self::hydrate))
    }

    fn hydrate(mut conversation: Conversation) -> Conversation {
        conversation.parse_participants();
        conversation.parse_unread_counts();
        conversation
    }

    pub async fn get_conversation(&self, id: &str) -> AppResult<Option<Conversation>> {
        let row = sqlx::query_as::<_, Conversation>(&format!(
            "{} WHERE id = $1",
            CONVERSATION_SELECT
        ))
        .bind(id)
        .fetch_optional(self.db.pool())
        .await?;
        Ok(row.map(Self::hydrate))
    }

    /// Active conversations for a user, most recent activity first.
    /// Never-messaged conversations sort last by creation time.
    pub async fn list_for_user(
        &self,
        user_id: &str,
        page: i64,
        limit: i64,
    ) -> AppResult<Vec<Conversation>> {
        let offset = (page.max(1) - 1) * limit;
        let rows = sqlx::query_as::<_, Conversation>(&format!(
            r#"{}
            WHERE is_active = true AND participants @> to_jsonb($1::text)
            ORDER BY last_message_at DESC NULLS LAST, created_at DESC
            LIMIT $2 OFFSET $3
            "#,
            CONVERSATION_SELECT
        ))
        .bind(user_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(self.db.pool())
        .await?;
        Ok(rows.into_iter().map(Self::hydrate).collect())
    }

    /// Soft delete. The record and its messages stay for the other
    /// participants; the conversation just stops listing.
    pub async fn deactivate(&self, id: &str, user_id: &str) -> AppResult<()> {
        let conversation = self
            .get_conversation(id)
            .await?
            .ok_or_else(|| AppError::NotFound("Conversation not found".to_string()))?;
        if !conversation.is_participant(user_id) {
            return Err(AppError::Forbidden(
                "Not a participant of this conversation".to_string(),
            ));
        }
        sqlx::query("UPDATE conversation SET is_active = false, updated_at = $2 WHERE id = $1")
            .bind(id)
            .bind(current_timestamp())
            .execute(self.db.pool())
            .await?;
        Ok(())
    }

    /// Record a new message on the conversation: bump counters and unread
    /// tallies for everyone but the sender.
    pub async fn bump_last_message(
        &self,
        conversation: &Conversation,
        message_id: &str,
        sender_id: &str,
        now: i64,
    ) -> AppResult<()> {
        let mut unread = conversation.unread_counts.clone();
        for participant in &conversation.participants {
            if participant != sender_id {
                *unread.entry(participant.clone()).or_insert(0) += 1;
            }
        }
        sqlx::query(
            r#"
            UPDATE conversation
            SET last_message_id = $2, last_message_at = $3,
                message_count = message_count + 1,
                unread_counts = $4::jsonb, updated_at = $3
            WHERE id = $1
            "#,
        )
        .bind(&conversation.id)
        .bind(message_id)
        .bind(now)
        .bind(serde_json::to_string(&unread).unwrap_or_default())
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    pub async fn reset_unread(&self, conversation_id: &str, user_id: &str) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE conversation
            SET unread_counts = jsonb_set(unread_counts, ARRAY[$2], '0'::jsonb),
                updated_at = $3
            WHERE id = $1
            "#,
        )
        .bind(conversation_id)
        .bind(user_id)
        .bind(current_timestamp())
        .execute(self.db.pool())
        .await?;
        Ok(())
    }
}
