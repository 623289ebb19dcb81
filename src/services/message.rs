use std::collections::HashMap;
use uuid::Uuid;

use crate::db::Database;
use crate::error::{AppError, AppResult};
use crate::models::conversation::Conversation;
use crate::models::message::{
    group_reactions, Message, MessageForm, MessageReaction, MessageResponse, Reaction,
    DELETED_MESSAGE_MARKER, MAX_MESSAGE_LENGTH, MESSAGE_TYPES, REACTION_KINDS,
};
use crate::services::conversation::ConversationService;
use crate::services::user::UserService;
use crate::utils::time::current_timestamp;

const MESSAGE_SELECT: &str = r#"
    SELECT id, conversation_id, sender_id, content, message_type, reply_to_id,
           is_edited, edited_at, is_deleted, deleted_at,
           CAST(context AS TEXT) as context_str,
           created_at, updated_at
    FROM message
"#;

pub struct MessageService<'a> {
    db: &'a Database,
}

impl<'a> MessageService<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    fn validate_content(content: &str) -> AppResult<String> {
        let trimmed = content.trim();
        if trimmed.is_empty() {
            return Err(AppError::Validation("Message content is empty".to_string()));
        }
        if trimmed.chars().count() > MAX_MESSAGE_LENGTH {
            return Err(AppError::Validation(format!(
                "Message exceeds {} characters",
                MAX_MESSAGE_LENGTH
            )));
        }
        Ok(trimmed.to_string())
    }

    /// Persist a message. Returns the stored message together with the
    /// conversation it landed in so callers can fan out to its topic.
    pub async fn send(
        &self,
        sender_id: &str,
        conversation_id: &str,
        form: &MessageForm,
    ) -> AppResult<(Message, Conversation)> {
        let content = Self::validate_content(&form.content)?;
        let message_type = form.message_type.as_deref().unwrap_or("text").to_string();
        if !MESSAGE_TYPES.contains(&message_type.as_str()) {
            return Err(AppError::Validation(format!(
                "Invalid message type: {}",
                message_type
            )));
        }

        let conversations = ConversationService::new(self.db);
        let conversation = conversations
            .get_conversation(conversation_id)
            .await?
            .filter(|c| c.is_active)
            .ok_or_else(|| AppError::NotFound("Conversation not found".to_string()))?;
        if !conversation.is_participant(sender_id) {
            return Err(AppError::Forbidden(
                "Not a participant of this conversation".to_string(),
            ));
        }

        if let Some(ref reply_to) = form.reply_to_id {
            let parent = self.get_message(reply_to).await?;
            match parent {
                Some(p) if p.conversation_id == conversation.id => {}
                _ => {
                    return Err(AppError::Validation(
                        "Reply target is not in this conversation".to_string(),
                    ))
                }
            }
        }

        let now = current_timestamp();
        let id = Uuid::new_v4().to_string();
        let context_str = form
            .context
            .as_ref()
            .map(|c| c.to_string());

        sqlx::query(
            r#"
            INSERT INTO message
                (id, conversation_id, sender_id, content, message_type, reply_to_id,
                 is_edited, is_deleted, context, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, false, false, $7::jsonb, $8, $8)
            "#,
        )
        .bind(&id)
        .bind(&conversation.id)
        .bind(sender_id)
        .bind(&content)
        .bind(&message_type)
        .bind(&form.reply_to_id)
        .bind(&context_str)
        .bind(now)
        .execute(self.db.pool())
        .await?;

        // the author starts in their own read set
        sqlx::query(
            "INSERT INTO message_read (message_id, user_id, read_at) VALUES ($1, $2, $3) ON CONFLICT DO NOTHING",
        )
        .bind(&id)
        .bind(sender_id)
        .bind(now)
        .execute(self.db.pool())
        .await?;

        conversations
            .bump_last_message(&conversation, &id, sender_id, now)
            .await?;

        let message = self
            .get_message(&id)
            .await?
            .ok_or_else(|| AppError::InternalServerError("Message vanished after insert".to_string()))?;
        Ok((message, conversation))
    }

    pub async fn get_message(&self, id: &str) -> AppResult<Option<Message>> {
        let row = sqlx::query_as::<_, Message>(&format!("{} WHERE id = $1", MESSAGE_SELECT))
            .bind(id)
            .fetch_optional(self.db.pool())
            .await?;
        Ok(row.map(|mut m| {
            m.parse_context();
            m
        }))
    }

    /// Page of messages in chronological order, hydrated with senders,
    /// reactions and read receipts.
    pub async fn list(
        &self,
        conversation_id: &str,
        user_id: &str,
        page: i64,
        limit: i64,
    ) -> AppResult<Vec<MessageResponse>> {
        let conversation = ConversationService::new(self.db)
            .get_conversation(conversation_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Conversation not found".to_string()))?;
        if !conversation.is_participant(user_id) {
            return Err(AppError::Forbidden(
                "Not a participant of this conversation".to_string(),
            ));
        }

        let offset = (page.max(1) - 1) * limit;
        let mut rows = sqlx::query_as::<_, Message>(&format!(
            "{} WHERE conversation_id = $1 ORDER BY created_at DESC LIMIT $2 OFFSET $3",
            MESSAGE_SELECT
        ))
        .bind(conversation_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(self.db.pool())
        .await?;
        rows.reverse();

        self.hydrate(rows).await
    }

    async fn hydrate(&self, messages: Vec<Message>) -> AppResult<Vec<MessageResponse>> {
        if messages.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<String> = messages.iter().map(|m| m.id.clone()).collect();

        let reaction_rows = sqlx::query_as::<_, MessageReaction>(
            "SELECT id, message_id, user_id, kind, created_at FROM message_reaction WHERE message_id = ANY($1) ORDER BY created_at",
        )
        .bind(&ids)
        .fetch_all(self.db.pool())
        .await?;

        let read_rows: Vec<(String, String)> = sqlx::query_as(
            "SELECT message_id, user_id FROM message_read WHERE message_id = ANY($1)",
        )
        .bind(&ids)
        .fetch_all(self.db.pool())
        .await?;

        let mut sender_ids: Vec<String> = messages.iter().map(|m| m.sender_id.clone()).collect();
        sender_ids.sort();
        sender_ids.dedup();
        let senders: HashMap<String, _> = UserService::new(self.db)
            .get_names(&sender_ids)
            .await?
            .into_iter()
            .map(|u| (u.id.clone(), u))
            .collect();

        let mut responses = Vec::with_capacity(messages.len());
        for message in messages {
            let mut response = MessageResponse::from(message);
            response.sender = senders.get(&response.sender_id).cloned();
            let per_message: Vec<MessageReaction> = reaction_rows
                .iter()
                .filter(|r| r.message_id == response.id)
                .cloned()
                .collect();
            response.reactions = group_reactions(&per_message);
            response.read_by = read_rows
                .iter()
                .filter(|(mid, _)| *mid == response.id)
                .map(|(_, uid)| uid.clone())
                .collect();
            responses.push(response);
        }
        Ok(responses)
    }

    /// Edit a message in place. Only the sender may edit, and tombstoned
    /// messages are immutable.
    pub async fn edit(
        &self,
        message_id: &str,
        user_id: &str,
        content: &str,
    ) -> AppResult<Message> {
        let message = self
            .get_message(message_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Message not found".to_string()))?;
        if message.sender_id != user_id {
            return Err(AppError::Forbidden("Only the sender can edit a message".to_string()));
        }
        if message.is_deleted {
            return Err(AppError::BadRequest("Message has been deleted".to_string()));
        }
        let content = Self::validate_content(content)?;

        let now = current_timestamp();
        sqlx::query(
            "UPDATE message SET content = $2, is_edited = true, edited_at = $3, updated_at = $3 WHERE id = $1",
        )
        .bind(message_id)
        .bind(&content)
        .bind(now)
        .execute(self.db.pool())
        .await?;

        self.get_message(message_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Message not found".to_string()))
    }

    /// Tombstone a message: content is replaced, the row stays so replies
    /// and ordering keep working.
    pub async fn delete(&self, message_id: &str, user_id: &str) -> AppResult<Message> {
        let message = self
            .get_message(message_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Message not found".to_string()))?;
        if message.sender_id != user_id {
            return Err(AppError::Forbidden(
                "Only the sender can delete a message".to_string(),
            ));
        }
        if message.is_deleted {
            return Ok(message);
        }

        let now = current_timestamp();
        sqlx::query(
            r#"
            UPDATE message
            SET content = $2, is_deleted = true, deleted_at = $3, updated_at = $3
            WHERE id = $1
            "#,
        )
        .bind(message_id)
        .bind(DELETED_MESSAGE_MARKER)
        .bind(now)
        .execute(self.db.pool())
        .await?;

        self.get_message(message_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Message not found".to_string()))
    }

    /// Toggle a reaction. A user holds at most one reaction kind per
    /// message: reacting with a new kind replaces the old one, reacting
    /// with the same kind removes it.
    pub async fn toggle_reaction(
        &self,
        message_id: &str,
        user_id: &str,
        kind: &str,
    ) -> AppResult<(Message, Vec<Reaction>)> {
        if !REACTION_KINDS.contains(&kind) {
            return Err(AppError::Validation(format!("Invalid reaction: {}", kind)));
        }
        let message = self
            .get_message(message_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Message not found".to_string()))?;
        if message.is_deleted {
            return Err(AppError::BadRequest("Message has been deleted".to_string()));
        }
        let conversation = ConversationService::new(self.db)
            .get_conversation(&message.conversation_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Conversation not found".to_string()))?;
        if !conversation.is_participant(user_id) {
            return Err(AppError::Forbidden(
                "Not a participant of this conversation".to_string(),
            ));
        }

        let existing: Option<String> = sqlx::query_scalar(
            "SELECT kind FROM message_reaction WHERE message_id = $1 AND user_id = $2",
        )
        .bind(message_id)
        .bind(user_id)
        .fetch_optional(self.db.pool())
        .await?;

        sqlx::query("DELETE FROM message_reaction WHERE message_id = $1 AND user_id = $2")
            .bind(message_id)
            .bind(user_id)
            .execute(self.db.pool())
            .await?;

        if existing.as_deref() != Some(kind) {
            sqlx::query(
                "INSERT INTO message_reaction (id, message_id, user_id, kind, created_at) VALUES ($1, $2, $3, $4, $5)",
            )
            .bind(Uuid::new_v4().to_string())
            .bind(message_id)
            .bind(user_id)
            .bind(kind)
            .bind(current_timestamp())
            .execute(self.db.pool())
            .await?;
        }

        let rows = sqlx::query_as::<_, MessageReaction>(
            "SELECT id, message_id, user_id, kind, created_at FROM message_reaction WHERE message_id = $1 ORDER BY created_at",
        )
        .bind(message_id)
        .fetch_all(self.db.pool())
        .await?;
        Ok((message, group_reactions(&rows)))
    }

    /// Mark everything the user hasn't read in a conversation as read.
    /// Idempotent; returns only the ids that flipped on this call.
    pub async fn mark_conversation_read(
        &self,
        conversation_id: &str,
        user_id: &str,
    ) -> AppResult<Vec<String>> {
        let now = current_timestamp();
        let newly_read: Vec<(String,)> = sqlx::query_as(
            r#"
            INSERT INTO message_read (message_id, user_id, read_at)
            SELECT id, $2, $3 FROM message
            WHERE conversation_id = $1 AND sender_id <> $2
            ON CONFLICT (message_id, user_id) DO NOTHING
            RETURNING message_id
            "#,
        )
        .bind(conversation_id)
        .bind(user_id)
        .bind(now)
        .fetch_all(self.db.pool())
        .await?;

        ConversationService::new(self.db)
            .reset_unread(conversation_id, user_id)
            .await?;

        Ok(newly_read.into_iter().map(|(id,)| id).collect())
    }

    /// Unread messages for a user across all active conversations.
    pub async fn unread_total(&self, user_id: &str) -> AppResult<i64> {
        let total: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT SUM((unread_counts->>$1)::bigint) FROM conversation
            WHERE is_active = true AND participants @> to_jsonb($1::text)
            "#,
        )
        .bind(user_id)
        .fetch_one(self.db.pool())
        .await?;
        Ok(total.unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_content_trims() {
        assert_eq!(MessageService::validate_content("  hi  ").unwrap(), "hi");
    }

    #[test]
    fn test_validate_content_rejects_empty() {
        assert!(MessageService::validate_content("   ").is_err());
    }

    #[test]
    fn test_validate_content_length_is_in_chars() {
        let at_limit: String = "ä".repeat(MAX_MESSAGE_LENGTH);
        assert!(MessageService::validate_content(&at_limit).is_ok());
        let over: String = "ä".repeat(MAX_MESSAGE_LENGTH + 1);
        assert!(MessageService::validate_content(&over).is_err());
    }
}
