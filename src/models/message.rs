use serde::{Deserialize, Serialize};
use sqlx::FromRow;

pub const MAX_MESSAGE_LENGTH: usize = 2000;

/// Placeholder content for tombstoned messages; the row itself stays so
/// other clients' read cursors keep their ordering.
pub const DELETED_MESSAGE_MARKER: &str = "[message deleted]";

pub const MESSAGE_TYPES: &[&str] = &["text", "image", "file", "system", "call_event", "context"];

pub const REACTION_KINDS: &[&str] = &[
    "like", "love", "laugh", "wow", "sad", "angry", "thumbs_up", "lightbulb", "checkmark",
    "question", "fire", "rocket", "eyes", "party",
];

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub content: String,
    #[serde(rename = "type")]
    pub message_type: String,
    #[sqlx(default)]
    pub reply_to_id: Option<String>,
    pub is_edited: bool,
    #[sqlx(default)]
    pub edited_at: Option<i64>,
    pub is_deleted: bool,
    #[sqlx(default)]
    pub deleted_at: Option<i64>,
    #[sqlx(skip)]
    #[serde(skip)]
    pub context: Option<serde_json::Value>,
    #[sqlx(default)]
    pub context_str: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Message {
    pub fn parse_context(&mut self) {
        if let Some(ref s) = self.context_str {
            self.context = serde_json::from_str(s).ok();
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct MessageForm {
    pub content: String,
    #[serde(default, rename = "type")]
    pub message_type: Option<String>,
    #[serde(default)]
    pub reply_to_id: Option<String>,
    #[serde(default)]
    pub context: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender: Option<crate::models::user::UserNameResponse>,
    pub content: String,
    #[serde(rename = "type")]
    pub message_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to_id: Option<String>,
    pub is_edited: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub edited_at: Option<i64>,
    pub is_deleted: bool,
    pub read_by: Vec<String>,
    pub reactions: Vec<Reaction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Value>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl From<Message> for MessageResponse {
    fn from(mut msg: Message) -> Self {
        msg.parse_context();
        let context = msg.context.clone();
        let read_by = vec![msg.sender_id.clone()];
        MessageResponse {
            id: msg.id,
            conversation_id: msg.conversation_id,
            sender_id: msg.sender_id,
            sender: None, // populated by the service layer
            content: msg.content,
            message_type: msg.message_type,
            reply_to_id: msg.reply_to_id,
            is_edited: msg.is_edited,
            edited_at: msg.edited_at,
            is_deleted: msg.is_deleted,
            read_by,
            reactions: Vec::new(),
            context,
            created_at: msg.created_at,
            updated_at: msg.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct MessageReaction {
    pub id: String,
    pub message_id: String,
    pub user_id: String,
    pub kind: String,
    pub created_at: i64,
}

/// Grouped view of one reaction kind on a message.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Reaction {
    pub kind: String,
    pub user_ids: Vec<String>,
    pub count: usize,
}

/// Group raw reaction rows by kind. Rows come ordered by insertion, so the
/// per-kind user lists keep a stable order.
pub fn group_reactions(rows: &[MessageReaction]) -> Vec<Reaction> {
    let mut grouped: Vec<Reaction> = Vec::new();
    for row in rows {
        match grouped.iter_mut().find(|r| r.kind == row.kind) {
            Some(reaction) => {
                if !reaction.user_ids.contains(&row.user_id) {
                    reaction.user_ids.push(row.user_id.clone());
                    reaction.count += 1;
                }
            }
            None => grouped.push(Reaction {
                kind: row.kind.clone(),
                user_ids: vec![row.user_id.clone()],
                count: 1,
            }),
        }
    }
    grouped
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(kind: &str, user: &str) -> MessageReaction {
        MessageReaction {
            id: uuid::Uuid::new_v4().to_string(),
            message_id: "m1".to_string(),
            user_id: user.to_string(),
            kind: kind.to_string(),
            created_at: 0,
        }
    }

    #[test]
    fn test_group_reactions() {
        let rows = vec![row("like", "u1"), row("like", "u2"), row("fire", "u1")];
        let grouped = group_reactions(&rows);
        assert_eq!(grouped.len(), 2);
        let like = grouped.iter().find(|r| r.kind == "like").unwrap();
        assert_eq!(like.count, 2);
        assert_eq!(like.user_ids, vec!["u1", "u2"]);
    }

    #[test]
    fn test_response_read_by_starts_with_sender() {
        let msg = Message {
            id: "m1".to_string(),
            conversation_id: "c1".to_string(),
            sender_id: "u1".to_string(),
            content: "hello".to_string(),
            message_type: "text".to_string(),
            reply_to_id: None,
            is_edited: false,
            edited_at: None,
            is_deleted: false,
            deleted_at: None,
            context: None,
            context_str: None,
            created_at: 0,
            updated_at: 0,
        };
        let response = MessageResponse::from(msg);
        assert_eq!(response.read_by, vec!["u1"]);
    }

    #[test]
    fn test_group_reactions_deduplicates_users() {
        let rows = vec![row("like", "u1"), row("like", "u1")];
        let grouped = group_reactions(&rows);
        assert_eq!(grouped.len(), 1);
        assert_eq!(grouped[0].count, 1);
    }
}
