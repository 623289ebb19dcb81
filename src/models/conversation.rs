use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::HashMap;

pub const CONVERSATION_TYPES: &[&str] = &[
    "direct",
    "group",
    "job_related",
    "community_related",
    "connection_related",
];

/// A conversation between two or more participants. Soft-deleted via
/// `is_active`; the participant set is fixed at creation and always holds
/// at least two distinct users.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Conversation {
    pub id: String,
    #[serde(rename = "type")]
    pub conversation_type: String,
    pub title: Option<String>,
    #[sqlx(skip)]
    #[serde(skip)]
    pub participants: Vec<String>,
    #[sqlx(default)]
    pub participants_str: Option<String>,
    pub last_message_id: Option<String>,
    pub last_message_at: Option<i64>,
    pub message_count: i64,
    #[sqlx(skip)]
    #[serde(skip)]
    pub unread_counts: HashMap<String, i64>,
    #[sqlx(default)]
    pub unread_counts_str: Option<String>,
    pub connection_strength: Option<i32>,
    pub is_active: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Conversation {
    pub fn parse_participants(&mut self) {
        if let Some(ref s) = self.participants_str {
            self.participants = serde_json::from_str(s).unwrap_or_default();
        }
    }

    pub fn parse_unread_counts(&mut self) {
        if let Some(ref s) = self.unread_counts_str {
            self.unread_counts = serde_json::from_str(s).unwrap_or_default();
        }
    }

    pub fn is_participant(&self, user_id: &str) -> bool {
        self.participants.iter().any(|p| p == user_id)
    }

    pub fn unread_count_for(&self, user_id: &str) -> i64 {
        self.unread_counts.get(user_id).copied().unwrap_or(0)
    }
}

#[derive(Debug, Deserialize)]
pub struct ConversationForm {
    pub participants: Vec<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default, rename = "type")]
    pub conversation_type: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ConversationResponse {
    pub id: String,
    #[serde(rename = "type")]
    pub conversation_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub participants: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_message_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_message_at: Option<i64>,
    pub message_count: i64,
    pub unread_count: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

impl ConversationResponse {
    /// View of a conversation from one participant's side: their own unread
    /// counter is surfaced, everyone else's stays internal.
    pub fn for_user(conversation: &Conversation, user_id: &str) -> Self {
        ConversationResponse {
            id: conversation.id.clone(),
            conversation_type: conversation.conversation_type.clone(),
            title: conversation.title.clone(),
            participants: conversation.participants.clone(),
            last_message_id: conversation.last_message_id.clone(),
            last_message_at: conversation.last_message_at,
            message_count: conversation.message_count,
            unread_count: conversation.unread_count_for(user_id),
            created_at: conversation.created_at,
            updated_at: conversation.updated_at,
        }
    }
}
