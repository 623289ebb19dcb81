use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Closed set of notification types. Per-type behavior (default priority,
/// preference key, action buttons) hangs off this enum so the type→behavior
/// mapping stays exhaustive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    ConnectionRequest,
    ConnectionAccepted,
    JobApplication,
    JobApproved,
    JobRejected,
    JobMatch,
    NewMessage,
    MessageReaction,
    IncomingCall,
    MissedCall,
    VerificationApproved,
    VerificationRejected,
    PaymentReceived,
    PaymentSent,
    CommunityLike,
    CommunityComment,
    CommunityMention,
    System,
    UnifiedActivitySummary,
}

impl NotificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationType::ConnectionRequest => "connection_request",
            NotificationType::ConnectionAccepted => "connection_accepted",
            NotificationType::JobApplication => "job_application",
            NotificationType::JobApproved => "job_approved",
            NotificationType::JobRejected => "job_rejected",
            NotificationType::JobMatch => "job_match",
            NotificationType::NewMessage => "new_message",
            NotificationType::MessageReaction => "message_reaction",
            NotificationType::IncomingCall => "incoming_call",
            NotificationType::MissedCall => "missed_call",
            NotificationType::VerificationApproved => "verification_approved",
            NotificationType::VerificationRejected => "verification_rejected",
            NotificationType::PaymentReceived => "payment_received",
            NotificationType::PaymentSent => "payment_sent",
            NotificationType::CommunityLike => "community_like",
            NotificationType::CommunityComment => "community_comment",
            NotificationType::CommunityMention => "community_mention",
            NotificationType::System => "system",
            NotificationType::UnifiedActivitySummary => "unified_activity_summary",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        serde_json::from_value(serde_json::Value::String(s.to_string())).ok()
    }

    /// Types whose mere occurrence bumps the relevance score.
    pub fn is_high_relevance(&self) -> bool {
        matches!(
            self,
            NotificationType::PaymentReceived
                | NotificationType::JobApproved
                | NotificationType::ConnectionRequest
        )
    }

    /// Fixed type→priority table. The explicit urgent/high/medium lists win
    /// over any score-derived override.
    pub fn default_priority(&self) -> Option<Priority> {
        match self {
            NotificationType::PaymentReceived | NotificationType::VerificationRejected => {
                Some(Priority::Urgent)
            }
            NotificationType::JobApproved
            | NotificationType::ConnectionRequest
            | NotificationType::NewMessage
            | NotificationType::IncomingCall => Some(Priority::High),
            NotificationType::JobApplication
            | NotificationType::CommunityMention
            | NotificationType::ConnectionAccepted => Some(Priority::Medium),
            _ => None,
        }
    }

    pub fn action_buttons(&self) -> Vec<ActionButton> {
        match self {
            NotificationType::ConnectionRequest => vec![
                ActionButton::primary("Accept", "accept_connection"),
                ActionButton::secondary("Decline", "decline_connection"),
            ],
            NotificationType::JobApplication => vec![
                ActionButton::link("Review", "view_application", "/employer/jobs"),
                ActionButton::secondary("Message", "start_conversation"),
            ],
            NotificationType::JobApproved => vec![
                ActionButton::link("View Job", "view_job", "/employee/jobs"),
                ActionButton::primary("Start Work", "start_work"),
            ],
            NotificationType::PaymentReceived => vec![
                ActionButton::link("View Details", "view_payment", "/employee/wallet"),
                ActionButton::primary("Withdraw", "withdraw_funds"),
            ],
            NotificationType::NewMessage => vec![
                ActionButton::link("Reply", "reply_message", "/messaging"),
                ActionButton::secondary("View Chat", "view_chat"),
            ],
            NotificationType::MissedCall => vec![
                ActionButton::primary("Call Back", "call_back"),
                ActionButton::secondary("Message", "start_conversation"),
            ],
            _ => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
    Urgent,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
            Priority::Urgent => "urgent",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "low" => Some(Priority::Low),
            "medium" => Some(Priority::Medium),
            "high" => Some(Priority::High),
            "urgent" => Some(Priority::Urgent),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    InApp,
    Push,
    Email,
    Sms,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::InApp => "in_app",
            Channel::Push => "push",
            Channel::Email => "email",
            Channel::Sms => "sms",
        }
    }

}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Pending,
    Sent,
    Delivered,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionButton {
    pub label: String,
    pub action: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub style: String, // primary | secondary | danger
}

impl ActionButton {
    pub fn primary(label: &str, action: &str) -> Self {
        ActionButton {
            label: label.to_string(),
            action: action.to_string(),
            url: None,
            style: "primary".to_string(),
        }
    }

    pub fn secondary(label: &str, action: &str) -> Self {
        ActionButton {
            label: label.to_string(),
            action: action.to_string(),
            url: None,
            style: "secondary".to_string(),
        }
    }

    pub fn link(label: &str, action: &str, url: &str) -> Self {
        ActionButton {
            label: label.to_string(),
            action: action.to_string(),
            url: Some(url.to_string()),
            style: "primary".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RichContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub action_buttons: Vec<ActionButton>,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelatedEntity {
    #[serde(rename = "type")]
    pub entity_type: String, // job | post | message | connection | call | transaction
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationContext {
    pub module: String, // jobs | community | messaging | wallet | profile
    #[serde(skip_serializing_if = "Option::is_none")]
    pub related_entity: Option<RelatedEntity>,
}

/// Per-channel delivery bookkeeping; mutated only by delivery-status updates.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeliveryRecord {
    #[serde(default)]
    pub channels: Vec<Channel>,
    #[serde(default)]
    pub status: std::collections::HashMap<String, DeliveryStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sent_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InteractionRecord {
    #[serde(default)]
    pub is_read: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clicked_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dismissed_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action_taken: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Notification {
    pub id: String,
    pub recipient_id: String,
    #[sqlx(default)]
    pub sender_id: Option<String>,
    #[serde(rename = "type")]
    pub notification_type: String,
    pub title: String,
    pub body: String,
    #[sqlx(skip)]
    #[serde(skip)]
    pub rich_content: Option<RichContent>,
    #[sqlx(default)]
    pub rich_content_str: Option<String>,
    #[sqlx(skip)]
    #[serde(skip)]
    pub context: Option<NotificationContext>,
    #[sqlx(default)]
    pub context_str: Option<String>,
    #[sqlx(skip)]
    #[serde(skip)]
    pub delivery: DeliveryRecord,
    #[sqlx(default)]
    pub delivery_str: Option<String>,
    #[sqlx(skip)]
    #[serde(skip)]
    pub interaction: InteractionRecord,
    #[sqlx(default)]
    pub interaction_str: Option<String>,
    pub priority: String,
    pub relevance_score: i32,
    #[sqlx(default)]
    pub grouping_id: Option<String>,
    #[sqlx(default)]
    pub digest_id: Option<String>,
    #[sqlx(default)]
    pub expires_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Notification {
    pub fn parse_json_fields(&mut self) {
        if let Some(ref s) = self.rich_content_str {
            self.rich_content = serde_json::from_str(s).ok();
        }
        if let Some(ref s) = self.context_str {
            self.context = serde_json::from_str(s).ok();
        }
        if let Some(ref s) = self.delivery_str {
            self.delivery = serde_json::from_str(s).unwrap_or_default();
        }
        if let Some(ref s) = self.interaction_str {
            self.interaction = serde_json::from_str(s).unwrap_or_default();
        }
    }

}

#[derive(Debug, Serialize)]
pub struct NotificationResponse {
    pub id: String,
    pub recipient_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<String>,
    #[serde(rename = "type")]
    pub notification_type: String,
    pub title: String,
    pub body: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rich_content: Option<RichContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<NotificationContext>,
    pub delivery: DeliveryRecord,
    pub interaction: InteractionRecord,
    pub priority: String,
    pub relevance_score: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grouping_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub digest_id: Option<String>,
    pub created_at: i64,
}

impl From<Notification> for NotificationResponse {
    fn from(mut n: Notification) -> Self {
        n.parse_json_fields();
        NotificationResponse {
            id: n.id.clone(),
            recipient_id: n.recipient_id.clone(),
            sender_id: n.sender_id.clone(),
            notification_type: n.notification_type.clone(),
            title: n.title.clone(),
            body: n.body.clone(),
            rich_content: n.rich_content.clone(),
            context: n.context.clone(),
            delivery: n.delivery.clone(),
            interaction: n.interaction.clone(),
            priority: n.priority.clone(),
            relevance_score: n.relevance_score,
            grouping_id: n.grouping_id.clone(),
            digest_id: n.digest_id.clone(),
            created_at: n.created_at,
        }
    }
}

/// One entry in a grouped notification listing: either a single item, or a
/// synthetic collapsed group of same-type/same-module items. Presentation
/// only; the underlying records are untouched.
#[derive(Debug, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NotificationListItem {
    Single(NotificationResponse),
    Group {
        #[serde(rename = "type")]
        notification_type: String,
        module: String,
        count: usize,
        latest_at: i64,
        members: Vec<NotificationResponse>,
    },
}

/// Collapse same (type, module) runs into groups. Input order (newest first)
/// is preserved: a group sits where its newest member was.
pub fn group_for_display(items: Vec<NotificationResponse>) -> Vec<NotificationListItem> {
    let mut buckets: Vec<(String, String, Vec<NotificationResponse>)> = Vec::new();

    for item in items {
        let module = item
            .context
            .as_ref()
            .map(|c| c.module.clone())
            .unwrap_or_else(|| "system".to_string());
        let key_type = item.notification_type.clone();
        match buckets
            .iter_mut()
            .find(|(t, m, _)| *t == key_type && *m == module)
        {
            Some((_, _, members)) => members.push(item),
            None => buckets.push((key_type, module, vec![item])),
        }
    }

    buckets
        .into_iter()
        .filter_map(|(notification_type, module, mut members)| {
            if members.len() > 1 {
                let latest_at = members.iter().map(|m| m.created_at).max().unwrap_or(0);
                Some(NotificationListItem::Group {
                    notification_type,
                    module,
                    count: members.len(),
                    latest_at,
                    members,
                })
            } else {
                members.pop().map(NotificationListItem::Single)
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(ty: NotificationType, module: &str, created_at: i64) -> NotificationResponse {
        NotificationResponse {
            id: uuid::Uuid::new_v4().to_string(),
            recipient_id: "u1".to_string(),
            sender_id: None,
            notification_type: ty.as_str().to_string(),
            title: "t".to_string(),
            body: "b".to_string(),
            rich_content: None,
            context: Some(NotificationContext {
                module: module.to_string(),
                related_entity: None,
            }),
            delivery: DeliveryRecord::default(),
            interaction: InteractionRecord::default(),
            priority: "low".to_string(),
            relevance_score: 50,
            grouping_id: None,
            digest_id: None,
            created_at,
        }
    }

    #[test]
    fn test_type_round_trip() {
        for s in ["new_message", "payment_received", "unified_activity_summary"] {
            let ty = NotificationType::parse(s).unwrap();
            assert_eq!(ty.as_str(), s);
        }
        assert!(NotificationType::parse("no_such_type").is_none());
    }

    #[test]
    fn test_priority_table() {
        assert_eq!(
            NotificationType::PaymentReceived.default_priority(),
            Some(Priority::Urgent)
        );
        assert_eq!(
            NotificationType::NewMessage.default_priority(),
            Some(Priority::High)
        );
        assert_eq!(NotificationType::CommunityLike.default_priority(), None);
    }

    #[test]
    fn test_group_for_display_collapses_same_type_module() {
        let items = vec![
            item(NotificationType::CommunityLike, "community", 30),
            item(NotificationType::CommunityLike, "community", 20),
            item(NotificationType::NewMessage, "messaging", 10),
        ];
        let grouped = group_for_display(items);
        assert_eq!(grouped.len(), 2);
        match &grouped[0] {
            NotificationListItem::Group {
                count, latest_at, ..
            } => {
                assert_eq!(*count, 2);
                assert_eq!(*latest_at, 30);
            }
            _ => panic!("expected group"),
        }
        assert!(matches!(grouped[1], NotificationListItem::Single(_)));
    }

    #[test]
    fn test_singletons_stay_single() {
        let items = vec![item(NotificationType::NewMessage, "messaging", 1)];
        let grouped = group_for_display(items);
        assert_eq!(grouped.len(), 1);
        assert!(matches!(grouped[0], NotificationListItem::Single(_)));
    }
}
