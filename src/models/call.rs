use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::utils::time::current_timestamp;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallType {
    Audio,
    Video,
}

impl CallType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallType::Audio => "audio",
            CallType::Video => "video",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "audio" => Some(CallType::Audio),
            "video" => Some(CallType::Video),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallStatus {
    Initiated,
    Ringing,
    Active,
    Ended,
    Missed,
    Declined,
}

impl CallStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallStatus::Initiated => "initiated",
            CallStatus::Ringing => "ringing",
            CallStatus::Active => "active",
            CallStatus::Ended => "ended",
            CallStatus::Missed => "missed",
            CallStatus::Declined => "declined",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "initiated" => Some(CallStatus::Initiated),
            "ringing" => Some(CallStatus::Ringing),
            "active" => Some(CallStatus::Active),
            "ended" => Some(CallStatus::Ended),
            "missed" => Some(CallStatus::Missed),
            "declined" => Some(CallStatus::Declined),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CallStatus::Ended | CallStatus::Missed | CallStatus::Declined
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallParticipant {
    pub user_id: String,
    pub status: String, // joined | left | missed | declined
    #[serde(skip_serializing_if = "Option::is_none")]
    pub joined_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub left_at: Option<i64>,
}

/// Persisted audit trail of one audio/video call. Never mutated after the
/// overall status reaches a terminal state.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CallRecord {
    pub id: String,
    pub conversation_id: String,
    pub call_type: String,
    pub status: String,
    pub initiated_by: String,
    #[sqlx(skip)]
    #[serde(skip)]
    pub participants: Vec<CallParticipant>,
    #[sqlx(default)]
    pub participants_str: Option<String>,
    #[sqlx(default)]
    pub started_at: Option<i64>,
    #[sqlx(default)]
    pub ended_at: Option<i64>,
    #[sqlx(default)]
    pub duration: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl CallRecord {
    pub fn new(conversation_id: &str, initiated_by: &str, callee_ids: &[String], call_type: CallType) -> Self {
        let now = current_timestamp();
        let mut participants = vec![CallParticipant {
            user_id: initiated_by.to_string(),
            status: "joined".to_string(),
            joined_at: Some(now),
            left_at: None,
        }];
        for callee in callee_ids {
            participants.push(CallParticipant {
                user_id: callee.clone(),
                status: "missed".to_string(),
                joined_at: None,
                left_at: None,
            });
        }
        CallRecord {
            id: uuid::Uuid::new_v4().to_string(),
            conversation_id: conversation_id.to_string(),
            call_type: call_type.as_str().to_string(),
            status: CallStatus::Ringing.as_str().to_string(),
            initiated_by: initiated_by.to_string(),
            participants,
            participants_str: None,
            started_at: None,
            ended_at: None,
            duration: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn parse_participants(&mut self) {
        if let Some(ref s) = self.participants_str {
            self.participants = serde_json::from_str(s).unwrap_or_default();
        }
    }

    pub fn current_status(&self) -> CallStatus {
        CallStatus::parse(&self.status).unwrap_or(CallStatus::Ended)
    }

    pub fn is_participant(&self, user_id: &str) -> bool {
        self.participants.iter().any(|p| p.user_id == user_id)
    }

    fn participant_mut(&mut self, user_id: &str) -> Option<&mut CallParticipant> {
        self.participants.iter_mut().find(|p| p.user_id == user_id)
    }

    /// ringing -> active. Anything else is a lost race and leaves the
    /// record untouched.
    pub fn answer(&mut self, user_id: &str, now: i64) -> bool {
        if self.current_status() != CallStatus::Ringing {
            return false;
        }
        self.status = CallStatus::Active.as_str().to_string();
        self.started_at = Some(now);
        if let Some(p) = self.participant_mut(user_id) {
            p.status = "joined".to_string();
            p.joined_at = Some(now);
        }
        self.updated_at = now;
        true
    }

    /// ringing -> declined.
    pub fn reject(&mut self, user_id: &str, now: i64) -> bool {
        if self.current_status() != CallStatus::Ringing {
            return false;
        }
        self.status = CallStatus::Declined.as_str().to_string();
        if let Some(p) = self.participant_mut(user_id) {
            p.status = "declined".to_string();
        }
        self.updated_at = now;
        true
    }

    /// Any non-terminal state -> ended. Computes duration when the call was
    /// ever active.
    pub fn end(&mut self, user_id: &str, now: i64) -> bool {
        if self.current_status().is_terminal() {
            return false;
        }
        self.status = CallStatus::Ended.as_str().to_string();
        self.ended_at = Some(now);
        if let Some(started) = self.started_at {
            self.duration = Some(now - started);
        }
        if let Some(p) = self.participant_mut(user_id) {
            p.status = "left".to_string();
            p.left_at = Some(now);
        }
        self.updated_at = now;
        true
    }

    /// Mid-call join; does not change the overall status.
    pub fn join(&mut self, user_id: &str, now: i64) -> bool {
        if self.current_status().is_terminal() {
            return false;
        }
        match self.participant_mut(user_id) {
            Some(p) => {
                p.status = "joined".to_string();
                p.joined_at = Some(now);
            }
            None => self.participants.push(CallParticipant {
                user_id: user_id.to_string(),
                status: "joined".to_string(),
                joined_at: Some(now),
                left_at: None,
            }),
        }
        self.updated_at = now;
        true
    }

    /// Mid-call leave; does not change the overall status.
    pub fn leave(&mut self, user_id: &str, now: i64) -> bool {
        if self.current_status().is_terminal() {
            return false;
        }
        if let Some(p) = self.participant_mut(user_id) {
            p.status = "left".to_string();
            p.left_at = Some(now);
        }
        self.updated_at = now;
        true
    }
}

#[derive(Debug, Serialize)]
pub struct CallResponse {
    pub id: String,
    pub conversation_id: String,
    pub call_type: String,
    pub status: String,
    pub initiated_by: String,
    pub participants: Vec<CallParticipant>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<i64>,
    pub created_at: i64,
}

impl From<CallRecord> for CallResponse {
    fn from(mut call: CallRecord) -> Self {
        call.parse_participants();
        CallResponse {
            id: call.id,
            conversation_id: call.conversation_id,
            call_type: call.call_type,
            status: call.status,
            initiated_by: call.initiated_by,
            participants: call.participants,
            started_at: call.started_at,
            ended_at: call.ended_at,
            duration: call.duration,
            created_at: call.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_call() -> CallRecord {
        CallRecord::new("conv-1", "caller", &["callee".to_string()], CallType::Video)
    }

    #[test]
    fn test_answer_then_end_computes_duration() {
        let mut call = new_call();
        assert!(call.answer("callee", 100));
        assert_eq!(call.current_status(), CallStatus::Active);
        assert_eq!(call.started_at, Some(100));

        assert!(call.end("callee", 160));
        assert_eq!(call.current_status(), CallStatus::Ended);
        assert_eq!(call.duration, Some(60));
    }

    #[test]
    fn test_answer_is_noop_unless_ringing() {
        let mut call = new_call();
        assert!(call.answer("callee", 100));

        // second answer loses the race and must not touch started_at
        assert!(!call.answer("callee", 200));
        assert_eq!(call.started_at, Some(100));

        assert!(call.end("callee", 300));
        assert!(!call.answer("callee", 400));
        assert_eq!(call.current_status(), CallStatus::Ended);
    }

    #[test]
    fn test_reject_leaves_start_and_duration_unset() {
        let mut call = new_call();
        assert!(call.reject("callee", 100));
        assert_eq!(call.current_status(), CallStatus::Declined);
        assert_eq!(call.started_at, None);
        assert_eq!(call.duration, None);

        let callee = call
            .participants
            .iter()
            .find(|p| p.user_id == "callee")
            .unwrap();
        assert_eq!(callee.status, "declined");
    }

    #[test]
    fn test_concurrent_answer_reject_single_winner() {
        let mut call = new_call();
        assert!(call.answer("callee", 100));
        assert!(!call.reject("callee", 101));
        assert_eq!(call.current_status(), CallStatus::Active);
    }

    #[test]
    fn test_mid_call_join_leave_keeps_status() {
        let mut call = new_call();
        call.answer("callee", 100);

        assert!(call.join("third", 110));
        assert_eq!(call.current_status(), CallStatus::Active);
        assert_eq!(call.participants.len(), 3);

        assert!(call.leave("third", 120));
        assert_eq!(call.current_status(), CallStatus::Active);
        let third = call
            .participants
            .iter()
            .find(|p| p.user_id == "third")
            .unwrap();
        assert_eq!(third.status, "left");
        assert_eq!(third.left_at, Some(120));
    }

    #[test]
    fn test_end_without_answer_has_no_duration() {
        let mut call = new_call();
        assert!(call.end("caller", 50));
        assert_eq!(call.duration, None);
        assert_eq!(call.ended_at, Some(50));
    }
}
