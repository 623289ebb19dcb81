/// Call signaling. Authoritative transition state lives in-process behind a
/// per-call mutex so racing answer/reject/end events resolve to one winner;
/// the database row is the durable history written after each transition.
use dashmap::DashMap;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::db::Database;
use crate::error::{AppError, AppResult};
use crate::models::call::{CallRecord, CallResponse, CallStatus, CallType};
use crate::models::message::MessageForm;
use crate::models::notification::{NotificationContext, NotificationType, RelatedEntity};
use crate::realtime::registry::{conversation_topic, Registry};
use crate::services::conversation::ConversationService;
use crate::services::message::MessageService;
use crate::services::notification::{NotificationEngine, NotificationInput};
use crate::utils::time::current_timestamp;

/// How long a call may ring before it is swept as missed.
pub const RING_TIMEOUT_SECS: i64 = 45;

const CALL_SELECT: &str = r#"
    SELECT id, conversation_id, call_type, status, initiated_by,
           CAST(participants AS TEXT) as participants_str,
           started_at, ended_at, duration, created_at, updated_at
    FROM call_record
"#;

#[derive(Clone)]
pub struct CallSignaling {
    db: Database,
    registry: Registry,
    engine: NotificationEngine,
    active: Arc<DashMap<String, Arc<Mutex<CallRecord>>>>,
}

impl CallSignaling {
    pub fn new(db: Database, registry: Registry, engine: NotificationEngine) -> Self {
        Self {
            db,
            registry,
            engine,
            active: Arc::new(DashMap::new()),
        }
    }

    fn entry(&self, call_id: &str) -> AppResult<Arc<Mutex<CallRecord>>> {
        self.active
            .get(call_id)
            .map(|e| e.clone())
            .ok_or_else(|| AppError::NotFound("Call not found or already ended".to_string()))
    }

    async fn persist(&self, call: &CallRecord) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO call_record
                (id, conversation_id, call_type, status, initiated_by, participants,
                 started_at, ended_at, duration, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6::jsonb, $7, $8, $9, $10, $11)
            ON CONFLICT (id) DO UPDATE SET
                status = EXCLUDED.status,
                participants = EXCLUDED.participants,
                started_at = EXCLUDED.started_at,
                ended_at = EXCLUDED.ended_at,
                duration = EXCLUDED.duration,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(&call.id)
        .bind(&call.conversation_id)
        .bind(&call.call_type)
        .bind(&call.status)
        .bind(&call.initiated_by)
        .bind(serde_json::to_string(&call.participants).unwrap_or_default())
        .bind(call.started_at)
        .bind(call.ended_at)
        .bind(call.duration)
        .bind(call.created_at)
        .bind(call.updated_at)
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    /// Start a call in a conversation. Ring events go to each callee's
    /// personal topic only, never to the shared conversation room.
    pub async fn initiate(
        &self,
        caller_id: &str,
        conversation_id: &str,
        call_type: &str,
    ) -> AppResult<CallResponse> {
        let call_type = CallType::parse(call_type)
            .ok_or_else(|| AppError::Validation(format!("Invalid call type: {}", call_type)))?;

        let conversation = ConversationService::new(&self.db)
            .get_conversation(conversation_id)
            .await?
            .filter(|c| c.is_active)
            .ok_or_else(|| AppError::NotFound("Conversation not found".to_string()))?;
        if !conversation.is_participant(caller_id) {
            return Err(AppError::Forbidden(
                "Not a participant of this conversation".to_string(),
            ));
        }

        let entries: Vec<Arc<Mutex<CallRecord>>> =
            self.active.iter().map(|e| e.value().clone()).collect();
        for entry in entries {
            let call = entry.lock().await;
            if call.conversation_id == conversation_id && !call.current_status().is_terminal() {
                return Err(AppError::BadRequest(
                    "A call is already in progress in this conversation".to_string(),
                ));
            }
        }

        let callees: Vec<String> = conversation
            .participants
            .iter()
            .filter(|p| *p != caller_id)
            .cloned()
            .collect();
        let call = CallRecord::new(conversation_id, caller_id, &callees, call_type);
        self.persist(&call).await?;

        let payload = json!({
            "call_id": call.id,
            "conversation_id": conversation_id,
            "call_type": call.call_type,
            "caller_id": caller_id,
        });
        for callee in &callees {
            self.registry
                .emit_to_user(callee, "incoming_call", &payload);
        }

        tracing::info!("Call {} ringing in conversation {}", call.id, conversation_id);
        self.record_call_event(&call);
        let response = CallResponse::from(call.clone());
        self.active
            .insert(call.id.clone(), Arc::new(Mutex::new(call)));
        Ok(response)
    }

    pub async fn answer(&self, user_id: &str, call_id: &str) -> AppResult<CallResponse> {
        let entry = self.entry(call_id)?;
        let mut call = entry.lock().await;
        if !call.is_participant(user_id) || call.initiated_by == user_id {
            return Err(AppError::Forbidden("Not a callee of this call".to_string()));
        }
        if !call.answer(user_id, current_timestamp()) {
            return Err(AppError::BadRequest("Call is no longer ringing".to_string()));
        }
        self.persist(&call).await?;
        self.registry.publish(
            &conversation_topic(&call.conversation_id),
            "call_answered",
            &json!({ "call_id": call.id, "user_id": user_id }),
            None,
        );
        self.record_call_event(&call);
        Ok(CallResponse::from(call.clone()))
    }

    pub async fn reject(&self, user_id: &str, call_id: &str) -> AppResult<CallResponse> {
        let entry = self.entry(call_id)?;
        let mut call = entry.lock().await;
        if !call.is_participant(user_id) || call.initiated_by == user_id {
            return Err(AppError::Forbidden("Not a callee of this call".to_string()));
        }
        if !call.reject(user_id, current_timestamp()) {
            return Err(AppError::BadRequest("Call is no longer ringing".to_string()));
        }
        self.persist(&call).await?;
        self.registry.publish(
            &conversation_topic(&call.conversation_id),
            "call_rejected",
            &json!({ "call_id": call.id, "user_id": user_id }),
            None,
        );
        self.finish(&call).await;
        Ok(CallResponse::from(call.clone()))
    }

    pub async fn end(&self, user_id: &str, call_id: &str) -> AppResult<CallResponse> {
        let entry = self.entry(call_id)?;
        let mut call = entry.lock().await;
        if !call.is_participant(user_id) {
            return Err(AppError::Forbidden("Not a participant of this call".to_string()));
        }
        if !call.end(user_id, current_timestamp()) {
            return Err(AppError::BadRequest("Call already ended".to_string()));
        }
        self.persist(&call).await?;
        self.registry.publish(
            &conversation_topic(&call.conversation_id),
            "call_ended",
            &json!({
                "call_id": call.id,
                "ended_by": user_id,
                "duration": call.duration,
            }),
            None,
        );
        self.finish(&call).await;
        Ok(CallResponse::from(call.clone()))
    }

    pub async fn join(&self, user_id: &str, call_id: &str) -> AppResult<CallResponse> {
        let entry = self.entry(call_id)?;
        let mut call = entry.lock().await;
        let conversation = ConversationService::new(&self.db)
            .get_conversation(&call.conversation_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Conversation not found".to_string()))?;
        if !conversation.is_participant(user_id) {
            return Err(AppError::Forbidden(
                "Not a participant of this conversation".to_string(),
            ));
        }
        if !call.join(user_id, current_timestamp()) {
            return Err(AppError::BadRequest("Call already ended".to_string()));
        }
        self.persist(&call).await?;
        self.registry.publish(
            &conversation_topic(&call.conversation_id),
            "call_participant_joined",
            &json!({ "call_id": call.id, "user_id": user_id }),
            None,
        );
        Ok(CallResponse::from(call.clone()))
    }

    pub async fn leave(&self, user_id: &str, call_id: &str) -> AppResult<CallResponse> {
        let entry = self.entry(call_id)?;
        let mut call = entry.lock().await;
        if !call.is_participant(user_id) {
            return Err(AppError::Forbidden("Not a participant of this call".to_string()));
        }
        if !call.leave(user_id, current_timestamp()) {
            return Err(AppError::BadRequest("Call already ended".to_string()));
        }
        self.registry.publish(
            &conversation_topic(&call.conversation_id),
            "call_participant_left",
            &json!({ "call_id": call.id, "user_id": user_id }),
            None,
        );

        // last one out turns the lights off
        let anyone_left = call.participants.iter().any(|p| p.status == "joined");
        if !anyone_left && call.end(user_id, current_timestamp()) {
            self.registry.publish(
                &conversation_topic(&call.conversation_id),
                "call_ended",
                &json!({ "call_id": call.id, "ended_by": user_id, "duration": call.duration }),
                None,
            );
            self.persist(&call).await?;
            self.finish(&call).await;
        } else {
            self.persist(&call).await?;
        }
        Ok(CallResponse::from(call.clone()))
    }

    /// A user's websocket connections are all gone. Ringing calls they
    /// started are swept as missed; active calls see them leave.
    pub async fn handle_disconnect(&self, user_id: &str) {
        if self.registry.is_connected(user_id) {
            return;
        }
        let entries: Vec<(String, Arc<Mutex<CallRecord>>)> = self
            .active
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        for (_, entry) in entries {
            let mut call = entry.lock().await;
            if !call.is_participant(user_id) {
                continue;
            }
            match call.current_status() {
                CallStatus::Ringing if call.initiated_by == user_id => {
                    self.mark_missed(&mut call).await;
                }
                CallStatus::Active => {
                    let _ = call.leave(user_id, current_timestamp());
                    self.registry.publish(
                        &conversation_topic(&call.conversation_id),
                        "call_participant_left",
                        &json!({ "call_id": call.id, "user_id": user_id }),
                        None,
                    );
                    let anyone_left = call.participants.iter().any(|p| p.status == "joined");
                    if !anyone_left && call.end(user_id, current_timestamp()) {
                        self.registry.publish(
                            &conversation_topic(&call.conversation_id),
                            "call_ended",
                            &json!({ "call_id": call.id, "ended_by": user_id, "duration": call.duration }),
                            None,
                        );
                        if let Err(err) = self.persist(&call).await {
                            tracing::error!("Failed to persist call {}: {}", call.id, err);
                        }
                        self.finish(&call).await;
                        continue;
                    }
                }
                _ => continue,
            }
            if let Err(err) = self.persist(&call).await {
                tracing::error!("Failed to persist call {}: {}", call.id, err);
            }
        }
    }

    /// Sweep ringing calls past the ring timeout into the missed state.
    pub async fn sweep_ring_timeouts(&self) {
        let now = current_timestamp();
        let entries: Vec<Arc<Mutex<CallRecord>>> =
            self.active.iter().map(|e| e.value().clone()).collect();
        for entry in entries {
            let mut call = entry.lock().await;
            if call.current_status() == CallStatus::Ringing
                && now - call.created_at > RING_TIMEOUT_SECS
            {
                self.mark_missed(&mut call).await;
                if let Err(err) = self.persist(&call).await {
                    tracing::error!("Failed to persist call {}: {}", call.id, err);
                }
            }
        }
    }

    async fn mark_missed(&self, call: &mut CallRecord) {
        let now = current_timestamp();
        call.status = CallStatus::Missed.as_str().to_string();
        call.ended_at = Some(now);
        call.updated_at = now;
        self.registry.publish(
            &conversation_topic(&call.conversation_id),
            "call_ended",
            &json!({ "call_id": call.id, "status": "missed" }),
            None,
        );
        for participant in &call.participants {
            if participant.user_id != call.initiated_by {
                self.registry.emit_to_user(
                    &participant.user_id,
                    "call_ended",
                    &json!({ "call_id": call.id, "status": "missed" }),
                );
            }
        }
        self.notify_missed(call).await;
        self.finish(call).await;
    }

    async fn notify_missed(&self, call: &CallRecord) {
        let caller_name = crate::services::user::UserService::new(&self.db)
            .get_names(&[call.initiated_by.clone()])
            .await
            .ok()
            .and_then(|mut names| names.pop())
            .map(|u| u.name)
            .unwrap_or_else(|| "Someone".to_string());
        for participant in &call.participants {
            if participant.user_id == call.initiated_by || participant.status != "missed" {
                continue;
            }
            let input = NotificationInput {
                recipient_id: participant.user_id.clone(),
                sender_id: Some(call.initiated_by.clone()),
                notification_type: NotificationType::MissedCall,
                title: "Missed call".to_string(),
                body: format!("You missed a {} call from {}", call.call_type, caller_name),
                rich_content: None,
                context: Some(NotificationContext {
                    module: "messaging".to_string(),
                    related_entity: Some(RelatedEntity {
                        entity_type: "call".to_string(),
                        id: call.id.clone(),
                        title: None,
                    }),
                }),
                expires_at: None,
            };
            if let Err(err) = self.engine.create(input).await {
                tracing::error!("Missed-call notification failed: {}", err);
            }
        }
    }

    /// Terminal cleanup: drop the in-memory entry and leave a call_event
    /// message in the conversation, off the hot path.
    async fn finish(&self, call: &CallRecord) {
        self.active.remove(&call.id);
        self.record_call_event(call);
    }

    /// Append a call_event system message for the call's current state.
    /// Off the hot path; a failure here never blocks the transition.
    fn record_call_event(&self, call: &CallRecord) {
        let db = self.db.clone();
        let registry = self.registry.clone();
        let call = call.clone();
        tokio::spawn(async move {
            let form = MessageForm {
                content: call_summary(&call),
                message_type: Some("call_event".to_string()),
                reply_to_id: None,
                context: Some(json!({
                    "call_id": call.id,
                    "call_type": call.call_type,
                    "status": call.status,
                    "duration": call.duration,
                })),
            };
            match MessageService::new(&db)
                .send(&call.initiated_by, &call.conversation_id, &form)
                .await
            {
                Ok((message, conversation)) => {
                    registry.publish(
                        &conversation_topic(&conversation.id),
                        "new_message",
                        &serde_json::to_value(crate::models::message::MessageResponse::from(
                            message,
                        ))
                        .unwrap_or_default(),
                        None,
                    );
                }
                Err(err) => {
                    tracing::error!("Failed to record call event message: {}", err);
                }
            }
        });
    }

    pub async fn get_call(&self, call_id: &str) -> AppResult<Option<CallResponse>> {
        if let Some(entry) = self.active.get(call_id) {
            let call = entry.lock().await;
            return Ok(Some(CallResponse::from(call.clone())));
        }
        let row = sqlx::query_as::<_, CallRecord>(&format!("{} WHERE id = $1", CALL_SELECT))
            .bind(call_id)
            .fetch_optional(self.db.pool())
            .await?;
        Ok(row.map(CallResponse::from))
    }

    /// Call history for a conversation, newest first.
    pub async fn history(
        &self,
        conversation_id: &str,
        user_id: &str,
        page: i64,
        limit: i64,
    ) -> AppResult<Vec<CallResponse>> {
        let conversation = ConversationService::new(&self.db)
            .get_conversation(conversation_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Conversation not found".to_string()))?;
        if !conversation.is_participant(user_id) {
            return Err(AppError::Forbidden(
                "Not a participant of this conversation".to_string(),
            ));
        }
        let offset = (page.max(1) - 1) * limit;
        let rows = sqlx::query_as::<_, CallRecord>(&format!(
            "{} WHERE conversation_id = $1 ORDER BY created_at DESC LIMIT $2 OFFSET $3",
            CALL_SELECT
        ))
        .bind(conversation_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(self.db.pool())
        .await?;
        Ok(rows.into_iter().map(CallResponse::from).collect())
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Live (non-terminal) calls the user participates in.
    pub async fn active_for_user(&self, user_id: &str) -> Vec<CallResponse> {
        let entries: Vec<Arc<Mutex<CallRecord>>> =
            self.active.iter().map(|e| e.value().clone()).collect();
        let mut calls = Vec::new();
        for entry in entries {
            let call = entry.lock().await;
            if call.is_participant(user_id) && !call.current_status().is_terminal() {
                calls.push(CallResponse::from(call.clone()));
            }
        }
        calls
    }
}

fn call_summary(call: &CallRecord) -> String {
    match CallStatus::parse(&call.status) {
        Some(CallStatus::Ended) => {
            let duration = call.duration.unwrap_or(0);
            format!(
                "{} call ended ({}m {}s)",
                capitalize(&call.call_type),
                duration / 60,
                duration % 60
            )
        }
        Some(CallStatus::Missed) => format!("Missed {} call", call.call_type),
        Some(CallStatus::Declined) => format!("{} call declined", capitalize(&call.call_type)),
        Some(CallStatus::Initiated) | Some(CallStatus::Ringing) => {
            format!("{} call started", capitalize(&call.call_type))
        }
        Some(CallStatus::Active) => format!("{} call answered", capitalize(&call.call_type)),
        None => format!("{} call", capitalize(&call.call_type)),
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ended_call(duration: Option<i64>, status: CallStatus) -> CallRecord {
        let mut call = CallRecord::new("c1", "u1", &["u2".to_string()], CallType::Video);
        call.status = status.as_str().to_string();
        call.duration = duration;
        call
    }

    #[test]
    fn test_call_summary_ended() {
        let call = ended_call(Some(125), CallStatus::Ended);
        assert_eq!(call_summary(&call), "Video call ended (2m 5s)");
    }

    #[test]
    fn test_call_summary_ringing_and_active() {
        assert_eq!(
            call_summary(&ended_call(None, CallStatus::Ringing)),
            "Video call started"
        );
        assert_eq!(
            call_summary(&ended_call(None, CallStatus::Active)),
            "Video call answered"
        );
    }

    #[test]
    fn test_call_summary_missed_and_declined() {
        assert_eq!(
            call_summary(&ended_call(None, CallStatus::Missed)),
            "Missed video call"
        );
        assert_eq!(
            call_summary(&ended_call(None, CallStatus::Declined)),
            "Video call declined"
        );
    }
}
