/// Dispatch of client-sent websocket events to the realtime state.
///
/// Authentication happens in the transport layer before a session reaches
/// this router, so every event here carries a registered session id.
use serde_json::{json, Value as JsonValue};

use crate::db::Database;
use crate::error::{AppError, AppResult};
use crate::realtime::presence::PresenceManager;
use crate::realtime::registry::{channel_topic, conversation_topic, Registry, Session};
use crate::services::call::CallSignaling;
use crate::services::channel::ChannelService;
use crate::services::conversation::ConversationService;
use crate::services::message::MessageService;

#[derive(Clone)]
pub struct EventRouter {
    pub db: Database,
    pub registry: Registry,
    pub presence: PresenceManager,
    pub calls: CallSignaling,
}

fn data_str<'a>(data: &'a JsonValue, key: &str) -> AppResult<&'a str> {
    data.get(key)
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| AppError::BadRequest(format!("Missing field: {}", key)))
}

impl EventRouter {
    pub fn new(
        db: Database,
        registry: Registry,
        presence: PresenceManager,
        calls: CallSignaling,
    ) -> Self {
        Self {
            db,
            registry,
            presence,
            calls,
        }
    }

    fn session(&self, sid: &str) -> AppResult<Session> {
        self.registry
            .get_session(sid)
            .ok_or_else(|| AppError::Unauthorized("Session not registered".to_string()))
    }

    pub async fn dispatch(&self, sid: &str, event: &str, data: JsonValue) -> AppResult<()> {
        let session = self.session(sid)?;
        match event {
            "heartbeat" => {
                self.registry.update_heartbeat(sid);
                self.presence.touch(&session.user_id);
                Ok(())
            }
            "join_conversation" => self.join_conversation(&session, &data).await,
            "leave_conversation" => {
                let conversation_id = data_str(&data, "conversation_id")?;
                if !self.registry.leave(sid, &conversation_topic(conversation_id)) {
                    return Err(AppError::BadRequest(
                        "Not in this conversation room".to_string(),
                    ));
                }
                Ok(())
            }
            "join_channel" => {
                let channel_id = data_str(&data, "channel_id")?;
                let is_member = ChannelService::new(&self.db)
                    .is_member(channel_id, &session.user_id)
                    .await?;
                if !is_member {
                    return Err(AppError::Forbidden(
                        "Not a member of this channel".to_string(),
                    ));
                }
                self.registry
                    .join(sid, &channel_topic(channel_id))
                    .map_err(AppError::BadRequest)?;
                Ok(())
            }
            "leave_channel" => {
                let channel_id = data_str(&data, "channel_id")?;
                if !self.registry.leave(sid, &channel_topic(channel_id)) {
                    return Err(AppError::BadRequest(
                        "Not in this channel room".to_string(),
                    ));
                }
                Ok(())
            }
            "typing_start" => self.typing(&session, &data, true),
            "typing_stop" => self.typing(&session, &data, false),
            "update_presence" => self.update_presence(&session, &data),
            "call_initiate" => {
                let conversation_id = data_str(&data, "conversation_id")?;
                let call_type = data
                    .get("call_type")
                    .and_then(|v| v.as_str())
                    .unwrap_or("audio");
                self.calls
                    .initiate(&session.user_id, conversation_id, call_type)
                    .await?;
                Ok(())
            }
            "call_answer" => {
                let call_id = data_str(&data, "call_id")?;
                self.calls.answer(&session.user_id, call_id).await?;
                Ok(())
            }
            "call_reject" => {
                let call_id = data_str(&data, "call_id")?;
                self.calls.reject(&session.user_id, call_id).await?;
                Ok(())
            }
            "call_end" => {
                let call_id = data_str(&data, "call_id")?;
                self.calls.end(&session.user_id, call_id).await?;
                Ok(())
            }
            "call_join" => {
                let call_id = data_str(&data, "call_id")?;
                self.calls.join(&session.user_id, call_id).await?;
                Ok(())
            }
            "call_leave" => {
                let call_id = data_str(&data, "call_id")?;
                self.calls.leave(&session.user_id, call_id).await?;
                Ok(())
            }
            other => Err(AppError::BadRequest(format!("Unknown event: {}", other))),
        }
    }

    /// Join a conversation room. Requires participation; as a side effect
    /// all unread messages in the conversation are marked read, and a read
    /// receipt is published if any actually were.
    async fn join_conversation(&self, session: &Session, data: &JsonValue) -> AppResult<()> {
        let conversation_id = data_str(data, "conversation_id")?;

        let conversation = ConversationService::new(&self.db)
            .get_conversation(conversation_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Conversation not found".to_string()))?;
        if !conversation.is_participant(&session.user_id) {
            return Err(AppError::Forbidden(
                "Not a participant of this conversation".to_string(),
            ));
        }

        self.registry
            .join(&session.id, &conversation_topic(conversation_id))
            .map_err(AppError::BadRequest)?;

        // replay indicators that were already live before the join
        for user_id in self.presence.typing_users(conversation_id) {
            if user_id != session.user_id {
                self.registry.emit_to_session(
                    &session.id,
                    "user_typing",
                    &json!({ "conversation_id": conversation_id, "user_id": user_id }),
                );
            }
        }

        let newly_read = MessageService::new(&self.db)
            .mark_conversation_read(conversation_id, &session.user_id)
            .await?;
        if !newly_read.is_empty() {
            self.registry.publish(
                &conversation_topic(conversation_id),
                "messages_read",
                &json!({
                    "conversation_id": conversation_id,
                    "user_id": session.user_id,
                    "message_ids": newly_read,
                }),
                None,
            );
        }
        Ok(())
    }

    fn typing(&self, session: &Session, data: &JsonValue, started: bool) -> AppResult<()> {
        let conversation_id = data_str(data, "conversation_id")?;
        let payload = json!({
            "conversation_id": conversation_id,
            "user_id": session.user_id,
            "user_name": session.user_name,
        });
        if started {
            self.presence.typing_started(conversation_id, &session.user_id);
            self.registry.publish(
                &conversation_topic(conversation_id),
                "user_typing",
                &payload,
                Some(&session.id),
            );
        } else if self.presence.typing_stopped(conversation_id, &session.user_id) {
            self.registry.publish(
                &conversation_topic(conversation_id),
                "user_stopped_typing",
                &payload,
                Some(&session.id),
            );
        }
        Ok(())
    }

    fn update_presence(&self, session: &Session, data: &JsonValue) -> AppResult<()> {
        let status = data_str(data, "status")?;
        let state = self
            .presence
            .set_status(&session.user_id, status)
            .map_err(AppError::BadRequest)?;
        self.registry.broadcast_all(
            "presence_update",
            &json!({
                "user_id": state.user_id,
                "status": state.status,
                "last_active": state.last_active,
            }),
            Some(&session.id),
        );
        Ok(())
    }
}
