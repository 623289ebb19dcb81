use actix_web::{web, HttpResponse};
use serde::Deserialize;
use serde_json::json;

use crate::error::{AppError, AppResult};
use crate::middleware::AuthUser;
use crate::models::conversation::{Conversation, ConversationForm, ConversationResponse};
use crate::models::message::{Message, MessageForm, MessageResponse};
use crate::models::notification::{NotificationContext, NotificationType, RelatedEntity};
use crate::models::user::UserNameResponse;
use crate::realtime::registry::conversation_topic;
use crate::routes::ok_json;
use crate::services::conversation::ConversationService;
use crate::services::message::MessageService;
use crate::services::notification::NotificationInput;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

impl PageQuery {
    fn page(&self) -> i64 {
        self.page.unwrap_or(1).max(1)
    }

    fn limit(&self, default: i64) -> i64 {
        self.limit.unwrap_or(default).clamp(1, 100)
    }
}

pub async fn create_conversation(
    state: web::Data<AppState>,
    user: AuthUser,
    form: web::Json<ConversationForm>,
) -> AppResult<HttpResponse> {
    let conversation = ConversationService::new(&state.db)
        .create(&user.id, &form)
        .await?;
    Ok(ok_json(ConversationResponse::for_user(&conversation, &user.id)))
}

pub async fn list_conversations(
    state: web::Data<AppState>,
    user: AuthUser,
    query: web::Query<PageQuery>,
) -> AppResult<HttpResponse> {
    let conversations = ConversationService::new(&state.db)
        .list_for_user(&user.id, query.page(), query.limit(20))
        .await?;
    let responses: Vec<ConversationResponse> = conversations
        .iter()
        .map(|c| ConversationResponse::for_user(c, &user.id))
        .collect();
    Ok(ok_json(responses))
}

async fn owned_conversation(
    state: &AppState,
    conversation_id: &str,
    user_id: &str,
) -> AppResult<Conversation> {
    let conversation = ConversationService::new(&state.db)
        .get_conversation(conversation_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Conversation not found".to_string()))?;
    if !conversation.is_participant(user_id) {
        return Err(AppError::Forbidden(
            "Not a participant of this conversation".to_string(),
        ));
    }
    Ok(conversation)
}

pub async fn get_conversation(
    state: web::Data<AppState>,
    user: AuthUser,
    path: web::Path<String>,
) -> AppResult<HttpResponse> {
    let conversation = owned_conversation(&state, &path, &user.id).await?;
    Ok(ok_json(ConversationResponse::for_user(&conversation, &user.id)))
}

pub async fn delete_conversation(
    state: web::Data<AppState>,
    user: AuthUser,
    path: web::Path<String>,
) -> AppResult<HttpResponse> {
    ConversationService::new(&state.db)
        .deactivate(&path, &user.id)
        .await?;
    Ok(ok_json(json!({ "deleted": true })))
}

pub async fn list_messages(
    state: web::Data<AppState>,
    user: AuthUser,
    path: web::Path<String>,
    query: web::Query<PageQuery>,
) -> AppResult<HttpResponse> {
    let messages = MessageService::new(&state.db)
        .list(&path, &user.id, query.page(), query.limit(50))
        .await?;
    Ok(ok_json(messages))
}

pub async fn send_message(
    state: web::Data<AppState>,
    user: AuthUser,
    path: web::Path<String>,
    form: web::Json<MessageForm>,
) -> AppResult<HttpResponse> {
    let (message, conversation) = MessageService::new(&state.db)
        .send(&user.id, &path, &form)
        .await?;

    let mut response = MessageResponse::from(message.clone());
    response.sender = Some(UserNameResponse::from(user.0.clone()));

    state.registry.publish(
        &conversation_topic(&conversation.id),
        "new_message",
        &serde_json::to_value(&response).unwrap_or_default(),
        None,
    );

    notify_absent_participants(&state, &user, &message, &conversation);

    Ok(ok_json(response))
}

/// Participants without a session joined to the conversation room get a
/// new-message notification; everyone else saw the live event.
fn notify_absent_participants(
    state: &web::Data<AppState>,
    sender: &AuthUser,
    message: &Message,
    conversation: &Conversation,
) {
    let topic = conversation_topic(&conversation.id);
    let present: Vec<String> = state
        .registry
        .room_sessions(&topic)
        .iter()
        .filter_map(|sid| state.registry.get_session(sid))
        .map(|s| s.user_id)
        .collect();

    let preview: String = message.content.chars().take(120).collect();
    for participant in &conversation.participants {
        if participant == &sender.id || present.contains(participant) {
            continue;
        }
        let input = NotificationInput {
            recipient_id: participant.clone(),
            sender_id: Some(sender.id.clone()),
            notification_type: NotificationType::NewMessage,
            title: format!("New message from {}", sender.name),
            body: preview.clone(),
            rich_content: None,
            context: Some(NotificationContext {
                module: "messaging".to_string(),
                related_entity: Some(RelatedEntity {
                    entity_type: "message".to_string(),
                    id: message.id.clone(),
                    title: None,
                }),
            }),
            expires_at: None,
        };
        let engine = state.engine.clone();
        tokio::spawn(async move {
            if let Err(err) = engine.create(input).await {
                tracing::error!("New-message notification failed: {}", err);
            }
        });
    }
}

#[derive(Debug, Deserialize)]
pub struct DirectMessageForm {
    pub recipient_id: String,
    pub content: String,
    #[serde(default)]
    pub message_type: Option<String>,
    #[serde(default)]
    pub context: Option<serde_json::Value>,
}

/// First-contact send: resolves (or creates) the direct conversation with
/// the recipient, then routes through the normal pipeline.
pub async fn send_direct_message(
    state: web::Data<AppState>,
    user: AuthUser,
    form: web::Json<DirectMessageForm>,
) -> AppResult<HttpResponse> {
    if form.recipient_id == user.id {
        return Err(AppError::Validation(
            "Cannot start a conversation with yourself".to_string(),
        ));
    }
    let conversation = ConversationService::new(&state.db)
        .create(
            &user.id,
            &ConversationForm {
                participants: vec![form.recipient_id.clone()],
                title: None,
                conversation_type: Some("direct".to_string()),
            },
        )
        .await?;

    let message_form = MessageForm {
        content: form.content.clone(),
        message_type: form.message_type.clone(),
        reply_to_id: None,
        context: form.context.clone(),
    };
    let (message, conversation) = MessageService::new(&state.db)
        .send(&user.id, &conversation.id, &message_form)
        .await?;

    let mut response = MessageResponse::from(message.clone());
    response.sender = Some(UserNameResponse::from(user.0.clone()));
    state.registry.publish(
        &conversation_topic(&conversation.id),
        "new_message",
        &serde_json::to_value(&response).unwrap_or_default(),
        None,
    );
    notify_absent_participants(&state, &user, &message, &conversation);

    Ok(ok_json(json!({
        "conversation": ConversationResponse::for_user(&conversation, &user.id),
        "message": response,
    })))
}

#[derive(Debug, Deserialize)]
pub struct EditMessageForm {
    pub content: String,
}

pub async fn edit_message(
    state: web::Data<AppState>,
    user: AuthUser,
    path: web::Path<String>,
    form: web::Json<EditMessageForm>,
) -> AppResult<HttpResponse> {
    let message = MessageService::new(&state.db)
        .edit(&path, &user.id, &form.content)
        .await?;
    state.registry.publish(
        &conversation_topic(&message.conversation_id),
        "message_edited",
        &json!({
            "message_id": message.id,
            "conversation_id": message.conversation_id,
            "content": message.content,
            "edited_at": message.edited_at,
        }),
        None,
    );
    Ok(ok_json(MessageResponse::from(message)))
}

pub async fn delete_message(
    state: web::Data<AppState>,
    user: AuthUser,
    path: web::Path<String>,
) -> AppResult<HttpResponse> {
    let message = MessageService::new(&state.db)
        .delete(&path, &user.id)
        .await?;
    state.registry.publish(
        &conversation_topic(&message.conversation_id),
        "message_deleted",
        &json!({
            "message_id": message.id,
            "conversation_id": message.conversation_id,
        }),
        None,
    );
    Ok(ok_json(MessageResponse::from(message)))
}

#[derive(Debug, Deserialize)]
pub struct ReactionForm {
    pub kind: String,
}

pub async fn toggle_reaction(
    state: web::Data<AppState>,
    user: AuthUser,
    path: web::Path<String>,
    form: web::Json<ReactionForm>,
) -> AppResult<HttpResponse> {
    let (message, reactions) = MessageService::new(&state.db)
        .toggle_reaction(&path, &user.id, &form.kind)
        .await?;
    state.registry.publish(
        &conversation_topic(&message.conversation_id),
        "reaction_updated",
        &json!({
            "message_id": message.id,
            "conversation_id": message.conversation_id,
            "reactions": reactions,
        }),
        None,
    );
    Ok(ok_json(reactions))
}

pub async fn mark_read(
    state: web::Data<AppState>,
    user: AuthUser,
    path: web::Path<String>,
) -> AppResult<HttpResponse> {
    owned_conversation(&state, &path, &user.id).await?;
    let newly_read = MessageService::new(&state.db)
        .mark_conversation_read(&path, &user.id)
        .await?;
    if !newly_read.is_empty() {
        state.registry.publish(
            &conversation_topic(&path),
            "messages_read",
            &json!({
                "conversation_id": path.as_str(),
                "user_id": user.id,
                "message_ids": newly_read,
            }),
            None,
        );
    }
    Ok(ok_json(json!({ "marked": newly_read.len() })))
}

pub async fn unread_count(
    state: web::Data<AppState>,
    user: AuthUser,
) -> AppResult<HttpResponse> {
    let total = MessageService::new(&state.db).unread_total(&user.id).await?;
    Ok(ok_json(json!({ "unread": total })))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("", web::post().to(create_conversation))
        .route("", web::get().to(list_conversations))
        .route("/unread-count", web::get().to(unread_count))
        .route("/{id}", web::get().to(get_conversation))
        .route("/{id}", web::delete().to(delete_conversation))
        .route("/{id}/messages", web::get().to(list_messages))
        .route("/{id}/messages", web::post().to(send_message))
        .route("/{id}/read", web::post().to(mark_read));
}

pub fn configure_messages(cfg: &mut web::ServiceConfig) {
    cfg.route("/direct", web::post().to(send_direct_message))
        .route("/{id}", web::put().to(edit_message))
        .route("/{id}", web::delete().to(delete_message))
        .route("/{id}/reactions", web::post().to(toggle_reaction));
}
