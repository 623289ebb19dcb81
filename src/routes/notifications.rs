use actix_web::{web, HttpResponse};
use serde::Deserialize;
use serde_json::json;
use validator::Validate;

use crate::error::{AppError, AppResult};
use crate::middleware::AuthUser;
use crate::models::notification::{
    NotificationContext, NotificationType, Priority, RichContent,
};
use crate::models::preferences::NotificationPreferences;
use crate::routes::ok_json;
use crate::services::notification::{ListFilters, NotificationInput};
use crate::services::preferences::PreferencesService;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub unread_only: Option<bool>,
    #[serde(rename = "type")]
    pub notification_type: Option<String>,
    pub module: Option<String>,
    pub priority: Option<String>,
    pub grouped: Option<bool>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

pub async fn list_notifications(
    state: web::Data<AppState>,
    user: AuthUser,
    query: web::Query<ListQuery>,
) -> AppResult<HttpResponse> {
    let priority = match query.priority.as_deref() {
        Some(raw) => Some(
            Priority::parse(raw)
                .ok_or_else(|| AppError::BadRequest(format!("Invalid priority: {}", raw)))?,
        ),
        None => None,
    };
    let notification_type = match query.notification_type.as_deref() {
        Some(raw) => Some(
            NotificationType::parse(raw)
                .ok_or_else(|| AppError::BadRequest(format!("Invalid notification type: {}", raw)))?,
        ),
        None => None,
    };
    let filters = ListFilters {
        unread_only: query.unread_only.unwrap_or(false),
        notification_type,
        module: query.module.clone(),
        priority,
        page: query.page.unwrap_or(1),
        limit: query.limit.unwrap_or(20),
    };
    let list = state
        .engine
        .list(&user.id, &filters, query.grouped.unwrap_or(true))
        .await?;
    Ok(ok_json(list))
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateForm {
    #[validate(length(min = 1))]
    pub recipient_id: String,
    #[serde(rename = "type")]
    pub notification_type: String,
    #[validate(length(min = 1, max = 200))]
    pub title: String,
    #[validate(length(min = 1, max = 2000))]
    pub body: String,
    pub rich_content: Option<RichContent>,
    pub context: Option<NotificationContext>,
    pub expires_at: Option<i64>,
}

/// Creation endpoint for the platform's other modules. The caller becomes
/// the sender for relevance scoring.
pub async fn create_notification(
    state: web::Data<AppState>,
    user: AuthUser,
    form: web::Json<CreateForm>,
) -> AppResult<HttpResponse> {
    form.validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;
    let notification_type = NotificationType::parse(&form.notification_type).ok_or_else(|| {
        AppError::Validation(format!("Invalid notification type: {}", form.notification_type))
    })?;
    let form = form.into_inner();
    let created = state
        .engine
        .create(NotificationInput {
            recipient_id: form.recipient_id,
            sender_id: Some(user.id.clone()),
            notification_type,
            title: form.title,
            body: form.body,
            rich_content: form.rich_content,
            context: form.context,
            expires_at: form.expires_at,
        })
        .await?;
    match created {
        Some(notification) => Ok(ok_json(notification)),
        None => Ok(ok_json(json!({ "suppressed": true }))),
    }
}

pub async fn unread_count(
    state: web::Data<AppState>,
    user: AuthUser,
) -> AppResult<HttpResponse> {
    let count = state.engine.unread_count(&user.id).await?;
    Ok(ok_json(json!({ "unread": count })))
}

pub async fn mark_read(
    state: web::Data<AppState>,
    user: AuthUser,
    path: web::Path<String>,
) -> AppResult<HttpResponse> {
    let notification = state.engine.mark_read(&path, &user.id).await?;
    state.engine.push_unread_count(&user.id).await;
    Ok(ok_json(notification))
}

pub async fn mark_all_read(
    state: web::Data<AppState>,
    user: AuthUser,
) -> AppResult<HttpResponse> {
    let marked = state.engine.mark_all_read(&user.id).await?;
    state.engine.push_unread_count(&user.id).await;
    Ok(ok_json(json!({ "marked": marked })))
}

#[derive(Debug, Deserialize)]
pub struct InteractionForm {
    pub kind: String,
    pub action: Option<String>,
}

pub async fn record_interaction(
    state: web::Data<AppState>,
    user: AuthUser,
    path: web::Path<String>,
    form: web::Json<InteractionForm>,
) -> AppResult<HttpResponse> {
    let notification = state
        .engine
        .record_interaction(&path, &user.id, &form.kind, form.action.as_deref())
        .await?;
    Ok(ok_json(notification))
}

pub async fn delete_notification(
    state: web::Data<AppState>,
    user: AuthUser,
    path: web::Path<String>,
) -> AppResult<HttpResponse> {
    state.engine.delete(&path, &user.id).await?;
    state.engine.push_unread_count(&user.id).await;
    Ok(ok_json(json!({ "deleted": true })))
}

pub async fn delivery_stats(
    state: web::Data<AppState>,
    user: AuthUser,
) -> AppResult<HttpResponse> {
    let stats = state.engine.delivery_stats(&user.id).await?;
    Ok(ok_json(stats))
}

pub async fn get_preferences(
    state: web::Data<AppState>,
    user: AuthUser,
) -> AppResult<HttpResponse> {
    let preferences = PreferencesService::new(&state.db).get(&user.id).await?;
    Ok(ok_json(preferences))
}

pub async fn update_preferences(
    state: web::Data<AppState>,
    user: AuthUser,
    form: web::Json<NotificationPreferences>,
) -> AppResult<HttpResponse> {
    let preferences = PreferencesService::new(&state.db)
        .update(&user.id, &form)
        .await?;
    Ok(ok_json(preferences))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("", web::get().to(list_notifications))
        .route("", web::post().to(create_notification))
        .route("/unread-count", web::get().to(unread_count))
        .route("/read-all", web::post().to(mark_all_read))
        .route("/stats", web::get().to(delivery_stats))
        .route("/preferences", web::get().to(get_preferences))
        .route("/preferences", web::put().to(update_preferences))
        .route("/{id}/read", web::post().to(mark_read))
        .route("/{id}/interaction", web::post().to(record_interaction))
        .route("/{id}", web::delete().to(delete_notification));
}
