use actix_web::{web, HttpResponse};
use serde::Deserialize;

use crate::error::{AppError, AppResult};
use crate::middleware::AuthUser;
use crate::routes::ok_json;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

pub async fn get_call(
    state: web::Data<AppState>,
    user: AuthUser,
    path: web::Path<String>,
) -> AppResult<HttpResponse> {
    let call = state
        .calls
        .get_call(&path)
        .await?
        .ok_or_else(|| AppError::NotFound("Call not found".to_string()))?;
    if !call.participants.iter().any(|p| p.user_id == user.id) {
        return Err(AppError::Forbidden("Not a participant of this call".to_string()));
    }
    Ok(ok_json(call))
}

pub async fn active_calls(
    state: web::Data<AppState>,
    user: AuthUser,
) -> AppResult<HttpResponse> {
    Ok(ok_json(state.calls.active_for_user(&user.id).await))
}

pub async fn call_history(
    state: web::Data<AppState>,
    user: AuthUser,
    path: web::Path<String>,
    query: web::Query<HistoryQuery>,
) -> AppResult<HttpResponse> {
    let page = query.page.unwrap_or(1).max(1);
    let limit = query.limit.unwrap_or(20).clamp(1, 100);
    let history = state.calls.history(&path, &user.id, page, limit).await?;
    Ok(ok_json(history))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/active", web::get().to(active_calls))
        .route("/history/{conversation_id}", web::get().to(call_history))
        .route("/{id}", web::get().to(get_call));
}
