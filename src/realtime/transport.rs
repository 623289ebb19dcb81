/// Websocket endpoint. Owns the handshake, the frame pump, and teardown.
use actix_web::{web, HttpRequest, HttpResponse};
use actix_ws::{CloseCode, CloseReason, Message};
use futures_util::StreamExt;
use serde_json::{json, Value as JsonValue};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::realtime::registry::encode_event;
use crate::services::user::UserService;
use crate::state::AppState;
use crate::utils::auth::verify_jwt;

/// How long an unauthenticated connection may hold a socket.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

struct ClientFrame {
    event: String,
    data: JsonValue,
}

fn parse_frame(text: &str) -> Option<ClientFrame> {
    let value: JsonValue = serde_json::from_str(text).ok()?;
    let event = value.get("event")?.as_str()?.to_string();
    let data = value.get("data").cloned().unwrap_or(JsonValue::Null);
    Some(ClientFrame { event, data })
}

pub async fn websocket_handler(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
) -> Result<HttpResponse, actix_web::Error> {
    let (response, session, msg_stream) = actix_ws::handle(&req, stream)?;
    actix_web::rt::spawn(run_connection(session, msg_stream, state));
    Ok(response)
}

async fn run_connection(
    mut ws: actix_ws::Session,
    mut msg_stream: actix_ws::MessageStream,
    state: web::Data<AppState>,
) {
    // First frame must be an authenticate event carrying a valid token.
    let user = match authenticate(&mut ws, &mut msg_stream, &state).await {
        Some(user) => user,
        None => {
            let _ = ws
                .close(Some(CloseReason {
                    code: CloseCode::Policy,
                    description: Some("Authentication required".to_string()),
                }))
                .await;
            return;
        }
    };

    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let sid = state
        .registry
        .register(&user.id, &user.name, &user.role, tx);

    if state.presence.session_opened(&user.id) {
        state.registry.broadcast_all(
            "presence_update",
            &json!({ "user_id": user.id, "status": "online" }),
            Some(&sid),
        );
    }

    // snapshot so the client does not have to wait for broadcasts
    let _ = ws
        .text(encode_event(
            "connected",
            &json!({
                "session_id": sid,
                "user_id": user.id,
                "status": state.presence.status_of(&user.id),
                "online_users": state.presence.online_users(),
            }),
        ))
        .await;

    loop {
        tokio::select! {
            frame = rx.recv() => {
                match frame {
                    Some(frame) => {
                        if ws.text(frame).await.is_err() {
                            break;
                        }
                    }
                    // registry dropped the sender (stale-session sweep)
                    None => break,
                }
            }
            msg = msg_stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let Some(frame) = parse_frame(&text) else {
                            let _ = ws
                                .text(encode_event("error", &json!({"detail": "Malformed frame"})))
                                .await;
                            continue;
                        };
                        if let Err(err) = state.router.dispatch(&sid, &frame.event, frame.data).await {
                            tracing::debug!("Event {} failed for {}: {}", frame.event, sid, err);
                            let _ = ws
                                .text(encode_event(
                                    "error",
                                    &json!({ "event": frame.event, "detail": err.to_string() }),
                                ))
                                .await;
                        }
                    }
                    Some(Ok(Message::Ping(bytes))) => {
                        state.registry.update_heartbeat(&sid);
                        if ws.pong(&bytes).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        state.registry.update_heartbeat(&sid);
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        tracing::debug!("Websocket error on {}: {}", sid, err);
                        break;
                    }
                }
            }
        }
    }

    teardown(&state, &sid).await;
    let _ = ws.close(None).await;
}

async fn authenticate(
    ws: &mut actix_ws::Session,
    msg_stream: &mut actix_ws::MessageStream,
    state: &web::Data<AppState>,
) -> Option<crate::models::user::User> {
    let first = tokio::time::timeout(HANDSHAKE_TIMEOUT, msg_stream.next())
        .await
        .ok()??;
    let text = match first {
        Ok(Message::Text(text)) => text,
        _ => return None,
    };
    let frame = parse_frame(&text)?;
    if frame.event != "authenticate" {
        return None;
    }
    let token = frame.data.get("token")?.as_str()?;

    let claims = match verify_jwt(token, &state.config.jwt_secret) {
        Ok(claims) => claims,
        Err(err) => {
            tracing::debug!("Websocket auth rejected: {}", err);
            let _ = ws
                .text(encode_event("error", &json!({"detail": "Invalid token"})))
                .await;
            return None;
        }
    };

    match UserService::new(&state.db).get_user_by_id(&claims.sub).await {
        Ok(Some(user)) => Some(user),
        Ok(None) => None,
        Err(err) => {
            tracing::error!("User lookup failed during handshake: {}", err);
            None
        }
    }
}

/// Shared with the stale-session sweep: drop the session and emit the
/// offline transition if this was the user's last connection.
pub async fn teardown(state: &AppState, sid: &str) {
    let Some(session) = state.registry.deregister(sid) else {
        return;
    };
    state.calls.handle_disconnect(&session.user_id).await;
    if state.presence.session_closed(&session.user_id) {
        state.registry.broadcast_all(
            "presence_update",
            &json!({ "user_id": session.user_id, "status": "offline" }),
            None,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_frame() {
        let frame = parse_frame(r#"{"event":"heartbeat","data":{}}"#).unwrap();
        assert_eq!(frame.event, "heartbeat");

        let frame = parse_frame(r#"{"event":"typing_start","data":{"conversation_id":"c1"}}"#).unwrap();
        assert_eq!(frame.data["conversation_id"], "c1");

        assert!(parse_frame("not json").is_none());
        assert!(parse_frame(r#"{"data":{}}"#).is_none());
    }

    #[test]
    fn test_parse_frame_missing_data_defaults_null() {
        let frame = parse_frame(r#"{"event":"heartbeat"}"#).unwrap();
        assert!(frame.data.is_null());
    }
}
