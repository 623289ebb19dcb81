mod config;
mod db;
mod error;
mod middleware;
mod models;
mod realtime;
mod routes;
mod services;
mod state;
mod utils;

use actix_cors::Cors;
use actix_web::{web, App, HttpResponse, HttpServer};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::db::Database;
use crate::realtime::events::EventRouter;
use crate::realtime::presence::PresenceManager;
use crate::realtime::registry::{conversation_topic, Registry};
use crate::realtime::transport;
use crate::services::call::CallSignaling;
use crate::services::delivery::{
    ChannelAdapter, DeliveryService, EmailGateway, PushGateway, SmsGateway,
};
use crate::services::notification::NotificationEngine;
use crate::state::AppState;

/// Seconds an online user may idle before flipping to away.
const IDLE_AWAY_SECS: i64 = 300;

async fn health() -> HttpResponse {
    HttpResponse::Ok().json(json!({ "status": "ok" }))
}

async fn stats(state: web::Data<AppState>) -> HttpResponse {
    let registry = state.registry.stats();
    HttpResponse::Ok().json(json!({
        "success": true,
        "data": {
            "sessions": registry.sessions,
            "users": registry.users,
            "rooms": registry.rooms,
            "online": state.presence.online_count(),
            "active_calls": state.calls.active_count(),
        }
    }))
}

fn spawn_sweeps(state: AppState) {
    let session_state = state.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(
            session_state.config.session_sweep_interval_secs.max(1),
        ));
        loop {
            interval.tick().await;
            let stale = session_state
                .registry
                .stale_sessions(session_state.config.session_timeout_secs);
            for sid in stale {
                tracing::info!("Sweeping stale session {}", sid);
                transport::teardown(&session_state, &sid).await;
            }
        }
    });

    let typing_state = state.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(2));
        loop {
            interval.tick().await;
            for (conversation_id, user_id) in typing_state.presence.expire_typing() {
                typing_state.registry.publish(
                    &conversation_topic(&conversation_id),
                    "user_stopped_typing",
                    &json!({ "conversation_id": conversation_id, "user_id": user_id }),
                    None,
                );
            }
        }
    });

    let idle_state = state.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        loop {
            interval.tick().await;
            for changed in idle_state.presence.sweep_idle(IDLE_AWAY_SECS) {
                idle_state.registry.broadcast_all(
                    "presence_update",
                    &json!({ "user_id": changed.user_id, "status": changed.status }),
                    None,
                );
            }
        }
    });

    let ring_state = state.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(5));
        loop {
            interval.tick().await;
            ring_state.calls.sweep_ring_timeouts().await;
        }
    });

    let purge_state = state.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(
            purge_state.config.purge_interval_secs.max(60),
        ));
        loop {
            interval.tick().await;
            if let Err(err) = purge_state.engine.purge_expired().await {
                tracing::error!("Notification purge failed: {}", err);
            }
        }
    });

    if state.config.digest_interval_secs > 0 {
        let digest_state = state;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(
                digest_state.config.digest_interval_secs,
            ));
            loop {
                interval.tick().await;
                if let Err(err) = digest_state.engine.run_digests().await {
                    tracing::error!("Digest generation failed: {}", err);
                }
            }
        });
    }
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Arc::new(Config::from_env()?);
    tracing::info!("Starting workbridge-comms on {}:{}", config.host, config.port);

    let db = Database::new(&config.database_url).await?;
    db.run_migrations().await?;
    tracing::info!("Database ready");

    let registry = Registry::new();
    let presence = PresenceManager::new();

    let http_client = reqwest::Client::new();
    let adapters: Vec<Arc<dyn ChannelAdapter>> = vec![
        Arc::new(PushGateway::new(
            http_client.clone(),
            config.push_gateway_url.clone(),
        )),
        Arc::new(EmailGateway::new(
            http_client.clone(),
            config.email_gateway_url.clone(),
        )),
        Arc::new(SmsGateway::new(
            http_client,
            config.sms_gateway_url.clone(),
        )),
    ];
    let delivery = DeliveryService::new(
        adapters,
        Duration::from_secs(config.delivery_timeout_secs.max(1)),
    );
    let engine = NotificationEngine::new(db.clone(), registry.clone(), delivery);
    let calls = CallSignaling::new(db.clone(), registry.clone(), engine.clone());
    let router = EventRouter::new(
        db.clone(),
        registry.clone(),
        presence.clone(),
        calls.clone(),
    );

    let state = AppState {
        db,
        config: config.clone(),
        registry,
        presence,
        calls,
        engine,
        router,
    };

    spawn_sweeps(state.clone());

    let bind_addr = (config.host.clone(), config.port);
    let state_for_shutdown = state.clone();
    let app_state = web::Data::new(state);
    HttpServer::new(move || {
        let cors = if app_state.config.cors_allow_origin == "*" {
            Cors::permissive()
        } else {
            Cors::default()
                .allowed_origin(&app_state.config.cors_allow_origin)
                .allow_any_method()
                .allow_any_header()
                .supports_credentials()
        };

        App::new()
            .app_data(app_state.clone())
            .wrap(cors)
            .route("/health", web::get().to(health))
            .route("/ws", web::get().to(transport::websocket_handler))
            .service(
                web::scope("/api")
                    .wrap(middleware::AuthMiddleware)
                    .route("/stats", web::get().to(stats))
                    .service(web::scope("/conversations").configure(routes::conversations::configure))
                    .service(web::scope("/messages").configure(routes::conversations::configure_messages))
                    .service(web::scope("/calls").configure(routes::calls::configure))
                    .service(web::scope("/notifications").configure(routes::notifications::configure)),
            )
    })
    .bind(bind_addr)?
    .run()
    .await?;

    state_for_shutdown.registry.clear();
    Ok(())
}
