use std::sync::Arc;

use crate::config::Config;
use crate::db::Database;
use crate::realtime::events::EventRouter;
use crate::realtime::presence::PresenceManager;
use crate::realtime::registry::Registry;
use crate::services::call::CallSignaling;
use crate::services::notification::NotificationEngine;

/// Shared application state handed to every actix worker.
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub config: Arc<Config>,
    pub registry: Registry,
    pub presence: PresenceManager,
    pub calls: CallSignaling,
    pub engine: NotificationEngine,
    pub router: EventRouter,
}
