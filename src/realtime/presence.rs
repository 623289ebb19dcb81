/// Presence tracking and typing indicators.
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::utils::time::current_timestamp;

pub const PRESENCE_STATUSES: &[&str] = &["online", "away", "busy", "offline"];

/// How long a typing indicator lives without a refresh, in seconds.
pub const TYPING_TTL_SECS: i64 = 5;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceState {
    pub user_id: String,
    pub status: String,
    pub session_count: usize,
    pub last_active: i64,
}

#[derive(Debug, Clone)]
struct TypingEntry {
    started_at: i64,
}

/// In-memory presence map. Derived state: a user is online while they hold
/// at least one registered session, offline otherwise, with away/busy as
/// explicit overrides that last until the next transition.
#[derive(Clone)]
pub struct PresenceManager {
    users: Arc<DashMap<String, PresenceState>>,
    // (conversation_id, user_id) -> typing entry
    typing: Arc<DashMap<(String, String), TypingEntry>>,
}

impl PresenceManager {
    pub fn new() -> Self {
        Self {
            users: Arc::new(DashMap::new()),
            typing: Arc::new(DashMap::new()),
        }
    }

    /// A session opened for the user. Returns true when this was the first
    /// one, i.e. the user just came online.
    pub fn session_opened(&self, user_id: &str) -> bool {
        let mut entry = self
            .users
            .entry(user_id.to_string())
            .or_insert_with(|| PresenceState {
                user_id: user_id.to_string(),
                status: "offline".to_string(),
                session_count: 0,
                last_active: 0,
            });
        entry.session_count += 1;
        entry.last_active = current_timestamp();
        let came_online = entry.session_count == 1;
        if came_online {
            entry.status = "online".to_string();
        }
        came_online
    }

    /// A session closed. Returns true when it was the last one and the user
    /// went offline.
    pub fn session_closed(&self, user_id: &str) -> bool {
        let went_offline = match self.users.get_mut(user_id) {
            Some(mut entry) => {
                entry.session_count = entry.session_count.saturating_sub(1);
                entry.last_active = current_timestamp();
                entry.session_count == 0
            }
            None => false,
        };
        if went_offline {
            self.users.remove(user_id);
            self.clear_typing_for_user(user_id);
        }
        went_offline
    }

    /// Explicit status change. Rejects unknown statuses and users with no
    /// live session.
    pub fn set_status(&self, user_id: &str, status: &str) -> Result<PresenceState, String> {
        if !PRESENCE_STATUSES.contains(&status) {
            return Err(format!("Invalid presence status: {}", status));
        }
        let mut entry = self
            .users
            .get_mut(user_id)
            .ok_or_else(|| format!("User not connected: {}", user_id))?;
        entry.status = status.to_string();
        entry.last_active = current_timestamp();
        Ok(entry.clone())
    }

    pub fn get(&self, user_id: &str) -> Option<PresenceState> {
        self.users.get(user_id).map(|e| e.clone())
    }

    pub fn status_of(&self, user_id: &str) -> String {
        self.get(user_id)
            .map(|s| s.status)
            .unwrap_or_else(|| "offline".to_string())
    }

    pub fn online_users(&self) -> Vec<PresenceState> {
        self.users.iter().map(|e| e.clone()).collect()
    }

    pub fn online_count(&self) -> usize {
        self.users.len()
    }

    pub fn typing_started(&self, conversation_id: &str, user_id: &str) {
        self.typing.insert(
            (conversation_id.to_string(), user_id.to_string()),
            TypingEntry {
                started_at: current_timestamp(),
            },
        );
    }

    /// Returns true when an indicator was actually cleared, so the stop
    /// event is only broadcast once.
    pub fn typing_stopped(&self, conversation_id: &str, user_id: &str) -> bool {
        self.typing
            .remove(&(conversation_id.to_string(), user_id.to_string()))
            .is_some()
    }

    pub fn typing_users(&self, conversation_id: &str) -> Vec<String> {
        self.typing
            .iter()
            .filter(|e| e.key().0 == conversation_id)
            .map(|e| e.key().1.clone())
            .collect()
    }

    fn clear_typing_for_user(&self, user_id: &str) {
        self.typing.retain(|key, _| key.1 != user_id);
    }

    /// Drop indicators past their TTL and return them so the sweep can
    /// broadcast user_stopped_typing for each.
    pub fn expire_typing(&self) -> Vec<(String, String)> {
        let now = current_timestamp();
        let expired: Vec<(String, String)> = self
            .typing
            .iter()
            .filter(|e| now - e.started_at > TYPING_TTL_SECS)
            .map(|e| e.key().clone())
            .collect();
        for key in &expired {
            self.typing.remove(key);
        }
        expired
    }

    /// Flip long-idle online users to away. Returns the users that changed.
    pub fn sweep_idle(&self, idle_secs: i64) -> Vec<PresenceState> {
        let now = current_timestamp();
        let mut changed = Vec::new();
        for mut entry in self.users.iter_mut() {
            if entry.status == "online" && now - entry.last_active > idle_secs {
                entry.status = "away".to_string();
                changed.push(entry.clone());
            }
        }
        changed
    }

    pub fn touch(&self, user_id: &str) {
        if let Some(mut entry) = self.users.get_mut(user_id) {
            entry.last_active = current_timestamp();
        }
    }
}

impl Default for PresenceManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_counting() {
        let presence = PresenceManager::new();

        assert!(presence.session_opened("user-1"));
        assert!(!presence.session_opened("user-1")); // second device
        assert_eq!(presence.status_of("user-1"), "online");

        assert!(!presence.session_closed("user-1"));
        assert_eq!(presence.status_of("user-1"), "online");

        assert!(presence.session_closed("user-1"));
        assert_eq!(presence.status_of("user-1"), "offline");
    }

    #[test]
    fn test_set_status_requires_connection() {
        let presence = PresenceManager::new();
        assert!(presence.set_status("user-1", "busy").is_err());

        presence.session_opened("user-1");
        let state = presence.set_status("user-1", "busy").unwrap();
        assert_eq!(state.status, "busy");

        assert!(presence.set_status("user-1", "invisible").is_err());
    }

    #[test]
    fn test_typing_indicators() {
        let presence = PresenceManager::new();
        presence.session_opened("user-1");

        presence.typing_started("c1", "user-1");
        assert_eq!(presence.typing_users("c1"), vec!["user-1"]);

        assert!(presence.typing_stopped("c1", "user-1"));
        assert!(!presence.typing_stopped("c1", "user-1"));
        assert!(presence.typing_users("c1").is_empty());
    }

    #[test]
    fn test_disconnect_clears_typing() {
        let presence = PresenceManager::new();
        presence.session_opened("user-1");
        presence.typing_started("c1", "user-1");
        presence.typing_started("c2", "user-1");

        presence.session_closed("user-1");
        assert!(presence.typing_users("c1").is_empty());
        assert!(presence.typing_users("c2").is_empty());
    }

    #[test]
    fn test_unknown_user_is_offline() {
        let presence = PresenceManager::new();
        assert_eq!(presence.status_of("ghost"), "offline");
        assert!(presence.get("ghost").is_none());
    }
}
