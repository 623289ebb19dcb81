/// Session registry and room router.
///
/// Tracks:
/// - Sessions (session id -> principal, joined rooms, heartbeat)
/// - User pool (user id -> session ids, one per device)
/// - Rooms (topic -> session ids)
/// - Senders (session id -> websocket frame sender)
use dashmap::DashMap;
use serde_json::Value as JsonValue;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use uuid::Uuid;

use crate::utils::time::current_timestamp;

/// One authenticated live connection.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub user_id: String,
    pub user_name: String,
    pub user_role: String,
    pub rooms: HashSet<String>,
    pub connected_at: i64,
    pub last_heartbeat: i64,
}

pub fn user_topic(user_id: &str) -> String {
    format!("user:{}", user_id)
}

pub fn conversation_topic(conversation_id: &str) -> String {
    format!("conversation:{}", conversation_id)
}

pub fn channel_topic(channel_id: &str) -> String {
    format!("channel:{}", channel_id)
}

/// Encode one server event as a wire frame.
pub fn encode_event(event: &str, data: &JsonValue) -> String {
    serde_json::json!({ "event": event, "data": data }).to_string()
}

/// Process-local registry handle. Sharded maps keep room membership changes
/// and fan-out contention per-topic rather than behind one global lock.
/// Rebuildable state only: nothing here survives a restart.
#[derive(Clone)]
pub struct Registry {
    sessions: Arc<DashMap<String, Session>>,
    user_pool: Arc<DashMap<String, Vec<String>>>,
    rooms: Arc<DashMap<String, HashSet<String>>>,
    senders: Arc<DashMap<String, UnboundedSender<String>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
            user_pool: Arc::new(DashMap::new()),
            rooms: Arc::new(DashMap::new()),
            senders: Arc::new(DashMap::new()),
        }
    }

    /// Register an authenticated connection and auto-join its personal topic.
    pub fn register(
        &self,
        user_id: &str,
        user_name: &str,
        user_role: &str,
        sender: UnboundedSender<String>,
    ) -> String {
        let sid = Uuid::new_v4().to_string();
        let now = current_timestamp();
        let personal = user_topic(user_id);

        let mut rooms = HashSet::new();
        rooms.insert(personal.clone());

        self.sessions.insert(
            sid.clone(),
            Session {
                id: sid.clone(),
                user_id: user_id.to_string(),
                user_name: user_name.to_string(),
                user_role: user_role.to_string(),
                rooms,
                connected_at: now,
                last_heartbeat: now,
            },
        );
        self.senders.insert(sid.clone(), sender);
        self.user_pool
            .entry(user_id.to_string())
            .or_default()
            .push(sid.clone());
        self.rooms
            .entry(personal)
            .or_default()
            .insert(sid.clone());

        tracing::info!("Registered session {} for user {}", sid, user_id);
        sid
    }

    /// Tear down a session. The sender is dropped first so no publish that
    /// observes the room afterwards can reach a dead handle.
    pub fn deregister(&self, sid: &str) -> Option<Session> {
        self.senders.remove(sid);

        let (_, session) = self.sessions.remove(sid)?;

        if let Some(mut sids) = self.user_pool.get_mut(&session.user_id) {
            sids.retain(|s| s != sid);
        }
        self.user_pool
            .remove_if(&session.user_id, |_, sids| sids.is_empty());

        for room in &session.rooms {
            if let Some(mut members) = self.rooms.get_mut(room) {
                members.remove(sid);
            }
            self.rooms.remove_if(room, |_, members| members.is_empty());
        }

        tracing::info!("Deregistered session {}", sid);
        Some(session)
    }

    pub fn get_session(&self, sid: &str) -> Option<Session> {
        self.sessions.get(sid).map(|s| s.clone())
    }

    pub fn join(&self, sid: &str, topic: &str) -> Result<(), String> {
        let mut session = self
            .sessions
            .get_mut(sid)
            .ok_or_else(|| format!("Session not found: {}", sid))?;
        session.rooms.insert(topic.to_string());
        drop(session);

        self.rooms
            .entry(topic.to_string())
            .or_default()
            .insert(sid.to_string());

        tracing::debug!("Session {} joined room {}", sid, topic);
        Ok(())
    }

    /// Returns whether the session was actually subscribed.
    pub fn leave(&self, sid: &str, topic: &str) -> bool {
        let mut was_member = false;
        if let Some(mut session) = self.sessions.get_mut(sid) {
            was_member = session.rooms.remove(topic);
        }
        if let Some(mut members) = self.rooms.get_mut(topic) {
            members.remove(sid);
        }
        self.rooms.remove_if(topic, |_, members| members.is_empty());

        if was_member {
            tracing::debug!("Session {} left room {}", sid, topic);
        }
        was_member
    }

    pub fn room_sessions(&self, topic: &str) -> Vec<String> {
        self.rooms
            .get(topic)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn user_sessions(&self, user_id: &str) -> Vec<String> {
        self.user_pool
            .get(user_id)
            .map(|sids| sids.clone())
            .unwrap_or_default()
    }

    /// Whether the user has at least one live session.
    pub fn is_connected(&self, user_id: &str) -> bool {
        !self.user_sessions(user_id).is_empty()
    }

    fn send_frame(&self, sid: &str, frame: &str) -> bool {
        match self.senders.get(sid) {
            Some(sender) => sender.send(frame.to_string()).is_ok(),
            None => false,
        }
    }

    pub fn emit_to_session(&self, sid: &str, event: &str, data: &JsonValue) -> bool {
        self.send_frame(sid, &encode_event(event, data))
    }

    pub fn emit_to_user(&self, user_id: &str, event: &str, data: &JsonValue) -> usize {
        let frame = encode_event(event, data);
        self.user_sessions(user_id)
            .iter()
            .filter(|sid| self.send_frame(sid, &frame))
            .count()
    }

    /// Best-effort fan-out to every session joined to a topic. No
    /// persistence, no retry; with nobody joined this is a no-op.
    pub fn publish(
        &self,
        topic: &str,
        event: &str,
        data: &JsonValue,
        exclude_sid: Option<&str>,
    ) -> usize {
        let frame = encode_event(event, data);
        let mut sent = 0;
        for sid in self.room_sessions(topic) {
            if Some(sid.as_str()) == exclude_sid {
                continue;
            }
            if self.send_frame(&sid, &frame) {
                sent += 1;
            }
        }
        tracing::debug!("Published {} to {} ({} sessions)", event, topic, sent);
        sent
    }

    /// Global broadcast, used for presence transitions.
    pub fn broadcast_all(&self, event: &str, data: &JsonValue, exclude_sid: Option<&str>) -> usize {
        let frame = encode_event(event, data);
        let mut sent = 0;
        for entry in self.senders.iter() {
            if Some(entry.key().as_str()) == exclude_sid {
                continue;
            }
            if entry.value().send(frame.clone()).is_ok() {
                sent += 1;
            }
        }
        sent
    }

    pub fn update_heartbeat(&self, sid: &str) {
        if let Some(mut session) = self.sessions.get_mut(sid) {
            session.last_heartbeat = current_timestamp();
        }
    }

    /// Sessions whose last heartbeat is older than `timeout_secs`.
    pub fn stale_sessions(&self, timeout_secs: i64) -> Vec<String> {
        let now = current_timestamp();
        self.sessions
            .iter()
            .filter(|entry| now - entry.last_heartbeat > timeout_secs)
            .map(|entry| entry.id.clone())
            .collect()
    }

    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            sessions: self.sessions.len(),
            users: self.user_pool.len(),
            rooms: self.rooms.len(),
        }
    }

    /// Explicit lifecycle: drop all live state (shutdown path).
    pub fn clear(&self) {
        self.senders.clear();
        self.sessions.clear();
        self.user_pool.clear();
        self.rooms.clear();
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct RegistryStats {
    pub sessions: usize,
    pub users: usize,
    pub rooms: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn connect(registry: &Registry, user: &str) -> (String, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sid = registry.register(user, user, "user", tx);
        (sid, rx)
    }

    #[tokio::test]
    async fn test_register_auto_joins_personal_topic() {
        let registry = Registry::new();
        let (sid, mut rx) = connect(&registry, "user-1");

        assert_eq!(registry.room_sessions(&user_topic("user-1")), vec![sid]);

        let sent = registry.publish(
            &user_topic("user-1"),
            "notification",
            &serde_json::json!({"id": "n1"}),
            None,
        );
        assert_eq!(sent, 1);
        let frame = rx.recv().await.unwrap();
        assert!(frame.contains("notification"));
    }

    #[tokio::test]
    async fn test_multi_device_fan_out() {
        let registry = Registry::new();
        let (_sid1, mut rx1) = connect(&registry, "user-1");
        let (_sid2, mut rx2) = connect(&registry, "user-1");

        let sent = registry.emit_to_user("user-1", "ping", &serde_json::json!({}));
        assert_eq!(sent, 2);
        assert!(rx1.recv().await.is_some());
        assert!(rx2.recv().await.is_some());
    }

    #[tokio::test]
    async fn test_join_publish_leave() {
        let registry = Registry::new();
        let (sid1, mut rx1) = connect(&registry, "user-1");
        let (sid2, mut rx2) = connect(&registry, "user-2");

        registry.join(&sid1, "conversation:c1").unwrap();
        registry.join(&sid2, "conversation:c1").unwrap();

        // exclude the sender's session from its own fan-out
        let sent = registry.publish(
            "conversation:c1",
            "new_message",
            &serde_json::json!({"id": "m1"}),
            Some(&sid1),
        );
        assert_eq!(sent, 1);
        assert!(rx2.recv().await.is_some());
        assert!(rx1.try_recv().is_err());

        assert!(registry.leave(&sid2, "conversation:c1"));
        let sent = registry.publish("conversation:c1", "new_message", &serde_json::json!({}), None);
        assert_eq!(sent, 1); // only sid1 remains
    }

    #[tokio::test]
    async fn test_leave_without_join_reports_non_membership() {
        let registry = Registry::new();
        let (sid, _rx) = connect(&registry, "user-1");
        assert!(!registry.leave(&sid, "conversation:c1"));
    }

    #[tokio::test]
    async fn test_publish_to_empty_topic_is_noop() {
        let registry = Registry::new();
        assert_eq!(
            registry.publish("conversation:none", "x", &serde_json::json!({}), None),
            0
        );
    }

    #[tokio::test]
    async fn test_deregister_removes_everywhere() {
        let registry = Registry::new();
        let (sid, _rx) = connect(&registry, "user-1");
        registry.join(&sid, "conversation:c1").unwrap();

        let session = registry.deregister(&sid).unwrap();
        assert_eq!(session.user_id, "user-1");
        assert!(registry.get_session(&sid).is_none());
        assert!(registry.user_sessions("user-1").is_empty());
        assert!(registry.room_sessions("conversation:c1").is_empty());

        // publish after teardown reaches nobody
        assert_eq!(
            registry.publish(&user_topic("user-1"), "x", &serde_json::json!({}), None),
            0
        );
    }

    #[tokio::test]
    async fn test_send_to_closed_receiver_not_counted() {
        let registry = Registry::new();
        let (_sid, rx) = connect(&registry, "user-1");
        drop(rx);
        assert_eq!(
            registry.emit_to_user("user-1", "x", &serde_json::json!({})),
            0
        );
    }

    #[tokio::test]
    async fn test_stats() {
        let registry = Registry::new();
        let (sid, _rx) = connect(&registry, "user-1");
        registry.join(&sid, "conversation:c1").unwrap();
        let stats = registry.stats();
        assert_eq!(stats.sessions, 1);
        assert_eq!(stats.users, 1);
        assert_eq!(stats.rooms, 2); // personal + conversation
    }
}
