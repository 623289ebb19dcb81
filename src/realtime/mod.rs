/// Real-time session and event layer.
///
/// - Registry: live sessions, per-topic room membership, event fan-out
/// - Presence: online/away/busy/offline tracking and typing indicators
/// - Events: client event dispatch for one WebSocket session
/// - Transport: the actix-ws endpoint and per-connection task
pub mod events;
pub mod presence;
pub mod registry;
pub mod transport;
