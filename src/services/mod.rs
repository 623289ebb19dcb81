pub mod call;
pub mod channel;
pub mod connection;
pub mod conversation;
pub mod delivery;
pub mod message;
pub mod notification;
pub mod preferences;
pub mod user;
