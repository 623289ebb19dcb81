pub mod call;
pub mod conversation;
pub mod message;
pub mod notification;
pub mod preferences;
pub mod user;
