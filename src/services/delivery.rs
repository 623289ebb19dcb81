/// Outbound channel delivery. Each channel is an adapter posting to an HTTP
/// gateway; the notification engine fans a notification out to its resolved
/// channels concurrently and records per-channel outcomes.
use async_trait::async_trait;
use futures::future::join_all;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::models::notification::{Channel, DeliveryStatus, Notification};
use crate::models::user::User;

#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    fn channel(&self) -> Channel;

    /// Deliver one notification to one recipient. The error string becomes
    /// the recorded failure reason.
    async fn deliver(&self, recipient: &User, notification: &Notification) -> Result<(), String>;
}

pub struct PushGateway {
    client: reqwest::Client,
    endpoint: String,
}

impl PushGateway {
    pub fn new(client: reqwest::Client, endpoint: String) -> Self {
        Self { client, endpoint }
    }
}

#[async_trait]
impl ChannelAdapter for PushGateway {
    fn channel(&self) -> Channel {
        Channel::Push
    }

    async fn deliver(&self, recipient: &User, notification: &Notification) -> Result<(), String> {
        if self.endpoint.is_empty() {
            return Err("Push gateway not configured".to_string());
        }
        let endpoints = recipient.push_endpoint_list();
        if endpoints.is_empty() {
            return Err("Recipient has no registered push endpoints".to_string());
        }
        let response = self
            .client
            .post(&self.endpoint)
            .json(&json!({
                "endpoints": endpoints,
                "title": notification.title,
                "body": notification.body,
                "notification_id": notification.id,
                "type": notification.notification_type,
                "priority": notification.priority,
            }))
            .send()
            .await
            .map_err(|e| format!("Push gateway unreachable: {}", e))?;
        if !response.status().is_success() {
            return Err(format!("Push gateway returned {}", response.status()));
        }
        Ok(())
    }
}

pub struct EmailGateway {
    client: reqwest::Client,
    endpoint: String,
}

impl EmailGateway {
    pub fn new(client: reqwest::Client, endpoint: String) -> Self {
        Self { client, endpoint }
    }
}

#[async_trait]
impl ChannelAdapter for EmailGateway {
    fn channel(&self) -> Channel {
        Channel::Email
    }

    async fn deliver(&self, recipient: &User, notification: &Notification) -> Result<(), String> {
        if self.endpoint.is_empty() {
            return Err("Email gateway not configured".to_string());
        }
        let email = recipient
            .email
            .as_deref()
            .filter(|e| !e.is_empty())
            .ok_or_else(|| "Recipient has no email address".to_string())?;
        let response = self
            .client
            .post(&self.endpoint)
            .json(&json!({
                "to": email,
                "subject": notification.title,
                "body": notification.body,
                "notification_id": notification.id,
            }))
            .send()
            .await
            .map_err(|e| format!("Email gateway unreachable: {}", e))?;
        if !response.status().is_success() {
            return Err(format!("Email gateway returned {}", response.status()));
        }
        Ok(())
    }
}

pub struct SmsGateway {
    client: reqwest::Client,
    endpoint: String,
}

impl SmsGateway {
    pub fn new(client: reqwest::Client, endpoint: String) -> Self {
        Self { client, endpoint }
    }
}

#[async_trait]
impl ChannelAdapter for SmsGateway {
    fn channel(&self) -> Channel {
        Channel::Sms
    }

    async fn deliver(&self, recipient: &User, notification: &Notification) -> Result<(), String> {
        if self.endpoint.is_empty() {
            return Err("SMS gateway not configured".to_string());
        }
        let phone = recipient
            .phone
            .as_deref()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| "Recipient has no phone number".to_string())?;
        let response = self
            .client
            .post(&self.endpoint)
            .json(&json!({
                "to": phone,
                "text": format!("{}: {}", notification.title, notification.body),
                "notification_id": notification.id,
            }))
            .send()
            .await
            .map_err(|e| format!("SMS gateway unreachable: {}", e))?;
        if !response.status().is_success() {
            return Err(format!("SMS gateway returned {}", response.status()));
        }
        Ok(())
    }
}

pub struct DeliveryOutcome {
    pub status: HashMap<String, DeliveryStatus>,
    pub failure_reason: Option<String>,
}

#[derive(Clone)]
pub struct DeliveryService {
    adapters: Vec<Arc<dyn ChannelAdapter>>,
    timeout: Duration,
}

impl DeliveryService {
    pub fn new(adapters: Vec<Arc<dyn ChannelAdapter>>, timeout: Duration) -> Self {
        Self { adapters, timeout }
    }

    fn adapter(&self, channel: Channel) -> Option<&Arc<dyn ChannelAdapter>> {
        self.adapters.iter().find(|a| a.channel() == channel)
    }

    /// Fan one notification out over its external channels concurrently.
    /// The in-app channel never goes through here; it is websocket fan-out.
    pub async fn deliver(
        &self,
        recipient: &User,
        notification: &Notification,
        channels: &[Channel],
    ) -> DeliveryOutcome {
        let mut status = HashMap::new();
        let mut failure_reason = None;

        let jobs: Vec<_> = channels
            .iter()
            .filter(|c| **c != Channel::InApp)
            .map(|channel| {
                let adapter = self.adapter(*channel);
                let timeout = self.timeout;
                async move {
                    let result = match adapter {
                        Some(adapter) => {
                            match tokio::time::timeout(
                                timeout,
                                adapter.deliver(recipient, notification),
                            )
                            .await
                            {
                                Ok(result) => result,
                                Err(_) => Err(format!(
                                    "Delivery timed out after {}s",
                                    timeout.as_secs()
                                )),
                            }
                        }
                        None => Err(format!("No adapter for channel {}", channel.as_str())),
                    };
                    (*channel, result)
                }
            })
            .collect();

        for (channel, result) in join_all(jobs).await {
            match result {
                Ok(()) => {
                    status.insert(channel.as_str().to_string(), DeliveryStatus::Sent);
                }
                Err(reason) => {
                    tracing::warn!(
                        "Delivery over {} failed for notification {}: {}",
                        channel.as_str(),
                        notification.id,
                        reason
                    );
                    status.insert(channel.as_str().to_string(), DeliveryStatus::Failed);
                    failure_reason.get_or_insert(reason);
                }
            }
        }

        DeliveryOutcome {
            status,
            failure_reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedAdapter {
        channel: Channel,
        result: Result<(), String>,
    }

    #[async_trait]
    impl ChannelAdapter for FixedAdapter {
        fn channel(&self) -> Channel {
            self.channel
        }

        async fn deliver(&self, _recipient: &User, _notification: &Notification) -> Result<(), String> {
            self.result.clone()
        }
    }

    fn recipient() -> User {
        User {
            id: "u1".to_string(),
            name: "Test".to_string(),
            email: Some("t@example.com".to_string()),
            phone: None,
            role: "user".to_string(),
            profile_image_url: None,
            push_endpoints: None,
            push_endpoints_str: None,
            created_at: 0,
            updated_at: 0,
        }
    }

    fn notification() -> Notification {
        Notification {
            id: "n1".to_string(),
            recipient_id: "u1".to_string(),
            sender_id: None,
            notification_type: "system".to_string(),
            title: "t".to_string(),
            body: "b".to_string(),
            rich_content: None,
            rich_content_str: None,
            context: None,
            context_str: None,
            delivery: Default::default(),
            delivery_str: None,
            interaction: Default::default(),
            interaction_str: None,
            priority: "low".to_string(),
            relevance_score: 50,
            grouping_id: None,
            digest_id: None,
            expires_at: None,
            created_at: 0,
            updated_at: 0,
        }
    }

    #[tokio::test]
    async fn test_mixed_outcomes() {
        let service = DeliveryService::new(
            vec![
                Arc::new(FixedAdapter {
                    channel: Channel::Push,
                    result: Ok(()),
                }),
                Arc::new(FixedAdapter {
                    channel: Channel::Email,
                    result: Err("mailbox on fire".to_string()),
                }),
            ],
            Duration::from_secs(5),
        );

        let outcome = service
            .deliver(
                &recipient(),
                &notification(),
                &[Channel::InApp, Channel::Push, Channel::Email],
            )
            .await;

        assert_eq!(outcome.status.get("push"), Some(&DeliveryStatus::Sent));
        assert_eq!(outcome.status.get("email"), Some(&DeliveryStatus::Failed));
        assert!(outcome.status.get("in_app").is_none());
        assert_eq!(outcome.failure_reason.as_deref(), Some("mailbox on fire"));
    }

    #[tokio::test]
    async fn test_missing_adapter_is_failure() {
        let service = DeliveryService::new(Vec::new(), Duration::from_secs(1));
        let outcome = service
            .deliver(&recipient(), &notification(), &[Channel::Sms])
            .await;
        assert_eq!(outcome.status.get("sms"), Some(&DeliveryStatus::Failed));
    }
}
