use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::HashMap;

use crate::models::notification::{Channel, NotificationType, Priority};

/// Global per-channel toggles. In-app delivery is not configurable here; it
/// is always attempted for a connected recipient.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelToggles {
    pub push: bool,
    pub email: bool,
    pub sms: bool,
}

impl Default for ChannelToggles {
    fn default() -> Self {
        ChannelToggles {
            push: true,
            email: true,
            sms: false,
        }
    }
}

impl ChannelToggles {
    pub fn allows(&self, channel: Channel) -> bool {
        match channel {
            Channel::InApp => true,
            Channel::Push => self.push,
            Channel::Email => self.email,
            Channel::Sms => self.sms,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypePreference {
    pub enabled: bool,
    #[serde(default)]
    pub channels: Vec<Channel>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
}

impl Default for TypePreference {
    fn default() -> Self {
        TypePreference {
            enabled: true,
            channels: vec![Channel::Push],
            priority: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuietHours {
    pub enabled: bool,
    pub start: String, // HH:MM
    pub end: String,   // HH:MM
}

impl Default for QuietHours {
    fn default() -> Self {
        QuietHours {
            enabled: false,
            start: "22:00".to_string(),
            end: "08:00".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateCaps {
    pub enabled: bool,
    pub max_per_hour: i64,
    pub max_per_day: i64,
}

impl Default for RateCaps {
    fn default() -> Self {
        RateCaps {
            enabled: true,
            max_per_hour: 10,
            max_per_day: 50,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DigestSettings {
    pub enabled: bool,
    pub frequency: String, // daily | weekly | monthly
}

impl Default for DigestSettings {
    fn default() -> Self {
        DigestSettings {
            enabled: false,
            frequency: "daily".to_string(),
        }
    }
}

impl DigestSettings {
    /// Window the digest sweep collects from, in hours.
    pub fn window_hours(&self) -> i64 {
        match self.frequency.as_str() {
            "weekly" => 168,
            "monthly" => 720,
            _ => 24,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmartSettings {
    pub grouping: bool,
    pub relevance_threshold: i32,
}

impl Default for SmartSettings {
    fn default() -> Self {
        SmartSettings {
            grouping: true,
            relevance_threshold: 50,
        }
    }
}

/// One preference document per principal, lazily created with defaults on
/// first access and stored as a single JSONB blob.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotificationPreferences {
    #[serde(default)]
    pub channels: ChannelToggles,
    #[serde(default)]
    pub types: HashMap<String, TypePreference>,
    #[serde(default)]
    pub quiet_hours: QuietHours,
    #[serde(default)]
    pub rate_caps: RateCaps,
    #[serde(default)]
    pub digest: DigestSettings,
    #[serde(default)]
    pub smart: SmartSettings,
}

impl NotificationPreferences {
    pub fn type_preference(&self, ty: NotificationType) -> TypePreference {
        self.types.get(ty.as_str()).cloned().unwrap_or_default()
    }

    /// Resolve the delivery channel set for one notification type: in-app
    /// always, plus the per-type channel list gated by the global toggles.
    pub fn channels_for(&self, ty: NotificationType) -> Vec<Channel> {
        let mut resolved = vec![Channel::InApp];
        let type_pref = self.type_preference(ty);
        if type_pref.enabled {
            for channel in type_pref.channels {
                if self.channels.allows(channel) && !resolved.contains(&channel) {
                    resolved.push(channel);
                }
            }
        }
        resolved
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct PreferencesRow {
    pub user_id: String,
    pub data_str: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl PreferencesRow {
    pub fn preferences(&self) -> NotificationPreferences {
        self.data_str
            .as_ref()
            .and_then(|s| serde_json::from_str(s).ok())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let prefs = NotificationPreferences::default();
        assert!(prefs.channels.push);
        assert!(prefs.channels.email);
        assert!(!prefs.channels.sms);
        assert_eq!(prefs.rate_caps.max_per_hour, 10);
        assert_eq!(prefs.smart.relevance_threshold, 50);
    }

    #[test]
    fn test_channels_always_include_in_app() {
        let mut prefs = NotificationPreferences::default();
        prefs.types.insert(
            "new_message".to_string(),
            TypePreference {
                enabled: false,
                channels: vec![Channel::Push, Channel::Email],
                priority: None,
            },
        );
        let channels = prefs.channels_for(NotificationType::NewMessage);
        assert_eq!(channels, vec![Channel::InApp]);
    }

    #[test]
    fn test_global_toggle_gates_type_channels() {
        let mut prefs = NotificationPreferences::default();
        prefs.channels.email = false;
        prefs.types.insert(
            "new_message".to_string(),
            TypePreference {
                enabled: true,
                channels: vec![Channel::Push, Channel::Email],
                priority: None,
            },
        );
        let channels = prefs.channels_for(NotificationType::NewMessage);
        assert!(channels.contains(&Channel::Push));
        assert!(!channels.contains(&Channel::Email));
    }

    #[test]
    fn test_channels_deduplicated() {
        let mut prefs = NotificationPreferences::default();
        prefs.types.insert(
            "new_message".to_string(),
            TypePreference {
                enabled: true,
                channels: vec![Channel::Push, Channel::Push, Channel::InApp],
                priority: None,
            },
        );
        let channels = prefs.channels_for(NotificationType::NewMessage);
        assert_eq!(
            channels.iter().filter(|c| **c == Channel::Push).count(),
            1
        );
        assert_eq!(
            channels.iter().filter(|c| **c == Channel::InApp).count(),
            1
        );
    }

    #[test]
    fn test_digest_window() {
        let mut digest = DigestSettings::default();
        assert_eq!(digest.window_hours(), 24);
        digest.frequency = "weekly".to_string();
        assert_eq!(digest.window_hours(), 168);
    }

    #[test]
    fn test_preferences_round_trip() {
        let prefs = NotificationPreferences::default();
        let json = serde_json::to_string(&prefs).unwrap();
        let parsed: NotificationPreferences = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.rate_caps.max_per_day, prefs.rate_caps.max_per_day);
    }
}
