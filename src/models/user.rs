use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A user record as owned by the platform's account service. This core only
/// reads it: identity at connect time, contact details for channel delivery.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub role: String,
    pub profile_image_url: Option<String>,
    #[sqlx(skip)]
    #[serde(skip)]
    pub push_endpoints: Option<serde_json::Value>,
    #[sqlx(default)]
    pub push_endpoints_str: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl User {
    pub fn parse_push_endpoints(&mut self) {
        if let Some(ref s) = self.push_endpoints_str {
            self.push_endpoints = serde_json::from_str(s).ok();
        }
    }

    /// Registered push endpoints, one per device.
    pub fn push_endpoint_list(&self) -> Vec<String> {
        self.push_endpoints
            .as_ref()
            .and_then(|v| v.as_array().cloned())
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str().map(|s| s.to_string()))
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct UserNameResponse {
    pub id: String,
    pub name: String,
    pub role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile_image_url: Option<String>,
}

impl From<User> for UserNameResponse {
    fn from(user: User) -> Self {
        UserNameResponse {
            id: user.id,
            name: user.name,
            role: user.role,
            profile_image_url: user.profile_image_url,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: Option<i64>,
    pub iat: Option<i64>,
}
