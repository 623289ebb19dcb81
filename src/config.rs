use std::env;

/// Runtime configuration, loaded from the environment at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub jwt_secret: String,
    pub cors_allow_origin: String,

    /// Seconds without a heartbeat before a session is torn down.
    pub session_timeout_secs: i64,
    /// How often the stale-session sweep runs.
    pub session_sweep_interval_secs: u64,

    /// Bounded timeout for a single external channel delivery attempt.
    pub delivery_timeout_secs: u64,
    /// Outbound adapter gateways. Empty string disables the adapter.
    pub push_gateway_url: String,
    pub email_gateway_url: String,
    pub sms_gateway_url: String,

    /// Digest sweep cadence; 0 disables the in-process scheduler.
    pub digest_interval_secs: u64,
    /// Expired-notification purge cadence.
    pub purge_interval_secs: u64,
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Config {
            host: env_or("HOST", "0.0.0.0"),
            port: env_or("PORT", "8080").parse()?,
            database_url: env::var("DATABASE_URL")
                .map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?,
            jwt_secret: env::var("JWT_SECRET")
                .map_err(|_| anyhow::anyhow!("JWT_SECRET must be set"))?,
            cors_allow_origin: env_or("CORS_ALLOW_ORIGIN", "*"),
            session_timeout_secs: env_or("SESSION_TIMEOUT_SECS", "60").parse()?,
            session_sweep_interval_secs: env_or("SESSION_SWEEP_INTERVAL_SECS", "30").parse()?,
            delivery_timeout_secs: env_or("DELIVERY_TIMEOUT_SECS", "10").parse()?,
            push_gateway_url: env_or("PUSH_GATEWAY_URL", ""),
            email_gateway_url: env_or("EMAIL_GATEWAY_URL", ""),
            sms_gateway_url: env_or("SMS_GATEWAY_URL", ""),
            digest_interval_secs: env_or("DIGEST_INTERVAL_SECS", "0").parse()?,
            purge_interval_secs: env_or("PURGE_INTERVAL_SECS", "3600").parse()?,
        })
    }
}
