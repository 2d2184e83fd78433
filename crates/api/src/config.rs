//! API server configuration

/// Configuration errors raised at startup
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_address: String,
    /// HS256 secret used by the identity service to sign access tokens
    pub jwt_secret: String,
    /// Shared secret the cron dispatcher sends in `x-cron-secret`
    pub cron_secret: String,
    /// HMAC key for payment callbacks. Empty rejects every callback.
    pub payment_webhook_secret: String,
    pub allowed_origins: Vec<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            database_url: required("DATABASE_URL")?,
            bind_address: std::env::var("BIND_ADDRESS")
                .unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
            jwt_secret: required("JWT_SECRET")?,
            cron_secret: required("CRON_SECRET")?,
            payment_webhook_secret: std::env::var("PAYMENT_WEBHOOK_SECRET").unwrap_or_default(),
            allowed_origins: std::env::var("ALLOWED_ORIGINS")
                .unwrap_or_else(|_| "http://localhost:3000,http://127.0.0.1:3000".to_string())
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
        })
    }
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    std::env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or(ConfigError::Missing(name))
}
