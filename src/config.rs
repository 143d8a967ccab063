//! Application configuration management.
//!
//! This module handles loading configuration from environment variables.
//! It uses the `envy` crate to automatically deserialize environment variables into a type-safe struct.

use serde::Deserialize;

/// Application configuration loaded from environment variables.
///
/// # Environment Variables
///
/// - `DATABASE_URL` (required): PostgreSQL connection string
/// - `JWT_SECRET` (required): HS256 signing key for bearer tokens
/// - `SERVER_PORT` (optional): HTTP server port, defaults to 3000
///
/// Every other field has a default and is documented on the field itself.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database_url: String,

    #[serde(default = "default_port")]
    pub server_port: u16,

    #[serde(default = "default_max_connections")]
    pub database_max_connections: u32,

    pub jwt_secret: String,

    #[serde(default = "default_jwt_ttl_hours")]
    pub jwt_ttl_hours: i64,

    /// Public base URL, used to build email verification links.
    #[serde(default = "default_app_base_url")]
    pub app_base_url: String,

    /// Created at boot when no super admin exists yet.
    pub bootstrap_admin_username: Option<String>,
    pub bootstrap_admin_password: Option<String>,

    #[serde(default = "default_gateway_url")]
    pub payment_gateway_url: String,

    #[serde(default)]
    pub payment_gateway_server_key: String,

    /// Lifetime of a gateway charge before it expires.
    #[serde(default = "default_payment_expiry_minutes")]
    pub payment_expiry_minutes: i64,

    #[serde(default = "default_mail_api_url")]
    pub mail_api_url: String,

    #[serde(default)]
    pub mail_api_key: String,

    #[serde(default = "default_mail_from")]
    pub mail_from: String,

    #[serde(default = "default_push_api_url")]
    pub push_api_url: String,

    #[serde(default)]
    pub push_server_key: String,

    /// Directory holding the JSON master data files.
    #[serde(default = "default_master_data_dir")]
    pub master_data_dir: String,

    #[serde(default = "default_email_workers")]
    pub email_workers: usize,

    /// Delay each email worker waits after every message.
    #[serde(default = "default_email_pacing_ms")]
    pub email_pacing_ms: u64,

    #[serde(default = "default_email_queue_size")]
    pub email_queue_size: usize,

    /// Verification links are inserted in batches of this size.
    #[serde(default = "default_verification_flush_size")]
    pub verification_flush_size: usize,

    #[serde(default = "default_verification_ttl_hours")]
    pub verification_ttl_hours: i64,

    #[serde(default = "default_payment_poll_interval_secs")]
    pub payment_poll_interval_secs: u64,

    /// Pending transactions younger than this are left to the webhook.
    #[serde(default = "default_payment_poll_min_age_minutes")]
    pub payment_poll_min_age_minutes: i64,

    #[serde(default = "default_reminder_interval_secs")]
    pub reminder_interval_secs: u64,

    #[serde(default = "default_reminder_days_before")]
    pub reminder_days_before: i64,
}

/// Default port if SERVER_PORT environment variable is not set.
fn default_port() -> u16 {
    3000
}

fn default_max_connections() -> u32 {
    10
}

fn default_jwt_ttl_hours() -> i64 {
    12
}

fn default_app_base_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_gateway_url() -> String {
    "https://api.sandbox.midtrans.com".to_string()
}

fn default_payment_expiry_minutes() -> i64 {
    24 * 60
}

fn default_mail_api_url() -> String {
    "http://localhost:8025/api/send".to_string()
}

fn default_mail_from() -> String {
    "no-reply@localhost".to_string()
}

fn default_push_api_url() -> String {
    "https://fcm.googleapis.com/fcm/send".to_string()
}

fn default_master_data_dir() -> String {
    "./master_data".to_string()
}

fn default_email_workers() -> usize {
    2
}

fn default_email_pacing_ms() -> u64 {
    1000
}

fn default_email_queue_size() -> usize {
    1000
}

fn default_verification_flush_size() -> usize {
    500
}

fn default_verification_ttl_hours() -> i64 {
    72
}

fn default_payment_poll_interval_secs() -> u64 {
    300
}

fn default_payment_poll_min_age_minutes() -> i64 {
    10
}

fn default_reminder_interval_secs() -> u64 {
    24 * 60 * 60
}

fn default_reminder_days_before() -> i64 {
    3
}

/// Errors produced while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error(transparent)]
    Env(#[from] envy::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// This method first attempts to load a `.env` file (which is optional),
    /// then reads environment variables and deserializes them into a Config struct.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Required environment variables are missing (e.g., DATABASE_URL)
    /// - Environment variable values cannot be parsed into expected types
    /// - Values fail [`Config::validate`]
    pub fn from_env() -> Result<Self, ConfigError> {
        // Try to load .env file if it exists (does nothing if not found)
        dotenvy::dotenv().ok();

        // Field names are automatically converted: database_url -> DATABASE_URL
        let config = envy::from_env::<Config>()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the rest of the application cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.jwt_secret.len() < 16 {
            return Err(ConfigError::Invalid(
                "JWT_SECRET must be at least 16 characters".to_string(),
            ));
        }
        if self.email_workers == 0 {
            return Err(ConfigError::Invalid(
                "EMAIL_WORKERS must be at least 1".to_string(),
            ));
        }
        if self.email_queue_size == 0 || self.verification_flush_size == 0 {
            return Err(ConfigError::Invalid(
                "EMAIL_QUEUE_SIZE and VERIFICATION_FLUSH_SIZE must be positive".to_string(),
            ));
        }
        for (name, value) in [
            ("APP_BASE_URL", &self.app_base_url),
            ("PAYMENT_GATEWAY_URL", &self.payment_gateway_url),
            ("MAIL_API_URL", &self.mail_api_url),
            ("PUSH_API_URL", &self.push_api_url),
        ] {
            url::Url::parse(value)
                .map_err(|e| ConfigError::Invalid(format!("{name} is not a valid URL: {e}")))?;
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) fn test_config() -> Config {
    Config {
        database_url: "postgres://localhost/test".to_string(),
        server_port: default_port(),
        database_max_connections: default_max_connections(),
        jwt_secret: "test-secret-with-enough-length".to_string(),
        jwt_ttl_hours: default_jwt_ttl_hours(),
        app_base_url: default_app_base_url(),
        bootstrap_admin_username: None,
        bootstrap_admin_password: None,
        payment_gateway_url: default_gateway_url(),
        payment_gateway_server_key: "server-key".to_string(),
        payment_expiry_minutes: default_payment_expiry_minutes(),
        mail_api_url: default_mail_api_url(),
        mail_api_key: String::new(),
        mail_from: default_mail_from(),
        push_api_url: default_push_api_url(),
        push_server_key: String::new(),
        master_data_dir: concat!(env!("CARGO_MANIFEST_DIR"), "/master_data").to_string(),
        email_workers: default_email_workers(),
        email_pacing_ms: 0,
        email_queue_size: default_email_queue_size(),
        verification_flush_size: default_verification_flush_size(),
        verification_ttl_hours: default_verification_ttl_hours(),
        payment_poll_interval_secs: default_payment_poll_interval_secs(),
        payment_poll_min_age_minutes: default_payment_poll_min_age_minutes(),
        reminder_interval_secs: default_reminder_interval_secs(),
        reminder_days_before: default_reminder_days_before(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_test_config_is_valid() {
        assert!(test_config().validate().is_ok());
    }

    #[test]
    fn rejects_zero_email_workers() {
        let mut config = test_config();
        config.email_workers = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn rejects_malformed_gateway_url() {
        let mut config = test_config();
        config.payment_gateway_url = "not a url".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("PAYMENT_GATEWAY_URL"));
    }

    #[test]
    fn rejects_short_jwt_secret() {
        let mut config = test_config();
        config.jwt_secret = "short".to_string();
        assert!(config.validate().is_err());
    }
}
