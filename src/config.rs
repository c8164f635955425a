// src/config.rs

use std::env;

use thiserror::Error;

const DARAJA_PRODUCTION_URL: &str = "https://api.safaricom.co.ke";
const DARAJA_SANDBOX_URL: &str = "https://sandbox.safaricom.co.ke";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{name} has an invalid value: {value}")]
    Invalid { name: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub port: u16,
    pub database_url: Option<String>,
    pub admin_secret: String,
    pub till_number: String,
    pub branding: MailBranding,
    pub smtp: Option<SmtpConfig>,
    pub daraja: Option<DarajaConfig>,
    pub push_min_amount: i64,
}

/// Values that appear in outbound mail.
#[derive(Debug, Clone)]
pub struct MailBranding {
    pub app_name: String,
    pub support_whatsapp: String,
    pub support_email: String,
    pub frontend_url: String,
}

#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub user: Option<String>,
    pub password: Option<String>,
    pub from: String,
}

#[derive(Clone)]
pub struct DarajaConfig {
    pub base_url: String,
    pub consumer_key: String,
    pub consumer_secret: String,
    pub business_short_code: String,
    pub passkey: String,
    /// Public base URL; `/api/payment-callback` is appended.
    pub callback_base_url: String,
}

// Credentials stay out of logs.
impl std::fmt::Debug for DarajaConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DarajaConfig")
            .field("base_url", &self.base_url)
            .field("business_short_code", &self.business_short_code)
            .field("callback_base_url", &self.callback_base_url)
            .finish_non_exhaustive()
    }
}

fn optional(name: &str) -> Option<String> {
    env::var(name).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    optional(name).ok_or(ConfigError::Missing(name))
}

fn parsed<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match optional(name) {
        Some(v) => v.parse().map_err(|_| ConfigError::Invalid { name, value: v }),
        None => Ok(default),
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let support_email = optional("SUPPORT_EMAIL").unwrap_or_else(|| "support@example.com".to_string());

        let branding = MailBranding {
            app_name: optional("APP_NAME").unwrap_or_else(|| "Till Pay".to_string()),
            support_whatsapp: optional("SUPPORT_WHATSAPP").unwrap_or_default(),
            support_email: support_email.clone(),
            frontend_url: optional("FRONTEND_URL").unwrap_or_else(|| "http://localhost:3000".to_string()),
        };

        let smtp = match optional("SMTP_HOST") {
            Some(host) => Some(SmtpConfig {
                host,
                port: parsed("SMTP_PORT", 587)?,
                user: optional("SMTP_USER"),
                password: optional("SMTP_PASSWORD"),
                from: optional("MAIL_FROM")
                    .or_else(|| optional("SMTP_USER"))
                    .unwrap_or(support_email),
            }),
            None => None,
        };

        Ok(Config {
            bind_addr: optional("BIND_ADDR").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: parsed("PORT", 3000)?,
            database_url: optional("DATABASE_URL"),
            admin_secret: required("ADMIN_SECRET")?,
            till_number: optional("TILL_NUMBER").unwrap_or_else(|| "889900".to_string()),
            branding,
            smtp,
            daraja: DarajaConfig::from_env()?,
            push_min_amount: parsed("PUSH_MIN_AMOUNT", 10)?,
        })
    }
}

impl DarajaConfig {
    /// `None` when no consumer key is set; partial credentials are an error.
    fn from_env() -> Result<Option<Self>, ConfigError> {
        let Some(consumer_key) = optional("DARAJA_CONSUMER_KEY") else {
            return Ok(None);
        };

        let base_url = match optional("DARAJA_BASE_URL") {
            Some(url) => url,
            None => match optional("DARAJA_ENV").as_deref() {
                Some("production") => DARAJA_PRODUCTION_URL.to_string(),
                Some("sandbox") | None => DARAJA_SANDBOX_URL.to_string(),
                Some(other) => {
                    return Err(ConfigError::Invalid {
                        name: "DARAJA_ENV",
                        value: other.to_string(),
                    })
                }
            },
        };

        Ok(Some(DarajaConfig {
            base_url: base_url.trim_end_matches('/').to_string(),
            consumer_key,
            consumer_secret: required("DARAJA_CONSUMER_SECRET")?,
            business_short_code: required("BUSINESS_SHORT_CODE")?,
            passkey: required("DARAJA_PASSKEY")?,
            callback_base_url: required("CALLBACK_URL")?.trim_end_matches('/').to_string(),
        }))
    }
}
