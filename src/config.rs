//! Application configuration.
//!
//! Everything is read from the environment exactly once at startup and
//! validated into plain structs; nothing else in the crate touches
//! `std::env`. Required variables are collected and reported together so a
//! broken deployment fails with one actionable message instead of a chain
//! of restarts.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::IngestError;

fn env_string(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_u16(key: &str, default: u16) -> u16 {
    env::var(key)
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(default)
}

fn env_duration_secs(key: &str, default_secs: u64) -> Duration {
    env::var(key)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or_else(|| Duration::from_secs(default_secs))
}

/// Mail transport endpoints and credentials.
#[derive(Debug, Clone)]
pub struct MailConfig {
    pub imap_host: String,
    pub imap_port: u16,
    pub smtp_host: String,
    pub smtp_port: u16,
    pub username: String,
    pub password: String,
    pub mailbox: String,
}

/// Settings the per-message pipeline needs: sender identity, branding,
/// queue defaults and the template directory.
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    pub from_address: String,
    pub from_name: String,
    pub company_name: String,
    pub company_domain: String,
    pub default_queue_name: String,
    pub default_queue_prefix: String,
    pub template_dir: PathBuf,
}

/// Cadence of the processing loop.
#[derive(Debug, Clone)]
pub struct LoopConfig {
    /// Pause between successful cycles.
    pub poll_interval: Duration,
    /// Backoff after a transient (connectivity-class) cycle failure.
    pub error_backoff: Duration,
    /// Backoff after a configuration-class failure. Deliberately long so a
    /// broken setup does not hammer the mail server or the store.
    pub config_backoff: Duration,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub mail: MailConfig,
    pub processor: ProcessorConfig,
    pub cadence: LoopConfig,
}

impl AppConfig {
    /// Build and validate the configuration from the environment.
    ///
    /// Required: `DATABASE_URL`, `IMAP_HOST`, `SMTP_HOST`, `MAIL_USERNAME`,
    /// `MAIL_PASSWORD`. Everything else has a documented default.
    pub fn from_env() -> Result<Self, IngestError> {
        let mut missing = Vec::new();
        let mut required = |key: &'static str| -> String {
            match env::var(key) {
                Ok(value) if !value.is_empty() => value,
                _ => {
                    missing.push(key);
                    String::new()
                }
            }
        };

        let database_url = required("DATABASE_URL");
        let imap_host = required("IMAP_HOST");
        let smtp_host = required("SMTP_HOST");
        let username = required("MAIL_USERNAME");
        let password = required("MAIL_PASSWORD");

        if !missing.is_empty() {
            return Err(IngestError::Configuration(format!(
                "missing required environment variables: {}",
                missing.join(", ")
            )));
        }

        let from_address = env_string("MAIL_FROM_ADDRESS", &username);
        let company_domain = env_string(
            "COMPANY_DOMAIN",
            from_address.rsplit('@').next().unwrap_or("localhost"),
        );

        Ok(Self {
            database_url,
            mail: MailConfig {
                imap_host,
                imap_port: env_u16("IMAP_PORT", 993),
                smtp_host,
                smtp_port: env_u16("SMTP_PORT", 465),
                username,
                password,
                mailbox: env_string("IMAP_MAILBOX", "INBOX"),
            },
            processor: ProcessorConfig {
                from_name: env_string("MAIL_FROM_NAME", "Support Team"),
                company_name: env_string("COMPANY_NAME", "Support"),
                company_domain,
                default_queue_name: env_string("DEFAULT_QUEUE_NAME", "Support"),
                default_queue_prefix: env_string("DEFAULT_QUEUE_PREFIX", "SUP"),
                template_dir: PathBuf::from(env_string("TEMPLATE_DIR", "./templates")),
                from_address,
            },
            cadence: LoopConfig {
                poll_interval: env_duration_secs("POLL_INTERVAL_SECS", 10),
                error_backoff: env_duration_secs("ERROR_BACKOFF_SECS", 60),
                config_backoff: env_duration_secs("CONFIG_BACKOFF_SECS", 300),
            },
        })
    }
}
