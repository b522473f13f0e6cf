//! Configuration types.
//!
//! Everything is read from environment variables once at startup. Defaults
//! carry the production constants; credentials are held as secrets.

use std::str::FromStr;
use std::time::Duration;

use chrono_tz::Tz;
use secrecy::SecretString;

use crate::error::ConfigError;
use crate::pipeline::render::RenderStrategy;
use crate::retry::RetryPolicy;

/// Default cron schedule for the pipeline ticker: every five minutes.
pub const DEFAULT_SYNC_SCHEDULE: &str = "0 */5 * * * *";

/// Complete service configuration.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub airtable: AirtableConfig,
    pub activecampaign: ActiveCampaignConfig,
    pub postmark: PostmarkConfig,
    pub slack: SlackConfig,
    pub retry: RetryPolicy,
    pub pipeline: PipelineSettings,
    pub server: ServerConfig,
}

impl SyncConfig {
    /// Build config from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            airtable: AirtableConfig::from_env()?,
            activecampaign: ActiveCampaignConfig::from_env()?,
            postmark: PostmarkConfig::from_env()?,
            slack: SlackConfig::from_env(),
            retry: retry_policy_from_env()?,
            pipeline: PipelineSettings::from_env()?,
            server: ServerConfig::from_env()?,
        })
    }
}

/// Record store (Airtable) access.
#[derive(Debug, Clone)]
pub struct AirtableConfig {
    pub api_url: String,
    pub api_key: SecretString,
    pub base_id: String,
    pub table_id: String,
    pub request_timeout: Duration,
}

impl AirtableConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            api_url: env_or("AIRTABLE_API_URL", "https://api.airtable.com/v0"),
            api_key: SecretString::from(required("AIRTABLE_API_KEY")?),
            base_id: required("AIRTABLE_BASE_ID")?,
            table_id: required("AIRTABLE_TABLE_ID")?,
            request_timeout: Duration::from_secs(parsed("AIRTABLE_TIMEOUT_SECS", 30)?),
        })
    }
}

/// Automation platform (ActiveCampaign) access and listing behaviour.
#[derive(Debug, Clone)]
pub struct ActiveCampaignConfig {
    pub api_url: String,
    pub api_key: SecretString,
    /// Items per listing page.
    pub page_size: usize,
    /// Pause between listing pages.
    pub fetch_delay: Duration,
    pub request_timeout: Duration,
}

impl ActiveCampaignConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let page_size: usize = parsed("PAGE_SIZE", 50)?;
        if page_size == 0 {
            return Err(ConfigError::InvalidValue {
                key: "PAGE_SIZE".into(),
                message: "must be at least 1".into(),
            });
        }

        Ok(Self {
            api_url: required("ACTIVECAMPAIGN_API_URL")?
                .trim_end_matches('/')
                .to_string(),
            api_key: SecretString::from(required("ACTIVECAMPAIGN_API_KEY")?),
            page_size,
            fetch_delay: Duration::from_millis(parsed("FETCH_DELAY_MS", 1000)?),
            request_timeout: Duration::from_secs(parsed("ACTIVECAMPAIGN_TIMEOUT_SECS", 30)?),
        })
    }
}

/// Transactional mail sender (Postmark).
#[derive(Debug, Clone)]
pub struct PostmarkConfig {
    pub api_url: String,
    pub server_token: SecretString,
    pub from_email: String,
    pub message_stream: String,
    pub request_timeout: Duration,
}

impl PostmarkConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            api_url: env_or("POSTMARK_API_URL", "https://api.postmarkapp.com"),
            server_token: SecretString::from(required("POSTMARK_API_KEY")?),
            from_email: required("FROM_EMAIL")?,
            message_stream: env_or("MESSAGE_STREAM", "outbound"),
            request_timeout: Duration::from_secs(parsed("POSTMARK_TIMEOUT_SECS", 60)?),
        })
    }
}

/// Operator chat webhook. Without a webhook, notifications are only logged.
#[derive(Debug, Clone, Default)]
pub struct SlackConfig {
    pub webhook_url: Option<String>,
    /// Mention prepended to alerts, e.g. `@Ops`.
    pub tag_user: Option<String>,
}

impl SlackConfig {
    pub fn from_env() -> Self {
        Self {
            webhook_url: std::env::var("SLACK_WEBHOOK_URL")
                .ok()
                .filter(|s| !s.trim().is_empty()),
            tag_user: std::env::var("SLACK_TAG_USER")
                .ok()
                .filter(|s| !s.trim().is_empty()),
        }
    }
}

/// Behaviour of the four pipelines.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Automation whose active contacts receive test sends.
    pub test_automation_id: String,
    /// Zone used to print the scheduled time in test subjects.
    pub time_zone: Tz,
    pub render: RenderStrategy,
    /// Whether custom field values are looked up per contact.
    pub resolve_custom_fields: bool,
    /// Pause between per-contact variable lookups.
    pub variable_fetch_delay: Duration,
    /// How often warning tags are wiped so overdue jobs are re-reported.
    pub warning_clear_interval: Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            test_automation_id: String::new(),
            time_zone: chrono_tz::America::New_York,
            render: RenderStrategy::default(),
            resolve_custom_fields: true,
            variable_fetch_delay: Duration::from_millis(100),
            warning_clear_interval: Duration::from_secs(2 * 60 * 60), // 2 hours
        }
    }
}

impl PipelineSettings {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let time_zone = match std::env::var("SEND_TIME_ZONE") {
            Ok(name) => Tz::from_str(name.trim()).map_err(|e| ConfigError::InvalidValue {
                key: "SEND_TIME_ZONE".into(),
                message: e.to_string(),
            })?,
            Err(_) => defaults.time_zone,
        };

        let render = match std::env::var("TEMPLATE_STRATEGY") {
            Ok(name) => {
                let footer = std::env::var("TEMPLATE_FOOTER_PATTERN").ok();
                RenderStrategy::from_config(&name, footer.as_deref())?
            }
            Err(_) => match std::env::var("TEMPLATE_FOOTER_PATTERN") {
                Ok(pattern) => RenderStrategy::from_config("preview", Some(&pattern))?,
                Err(_) => defaults.render,
            },
        };

        Ok(Self {
            test_automation_id: required("TEST_AUTOMATION_ID")?,
            time_zone,
            render,
            resolve_custom_fields: parsed("RESOLVE_CUSTOM_FIELDS", true)?,
            variable_fetch_delay: Duration::from_millis(parsed("VARIABLE_FETCH_DELAY_MS", 100)?),
            warning_clear_interval: Duration::from_secs(
                parsed::<u64>("WARNING_CLEAR_INTERVAL_MINS", 120)? * 60,
            ),
        })
    }
}

/// HTTP trigger surface and the cron ticker.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    /// Cron expression (with seconds); `None` disables the ticker.
    pub schedule: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            schedule: Some(DEFAULT_SYNC_SCHEDULE.to_string()),
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let schedule = match std::env::var("SYNC_SCHEDULE") {
            Ok(s) if s.trim().eq_ignore_ascii_case("off") => None,
            Ok(s) => {
                crate::scheduler::parse_schedule(&s)?;
                Some(s)
            }
            Err(_) => Some(DEFAULT_SYNC_SCHEDULE.to_string()),
        };

        Ok(Self {
            port: parsed("SYNC_PORT", 3000)?,
            schedule,
        })
    }
}

/// Retry policy from `RETRY_DELAYS_SECS` (comma-separated) and `RETRY_CAPPED`.
fn retry_policy_from_env() -> Result<RetryPolicy, ConfigError> {
    let capped = parsed("RETRY_CAPPED", false)?;
    match std::env::var("RETRY_DELAYS_SECS") {
        Ok(raw) => {
            let delays = parse_delay_list(&raw).map_err(|message| ConfigError::InvalidValue {
                key: "RETRY_DELAYS_SECS".into(),
                message,
            })?;
            RetryPolicy::new(delays, capped)
        }
        Err(_) => Ok(RetryPolicy {
            capped,
            ..RetryPolicy::default()
        }),
    }
}

/// Parse `"30, 60, 300"` into durations in seconds.
pub fn parse_delay_list(raw: &str) -> Result<Vec<Duration>, String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|e| format!("'{s}': {e}"))
        })
        .collect()
}

fn required(key: &str) -> Result<String, ConfigError> {
    std::env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parsed<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        }),
        Err(_) => Ok(default),
    }
}
