//! Configuration loading for the promo-code sync engine.
//!
//! Loads layered `.env` files and environment variables prefixed with
//! `PROMO_SYNC_`, producing a typed [`AppConfig`].

use std::{collections::BTreeMap, env, path::PathBuf, str::FromStr, time::Duration};

use chrono::{FixedOffset, NaiveTime};
use serde::{Deserialize, Serialize};
use thiserror::Error;

const ENV_PREFIX: &str = "PROMO_SYNC_";

/// Application configuration derived from `PROMO_SYNC_*` environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct AppConfig {
    #[serde(default = "default_profile")]
    pub profile: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_format")]
    pub log_format: String,
    #[serde(default = "default_database_url")]
    pub database_url: String,
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,
    #[serde(default = "default_db_acquire_timeout_ms")]
    pub db_acquire_timeout_ms: u64,
    #[serde(default)]
    pub shopify: ShopifyConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

/// Remote Admin API access and the rate-limit retry policy of the fetcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct ShopifyConfig {
    /// Admin REST base, e.g. `https://shop.myshopify.com/admin/api/2025-04`
    ///
    /// Environment variable: `PROMO_SYNC_SHOPIFY_ADMIN_API_BASE`
    #[serde(default)]
    pub admin_api_base: String,

    /// Static token sent as `X-Shopify-Access-Token`
    ///
    /// Environment variable: `PROMO_SYNC_SHOPIFY_ACCESS_TOKEN`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,

    /// `limit` query parameter on both listings (max 250)
    #[serde(default = "default_shopify_page_limit")]
    pub page_limit: u32,

    #[serde(default = "default_shopify_request_timeout_seconds")]
    pub request_timeout_seconds: u64,

    /// Retries after the first 429 before the fetch fails (default: 5)
    #[serde(default = "default_shopify_max_rate_limit_retries")]
    pub max_rate_limit_retries: u32,

    /// Wait used when `Retry-After` is absent or unparseable (default: 1000)
    #[serde(default = "default_shopify_default_retry_after_ms")]
    pub default_retry_after_ms: u64,

    /// Upper bound on an honoured `Retry-After` (default: 60)
    #[serde(default = "default_shopify_max_retry_after_seconds")]
    pub max_retry_after_seconds: u64,
}

/// Run-level behaviour of a synchronization pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct SyncConfig {
    /// Pause after each rule's codes are drained (default: 200)
    #[serde(default = "default_sync_rule_pacing_ms")]
    pub rule_pacing_ms: u64,

    /// Lookback for startup and daily runs (default: 30 days)
    #[serde(default = "default_sync_scheduled_lookback_seconds")]
    pub scheduled_lookback_seconds: u64,

    /// Lookback for runs fired after a code is created (default: 10 minutes)
    #[serde(default = "default_sync_post_create_lookback_seconds")]
    pub post_create_lookback_seconds: u64,

    /// Delay between a code-created notification and its sync (default: 0)
    #[serde(default)]
    pub post_create_delay_ms: u64,

    /// Non-terminal jobs without a heartbeat for this long are reclaimed (default: 1800)
    #[serde(default = "default_sync_lease_seconds")]
    pub lease_seconds: u64,
}

/// Trigger configuration for the background scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct SchedulerConfig {
    #[serde(default = "default_scheduler_run_on_startup")]
    pub run_on_startup: bool,

    /// Local wall-clock time of the daily run, `HH:MM` or `HH:MM:SS` (default: 02:00)
    #[serde(default = "default_scheduler_daily_run_at")]
    pub daily_run_at: String,

    /// Mirror the storefront collection list at startup and once a day
    #[serde(default = "default_scheduler_collections_enabled")]
    pub collections_enabled: bool,

    /// Local wall-clock time of the daily collection mirror (default: 00:00)
    #[serde(default = "default_scheduler_collections_daily_run_at")]
    pub collections_daily_run_at: String,

    /// Offset of the local clock from UTC in minutes (default: 330, IST)
    #[serde(default = "default_scheduler_utc_offset_minutes")]
    pub utc_offset_minutes: i32,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            profile: default_profile(),
            log_level: default_log_level(),
            log_format: default_log_format(),
            database_url: default_database_url(),
            db_max_connections: default_db_max_connections(),
            db_acquire_timeout_ms: default_db_acquire_timeout_ms(),
            shopify: ShopifyConfig::default(),
            sync: SyncConfig::default(),
            scheduler: SchedulerConfig::default(),
        }
    }
}

impl Default for ShopifyConfig {
    fn default() -> Self {
        Self {
            admin_api_base: String::new(),
            access_token: None,
            page_limit: default_shopify_page_limit(),
            request_timeout_seconds: default_shopify_request_timeout_seconds(),
            max_rate_limit_retries: default_shopify_max_rate_limit_retries(),
            default_retry_after_ms: default_shopify_default_retry_after_ms(),
            max_retry_after_seconds: default_shopify_max_retry_after_seconds(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            rule_pacing_ms: default_sync_rule_pacing_ms(),
            scheduled_lookback_seconds: default_sync_scheduled_lookback_seconds(),
            post_create_lookback_seconds: default_sync_post_create_lookback_seconds(),
            post_create_delay_ms: 0,
            lease_seconds: default_sync_lease_seconds(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            run_on_startup: default_scheduler_run_on_startup(),
            daily_run_at: default_scheduler_daily_run_at(),
            collections_enabled: default_scheduler_collections_enabled(),
            collections_daily_run_at: default_scheduler_collections_daily_run_at(),
            utc_offset_minutes: default_scheduler_utc_offset_minutes(),
        }
    }
}

impl AppConfig {
    /// Returns a redacted JSON representation (secrets are redacted).
    pub fn redacted_json(&self) -> serde_json::Result<String> {
        let mut config = self.clone();
        if config.shopify.access_token.is_some() {
            config.shopify.access_token = Some("[REDACTED]".to_string());
        }
        serde_json::to_string_pretty(&config)
    }

    /// Validates the configuration, returning an error if required settings are missing.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database_url.trim().is_empty() {
            return Err(ConfigError::MissingDatabaseUrl);
        }

        // Remote credentials are only optional for local and test profiles
        if !matches!(self.profile.as_str(), "local" | "test") {
            if self.shopify.admin_api_base.trim().is_empty() {
                return Err(ConfigError::MissingShopifyApiBase);
            }
            if self.shopify.access_token.is_none() {
                return Err(ConfigError::MissingShopifyAccessToken);
            }
        }

        self.shopify.validate()?;
        self.sync.validate()?;
        self.scheduler.validate()?;

        Ok(())
    }
}

impl ShopifyConfig {
    /// Validate fetcher bounds
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.admin_api_base.is_empty() {
            url::Url::parse(&self.admin_api_base).map_err(|source| {
                ConfigError::InvalidShopifyApiBase {
                    value: self.admin_api_base.clone(),
                    source,
                }
            })?;
        }

        if self.page_limit == 0 || self.page_limit > 250 {
            return Err(ConfigError::InvalidPageLimit {
                value: self.page_limit,
            });
        }

        if self.request_timeout_seconds == 0 {
            return Err(ConfigError::InvalidRequestTimeout {
                value: self.request_timeout_seconds,
            });
        }

        if self.max_retry_after_seconds == 0 {
            return Err(ConfigError::InvalidMaxRetryAfter {
                value: self.max_retry_after_seconds,
            });
        }

        Ok(())
    }

    pub fn default_retry_after(&self) -> Duration {
        Duration::from_millis(self.default_retry_after_ms)
    }

    pub fn max_retry_after(&self) -> Duration {
        Duration::from_secs(self.max_retry_after_seconds)
    }
}

impl SyncConfig {
    /// Validate run bounds
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scheduled_lookback_seconds == 0 {
            return Err(ConfigError::InvalidLookback {
                field: "scheduled",
                value: self.scheduled_lookback_seconds,
            });
        }

        if self.post_create_lookback_seconds == 0 {
            return Err(ConfigError::InvalidLookback {
                field: "post-create",
                value: self.post_create_lookback_seconds,
            });
        }

        if self.lease_seconds < 60 {
            return Err(ConfigError::InvalidLeaseSeconds {
                value: self.lease_seconds,
            });
        }

        Ok(())
    }

    pub fn rule_pacing(&self) -> Duration {
        Duration::from_millis(self.rule_pacing_ms)
    }

    pub fn scheduled_lookback(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.scheduled_lookback_seconds as i64)
    }

    pub fn post_create_lookback(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.post_create_lookback_seconds as i64)
    }

    pub fn post_create_delay(&self) -> Duration {
        Duration::from_millis(self.post_create_delay_ms)
    }

    pub fn lease(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.lease_seconds as i64)
    }

    /// How often a running job refreshes its lease: a third of the lease, at least 100ms.
    pub fn heartbeat_interval(&self) -> Duration {
        (Duration::from_secs(self.lease_seconds) / 3).max(Duration::from_millis(100))
    }
}

impl SchedulerConfig {
    /// Validate scheduler configuration bounds.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.daily_time()?;
        self.collections_daily_time()?;
        self.utc_offset()?;
        Ok(())
    }

    /// Parsed `daily_run_at`.
    pub fn daily_time(&self) -> Result<NaiveTime, ConfigError> {
        parse_daily_time(&self.daily_run_at)
    }

    /// Parsed `collections_daily_run_at`.
    pub fn collections_daily_time(&self) -> Result<NaiveTime, ConfigError> {
        parse_daily_time(&self.collections_daily_run_at)
    }

    /// Fixed offset of the local clock the daily run is expressed in.
    pub fn utc_offset(&self) -> Result<FixedOffset, ConfigError> {
        FixedOffset::east_opt(self.utc_offset_minutes.saturating_mul(60)).ok_or(
            ConfigError::InvalidUtcOffset {
                value: self.utc_offset_minutes,
            },
        )
    }
}

fn parse_daily_time(value: &str) -> Result<NaiveTime, ConfigError> {
    let trimmed = value.trim();
    NaiveTime::parse_from_str(trimmed, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(trimmed, "%H:%M"))
        .map_err(|_| ConfigError::InvalidDailyRunAt {
            value: value.to_string(),
        })
}

fn default_profile() -> String {
    "local".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_database_url() -> String {
    "sqlite://promo_sync.db?mode=rwc".to_string()
}

fn default_db_max_connections() -> u32 {
    10
}

fn default_db_acquire_timeout_ms() -> u64 {
    5000
}

fn default_shopify_page_limit() -> u32 {
    250 // Admin REST maximum
}

fn default_shopify_request_timeout_seconds() -> u64 {
    30
}

fn default_shopify_max_rate_limit_retries() -> u32 {
    5
}

fn default_shopify_default_retry_after_ms() -> u64 {
    1000
}

fn default_shopify_max_retry_after_seconds() -> u64 {
    60
}

fn default_sync_rule_pacing_ms() -> u64 {
    200
}

fn default_sync_scheduled_lookback_seconds() -> u64 {
    30 * 24 * 60 * 60 // 30 days
}

fn default_sync_post_create_lookback_seconds() -> u64 {
    10 * 60 // 10 minutes
}

fn default_sync_lease_seconds() -> u64 {
    1800 // 30 minutes
}

fn default_scheduler_run_on_startup() -> bool {
    true
}

fn default_scheduler_daily_run_at() -> String {
    "02:00".to_string()
}

fn default_scheduler_collections_enabled() -> bool {
    true
}

fn default_scheduler_collections_daily_run_at() -> String {
    "00:00".to_string()
}

fn default_scheduler_utc_offset_minutes() -> i32 {
    330 // UTC+05:30
}

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load environment file {path}: {source}")]
    EnvFile {
        path: PathBuf,
        source: dotenvy::Error,
    },
    #[error("invalid value '{value}' for {key}")]
    InvalidValue { key: String, value: String },
    #[error("database url is missing; set PROMO_SYNC_DATABASE_URL")]
    MissingDatabaseUrl,
    #[error("Shopify admin API base is missing; set PROMO_SYNC_SHOPIFY_ADMIN_API_BASE")]
    MissingShopifyApiBase,
    #[error("Shopify access token is missing; set PROMO_SYNC_SHOPIFY_ACCESS_TOKEN")]
    MissingShopifyAccessToken,
    #[error("invalid Shopify admin API base '{value}': {source}")]
    InvalidShopifyApiBase {
        value: String,
        source: url::ParseError,
    },
    #[error("Shopify page limit must be between 1 and 250, got {value}")]
    InvalidPageLimit { value: u32 },
    #[error("Shopify request timeout must be positive, got {value}")]
    InvalidRequestTimeout { value: u64 },
    #[error("max Retry-After must be positive, got {value}")]
    InvalidMaxRetryAfter { value: u64 },
    #[error("{field} lookback must be positive, got {value}")]
    InvalidLookback { field: &'static str, value: u64 },
    #[error("sync lease must be at least 60 seconds, got {value}")]
    InvalidLeaseSeconds { value: u64 },
    #[error("daily run time must be HH:MM or HH:MM:SS, got '{value}'")]
    InvalidDailyRunAt { value: String },
    #[error("UTC offset must be within +/-24h, got {value} minutes")]
    InvalidUtcOffset { value: i32 },
}

/// Loads configuration using layered `.env` files and `PROMO_SYNC_*` env vars.
pub struct ConfigLoader {
    base_dir: PathBuf,
}

impl ConfigLoader {
    /// Creates a new loader rooted at the current working directory.
    pub fn new() -> Self {
        Self {
            base_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }

    /// Creates a loader rooted at the provided directory (useful for tests).
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// Loads `.env`, `.env.local`, `.env.{profile}`, `.env.{profile}.local`, then the process env.
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let (mut layered, profile_hint) = self.collect_layered_env()?;

        // Overlay process environment last so it wins.
        for (key, value) in env::vars() {
            if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                layered.insert(stripped.to_string(), value);
            }
        }

        let profile = layered
            .remove("PROFILE")
            .filter(|v| !v.is_empty())
            .unwrap_or(profile_hint);
        let log_level = layered
            .remove("LOG_LEVEL")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(default_log_level);
        let log_format = layered
            .remove("LOG_FORMAT")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(default_log_format);
        let database_url = layered
            .remove("DATABASE_URL")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(default_database_url);
        let db_max_connections =
            take_parsed(&mut layered, "DB_MAX_CONNECTIONS")?.unwrap_or_else(default_db_max_connections);
        let db_acquire_timeout_ms = take_parsed(&mut layered, "DB_ACQUIRE_TIMEOUT_MS")?
            .unwrap_or_else(default_db_acquire_timeout_ms);

        let shopify = ShopifyConfig {
            admin_api_base: layered
                .remove("SHOPIFY_ADMIN_API_BASE")
                .map(|base| base.trim().trim_end_matches('/').to_string())
                .unwrap_or_default(),
            access_token: layered.remove("SHOPIFY_ACCESS_TOKEN").and_then(|val| {
                let trimmed = val.trim();
                if trimmed.is_empty() {
                    None
                } else {
                    Some(trimmed.to_string())
                }
            }),
            page_limit: take_parsed(&mut layered, "SHOPIFY_PAGE_LIMIT")?
                .unwrap_or_else(default_shopify_page_limit),
            request_timeout_seconds: take_parsed(&mut layered, "SHOPIFY_REQUEST_TIMEOUT_SECONDS")?
                .unwrap_or_else(default_shopify_request_timeout_seconds),
            max_rate_limit_retries: take_parsed(&mut layered, "SHOPIFY_MAX_RATE_LIMIT_RETRIES")?
                .unwrap_or_else(default_shopify_max_rate_limit_retries),
            default_retry_after_ms: take_parsed(&mut layered, "SHOPIFY_DEFAULT_RETRY_AFTER_MS")?
                .unwrap_or_else(default_shopify_default_retry_after_ms),
            max_retry_after_seconds: take_parsed(&mut layered, "SHOPIFY_MAX_RETRY_AFTER_SECONDS")?
                .unwrap_or_else(default_shopify_max_retry_after_seconds),
        };

        let sync = SyncConfig {
            rule_pacing_ms: take_parsed(&mut layered, "SYNC_RULE_PACING_MS")?
                .unwrap_or_else(default_sync_rule_pacing_ms),
            scheduled_lookback_seconds: take_parsed(&mut layered, "SYNC_SCHEDULED_LOOKBACK_SECONDS")?
                .unwrap_or_else(default_sync_scheduled_lookback_seconds),
            post_create_lookback_seconds: take_parsed(
                &mut layered,
                "SYNC_POST_CREATE_LOOKBACK_SECONDS",
            )?
            .unwrap_or_else(default_sync_post_create_lookback_seconds),
            post_create_delay_ms: take_parsed(&mut layered, "SYNC_POST_CREATE_DELAY_MS")?
                .unwrap_or(0),
            lease_seconds: take_parsed(&mut layered, "SYNC_LEASE_SECONDS")?
                .unwrap_or_else(default_sync_lease_seconds),
        };

        let scheduler = SchedulerConfig {
            run_on_startup: take_parsed(&mut layered, "SCHEDULER_RUN_ON_STARTUP")?
                .unwrap_or_else(default_scheduler_run_on_startup),
            daily_run_at: layered
                .remove("SCHEDULER_DAILY_RUN_AT")
                .filter(|v| !v.is_empty())
                .unwrap_or_else(default_scheduler_daily_run_at),
            collections_enabled: take_parsed(&mut layered, "SCHEDULER_COLLECTIONS_ENABLED")?
                .unwrap_or_else(default_scheduler_collections_enabled),
            collections_daily_run_at: layered
                .remove("SCHEDULER_COLLECTIONS_DAILY_RUN_AT")
                .filter(|v| !v.is_empty())
                .unwrap_or_else(default_scheduler_collections_daily_run_at),
            utc_offset_minutes: take_parsed(&mut layered, "SCHEDULER_UTC_OFFSET_MINUTES")?
                .unwrap_or_else(default_scheduler_utc_offset_minutes),
        };

        let config = AppConfig {
            profile,
            log_level,
            log_format,
            database_url,
            db_max_connections,
            db_acquire_timeout_ms,
            shopify,
            sync,
            scheduler,
        };

        config.validate()?;
        Ok(config)
    }

    fn collect_layered_env(&self) -> Result<(BTreeMap<String, String>, String), ConfigError> {
        let mut values = BTreeMap::new();

        self.merge_dotenv(self.base_dir.join(".env"), &mut values)?;
        self.merge_dotenv(self.base_dir.join(".env.local"), &mut values)?;

        let profile = env::var(format!("{ENV_PREFIX}PROFILE"))
            .ok()
            .or_else(|| values.get("PROFILE").cloned())
            .unwrap_or_else(default_profile);

        self.merge_dotenv(
            self.base_dir.join(format!(".env.{}", &profile)),
            &mut values,
        )?;
        self.merge_dotenv(
            self.base_dir.join(format!(".env.{}.local", &profile)),
            &mut values,
        )?;

        Ok((values, profile))
    }

    fn merge_dotenv(
        &self,
        path: PathBuf,
        values: &mut BTreeMap<String, String>,
    ) -> Result<(), ConfigError> {
        match dotenvy::from_path_iter(&path) {
            Ok(iter) => {
                for item in iter {
                    let (key, value) = item.map_err(|source| ConfigError::EnvFile {
                        path: path.clone(),
                        source,
                    })?;
                    if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                        values.insert(stripped.to_string(), value);
                    }
                }
                Ok(())
            }
            Err(dotenvy::Error::Io(ref io_err))
                if io_err.kind() == std::io::ErrorKind::NotFound =>
            {
                Ok(())
            }
            Err(err) => Err(ConfigError::EnvFile { path, source: err }),
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Remove `key` and parse it. Empty values count as unset; malformed values are errors.
fn take_parsed<T: FromStr>(
    layered: &mut BTreeMap<String, String>,
    key: &str,
) -> Result<Option<T>, ConfigError> {
    match layered.remove(key) {
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                key: format!("{ENV_PREFIX}{key}"),
                value: raw,
            }),
        None => Ok(None),
    }
}
