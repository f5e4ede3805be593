use anyhow::{anyhow, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::net::SocketAddr;
use std::str::FromStr;
use time::macros::format_description;
use time::UtcOffset;

use crate::app::notifications::NotificationSettings;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadStateBackend {
    Redis,
    Memory,
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub http_addr: String,
    pub app_mode: String,
    pub odoo_url: String,
    pub odoo_db: String,
    pub odoo_timeout_seconds: u64,
    pub manager_group: String,
    pub read_state_backend: ReadStateBackend,
    pub redis_url: String,
    pub read_state_namespace: String,
    pub read_state_retention_days: Option<u32>,
    pub poll_interval_seconds: u64,
    pub reminder_start_hour: u8,
    pub reminder_end_hour: u8,
    pub local_utc_offset: UtcOffset,
    pub session_key: [u8; 32],
    pub session_ttl_minutes: u64,
    pub watch_login: Option<String>,
    pub watch_password: Option<String>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let http_addr = env_or("HTTP_ADDR", "0.0.0.0:8080");
        let _parsed_http_addr = SocketAddr::from_str(&http_addr)
            .map_err(|err| anyhow!("invalid HTTP_ADDR: {}", err))?;
        let app_mode = env_or("APP_MODE", "api");

        let read_state_backend = match env_or("READ_STATE_BACKEND", "redis").as_str() {
            "redis" => ReadStateBackend::Redis,
            "memory" => ReadStateBackend::Memory,
            other => return Err(anyhow!("invalid READ_STATE_BACKEND: {}", other)),
        };

        let reminder_start_hour: u8 = env_or_parse("REMINDER_START_HOUR", "10")?;
        let reminder_end_hour: u8 = env_or_parse("REMINDER_END_HOUR", "18")?;
        if reminder_start_hour >= reminder_end_hour || reminder_end_hour > 24 {
            return Err(anyhow!(
                "invalid reminder window: {}..{}",
                reminder_start_hour,
                reminder_end_hour
            ));
        }

        let poll_interval_seconds: u64 = env_or_parse("POLL_INTERVAL_SECONDS", "30")?;
        if poll_interval_seconds == 0 {
            return Err(anyhow!("invalid POLL_INTERVAL_SECONDS: must be positive"));
        }

        let read_state_retention_days = match std::env::var("READ_STATE_RETENTION_DAYS") {
            Ok(value) => Some(
                value
                    .parse::<u32>()
                    .map_err(|err| anyhow!("invalid READ_STATE_RETENTION_DAYS: {}", err))?,
            ),
            Err(_) => None,
        };

        Ok(Self {
            http_addr,
            app_mode,
            odoo_url: env_or_err("ODOO_URL")?,
            odoo_db: env_or_err("ODOO_DB")?,
            odoo_timeout_seconds: env_or_parse("ODOO_TIMEOUT_SECONDS", "10")?,
            manager_group: env_or("MANAGER_GROUP", "hr.group_hr_manager"),
            read_state_backend,
            redis_url: env_or("REDIS_URL", "redis://127.0.0.1/"),
            read_state_namespace: env_or("READ_STATE_NAMESPACE", "dayflow_read_notifications"),
            read_state_retention_days,
            poll_interval_seconds,
            reminder_start_hour,
            reminder_end_hour,
            local_utc_offset: parse_utc_offset(&env_or("LOCAL_UTC_OFFSET", "+00:00"))?,
            session_key: env_key_32("SESSION_KEY")?,
            session_ttl_minutes: session_ttl(env_or_parse("SESSION_TTL_MINUTES", "480")?)?,
            watch_login: std::env::var("WATCH_LOGIN").ok(),
            watch_password: std::env::var("WATCH_PASSWORD").ok(),
        })
    }

    pub fn notification_settings(&self) -> NotificationSettings {
        NotificationSettings {
            reminder_start_hour: self.reminder_start_hour,
            reminder_end_hour: self.reminder_end_hour,
            local_offset: self.local_utc_offset,
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_or_err(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| anyhow!("missing required env var: {}", key))
}

fn env_or_parse<T>(key: &str, default: &str) -> Result<T>
where
    T: FromStr,
    <T as FromStr>::Err: std::fmt::Display,
{
    let value = std::env::var(key).unwrap_or_else(|_| default.to_string());
    value
        .parse::<T>()
        .map_err(|err| anyhow!("invalid {}: {}", key, err))
}

fn env_key_32(key: &str) -> Result<[u8; 32]> {
    let value = env_or_err(key)?;
    let decoded = STANDARD
        .decode(value.as_bytes())
        .map_err(|err| anyhow!("invalid {}: {}", key, err))?;
    if decoded.len() != 32 {
        return Err(anyhow!("invalid {}: expected 32 bytes", key));
    }
    let mut key_bytes = [0u8; 32];
    key_bytes.copy_from_slice(&decoded);
    Ok(key_bytes)
}

/// Parses `+HH:MM` / `-HH:MM`.
/// Caps the token lifetime at 30 days.
const MAX_SESSION_TTL_MINUTES: u64 = 30 * 24 * 60;

fn session_ttl(minutes: u64) -> Result<u64> {
    if minutes == 0 || minutes > MAX_SESSION_TTL_MINUTES {
        return Err(anyhow!(
            "invalid SESSION_TTL_MINUTES: must be between 1 and {}",
            MAX_SESSION_TTL_MINUTES
        ));
    }
    Ok(minutes)
}

fn parse_utc_offset(value: &str) -> Result<UtcOffset> {
    UtcOffset::parse(
        value,
        format_description!("[offset_hour sign:mandatory]:[offset_minute]"),
    )
    .map_err(|err| anyhow!("invalid LOCAL_UTC_OFFSET {}: {}", value, err))
}
