use std::{env, fs, path::PathBuf, time::Duration};

use chrono::NaiveDate;

use crate::{errors::Error, Result};

pub const DEFAULT_BASE_DATE: &str = "2025-07-14";
pub const DEFAULT_BASE_NUMBER: i64 = 53;

/// Typed configuration, read from the environment (and `.env` if present).
#[derive(Clone, Debug)]
pub struct Config {
    // Core
    pub telegram_bot_token: String,
    pub telegram_allowed_users: Vec<i64>,

    // Webhook
    pub webhook_url: Option<String>,
    pub webhook_path: String,
    pub port: u16,

    // Files
    pub work_dir: PathBuf,
    pub max_file_size: u64,

    // Sessions
    pub unit_session_ttl: Duration,

    // Day numbering
    pub day_base_date: NaiveDate,
    pub day_base_number: i64,
}

impl Config {
    pub fn load() -> Result<Self> {
        // A missing `.env` is fine; existing variables are never overridden.
        let _ = dotenvy::dotenv();

        let cfg = Self::from_lookup(|key| env::var(key).ok())?;
        fs::create_dir_all(&cfg.work_dir)?;
        Ok(cfg)
    }

    /// Build a config from an arbitrary key lookup. Does not touch the filesystem.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).and_then(non_empty);

        let telegram_bot_token = get("TELEGRAM_BOT_TOKEN")
            .or_else(|| get("BOT_TOKEN"))
            .ok_or_else(|| {
                Error::Config("TELEGRAM_BOT_TOKEN environment variable is required".to_string())
            })?;
        let telegram_allowed_users = parse_csv_i64(get("TELEGRAM_ALLOWED_USERS"));

        let webhook_url = get("WEBHOOK_URL")
            .or_else(|| get("RENDER_EXTERNAL_URL"))
            .map(|u| u.trim_end_matches('/').to_string());
        let webhook_path = normalize_webhook_path(get("WEBHOOK_PATH").as_deref());
        let port = parse_or("PORT", get("PORT"), 8080u16)?;

        let work_dir = PathBuf::from(get("WORK_DIR").unwrap_or("/tmp/csvbot".to_string()));
        let max_file_size = parse_or("MAX_FILE_SIZE", get("MAX_FILE_SIZE"), 20 * 1024 * 1024u64)?;

        let unit_session_ttl = Duration::from_secs(parse_or(
            "UNIT_SESSION_TTL_SECS",
            get("UNIT_SESSION_TTL_SECS"),
            1800u64,
        )?);

        let raw_date = get("DAY_BASE_DATE").unwrap_or(DEFAULT_BASE_DATE.to_string());
        let day_base_date = NaiveDate::parse_from_str(raw_date.trim(), "%Y-%m-%d")
            .map_err(|e| Error::Config(format!("DAY_BASE_DATE '{raw_date}': {e}")))?;
        let day_base_number = parse_or(
            "DAY_BASE_NUMBER",
            get("DAY_BASE_NUMBER"),
            DEFAULT_BASE_NUMBER,
        )?;

        Ok(Self {
            telegram_bot_token,
            telegram_allowed_users,
            webhook_url,
            webhook_path,
            port,
            work_dir,
            max_file_size,
            unit_session_ttl,
            day_base_date,
            day_base_number,
        })
    }

    /// Full public webhook URL, if the bot runs in webhook mode.
    pub fn webhook_endpoint(&self) -> Option<String> {
        self.webhook_url
            .as_ref()
            .map(|base| format!("{base}{}", self.webhook_path))
    }
}

fn normalize_webhook_path(raw: Option<&str>) -> String {
    let path = raw.map(str::trim).unwrap_or("/webhook");
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    }
}

fn parse_or<T>(key: &str, raw: Option<String>, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match raw {
        None => Ok(default),
        Some(v) => v
            .trim()
            .parse::<T>()
            .map_err(|e| Error::Config(format!("{key} '{v}': {e}"))),
    }
}

fn parse_csv_i64(v: Option<String>) -> Vec<i64> {
    v.unwrap_or_default()
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse::<i64>().ok())
        .collect()
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}
