use anyhow::{Context, Result};
use chrono::{FixedOffset, NaiveTime};
use std::env;
use std::path::PathBuf;
use tracing::warn;

/// Default nag period for items waiting on reviewers (minutes).
pub const DEFAULT_INTERVAL_PENDING: i64 = 60;
/// Default nag period for items waiting on their submitter (minutes).
pub const DEFAULT_INTERVAL_NEED_FIX: i64 = 120;
/// Default local-time offset: UTC+8.
const DEFAULT_UTC_OFFSET_MINUTES: i32 = 480;

#[derive(Clone)]
pub struct Config {
    pub bot_token: String,
    /// Chats the bot accepts commands from and broadcasts reminders to.
    pub allowed_chat_ids: Vec<i64>,
    pub port: u16,
    /// Directory for persistent state (SQLite database).
    pub state_dir: PathBuf,
    pub pending_interval_minutes: i64,
    pub need_fix_interval_minutes: i64,
    /// Local-time window during which scheduled reminders stay silent.
    pub quiet_hours: Option<QuietHours>,
    /// Offset that defines "local time" for quiet hours and reminder display.
    pub tz: FixedOffset,
    /// Public HTTPS URL to self-register with Telegram at startup. When unset
    /// the webhook is assumed to be registered out of band.
    pub webhook_url: Option<String>,
    /// Shared secret Telegram echoes back in a header on every update.
    pub webhook_secret: Option<String>,
    /// Optional bearer token for /status endpoint authentication.
    /// If set, requests to /status must include `Authorization: Bearer <token>`.
    /// If not set, /status endpoint is disabled (returns 403 Forbidden).
    pub status_auth_token: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let bot_token = env::var("TELEGRAM_BOT_TOKEN")
            .context("TELEGRAM_BOT_TOKEN environment variable is required")?;

        let allowed_chat_ids =
            parse_allowed_chat_ids(&env::var("ALLOWED_CHAT_IDS").unwrap_or_default());
        if allowed_chat_ids.is_empty() {
            anyhow::bail!("ALLOWED_CHAT_IDS must list at least one numeric chat id");
        }

        let port = env::var("PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .context("PORT must be a valid number")?;

        let state_dir = env::var("STATE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("state"));

        let pending_interval_minutes = parse_interval_minutes(
            "REMINDER_INTERVAL_PENDING",
            env::var("REMINDER_INTERVAL_PENDING").ok(),
            DEFAULT_INTERVAL_PENDING,
        );

        let need_fix_interval_minutes = parse_interval_minutes(
            "REMINDER_INTERVAL_NEED_FIX",
            env::var("REMINDER_INTERVAL_NEED_FIX").ok(),
            DEFAULT_INTERVAL_NEED_FIX,
        );

        let quiet_hours = parse_quiet_hours(
            env::var("QUIET_HOURS_START").ok(),
            env::var("QUIET_HOURS_END").ok(),
        );

        let tz = parse_utc_offset_minutes(env::var("UTC_OFFSET_MINUTES").ok());

        let webhook_url = env::var("TELEGRAM_WEBHOOK_URL")
            .ok()
            .filter(|s| !s.trim().is_empty());

        let webhook_secret = env::var("TELEGRAM_WEBHOOK_SECRET")
            .ok()
            .filter(|s| !s.trim().is_empty());

        let status_auth_token = parse_status_auth_token(env::var("STATUS_AUTH_TOKEN").ok());

        Ok(Config {
            bot_token,
            allowed_chat_ids,
            port,
            state_dir,
            pending_interval_minutes,
            need_fix_interval_minutes,
            quiet_hours,
            tz,
            webhook_url,
            webhook_secret,
            status_auth_token,
        })
    }
}

/// A local-time window during which scheduled reminders do not fire.
///
/// `start > end` wraps past midnight, e.g. 22:00-08:00.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuietHours {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl QuietHours {
    /// Whether `now` falls inside the window. The start minute is inside,
    /// the end minute is outside.
    pub fn contains(&self, now: NaiveTime) -> bool {
        if self.start <= self.end {
            self.start <= now && now < self.end
        } else {
            now >= self.start || now < self.end
        }
    }
}

/// Parse a comma-separated chat id list, skipping entries that are not
/// numbers.
pub fn parse_allowed_chat_ids(value: &str) -> Vec<i64> {
    let mut chat_ids = Vec::new();
    for entry in value.split(',') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        match entry.parse::<i64>() {
            Ok(id) => chat_ids.push(id),
            Err(_) => warn!("Ignoring non-numeric chat id '{}' in ALLOWED_CHAT_IDS", entry),
        }
    }
    chat_ids
}

/// Parse a reminder interval in minutes. Unset falls back silently; an
/// unparseable or non-positive value falls back with a warning.
pub fn parse_interval_minutes(name: &str, value: Option<String>, default: i64) -> i64 {
    let Some(value) = value.filter(|s| !s.trim().is_empty()) else {
        return default;
    };
    match value.trim().parse::<i64>() {
        Ok(minutes) if minutes > 0 => minutes,
        _ => {
            warn!(
                "Invalid interval in {}: '{}', using default {}",
                name, value, default
            );
            default
        }
    }
}

/// Parse the quiet-hours window from its two HH:MM endpoints.
///
/// Both endpoints must be present for the window to exist; a malformed
/// endpoint disables the window with a warning rather than failing startup.
pub fn parse_quiet_hours(start: Option<String>, end: Option<String>) -> Option<QuietHours> {
    let start_str = start.filter(|s| !s.trim().is_empty())?;
    let end_str = end.filter(|s| !s.trim().is_empty())?;

    match (parse_hhmm(&start_str), parse_hhmm(&end_str)) {
        (Some(start), Some(end)) => Some(QuietHours { start, end }),
        _ => {
            warn!(
                "Invalid quiet hours format: start='{}', end='{}', quiet hours disabled",
                start_str, end_str
            );
            None
        }
    }
}

fn parse_hhmm(value: &str) -> Option<NaiveTime> {
    let mut parts = value.trim().split(':');
    let hour = parts.next()?.parse::<u32>().ok()?;
    let minute = parts.next()?.parse::<u32>().ok()?;
    NaiveTime::from_hms_opt(hour, minute, 0)
}

/// Parse the local-time offset in minutes east of UTC. Falls back to UTC+8
/// with a warning when unparseable or out of range.
pub fn parse_utc_offset_minutes(value: Option<String>) -> FixedOffset {
    let default = FixedOffset::east_opt(DEFAULT_UTC_OFFSET_MINUTES * 60)
        .unwrap_or_else(|| FixedOffset::east_opt(0).unwrap());

    let Some(value) = value.filter(|s| !s.trim().is_empty()) else {
        return default;
    };
    let offset = value
        .trim()
        .parse::<i32>()
        .ok()
        .and_then(|minutes| minutes.checked_mul(60))
        .and_then(FixedOffset::east_opt);
    match offset {
        Some(tz) => tz,
        None => {
            warn!(
                "Invalid UTC_OFFSET_MINUTES '{}', using default {}",
                value, DEFAULT_UTC_OFFSET_MINUTES
            );
            default
        }
    }
}

/// Parse STATUS_AUTH_TOKEN from an optional string value.
///
/// Returns None if the value is missing, empty, or contains only whitespace.
/// This prevents security issues where an empty token would allow unauthenticated access.
pub fn parse_status_auth_token(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}
