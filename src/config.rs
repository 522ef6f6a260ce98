use anyhow::{Context, Result};
use chrono::Duration;

use crate::lock::{LockSettings, MAX_LOCK_TTL_SECS};

#[derive(Debug, Clone)]
pub struct Config {
    // Server
    pub port: u16,
    pub api_key: Option<String>,

    // Components and permissions
    pub components_file: String,

    // Database (optional event journal)
    pub database_url: Option<String>,

    // Locking (seconds, 1..=MAX_LOCK_TTL_SECS)
    pub lock_time: i64,
    pub auto_lock_time: i64,
    pub auto_lock: bool,

    // Lock reclamation cron expression, or None when disabled
    pub lock_sweep_schedule: Option<String>,

    // Events
    pub event_buffer: usize,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let lock_time = parse_lock_time("LOCK_TIME", 900)?;
        let auto_lock_time = parse_lock_time("AUTO_LOCK_TIME", 60)?;

        Ok(Self {
            // Server
            port: parse_env("PORT", 8080)?,
            api_key: non_empty_env("API_KEY"),

            // Components
            components_file: std::env::var("COMPONENTS_FILE")
                .unwrap_or_else(|_| "components.json".to_string()),

            // Database
            database_url: non_empty_env("DATABASE_URL"),

            // Locking
            lock_time,
            auto_lock_time,
            auto_lock: parse_bool_env("AUTO_LOCK", true)?,

            // Sweep ("off" disables)
            lock_sweep_schedule: match std::env::var("LOCK_SWEEP_SCHEDULE") {
                Ok(v) if v.trim().eq_ignore_ascii_case("off") => None,
                Ok(v) if !v.trim().is_empty() => Some(v.trim().to_string()),
                _ => Some("0 */5 * * * *".to_string()),
            },

            // Events
            event_buffer: parse_env("EVENT_BUFFER", 1024)?,
        })
    }

    /// Lock lifetimes for the engine
    pub fn lock_settings(&self) -> LockSettings {
        LockSettings {
            lock_time: Duration::seconds(self.lock_time),
            auto_lock_time: Duration::seconds(self.auto_lock_time),
            auto_lock: self.auto_lock,
        }
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_env<T>(name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match non_empty_env(name) {
        Some(v) => v
            .trim()
            .parse()
            .context(format!("{} has an invalid value: {}", name, v)),
        None => Ok(default),
    }
}

fn parse_lock_time(name: &str, default: i64) -> Result<i64> {
    let secs: i64 = parse_env(name, default)?;
    if !(1..=MAX_LOCK_TTL_SECS).contains(&secs) {
        anyhow::bail!(
            "{} must be between 1 and {} seconds, got {}",
            name,
            MAX_LOCK_TTL_SECS,
            secs
        );
    }
    Ok(secs)
}

fn parse_bool_env(name: &str, default: bool) -> Result<bool> {
    match non_empty_env(name).map(|v| v.trim().to_ascii_lowercase()) {
        None => Ok(default),
        Some(v) => match v.as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => anyhow::bail!("{} must be a boolean, got {}", name, v),
        },
    }
}
