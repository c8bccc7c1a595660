use std::{fs, path::Path, time::Duration};

use anyhow::Context;
use client_core::Timings;
use serde::Deserialize;
use tracing::warn;

pub const SETTINGS_FILE: &str = "kiosk.toml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub api_base_url: String,
    pub database_url: String,
    pub queue_poll_secs: u64,
    pub stats_poll_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:8000".into(),
            database_url: "sqlite://./data/kiosk.db".into(),
            queue_poll_secs: 10,
            stats_poll_secs: 10,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct FileSettings {
    api_base_url: Option<String>,
    database_url: Option<String>,
    queue_poll_secs: Option<u64>,
    stats_poll_secs: Option<u64>,
}

impl Settings {
    /// Controller timings with the configured poll intervals. Intervals never drop below a second.
    pub fn timings(&self) -> Timings {
        Timings {
            queue_poll: Duration::from_secs(self.queue_poll_secs.max(1)),
            doctor_stats_poll: Duration::from_secs(self.stats_poll_secs.max(1)),
            ..Timings::default()
        }
    }

    fn apply_file(&mut self, raw: &str) -> anyhow::Result<()> {
        let file_cfg: FileSettings = toml::from_str(raw).context("invalid kiosk settings file")?;
        if let Some(v) = file_cfg.api_base_url {
            self.api_base_url = v;
        }
        if let Some(v) = file_cfg.database_url {
            self.database_url = v;
        }
        if let Some(v) = file_cfg.queue_poll_secs {
            self.queue_poll_secs = v;
        }
        if let Some(v) = file_cfg.stats_poll_secs {
            self.stats_poll_secs = v;
        }
        Ok(())
    }

    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(v) = var("HOSPITAL_API_URL") {
            self.api_base_url = v;
        }
        if let Some(v) = var("APP__API_BASE_URL") {
            self.api_base_url = v;
        }

        if let Some(v) = var("DATABASE_URL") {
            self.database_url = v;
        }
        if let Some(v) = var("APP__DATABASE_URL") {
            self.database_url = v;
        }

        if let Some(v) = var("APP__QUEUE_POLL_SECS") {
            match v.parse::<u64>() {
                Ok(parsed) => self.queue_poll_secs = parsed,
                Err(_) => warn!(value = %v, "ignoring unparsable APP__QUEUE_POLL_SECS"),
            }
        }
        if let Some(v) = var("APP__STATS_POLL_SECS") {
            match v.parse::<u64>() {
                Ok(parsed) => self.stats_poll_secs = parsed,
                Err(_) => warn!(value = %v, "ignoring unparsable APP__STATS_POLL_SECS"),
            }
        }
    }
}

/// Defaults, then `kiosk.toml` if present, then environment overrides.
pub fn load_settings() -> Settings {
    load_settings_from(Path::new(SETTINGS_FILE), |key| std::env::var(key).ok())
}

fn load_settings_from(path: &Path, var: impl Fn(&str) -> Option<String>) -> Settings {
    let mut settings = Settings::default();

    if let Ok(raw) = fs::read_to_string(path) {
        if let Err(err) = settings.apply_file(&raw) {
            warn!(path = %path.display(), "{err:#}");
        }
    }
    settings.apply_env(var);

    settings
}

/// Turns a bare file path into a `sqlite://` url; urls pass through untouched.
pub fn normalize_database_url(raw_database_url: &str) -> String {
    let raw_database_url = raw_database_url.trim();

    if raw_database_url.is_empty() {
        return Settings::default().database_url;
    }

    if raw_database_url.starts_with("sqlite::memory:") || raw_database_url.contains("://") {
        return raw_database_url.to_string();
    }

    if let Some(path) = raw_database_url.strip_prefix("sqlite:") {
        let path = path.replace('\\', "/");
        return format!("sqlite://{path}");
    }

    format!("sqlite://{}", raw_database_url.replace('\\', "/"))
}
