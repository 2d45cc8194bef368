use std::{fs, path::Path, time::Duration};

use client_core::PollPolicy;
use tracing::warn;

pub const CONFIG_FILE: &str = "batch.toml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub server_url: String,
    pub submit_path: String,
    pub poll_interval_ms: u64,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub timeout_secs: Option<u64>,
}

impl Default for Settings {
    fn default() -> Self {
        let policy = PollPolicy::default();
        Self {
            server_url: "http://127.0.0.1:8000".into(),
            submit_path: "/reviews/batch/close/".into(),
            poll_interval_ms: millis(policy.interval),
            max_retries: policy.max_retries,
            retry_delay_ms: millis(policy.retry_delay),
            timeout_secs: None,
        }
    }
}

impl Settings {
    pub fn poll_policy(&self) -> PollPolicy {
        PollPolicy::default()
            .with_interval(Duration::from_millis(self.poll_interval_ms))
            .with_max_retries(self.max_retries)
            .with_retry_delay(Duration::from_millis(self.retry_delay_ms))
            .with_timeout(self.timeout_secs.map(Duration::from_secs))
    }
}

pub fn load_settings(path: &Path) -> Settings {
    load_settings_with_env(path, |key| std::env::var(key).ok())
}

/// Layers defaults, then `path` if it exists, then environment overrides.
pub fn load_settings_with_env(path: &Path, env: impl Fn(&str) -> Option<String>) -> Settings {
    let mut settings = Settings::default();

    if let Ok(raw) = fs::read_to_string(path) {
        apply_file_overrides(&mut settings, &raw);
    }

    if let Some(v) = env("BATCH_SERVER_URL") {
        settings.server_url = v;
    }
    if let Some(v) = env("APP__SERVER_URL") {
        settings.server_url = v;
    }
    if let Some(v) = env("APP__SUBMIT_PATH") {
        settings.submit_path = v;
    }
    if let Some(v) = env("APP__POLL_INTERVAL_MS") {
        set_parsed(&mut settings.poll_interval_ms, "APP__POLL_INTERVAL_MS", &v);
    }
    if let Some(v) = env("APP__MAX_RETRIES") {
        set_parsed(&mut settings.max_retries, "APP__MAX_RETRIES", &v);
    }
    if let Some(v) = env("APP__RETRY_DELAY_MS") {
        set_parsed(&mut settings.retry_delay_ms, "APP__RETRY_DELAY_MS", &v);
    }
    if let Some(v) = env("APP__TIMEOUT_SECS") {
        set_timeout(&mut settings, "APP__TIMEOUT_SECS", &v);
    }

    settings
}

fn apply_file_overrides(settings: &mut Settings, raw: &str) {
    let table = match toml::from_str::<toml::Table>(raw) {
        Ok(table) => table,
        Err(err) => {
            warn!(error = %err, "ignoring unreadable {CONFIG_FILE}");
            return;
        }
    };
    let get = |key: &str| table.get(key).map(value_as_string);

    if let Some(v) = get("server_url") {
        settings.server_url = v;
    }
    if let Some(v) = get("submit_path") {
        settings.submit_path = v;
    }
    if let Some(v) = get("poll_interval_ms") {
        set_parsed(&mut settings.poll_interval_ms, "poll_interval_ms", &v);
    }
    if let Some(v) = get("max_retries") {
        set_parsed(&mut settings.max_retries, "max_retries", &v);
    }
    if let Some(v) = get("retry_delay_ms") {
        set_parsed(&mut settings.retry_delay_ms, "retry_delay_ms", &v);
    }
    if let Some(v) = get("timeout_secs") {
        set_timeout(settings, "timeout_secs", &v);
    }
}

fn value_as_string(value: &toml::Value) -> String {
    match value {
        toml::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn set_parsed<T: std::str::FromStr>(slot: &mut T, key: &str, raw: &str) {
    match raw.trim().parse() {
        Ok(parsed) => *slot = parsed,
        Err(_) => warn!(key, value = raw, "ignoring unparsable setting"),
    }
}

/// A timeout of zero disables the deadline.
fn set_timeout(settings: &mut Settings, key: &str, raw: &str) {
    match raw.trim().parse::<u64>() {
        Ok(0) => settings.timeout_secs = None,
        Ok(secs) => settings.timeout_secs = Some(secs),
        Err(_) => warn!(key, value = raw, "ignoring unparsable setting"),
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
