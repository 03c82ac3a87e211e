use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;

const DEFAULT_API_URL: &str = "http://localhost:8000";
const DEFAULT_SETTINGS_PATH: &str = "advocacy-settings.json";
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Runtime configuration, read once at startup.
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub api_url: String,
    pub settings_path: PathBuf,
    pub export_dir: PathBuf,
    pub http_timeout: Duration,
    pub log_json: bool,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let http_timeout = match non_empty("ADVOCACY_HTTP_TIMEOUT_SECS") {
            Some(raw) => raw
                .trim()
                .parse::<u64>()
                .with_context(|| format!("ADVOCACY_HTTP_TIMEOUT_SECS must be whole seconds, got {raw:?}"))?,
            None => DEFAULT_TIMEOUT_SECS,
        };
        if http_timeout == 0 {
            anyhow::bail!("ADVOCACY_HTTP_TIMEOUT_SECS must be at least 1 second, got 0");
        }

        Ok(Self {
            api_url: non_empty("ADVOCACY_API_URL").unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            settings_path: non_empty("ADVOCACY_SETTINGS_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_SETTINGS_PATH)),
            export_dir: non_empty("ADVOCACY_EXPORT_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(".")),
            http_timeout: Duration::from_secs(http_timeout),
            log_json: matches!(
                non_empty("ADVOCACY_LOG_JSON").as_deref().map(str::trim),
                Some("1" | "true" | "yes")
            ),
        })
    }
}
