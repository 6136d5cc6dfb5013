use std::{path::PathBuf, time::Duration};

use tokio::sync::Semaphore;

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8000";
pub const DEFAULT_DOWNLOADS_DIR: &str = "downloads";
pub const DEFAULT_COOKIES_FILE: &str = "cookies.txt";
pub const DEFAULT_DOWNLOAD_TIMEOUT_SECONDS: u64 = 300;
pub const DEFAULT_QUERY_TIMEOUT_SECONDS: u64 = 30;
pub const DEFAULT_FILE_MAX_AGE_SECONDS: u64 = 60 * 60;
pub const DEFAULT_SERVED_FILE_TTL_SECONDS: u64 = 5 * 60;
pub const DEFAULT_MAX_CONCURRENT_DOWNLOADS: usize = 3;
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
    AppleWebKit/537.36 (KHTML, like Gecko) Chrome/115.0.0.0 Safari/537.36";

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub bind_addr: String,
    pub downloads_dir: PathBuf,
    pub yt_dlp_bin: String,
    pub ffmpeg_bin: String,
    pub download_timeout: Duration,
    pub query_timeout: Duration,
    pub file_max_age: Duration,
    pub served_file_ttl: Duration,
    pub max_concurrent_downloads: usize,
    pub strict_output_match: bool,
    pub cookies_file: PathBuf,
    pub user_agent: String,
    pub allowed_origins: Vec<String>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

impl ServiceConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the configuration from an arbitrary variable source. Missing,
    /// blank, zero or unparsable values fall back to the defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let text = |name: &str| {
            lookup(name)
                .as_deref()
                .and_then(non_empty)
                .map(ToString::to_string)
        };
        let seconds = |name: &str, default: u64| {
            let value = text(name)
                .and_then(|value| value.parse::<u64>().ok())
                .filter(|value| *value > 0)
                .unwrap_or(default);
            Duration::from_secs(value)
        };

        let bind_addr = text("APP_ADDR")
            .or_else(|| {
                text("PORT")
                    .and_then(|value| value.parse::<u16>().ok())
                    .map(|port| format!("0.0.0.0:{port}"))
            })
            .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());

        let allowed_origins = text("ALLOWED_ORIGINS")
            .map(|value| {
                value
                    .split(',')
                    .map(str::trim)
                    .filter(|origin| !origin.is_empty())
                    .map(ToString::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Self {
            bind_addr,
            downloads_dir: PathBuf::from(
                text("DOWNLOADS_DIR").unwrap_or_else(|| DEFAULT_DOWNLOADS_DIR.to_string()),
            ),
            yt_dlp_bin: text("YT_DLP_BIN").unwrap_or_else(|| "yt-dlp".to_string()),
            ffmpeg_bin: text("FFMPEG_BIN").unwrap_or_else(|| "ffmpeg".to_string()),
            download_timeout: seconds("DOWNLOAD_TIMEOUT_SECONDS", DEFAULT_DOWNLOAD_TIMEOUT_SECONDS),
            query_timeout: seconds("QUERY_TIMEOUT_SECONDS", DEFAULT_QUERY_TIMEOUT_SECONDS),
            file_max_age: seconds("FILE_MAX_AGE_SECONDS", DEFAULT_FILE_MAX_AGE_SECONDS),
            served_file_ttl: seconds("SERVED_FILE_TTL_SECONDS", DEFAULT_SERVED_FILE_TTL_SECONDS),
            max_concurrent_downloads: text("MAX_CONCURRENT_DOWNLOADS")
                .and_then(|value| value.parse::<usize>().ok())
                .filter(|value| *value > 0)
                .map(|value| value.min(Semaphore::MAX_PERMITS))
                .unwrap_or(DEFAULT_MAX_CONCURRENT_DOWNLOADS),
            strict_output_match: text("STRICT_OUTPUT_MATCH")
                .and_then(|value| parse_bool(&value))
                .unwrap_or(false),
            cookies_file: PathBuf::from(
                text("COOKIES_FILE").unwrap_or_else(|| DEFAULT_COOKIES_FILE.to_string()),
            ),
            user_agent: text("USER_AGENT").unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()),
            allowed_origins,
        }
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

pub(crate) fn non_empty(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}
