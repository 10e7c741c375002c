use anyhow::{Context, Result, bail};
use clap::Parser;
use lib_livefeed::configs::{LiveFeedConfig, RetryPolicy};
use lib_livefeed::configs::feed_config::{
    BASE_DELAY_MS, IDLE_TIMEOUT_MS, MAX_ATTEMPTS, MAX_DELAY_MS, POLL_INTERVAL_MS,
};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_CONFIG_FILE: &str = "feed_watch.conf";

#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
#[clap(about = "Console watcher for a live data feed", version)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[clap(long, env = "FEED_WATCH_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    pub config_path: Option<PathBuf>,

    #[clap(long, env = "FEED_WATCH_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "FEED_WATCH_LOG_LEVEL", help = "Logging level (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,

    #[clap(long, env = "FEED_WATCH_STREAM_URL", help = "Server-push (SSE) endpoint to watch.")]
    pub stream_url: Option<String>,

    #[clap(long, env = "FEED_WATCH_POLL_URL", help = "Polling endpoint; defaults to the stream URL.")]
    pub poll_url: Option<String>,

    #[clap(
        long = "header",
        env = "FEED_WATCH_HEADERS",
        value_delimiter = ';',
        help = "Extra request header as NAME:VALUE. Repeatable; ';'-separated in the environment."
    )]
    pub headers: Option<Vec<String>>,

    #[clap(long, env = "FEED_WATCH_RECONNECT_BASE_DELAY_MS", help = "Delay in milliseconds before the first reconnect.")]
    pub reconnect_base_delay_ms: Option<u64>,

    #[clap(long, env = "FEED_WATCH_RECONNECT_MAX_DELAY_MS", help = "Maximum delay in milliseconds between reconnects.")]
    pub reconnect_max_delay_ms: Option<u64>,

    #[clap(long, env = "FEED_WATCH_MAX_ATTEMPTS", help = "Reconnect attempts before switching to polling.")]
    pub max_attempts: Option<u32>,

    #[clap(long, env = "FEED_WATCH_POLL_INTERVAL_MS", help = "Polling interval in milliseconds once in backup mode.")]
    pub poll_interval_ms: Option<u64>,

    #[clap(long, env = "FEED_WATCH_IDLE_TIMEOUT_MS", help = "Stream silence in milliseconds reported as a keep-alive timeout.")]
    pub idle_timeout_ms: Option<u64>,
}

impl Config {
    // Merge two Config structs, where 'other' overrides 'self' for Some values
    fn merge(self, other: Config) -> Config {
        Config {
            config_path: other.config_path.or(self.config_path),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
            stream_url: other.stream_url.or(self.stream_url),
            poll_url: other.poll_url.or(self.poll_url),
            headers: other.headers.or(self.headers),
            reconnect_base_delay_ms: other.reconnect_base_delay_ms.or(self.reconnect_base_delay_ms),
            reconnect_max_delay_ms: other.reconnect_max_delay_ms.or(self.reconnect_max_delay_ms),
            max_attempts: other.max_attempts.or(self.max_attempts),
            poll_interval_ms: other.poll_interval_ms.or(self.poll_interval_ms),
            idle_timeout_ms: other.idle_timeout_ms.or(self.idle_timeout_ms),
        }
    }

    fn defaults() -> Config {
        Config {
            log_dir: Some(PathBuf::from("./logs")),
            log_level: Some("info".to_string()),
            stream_url: Some("http://127.0.0.1:3000/api/live/stream".to_string()),
            reconnect_base_delay_ms: Some(BASE_DELAY_MS),
            reconnect_max_delay_ms: Some(MAX_DELAY_MS),
            max_attempts: Some(MAX_ATTEMPTS),
            poll_interval_ms: Some(POLL_INTERVAL_MS),
            idle_timeout_ms: Some(IDLE_TIMEOUT_MS),
            ..Default::default()
        }
    }

    pub fn log_dir(&self) -> PathBuf {
        self.log_dir.clone().unwrap_or_else(|| PathBuf::from("./logs"))
    }

    pub fn log_level(&self) -> &str {
        self.log_level.as_deref().unwrap_or("info")
    }

    /// Builds the library configuration; the URLs themselves are checked when
    /// the client connects.
    pub fn to_feed_config(&self) -> Result<LiveFeedConfig> {
        let Some(stream_url) = self.stream_url.as_deref() else {
            bail!("No stream URL configured. Use --stream-url or FEED_WATCH_STREAM_URL.");
        };

        let policy = RetryPolicy {
            max_attempts: self.max_attempts.unwrap_or(MAX_ATTEMPTS),
            base_delay_ms: self.reconnect_base_delay_ms.unwrap_or(BASE_DELAY_MS),
            max_delay_ms: self.reconnect_max_delay_ms.unwrap_or(MAX_DELAY_MS),
            poll_interval_ms: self.poll_interval_ms.unwrap_or(POLL_INTERVAL_MS),
        };

        let mut feed = LiveFeedConfig::new(stream_url)
            .with_policy(policy)
            .with_idle_timeout(Duration::from_millis(self.idle_timeout_ms.unwrap_or(IDLE_TIMEOUT_MS)));
        if let Some(poll_url) = &self.poll_url {
            feed = feed.with_poll_url(poll_url.as_str());
        }
        for header in self.headers.iter().flatten() {
            let (name, value) = header
                .split_once(':')
                .with_context(|| format!("Header '{}' is not in NAME:VALUE form.", header))?;
            feed = feed.with_header(name.trim(), value.trim());
        }

        Ok(feed)
    }
}

pub fn load_config() -> Config {
    load_config_from(Config::parse())
}

/// Layers defaults, the JSON config file and the already-parsed CLI/env values.
pub fn load_config_from(cli_args: Config) -> Config {
    let config_file_path = cli_args
        .config_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

    let mut current_config = Config::defaults();
    if let Some(file_config) = read_config_file(&config_file_path) {
        current_config = current_config.merge(file_config);
    }

    current_config.merge(cli_args)
}

fn read_config_file(path: &Path) -> Option<Config> {
    if !path.exists() {
        log::info!(
            "Config file not found at {}. Using defaults and environment/CLI variables.",
            path.display()
        );
        return None;
    }

    let config_str = match fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) => {
            log::warn!("Failed to read config file {}: {}. Falling back to other sources.", path.display(), e);
            return None;
        }
    };

    match serde_json::from_str::<Config>(&config_str) {
        Ok(file_config) => Some(file_config),
        Err(e) => {
            log::warn!("Failed to parse config file {}: {}. Falling back to other sources.", path.display(), e);
            None
        }
    }
}
