//! Configuration infrastructure
//!
//! Layered the usual way: built-in defaults, then an optional TOML file, then
//! `MARKET_SWEEP__*` environment variables (`__` separates nested keys, e.g.
//! `MARKET_SWEEP__DISPATCH__MAX_CONCURRENT_CRAWLS=10`).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::proxy::ProxyDescriptor;
use crate::domain::result_item::MAX_PAGE_SIZE;

/// Environment variable naming an explicit config file.
pub const CONFIG_PATH_ENV: &str = "MARKET_SWEEP_CONFIG";
const ENV_PREFIX: &str = "MARKET_SWEEP";
const DEFAULT_CONFIG_FILE: &str = "config/default";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load config: {source}")]
    FileLoad {
        #[from]
        source: config::ConfigError,
    },

    #[error("Configuration validation failed: {message}")]
    Validation { message: String },
}

impl ConfigError {
    fn validation(message: impl Into<String>) -> Self {
        Self::Validation { message: message.into() }
    }
}

/// Default values
pub mod defaults {
    pub const MARKETPLACE_BASE_URL: &str = "https://www.daangn.com/kr/buy-sell/";
    pub const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";
    pub const ACCEPT_LANGUAGE: &str = "ko-KR,ko;q=0.9,en-US;q=0.8,en;q=0.7";
    pub const REQUEST_TIMEOUT_SECS: u64 = 10;
    pub const PROBE_URL: &str = "https://ip.oxylabs.io/location";
    pub const PROBE_TIMEOUT_SECS: u64 = 10;

    /// 동시에 진행되는 지역 크롤링 최대 개수
    pub const MAX_CONCURRENT_CRAWLS: usize = 20;
    pub const INITIAL_RESULT_LIMIT: u32 = 100;

    pub const POLL_INTERVAL_SECS: u64 = 60;
    pub const MAX_POLLS: u32 = 30;
    pub const APPROXIMATE_COMPLETION_PCT: f64 = 99.0;

    pub const DB_MAX_CONNECTIONS: u32 = 10;
    pub const DB_BUSY_TIMEOUT_SECS: u64 = 5;

    pub const LOG_LEVEL: &str = "info";
    pub const LOG_MAX_FILES: usize = 7;
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub scraper: ScraperConfig,
    pub proxies: Vec<ProxyDescriptor>,
    pub dispatch: DispatchConfig,
    pub completion: CompletionConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub busy_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: format!("sqlite://{}", data_directory().join("market-sweep.db").display()),
            max_connections: defaults::DB_MAX_CONNECTIONS,
            busy_timeout_secs: defaults::DB_BUSY_TIMEOUT_SECS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScraperConfig {
    pub base_url: String,
    pub user_agent: String,
    pub accept_language: String,
    pub request_timeout_secs: u64,
    pub probe_url: String,
    pub probe_timeout_secs: u64,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            base_url: defaults::MARKETPLACE_BASE_URL.to_string(),
            user_agent: defaults::USER_AGENT.to_string(),
            accept_language: defaults::ACCEPT_LANGUAGE.to_string(),
            request_timeout_secs: defaults::REQUEST_TIMEOUT_SECS,
            probe_url: defaults::PROBE_URL.to_string(),
            probe_timeout_secs: defaults::PROBE_TIMEOUT_SECS,
        }
    }
}

impl ScraperConfig {
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    #[must_use]
    pub const fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub max_concurrent_crawls: usize,
    /// Randomize partition order per job.
    pub shuffle_partitions: bool,
    /// Items returned with the immediate response of a reused job.
    pub initial_result_limit: u32,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_concurrent_crawls: defaults::MAX_CONCURRENT_CRAWLS,
            shuffle_partitions: true,
            initial_result_limit: defaults::INITIAL_RESULT_LIMIT,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompletionConfig {
    pub poll_interval_secs: u64,
    pub max_polls: u32,
    /// A job at or above this percentage counts as done. 100 means exact.
    pub approximate_completion_pct: f64,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: defaults::POLL_INTERVAL_SECS,
            max_polls: defaults::MAX_POLLS,
            approximate_completion_pct: defaults::APPROXIMATE_COMPLETION_PCT,
        }
    }
}

impl CompletionConfig {
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "error", "warn", "info", "debug", "trace"
    pub level: String,
    pub json_format: bool,
    pub console_output: bool,
    pub file_output: bool,
    /// Defaults to `<data dir>/logs`
    pub log_dir: Option<PathBuf>,
    /// Number of rotated log files to keep
    pub max_files: usize,
    pub auto_cleanup: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: defaults::LOG_LEVEL.to_string(),
            json_format: false,
            console_output: true,
            file_output: true,
            log_dir: None,
            max_files: defaults::LOG_MAX_FILES,
            auto_cleanup: true,
        }
    }
}

/// Base directory for the database and logs.
#[must_use]
pub fn data_directory() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("market-sweep")
}

impl AppConfig {
    /// Loads defaults, then `MARKET_SWEEP_CONFIG` (or `config/default.toml` when
    /// present), then environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) => Self::from_file(Path::new(&path)),
            Err(_) => Self::build(config::File::with_name(DEFAULT_CONFIG_FILE).required(false)),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        Self::build(config::File::from(path))
    }

    fn build<S>(file: S) -> Result<Self, ConfigError>
    where
        S: config::Source + Send + Sync + 'static,
    {
        let settings = config::Config::builder()
            .add_source(config::Config::try_from(&Self::default())?)
            .add_source(file)
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .try_parsing(true)
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?;

        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dispatch.max_concurrent_crawls == 0 {
            return Err(ConfigError::validation("max_concurrent_crawls must be greater than 0"));
        }
        let limit = self.dispatch.initial_result_limit;
        if !(1..=MAX_PAGE_SIZE).contains(&limit) {
            return Err(ConfigError::validation(format!(
                "initial_result_limit must be in 1..={MAX_PAGE_SIZE}, got {limit}"
            )));
        }
        if self.completion.max_polls == 0 || self.completion.poll_interval_secs == 0 {
            return Err(ConfigError::validation(
                "poll_interval_secs and max_polls must be greater than 0",
            ));
        }
        let pct = self.completion.approximate_completion_pct;
        if !(pct > 0.0 && pct <= 100.0) {
            return Err(ConfigError::validation(format!(
                "approximate_completion_pct must be in (0, 100], got {pct}"
            )));
        }
        if self.scraper.request_timeout_secs == 0 {
            return Err(ConfigError::validation("request_timeout_secs must be greater than 0"));
        }
        if self.database.max_connections == 0 {
            return Err(ConfigError::validation("database max_connections must be greater than 0"));
        }
        for (index, proxy) in self.proxies.iter().enumerate() {
            if proxy.host.trim().is_empty() || proxy.port == 0 {
                return Err(ConfigError::validation(format!(
                    "proxy #{index} needs a host and a non-zero port"
                )));
            }
            if proxy.username.is_empty() || proxy.password.is_empty() {
                return Err(ConfigError::validation(format!(
                    "proxy #{index} ({}) is missing credentials",
                    proxy.endpoint()
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.dispatch.max_concurrent_crawls, 20);
        assert_eq!(config.completion.max_polls, 30);
        assert_eq!(config.completion.poll_interval(), Duration::from_secs(60));
    }

    #[test]
    fn file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sweep.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"
[dispatch]
max_concurrent_crawls = 4

[[proxies]]
provider = "oxylabs"
country = "JP"
username = "sweeper"
password = "pw"
host = "dc.oxylabs.io"
port = 8001
"#
        )
        .unwrap();

        let config = AppConfig::from_file(&path).unwrap();
        assert_eq!(config.dispatch.max_concurrent_crawls, 4);
        assert!(config.dispatch.shuffle_partitions);
        assert_eq!(config.proxies.len(), 1);
        assert_eq!(config.proxies[0].public_ip, None);
        assert_eq!(config.scraper.base_url, defaults::MARKETPLACE_BASE_URL);
    }

    #[test]
    fn validation_rejects_bad_threshold_and_credentials() {
        let mut config = AppConfig::default();
        config.completion.approximate_completion_pct = 120.0;
        assert!(matches!(config.validate(), Err(ConfigError::Validation { .. })));

        let mut config = AppConfig::default();
        config.proxies.push(ProxyDescriptor {
            provider: crate::domain::proxy::ProxyProvider::Generic,
            country: "KR".into(),
            username: String::new(),
            password: "pw".into(),
            host: "proxy.local".into(),
            port: 3128,
            public_ip: None,
        });
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("missing credentials"));
    }

    #[test]
    fn initial_result_limit_must_fit_one_page() {
        for limit in [0, MAX_PAGE_SIZE + 1] {
            let mut config = AppConfig::default();
            config.dispatch.initial_result_limit = limit;
            let err = config.validate().unwrap_err();
            assert!(err.to_string().contains("initial_result_limit"), "{err}");
        }

        let mut config = AppConfig::default();
        config.dispatch.initial_result_limit = MAX_PAGE_SIZE;
        assert!(config.validate().is_ok());
    }
}
