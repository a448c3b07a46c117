use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::AppError;
use crate::filter::PatternFilter;
use crate::retry::RetryPolicy;
use crate::runner::RunnerConfig;

pub const CONFIG_FILE: &str = "config.yaml";
pub const ENV_FILE: &str = ".env";
pub const LEDGER_FILE: &str = "scanned_guids.txt";
pub const INVALID_LOG_FILE: &str = "invalid_movie.log";
pub const LOG_FILE: &str = "reelwatch.log";

/// Settings read from `config.yaml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    /// Minutes between scheduled passes.
    #[serde(default = "default_execution_interval")]
    pub execution_interval: u64,
    #[serde(default = "default_max_stored_guids")]
    pub max_stored_guids: usize,
    /// Keep the ledger in memory only.
    #[serde(default)]
    pub debug_mode: bool,
    #[serde(default)]
    pub debug_logging: bool,
    /// Accept manual triggers from stdin.
    #[serde(default = "default_true")]
    pub use_keyboard: bool,
    #[serde(default = "default_movie_folder")]
    pub movie_folder: String,
    pub quality_profile: String,
    #[serde(default)]
    pub match_patterns: Vec<String>,
    #[serde(default)]
    pub not_match_patterns: Vec<String>,
    #[serde(default = "default_true")]
    pub respect_list_exclusions: bool,
    #[serde(default)]
    pub feed: FeedSettings,
    #[serde(default = "RetrySettings::feed")]
    pub feed_retry: RetrySettings,
    #[serde(default = "RetrySettings::sink")]
    pub sink_retry: RetrySettings,
}

fn default_execution_interval() -> u64 {
    15
}

fn default_max_stored_guids() -> usize {
    1000
}

fn default_true() -> bool {
    true
}

fn default_movie_folder() -> String {
    "/data/media/movies".into()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FeedSettings {
    pub url: String,
    pub category: u32,
    pub limit: u32,
    pub timeout_secs: u64,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            url: "https://nzbfinder.ws/rss/category".into(),
            category: 2040,
            limit: 50,
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_delay_secs: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    #[serde(default = "default_max_delay_secs")]
    pub max_delay_secs: u64,
    #[serde(default)]
    pub max_elapsed_secs: Option<u64>,
    #[serde(default)]
    pub jitter_ms: u64,
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_max_delay_secs() -> u64 {
    300
}

impl RetrySettings {
    pub fn feed() -> Self {
        Self {
            max_attempts: 5,
            base_delay_secs: 5,
            multiplier: default_multiplier(),
            max_delay_secs: default_max_delay_secs(),
            max_elapsed_secs: None,
            jitter_ms: 0,
        }
    }

    pub fn sink() -> Self {
        Self {
            max_attempts: 3,
            ..Self::feed()
        }
    }

    pub fn to_policy(&self) -> RetryPolicy {
        let policy = RetryPolicy::new(self.max_attempts, Duration::from_secs(self.base_delay_secs))
            .with_multiplier(self.multiplier)
            .with_max_delay(Duration::from_secs(self.max_delay_secs))
            .with_jitter(Duration::from_millis(self.jitter_ms));
        match self.max_elapsed_secs {
            Some(secs) => policy.with_max_elapsed(Duration::from_secs(secs)),
            None => policy,
        }
    }

    fn validate(&self, field: &str) -> Result<(), AppError> {
        if self.max_attempts == 0 {
            return Err(AppError::ConfigError(format!(
                "{field}.max_attempts must be at least 1"
            )));
        }
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(AppError::ConfigError(format!(
                "{field}.multiplier must be a number >= 1.0, got {}",
                self.multiplier
            )));
        }
        Ok(())
    }
}

impl Settings {
    /// Parse and validate settings from YAML text.
    pub fn from_yaml(raw: &str) -> Result<Self, AppError> {
        let settings: Settings = serde_yaml::from_str(raw)
            .map_err(|e| AppError::ConfigError(format!("Invalid {CONFIG_FILE}: {e}")))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Read `config.yaml` from `config_dir`.
    pub fn load(config_dir: &Path) -> Result<Self, AppError> {
        let path = config_dir.join(CONFIG_FILE);
        let raw = std::fs::read_to_string(&path).map_err(|e| {
            AppError::ConfigError(format!("Cannot read {}: {e}", path.display()))
        })?;
        Self::from_yaml(&raw)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.execution_interval == 0 {
            return Err(AppError::ConfigError(
                "execution_interval must be a positive number of minutes".into(),
            ));
        }
        if self.max_stored_guids == 0 {
            return Err(AppError::ConfigError(
                "max_stored_guids must be at least 1".into(),
            ));
        }
        if self.quality_profile.trim().is_empty() {
            return Err(AppError::ConfigError("quality_profile must not be empty".into()));
        }
        if self.movie_folder.trim().is_empty() {
            return Err(AppError::ConfigError("movie_folder must not be empty".into()));
        }
        if self.feed.limit == 0 || self.feed.timeout_secs == 0 {
            return Err(AppError::ConfigError(
                "feed.limit and feed.timeout_secs must be positive".into(),
            ));
        }
        parse_url("feed.url", &self.feed.url)?;
        self.feed_retry.validate("feed_retry")?;
        self.sink_retry.validate("sink_retry")?;
        Ok(())
    }

    /// Compile the configured patterns. Fails on the first invalid regex.
    pub fn pattern_filter(&self) -> Result<PatternFilter, AppError> {
        PatternFilter::new(
            self.match_patterns.as_slice(),
            self.not_match_patterns.as_slice(),
        )
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.execution_interval.saturating_mul(60))
    }

    pub fn runner_config(&self) -> RunnerConfig {
        RunnerConfig::default().with_interval(self.interval())
    }
}

/// Credentials and endpoints taken from the environment.
#[derive(Clone)]
pub struct Secrets {
    pub indexer_api_key: String,
    pub radarr_url: Url,
    pub radarr_api_key: String,
}

impl std::fmt::Debug for Secrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Secrets")
            .field("indexer_api_key", &"<redacted>")
            .field("radarr_url", &self.radarr_url.as_str())
            .field("radarr_api_key", &"<redacted>")
            .finish()
    }
}

impl Secrets {
    /// Read secrets from environment variables.
    ///
    /// - `NZBFINDER_API_KEY` (required)
    /// - `RADARR_URL` (required, http or https)
    /// - `RADARR_API_KEY` (required)
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AppError> {
        let required = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .ok_or_else(|| AppError::ConfigError(format!("{key} not set")))
        };

        let indexer_api_key = required("NZBFINDER_API_KEY")?;
        let radarr_url = parse_url("RADARR_URL", &required("RADARR_URL")?)?;
        let radarr_api_key = required("RADARR_API_KEY")?;

        Ok(Self {
            indexer_api_key,
            radarr_url,
            radarr_api_key,
        })
    }
}

fn parse_url(field: &str, raw: &str) -> Result<Url, AppError> {
    let url = Url::parse(raw)
        .map_err(|e| AppError::ConfigError(format!("Invalid {field} '{raw}': {e}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(AppError::ConfigError(format!(
            "Invalid {field} '{raw}': scheme must be http or https"
        )));
    }
    Ok(url)
}

/// File locations derived from the configuration directory.
#[derive(Debug, Clone)]
pub struct ConfigPaths {
    pub dir: PathBuf,
}

impl ConfigPaths {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Fail fast when the directory or one of its required files is missing.
    pub fn ensure_present(&self) -> Result<(), AppError> {
        if !self.dir.is_dir() {
            return Err(AppError::ConfigError(format!(
                "Missing configuration folder: {}",
                self.dir.display()
            )));
        }
        for file in [self.config_file(), self.env_file()] {
            if !file.is_file() {
                return Err(AppError::ConfigError(format!(
                    "Missing essential file: {}",
                    file.display()
                )));
            }
        }
        Ok(())
    }

    pub fn config_file(&self) -> PathBuf {
        self.dir.join(CONFIG_FILE)
    }

    pub fn env_file(&self) -> PathBuf {
        self.dir.join(ENV_FILE)
    }

    pub fn ledger(&self) -> PathBuf {
        self.dir.join(LEDGER_FILE)
    }

    pub fn invalid_log(&self) -> PathBuf {
        self.dir.join(INVALID_LOG_FILE)
    }

    pub fn log_file(&self) -> PathBuf {
        self.dir.join(LOG_FILE)
    }
}
