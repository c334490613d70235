use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use crate::errors::{AppError, Result};

const ENV_PREFIX: &str = "AUDIO_DL";

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct AppConfig {
    /// Root directory for server-mode jobs; each job writes into `<download_dir>/<name>`.
    pub download_dir: PathBuf,
    pub default_workers: usize,
    /// Budget for one track request, including the body.
    pub request_timeout_secs: u64,
    /// Budget for loading the source page during detection.
    pub page_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub user_agent: String,
    pub proxy: Option<String>,
    /// Capacity of the event broadcast channel before slow observers lag.
    pub event_buffer: usize,
    pub block_private_hosts: bool,
    pub plyr_api_url: String,
    pub retry: RetryConfig,
    pub cleanup: CleanupConfig,
    /// Directory for browser-mode archives waiting to be taken. System temp
    /// directory when unset.
    pub archive_spool_dir: Option<PathBuf>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub backoff_ms: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct CleanupConfig {
    pub interval_secs: u64,
    /// How long an assembled archive may wait for retrieval.
    pub stale_streaming_secs: u64,
    /// How long a finished browser-mode job stays listed.
    pub delivered_retention_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            download_dir: PathBuf::from("downloads"),
            default_workers: 5,
            request_timeout_secs: 120,
            page_timeout_secs: 30,
            connect_timeout_secs: 15,
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string(),
            proxy: None,
            event_buffer: 256,
            block_private_hosts: true,
            plyr_api_url: "https://api.galaxyaudiobook.com/api/getMp3Link".to_string(),
            retry: RetryConfig::default(),
            cleanup: CleanupConfig::default(),
            archive_spool_dir: None,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            backoff_ms: 2000,
        }
    }
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            stale_streaming_secs: 600,
            delivered_retention_secs: 60,
        }
    }
}

impl AppConfig {
    /// Defaults, then the JSON config file if present, then `AUDIO_DL_*` variables.
    pub fn load() -> Result<Self> {
        let config_path = Self::get_config_path()?;
        Self::load_from(&config_path)
    }

    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: AppConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let config_path = Self::get_config_path()?;
        self.save_to(&config_path)
    }

    pub fn save_to(&self, config_path: &std::path::Path) -> Result<()> {
        if let Some(config_dir) = config_path.parent() {
            if !config_dir.exists() {
                std::fs::create_dir_all(config_dir)?;
            }
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(config_path, content)?;
        Ok(())
    }

    fn get_config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| AppError::Config(config::ConfigError::Message("Could not find config directory".to_string())))?;

        Ok(config_dir.join("audio-downloader").join("config.json"))
    }

    fn validate(&self) -> Result<()> {
        if !(crate::security::MIN_WORKERS..=crate::security::MAX_WORKERS).contains(&self.default_workers) {
            return Err(AppError::Validation(format!(
                "default_workers must be between {} and {}",
                crate::security::MIN_WORKERS,
                crate::security::MAX_WORKERS
            )));
        }
        if self.request_timeout_secs == 0 || self.page_timeout_secs == 0 {
            return Err(AppError::Validation("timeouts must be greater than zero".to_string()));
        }
        if self.retry.max_attempts == 0 {
            return Err(AppError::Validation("retry.max_attempts must be at least 1".to_string()));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn page_timeout(&self) -> Duration {
        Duration::from_secs(self.page_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}
