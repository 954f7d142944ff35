use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use dirs;
use crate::errors::{AppError, Result};

const ENV_PREFIX: &str = "MEDIAGRAB";

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    /// Directory the engine writes `<job_id>-<title>.<ext>` files into.
    pub work_dir: PathBuf,
    pub ytdlp_path: String,
    /// Format selector used when a submission does not carry one.
    pub default_format: String,
    pub merge_output_format: Option<String>,
    pub poll_interval_ms: u64,
    /// `None` runs every submitted job immediately.
    pub max_concurrent_jobs: Option<usize>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            work_dir: std::env::current_dir()
                .unwrap_or_else(|_| PathBuf::from("."))
                .join("temp"),
            ytdlp_path: "yt-dlp".to_string(),
            default_format: "best".to_string(),
            merge_output_format: None,
            poll_interval_ms: 500,
            max_concurrent_jobs: None,
        }
    }
}

impl AppConfig {
    /// Loads defaults, then the user config file, then `MEDIAGRAB_*` variables.
    /// Writes a default config file the first time round.
    pub fn load() -> Result<Self> {
        let config_path = Self::get_config_path()?;

        if !config_path.exists() {
            if let Err(e) = AppConfig::default().save() {
                log::warn!("Could not write default config to {:?}: {}", config_path, e);
            }
        }

        Self::load_from(&config_path)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(
                config::File::from(path)
                    .format(config::FileFormat::Json)
                    .required(false),
            )
            .add_source(config::Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()?;

        let config: AppConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let config_path = Self::get_config_path()?;
        self.save_to(&config_path)
    }

    pub fn save_to(&self, config_path: &Path) -> Result<()> {
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

        Ok(config_dir.join("mediagrab").join("config.json"))
    }

    fn validate(&self) -> Result<()> {
        if self.ytdlp_path.trim().is_empty() {
            return Err(AppError::Validation("ytdlp_path cannot be empty".to_string()));
        }
        if self.default_format.trim().is_empty() {
            return Err(AppError::Validation("default_format cannot be empty".to_string()));
        }
        if self.max_concurrent_jobs == Some(0) {
            return Err(AppError::Validation("max_concurrent_jobs must be at least 1".to_string()));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(50))
    }

    /// Creates the working directory if it is missing.
    pub fn ensure_work_dir(&self) -> Result<()> {
        if !self.work_dir.exists() {
            std::fs::create_dir_all(&self.work_dir)?;
            log::info!("Created working directory: {:?}", self.work_dir);
        }
        Ok(())
    }
}
