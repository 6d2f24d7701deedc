use crate::database;
use crate::error::AppError;
use crate::services::replay_service::RetryPolicy;
use photo_upload::CompressionConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default config file, relative to the working directory
pub const DEFAULT_CONFIG_FILE: &str = "optitour-booth.toml";
/// Environment variable overriding the config file location
pub const CONFIG_ENV: &str = "OPTITOUR_CONFIG";

/// Client configuration, loaded from TOML
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoothConfig {
    /// Backend API root, e.g. `https://booth.example.com/api`
    pub api_base_url: String,
    /// SQLite file holding the persisted blobs; defaults to the app data dir
    pub database_path: Option<PathBuf>,
    pub request_timeout_secs: u64,
    pub replay: RetryPolicy,
    pub compression: CompressionConfig,
}

impl Default for BoothConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:3000/api".to_string(),
            database_path: None,
            request_timeout_secs: 60,
            replay: RetryPolicy::default(),
            compression: CompressionConfig::default(),
        }
    }
}

impl BoothConfig {
    pub fn from_toml(s: &str) -> Result<Self, AppError> {
        let config: BoothConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads `path`, or the file named by `OPTITOUR_CONFIG`, or the default
    /// file. A missing file yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, AppError> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => std::env::var_os(CONFIG_ENV)
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE)),
        };

        if !path.exists() {
            log::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path)?;
        let config = Self::from_toml(&content)?;
        log::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.api_base_url.trim().is_empty() {
            return Err(AppError::Config("api_base_url must not be empty".to_string()));
        }
        if self.compression.max_dimension == 0 {
            return Err(AppError::Config(
                "compression.max_dimension must be positive".to_string(),
            ));
        }
        if !(1..=100).contains(&self.compression.quality) {
            return Err(AppError::Config(
                "compression.quality must be between 1 and 100".to_string(),
            ));
        }
        Ok(())
    }

    pub fn database_path(&self) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(database::get_database_path)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = BoothConfig::from_toml(
            r#"
            api_base_url = "https://booth.example.com/api"

            [replay]
            max_retries = 3

            [compression]
            quality = 70
            "#,
        )
        .unwrap();

        assert_eq!(config.api_base_url, "https://booth.example.com/api");
        assert_eq!(config.replay.max_retries, 3);
        assert_eq!(config.replay.interval_secs, RetryPolicy::default().interval_secs);
        assert_eq!(config.compression.quality, 70);
        assert_eq!(config.compression.max_dimension, 1920);
        assert_eq!(config.request_timeout(), Duration::from_secs(60));
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(matches!(
            BoothConfig::from_toml("api_base_url = \"\""),
            Err(AppError::Config(_))
        ));
        assert!(matches!(
            BoothConfig::from_toml("[compression]\nquality = 0"),
            Err(AppError::Config(_))
        ));
        assert!(BoothConfig::from_toml("replay = 5").is_err());
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = BoothConfig::load(Some(&dir.path().join("absent.toml"))).unwrap();
        assert_eq!(config, BoothConfig::default());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("booth.toml");
        std::fs::write(&path, "database_path = \"/tmp/booth.db\"\nrequest_timeout_secs = 5\n")
            .unwrap();

        let config = BoothConfig::load(Some(&path)).unwrap();
        assert_eq!(config.database_path(), PathBuf::from("/tmp/booth.db"));
        assert_eq!(config.request_timeout(), Duration::from_secs(5));
    }
}
