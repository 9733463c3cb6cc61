//! Configuration loading for svncache
//!
//! The file lives at `~/.config/svncache/config.toml` unless `SVNCACHE_CONFIG`
//! points elsewhere. A missing file means defaults; a present but invalid
//! file is an error, never silently replaced.

pub mod schema;

pub use schema::{CacheConfig, Config, GeneralConfig, WorkspaceConfig};

use crate::error::{SvnCacheError, SvnCacheResult};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

/// Environment variable overriding the config file location
pub const CONFIG_ENV: &str = "SVNCACHE_CONFIG";

/// Reads and writes the svncache config file
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    /// Manager for `$SVNCACHE_CONFIG`, or the per-user default path
    pub fn new() -> Self {
        let config_path = std::env::var_os(CONFIG_ENV)
            .filter(|p| !p.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(Self::default_config_path);
        Self { config_path }
    }

    pub fn with_path(path: PathBuf) -> Self {
        Self { config_path: path }
    }

    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("svncache")
            .join("config.toml")
    }

    pub fn path(&self) -> &Path {
        &self.config_path
    }

    pub async fn load(&self) -> SvnCacheResult<Config> {
        match fs::try_exists(&self.config_path).await {
            Ok(true) => self.load_from_file(&self.config_path).await,
            Ok(false) => {
                debug!("No config at {}, using defaults", self.config_path.display());
                Ok(Config::default())
            }
            Err(e) => Err(SvnCacheError::io(
                format!("checking config at {}", self.config_path.display()),
                e,
            )),
        }
    }

    pub async fn load_from_file(&self, path: &Path) -> SvnCacheResult<Config> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| SvnCacheError::io(format!("reading config from {}", path.display()), e))?;

        let config: Config = toml::from_str(&content).map_err(|e| SvnCacheError::ConfigInvalid {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        config.validate().map_err(|reason| SvnCacheError::ConfigInvalid {
            path: path.to_path_buf(),
            reason,
        })?;

        debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Write `config`, refusing values `load` would reject
    pub async fn save(&self, config: &Config) -> SvnCacheResult<()> {
        config.validate().map_err(|reason| SvnCacheError::ConfigInvalid {
            path: self.config_path.clone(),
            reason,
        })?;

        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| SvnCacheError::ConfigDirCreate {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
        }

        let content = toml::to_string_pretty(config)?;
        fs::write(&self.config_path, content).await.map_err(|e| {
            SvnCacheError::io(format!("writing config to {}", self.config_path.display()), e)
        })?;

        info!("Configuration saved to {}", self.config_path.display());
        Ok(())
    }
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn missing_file_yields_defaults() {
        let temp = TempDir::new().unwrap();
        let manager = ConfigManager::with_path(temp.path().join("nonexistent.toml"));

        let config = manager.load().await.unwrap();
        assert!(config.cache.enabled);
        assert_eq!(config.workspace.metadata_dir, ".svn");
    }

    #[tokio::test]
    async fn save_and_load_roundtrip() {
        let temp = TempDir::new().unwrap();
        let manager = ConfigManager::with_path(temp.path().join("nested").join("config.toml"));

        let mut config = Config::default();
        config.cache.verify_external_roots = false;
        config.workspace.ignore = vec!["*.class".to_string()];

        manager.save(&config).await.unwrap();
        let loaded = manager.load().await.unwrap();

        assert!(!loaded.cache.verify_external_roots);
        assert_eq!(loaded.workspace.ignore, vec!["*.class".to_string()]);
    }

    #[tokio::test]
    async fn rejects_nested_metadata_dir() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        tokio::fs::write(&path, "[workspace]\nmetadata_dir = \"a/b\"\n")
            .await
            .unwrap();

        let err = ConfigManager::with_path(path).load().await.unwrap_err();
        assert!(matches!(err, SvnCacheError::ConfigInvalid { .. }));
    }

    #[tokio::test]
    async fn save_refuses_invalid_config() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        let mut config = Config::default();
        config.general.log_format = "yaml".to_string();

        let err = ConfigManager::with_path(path.clone()).save(&config).await.unwrap_err();
        assert!(matches!(err, SvnCacheError::ConfigInvalid { .. }));
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn reports_syntax_errors() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        tokio::fs::write(&path, "[cache\n").await.unwrap();

        let err = ConfigManager::with_path(path).load().await.unwrap_err();
        assert!(err.to_string().contains("Invalid configuration"));
    }
}
