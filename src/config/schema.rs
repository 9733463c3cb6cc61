//! Configuration schema for svncache
//!
//! Configuration is stored at `~/.config/svncache/config.toml`

use serde::{Deserialize, Serialize};

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// Status cache settings
    pub cache: CacheConfig,

    /// Filesystem workspace settings
    pub workspace: WorkspaceConfig,
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Default log directive when `RUST_LOG` is unset
    pub log_level: String,

    /// Log format: "text" or "json"
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "text".to_string(),
        }
    }
}

/// Status cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Keep reconciled records between lookups (default: true)
    pub enabled: bool,

    /// Re-check the parent of a subtree root whose URL looks switched
    pub verify_external_roots: bool,

    /// Name of the background reconciliation queue
    pub fetch_queue_name: String,

    /// Name of the listener dispatch queue
    pub event_queue_name: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            verify_external_roots: true,
            fetch_queue_name: "svn-fetch".to_string(),
            event_queue_name: "svn-events".to_string(),
        }
    }
}

/// Filesystem workspace configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceConfig {
    /// Working copy metadata directory name
    pub metadata_dir: String,

    /// Glob patterns of ignored names or project-relative paths
    pub ignore: Vec<String>,

    /// Project-relative build output folders
    pub output_folders: Vec<String>,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            metadata_dir: ".svn".to_string(),
            ignore: vec!["*.o".to_string(), "*~".to_string(), ".DS_Store".to_string()],
            output_folders: vec!["target".to_string(), "bin".to_string()],
        }
    }
}

impl Config {
    /// Check the settings serde cannot express
    pub fn validate(&self) -> Result<(), String> {
        let dir = &self.workspace.metadata_dir;
        if dir.is_empty() || dir.contains('/') || dir.contains('\\') {
            return Err(format!("metadata_dir must be a plain directory name, got {:?}", dir));
        }
        if !matches!(self.general.log_format.as_str(), "text" | "json") {
            return Err(format!(
                "log_format must be \"text\" or \"json\", got {:?}",
                self.general.log_format
            ));
        }
        let cache = &self.cache;
        if cache.fetch_queue_name.is_empty() || cache.event_queue_name.is_empty() {
            return Err("queue names must not be empty".to_string());
        }
        if cache.fetch_queue_name == cache.event_queue_name {
            return Err(format!("fetch and event queues share the name {:?}", cache.fetch_queue_name));
        }
        Ok(())
    }
}
